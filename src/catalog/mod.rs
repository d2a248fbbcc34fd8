//! Revision catalogs: which builds exist and where to download them.
//!
//! Naming conventions differ between continuous snapshots and official
//! builds, so each lives behind [`RevisionCatalog`] and the controller only
//! ever sees ordered revisions and URLs.
mod listing;

pub use listing::{parse_listing_page, ListingPage};

use crate::error::BisectError;
use crate::platform::{ArchiveLayout, BuildKind};
use crate::revision::{Revision, RevisionList};
use crate::transport::Transport;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

const CHANGELOG_URL: &str =
    "http://build.chromium.org/f/chromium/perf/dashboard/ui/changelog.html?url=/trunk/src";
const BLINK_CHANGELOG_URL: &str =
    "http://build.chromium.org/f/chromium/perf/dashboard/ui/changelog_blink.html?url=/trunk";
const OFFICIAL_CHANGELOG_URL: &str = "http://omahaproxy.appspot.com/changelog";

/// Source of ordered revisions and their download URLs.
pub trait RevisionCatalog {
    /// Revisions with published archives in `[min(lower, upper), max(lower, upper)]`.
    fn list_revisions(
        &self,
        lower: &Revision,
        upper: &Revision,
    ) -> Result<RevisionList, BisectError>;

    fn url_for(&self, revision: &Revision) -> String;

    fn layout(&self) -> &ArchiveLayout;

    /// Most recent published revision, when the archive advertises one.
    fn latest_revision(&self) -> Option<Revision>;

    fn changelog_url(&self, low: &Revision, high: &Revision) -> String;

    /// Changelog of the rendering engine between the two builds, when both
    /// engine revisions are known and differ.
    fn blink_changelog_url(&self, _low: &Revision, _high: &Revision) -> Option<String> {
        None
    }
}

/// Build the catalog for a build kind over the given base URL.
///
/// `deps_url` is the dependency manifest snapshot builds consult for their
/// engine revision.
pub fn build_catalog(
    kind: BuildKind,
    transport: Arc<dyn Transport>,
    base_url: &str,
    deps_url: &str,
    layout: ArchiveLayout,
) -> Box<dyn RevisionCatalog> {
    let base_url = base_url.trim_end_matches('/').to_string();
    match kind {
        BuildKind::Snapshot => Box::new(SnapshotCatalog {
            transport,
            base_url,
            deps_url: deps_url.to_string(),
            layout,
        }),
        BuildKind::Official => Box::new(OfficialCatalog {
            transport,
            base_url,
            layout,
        }),
    }
}

fn require_range(list: RevisionList) -> Result<RevisionList, BisectError> {
    if list.len() < 2 {
        return Err(BisectError::EmptyRange { found: list.len() });
    }
    Ok(list)
}

/// Continuous builds listed through a paginated bucket index.
pub struct SnapshotCatalog {
    transport: Arc<dyn Transport>,
    base_url: String,
    deps_url: String,
    layout: ArchiveLayout,
}

impl SnapshotCatalog {
    /// Blink revision pinned in the dependency manifest at `revision`.
    ///
    /// Any failure is logged and yields `None`.
    pub fn blink_revision(&self, revision: &Revision) -> Option<u64> {
        static WEBKIT_RE: OnceLock<Regex> = OnceLock::new();
        let webkit_re = WEBKIT_RE.get_or_init(|| {
            Regex::new(r"webkit_revision.:\D*(\d+)").expect("regex for webkit revision")
        });
        let Revision::Number(number) = revision else {
            return None;
        };
        let url = format!("{}?revision={number}", self.deps_url);
        let text = match self.transport.get_text(&url) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(url = %url, error = %err, "could not read dependency manifest");
                return None;
            }
        };
        let blink = webkit_re
            .captures(&text)
            .and_then(|cap| cap.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok());
        if blink.is_none() {
            tracing::debug!(url = %url, "dependency manifest names no webkit revision");
        }
        blink
    }

    fn listing_url(&self, marker: Option<&str>) -> String {
        let marker_param = marker
            .map(|marker| format!("&marker={marker}"))
            .unwrap_or_default();
        format!(
            "{}/?delimiter=/&prefix={}/{}",
            self.base_url, self.layout.platform_dir, marker_param
        )
    }

    fn fetch_page(&self, marker: Option<&str>) -> Result<ListingPage, BisectError> {
        let url = self.listing_url(marker);
        tracing::debug!(url = %url, "fetching revision listing page");
        let text = self
            .transport
            .get_text(&url)
            .map_err(|err| BisectError::CatalogUnavailable(format!("{err:#}")))?;
        parse_listing_page(&text)
    }

    /// Every revision in the bucket, following continuation markers.
    fn all_revisions(&self) -> Result<Vec<Revision>, BisectError> {
        let mut page = self.fetch_page(None)?;
        let mut revisions = std::mem::take(&mut page.revisions);
        let mut seen_markers = BTreeSet::new();
        while let Some(marker) = page.next_marker.take() {
            if !seen_markers.insert(marker.clone()) {
                return Err(BisectError::CatalogUnavailable(format!(
                    "directory index repeated continuation marker {marker}"
                )));
            }
            page = self.fetch_page(Some(&marker))?;
            revisions.append(&mut page.revisions);
        }
        tracing::debug!(
            pages = seen_markers.len() + 1,
            revisions = revisions.len(),
            "revision listing complete"
        );
        Ok(revisions)
    }
}

impl RevisionCatalog for SnapshotCatalog {
    fn list_revisions(
        &self,
        lower: &Revision,
        upper: &Revision,
    ) -> Result<RevisionList, BisectError> {
        let revisions = self.all_revisions()?;
        require_range(RevisionList::from_unsorted(revisions).within(lower, upper))
    }

    fn url_for(&self, revision: &Revision) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url, self.layout.platform_dir, revision, self.layout.archive_name
        )
    }

    fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    fn latest_revision(&self) -> Option<Revision> {
        let url = format!("{}/{}/LAST_CHANGE", self.base_url, self.layout.platform_dir);
        match self.transport.get_text(&url) {
            Ok(text) => text.trim().parse::<u64>().ok().map(Revision::Number),
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "could not read LAST_CHANGE");
                None
            }
        }
    }

    fn changelog_url(&self, low: &Revision, high: &Revision) -> String {
        format!("{CHANGELOG_URL}&range={low}%3A{high}")
    }

    fn blink_changelog_url(&self, low: &Revision, high: &Revision) -> Option<String> {
        let low_blink = self.blink_revision(low)?;
        let high_blink = self.blink_revision(high)?;
        (low_blink != high_blink)
            .then(|| format!("{BLINK_CHANGELOG_URL}&range={high_blink}%3A{low_blink}"))
    }
}

/// Official builds discovered from a plain HTML directory index.
pub struct OfficialCatalog {
    transport: Arc<dyn Transport>,
    base_url: String,
    layout: ArchiveLayout,
}

impl RevisionCatalog for OfficialCatalog {
    fn list_revisions(
        &self,
        lower: &Revision,
        upper: &Revision,
    ) -> Result<RevisionList, BisectError> {
        let index = self
            .transport
            .get_text(&self.base_url)
            .map_err(|err| BisectError::CatalogUnavailable(format!("{err:#}")))?;
        static LINK_RE: OnceLock<Regex> = OnceLock::new();
        let link_re = LINK_RE.get_or_init(|| {
            Regex::new(r#"<a href="([0-9][0-9][^"/]*)/">"#).expect("regex for build links")
        });
        let builds = link_re
            .captures_iter(&index)
            .filter_map(|cap| cap.get(1))
            .filter_map(|m| m.as_str().parse::<Revision>().ok());
        let candidates = RevisionList::from_unsorted(builds).within(lower, upper);

        // Not every official build has an archive for every platform.
        let published = candidates
            .as_slice()
            .iter()
            .filter(|revision| {
                let present = self.transport.exists(&self.url_for(revision));
                if !present {
                    tracing::debug!(revision = %revision, "official build has no archive");
                }
                present
            })
            .cloned();
        require_range(RevisionList::from_unsorted(published))
    }

    fn url_for(&self, revision: &Revision) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url, revision, self.layout.platform_dir, self.layout.archive_name
        )
    }

    fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    fn latest_revision(&self) -> Option<Revision> {
        None
    }

    fn changelog_url(&self, low: &Revision, high: &Revision) -> String {
        format!("{OFFICIAL_CHANGELOG_URL}?old_version={low}&new_version={high}")
    }
}
