//! Revision identifiers and the ordered list the controller searches.
use crate::error::BisectError;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// An archived build identifier: a build number or a dotted version.
#[derive(Debug, Clone)]
pub enum Revision {
    Number(u64),
    Version { parts: Vec<u64>, text: String },
}

impl Revision {
    /// Numeric components used for ordering; a build number is a single part.
    fn parts(&self) -> &[u64] {
        match self {
            Revision::Number(value) => std::slice::from_ref(value),
            Revision::Version { parts, .. } => parts,
        }
    }
}

impl FromStr for Revision {
    type Err = BisectError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        if text.is_empty() {
            return Err(BisectError::InvalidRevision(input.to_string()));
        }
        if !text.contains('.') {
            return text
                .parse::<u64>()
                .map(Revision::Number)
                .map_err(|_| BisectError::InvalidRevision(input.to_string()));
        }
        let parts = text
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| BisectError::InvalidRevision(input.to_string()))?;
        Ok(Revision::Version {
            parts,
            text: text.to_string(),
        })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Number(value) => write!(f, "{value}"),
            Revision::Version { text, .. } => f.write_str(text),
        }
    }
}

impl PartialEq for Revision {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Revision {}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parts().cmp(other.parts())
    }
}

impl From<u64> for Revision {
    fn from(value: u64) -> Self {
        Revision::Number(value)
    }
}

/// Strictly ascending revisions between two bounds.
///
/// Elements can be removed while bisecting, but never reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionList {
    revisions: Vec<Revision>,
}

impl RevisionList {
    /// Sort and drop duplicates so the strict ordering holds from the start.
    pub fn from_unsorted(revisions: impl IntoIterator<Item = Revision>) -> Self {
        let mut revisions: Vec<Revision> = revisions.into_iter().collect();
        revisions.sort();
        revisions.dedup();
        RevisionList { revisions }
    }

    /// Keep only revisions inside `[min(a, b), max(a, b)]`.
    pub fn within(self, a: &Revision, b: &Revision) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let revisions = self
            .revisions
            .into_iter()
            .filter(|rev| rev >= low && rev <= high)
            .collect();
        RevisionList { revisions }
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn as_slice(&self) -> &[Revision] {
        &self.revisions
    }

    /// Remove the element at `index`, keeping the rest in order.
    pub fn remove(&mut self, index: usize) -> Revision {
        self.revisions.remove(index)
    }

    pub fn is_strictly_ascending(&self) -> bool {
        self.revisions.windows(2).all(|pair| pair[0] < pair[1])
    }
}

impl std::ops::Index<usize> for RevisionList {
    type Output = Revision;

    fn index(&self, index: usize) -> &Revision {
        &self.revisions[index]
    }
}

impl fmt::Display for RevisionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .revisions
            .iter()
            .map(|rev| rev.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "[{joined}]")
    }
}
