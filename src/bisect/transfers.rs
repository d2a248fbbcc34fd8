//! Registry of in-flight downloads, one slot per role.
//!
//! The registry is the only owner of fetch handles during a run, so
//! cancelling everything on quit, interrupt or error is a single call.
use crate::fetch::{ArtifactFetcher, FetchHandle, FetchOutcome, Role};
use crate::revision::Revision;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Journal entry for a handle entering or leaving a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Started { role: Role, revision: Revision },
    Stopped { role: Role, revision: Revision },
    /// A speculative handle took over the active slot.
    Promoted { from: Role, revision: Revision },
}

impl fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferEvent::Started { role, revision } => write!(f, "start {role} {revision}"),
            TransferEvent::Stopped { role, revision } => write!(f, "stop  {role} {revision}"),
            TransferEvent::Promoted { from, revision } => {
                write!(f, "promote {from} {revision} to active")
            }
        }
    }
}

#[derive(Default)]
pub struct ActiveTransfers {
    slots: BTreeMap<Role, FetchHandle>,
    journal: Vec<TransferEvent>,
}

impl ActiveTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a download in `role`, stopping whatever held the slot first.
    pub fn start(
        &mut self,
        fetcher: &ArtifactFetcher,
        role: Role,
        revision: &Revision,
        url: String,
        dest: PathBuf,
    ) {
        self.stop(role);
        let handle = fetcher.start(revision, url, dest, role);
        self.record(TransferEvent::Started {
            role,
            revision: revision.clone(),
        });
        self.slots.insert(role, handle);
    }

    pub fn has(&self, role: Role) -> bool {
        self.slots.contains_key(&role)
    }

    /// Wait for the handle in `role`, if any.
    pub fn wait(&mut self, role: Role) -> Option<(FetchOutcome, PathBuf)> {
        let handle = self.slots.get_mut(&role)?;
        let outcome = handle.wait();
        Some((outcome, handle.dest().to_path_buf()))
    }

    /// Cancel and remove the handle in `role`, deleting its file.
    pub fn stop(&mut self, role: Role) {
        if let Some(mut handle) = self.slots.remove(&role) {
            handle.cancel();
            self.record(TransferEvent::Stopped {
                role,
                revision: handle.revision().clone(),
            });
        }
    }

    /// Move the handle in `from` into the active slot.
    pub fn promote(&mut self, from: Role) -> bool {
        let Some(handle) = self.slots.remove(&from) else {
            return false;
        };
        self.stop(Role::Active);
        self.record(TransferEvent::Promoted {
            from,
            revision: handle.revision().clone(),
        });
        self.slots.insert(Role::Active, handle);
        true
    }

    pub fn cancel_all(&mut self) {
        for role in [Role::Active, Role::Down, Role::Up] {
            self.stop(role);
        }
    }

    pub fn events(&self) -> &[TransferEvent] {
        &self.journal
    }

    fn record(&mut self, event: TransferEvent) {
        tracing::debug!(event = ?event, "transfer");
        self.journal.push(event);
    }
}

impl Drop for ActiveTransfers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
