//! Pure search state: the shrinking revision list, the window and the
//! verdicts gathered so far. No I/O happens here.
use super::window::{Orientation, SearchWindow, Step};
use crate::error::BisectError;
use crate::fetch::Role;
use crate::judge::Verdict;
use crate::revision::{Revision, RevisionList};
use std::collections::BTreeMap;

/// Indices prefetched around the current pivot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Candidates {
    pub down: Option<usize>,
    pub up: Option<usize>,
}

/// What the controller has to do after a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Reuse the speculative download in `role` for the new pivot.
    Adopt { role: Role, pivot: usize },
    /// No usable speculative download; fetch the new pivot from scratch.
    Fresh { pivot: usize },
    Converged,
}

#[derive(Debug, Clone)]
pub struct Search {
    list: RevisionList,
    window: SearchWindow,
    pivot: usize,
    orientation: Orientation,
    verdicts: BTreeMap<Revision, Verdict>,
}

impl Search {
    pub fn new(list: RevisionList, orientation: Orientation) -> Result<Self, BisectError> {
        let window =
            SearchWindow::spanning(list.len()).ok_or(BisectError::EmptyRange { found: list.len() })?;
        let (low_verdict, high_verdict) = orientation.endpoint_verdicts();
        let mut verdicts = BTreeMap::new();
        verdicts.insert(list[window.min].clone(), low_verdict);
        verdicts.insert(list[window.max].clone(), high_verdict);
        Ok(Search {
            pivot: window.midpoint(),
            list,
            window,
            orientation,
            verdicts,
        })
    }

    pub fn is_converged(&self) -> bool {
        self.window.is_converged()
    }

    pub fn window(&self) -> SearchWindow {
        self.window
    }

    pub fn list(&self) -> &RevisionList {
        &self.list
    }

    pub fn pivot_revision(&self) -> &Revision {
        &self.list[self.pivot]
    }

    pub fn revision_at(&self, index: usize) -> &Revision {
        &self.list[index]
    }

    pub fn bounds(&self) -> (&Revision, &Revision) {
        (&self.list[self.window.min], &self.list[self.window.max])
    }

    pub fn verdicts(&self) -> &BTreeMap<Revision, Verdict> {
        &self.verdicts
    }

    /// Next pivots worth prefetching: skipped when they coincide with the
    /// pivot or with a window bound.
    pub fn speculative_pivots(&self) -> Candidates {
        let down = self.window.down_pivot(self.pivot);
        let up = self.window.up_pivot(self.pivot);
        Candidates {
            down: (down != self.pivot && down != self.window.min).then_some(down),
            up: (up != self.pivot && up != self.window.max).then_some(up),
        }
    }

    /// Record `verdict` for the pivot and move the window.
    pub fn advance(&mut self, verdict: Verdict, candidates: Candidates) -> Next {
        self.verdicts.insert(self.pivot_revision().clone(), verdict);
        let next = match self.orientation.step(verdict) {
            Step::RaiseMin => {
                self.window.min = self.pivot;
                self.settle(candidates.up.map(|index| (Role::Up, index)))
            }
            Step::LowerMax => {
                self.window.max = self.pivot;
                self.settle(candidates.down.map(|index| (Role::Down, index)))
            }
            Step::Prune => {
                self.list.remove(self.pivot);
                self.window.max -= 1;
                // Everything above the removed pivot shifted down by one.
                let up = candidates.up.map(|index| index - 1);
                let pick = match (candidates.down, up) {
                    (Some(_), Some(up)) if self.list.len() % 2 == 0 => Some((Role::Up, up)),
                    (Some(down), Some(_)) => Some((Role::Down, down)),
                    (Some(down), None) => Some((Role::Down, down)),
                    (None, Some(up)) => Some((Role::Up, up)),
                    (None, None) => None,
                };
                self.settle(pick)
            }
        };
        debug_assert!(self.window.holds_for(self.list.len()));
        debug_assert!(self.list.is_strictly_ascending());
        next
    }

    fn settle(&mut self, pick: Option<(Role, usize)>) -> Next {
        if self.window.is_converged() {
            return Next::Converged;
        }
        match pick {
            Some((role, index)) if self.window.strictly_contains(index) => {
                self.pivot = index;
                Next::Adopt { role, pivot: index }
            }
            _ => {
                self.pivot = self.window.midpoint();
                Next::Fresh { pivot: self.pivot }
            }
        }
    }

    /// Bracketing pair once the window has converged.
    pub fn result(&self) -> BisectionResult {
        let (low, high) = self.bounds();
        BisectionResult {
            low: low.clone(),
            high: high.clone(),
            orientation: self.orientation,
        }
    }
}

/// Adjacent surviving revisions with opposite verdicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BisectionResult {
    pub low: Revision,
    pub high: Revision,
    pub orientation: Orientation,
}

impl BisectionResult {
    pub fn good(&self) -> &Revision {
        match self.orientation {
            Orientation::GoodIsLower => &self.low,
            Orientation::BadIsLower => &self.high,
        }
    }

    pub fn bad(&self) -> &Revision {
        match self.orientation {
            Orientation::GoodIsLower => &self.high,
            Orientation::BadIsLower => &self.low,
        }
    }

    pub fn summary(&self) -> String {
        let (low_label, high_label) = match self.orientation {
            Orientation::GoodIsLower => ("known good", "first known bad"),
            Orientation::BadIsLower => ("known bad", "first known good"),
        };
        format!(
            "You are probably looking for a change made after {} ({low_label}), but no later than {} ({high_label}).",
            self.low, self.high
        )
    }
}
