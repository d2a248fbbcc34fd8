//! Index arithmetic for the search window and the good/bad orientation.
use crate::judge::Verdict;
use crate::revision::Revision;

/// Unresolved index range `[min, max]` of the revision list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub min: usize,
    pub max: usize,
}

impl SearchWindow {
    /// Full window over a list of `len` revisions; needs at least two.
    pub fn spanning(len: usize) -> Option<Self> {
        (len >= 2).then(|| SearchWindow {
            min: 0,
            max: len - 1,
        })
    }

    pub fn is_converged(&self) -> bool {
        self.max - self.min <= 1
    }

    pub fn midpoint(&self) -> usize {
        (self.min + self.max) / 2
    }

    /// Next pivot if the current one moves the window down.
    pub fn down_pivot(&self, pivot: usize) -> usize {
        (pivot - self.min) / 2 + self.min
    }

    /// Next pivot if the current one moves the window up.
    pub fn up_pivot(&self, pivot: usize) -> usize {
        (self.max - pivot) / 2 + pivot
    }

    pub fn strictly_contains(&self, index: usize) -> bool {
        self.min < index && index < self.max
    }

    /// `0 <= min < max <= len - 1`
    pub fn holds_for(&self, len: usize) -> bool {
        self.min < self.max && self.max < len
    }
}

/// Which endpoint sits at the low end of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    GoodIsLower,
    BadIsLower,
}

/// How a verdict moves the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    RaiseMin,
    LowerMax,
    Prune,
}

impl Orientation {
    pub fn from_bounds(good: &Revision, bad: &Revision) -> Self {
        if bad < good {
            Orientation::BadIsLower
        } else {
            Orientation::GoodIsLower
        }
    }

    pub fn step(&self, verdict: Verdict) -> Step {
        match (self, verdict) {
            (_, Verdict::Unknown) => Step::Prune,
            (Orientation::GoodIsLower, Verdict::Good) | (Orientation::BadIsLower, Verdict::Bad) => {
                Step::RaiseMin
            }
            (Orientation::GoodIsLower, Verdict::Bad) | (Orientation::BadIsLower, Verdict::Good) => {
                Step::LowerMax
            }
        }
    }

    /// Verdicts assumed for the low and high endpoints.
    pub fn endpoint_verdicts(&self) -> (Verdict, Verdict) {
        match self {
            Orientation::GoodIsLower => (Verdict::Good, Verdict::Bad),
            Orientation::BadIsLower => (Verdict::Bad, Verdict::Good),
        }
    }
}
