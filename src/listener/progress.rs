use std::collections::HashMap;
use std::net::IpAddr;

/// What one connection attempt did to its source's stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Stage moved forward to the contained value.
    Advanced(usize),
    /// The last step was satisfied. The source starts over from 0.
    Completed,
    /// Wrong step or wrong payload. The source starts over from 0.
    Reset,
}

/// Per-source stage within a knock sequence of `steps` steps.
///
/// A source missing from the table is at stage 0. Stored stages are always in
/// `1..steps`, a source reaching `steps` is reported and removed.
#[derive(Debug)]
pub struct ProgressTable {
    stages: HashMap<IpAddr, usize>,
    steps: usize,
}

impl ProgressTable {
    pub fn new(steps: usize) -> Self {
        ProgressTable {
            stages: HashMap::new(),
            steps,
        }
    }

    pub fn stage(&self, source: &IpAddr) -> usize {
        self.stages.get(source).copied().unwrap_or(0)
    }

    /// Number of sources with partial progress.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Apply one attempt by `source` at zero-based `step`.
    ///
    /// The attempt advances only when the source has satisfied exactly the
    /// steps before it and `matched` says the payload was right.
    pub fn record(&mut self, source: IpAddr, step: usize, matched: bool) -> Outcome {
        if !matched || self.stage(&source) != step {
            self.stages.remove(&source);
            return Outcome::Reset;
        }

        let next = step + 1;
        if next >= self.steps {
            self.stages.remove(&source);
            Outcome::Completed
        } else {
            self.stages.insert(source, next);
            Outcome::Advanced(next)
        }
    }
}

// -- Unit tests --
