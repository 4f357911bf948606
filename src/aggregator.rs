//! Session-level flag aggregation
//!
//! Collects the closed flags for one session and merges in snapshots of
//! still-open tracker flags, exposing the ordered flag list and counts by
//! severity and type that reporting surfaces read.

use crate::types::{Flag, FlagCounts};

/// Flag store for one session
#[derive(Debug, Default)]
pub struct SessionAggregator {
    closed: Vec<Flag>,
}

impl SessionAggregator {
    pub fn new() -> Self {
        SessionAggregator::default()
    }

    /// Record a closed flag
    pub fn add(&mut self, flag: Flag) {
        self.closed.push(flag);
    }

    /// All flags ordered by `t_start`, open tracker flags included
    pub fn list(&self, open: impl IntoIterator<Item = Flag>) -> Vec<Flag> {
        let mut flags = self.closed.clone();
        flags.extend(open);
        flags.sort_by(|a, b| a.t_start.total_cmp(&b.t_start));
        flags
    }

    /// Counts over the given flag set
    pub fn counts(flags: &[Flag]) -> FlagCounts {
        FlagCounts::tally(flags)
    }
}
