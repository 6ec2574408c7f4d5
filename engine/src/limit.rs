//! File limits.
//!
//! A limit is a stateful counter fed with every entry a walk accepts. Once
//! any limit is reached the walk stops listing; it does not merely drop the
//! remaining entries. Limits are reset at the start of every walk.

use serde::Deserialize;
use std::fmt;

use crate::model::RemoteFile;

/// Stateful cap on a walk.
pub trait FileLimit: fmt::Debug + Send {
    /// Forget everything seen so far.
    fn reset(&mut self);

    /// Register an accepted entry. Returns true if the limit is now reached.
    fn stops_at(&mut self, entry: &RemoteFile) -> bool;

    fn is_reached(&self) -> bool;

    /// Human-readable description for the run log.
    fn describe(&self) -> String;
}

/// Feed an entry to every limit. True if any of them is reached.
pub fn limits_stop_at(limits: &mut [Box<dyn FileLimit>], entry: &RemoteFile) -> bool {
    // Every limit must see the entry, so no short-circuit here
    limits
        .iter_mut()
        .fold(false, |reached, limit| limit.stops_at(entry) || reached)
}

pub fn limits_reached(limits: &[Box<dyn FileLimit>]) -> bool {
    limits.iter().any(|limit| limit.is_reached())
}

pub fn reset_limits(limits: &mut [Box<dyn FileLimit>]) {
    for limit in limits.iter_mut() {
        limit.reset();
    }
}

/// Stops after `count_limit` files. Directories are not counted.
#[derive(Debug, Clone)]
pub struct MaxFilesCount {
    count_limit: usize,
    handled: usize,
}

impl MaxFilesCount {
    pub fn new(count_limit: usize) -> Self {
        MaxFilesCount {
            count_limit,
            handled: 0,
        }
    }
}

impl Default for MaxFilesCount {
    fn default() -> Self {
        MaxFilesCount::new(100)
    }
}

impl FileLimit for MaxFilesCount {
    fn reset(&mut self) {
        self.handled = 0;
    }

    fn stops_at(&mut self, entry: &RemoteFile) -> bool {
        if self.is_reached() {
            return true;
        }
        if entry.is_file() {
            self.handled += 1;
        }
        self.is_reached()
    }

    fn is_reached(&self) -> bool {
        self.handled >= self.count_limit
    }

    fn describe(&self) -> String {
        format!("count_limit = {}", self.count_limit)
    }
}

/// Limit settings as they appear in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LimitConfig {
    MaxFilesCount { count_limit: usize },
}

impl LimitConfig {
    pub fn build(&self) -> Box<dyn FileLimit> {
        match self {
            LimitConfig::MaxFilesCount { count_limit } => Box::new(MaxFilesCount::new(*count_limit)),
        }
    }
}
