//! # Step Metrics
//!
//! Counters recorded for every step and partition execution. Metrics survive
//! failures: whatever was counted before the failure is still reported.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    ReadCount,
    WriteCount,
    CommitCount,
    RollbackCount,
    ReadSkipCount,
    ProcessSkipCount,
    WriteSkipCount,
    FilterCount,
}

impl MetricType {
    pub const ALL: [MetricType; 8] = [
        Self::ReadCount,
        Self::WriteCount,
        Self::CommitCount,
        Self::RollbackCount,
        Self::ReadSkipCount,
        Self::ProcessSkipCount,
        Self::WriteSkipCount,
        Self::FilterCount,
    ];
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ReadCount => "read_count",
            Self::WriteCount => "write_count",
            Self::CommitCount => "commit_count",
            Self::RollbackCount => "rollback_count",
            Self::ReadSkipCount => "read_skip_count",
            Self::ProcessSkipCount => "process_skip_count",
            Self::WriteSkipCount => "write_skip_count",
            Self::FilterCount => "filter_count",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub read_count: u64,
    pub write_count: u64,
    pub commit_count: u64,
    pub rollback_count: u64,
    pub read_skip_count: u64,
    pub process_skip_count: u64,
    pub write_skip_count: u64,
    pub filter_count: u64,
}

impl StepMetrics {
    pub fn increment(&mut self, metric: MetricType, by: u64) {
        *self.slot_mut(metric) += by;
    }

    pub fn get(&self, metric: MetricType) -> u64 {
        match metric {
            MetricType::ReadCount => self.read_count,
            MetricType::WriteCount => self.write_count,
            MetricType::CommitCount => self.commit_count,
            MetricType::RollbackCount => self.rollback_count,
            MetricType::ReadSkipCount => self.read_skip_count,
            MetricType::ProcessSkipCount => self.process_skip_count,
            MetricType::WriteSkipCount => self.write_skip_count,
            MetricType::FilterCount => self.filter_count,
        }
    }

    /// Fold another execution's counters into this one (partition aggregation)
    pub fn add(&mut self, other: &StepMetrics) {
        for metric in MetricType::ALL {
            self.increment(metric, other.get(metric));
        }
    }

    pub fn skip_count(&self) -> u64 {
        self.read_skip_count + self.process_skip_count + self.write_skip_count
    }

    fn slot_mut(&mut self, metric: MetricType) -> &mut u64 {
        match metric {
            MetricType::ReadCount => &mut self.read_count,
            MetricType::WriteCount => &mut self.write_count,
            MetricType::CommitCount => &mut self.commit_count,
            MetricType::RollbackCount => &mut self.rollback_count,
            MetricType::ReadSkipCount => &mut self.read_skip_count,
            MetricType::ProcessSkipCount => &mut self.process_skip_count,
            MetricType::WriteSkipCount => &mut self.write_skip_count,
            MetricType::FilterCount => &mut self.filter_count,
        }
    }
}
