use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{BatchSummary, ItemStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemOutcome {
    pub item_id: i64,
    pub status: ItemStatus,
    pub message: Option<String>,
    pub places_created: usize,
    pub places_linked: usize,
}

impl ItemOutcome {
    pub fn processed(item_id: i64, places_created: usize, places_linked: usize) -> Self {
        Self {
            item_id,
            status: ItemStatus::Processed,
            message: None,
            places_created,
            places_linked,
        }
    }

    pub fn failed(item_id: i64, message: impl Into<String>) -> Self {
        Self {
            item_id,
            status: ItemStatus::Failed,
            message: Some(message.into()),
            places_created: 0,
            places_linked: 0,
        }
    }

    /// Records places committed for the item before it failed.
    pub fn with_progress(mut self, places_created: usize, places_linked: usize) -> Self {
        self.places_created = places_created;
        self.places_linked = places_linked;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub outcomes: Vec<ItemOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            summary: BatchSummary::default(),
            outcomes: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    /// Adds an outcome decided outside the orchestrated fold.
    pub fn push_outcome(&mut self, outcome: ItemOutcome) {
        self.summary.total += 1;
        match outcome.status {
            ItemStatus::Processed => self.summary.processed += 1,
            ItemStatus::Failed | ItemStatus::Pending => self.summary.failed += 1,
        }
        self.outcomes.push(outcome);
        self.finished_at = Utc::now();
    }

    pub fn places_created(&self) -> usize {
        self.outcomes.iter().map(|outcome| outcome.places_created).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == ItemStatus::Failed)
    }
}

/// Folds per-item outcomes into the batch counters. `total` is the number of
/// items handed to the batch, so it always equals `processed + failed`.
pub fn summarize(total: usize, outcomes: &[ItemOutcome]) -> BatchSummary {
    outcomes
        .iter()
        .fold(
            BatchSummary {
                total,
                ..BatchSummary::default()
            },
            |mut summary, outcome| {
                match outcome.status {
                    ItemStatus::Processed => summary.processed += 1,
                    ItemStatus::Failed | ItemStatus::Pending => summary.failed += 1,
                }
                summary
            },
        )
}
