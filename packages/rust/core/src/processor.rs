//! The fetch/process step consumed by the run coordinator.

use paperdisc_shared::{ItemId, Result};

/// What one call to [`DiscussionProcessor::process_since`] handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessReport {
    /// Highest item id processed; `None` when nothing was new.
    pub highest_id: Option<ItemId>,
    /// Number of new items processed.
    pub count: usize,
}

impl ProcessReport {
    /// Nothing newer than the lower bound.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a report from the ids that were processed.
    pub fn from_ids(ids: impl IntoIterator<Item = ItemId>) -> Self {
        ids.into_iter().fold(Self::empty(), |acc, id| Self {
            highest_id: Some(acc.highest_id.map_or(id, |h| h.max(id))),
            count: acc.count + 1,
        })
    }
}

/// Retrieves the discussion items newer than a checkpoint and produces
/// whatever output they feed.
///
/// Implementations must be all-or-nothing from the caller's point of view:
/// returning an error means the coordinator keeps the old checkpoint and the
/// same items are offered again on the next run.
#[allow(async_fn_in_trait)]
pub trait DiscussionProcessor {
    /// Check external configuration before any state is touched.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Process every item with an id greater than `last_id`.
    async fn process_since(&self, last_id: ItemId) -> Result<ProcessReport>;
}
