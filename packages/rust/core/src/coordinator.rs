//! Run coordinator: one scheduled invocation from trigger to result.
//!
//! Sequence per run:
//! 1. Validate the processor's external configuration
//! 2. Take the run lease (when enabled)
//! 3. Load the checkpoint and pick the lower bound
//! 4. Process everything newer than the bound
//! 5. Advance and save the checkpoint
//! 6. Release the lease
//!
//! The checkpoint is written only after processing succeeded, so a failed run
//! is retried from the same checkpoint by the next trigger.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use paperdisc_shared::{ItemId, RunError, RunState};
use paperdisc_storage::StateStore;

use crate::processor::DiscussionProcessor;

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Replace the stored checkpoint as the lower bound for this run only.
    pub force_since: Option<ItemId>,
    /// Lease time-to-live; `None` disables leasing.
    pub lease_ttl: Option<Duration>,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Success,
    NoOpNothingDue,
    Failure(RunError),
}

/// Outcome of one invocation. Reported once, never persisted.
#[derive(Debug)]
pub struct RunResult {
    pub items_processed: usize,
    pub outcome: RunOutcome,
}

impl RunResult {
    pub fn success(items_processed: usize) -> Self {
        Self {
            items_processed,
            outcome: RunOutcome::Success,
        }
    }

    pub fn nothing_due() -> Self {
        Self {
            items_processed: 0,
            outcome: RunOutcome::NoOpNothingDue,
        }
    }

    pub fn failure(err: RunError) -> Self {
        Self {
            items_processed: 0,
            outcome: RunOutcome::Failure(err),
        }
    }

    /// The error, present only for failed runs.
    pub fn error_detail(&self) -> Option<&RunError> {
        match &self.outcome {
            RunOutcome::Failure(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error_detail().is_some()
    }
}

/// Sequences one run against a state store and a processor.
pub struct RunCoordinator<S, P> {
    store: S,
    processor: P,
}

impl<S: StateStore, P: DiscussionProcessor> RunCoordinator<S, P> {
    pub fn new(store: S, processor: P) -> Self {
        Self { store, processor }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Execute one run. Never panics on expected failures; every error is
    /// classified into the returned [`RunResult`].
    #[instrument(skip_all, fields(force_since = ?opts.force_since))]
    pub async fn run(&self, opts: &RunOptions) -> RunResult {
        if let Err(e) = self.processor.validate() {
            error!(error = %e, "configuration rejected before processing");
            return RunResult::failure(RunError::Configuration(e));
        }

        let holder = Uuid::now_v7().to_string();

        if let Some(ttl) = opts.lease_ttl {
            match self.store.acquire_lease(&holder, ttl).await {
                Ok(true) => debug!(%holder, "lease acquired"),
                Ok(false) => {
                    warn!("another run holds the lease, skipping this trigger");
                    return RunResult::nothing_due();
                }
                Err(e) => return RunResult::failure(RunError::StateStore(e)),
            }
        }

        let result = self.run_leased(opts).await;

        if opts.lease_ttl.is_some() {
            if let Err(e) = self.store.release_lease(&holder).await {
                warn!(%holder, error = %e, "failed to release lease, it will expire");
            }
        }

        result
    }

    async fn run_leased(&self, opts: &RunOptions) -> RunResult {
        let stored = match self.store.load().await {
            Ok(state) => state.map(|s| s.last_processed_id),
            Err(e) => return RunResult::failure(RunError::StateStore(e)),
        };

        let bound = opts.force_since.or(stored).unwrap_or(ItemId::ZERO);
        match (opts.force_since, stored) {
            (Some(forced), _) => info!(%forced, stored = ?stored, "forced lower bound for this run"),
            (None, Some(id)) => info!(last_processed_id = %id, "resuming from checkpoint"),
            (None, None) => info!("no checkpoint, processing everything available"),
        }

        let report = match self.processor.process_since(bound).await {
            Ok(report) => report,
            Err(e) => return RunResult::failure(RunError::Processing(e)),
        };

        if report.count == 0 {
            info!(%bound, "nothing due");
            return RunResult::nothing_due();
        }

        // A forced replay may report ids below the stored checkpoint.
        let highest = report.highest_id.unwrap_or(bound);
        let next = stored.map_or(highest, |s| s.max(highest));
        let state = RunState::new(next, Utc::now());

        if let Err(e) = self.store.save(&state).await {
            return RunResult::failure(RunError::StateStore(e));
        }

        info!(
            items = report.count,
            last_processed_id = %next,
            "checkpoint advanced"
        );
        RunResult::success(report.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use paperdisc_shared::{PaperDiscError, Result};
    use paperdisc_storage::FileStateStore;

    use crate::processor::ProcessReport;
    use crate::report::exit_code;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryStore {
        state: Mutex<Option<RunState>>,
        lease: Mutex<Option<String>>,
        fail_load: bool,
        fail_save: bool,
        saves: AtomicUsize,
    }

    impl MemoryStore {
        fn with_checkpoint(id: u64) -> Self {
            let store = Self::default();
            *store.state.lock().unwrap() = Some(RunState::new(ItemId(id), Utc::now()));
            store
        }

        fn current(&self) -> Option<RunState> {
            self.state.lock().unwrap().clone()
        }
    }

    impl StateStore for MemoryStore {
        async fn load(&self) -> Result<Option<RunState>> {
            if self.fail_load {
                return Err(PaperDiscError::Storage("read failed".into()));
            }
            Ok(self.current())
        }

        async fn save(&self, state: &RunState) -> Result<()> {
            if self.fail_save {
                return Err(PaperDiscError::Storage("disk full".into()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.state.lock().unwrap() = Some(state.clone());
            Ok(())
        }

        async fn acquire_lease(&self, holder: &str, _ttl: Duration) -> Result<bool> {
            let mut lease = self.lease.lock().unwrap();
            if lease.is_some() {
                return Ok(false);
            }
            *lease = Some(holder.to_string());
            Ok(true)
        }

        async fn release_lease(&self, holder: &str) -> Result<()> {
            let mut lease = self.lease.lock().unwrap();
            if lease.as_deref() == Some(holder) {
                *lease = None;
            }
            Ok(())
        }
    }

    /// Offers a fixed set of item ids, like a source that only grows.
    #[derive(Default)]
    struct ScriptedProcessor {
        items: Mutex<Vec<u64>>,
        fail: bool,
        invalid: bool,
        calls: AtomicUsize,
        bounds: Mutex<Vec<ItemId>>,
    }

    impl ScriptedProcessor {
        fn with_items(items: &[u64]) -> Self {
            Self {
                items: Mutex::new(items.to_vec()),
                ..Self::default()
            }
        }

        fn push(&self, id: u64) {
            self.items.lock().unwrap().push(id);
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DiscussionProcessor for ScriptedProcessor {
        fn validate(&self) -> Result<()> {
            if self.invalid {
                return Err(PaperDiscError::config("template missing"));
            }
            Ok(())
        }

        async fn process_since(&self, last_id: ItemId) -> Result<ProcessReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bounds.lock().unwrap().push(last_id);
            if self.fail {
                return Err(PaperDiscError::Network("source unreachable".into()));
            }
            let items = self.items.lock().unwrap();
            Ok(ProcessReport::from_ids(
                items.iter().copied().map(ItemId).filter(|id| *id > last_id),
            ))
        }
    }

    fn leased() -> RunOptions {
        RunOptions {
            force_since: None,
            lease_ttl: Some(Duration::from_secs(60)),
        }
    }

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn first_run_processes_everything() {
        let coordinator =
            RunCoordinator::new(MemoryStore::default(), ScriptedProcessor::with_items(&[101, 102, 105]));

        let result = coordinator.run(&RunOptions::default()).await;

        assert!(matches!(result.outcome, RunOutcome::Success));
        assert_eq!(result.items_processed, 3);
        assert_eq!(exit_code(&result), 0);
        let state = coordinator.store().current().unwrap();
        assert_eq!(state.last_processed_id, ItemId(105));
        assert_eq!(*coordinator.processor().bounds.lock().unwrap(), vec![ItemId::ZERO]);
    }

    #[tokio::test]
    async fn repeated_runs_are_noops() {
        let coordinator =
            RunCoordinator::new(MemoryStore::default(), ScriptedProcessor::with_items(&[1, 2]));
        coordinator.run(&RunOptions::default()).await;
        let after_first = coordinator.store().current();

        for _ in 0..2 {
            let result = coordinator.run(&RunOptions::default()).await;
            assert!(matches!(result.outcome, RunOutcome::NoOpNothingDue));
            assert_eq!(exit_code(&result), 0);
        }
        assert_eq!(coordinator.store().current(), after_first);
        assert_eq!(coordinator.store().saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn noop_leaves_state_file_byte_identical() {
        let dir = std::env::temp_dir().join(format!("pd_coord_{}", Uuid::now_v7()));
        let store = FileStateStore::new(&dir.join("checkpoint.json"));
        let coordinator = RunCoordinator::new(store, ScriptedProcessor::with_items(&[7]));

        coordinator.run(&leased()).await;
        let before = std::fs::read(coordinator.store().path()).unwrap();

        let first = coordinator.run(&leased()).await;
        let second = coordinator.run(&leased()).await;
        assert!(matches!(first.outcome, RunOutcome::NoOpNothingDue));
        assert!(matches!(second.outcome, RunOutcome::NoOpNothingDue));
        assert_eq!(std::fs::read(coordinator.store().path()).unwrap(), before);
        assert!(!coordinator.store().lease_path().exists());
    }

    #[tokio::test]
    async fn checkpoint_advances_monotonically() {
        let coordinator =
            RunCoordinator::new(MemoryStore::default(), ScriptedProcessor::with_items(&[3]));
        let mut last = ItemId::ZERO;

        for next in [5, 9, 12] {
            coordinator.processor().push(next);
            coordinator.run(&RunOptions::default()).await;
            let id = coordinator.store().current().unwrap().last_processed_id;
            assert!(id >= last);
            assert_eq!(id, ItemId(next));
            last = id;
        }
    }

    #[tokio::test]
    async fn failed_processing_keeps_checkpoint() {
        let store = MemoryStore::with_checkpoint(50);
        let before = store.current();
        let processor = ScriptedProcessor {
            fail: true,
            ..ScriptedProcessor::with_items(&[51, 52])
        };
        let coordinator = RunCoordinator::new(store, processor);

        let result = coordinator.run(&leased()).await;

        assert!(matches!(
            result.outcome,
            RunOutcome::Failure(RunError::Processing(_))
        ));
        assert_eq!(exit_code(&result), 1);
        assert_eq!(coordinator.store().current(), before);
        assert!(coordinator.store().lease.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_save_is_a_state_store_failure() {
        let store = MemoryStore {
            fail_save: true,
            ..MemoryStore::with_checkpoint(10)
        };
        let before = store.current();
        let coordinator = RunCoordinator::new(store, ScriptedProcessor::with_items(&[11, 12]));

        let result = coordinator.run(&RunOptions::default()).await;

        assert!(matches!(
            result.outcome,
            RunOutcome::Failure(RunError::StateStore(_))
        ));
        assert_eq!(exit_code(&result), 2);
        assert_eq!(coordinator.store().current(), before);
    }

    #[tokio::test]
    async fn unreadable_checkpoint_skips_processing() {
        let store = MemoryStore {
            fail_load: true,
            ..MemoryStore::default()
        };
        let coordinator = RunCoordinator::new(store, ScriptedProcessor::with_items(&[1]));

        let result = coordinator.run(&RunOptions::default()).await;

        assert_eq!(exit_code(&result), 2);
        assert_eq!(coordinator.processor().calls(), 0);
    }

    #[tokio::test]
    async fn held_lease_skips_the_run() {
        let store = MemoryStore::with_checkpoint(1);
        *store.lease.lock().unwrap() = Some("other-run".into());
        let before = store.current();
        let coordinator = RunCoordinator::new(store, ScriptedProcessor::with_items(&[2, 3]));

        let result = coordinator.run(&leased()).await;

        assert!(matches!(result.outcome, RunOutcome::NoOpNothingDue));
        assert_eq!(coordinator.processor().calls(), 0);
        assert_eq!(coordinator.store().current(), before);
        assert_eq!(
            coordinator.store().lease.lock().unwrap().as_deref(),
            Some("other-run")
        );
    }

    #[tokio::test]
    async fn forced_replay_does_not_rewind_checkpoint() {
        let coordinator = RunCoordinator::new(
            MemoryStore::with_checkpoint(105),
            ScriptedProcessor::with_items(&[101, 102, 105]),
        );
        let opts = RunOptions {
            force_since: Some(ItemId(101)),
            lease_ttl: None,
        };

        let result = coordinator.run(&opts).await;

        assert!(matches!(result.outcome, RunOutcome::Success));
        assert_eq!(result.items_processed, 2);
        assert_eq!(coordinator.store().current().unwrap().last_processed_id, ItemId(105));

        // The override is not remembered.
        let result = coordinator.run(&RunOptions::default()).await;
        assert!(matches!(result.outcome, RunOutcome::NoOpNothingDue));
        assert_eq!(
            *coordinator.processor().bounds.lock().unwrap(),
            vec![ItemId(101), ItemId(105)]
        );
    }

    #[tokio::test]
    async fn invalid_configuration_fails_fast() {
        let store = MemoryStore {
            fail_load: true,
            ..MemoryStore::default()
        };
        let processor = ScriptedProcessor {
            invalid: true,
            ..ScriptedProcessor::with_items(&[1])
        };
        let coordinator = RunCoordinator::new(store, processor);

        let result = coordinator.run(&leased()).await;

        assert!(matches!(
            result.outcome,
            RunOutcome::Failure(RunError::Configuration(_))
        ));
        assert_eq!(exit_code(&result), 1);
        assert_eq!(coordinator.processor().calls(), 0);
        assert!(coordinator.store().lease.lock().unwrap().is_none());
    }
}
