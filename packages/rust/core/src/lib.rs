//! Run orchestration and the discussion page pipeline.
//!
//! [`coordinator::RunCoordinator`] sequences one scheduled run against a
//! [`paperdisc_storage::StateStore`] and a [`processor::DiscussionProcessor`];
//! [`pipeline::ArxivPageProcessor`] is the processor that renders the paper
//! discussion page; [`report`] maps the outcome to an exit code.

pub mod assembler;
pub mod coordinator;
pub mod discussions;
pub mod pipeline;
pub mod processor;
pub mod render;
pub mod report;

pub use coordinator::{RunCoordinator, RunOptions, RunOutcome, RunResult};
pub use pipeline::{ArxivPageProcessor, ProgressReporter, SilentProgress};
pub use processor::{DiscussionProcessor, ProcessReport};
pub use report::{exit_code, report};
