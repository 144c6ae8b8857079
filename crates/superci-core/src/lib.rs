//! SuperCI Core Library
//!
//! The trigger-to-report pipeline: decide whether a pull request's latest
//! commit should be built, materialize a workspace, compile declared steps
//! into batch scripts, run them fail-fast through a scheduler, report commit
//! status and record the run.

pub mod checkout;
pub mod compiler;
pub mod config;
pub mod error;
pub mod fakes;
pub mod hosting;
pub mod obs;
pub mod pipeline;
pub mod reporter;
pub mod runner;
pub mod scanner;
pub mod scheduler;
pub mod step;
pub mod telemetry;
pub mod workspace;

pub use checkout::{CheckoutRequest, GitCheckout, SourceCheckout};
pub use compiler::{CompiledStep, StepCompiler};
pub use config::{
    CiConfig, Config, EmptyStepsPolicy, SchedulerKind, WorkspacePolicy, DEFAULT_TRIGGER,
};
pub use error::{
    CheckoutError, ConfigError, ConfigurationError, PipelineError, ScanError, SchedulerError,
    WorkspaceError,
};
pub use hosting::{Comment, Commit, CommitState, HostingError, HostingService, PullRequest, StatusUpdate};
pub use pipeline::BuildPipeline;
pub use reporter::StatusReporter;
pub use runner::{BuildOutcome, Scheduler, StepResult, StepRunner};
pub use scanner::{find_trigger, PollSummary, TriggerScanner, TriggerState};
pub use scheduler::{LocalScheduler, SlurmScheduler};
pub use step::{BuildStepSpec, StepSource};
pub use telemetry::init_tracing;
pub use workspace::{build_id, WorkspaceManager};

pub use superci_state::{LedgerLookup, RepoId, RunLedger, RunLogEntry};

/// SuperCI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
