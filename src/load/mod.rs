//! Load generation: plans that feed the event loop, the run context shared
//! with signal handlers, and the final run report.
mod context;
mod plan;
mod report;
mod reporter;
mod runner;


pub use context::{RunContext, generate_run_id};
pub use plan::{
    DEFAULT_CONSTANT_CONCURRENCY, DEFAULT_DURATION, DEFAULT_ITERATION_CONCURRENCY,
    DEFAULT_ITERATIONS, DEFAULT_RAMP_DURATION, DEFAULT_START_CONCURRENCY, LoadPlan, PlanMode,
};
pub use report::{RunReport, RunStatus};
pub use reporter::RunObserver;
pub use runner::{
    DEFAULT_DRAIN_TIMEOUT, DEFAULT_FLUSH_INTERVAL, DEFAULT_STATS_INTERVAL, LoadRunner, RunOptions,
};
