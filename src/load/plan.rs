use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const DEFAULT_DURATION: Duration = Duration::from_secs(60);
pub const DEFAULT_CONSTANT_CONCURRENCY: usize = 100;
pub const DEFAULT_ITERATIONS: u64 = 1000;
pub const DEFAULT_ITERATION_CONCURRENCY: usize = 10;
pub const DEFAULT_RAMP_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_START_CONCURRENCY: usize = 1;

/// Dispatcher tick between submission batches.
pub(crate) const SUBMIT_TICK: Duration = Duration::from_millis(10);
/// Pause while the engine queue is above the backpressure threshold.
pub(crate) const BACKPRESSURE_PAUSE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PlanMode {
    Constant,
    Iterations,
    RampUp,
}

impl PlanMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Constant => "constant",
            Self::Iterations => "iterations",
            Self::RampUp => "ramp-up",
        }
    }
}

/// How a run feeds requests into the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadPlan {
    /// Runs for `duration`. A positive `target_rps` paces submissions with a
    /// single dispatcher limiter; otherwise `concurrency` requests go out per
    /// tick.
    Constant {
        duration: Duration,
        target_rps: f64,
        concurrency: usize,
    },
    /// Submits exactly `iterations` requests in batches of `concurrency`.
    Iterations {
        iterations: u64,
        concurrency: usize,
        target_rps: f64,
    },
    /// Grows the per-tick batch linearly from `start_concurrency` to
    /// `target_concurrency` over `ramp_duration`, then holds it.
    RampUp {
        duration: Duration,
        ramp_duration: Duration,
        start_concurrency: usize,
        target_concurrency: usize,
    },
}

impl LoadPlan {
    #[must_use]
    pub const fn mode(&self) -> PlanMode {
        match self {
            Self::Constant { .. } => PlanMode::Constant,
            Self::Iterations { .. } => PlanMode::Iterations,
            Self::RampUp { .. } => PlanMode::RampUp,
        }
    }

    /// Requests the plan is expected to send; zero when open-ended.
    #[must_use]
    pub fn expected_requests(&self) -> u64 {
        match self {
            Self::Constant {
                duration,
                target_rps,
                ..
            } if *target_rps > 0.0 => as_count(duration.as_secs_f64() * target_rps),
            Self::Constant { .. } | Self::RampUp { .. } => 0,
            Self::Iterations { iterations, .. } => *iterations,
        }
    }

    /// Engine queue depth above which the dispatcher pauses.
    #[must_use]
    pub fn max_pending(&self) -> usize {
        match self {
            Self::Constant {
                target_rps,
                concurrency,
                ..
            } => {
                if *target_rps > 0.0 {
                    as_size(target_rps * 10.0).max(1000)
                } else {
                    concurrency.saturating_mul(5).max(1000)
                }
            }
            Self::Iterations { concurrency, .. } => concurrency.saturating_mul(5).max(100),
            Self::RampUp {
                target_concurrency, ..
            } => target_concurrency.saturating_mul(5).max(1000),
        }
    }

    /// Dispatcher-level rate; zero means unpaced.
    #[must_use]
    pub const fn target_rps(&self) -> f64 {
        match self {
            Self::Constant { target_rps, .. } | Self::Iterations { target_rps, .. } => *target_rps,
            Self::RampUp { .. } => 0.0,
        }
    }

    /// Batch size for a ramp-up tick `elapsed` into the run.
    #[must_use]
    pub fn ramp_concurrency(
        elapsed: Duration,
        ramp_duration: Duration,
        start_concurrency: usize,
        target_concurrency: usize,
    ) -> usize {
        if elapsed >= ramp_duration || ramp_duration.is_zero() {
            return target_concurrency;
        }
        let progress = elapsed.as_secs_f64() / ramp_duration.as_secs_f64();
        let start = start_concurrency as f64;
        let span = target_concurrency as f64 - start;
        as_size(span.mul_add(progress, start))
    }

    /// Checks the plan can make progress.
    ///
    /// # Errors
    ///
    /// Returns an error when a batch size is zero or a rate is negative or
    /// not finite.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mode = self.mode().as_str();
        match self {
            Self::Constant {
                target_rps,
                concurrency,
                ..
            } => {
                check_rate(*target_rps)?;
                if *target_rps <= 0.0 && *concurrency == 0 {
                    return Err(ValidationError::PlanMissingField {
                        mode,
                        field: "a positive concurrency or rate",
                    });
                }
            }
            Self::Iterations {
                concurrency,
                target_rps,
                ..
            } => {
                check_rate(*target_rps)?;
                if *concurrency == 0 {
                    return Err(ValidationError::PlanMissingField {
                        mode,
                        field: "a positive concurrency",
                    });
                }
            }
            Self::RampUp {
                target_concurrency,
                ..
            } => {
                if *target_concurrency == 0 {
                    return Err(ValidationError::PlanMissingField {
                        mode,
                        field: "a positive target concurrency",
                    });
                }
            }
        }
        Ok(())
    }
}

fn check_rate(rate: f64) -> Result<(), ValidationError> {
    if rate.is_finite() && rate >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidRate {
            value: rate.to_string(),
        })
    }
}

fn as_size(value: f64) -> usize {
    if value.is_finite() && value > 0.0 {
        value.floor() as usize
    } else {
        0
    }
}

fn as_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.floor() as u64
    } else {
        0
    }
}
