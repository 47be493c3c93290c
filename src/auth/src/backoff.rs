// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Backoff policies for token fetch retries.
//!
//! Retrying a failed fetch immediately is rarely useful, the issuer may need
//! time to recover. [ExponentialBackoff] doubles (by default) the delay after
//! each failed attempt.
//!
//! Refresh times are already jittered by the [RefreshPolicy], so the delays
//! computed here are deterministic.
//!
//! # Example
//! ```
//! # use iam_auth::backoff::{BackoffPolicy, Error, ExponentialBackoffBuilder};
//! use std::time::Duration;
//!
//! let policy = ExponentialBackoffBuilder::new()
//!     .with_initial_delay(Duration::from_millis(100))
//!     .with_maximum_delay(Duration::from_secs(5))
//!     .with_scaling(4.0)
//!     .build()?;
//! assert_eq!(policy.on_failure(2), Duration::from_millis(400));
//! # Ok::<(), Error>(())
//! ```
//!
//! [RefreshPolicy]: crate::refresh::RefreshPolicy

use crate::constants::{DEFAULT_BACKOFF_SCALING, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAXIMUM_BACKOFF};
use std::time::Duration;

/// Defines the trait implemented by all backoff strategies.
pub trait BackoffPolicy: Send + Sync + std::fmt::Debug {
    /// Returns the delay before the next attempt.
    ///
    /// # Parameters
    /// * `attempt_count` - the number of attempts so far. This method is
    ///   always called after the first attempt.
    fn on_failure(&self, attempt_count: u32) -> Duration;
}

/// The error type for exponential backoff creation.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("the scaling value ({0}) should be >= 1.0")]
    InvalidScalingFactor(f64),
    #[error("the initial delay ({0:?}) should be greater than zero")]
    InvalidInitialDelay(Duration),
    #[error(
        "the maximum delay ({maximum:?}) should be greater than or equal to the initial delay ({initial:?})"
    )]
    EmptyRange {
        maximum: Duration,
        initial: Duration,
    },
}

/// Builds [ExponentialBackoff] policies.
#[derive(Clone, Debug)]
pub struct ExponentialBackoffBuilder {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
}

impl ExponentialBackoffBuilder {
    /// Creates a builder with the default parameters.
    ///
    /// The defaults start with a one second delay, doubling on each attempt,
    /// up to one hour.
    pub fn new() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_BACKOFF,
            maximum_delay: DEFAULT_MAXIMUM_BACKOFF,
            scaling: DEFAULT_BACKOFF_SCALING,
        }
    }

    /// Change the initial delay.
    pub fn with_initial_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.initial_delay = v.into();
        self
    }

    /// Change the maximum delay.
    pub fn with_maximum_delay<V: Into<Duration>>(mut self, v: V) -> Self {
        self.maximum_delay = v.into();
        self
    }

    /// Change the scaling factor.
    pub fn with_scaling<V: Into<f64>>(mut self, v: V) -> Self {
        self.scaling = v.into();
        self
    }

    /// Creates a new exponential backoff policy.
    pub fn build(self) -> Result<ExponentialBackoff, Error> {
        if self.scaling.is_nan() || self.scaling < 1.0 {
            return Err(Error::InvalidScalingFactor(self.scaling));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::InvalidInitialDelay(self.initial_delay));
        }
        if self.maximum_delay < self.initial_delay {
            return Err(Error::EmptyRange {
                maximum: self.maximum_delay,
                initial: self.initial_delay,
            });
        }
        Ok(ExponentialBackoff {
            initial_delay: self.initial_delay,
            maximum_delay: self.maximum_delay,
            scaling: self.scaling,
        })
    }
}

impl Default for ExponentialBackoffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements truncated exponential backoff, without jitter.
///
/// The delay after the `n`-th attempt is `initial_delay * scaling^(n-1)`,
/// truncated at `maximum_delay`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    maximum_delay: Duration,
    scaling: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_BACKOFF,
            maximum_delay: DEFAULT_MAXIMUM_BACKOFF,
            scaling: DEFAULT_BACKOFF_SCALING,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn on_failure(&self, attempt_count: u32) -> Duration {
        let exp = attempt_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaling = self.scaling.powi(exp);
        if scaling >= self.maximum_delay.div_duration_f64(self.initial_delay) {
            self.maximum_delay
        } else {
            // Cannot panic: scaling >= 1.0 and initial_delay * scaling < maximum_delay.
            self.initial_delay.mul_f64(scaling)
        }
    }
}
