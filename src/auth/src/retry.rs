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

//! Retry policies for token fetches.
//!
//! Every fetch performed by the credentials, whether it blocks the caller or
//! runs in the background, goes through a retry loop. The [RetryPolicy]
//! decides whether a failed attempt is retried, and the
//! [BackoffPolicy][crate::backoff::BackoffPolicy] decides how long to wait
//! before the next attempt.

use crate::Result;
use crate::backoff::{BackoffPolicy, ExponentialBackoff};
use crate::constants::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_ATTEMPTS, RETRY_EXHAUSTED_ERROR, TOKEN_FETCH_FAILED_ERROR,
};
use crate::errors::CredentialsError;
use crate::token::{Token, TokenProvider};
use std::sync::Arc;
use std::time::Duration;

/// The result of a retry loop control decision.
///
/// # Example
/// ```
/// # use iam_auth::errors::CredentialsError;
/// # use iam_auth::retry::{RetryPolicy, RetryResult};
/// #[derive(Debug)]
/// struct MyRetryPolicy;
/// impl RetryPolicy for MyRetryPolicy {
///     fn on_error(&self, attempt_count: u32, error: CredentialsError) -> RetryResult {
///         if attempt_count > 42 {
///             return RetryResult::Exhausted(error);
///         }
///         RetryResult::Continue(error)
///     }
/// }
/// ```
#[derive(Debug)]
pub enum RetryResult {
    /// The error is not transient, stop the loop.
    Permanent(CredentialsError),

    /// The error is transient, but the policy is stopping the loop.
    Exhausted(CredentialsError),

    /// The error is transient, continue the loop.
    Continue(CredentialsError),
}

impl RetryResult {
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue(_))
    }
}

/// Determines how errors are handled in the retry loop.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// Query the retry policy after an error.
    ///
    /// # Parameters
    /// * `attempt_count` - the number of attempts, including the one that
    ///   just failed.
    /// * `error` - the last error.
    fn on_error(&self, attempt_count: u32, error: CredentialsError) -> RetryResult;
}

/// Retries transient errors, up to a fixed number of attempts.
///
/// # Example
/// ```
/// # use iam_auth::errors::CredentialsError;
/// # use iam_auth::retry::{LimitedAttempts, RetryPolicy};
/// let policy = LimitedAttempts::new(3);
/// let transient = || CredentialsError::from_msg(true, "try again");
/// assert!(policy.on_error(1, transient()).is_continue());
/// assert!(policy.on_error(3, transient()).is_exhausted());
/// assert!(policy.on_error(1, CredentialsError::from_msg(false, "bad key")).is_permanent());
/// ```
#[derive(Clone, Debug)]
pub struct LimitedAttempts {
    maximum_attempts: u32,
}

impl LimitedAttempts {
    /// Creates a policy allowing up to `maximum_attempts` attempts.
    ///
    /// The first attempt always runs, so `0` and `1` are equivalent.
    pub fn new(maximum_attempts: u32) -> Self {
        Self { maximum_attempts }
    }

    pub fn maximum_attempts(&self) -> u32 {
        self.maximum_attempts
    }
}

impl Default for LimitedAttempts {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy for LimitedAttempts {
    fn on_error(&self, attempt_count: u32, error: CredentialsError) -> RetryResult {
        if !error.is_transient() {
            return RetryResult::Permanent(error);
        }
        if attempt_count >= self.maximum_attempts {
            return RetryResult::Exhausted(error);
        }
        RetryResult::Continue(error)
    }
}

/// Wraps a [TokenProvider] with a retry loop and per-attempt timeouts.
#[derive(Debug)]
pub(crate) struct TokenProviderWithRetry<T: TokenProvider> {
    inner: T,
    retry_policy: Arc<dyn RetryPolicy>,
    backoff_policy: Arc<dyn BackoffPolicy>,
    attempt_timeout: Option<Duration>,
}

#[derive(Debug)]
pub(crate) struct Builder<T: TokenProvider> {
    inner: T,
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    attempt_timeout: Option<Duration>,
}

impl<T: TokenProvider> Builder<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self {
            inner,
            retry_policy: None,
            backoff_policy: None,
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
        }
    }

    pub(crate) fn with_retry_policy(mut self, retry_policy: Option<Arc<dyn RetryPolicy>>) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub(crate) fn with_backoff_policy(
        mut self,
        backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    ) -> Self {
        self.backoff_policy = backoff_policy;
        self
    }

    /// `None` disables the per-attempt timeout.
    pub(crate) fn with_attempt_timeout(mut self, attempt_timeout: Option<Duration>) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub(crate) fn build(self) -> TokenProviderWithRetry<T> {
        let retry_policy = self
            .retry_policy
            .unwrap_or_else(|| Arc::new(LimitedAttempts::default()));
        let backoff_policy = self
            .backoff_policy
            .unwrap_or_else(|| Arc::new(ExponentialBackoff::default()));
        TokenProviderWithRetry {
            inner: self.inner,
            retry_policy,
            backoff_policy,
            attempt_timeout: self.attempt_timeout,
        }
    }
}

#[async_trait::async_trait]
impl<T: TokenProvider> TokenProvider for TokenProviderWithRetry<T> {
    async fn token(&self) -> Result<Token> {
        let mut attempt_count = 0_u32;
        loop {
            attempt_count = attempt_count.saturating_add(1);
            let error = match self.attempt().await {
                Ok(token) => return Ok(token),
                Err(e) => e,
            };
            match self.retry_policy.on_error(attempt_count, error) {
                RetryResult::Permanent(e) => return Err(e.wrap(TOKEN_FETCH_FAILED_ERROR)),
                RetryResult::Exhausted(e) => return Err(e.wrap(RETRY_EXHAUSTED_ERROR)),
                RetryResult::Continue(e) => {
                    let delay = self.backoff_policy.on_failure(attempt_count);
                    tracing::warn!(attempt_count, ?delay, "token fetch failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl<T: TokenProvider> TokenProviderWithRetry<T> {
    async fn attempt(&self) -> Result<Token> {
        let Some(timeout) = self.attempt_timeout else {
            return self.inner.token().await;
        };
        tokio::time::timeout(timeout, self.inner.token())
            .await
            .map_err(|e| {
                CredentialsError::new(true, format!("token fetch timed out after {timeout:?}"), e)
            })?
    }
}
