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

use crate::backoff::BackoffPolicy;
use crate::credentials::Credentials;
use crate::refresh::RefreshPolicy;
use crate::retry::{self, RetryPolicy};
use crate::token::TokenProvider;
use crate::token_cache::TokenCache;
use std::sync::Arc;
use std::time::Duration;

/// Tuning options shared by all the credentials builders.
///
/// Unset options use the defaults from [crate::constants].
#[derive(Clone, Debug, Default)]
pub(crate) struct CacheOptions {
    pub(crate) refresh_policy: Option<RefreshPolicy>,
    pub(crate) retry_policy: Option<Arc<dyn RetryPolicy>>,
    pub(crate) backoff_policy: Option<Arc<dyn BackoffPolicy>>,
    // `Some(None)` disables the per-attempt timeout.
    pub(crate) attempt_timeout: Option<Option<Duration>>,
}

impl CacheOptions {
    /// Wraps `provider` with the retry loop and the token cache.
    pub(crate) fn build_credentials<T>(self, provider: T) -> Credentials
    where
        T: TokenProvider + 'static,
    {
        let mut builder = retry::Builder::new(provider)
            .with_retry_policy(self.retry_policy)
            .with_backoff_policy(self.backoff_policy);
        if let Some(timeout) = self.attempt_timeout {
            builder = builder.with_attempt_timeout(timeout);
        }
        let cache = TokenCache::new(builder.build(), self.refresh_policy.unwrap_or_default());
        Credentials::from(cache)
    }
}
