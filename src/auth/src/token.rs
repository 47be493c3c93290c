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

//! Types and functions to work with IAM tokens.

use crate::Result;
use time::OffsetDateTime;
use tokio::time::Instant;

/// Represents an IAM token.
#[derive(Clone, PartialEq)]
pub struct Token {
    /// The actual token string.
    ///
    /// This is an opaque bearer credential, typically sent in the
    /// `Authorization:` header.
    pub token: String,

    /// The instant at which the token expires, as reported by the issuer.
    ///
    /// Note that the `Instant` is not valid across processes. If you need to
    /// copy an expiration across processes, convert it to a
    /// `time::OffsetDateTime` first:
    ///
    /// ```
    /// # let expires_at = std::time::Instant::now();
    /// time::OffsetDateTime::now_utc() + (expires_at - std::time::Instant::now());
    /// ```
    pub expires_at: Instant,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token", &"[censored]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A source of tokens, performing one round-trip to a token issuer per call.
///
/// The credentials never call `token()` concurrently for the same cache, but
/// implementations must still be `Send + Sync` as the refresh may run on any
/// runtime worker.
///
/// Implementations report failures as [CredentialsError], marking them as
/// transient if a later attempt may succeed. The credentials retry transient
/// errors with backoff.
///
/// # Example
/// ```
/// # use iam_auth::token::{Token, TokenProvider};
/// # use iam_auth::errors::CredentialsError;
/// # use std::time::Duration;
/// #[derive(Debug)]
/// struct Static;
///
/// #[async_trait::async_trait]
/// impl TokenProvider for Static {
///     async fn token(&self) -> Result<Token, CredentialsError> {
///         Ok(Token {
///             token: "static-token".into(),
///             expires_at: tokio::time::Instant::now() + Duration::from_secs(3600),
///         })
///     }
/// }
/// ```
///
/// [CredentialsError]: crate::errors::CredentialsError
#[async_trait::async_trait]
pub trait TokenProvider: std::fmt::Debug + Send + Sync {
    async fn token(&self) -> Result<Token>;
}

/// Converts a wall-clock expiration into a monotonic `Instant`.
///
/// Expirations in the past map to instants in the past, saturating at `now`
/// if the monotonic clock cannot represent them.
pub(crate) fn instant_from_wall_clock(expires_at: OffsetDateTime) -> Instant {
    let now = Instant::now();
    let delta = expires_at - OffsetDateTime::now_utc();
    if delta.is_negative() {
        now.checked_sub(delta.unsigned_abs()).unwrap_or(now)
    } else {
        now + delta.unsigned_abs()
    }
}
