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

//! Types and functions to work with self-renewing credentials.
//!
//! [Credentials] cache the token returned by a [TokenProvider] and refresh it
//! before it expires. Applications call [Credentials::token] before each
//! request. The call returns immediately while the cached token is valid. When
//! the token is about to expire, the credentials start a refresh in the
//! background and keep returning the cached token. Callers only wait on the
//! token issuer when there is no cached token, or when the cached token
//! expired before a background refresh could replace it.
//!
//! Use [metadata::Builder] to fetch tokens from the instance metadata
//! service, [service_account::Builder] to exchange signed assertions for
//! tokens, or [Builder] to cache tokens from any other [TokenProvider].

pub mod metadata;
pub mod service_account;

use crate::Result;
use crate::backoff::BackoffPolicy;
use crate::errors::CredentialsError;
use crate::options::CacheOptions;
use crate::refresh::RefreshPolicy;
use crate::retry::RetryPolicy;
use crate::token::{Token, TokenProvider};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// An implementation of [crate::credentials::CredentialsProvider].
///
/// Represents a self-renewing [Token] cache. Cloning `Credentials` is cheap,
/// all the clones share the same cached token.
///
/// # Example
/// ```no_run
/// # use iam_auth::credentials::metadata::Builder;
/// # async fn sample() -> anyhow::Result<()> {
/// let credentials = Builder::default().build();
/// let token = credentials.token().await?;
/// println!("token expires at {:?}", token.expires_at);
/// # Ok(()) }
/// ```
#[derive(Clone, Debug)]
pub struct Credentials {
    // We use an `Arc` to hold the inner implementation.
    //
    // Credentials may be shared across threads (`Send + Sync`), so an `Rc`
    // will not do.
    //
    // They also need to derive `Clone`, as the `metadata::Builder` and
    // `service_account::Builder` return the same type.
    pub(crate) inner: Arc<dyn dynamic::CredentialsProvider>,
}

impl<T> From<T> for Credentials
where
    T: CredentialsProvider + Send + Sync + 'static,
{
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl Credentials {
    /// Returns the current token.
    ///
    /// Returns the cached token if it is still valid, starting a background
    /// refresh if it is about to expire. Only waits for the token issuer if
    /// there is no cached token, or the cached token has expired.
    pub async fn token(&self) -> Result<Token> {
        self.inner.token().await
    }

    /// Fetches the first token ahead of time.
    ///
    /// Applications may call this during startup so the first call to
    /// [token()][Self::token] does not wait. It is a no-op if the credentials
    /// already hold a usable token.
    pub async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    /// Returns the error from the last background refresh, if it failed.
    ///
    /// Background refresh failures are never returned by
    /// [token()][Self::token], the caller keeps getting the cached token. This
    /// function reports them. It returns `None` after a successful refresh.
    pub fn last_refresh_error(&self) -> Option<CredentialsError> {
        self.inner.last_refresh_error()
    }
}

/// Represents a [Credentials] implementation.
///
/// Applications rarely need to implement this trait. The exception is tests,
/// where a mock implementation may replace the self-renewing cache.
pub trait CredentialsProvider: std::fmt::Debug {
    /// Returns the current token, see [Credentials::token].
    fn token(&self) -> impl Future<Output = Result<Token>> + Send;

    /// Fetches the first token, see [Credentials::initialize].
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;

    /// See [Credentials::last_refresh_error].
    fn last_refresh_error(&self) -> Option<CredentialsError>;
}

pub(crate) mod dynamic {
    use super::CredentialsError;
    use crate::Result;
    use crate::token::Token;

    /// A dyn-compatible, crate-private version of `CredentialsProvider`.
    #[async_trait::async_trait]
    pub trait CredentialsProvider: Send + Sync + std::fmt::Debug {
        async fn token(&self) -> Result<Token>;

        async fn initialize(&self) -> Result<()>;

        fn last_refresh_error(&self) -> Option<CredentialsError>;
    }

    /// The public `CredentialsProvider` implements the dyn-compatible `CredentialsProvider`.
    #[async_trait::async_trait]
    impl<T> CredentialsProvider for T
    where
        T: super::CredentialsProvider + Send + Sync,
    {
        async fn token(&self) -> Result<Token> {
            <T as super::CredentialsProvider>::token(self).await
        }

        async fn initialize(&self) -> Result<()> {
            <T as super::CredentialsProvider>::initialize(self).await
        }

        fn last_refresh_error(&self) -> Option<CredentialsError> {
            <T as super::CredentialsProvider>::last_refresh_error(self)
        }
    }
}

/// Creates self-renewing [Credentials] for any [TokenProvider].
///
/// # Example
/// ```
/// # use iam_auth::credentials::Builder;
/// # use iam_auth::errors::CredentialsError;
/// # use iam_auth::token::{Token, TokenProvider};
/// # use std::time::Duration;
/// #[derive(Debug)]
/// struct MyIssuer;
///
/// #[async_trait::async_trait]
/// impl TokenProvider for MyIssuer {
///     async fn token(&self) -> Result<Token, CredentialsError> {
///         Ok(Token {
///             token: "my-token".into(),
///             expires_at: tokio::time::Instant::now() + Duration::from_secs(3600),
///         })
///     }
/// }
///
/// let credentials = Builder::new(MyIssuer)
///     .with_attempt_timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug)]
pub struct Builder<T> {
    provider: T,
    options: CacheOptions,
}

impl<T> Builder<T>
where
    T: TokenProvider + 'static,
{
    /// Creates a builder caching the tokens returned by `provider`.
    pub fn new(provider: T) -> Self {
        Self {
            provider,
            options: CacheOptions::default(),
        }
    }

    /// Configures when cached tokens are refreshed.
    ///
    /// The default refreshes each token between 6 and 1 minutes before it
    /// expires.
    pub fn with_refresh_policy(mut self, v: RefreshPolicy) -> Self {
        self.options.refresh_policy = Some(v);
        self
    }

    /// Configures which failed fetches are retried.
    ///
    /// The default makes up to 5 attempts, and stops early on errors that are
    /// not transient.
    pub fn with_retry_policy<V: RetryPolicy + 'static>(mut self, v: V) -> Self {
        self.options.retry_policy = Some(Arc::new(v));
        self
    }

    /// Configures the delay between fetch attempts.
    ///
    /// The default waits 1, 2, 4, and 8 seconds.
    pub fn with_backoff_policy<V: BackoffPolicy + 'static>(mut self, v: V) -> Self {
        self.options.backoff_policy = Some(Arc::new(v));
        self
    }

    /// Abandons fetch attempts that take longer than `v`.
    ///
    /// Abandoned attempts are retried as any other transient error. The
    /// default is 30 seconds.
    pub fn with_attempt_timeout(mut self, v: Duration) -> Self {
        self.options.attempt_timeout = Some(Some(v));
        self
    }

    /// Never abandon fetch attempts.
    pub fn without_attempt_timeout(mut self) -> Self {
        self.options.attempt_timeout = Some(None);
        self
    }

    /// Returns a [Credentials] instance with the configured settings.
    ///
    /// No token is fetched until the first call to [Credentials::token] or
    /// [Credentials::initialize].
    pub fn build(self) -> Credentials {
        self.options.build_credentials(self.provider)
    }
}
