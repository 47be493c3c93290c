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

use crate::Result;
use crate::credentials::CredentialsProvider;
use crate::errors::CredentialsError;
use crate::refresh::RefreshPolicy;
use crate::token::{Token, TokenProvider};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
// Using tokio's wrapper makes the cache testable without relying on clock times.
use tokio::time::Instant;

/// A cached token and the instant at which it should be refreshed.
#[derive(Clone, Debug)]
struct CachedToken {
    token: Token,
    refresh_at: Instant,
}

#[derive(Debug, PartialEq)]
enum TokenState {
    Fresh,
    Expiring,
    Expired,
}

impl CachedToken {
    fn state(&self, now: Instant) -> TokenState {
        if now >= self.token.expires_at {
            TokenState::Expired
        } else if now >= self.refresh_at {
            TokenState::Expiring
        } else {
            TokenState::Fresh
        }
    }
}

/// Caches tokens from `T`, refreshing them before they expire.
///
/// Callers holding a fresh token never wait. Tokens about to expire are
/// refreshed by a background task while callers keep using the cached value.
/// Callers only wait for the token provider when there is no token, or when
/// the cached token has expired.
#[derive(Debug)]
pub(crate) struct TokenCache<T>
where
    T: TokenProvider,
{
    inner: Arc<CacheInner<T>>,
}

// Implemented by hand, `T` does not need to be `Clone`.
impl<T: TokenProvider> Clone for TokenCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[derive(Debug)]
struct CacheInner<T> {
    provider: T,
    refresh_policy: RefreshPolicy,
    // Every fetch, blocking or in the background, runs while holding
    // `refresh`. Readers take a snapshot without waiting on it.
    current: watch::Sender<Option<CachedToken>>,
    refresh: Arc<Mutex<()>>,
    last_error: watch::Sender<Option<CredentialsError>>,
}

impl<T> TokenCache<T>
where
    T: TokenProvider + 'static,
{
    pub(crate) fn new(provider: T, refresh_policy: RefreshPolicy) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                provider,
                refresh_policy,
                current: watch::Sender::new(None),
                refresh: Arc::new(Mutex::new(())),
                last_error: watch::Sender::new(None),
            }),
        }
    }

    pub(crate) async fn token(&self) -> Result<Token> {
        let Some(cached) = self.inner.snapshot() else {
            tracing::debug!("no cached token, waiting for a new token");
            return self.blocking_refresh().await;
        };
        match cached.state(Instant::now()) {
            TokenState::Fresh => Ok(cached.token),
            TokenState::Expiring => {
                self.spawn_refresh_if_idle();
                Ok(cached.token)
            }
            TokenState::Expired => {
                tracing::warn!(
                    "cached token expired before it could be refreshed, waiting for a new token"
                );
                self.blocking_refresh().await
            }
        }
    }

    /// Fetches the first token, unless a usable token is already cached.
    pub(crate) async fn initialize(&self) -> Result<()> {
        self.blocking_refresh().await.map(|_| ())
    }

    pub(crate) fn last_refresh_error(&self) -> Option<CredentialsError> {
        self.inner.last_error.borrow().clone()
    }

    async fn blocking_refresh(&self) -> Result<Token> {
        // Waits for any background refresh in flight.
        let _guard = self.inner.refresh.lock().await;
        // Another caller, or the background refresh, may have replaced the
        // token while we waited.
        if let Some(cached) = self.inner.snapshot() {
            if cached.state(Instant::now()) != TokenState::Expired {
                return Ok(cached.token);
            }
        }
        let token = self.inner.provider.token().await?;
        Ok(self.inner.publish(token))
    }

    fn spawn_refresh_if_idle(&self) {
        // Never wait here. If the lock is busy a refresh is already running,
        // in the background or on the blocking path.
        let Ok(guard) = self.inner.refresh.clone().try_lock_owned() else {
            return;
        };
        // The token may have been replaced since the caller took its snapshot.
        let expiring = self
            .inner
            .snapshot()
            .is_some_and(|c| c.state(Instant::now()) == TokenState::Expiring);
        if !expiring {
            return;
        }

        tracing::debug!("cached token is about to expire, starting background refresh");
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.background_refresh(guard).await });
    }
}

impl<T> CacheInner<T>
where
    T: TokenProvider,
{
    fn snapshot(&self) -> Option<CachedToken> {
        self.current.borrow().clone()
    }

    // Dropping the guard releases the lock, even if the provider panics.
    async fn background_refresh(&self, _guard: OwnedMutexGuard<()>) {
        match self.provider.token().await {
            Ok(token) => {
                self.publish(token);
            }
            Err(e) => {
                tracing::error!("background token refresh failed: {e}");
                self.last_error.send_replace(Some(e));
            }
        }
    }

    /// Caches `token` and returns the token now in the cache.
    ///
    /// Must be called while holding `refresh`.
    fn publish(&self, token: Token) -> Token {
        let now = Instant::now();
        let refresh_at = self.refresh_policy.refresh_at(now, token.expires_at);
        tracing::info!(
            expires_in = ?token.expires_at.saturating_duration_since(now),
            refresh_in = ?refresh_at.saturating_duration_since(now),
            "fetched new token"
        );
        let mut published = token;
        self.current.send_if_modified(|current| match current {
            Some(c) if c.token.expires_at > published.expires_at => {
                tracing::debug!("ignoring new token, the cached token expires later");
                published = c.token.clone();
                false
            }
            _ => {
                *current = Some(CachedToken {
                    token: published.clone(),
                    refresh_at,
                });
                true
            }
        });
        self.last_error.send_replace(None);
        published
    }
}

impl<T> CredentialsProvider for TokenCache<T>
where
    T: TokenProvider + 'static,
{
    async fn token(&self) -> Result<Token> {
        TokenCache::token(self).await
    }

    async fn initialize(&self) -> Result<()> {
        TokenCache::initialize(self).await
    }

    fn last_refresh_error(&self) -> Option<CredentialsError> {
        TokenCache::last_refresh_error(self)
    }
}
