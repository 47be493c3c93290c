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

//! Decide when a cached token should be refreshed.
//!
//! Tokens are refreshed in the background some time before they expire. If
//! many processes start at the same time and obtain tokens with the same
//! lifetime, refreshing at a fixed offset from the expiration would make them
//! all contact the issuer at the same time. [RefreshPolicy] spreads the
//! refresh times over a window, using a random [Jitter].
//!
//! # Example
//! ```
//! # use iam_auth::refresh::RefreshPolicy;
//! # use std::time::Duration;
//! let policy = RefreshPolicy::new(Duration::from_secs(120), Duration::from_secs(600));
//! let now = tokio::time::Instant::now();
//! let expires_at = now + Duration::from_secs(3600);
//! let refresh_at = policy.refresh_at(now, expires_at);
//! assert!(refresh_at <= expires_at - Duration::from_secs(120));
//! ```

use crate::constants::{DEFAULT_JITTER_WINDOW, DEFAULT_REFRESH_GAP};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A source of random offsets for refresh times.
///
/// Applications rarely need to implement this trait. It exists to make
/// refresh times deterministic in tests.
pub trait Jitter: Send + Sync + std::fmt::Debug {
    /// Returns a duration in the range `[0, window)`, or zero if `window` is
    /// zero.
    fn sample(&self, window: Duration) -> Duration;
}

/// Samples uniformly distributed offsets using the thread-local RNG.
#[derive(Clone, Debug, Default)]
pub struct UniformJitter;

impl Jitter for UniformJitter {
    fn sample(&self, window: Duration) -> Duration {
        if window.is_zero() {
            return Duration::ZERO;
        }
        rand::rng().random_range(Duration::ZERO..window)
    }
}

/// Computes the refresh time for newly fetched tokens.
///
/// A token expiring at `expires_at` is refreshed at
/// `expires_at - gap - jitter`, where `jitter` is sampled from
/// `[0, jitter_window)`. If that instant is already in the past, or the token
/// is already expired, the refresh time is `expires_at`.
#[derive(Clone, Debug)]
pub struct RefreshPolicy {
    gap: Duration,
    jitter_window: Duration,
    jitter: Arc<dyn Jitter>,
}

impl RefreshPolicy {
    /// Creates a policy with the given safety gap and jitter window.
    pub fn new(gap: Duration, jitter_window: Duration) -> Self {
        Self {
            gap,
            jitter_window,
            jitter: Arc::new(UniformJitter),
        }
    }

    /// Replaces the source of randomness.
    pub fn with_jitter<J: Jitter + 'static>(mut self, jitter: J) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    /// The minimum time between the refresh and the expiration.
    pub fn gap(&self) -> Duration {
        self.gap
    }

    /// The size of the window used to spread refresh times.
    pub fn jitter_window(&self) -> Duration {
        self.jitter_window
    }

    /// Returns the instant at which a token expiring at `expires_at` should
    /// be refreshed.
    ///
    /// The result is never after `expires_at`.
    pub fn refresh_at(&self, now: Instant, expires_at: Instant) -> Instant {
        if expires_at <= now {
            return expires_at;
        }
        let jitter = self.jitter.sample(self.jitter_window);
        expires_at
            .checked_sub(self.gap)
            .and_then(|i| i.checked_sub(jitter))
            .filter(|refresh_at| *refresh_at >= now)
            .unwrap_or(expires_at)
    }
}

impl Default for RefreshPolicy {
    /// Refresh between 6 and 1 minutes before expiration.
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_GAP, DEFAULT_JITTER_WINDOW)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use test_case::test_case;

    /// Always returns the same fraction of the window.
    #[derive(Debug)]
    pub(crate) struct FixedJitter(pub f64);

    impl Jitter for FixedJitter {
        fn sample(&self, window: Duration) -> Duration {
            window.mul_f64(self.0)
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test_case(0.0, Duration::from_secs(60))]
    #[test_case(0.5, Duration::from_secs(60 + 150))]
    #[test_case(0.25, Duration::from_secs(60 + 75))]
    fn refresh_at_applies_gap_and_jitter(fraction: f64, want_before: Duration) {
        let policy = RefreshPolicy::default().with_jitter(FixedJitter(fraction));
        let now = Instant::now();
        let expires_at = now + HOUR;
        let got = policy.refresh_at(now, expires_at);
        assert_eq!(got, expires_at - want_before);
    }

    #[test]
    fn refresh_at_bounds() {
        let policy = RefreshPolicy::default();
        let now = Instant::now();
        let expires_at = now + 10 * HOUR;
        for _ in 0..1000 {
            let got = policy.refresh_at(now, expires_at);
            assert!(got > expires_at - policy.gap() - policy.jitter_window(), "{got:?}");
            assert!(got <= expires_at - policy.gap(), "{got:?}");
        }
    }

    #[test]
    fn refresh_at_already_expired() {
        let policy = RefreshPolicy::default().with_jitter(FixedJitter(0.5));
        let now = Instant::now() + HOUR;
        let expires_at = now - Duration::from_secs(5);
        assert_eq!(policy.refresh_at(now, expires_at), expires_at);
        assert_eq!(policy.refresh_at(now, now), now);
    }

    #[test_case(Duration::from_secs(30))]
    #[test_case(Duration::from_secs(61))]
    #[test_case(Duration::from_secs(200))]
    fn refresh_at_short_lived_clamps(lifetime: Duration) {
        let policy = RefreshPolicy::default().with_jitter(FixedJitter(0.5));
        let now = Instant::now();
        let expires_at = now + lifetime;
        assert_eq!(policy.refresh_at(now, expires_at), expires_at);
    }

    #[test]
    fn refresh_at_exactly_now_is_kept() {
        let policy = RefreshPolicy::new(Duration::from_secs(60), Duration::ZERO);
        let now = Instant::now();
        let expires_at = now + Duration::from_secs(60);
        assert_eq!(policy.refresh_at(now, expires_at), now);
    }

    #[test]
    fn uniform_jitter_range() {
        let jitter = UniformJitter;
        let window = Duration::from_secs(300);
        for _ in 0..1000 {
            let got = jitter.sample(window);
            assert!(got < window, "{got:?}");
        }
        assert_eq!(jitter.sample(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn defaults() {
        let policy = RefreshPolicy::default();
        assert_eq!(policy.gap(), DEFAULT_REFRESH_GAP);
        assert_eq!(policy.jitter_window(), DEFAULT_JITTER_WINDOW);
        let fmt = format!("{policy:?}");
        assert!(fmt.contains("UniformJitter"), "{fmt}");
    }
}
