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

use std::time::Duration;

/// Refresh no later than this long before the token expires.
pub(crate) const DEFAULT_REFRESH_GAP: Duration = Duration::from_secs(60);
/// Refresh times are spread uniformly over a window of this size.
pub(crate) const DEFAULT_JITTER_WINDOW: Duration = Duration::from_secs(300);

pub(crate) const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_BACKOFF_SCALING: f64 = 2.0;
pub(crate) const DEFAULT_MAXIMUM_BACKOFF: Duration = Duration::from_secs(60 * 60);
/// Abandon a single fetch attempt after this long.
pub(crate) const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// The token endpoint, also used as the assertion audience.
pub(crate) const IAM_TOKEN_ENDPOINT: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";

pub(crate) const RETRY_EXHAUSTED_ERROR: &str = "cannot fetch token, retry attempts exhausted";
pub(crate) const TOKEN_FETCH_FAILED_ERROR: &str = "cannot fetch token";
