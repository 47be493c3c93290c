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

//! [Metadata Service] Credentials type.
//!
//! Virtual machines and serverless containers expose a metadata service on a
//! link-local address. The service returns tokens for the service account
//! attached to the instance. No key material is needed.
//!
//! The metadata service address can be overridden with the
//! `IAM_METADATA_HOST` environment variable, which takes precedence over
//! [Builder::with_endpoint].
//!
//! # Example
//! ```no_run
//! # use iam_auth::credentials::metadata::Builder;
//! # async fn sample() -> anyhow::Result<()> {
//! let credentials = Builder::default().build();
//! credentials.initialize().await?;
//! let token = credentials.token().await?;
//! # Ok(()) }
//! ```
//!
//! [Metadata Service]: https://yandex.cloud/en/docs/compute/operations/vm-info/get-info#inside-instance

use crate::Result;
use crate::backoff::BackoffPolicy;
use crate::credentials::Credentials;
use crate::errors::{self, CredentialsError};
use crate::options::CacheOptions;
use crate::refresh::RefreshPolicy;
use crate::retry::RetryPolicy;
use crate::token::{Token, TokenProvider};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) const METADATA_ROOT: &str = "http://169.254.169.254";
pub(crate) const METADATA_HOST_ENV_VAR: &str = "IAM_METADATA_HOST";
pub(crate) const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";
pub(crate) const METADATA_FLAVOR: &str = "metadata-flavor";
pub(crate) const METADATA_FLAVOR_VALUE: &str = "Google";

/// Creates [Credentials] backed by the instance metadata service.
#[derive(Debug, Default)]
pub struct Builder {
    endpoint: Option<String>,
    options: CacheOptions,
}

impl Builder {
    /// Sets the endpoint for this credentials.
    ///
    /// The default is `http://169.254.169.254`. The `IAM_METADATA_HOST`
    /// environment variable, if set, takes precedence over this value.
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Configures when cached tokens are refreshed.
    pub fn with_refresh_policy(mut self, v: RefreshPolicy) -> Self {
        self.options.refresh_policy = Some(v);
        self
    }

    /// Configures which failed fetches are retried.
    pub fn with_retry_policy<V: RetryPolicy + 'static>(mut self, v: V) -> Self {
        self.options.retry_policy = Some(Arc::new(v));
        self
    }

    /// Configures the delay between fetch attempts.
    pub fn with_backoff_policy<V: BackoffPolicy + 'static>(mut self, v: V) -> Self {
        self.options.backoff_policy = Some(Arc::new(v));
        self
    }

    /// Abandons fetch attempts that take longer than `v`.
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
    /// This does not contact the metadata service.
    pub fn build(self) -> Credentials {
        let provider = MetadataTokenProvider::new(self.endpoint);
        self.options.build_credentials(provider)
    }
}

#[derive(Debug, PartialEq, serde::Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct MetadataTokenProvider {
    endpoint: String,
    client: Client,
}

impl MetadataTokenProvider {
    fn new(endpoint_override: Option<String>) -> Self {
        let endpoint = Self::resolve_endpoint(endpoint_override);
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn resolve_endpoint(endpoint_override: Option<String>) -> String {
        if let Ok(host) = std::env::var(METADATA_HOST_ENV_VAR) {
            format!("http://{host}")
        } else if let Some(e) = endpoint_override {
            e
        } else {
            METADATA_ROOT.to_string()
        }
    }
}

#[async_trait::async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn token(&self) -> Result<Token> {
        let error_message = "failed to fetch token from the metadata service";
        let url = format!("{}{}", self.endpoint, TOKEN_PATH);
        let response = self
            .client
            .get(url)
            .header(METADATA_FLAVOR, METADATA_FLAVOR_VALUE)
            .send()
            .await
            .map_err(|e| errors::from_http_error(e, error_message))?;

        if !response.status().is_success() {
            return Err(errors::from_http_response(response, error_message).await);
        }

        let response = response.json::<MetadataTokenResponse>().await.map_err(|e| {
            // Decoding errors are not transient. Typically they indicate a badly
            // configured endpoint, or DNS redirecting the request to a random
            // server.
            CredentialsError::new(!e.is_decode(), error_message, e)
        })?;
        if response.access_token.is_empty() {
            return Err(CredentialsError::from_msg(
                false,
                "the metadata service returned an empty access token",
            ));
        }

        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(response.expires_in))
            .ok_or_else(|| {
                CredentialsError::from_msg(
                    false,
                    format!(
                        "the metadata service returned an invalid expires_in value: {}",
                        response.expires_in
                    ),
                )
            })?;

        Ok(Token {
            token: response.access_token,
            expires_at,
        })
    }
}
