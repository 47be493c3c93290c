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

//! [Service Account] Credentials type.
//!
//! A service account is an identity for workloads rather than people. Each
//! service account can have one or more authorized keys. The application
//! signs a short-lived assertion with the private key, and exchanges that
//! assertion for an IAM token.
//!
//! Service account keys are sensitive. Anybody holding the key can act as the
//! service account. Prefer [metadata][crate::credentials::metadata]
//! credentials when the workload runs on a virtual machine or container with
//! an attached service account.
//!
//! # Example
//! ```no_run
//! # use iam_auth::credentials::service_account::Builder;
//! # async fn sample() -> anyhow::Result<()> {
//! let credentials = Builder::from_file("/path/to/authorized_key.json").build()?;
//! let token = credentials.token().await?;
//! # Ok(()) }
//! ```
//!
//! [Service Account]: https://yandex.cloud/en/docs/iam/concepts/users/service-accounts

mod jws;

use crate::Result;
use crate::backoff::BackoffPolicy;
use crate::build_errors::Error as BuildError;
use crate::constants::IAM_TOKEN_ENDPOINT;
use crate::credentials::Credentials;
use crate::errors::{self, CredentialsError};
use crate::options::CacheOptions;
use crate::refresh::RefreshPolicy;
use crate::retry::RetryPolicy;
use crate::token::{Token, TokenProvider, instant_from_wall_clock};
use base64::prelude::{BASE64_URL_SAFE_NO_PAD, Engine as _};
use jws::{ASSERTION_LIFETIME, CLOCK_SKEW_FUDGE, JwsClaims, JwsHeader};
use reqwest::Client;
use rustls::SignatureScheme;
use rustls::crypto::{CryptoProvider, KeyProvider};
use rustls::sign::Signer;
use rustls_pki_types::PrivateKeyDer;
use rustls_pki_types::pem::PemObject;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

const SIGNING_ALGORITHM: &str = "PS256";

/// An authorized key for a service account.
///
/// This is the JSON document downloaded when creating a key. Fields not
/// listed here, such as the public key, are ignored.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServiceAccountKey {
    /// The key identifier, sent as the `kid` header of the assertion.
    pub id: String,
    /// The service account that owns the key.
    pub service_account_id: String,
    /// The PEM-encoded RSA private key, in PKCS#1 or PKCS#8 format.
    pub private_key: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("id", &self.id)
            .field("service_account_id", &self.service_account_id)
            .field("private_key", &"[censored]")
            .finish()
    }
}

impl ServiceAccountKey {
    fn validate(&self) -> std::result::Result<(), BuildError> {
        if self.id.is_empty() {
            return Err(BuildError::missing_field("id"));
        }
        if self.service_account_id.is_empty() {
            return Err(BuildError::missing_field("service_account_id"));
        }
        if self.private_key.is_empty() {
            return Err(BuildError::missing_field("private_key"));
        }
        Ok(())
    }
}

#[derive(Debug)]
enum KeySource {
    Key(ServiceAccountKey),
    File(PathBuf),
}

/// Creates [Credentials] from a service account key.
///
/// The key is validated, and the private key is loaded, in
/// [build()][Builder::build]. Configuration problems are reported there,
/// before any network activity.
#[derive(Debug)]
pub struct Builder {
    source: KeySource,
    endpoint: Option<String>,
    audience: Option<String>,
    options: CacheOptions,
}

impl Builder {
    /// Creates a builder from an in-memory key.
    pub fn new(key: ServiceAccountKey) -> Self {
        Self::with_source(KeySource::Key(key))
    }

    /// Creates a builder that loads the key from `path`.
    ///
    /// The file is read when [build()][Builder::build] is called.
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_source(KeySource::File(path.into()))
    }

    fn with_source(source: KeySource) -> Self {
        Self {
            source,
            endpoint: None,
            audience: None,
            options: CacheOptions::default(),
        }
    }

    /// Sets the endpoint used to exchange assertions for tokens.
    ///
    /// The default is `https://iam.api.cloud.yandex.net/iam/v1/tokens`.
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the `aud` claim of the assertions.
    ///
    /// The default is the IAM token endpoint, even if
    /// [with_endpoint()][Builder::with_endpoint] changes where requests go.
    pub fn with_audience<S: Into<String>>(mut self, audience: S) -> Self {
        self.audience = Some(audience.into());
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
    /// # Errors
    ///
    /// Returns a [BuildError] if the key file cannot be read or parsed, if any
    /// of the key fields is missing, or if the private key cannot produce
    /// RSA-PSS/SHA-256 signatures.
    pub fn build(self) -> std::result::Result<Credentials, BuildError> {
        let key = match self.source {
            KeySource::Key(key) => key,
            KeySource::File(path) => load_key_file(&path)?,
        };
        key.validate()?;
        let signer = signer(&key.private_key)?;
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| IAM_TOKEN_ENDPOINT.to_string());
        let audience = self
            .audience
            .unwrap_or_else(|| IAM_TOKEN_ENDPOINT.to_string());
        tracing::debug!(
            key_id = %key.id,
            service_account_id = %key.service_account_id,
            "loaded service account key"
        );
        let provider = ServiceAccountTokenProvider {
            key_id: key.id,
            service_account_id: key.service_account_id,
            signer,
            endpoint,
            audience,
            client: Client::new(),
        };
        Ok(self.options.build_credentials(provider))
    }
}

fn load_key_file(path: &std::path::Path) -> std::result::Result<ServiceAccountKey, BuildError> {
    let contents = std::fs::read_to_string(path).map_err(BuildError::loading)?;
    serde_json::from_str(&contents).map_err(BuildError::parsing)
}

fn key_provider() -> Option<&'static dyn KeyProvider> {
    CryptoProvider::get_default()
        .map(|p| p.key_provider)
        .or_else(default_key_provider)
}

#[cfg(feature = "default-rustls-provider")]
fn default_key_provider() -> Option<&'static dyn KeyProvider> {
    Some(rustls::crypto::aws_lc_rs::default_provider().key_provider)
}

#[cfg(not(feature = "default-rustls-provider"))]
fn default_key_provider() -> Option<&'static dyn KeyProvider> {
    None
}

// Loads the PEM private key and selects an RSA-PSS/SHA-256 signer for it.
fn signer(private_key: &str) -> std::result::Result<Box<dyn Signer>, BuildError> {
    let key_provider = key_provider().ok_or_else(|| {
        BuildError::invalid_key(
            "no rustls crypto provider is installed, and the default provider is disabled",
        )
    })?;
    let der =
        PrivateKeyDer::from_pem_slice(private_key.as_bytes()).map_err(BuildError::invalid_key)?;
    let key = key_provider
        .load_private_key(der)
        .map_err(BuildError::invalid_key)?;
    key.choose_scheme(&[SignatureScheme::RSA_PSS_SHA256])
        .ok_or_else(|| {
            BuildError::invalid_key("the private key cannot create RSA_PSS_SHA256 signatures")
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IamTokenResponse {
    iam_token: String,
    #[serde(with = "time::serde::rfc3339")]
    expires_at: OffsetDateTime,
}

#[derive(Debug)]
struct ServiceAccountTokenProvider {
    key_id: String,
    service_account_id: String,
    signer: Box<dyn Signer>,
    endpoint: String,
    audience: String,
    client: Client,
}

impl ServiceAccountTokenProvider {
    fn assertion(&self) -> Result<String> {
        let iat = OffsetDateTime::now_utc() - CLOCK_SKEW_FUDGE;
        let claims = JwsClaims {
            iss: &self.service_account_id,
            aud: &self.audience,
            iat,
            exp: iat + ASSERTION_LIFETIME,
        };
        let header = JwsHeader {
            alg: SIGNING_ALGORITHM,
            typ: "JWT",
            kid: &self.key_id,
        };
        let encoded = format!("{}.{}", header.encode()?, claims.encode()?);
        let signature = self
            .signer
            .sign(encoded.as_bytes())
            .map_err(|e| CredentialsError::new(false, "cannot sign the assertion", e))?;
        Ok(format!("{encoded}.{}", BASE64_URL_SAFE_NO_PAD.encode(signature)))
    }
}

#[async_trait::async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn token(&self) -> Result<Token> {
        let error_message = "failed to exchange the service account assertion";
        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "jwt": assertion }))
            .send()
            .await
            .map_err(|e| errors::from_http_error(e, error_message))?;

        if !response.status().is_success() {
            return Err(errors::from_http_response(response, error_message).await);
        }

        let response = response
            .json::<IamTokenResponse>()
            .await
            .map_err(|e| CredentialsError::new(!e.is_decode(), error_message, e))?;
        if response.iam_token.is_empty() {
            return Err(CredentialsError::from_msg(
                false,
                "the token endpoint returned an empty IAM token",
            ));
        }

        Ok(Token {
            token: response.iam_token,
            expires_at: instant_from_wall_clock(response.expires_at),
        })
    }
}
