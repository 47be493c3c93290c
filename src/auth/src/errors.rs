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

//! Errors returned while fetching or refreshing tokens.

use http::StatusCode;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter, Result};
use std::sync::Arc;

/// Represents an error fetching a token.
///
/// Token sources fail for many reasons: the issuer may be unreachable, it may
/// reject the request, or it may return a malformed response. All of these
/// are reported with this type. The only distinction the credentials make is
/// whether the failure is *transient*, that is, whether a future attempt may
/// succeed. Transient errors are retried, other errors stop the retry loop
/// immediately.
///
/// The type is cheap to clone. The credentials keep a copy of the last
/// background refresh failure, see [Credentials::last_refresh_error].
///
/// # Example
/// ```
/// # use iam_auth::errors::CredentialsError;
/// let err = CredentialsError::from_msg(true, "simulated transient error");
/// assert!(err.is_transient());
/// assert!(format!("{err}").contains("simulated transient error"));
/// ```
///
/// [Credentials::last_refresh_error]: crate::credentials::Credentials::last_refresh_error
#[derive(Clone, Debug)]
pub struct CredentialsError {
    /// If `true`, the operation that resulted in this error might succeed
    /// upon retry.
    is_transient: bool,

    /// A human readable description of the failure, if any.
    message: Option<String>,

    /// The underlying source of the error, if any.
    source: Option<Arc<dyn Error + Send + Sync>>,
}

impl CredentialsError {
    /// Creates a new `CredentialsError` with a message and a source.
    ///
    /// # Arguments
    /// * `is_transient` - whether the error may succeed on a future attempt.
    /// * `message` - describes the operation that failed.
    /// * `source` - the underlying error that caused the failure.
    pub fn new<M, T>(is_transient: bool, message: M, source: T) -> Self
    where
        M: Into<String>,
        T: Error + Send + Sync + 'static,
    {
        CredentialsError {
            is_transient,
            message: Some(message.into()),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `CredentialsError` from a message.
    pub fn from_msg<T: Into<String>>(is_transient: bool, message: T) -> Self {
        CredentialsError {
            is_transient,
            message: Some(message.into()),
            source: None,
        }
    }

    /// Creates a new `CredentialsError` from another error.
    pub fn from_source<T>(is_transient: bool, source: T) -> Self
    where
        T: Error + Send + Sync + 'static,
    {
        CredentialsError {
            is_transient,
            message: None,
            source: Some(Arc::new(source)),
        }
    }

    /// Returns `true` if a future attempt may succeed.
    pub fn is_transient(&self) -> bool {
        self.is_transient
    }

    /// Wraps `self` with additional context, preserving the transient flag.
    pub(crate) fn wrap<M: Into<String>>(self, message: M) -> Self {
        CredentialsError::new(self.is_transient, message, self)
    }
}

impl std::error::Error for CredentialsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|arc| arc.as_ref() as &(dyn std::error::Error + 'static))
    }
}

const TRANSIENT_MSG: &str = "but future attempts may succeed";
const PERMANENT_MSG: &str = "and future attempts will not succeed";

impl Display for CredentialsError {
    /// Formats the error message to include the transient flag and source.
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        let msg = if self.is_transient {
            TRANSIENT_MSG
        } else {
            PERMANENT_MSG
        };
        match (&self.message, &self.source) {
            (Some(m), Some(s)) => write!(f, "{m}, {msg}, source: {s}"),
            (Some(m), None) => write!(f, "{m}, {msg}"),
            (None, Some(s)) => write!(f, "cannot fetch token, {msg}, source: {s}"),
            (None, None) => write!(f, "cannot fetch token, {msg}"),
        }
    }
}

/// Returns `true` if a request that failed with this status may succeed later.
pub(crate) fn is_transient(c: StatusCode) -> bool {
    match c {
        // Internal server errors do not indicate that there is anything wrong
        // with our request, so we retry them.
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => true,
        _ => false,
    }
}

/// Converts a transport error into a `CredentialsError`.
///
/// Failing to send the request is always transient. Failing to decode the
/// body is not.
pub(crate) fn from_http_error(err: reqwest::Error, message: &str) -> CredentialsError {
    let transient = !err.is_decode();
    CredentialsError::new(transient, message, err)
}

/// Converts a non-success HTTP response into a `CredentialsError`.
pub(crate) async fn from_http_response(
    response: reqwest::Response,
    message: &str,
) -> CredentialsError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<cannot read response body: {e}>"));
    CredentialsError::from_msg(
        is_transient(status),
        format!("{message}, status={status}, body=<{body}>"),
    )
}
