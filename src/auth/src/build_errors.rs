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

//! Errors created during credentials construction.
//!
//! These errors are never retried. They indicate a configuration problem,
//! such as a missing key file, which must be fixed before the credentials
//! can fetch any token.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type for credentials builders.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    /// A problem finding or opening the key file.
    pub fn is_loading(&self) -> bool {
        matches!(self.0, ErrorKind::Loading(_))
    }

    /// A problem parsing the key file contents.
    pub fn is_parsing(&self) -> bool {
        matches!(self.0, ErrorKind::Parsing(_))
    }

    /// A required field was missing or empty.
    pub fn is_missing_field(&self) -> bool {
        matches!(self.0, ErrorKind::MissingField(_))
    }

    /// The private key cannot be decoded, or it cannot produce the required
    /// signatures.
    pub fn is_invalid_key(&self) -> bool {
        matches!(self.0, ErrorKind::InvalidKey(_))
    }

    pub(crate) fn loading<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Loading(source.into()))
    }

    pub(crate) fn parsing<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::Parsing(source.into()))
    }

    pub(crate) fn missing_field(field: &'static str) -> Error {
        Error(ErrorKind::MissingField(field))
    }

    pub(crate) fn invalid_key<T>(source: T) -> Error
    where
        T: Into<BoxError>,
    {
        Error(ErrorKind::InvalidKey(source.into()))
    }
}

#[derive(thiserror::Error, Debug)]
enum ErrorKind {
    #[error("could not find or open the key file: {0}")]
    Loading(#[source] BoxError),
    #[error("cannot parse the key file: {0}")]
    Parsing(#[source] BoxError),
    #[error("missing or empty required field: {0}")]
    MissingField(&'static str),
    #[error("invalid private key: {0}")]
    InvalidKey(#[source] BoxError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn constructors() {
        let error = Error::loading("test message");
        assert!(error.is_loading(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("test message"), "{error}");

        let error = Error::parsing("test message");
        assert!(error.is_parsing(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("test message"), "{error}");

        let error = Error::missing_field("test field");
        assert!(error.is_missing_field(), "{error:?}");
        assert!(error.source().is_none(), "{error:?}");
        assert!(error.to_string().contains("test field"), "{error}");

        let error = Error::invalid_key("test message");
        assert!(error.is_invalid_key(), "{error:?}");
        assert!(!error.is_parsing(), "{error:?}");
        assert!(error.source().is_some(), "{error:?}");
        assert!(error.to_string().contains("test message"), "{error}");
    }
}
