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

//! IAM Authentication Components
//!
//! This crate obtains short-lived IAM tokens and keeps them fresh. Clients
//! consume a [credentials::Credentials] and call
//! [token()][credentials::Credentials::token] before each request. The
//! credentials cache the token, renew it in the background shortly before it
//! expires, and only block callers when no usable token is cached.
//!
//! Two token sources are included:
//! * [credentials::metadata] queries the instance metadata service.
//! * [credentials::service_account] exchanges an assertion signed with a
//!   service account key.
//!
//! Any other source can be cached by implementing [token::TokenProvider] and
//! wrapping it with [credentials::Builder].

pub mod errors;

pub mod build_errors;

pub mod credentials;

pub mod token;

pub mod refresh;

pub mod backoff;

pub mod retry;

pub(crate) mod constants;

pub(crate) mod options;

/// The token cache
pub(crate) mod token_cache;

/// A `Result` alias where the `Err` case is
/// `iam_auth::errors::CredentialsError`.
pub(crate) type Result<T> = std::result::Result<T, crate::errors::CredentialsError>;
