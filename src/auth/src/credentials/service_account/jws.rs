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
use crate::errors::CredentialsError;
use base64::prelude::{BASE64_URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

// The token endpoint rejects assertions with `iat` in the future. All
// machines have some amount of clock skew, create the assertion with a 10
// second margin to avoid most clock skew problems.
pub(crate) const CLOCK_SKEW_FUDGE: Duration = Duration::from_secs(10);
pub(crate) const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

/// The claims in a signed assertion.
#[derive(Serialize)]
pub(crate) struct JwsClaims<'a> {
    pub iss: &'a str,
    pub aud: &'a str,
    #[serde(with = "time::serde::timestamp")]
    pub iat: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub exp: OffsetDateTime,
}

impl JwsClaims<'_> {
    pub(crate) fn encode(&self) -> Result<String> {
        if self.exp < self.iat {
            return Err(CredentialsError::from_msg(
                false,
                format!(
                    "expiration time {:?} must be later than issued time {:?}",
                    self.exp, self.iat
                ),
            ));
        }
        encode_json(self)
    }
}

/// The header that describes who, what, and how an assertion was created.
#[derive(Serialize)]
pub(crate) struct JwsHeader<'a> {
    pub alg: &'a str,
    pub typ: &'a str,
    pub kid: &'a str,
}

impl JwsHeader<'_> {
    pub(crate) fn encode(&self) -> Result<String> {
        encode_json(self)
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value).map_err(|e| CredentialsError::from_source(false, e))?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn decode(encoded: &str) -> anyhow::Result<Value> {
        let bytes = BASE64_URL_SAFE_NO_PAD.decode(encoded)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[test]
    fn claims_encode() -> anyhow::Result<()> {
        let now = OffsetDateTime::now_utc();
        let then = now + ASSERTION_LIFETIME;
        let claims = JwsClaims {
            iss: "test-service-account",
            aud: "https://test.example.com/tokens",
            iat: now,
            exp: then,
        };
        let v = decode(&claims.encode()?)?;
        assert_eq!(v["iss"], "test-service-account");
        assert_eq!(v["aud"], "https://test.example.com/tokens");
        assert_eq!(v["iat"], now.unix_timestamp());
        assert_eq!(v["exp"], then.unix_timestamp());
        assert_eq!(v.as_object().map(|o| o.len()), Some(4), "{v:?}");
        Ok(())
    }

    #[test]
    fn claims_encode_exp_before_iat() {
        let now = OffsetDateTime::now_utc();
        let claims = JwsClaims {
            iss: "test-service-account",
            aud: "test-aud",
            iat: now,
            exp: now - Duration::from_secs(4200),
        };
        let err = claims.encode().unwrap_err();
        assert!(!err.is_transient(), "{err:?}");
        assert!(err.to_string().contains("must be later than issued time"), "{err}");
    }

    #[test]
    fn header_encode() -> anyhow::Result<()> {
        let header = JwsHeader {
            alg: "PS256",
            typ: "JWT",
            kid: "test-key-id",
        };
        let v = decode(&header.encode()?)?;
        assert_eq!(v, serde_json::json!({"alg": "PS256", "typ": "JWT", "kid": "test-key-id"}));
        Ok(())
    }
}
