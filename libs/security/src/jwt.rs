use std::collections::BTreeMap;
use std::env;

use anyhow::{Context, Result, anyhow};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use relay_core::{BotError, BotResult, ClaimsIdentity};
use serde_json::Value;

/// Turns a bearer token into verified caller claims.
pub trait ClaimsVerifier: Send + Sync {
    fn verify(&self, token: &str) -> BotResult<ClaimsIdentity>;
}

/// Verifies signed JWTs with a configured key and exposes their claims.
#[derive(Debug, Clone)]
pub struct JwtClaimsVerifier {
    alg: Algorithm,
    key: Vec<u8>,
    audience: Option<String>,
}

impl JwtClaimsVerifier {
    pub fn hs256(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            alg: Algorithm::HS256,
            key: secret.into(),
            audience: None,
        }
    }

    /// Requires the token's `aud` to equal `audience` (normally this bot's app id).
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// `JWT_ALG` (HS256, RS256 or ES256), with `JWT_SECRET` or `JWT_PUBLIC_KEY`, and an
    /// optional `JWT_AUDIENCE`.
    pub fn from_env() -> Result<Self> {
        let alg = env::var("JWT_ALG")
            .unwrap_or_else(|_| "HS256".to_string())
            .to_uppercase();
        let (alg, key) = match alg.as_str() {
            "HS256" => (
                Algorithm::HS256,
                env::var("JWT_SECRET").context("JWT_SECRET required for HS256")?,
            ),
            "RS256" => (
                Algorithm::RS256,
                env::var("JWT_PUBLIC_KEY").context("JWT_PUBLIC_KEY required for RS256")?,
            ),
            "ES256" => (
                Algorithm::ES256,
                env::var("JWT_PUBLIC_KEY").context("JWT_PUBLIC_KEY required for ES256")?,
            ),
            other => return Err(anyhow!("unsupported JWT algorithm {}", other)),
        };
        Ok(Self {
            alg,
            key: key.into_bytes(),
            audience: env::var("JWT_AUDIENCE").ok().filter(|v| !v.is_empty()),
        })
    }

    fn decoding_key(&self) -> Result<DecodingKey> {
        match self.alg {
            Algorithm::HS256 => Ok(DecodingKey::from_secret(&self.key)),
            Algorithm::RS256 => Ok(DecodingKey::from_rsa_pem(&self.key)?),
            Algorithm::ES256 => Ok(DecodingKey::from_ec_pem(&self.key)?),
            _ => Err(anyhow!("unsupported decoding algorithm {:?}", self.alg)),
        }
    }

    fn decode_claims(&self, token: &str) -> Result<BTreeMap<String, Value>> {
        let decoding = self.decoding_key()?;
        let mut validation = Validation::new(self.alg);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }
        Ok(decode::<BTreeMap<String, Value>>(token, &decoding, &validation)?.claims)
    }
}

fn claim_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Array(items) => items.into_iter().find_map(claim_text),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl ClaimsVerifier for JwtClaimsVerifier {
    fn verify(&self, token: &str) -> BotResult<ClaimsIdentity> {
        let claims = self
            .decode_claims(token)
            .map_err(|e| BotError::unauthorized(format!("token rejected: {e}")))?;
        Ok(claims
            .into_iter()
            .filter_map(|(name, value)| claim_text(value).map(|text| (name, text)))
            .collect())
    }
}
