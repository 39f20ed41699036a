//! Authorization gate for bot-to-bot (skill) calls.
pub mod jwt;

pub use jwt::{ClaimsVerifier, JwtClaimsVerifier};

use std::collections::BTreeSet;
use std::env;

use async_trait::async_trait;
use relay_core::{BotError, BotResult, ClaimsIdentity};
use tracing::{debug, warn};

/// Caller id that admits every skill caller.
pub const ACCEPT_ALL_CALLERS: &str = "*";

/// Decides whether the verified caller may start a turn.
#[async_trait]
pub trait ClaimsValidator: Send + Sync {
    async fn validate(&self, claims: &ClaimsIdentity) -> BotResult<()>;
}

/// Admits non-skill callers unconditionally and skill callers whose app id is listed.
///
/// ```
/// use relay_core::ClaimsIdentity;
/// use relay_security::AllowedCallersClaimsValidator;
///
/// let validator = AllowedCallersClaimsValidator::new(["root-bot"]);
/// let caller = ClaimsIdentity::new()
///     .with("ver", "1.0")
///     .with("aud", "travel-skill")
///     .with("appid", "root-bot");
/// assert!(validator.is_allowed(&caller));
/// ```
#[derive(Debug, Clone, Default)]
pub struct AllowedCallersClaimsValidator {
    allowed: BTreeSet<String>,
}

impl AllowedCallersClaimsValidator {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(Into::into)
                .filter(|id: &String| !id.trim().is_empty())
                .collect(),
        }
    }

    /// Reads the comma-separated `RELAY_ALLOWED_CALLERS` list.
    pub fn from_env() -> Self {
        let raw = env::var("RELAY_ALLOWED_CALLERS").unwrap_or_default();
        Self::new(raw.split(',').map(str::trim))
    }

    pub fn accepts_all(&self) -> bool {
        self.allowed.contains(ACCEPT_ALL_CALLERS)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    pub fn is_allowed(&self, claims: &ClaimsIdentity) -> bool {
        if !claims.is_skill_claim() {
            return true;
        }
        if self.accepts_all() {
            return true;
        }
        claims
            .app_id()
            .is_some_and(|app_id| self.allowed.contains(app_id))
    }
}

#[async_trait]
impl ClaimsValidator for AllowedCallersClaimsValidator {
    async fn validate(&self, claims: &ClaimsIdentity) -> BotResult<()> {
        if self.is_allowed(claims) {
            debug!(caller = claims.app_id().unwrap_or("channel"), "caller admitted");
            return Ok(());
        }
        let caller = claims.app_id().unwrap_or_default();
        warn!(%caller, "rejected skill caller not in allowed list");
        Err(BotError::unauthorized(format!(
            "received a request from a bot with an app id of \"{caller}\"; to enable requests from this caller, add the app id to the allowed callers"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(caller: &str) -> ClaimsIdentity {
        ClaimsIdentity::new()
            .with("ver", "2.0")
            .with("aud", "me")
            .with("azp", caller)
    }

    #[tokio::test]
    async fn non_skill_claims_are_always_accepted() {
        let validator = AllowedCallersClaimsValidator::default();
        assert!(validator.validate(&ClaimsIdentity::new()).await.is_ok());
        let channel = ClaimsIdentity::new()
            .with("ver", "1.0")
            .with("aud", relay_core::CHANNEL_SERVICE_AUDIENCE)
            .with("appid", "someone");
        assert!(validator.validate(&channel).await.is_ok());
    }

    #[tokio::test]
    async fn only_listed_callers_pass() {
        let validator = AllowedCallersClaimsValidator::new(["A"]);
        assert!(validator.validate(&skill("A")).await.is_ok());
        let err = validator.validate(&skill("B")).await.unwrap_err();
        assert!(matches!(err, BotError::Unauthorized(_)));
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn matching_is_exact() {
        let validator = AllowedCallersClaimsValidator::new(["root-bot"]);
        assert!(validator.validate(&skill("ROOT-BOT")).await.is_err());
        assert!(validator.validate(&skill("root")).await.is_err());
        assert!(validator.validate(&skill("root-bot ")).await.is_err());
    }

    #[tokio::test]
    async fn wildcard_accepts_any_caller() {
        let validator = AllowedCallersClaimsValidator::new(["*"]);
        assert!(validator.accepts_all());
        assert!(validator.validate(&skill("anyone")).await.is_ok());
    }

    #[test]
    fn blank_entries_are_ignored() {
        let validator = AllowedCallersClaimsValidator::new(["", " ", "A"]);
        assert_eq!(validator.allowed().collect::<Vec<_>>(), vec!["A"]);
    }
}
