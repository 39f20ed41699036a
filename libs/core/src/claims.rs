//! Verified caller claims and skill-claim recognition.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const VERSION_CLAIM: &str = "ver";
pub const AUDIENCE_CLAIM: &str = "aud";
pub const APP_ID_CLAIM: &str = "appid";
pub const AUTHORIZED_PARTY_CLAIM: &str = "azp";
/// Audience of tokens issued by the channel service rather than by another bot.
pub const CHANNEL_SERVICE_AUDIENCE: &str = "https://api.botframework.com";

/// Claims of the authenticated caller, already verified by the transport.
///
/// ```
/// use relay_core::ClaimsIdentity;
///
/// let claims = ClaimsIdentity::new()
///     .with("ver", "2.0")
///     .with("aud", "root-bot")
///     .with("azp", "travel-skill");
/// assert!(claims.is_skill_claim());
/// assert_eq!(claims.app_id(), Some("travel-skill"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimsIdentity {
    claims: BTreeMap<String, String>,
}

impl ClaimsIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, claim: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(claim.into(), value.into());
        self
    }

    pub fn get(&self, claim: &str) -> Option<&str> {
        self.claims.get(claim).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.claims.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn audience(&self) -> Option<&str> {
        self.get(AUDIENCE_CLAIM)
    }

    /// Caller app id: `appid` for v1 tokens, `azp` for v2 tokens.
    pub fn app_id(&self) -> Option<&str> {
        match self.get(VERSION_CLAIM) {
            Some("1.0") => self.get(APP_ID_CLAIM),
            Some("2.0") => self.get(AUTHORIZED_PARTY_CLAIM),
            _ => self
                .get(APP_ID_CLAIM)
                .or_else(|| self.get(AUTHORIZED_PARTY_CLAIM)),
        }
    }

    /// True when the claims were issued for a bot calling another bot.
    pub fn is_skill_claim(&self) -> bool {
        if !matches!(self.get(VERSION_CLAIM), Some("1.0") | Some("2.0")) {
            return false;
        }
        let Some(audience) = self.audience().filter(|aud| !aud.is_empty()) else {
            return false;
        };
        if audience.eq_ignore_ascii_case(CHANNEL_SERVICE_AUDIENCE) {
            return false;
        }
        match self.app_id() {
            Some(app_id) if !app_id.is_empty() => app_id != audience,
            _ => false,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for ClaimsIdentity
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            claims: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_skill_claim_uses_appid() {
        let claims: ClaimsIdentity = [("ver", "1.0"), ("aud", "root"), ("appid", "skill")]
            .into_iter()
            .collect();
        assert!(claims.is_skill_claim());
        assert_eq!(claims.app_id(), Some("skill"));
    }

    #[test]
    fn channel_tokens_are_not_skill_claims() {
        let claims = ClaimsIdentity::new()
            .with("ver", "1.0")
            .with("aud", CHANNEL_SERVICE_AUDIENCE)
            .with("appid", "skill");
        assert!(!claims.is_skill_claim());
    }

    #[test]
    fn self_issued_and_versionless_claims_are_not_skill_claims() {
        let same = ClaimsIdentity::new()
            .with("ver", "2.0")
            .with("aud", "bot")
            .with("azp", "bot");
        assert!(!same.is_skill_claim());

        let versionless = ClaimsIdentity::new().with("aud", "root").with("appid", "skill");
        assert!(!versionless.is_skill_claim());
        assert!(!ClaimsIdentity::new().is_skill_claim());
    }

    #[test]
    fn v2_token_ignores_appid() {
        let claims = ClaimsIdentity::new()
            .with("ver", "2.0")
            .with("aud", "root")
            .with("appid", "ignored");
        assert_eq!(claims.app_id(), None);
        assert!(!claims.is_skill_claim());
    }
}
