use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use relay_security::AllowedCallersClaimsValidator;
use serde::{Deserialize, Serialize};

/// Environment variable naming the skills configuration file.
pub const SKILLS_CONFIG_ENV: &str = "RELAY_SKILLS_CONFIG";

/// A skill this bot can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDescriptor {
    pub id: String,
    pub app_id: String,
    pub skill_endpoint: String,
}

/// Skills known to a root bot plus the endpoint skills call back on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillsConfiguration {
    #[serde(default)]
    pub skill_host_endpoint: String,
    #[serde(default)]
    pub skills: Vec<SkillDescriptor>,
}

impl SkillsConfiguration {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("invalid skills configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading skills configuration {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    /// Loads the file named by `RELAY_SKILLS_CONFIG`; `None` when the variable is unset.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var(SKILLS_CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()).map(Some),
            _ => Ok(None),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for skill in &self.skills {
            if skill.id.trim().is_empty() {
                bail!("skill id empty");
            }
            if skill.app_id.trim().is_empty() {
                bail!("skill `{}` has no appId", skill.id);
            }
            if skill.skill_endpoint.trim().is_empty() {
                bail!("skill `{}` has no skillEndpoint", skill.id);
            }
            if !seen.insert(skill.id.as_str()) {
                bail!("skill `{}` declared twice", skill.id);
            }
        }
        if !self.skills.is_empty() && self.skill_host_endpoint.trim().is_empty() {
            bail!("skillHostEndpoint is required when skills are configured");
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&SkillDescriptor> {
        self.skills.iter().find(|skill| skill.id == id)
    }

    pub fn allowed_app_ids(&self) -> impl Iterator<Item = &str> {
        self.skills.iter().map(|skill| skill.app_id.as_str())
    }

    /// Validator admitting callbacks from the configured skills only.
    pub fn claims_validator(&self) -> AllowedCallersClaimsValidator {
        AllowedCallersClaimsValidator::new(self.allowed_app_ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ClaimsIdentity;

    const SAMPLE: &str = r#"{
        "skillHostEndpoint": "http://localhost:3978/api/skills",
        "skills": [
            {"id": "travel", "appId": "travel-app", "skillEndpoint": "http://localhost:39783/api/messages"}
        ]
    }"#;

    #[test]
    fn parses_camel_case_file() {
        let config = SkillsConfiguration::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.skill_host_endpoint, "http://localhost:3978/api/skills");
        let travel = config.get("travel").unwrap();
        assert_eq!(travel.app_id, "travel-app");
        assert!(config.get("weather").is_none());
        assert_eq!(config.allowed_app_ids().collect::<Vec<_>>(), vec!["travel-app"]);
    }

    #[test]
    fn rejects_incomplete_entries() {
        let missing_app = r#"{"skillHostEndpoint": "http://h", "skills": [{"id": "a", "appId": "", "skillEndpoint": "http://s"}]}"#;
        assert!(SkillsConfiguration::from_json_str(missing_app).is_err());
        let duplicate = r#"{"skillHostEndpoint": "http://h", "skills": [
            {"id": "a", "appId": "x", "skillEndpoint": "http://s"},
            {"id": "a", "appId": "y", "skillEndpoint": "http://t"}]}"#;
        assert!(SkillsConfiguration::from_json_str(duplicate).is_err());
        let no_host = r#"{"skills": [{"id": "a", "appId": "x", "skillEndpoint": "http://s"}]}"#;
        assert!(SkillsConfiguration::from_json_str(no_host).is_err());
    }

    #[test]
    fn validator_admits_configured_skills() {
        let validator = SkillsConfiguration::from_json_str(SAMPLE)
            .unwrap()
            .claims_validator();
        let skill = ClaimsIdentity::new()
            .with("ver", "1.0")
            .with("aud", "root-app")
            .with("appid", "travel-app");
        assert!(validator.is_allowed(&skill));
        let stranger = skill.clone().with("appid", "other-app");
        assert!(!validator.is_allowed(&stranger));
    }
}
