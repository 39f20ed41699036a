use metrics::Label;
use relay_core::Activity;

/// Common label set attached to Relay metrics and log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryLabels {
    pub bot: String,
    pub channel: Option<String>,
    pub activity_type: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new(bot: impl Into<String>) -> Self {
        Self {
            bot: bot.into(),
            ..Self::default()
        }
    }

    /// Labels for a turn driven by `activity`. Conversation ids stay out of the label set;
    /// they belong on spans.
    pub fn for_activity(bot: impl Into<String>, activity: &Activity) -> Self {
        let channel = Some(activity.channel_id.clone()).filter(|c| !c.is_empty());
        Self {
            bot: bot.into(),
            channel,
            activity_type: Some(activity.kind.to_string()),
            extra: Vec::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(3 + self.extra.len());
        tags.push(("bot".into(), self.bot.clone()));
        if let Some(channel) = &self.channel {
            tags.push(("channel".into(), channel.clone()));
        }
        if let Some(kind) = &self.activity_type {
            tags.push(("activity_type".into(), kind.clone()));
        }
        tags.extend(self.extra.iter().cloned());
        tags
    }

    pub fn metric_labels(&self) -> Vec<Label> {
        self.tags()
            .into_iter()
            .map(|(key, value)| Label::new(key, value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_the_activity() {
        let mut activity = Activity::message("hi");
        activity.channel_id = "msteams".into();
        let labels = TelemetryLabels::for_activity("root", &activity).with("outcome", "ok");
        assert_eq!(
            labels.tags(),
            vec![
                ("bot".to_string(), "root".to_string()),
                ("channel".to_string(), "msteams".to_string()),
                ("activity_type".to_string(), "message".to_string()),
                ("outcome".to_string(), "ok".to_string()),
            ]
        );
        assert_eq!(labels.metric_labels().len(), 4);
    }
}
