use crate::{Activity, ActivityType, BotError, BotResult, ensure_not_blank};
use time::OffsetDateTime;

/// Validates an inbound [`Activity`] before a turn is started for it.
///
/// ```
/// use relay_core::{validate_activity, Activity};
///
/// let mut activity = Activity::message("hello");
/// activity.channel_id = "test".into();
/// activity.from.id = "user-1".into();
/// activity.conversation.id = "conv-1".into();
///
/// validate_activity(&activity).unwrap();
/// ```
pub fn validate_activity(activity: &Activity) -> BotResult<()> {
    if let ActivityType::Other(kind) = &activity.kind {
        ensure_not_blank(kind, "activity type")?;
    }
    ensure_not_blank(&activity.channel_id, "channel_id")?;
    ensure_not_blank(&activity.conversation.id, "conversation.id")?;
    ensure_not_blank(&activity.from.id, "from.id")?;
    if let Some(timestamp) = &activity.timestamp {
        // RFC3339 only
        OffsetDateTime::parse(timestamp, &time::format_description::well_known::Rfc3339)
            .map_err(|e| BotError::validation(format!("invalid timestamp: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Activity {
        let mut activity = Activity::message("hi");
        activity.channel_id = "test".into();
        activity.from.id = "user".into();
        activity.conversation.id = "conv".into();
        activity
    }

    #[test]
    fn accepts_complete_activity() {
        assert!(validate_activity(&valid()).is_ok());
    }

    #[test]
    fn rejects_missing_addressing() {
        let mut no_conversation = valid();
        no_conversation.conversation.id = " ".into();
        let err = validate_activity(&no_conversation).unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: conversation.id empty");

        let mut no_sender = valid();
        no_sender.from.id.clear();
        assert!(matches!(
            validate_activity(&no_sender),
            Err(BotError::Validation(_))
        ));
    }

    #[test]
    fn rejects_bad_timestamp() {
        let mut activity = valid();
        activity.timestamp = Some("yesterday".into());
        assert!(validate_activity(&activity).is_err());
    }
}
