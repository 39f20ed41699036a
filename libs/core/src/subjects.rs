//! NATS subject helpers for the scale-out turn protocol.

use std::borrow::Cow;

/// Queue group shared by all turn workers of a bot.
pub const TURN_WORKER_QUEUE: &str = "relay-turn-workers";

/// Normalizes identifiers to be subject-safe (replace separators and wildcards, trim).
fn norm<S: AsRef<str>>(s: S) -> Cow<'static, str> {
    let mut t = s
        .as_ref()
        .trim()
        .replace([' ', '\t', '\n', '\r', '*', '>', '/', '.'], "-");
    if t.is_empty() {
        t = "unknown".into();
    }
    Cow::Owned(t)
}

/// Subject on which turn workers of `bot_id` answer turn requests.
///
/// ```
/// use relay_core::turn_subject;
///
/// assert_eq!(turn_subject("travel bot"), "relay.turns.travel-bot");
/// ```
pub fn turn_subject(bot_id: &str) -> String {
    format!("relay.turns.{}", norm(bot_id))
}

/// Subject on which turn workers of `bot_id` accept proactive continuation requests.
///
/// ```
/// use relay_core::proactive_subject;
///
/// assert_eq!(proactive_subject("travel"), "relay.proactive.travel");
/// ```
pub fn proactive_subject(bot_id: &str) -> String {
    format!("relay.proactive.{}", norm(bot_id))
}

/// Subject on which the parent bot `bot_id` accepts activities its skills post back.
///
/// ```
/// use relay_core::skill_callback_subject;
///
/// assert_eq!(skill_callback_subject("root"), "relay.skills.root");
/// ```
pub fn skill_callback_subject(bot_id: &str) -> String {
    format!("relay.skills.{}", norm(bot_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_become_unknown() {
        assert_eq!(turn_subject("  "), "relay.turns.unknown");
    }

    #[test]
    fn wildcards_are_neutralised() {
        assert_eq!(turn_subject("bot.*>"), "relay.turns.bot---");
    }
}
