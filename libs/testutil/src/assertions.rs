use relay_core::{Activity, ActivityType, EndOfConversationCode};

/// Text of every activity that carries one, in send order.
pub fn texts(activities: &[Activity]) -> Vec<String> {
    activities
        .iter()
        .filter_map(|activity| activity.text.clone())
        .collect()
}

/// Asserts the message texts sent during a turn, ignoring non-message activities.
pub fn assert_texts(activities: &[Activity], expected: &[&str]) {
    let actual: Vec<String> = activities
        .iter()
        .filter(|activity| activity.is_message())
        .filter_map(|activity| activity.text.clone())
        .collect();
    assert_eq!(
        actual, expected,
        "unexpected replies; full activities: {activities:#?}"
    );
}

pub fn find_end_of_conversation(activities: &[Activity]) -> Option<&Activity> {
    activities
        .iter()
        .find(|activity| activity.kind == ActivityType::EndOfConversation)
}

/// Asserts an `endOfConversation` with `code` was sent and returns it.
pub fn assert_end_of_conversation(
    activities: &[Activity],
    code: EndOfConversationCode,
) -> &Activity {
    let Some(eoc) = find_end_of_conversation(activities) else {
        panic!("expected an endOfConversation activity, got: {activities:#?}");
    };
    assert_eq!(eoc.code, Some(code), "unexpected endOfConversation code");
    eoc
}
