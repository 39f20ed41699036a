use std::sync::Arc;

use relay_core::{Activity, BotError, BotResult, ClaimsIdentity, ConversationReference};
use relay_runner::{
    BotHost, ProactiveRequest, QnaEntry, SkillCallbackResponse, StaticAnswerService, TurnRequest,
    TurnResponse, TurnWorker, root_bot, root_dialogs,
};
use relay_security::{AllowedCallersClaimsValidator, ClaimsVerifier};
use relay_state::{BotState, shared_memory_storage};
use relay_testutil::{assert_texts, skill_claims, user_claims, user_message};
use serde_json::json;

fn host() -> Arc<BotHost> {
    let conversation = BotState::conversation(shared_memory_storage());
    let answers = Arc::new(StaticAnswerService::new(vec![QnaEntry {
        questions: vec!["opening hours".into()],
        answer: "We are open 9 to 5.".into(),
    }]));
    let bot = root_bot(root_dialogs(answers, None), &conversation);
    Arc::new(
        BotHost::new("bot-1", bot, conversation)
            .with_validator(Arc::new(AllowedCallersClaimsValidator::new(["root-app"]))),
    )
}

fn turn_payload(
    activity: Activity,
    claims: ClaimsIdentity,
    authorization: Option<&str>,
) -> Vec<u8> {
    serde_json::to_vec(&TurnRequest {
        activity,
        claims,
        authorization: authorization.map(str::to_string),
    })
    .unwrap()
}

#[tokio::test]
async fn turn_requests_are_answered_with_the_buffered_activities() {
    let worker = TurnWorker::new(host());
    let response = worker
        .handle_turn(&turn_payload(
            user_message("conv-w", "opening hours"),
            user_claims(),
            None,
        ))
        .await;

    assert_eq!(response.status, 200);
    assert!(response.error.is_none());
    assert_texts(&response.activities, &["We are open 9 to 5."]);
}

#[tokio::test]
async fn rejected_and_malformed_requests_carry_a_status() {
    let worker = TurnWorker::new(host());

    let rejected = worker
        .handle_turn(&turn_payload(
            user_message("conv-w", "opening hours"),
            skill_claims("intruder", "bot-1"),
            None,
        ))
        .await;
    assert_eq!(rejected.status, 403);
    assert!(rejected.activities.is_empty());

    let malformed = worker.handle_turn(b"{\"activity\": 42}").await;
    assert_eq!(malformed.status, 400);
    assert!(!malformed.is_success());
    assert!(malformed.error.unwrap().contains("malformed turn request"));
}

#[test]
fn turn_response_wire_shape_is_camel_case() {
    let response = TurnResponse {
        status: 200,
        activities: vec![Activity::message("hi")],
        error: None,
    };
    let wire = serde_json::to_value(&response).unwrap();
    assert_eq!(wire["status"], json!(200));
    assert_eq!(wire["activities"][0]["type"], json!("message"));
    assert!(wire.get("error").is_none());
}

struct FixedVerifier;

impl ClaimsVerifier for FixedVerifier {
    fn verify(&self, token: &str) -> BotResult<ClaimsIdentity> {
        if token == "good-token" {
            Ok(skill_claims("root-app", "bot-1"))
        } else {
            Err(BotError::unauthorized("token rejected"))
        }
    }
}

#[tokio::test]
async fn bearer_tokens_replace_request_claims_when_a_verifier_is_configured() {
    let worker = TurnWorker::new(host()).with_verifier(Arc::new(FixedVerifier));
    let activity = || user_message("conv-t", "opening hours");

    let missing = worker
        .handle_turn(&turn_payload(activity(), user_claims(), None))
        .await;
    assert_eq!(missing.status, 403);

    let bad = worker
        .handle_turn(&turn_payload(activity(), user_claims(), Some("Bearer nope")))
        .await;
    assert_eq!(bad.status, 403);

    let good = worker
        .handle_turn(&turn_payload(activity(), ClaimsIdentity::new(), Some("Bearer good-token")))
        .await;
    assert_eq!(good.status, 200);
    // Verified skill claims make this a skill call, which ends with endOfConversation.
    assert!(good.activities.iter().any(|a| a.code.is_some()));

    let unverified = TurnWorker::new(host())
        .handle_turn(&turn_payload(activity(), user_claims(), Some("Bearer good-token")))
        .await;
    assert_eq!(unverified.status, 403);
}

#[tokio::test]
async fn proactive_requests_continue_known_conversations() {
    let worker = TurnWorker::new(host());
    let proactive = |conversation_id: &str| {
        serde_json::to_vec(&ProactiveRequest {
            conversation_id: conversation_id.into(),
            activities: vec![Activity::message("Your order shipped.")],
        })
        .unwrap()
    };

    let unknown = worker.handle_proactive(&proactive("conv-p")).await;
    assert_eq!(unknown.status, 400);

    worker
        .handle_turn(&turn_payload(
            user_message("conv-p", "opening hours"),
            user_claims(),
            None,
        ))
        .await;
    let reference: ConversationReference = worker.host().references().get("conv-p").unwrap();
    assert_eq!(reference.user.id, "user-1");

    let delivered = worker.handle_proactive(&proactive("conv-p")).await;
    assert_eq!(delivered.status, 200);
    assert_texts(&delivered.activities, &["Your order shipped."]);
    assert_eq!(delivered.activities[0].conversation.id, "conv-p");
    assert_eq!(delivered.activities[0].recipient.id, "user-1");
}

#[tokio::test]
async fn skill_callbacks_need_a_configured_handler() {
    let worker = TurnWorker::new(host());
    let payload = json!({
        "conversationId": "skill-conv",
        "activity": { "type": "message", "text": "hi" }
    });
    let response: SkillCallbackResponse = worker
        .handle_skill_callback(&serde_json::to_vec(&payload).unwrap())
        .await;
    assert_eq!(response.status, 501);
    assert!(response.id.is_none());
}
