use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use relay_core::{
    Activity, ActivityType, Bot, BotError, BotResult, BufferedAdapter, EndOfConversationCode,
    InputHint, TurnContext,
};
use relay_dialogs::{
    DIALOG_STATE_PROPERTY, DialogBot, DialogSet, DialogState, DialogTurnResult, StepReason,
    WaterfallDialog, WaterfallStepContext,
};
use relay_runner::{
    BotHost, QnaEntry, StaticAnswerService, TURN_ERROR_MESSAGE, TURN_ERROR_TRACE, TurnOutcome,
    root_bot, root_dialogs,
};
use relay_security::AllowedCallersClaimsValidator;
use relay_state::{BotState, SharedStorage, shared_memory_storage};
use relay_testutil::{
    TestFlow, assert_end_of_conversation, assert_texts, skill_claims, user_claims, user_message,
};

type StepFuture<'s> = BoxFuture<'s, BotResult<DialogTurnResult>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn answers(entries: Vec<QnaEntry>) -> Arc<StaticAnswerService> {
    Arc::new(StaticAnswerService::new(entries))
}

fn opening_hours() -> QnaEntry {
    QnaEntry {
        questions: vec!["opening hours".into()],
        answer: "We are open 9 to 5.".into(),
    }
}

fn answer_host(storage: SharedStorage, entries: Vec<QnaEntry>) -> BotHost {
    let conversation = BotState::conversation(storage);
    let bot = root_bot(root_dialogs(answers(entries), None), &conversation);
    BotHost::new("bot-1", bot, conversation)
}

fn explode<'s>(_step: &'s mut WaterfallStepContext<'_, '_>) -> StepFuture<'s> {
    Box::pin(async move { Err(anyhow::anyhow!("flight service unavailable").into()) })
}

fn ask_then_explode<'s>(step: &'s mut WaterfallStepContext<'_, '_>) -> StepFuture<'s> {
    Box::pin(async move {
        if step.reason() == StepReason::Resumed {
            return Err(anyhow::anyhow!("answer could not be processed").into());
        }
        step.turn().send_text("step one").await?;
        step.wait()
    })
}

fn failing_host(storage: SharedStorage, steps: DialogSet) -> BotHost {
    let conversation = BotState::conversation(storage);
    let bot = Arc::new(DialogBot::new(steps, "main", &conversation));
    BotHost::new("travel-app", bot, conversation)
}

async fn dialog_state(storage: &SharedStorage, conversation_id: &str) -> Option<DialogState> {
    let conversation = BotState::conversation(storage.clone());
    let turn = TurnContext::new(
        Arc::new(BufferedAdapter::new()),
        user_message(conversation_id, ""),
    );
    conversation
        .property::<DialogState>(DIALOG_STATE_PROPERTY)
        .get(&turn)
        .await
        .unwrap()
}

#[tokio::test]
async fn unanswered_question_sends_one_reply_and_empties_the_stack() {
    init_tracing();
    let storage = shared_memory_storage();
    let host = answer_host(storage.clone(), Vec::new());

    let turn = host
        .process_buffered(user_message("conv-a", "what is the meaning of life"), user_claims())
        .await
        .unwrap();

    assert!(turn.outcome.is_completed());
    assert_eq!(turn.activities.len(), 1);
    assert_texts(&turn.activities, &["No answers were found."]);
    let state = dialog_state(&storage, "conv-a").await.unwrap();
    assert!(state.is_empty());
}

#[tokio::test]
async fn failing_skill_turn_apologises_then_ends_the_conversation_with_skill_error() {
    init_tracing();
    let storage = shared_memory_storage();
    let host = failing_host(
        storage.clone(),
        DialogSet::new().add(WaterfallDialog::new("main").step(explode)),
    )
    .with_validator(Arc::new(AllowedCallersClaimsValidator::new(["root-app"])));

    let turn = host
        .process_buffered(
            user_message("conv-b", "book a flight"),
            skill_claims("root-app", "travel-app"),
        )
        .await
        .unwrap();

    assert!(matches!(turn.outcome, TurnOutcome::Recovered(BotError::Dialog(_))));
    assert_eq!(turn.activities.len(), 2);
    assert_eq!(turn.activities[0].text.as_deref(), Some(TURN_ERROR_MESSAGE));
    assert_eq!(turn.activities[0].input_hint, Some(InputHint::ExpectingInput));
    let eoc = assert_end_of_conversation(&turn.activities[1..], EndOfConversationCode::SkillError);
    let reason = eoc.text.as_deref().unwrap_or_default();
    assert!(reason.contains("flight service unavailable"), "{reason}");
}

#[tokio::test]
async fn unknown_skill_caller_is_rejected_before_any_state_is_touched() {
    init_tracing();
    let storage = shared_memory_storage();
    let host = answer_host(storage.clone(), vec![opening_hours()])
        .with_validator(Arc::new(AllowedCallersClaimsValidator::new(["A"])));

    let err = host
        .process_buffered(user_message("conv-c", "opening hours"), skill_claims("B", "bot-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, BotError::Unauthorized(_)));
    assert_eq!(err.status_code(), 403);
    assert!(dialog_state(&storage, "conv-c").await.is_none());
    assert!(host.references().get("conv-c").is_none());

    let admitted = host
        .process_buffered(user_message("conv-c", "opening hours"), skill_claims("A", "bot-1"))
        .await
        .unwrap();
    assert!(admitted.outcome.is_completed());
}

#[tokio::test]
async fn malformed_activity_is_a_validation_error() {
    let host = answer_host(shared_memory_storage(), Vec::new());
    let mut activity = user_message("conv-v", "hi");
    activity.from.id.clear();

    let err = host
        .process_buffered(activity, user_claims())
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Validation(_)));
}

#[tokio::test]
async fn emulator_sees_the_error_trace_but_not_an_end_of_conversation() {
    init_tracing();
    let host = failing_host(
        shared_memory_storage(),
        DialogSet::new().add(WaterfallDialog::new("main").step(explode)),
    );
    let mut activity = user_message("conv-e", "hi");
    activity.channel_id = "emulator".into();

    let turn = host.process_buffered(activity, user_claims()).await.unwrap();

    let kinds: Vec<ActivityType> = turn.activities.iter().map(|a| a.kind.clone()).collect();
    assert_eq!(kinds, vec![ActivityType::Message, ActivityType::Trace]);
    assert_eq!(turn.activities[1].name.as_deref(), Some(TURN_ERROR_TRACE));
    assert_eq!(turn.activities[1].label.as_deref(), Some("TurnError"));
}

#[tokio::test]
async fn clearing_state_on_error_restarts_the_conversation() {
    init_tracing();
    let steps = || DialogSet::new().add(WaterfallDialog::new("main").step(ask_then_explode));

    for (clear, expected_after_error) in [(true, "step one"), (false, TURN_ERROR_MESSAGE)] {
        let storage = shared_memory_storage();
        let host = failing_host(storage.clone(), steps()).clear_state_on_error(clear);
        let conversation = format!("conv-clear-{clear}");

        let first = host
            .process_buffered(user_message(&conversation, "start"), user_claims())
            .await
            .unwrap();
        assert_texts(&first.activities, &["step one"]);

        let failed = host
            .process_buffered(user_message(&conversation, "next"), user_claims())
            .await
            .unwrap();
        assert!(!failed.outcome.is_completed());
        assert_texts(&failed.activities, &[TURN_ERROR_MESSAGE]);
        assert_eq!(dialog_state(&storage, &conversation).await.is_none(), clear);

        let after = host
            .process_buffered(user_message(&conversation, "again"), user_claims())
            .await
            .unwrap();
        assert_texts(&after.activities, &[expected_after_error]);
    }
}

#[tokio::test]
async fn scripted_conversation_keeps_reply_order() {
    init_tracing();
    let host = Arc::new(answer_host(shared_memory_storage(), vec![opening_hours()]));
    let flow = TestFlow::new(|activity, claims| {
        let host = host.clone();
        async move {
            host.process_buffered(activity, claims)
                .await
                .map(|turn| turn.activities)
        }
    })
    .in_conversation("conv-flow")
    .with_claims(user_claims());

    flow.test("what are your opening hours", &["We are open 9 to 5."])
        .await;
    flow.test("where do I park", &["No answers were found."])
        .await;
    let sent = flow
        .test("opening hours again", &["We are open 9 to 5."])
        .await;
    assert_eq!(sent[0].conversation.id, "conv-flow");
    assert_eq!(sent[0].from.id, "bot-1");
    assert_eq!(sent[0].recipient.id, "user-1");
    assert!(host.references().get("conv-flow").is_some());
}

struct Counter {
    state: BotState,
}

#[async_trait]
impl Bot for Counter {
    async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
        let count = self.state.property::<u32>("count");
        let current = count.get_or_default(turn, || 0).await?;
        tokio::time::sleep(Duration::from_millis(1)).await;
        count.set(turn, &(current + 1)).await?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn turns_of_one_conversation_run_one_at_a_time() {
    init_tracing();
    let storage = shared_memory_storage();
    let conversation = BotState::conversation(storage.clone());
    let bot = Arc::new(Counter {
        state: conversation.clone(),
    });
    let host = Arc::new(BotHost::new("bot-1", bot, conversation.clone()));

    stream::iter(0..20)
        .for_each_concurrent(Some(8), |i| {
            let host = host.clone();
            async move {
                let turn = host
                    .process_buffered(
                        user_message("conv-busy", &format!("tick {i}")),
                        user_claims(),
                    )
                    .await
                    .unwrap();
                assert!(turn.outcome.is_completed());
            }
        })
        .await;

    let turn = TurnContext::new(Arc::new(BufferedAdapter::new()), user_message("conv-busy", ""));
    let count = conversation
        .property::<u32>("count")
        .get(&turn)
        .await
        .unwrap();
    assert_eq!(count, Some(20));
}

struct SayHello;

#[async_trait]
impl Bot for SayHello {
    async fn on_turn(&self, turn: &TurnContext) -> BotResult<()> {
        turn.send_activity(Activity::message("hello again")).await?;
        Ok(())
    }
}

#[tokio::test]
async fn proactive_turns_reach_recorded_conversations_only() {
    let host = answer_host(shared_memory_storage(), vec![opening_hours()]);

    let err = host.continue_buffered("conv-p", &SayHello).await.unwrap_err();
    assert!(matches!(err, BotError::Validation(_)));

    host.process_buffered(user_message("conv-p", "opening hours"), user_claims())
        .await
        .unwrap();
    let turn = host.continue_buffered("conv-p", &SayHello).await.unwrap();
    assert!(turn.outcome.is_completed());
    assert_texts(&turn.activities, &["hello again"]);
    assert_eq!(turn.activities[0].conversation.id, "conv-p");
    assert_eq!(turn.activities[0].recipient.id, "user-1");
}
