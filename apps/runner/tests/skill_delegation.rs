use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use relay_core::{
    Activity, ActivityType, BotResult, BufferedAdapter, EndOfConversationCode, InvokeResponse,
    TurnContext,
};
use relay_dialogs::{
    DIALOG_STATE_PROPERTY, DialogBot, DialogSet, DialogState, DialogTurnResult, WaterfallDialog,
    WaterfallStepContext,
};
use relay_runner::{
    BotHost, QnaEntry, SkillWiring, StaticAnswerService, TURN_ERROR_MESSAGE, root_bot,
    root_dialogs,
};
use relay_security::AllowedCallersClaimsValidator;
use relay_skills::{
    InMemorySkillClient, SkillConversationIdFactory, SkillDescriptor, SkillHandler,
    SkillsConfiguration,
};
use relay_state::{BotState, shared_memory_storage};
use relay_testutil::{assert_texts, skill_claims, user_claims, user_message};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn travel_config() -> SkillsConfiguration {
    SkillsConfiguration {
        skill_host_endpoint: "http://root/api/skills".into(),
        skills: vec![SkillDescriptor {
            id: "travel".into(),
            app_id: "travel-app".into(),
            skill_endpoint: "http://travel/api/messages".into(),
        }],
    }
}

fn travel_skill() -> Arc<BotHost> {
    let conversation = BotState::conversation(shared_memory_storage());
    let answers = Arc::new(StaticAnswerService::new(vec![QnaEntry {
        questions: vec!["travel".into()],
        answer: "Booked a flight.".into(),
    }]));
    let bot = root_bot(root_dialogs(answers, None), &conversation);
    Arc::new(
        BotHost::new("travel-app", bot, conversation)
            .with_validator(Arc::new(AllowedCallersClaimsValidator::new(["root-app"]))),
    )
}

fn broken<'s>(
    _step: &'s mut WaterfallStepContext<'_, '_>,
) -> BoxFuture<'s, BotResult<DialogTurnResult>> {
    Box::pin(async move { Err(anyhow::anyhow!("booking backend offline").into()) })
}

fn broken_skill() -> Arc<BotHost> {
    let conversation = BotState::conversation(shared_memory_storage());
    let dialogs = DialogSet::new().add(WaterfallDialog::new("main").step(broken));
    let bot = Arc::new(DialogBot::new(dialogs, "main", &conversation));
    Arc::new(
        BotHost::new("travel-app", bot, conversation)
            .with_validator(Arc::new(AllowedCallersClaimsValidator::new(["root-app"]))),
    )
}

/// Posts to `skill` in process, answering the way an expect-replies endpoint does.
fn client_for(skill: Arc<BotHost>) -> Arc<InMemorySkillClient> {
    Arc::new(InMemorySkillClient::new(move |activity: Activity| {
        let skill = skill.clone();
        async move {
            let response = match skill
                .process_buffered(activity, skill_claims("root-app", "travel-app"))
                .await
            {
                Ok(turn) => turn.into_invoke_response(),
                Err(err) => InvokeResponse::new(err.status_code(), None),
            };
            Ok(response)
        }
    }))
}

fn silent_skill() -> Arc<InMemorySkillClient> {
    Arc::new(InMemorySkillClient::new(|_activity: Activity| async move {
        Ok(InvokeResponse::new(200, None))
    }))
}

struct Root {
    host: Arc<BotHost>,
    client: Arc<InMemorySkillClient>,
    conversation_ids: SkillConversationIdFactory,
    channel: Arc<BufferedAdapter>,
}

fn root(client: Arc<InMemorySkillClient>, expect_replies: bool) -> Root {
    let storage = shared_memory_storage();
    let conversation = BotState::conversation(storage.clone());
    let conversation_ids = SkillConversationIdFactory::new(storage);
    let wiring = SkillWiring {
        bot_id: "root-app".into(),
        config: travel_config(),
        client: client.clone(),
        conversation_ids: conversation_ids.clone(),
        expect_replies,
    };
    let answers = Arc::new(StaticAnswerService::default());
    let bot = root_bot(root_dialogs(answers, Some(&wiring)), &conversation);
    let channel = Arc::new(BufferedAdapter::new());
    let host = BotHost::new("root-app", bot, conversation).with_channel_adapter(channel.clone());
    Root {
        host: Arc::new(host),
        client,
        conversation_ids,
        channel,
    }
}

#[tokio::test]
async fn root_relays_skill_replies_and_finishes_with_the_skill_result() {
    init_tracing();
    let root = root(client_for(travel_skill()), true);

    let turn = root
        .host
        .process_buffered(user_message("user-conv", "travel"), user_claims())
        .await
        .unwrap();

    assert!(turn.outcome.is_completed());
    assert_texts(&turn.activities, &["Booked a flight."]);
    assert_eq!(turn.activities[0].conversation.id, "user-conv");
    assert_eq!(turn.activities[0].recipient.id, "user-1");

    let posted = root.client.posted();
    assert_eq!(posted.len(), 1);
    assert!(posted[0].expects_replies());
    assert!(
        root.conversation_ids
            .get(&posted[0].conversation.id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn failing_skill_reports_through_the_root_without_failing_it() {
    init_tracing();
    let root = root(client_for(broken_skill()), true);

    let turn = root
        .host
        .process_buffered(user_message("user-conv", "travel"), user_claims())
        .await
        .unwrap();

    assert!(turn.outcome.is_completed());
    assert_texts(&turn.activities, &[TURN_ERROR_MESSAGE]);
}

#[tokio::test]
async fn skill_callbacks_reach_the_user_and_resume_the_root_dialog() {
    init_tracing();
    let root = root(silent_skill(), false);

    let started = root
        .host
        .process_buffered(user_message("user-conv", "travel"), user_claims())
        .await
        .unwrap();
    assert!(started.activities.is_empty());
    let skill_conversation = root.client.posted()[0].conversation.id.clone();

    let handler = SkillHandler::new(
        root.conversation_ids.clone(),
        Arc::new(travel_config().claims_validator()),
        root.host.clone(),
    );
    let skill = skill_claims("travel-app", "root-app");

    handler
        .on_reply_to_activity(
            &skill,
            &skill_conversation,
            "root-activity-1",
            Activity::message("Where would you like to go?"),
        )
        .await
        .unwrap();
    let delivered = root.channel.take_responses();
    assert_texts(&delivered, &["Where would you like to go?"]);
    assert_eq!(delivered[0].conversation.id, "user-conv");
    assert_eq!(delivered[0].reply_to_id.as_deref(), Some("root-activity-1"));

    let mut done = Activity::end_of_conversation(EndOfConversationCode::CompletedSuccessfully);
    done.from.id = "travel-app".into();
    handler
        .on_send_to_conversation(&skill, &skill_conversation, done)
        .await
        .unwrap();
    root.host.wait_for_callbacks().await;
    assert!(
        root.conversation_ids
            .get(&skill_conversation)
            .await
            .unwrap()
            .is_none()
    );

    // The root waterfall ended with the skill, so the next message starts it over.
    let next = root
        .host
        .process_buffered(user_message("user-conv", "hello"), user_claims())
        .await
        .unwrap();
    assert_texts(&next.activities, &["No answers were found."]);
}

async fn root_dialog_stack(host: &BotHost) -> DialogState {
    let turn = TurnContext::new(
        Arc::new(BufferedAdapter::new()),
        user_message("user-conv", ""),
    );
    host.conversation_state()
        .property::<DialogState>(DIALOG_STATE_PROPERTY)
        .get(&turn)
        .await
        .unwrap()
        .unwrap_or_default()
}

#[tokio::test]
async fn skill_ending_before_answering_the_forward_still_resumes_the_root() {
    init_tracing();
    let handler: Arc<OnceLock<SkillHandler>> = Arc::default();
    let client = {
        let handler = handler.clone();
        Arc::new(InMemorySkillClient::new(move |activity: Activity| {
            let handler = handler.clone();
            async move {
                if activity.kind == ActivityType::Message {
                    let mut done =
                        Activity::end_of_conversation(EndOfConversationCode::CompletedSuccessfully);
                    done.from.id = "travel-app".into();
                    done.value = Some(json!({ "booked": true }));
                    handler
                        .get()
                        .unwrap()
                        .on_send_to_conversation(
                            &skill_claims("travel-app", "root-app"),
                            &activity.conversation.id,
                            done,
                        )
                        .await
                        .unwrap();
                }
                Ok(InvokeResponse::new(200, None))
            }
        }))
    };
    let root = root(client, false);
    let _ = handler.set(SkillHandler::new(
        root.conversation_ids.clone(),
        Arc::new(travel_config().claims_validator()),
        root.host.clone(),
    ));

    let started = root
        .host
        .process_buffered(user_message("user-conv", "travel"), user_claims())
        .await
        .unwrap();
    assert!(started.outcome.is_completed());
    root.host.wait_for_callbacks().await;

    assert!(root_dialog_stack(&root.host).await.is_empty());
    let skill_conversation = root.client.posted()[0].conversation.id.clone();
    assert!(
        root.conversation_ids
            .get(&skill_conversation)
            .await
            .unwrap()
            .is_none()
    );

    let next = root
        .host
        .process_buffered(user_message("user-conv", "hello"), user_claims())
        .await
        .unwrap();
    assert_texts(&next.activities, &["No answers were found."]);
}
