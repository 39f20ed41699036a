use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use relay_core::{
    Activity, Bot, BotError, BotResult, BufferedAdapter, ClaimsIdentity,
    ConversationLocks, ConversationReference, ConversationReferenceStore,
    EndOfConversationCode, ExpectedReplies, InputHint, InvokeResponse, Middleware,
    MiddlewareSet, ResourceResponse, SharedAdapter, SharedReferenceStore, TurnContext,
    validate_activity,
};
use relay_security::{AllowedCallersClaimsValidator, ClaimsValidator};
use relay_skills::SkillCallbackSink;
use relay_state::BotState;
use relay_telemetry::{
    REJECTED_CALLERS_TOTAL, TURN_DURATION_SECONDS, TURN_ERRORS_TOTAL, TURNS_TOTAL,
    TelemetryLabels, record_counter, record_histogram, with_common_fields,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, error, instrument, warn};

/// Message sent to the user when a turn fails.
pub const TURN_ERROR_MESSAGE: &str = "The bot encountered an error or bug.";
pub const TURN_ERROR_TRACE: &str = "OnTurnError Trace";
const TURN_ERROR_VALUE_TYPE: &str = "https://www.botframework.com/schemas/error";
const TURN_ERROR_LABEL: &str = "TurnError";

/// How a turn that got past validation ended.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed,
    /// The bot failed; the error boundary already answered the caller.
    Recovered(BotError),
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed)
    }

    pub fn error(&self) -> Option<&BotError> {
        match self {
            TurnOutcome::Completed => None,
            TurnOutcome::Recovered(err) => Some(err),
        }
    }
}

/// A turn run against a [`BufferedAdapter`], with everything it sent.
#[derive(Debug)]
pub struct BufferedTurn {
    pub outcome: TurnOutcome,
    pub activities: Vec<Activity>,
}

impl BufferedTurn {
    /// Reply of an expect-replies call: status 200 with the recorded activities.
    pub fn into_invoke_response(self) -> InvokeResponse {
        let replies = ExpectedReplies {
            activities: self.activities,
        };
        InvokeResponse::new(200, serde_json::to_value(replies).ok())
    }
}

/// Composition root for one bot: claims gate, middleware, bot logic, state and the
/// turn error boundary.
///
/// Clones share locks, references and pending skill callbacks.
#[derive(Clone)]
pub struct BotHost {
    bot_id: String,
    bot: Arc<dyn Bot>,
    middleware: MiddlewareSet,
    conversation_state: BotState,
    user_state: Option<BotState>,
    validator: Arc<dyn ClaimsValidator>,
    locks: ConversationLocks,
    references: SharedReferenceStore,
    channel_adapter: Option<SharedAdapter>,
    clear_state_on_error: bool,
    callbacks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BotHost {
    /// Host admitting channel callers only; see [`BotHost::with_validator`].
    pub fn new(
        bot_id: impl Into<String>,
        bot: Arc<dyn Bot>,
        conversation_state: BotState,
    ) -> Self {
        Self {
            bot_id: bot_id.into(),
            bot,
            middleware: MiddlewareSet::new(),
            conversation_state,
            user_state: None,
            validator: Arc::new(AllowedCallersClaimsValidator::default()),
            locks: ConversationLocks::new(),
            references: Arc::new(ConversationReferenceStore::new()),
            channel_adapter: None,
            clear_state_on_error: false,
            callbacks: Arc::default(),
        }
    }

    pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn with_user_state(mut self, user_state: BotState) -> Self {
        self.user_state = Some(user_state);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ClaimsValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_references(mut self, references: SharedReferenceStore) -> Self {
        self.references = references;
        self
    }

    /// Adapter used for turns that do not arrive with one: skill callbacks and relayed
    /// skill messages.
    pub fn with_channel_adapter(mut self, adapter: SharedAdapter) -> Self {
        self.channel_adapter = Some(adapter);
        self
    }

    pub fn clear_state_on_error(mut self, clear: bool) -> Self {
        self.clear_state_on_error = clear;
        self
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn references(&self) -> &SharedReferenceStore {
        &self.references
    }

    pub fn conversation_state(&self) -> &BotState {
        &self.conversation_state
    }

    /// Runs one inbound turn. Validation and claims failures are returned before any
    /// state is touched; failures inside the bot are handled by the error boundary and
    /// reported as [`TurnOutcome::Recovered`].
    #[instrument(
        name = "relay.turn",
        skip_all,
        fields(
            bot = %self.bot_id,
            kind = %activity.kind,
            channel = tracing::field::Empty,
            conversation = tracing::field::Empty,
            activity_id = tracing::field::Empty,
        )
    )]
    pub async fn process(
        &self,
        activity: Activity,
        claims: ClaimsIdentity,
        adapter: SharedAdapter,
    ) -> BotResult<TurnOutcome> {
        validate_activity(&activity)?;
        with_common_fields(&Span::current(), &activity);
        let labels = TelemetryLabels::for_activity(&self.bot_id, &activity);
        if let Err(err) = self.validator.validate(&claims).await {
            record_counter(REJECTED_CALLERS_TOTAL, 1, &labels);
            return Err(err);
        }

        let _guard = self.locks.lock(&activity.conversation.id).await;
        if self.references.observe(&activity) {
            debug!("conversation reference recorded");
        }
        let turn = TurnContext::new(adapter, activity).with_claims(claims);
        self.run_turn(&turn, self.bot.as_ref(), labels).await
    }

    /// Runs the turn against a fresh [`BufferedAdapter`] and returns what it sent.
    pub async fn process_buffered(
        &self,
        activity: Activity,
        claims: ClaimsIdentity,
    ) -> BotResult<BufferedTurn> {
        let adapter = Arc::new(BufferedAdapter::new());
        let outcome = self.process(activity, claims, adapter.clone()).await?;
        Ok(BufferedTurn {
            outcome,
            activities: adapter.take_responses(),
        })
    }

    /// Runs `logic` in an existing conversation outside of any inbound request.
    #[instrument(
        name = "relay.continue",
        skip_all,
        fields(bot = %self.bot_id, conversation = %reference.conversation.id)
    )]
    pub async fn continue_conversation(
        &self,
        reference: &ConversationReference,
        adapter: SharedAdapter,
        logic: &dyn Bot,
    ) -> BotResult<TurnOutcome> {
        let activity = reference.continuation_activity();
        validate_activity(&activity)?;
        let labels = TelemetryLabels::for_activity(&self.bot_id, &activity);
        let _guard = self.locks.lock(&reference.conversation.id).await;
        let turn = TurnContext::new(adapter, activity);
        self.run_turn(&turn, logic, labels).await
    }

    /// Continues a conversation recorded by an earlier turn, buffering what `logic` sends.
    pub async fn continue_buffered(
        &self,
        conversation_id: &str,
        logic: &dyn Bot,
    ) -> BotResult<BufferedTurn> {
        let reference = self.references.get(conversation_id).ok_or_else(|| {
            BotError::validation(format!(
                "no conversation reference recorded for `{conversation_id}`"
            ))
        })?;
        let adapter = Arc::new(BufferedAdapter::new());
        let outcome = self
            .continue_conversation(&reference, adapter.clone(), logic)
            .await?;
        Ok(BufferedTurn {
            outcome,
            activities: adapter.take_responses(),
        })
    }

    async fn run_turn(
        &self,
        turn: &TurnContext,
        logic: &dyn Bot,
        labels: TelemetryLabels,
    ) -> BotResult<TurnOutcome> {
        let started = Instant::now();
        record_counter(TURNS_TOTAL, 1, &labels);

        let outcome = match self.middleware.run(turn, logic).await {
            Ok(()) => TurnOutcome::Completed,
            Err(err) => {
                record_counter(
                    TURN_ERRORS_TOTAL,
                    1,
                    &labels.clone().with("error", err.kind()),
                );
                self.on_turn_error(turn, &err).await;
                TurnOutcome::Recovered(err)
            }
        };

        let saved = self.save_state(turn).await;
        record_histogram(
            TURN_DURATION_SECONDS,
            started.elapsed().as_secs_f64(),
            &labels,
        );
        saved?;
        Ok(outcome)
    }

    async fn save_state(&self, turn: &TurnContext) -> BotResult<()> {
        let conversation = self.conversation_state.save_changes(turn, false).await;
        let user = match &self.user_state {
            Some(user_state) => user_state.save_changes(turn, false).await,
            None => Ok(()),
        };
        conversation.and(user)
    }

    /// Every step is best-effort: a failure is logged and the next step still runs.
    async fn on_turn_error(&self, turn: &TurnContext, err: &BotError) {
        error!(error = %err, kind = err.kind(), "unhandled error during turn");

        let apology =
            Activity::message(TURN_ERROR_MESSAGE).with_input_hint(InputHint::ExpectingInput);
        if let Err(send_err) = turn.send_activity(apology).await {
            warn!(error = %send_err, "failed to send the error message");
        }

        if turn.is_skill_call() {
            let eoc = Activity::end_of_conversation(EndOfConversationCode::SkillError)
                .with_text(err.to_string())
                .with_locale(turn.activity().locale.clone());
            if let Err(send_err) = turn.send_activity(eoc).await {
                warn!(error = %send_err, "failed to send endOfConversation to the skill caller");
            }
        }

        if let Err(send_err) = turn
            .send_trace_activity(
                TURN_ERROR_TRACE,
                json!(err.to_string()),
                TURN_ERROR_VALUE_TYPE,
                TURN_ERROR_LABEL,
            )
            .await
        {
            warn!(error = %send_err, "failed to send the error trace");
        }

        if self.clear_state_on_error {
            match self.conversation_state.delete(turn).await {
                Ok(()) => debug!("conversation state cleared after error"),
                Err(clear_err) => warn!(error = %clear_err, "failed to clear conversation state"),
            }
        }
    }

    /// Waits until every queued skill callback turn has run.
    pub async fn wait_for_callbacks(&self) {
        loop {
            let pending = mem::take(
                &mut *self
                    .callbacks
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(err) = handle.await {
                    error!(error = %err, "skill callback task failed");
                }
            }
        }
    }

    fn queue_callback(&self, handle: JoinHandle<()>) {
        let mut callbacks = self
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        callbacks.retain(|pending| !pending.is_finished());
        callbacks.push(handle);
    }

    fn channel_adapter(&self) -> BotResult<SharedAdapter> {
        self.channel_adapter
            .clone()
            .ok_or(BotError::NotSupported("delivery without a channel adapter"))
    }
}

#[async_trait]
impl SkillCallbackSink for BotHost {
    #[instrument(
        name = "relay.skill_callback",
        skip_all,
        fields(
            bot = %self.bot_id,
            conversation = %reference.conversation.id,
            kind = %activity.kind
        )
    )]
    async fn continue_with_skill_activity(
        &self,
        reference: &ConversationReference,
        activity: Activity,
        claims: ClaimsIdentity,
    ) -> BotResult<()> {
        let adapter = self.channel_adapter()?;
        validate_activity(&activity)?;
        let labels =
            TelemetryLabels::for_activity(&self.bot_id, &activity).with("source", "skill");
        // The turn that called the skill may hold the conversation lock until the skill
        // answers, so the callback turn queues for the lock instead of running inline.
        let host = self.clone();
        let conversation_id = reference.conversation.id.clone();
        let task = async move {
            let _guard = host.locks.lock(&conversation_id).await;
            let turn = TurnContext::new(adapter, activity)
                .with_claims(claims)
                .mark_skill_callback();
            if let Err(err) = host.run_turn(&turn, host.bot.as_ref(), labels).await {
                error!(error = %err, "skill callback turn failed");
            }
        };
        self.queue_callback(tokio::spawn(task.instrument(Span::current())));
        Ok(())
    }

    async fn send_to_user(
        &self,
        reference: &ConversationReference,
        activity: Activity,
    ) -> BotResult<ResourceResponse> {
        let adapter = self.channel_adapter()?;
        let turn = TurnContext::new(adapter, reference.continuation_activity());
        turn.send_activity(activity).await
    }
}
