use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use relay_core::{BotError, BotResult, TurnContext};
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    Dialog, DialogContext, DialogInstance, DialogReason, DialogTurnResult, PromptOptions,
};

const STEP_INDEX: &str = "stepIndex";
const OPTIONS: &str = "options";
const VALUES: &str = "values";

/// Why a waterfall step is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepReason {
    /// First step, right after the waterfall began.
    Begin,
    /// The previous step called `next`.
    Next,
    /// The step waited and a new activity arrived; the result is the activity text.
    Resumed,
    /// A child dialog begun by the previous step ended; the result is the child's.
    ChildCompleted,
}

/// One step of a [`WaterfallDialog`].
///
/// Plain functions of the shape
/// `fn(&mut WaterfallStepContext<'_, '_>) -> BoxFuture<'_, BotResult<DialogTurnResult>>`
/// implement this trait.
#[async_trait]
pub trait WaterfallStep: Send + Sync {
    async fn run(&self, step: &mut WaterfallStepContext<'_, '_>) -> BotResult<DialogTurnResult>;
}

#[async_trait]
impl<F> WaterfallStep for F
where
    F: for<'s, 'a, 'd> Fn(
            &'s mut WaterfallStepContext<'a, 'd>,
        ) -> BoxFuture<'s, BotResult<DialogTurnResult>>
        + Send
        + Sync,
{
    async fn run(&self, step: &mut WaterfallStepContext<'_, '_>) -> BotResult<DialogTurnResult> {
        (self)(step).await
    }
}

/// Ordered steps sharing a `values` map; each step resumes where the previous one stopped.
pub struct WaterfallDialog {
    id: String,
    steps: Vec<Arc<dyn WaterfallStep>>,
}

impl WaterfallDialog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl WaterfallStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn step_index(instance: Option<&DialogInstance>) -> usize {
        instance
            .and_then(|i| i.state.get(STEP_INDEX))
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }

    async fn run_step(
        &self,
        dc: &mut DialogContext<'_>,
        index: usize,
        reason: StepReason,
        result: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        if index >= self.steps.len() {
            return dc.end_dialog(result).await;
        }
        let depth = match dc.active_dialog() {
            Some(instance) if instance.id == self.id => dc.stack().len() - 1,
            _ => {
                return Err(BotError::validation(format!(
                    "waterfall '{}' is not the active dialog",
                    self.id
                )));
            }
        };
        if let Some(instance) = dc.instance_mut(depth) {
            instance.state.insert(STEP_INDEX.into(), Value::from(index as u64));
        }
        debug!(dialog = %self.id, step = index, ?reason, "running waterfall step");

        let mut step = WaterfallStepContext {
            dc,
            waterfall: self,
            depth,
            index,
            reason,
            result,
        };
        self.steps[index].run(&mut step).await
    }
}

#[async_trait]
impl Dialog for WaterfallDialog {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        if let Some(instance) = dc.active_dialog_mut() {
            instance
                .state
                .insert(OPTIONS.into(), options.unwrap_or(Value::Null));
            instance
                .state
                .insert(VALUES.into(), Value::Object(Map::new()));
        }
        self.run_step(dc, 0, StepReason::Begin, None).await
    }

    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> BotResult<DialogTurnResult> {
        let activity = dc.turn().activity();
        if !activity.is_message() {
            return Ok(DialogTurnResult::waiting());
        }
        let index = Self::step_index(dc.active_dialog());
        let text = activity.text.clone().map(Value::String);
        self.run_step(dc, index, StepReason::Resumed, text).await
    }

    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        result: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        let index = Self::step_index(dc.active_dialog()) + 1;
        self.run_step(dc, index, StepReason::ChildCompleted, result)
            .await
    }
}

/// Handle a waterfall step uses to read its inputs and choose how the waterfall proceeds.
pub struct WaterfallStepContext<'a, 'd> {
    dc: &'a mut DialogContext<'d>,
    waterfall: &'a WaterfallDialog,
    depth: usize,
    index: usize,
    reason: StepReason,
    result: Option<Value>,
}

impl<'a, 'd> WaterfallStepContext<'a, 'd> {
    pub fn turn(&self) -> &'d TurnContext {
        self.dc.turn()
    }

    pub fn context(&mut self) -> &mut DialogContext<'d> {
        &mut *self.dc
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn reason(&self) -> StepReason {
        self.reason
    }

    /// Result handed to this step (prior step, child dialog, or the resuming activity's text).
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn result_str(&self) -> Option<&str> {
        self.result.as_ref().and_then(Value::as_str)
    }

    /// Options the waterfall was begun with.
    pub fn options(&self) -> Option<Value> {
        self.dc
            .stack()
            .get(self.depth)
            .and_then(|i| i.state.get(OPTIONS))
            .filter(|v| !v.is_null())
            .cloned()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.dc
            .stack()
            .get(self.depth)
            .and_then(|i| i.state.get(VALUES))
            .and_then(|values| values.get(key))
            .cloned()
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        let Some(instance) = self.dc.instance_mut(self.depth) else {
            return;
        };
        let values = instance
            .state
            .entry(VALUES)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = values {
            map.insert(key.into(), value);
        }
    }

    /// Runs the next step now with `result`.
    pub async fn next(&mut self, result: Option<Value>) -> BotResult<DialogTurnResult> {
        self.waterfall
            .run_step(&mut *self.dc, self.index + 1, StepReason::Next, result)
            .await
    }

    /// Suspends the waterfall; the same step runs again when the next message arrives.
    pub fn wait(&self) -> BotResult<DialogTurnResult> {
        Ok(DialogTurnResult::waiting())
    }

    pub async fn begin_dialog(
        &mut self,
        id: &str,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        self.dc.begin_dialog(id, options).await
    }

    pub async fn prompt(
        &mut self,
        id: &str,
        options: PromptOptions,
    ) -> BotResult<DialogTurnResult> {
        let options = serde_json::to_value(options)?;
        self.dc.begin_dialog(id, Some(options)).await
    }

    pub async fn end_dialog(&mut self, result: Option<Value>) -> BotResult<DialogTurnResult> {
        self.dc.end_dialog(result).await
    }

    pub async fn replace_dialog(
        &mut self,
        id: &str,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        self.dc.replace_dialog(id, options).await
    }

    pub async fn cancel_all_dialogs(&mut self) -> BotResult<DialogTurnResult> {
        self.dc.cancel_all_dialogs().await
    }
}
