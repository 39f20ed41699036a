use async_trait::async_trait;
use relay_core::{Activity, BotResult, InputHint};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Dialog, DialogContext, DialogReason, DialogTurnResult};

const PROMPT_OPTIONS: &str = "options";
const ATTEMPTS: &str = "attemptCount";

/// Prompt text, retry text and (for choice prompts) the accepted choices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_prompt: Option<Activity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl PromptOptions {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(Activity::message(prompt)),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: impl Into<String>) -> Self {
        self.retry_prompt = Some(Activity::message(retry));
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }
}

fn stored_options(dc: &DialogContext<'_>) -> PromptOptions {
    dc.active_dialog()
        .and_then(|instance| instance.state.get(PROMPT_OPTIONS))
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

fn render_choices(options: &PromptOptions, activity: Activity) -> Activity {
    if options.choices.is_empty() {
        return activity;
    }
    let list = options
        .choices
        .iter()
        .enumerate()
        .map(|(i, choice)| format!("{}. {choice}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let text = match activity.text.as_deref() {
        Some(text) if !text.is_empty() => format!("{text} ({list})"),
        _ => list,
    };
    activity.with_text(text)
}

async fn send_prompt(
    dc: &DialogContext<'_>,
    options: &PromptOptions,
    retry: bool,
) -> BotResult<()> {
    let activity = if retry {
        options.retry_prompt.clone().or_else(|| options.prompt.clone())
    } else {
        options.prompt.clone()
    };
    if let Some(activity) = activity {
        let activity = render_choices(options, activity).with_input_hint(InputHint::ExpectingInput);
        dc.turn().send_activity(activity).await?;
    }
    Ok(())
}

async fn begin_prompt(
    dc: &mut DialogContext<'_>,
    options: Option<Value>,
) -> BotResult<DialogTurnResult> {
    let options: PromptOptions = match options {
        Some(value) => serde_json::from_value(value)?,
        None => PromptOptions::default(),
    };
    if let Some(instance) = dc.active_dialog_mut() {
        instance
            .state
            .insert(PROMPT_OPTIONS.into(), serde_json::to_value(&options)?);
        instance.state.insert(ATTEMPTS.into(), json!(0));
    }
    send_prompt(dc, &options, false).await?;
    Ok(DialogTurnResult::waiting())
}

async fn continue_prompt(
    dc: &mut DialogContext<'_>,
    recognize: fn(&PromptOptions, &str) -> Option<Value>,
) -> BotResult<DialogTurnResult> {
    let activity = dc.turn().activity();
    if !activity.is_message() {
        return Ok(DialogTurnResult::waiting());
    }
    let options = stored_options(dc);
    if let Some(value) = activity.text().and_then(|text| recognize(&options, text)) {
        return dc.end_dialog(Some(value)).await;
    }
    if let Some(instance) = dc.active_dialog_mut() {
        let attempts = instance
            .state
            .get(ATTEMPTS)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        instance.state.insert(ATTEMPTS.into(), json!(attempts + 1));
    }
    send_prompt(dc, &options, true).await?;
    Ok(DialogTurnResult::waiting())
}

/// Accepts any non-blank message text.
pub struct TextPrompt {
    id: String,
}

impl TextPrompt {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

fn recognize_text(_options: &PromptOptions, text: &str) -> Option<Value> {
    Some(Value::String(text.to_string()))
}

#[async_trait]
impl Dialog for TextPrompt {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        begin_prompt(dc, options).await
    }

    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> BotResult<DialogTurnResult> {
        continue_prompt(dc, recognize_text).await
    }

    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        let options = stored_options(dc);
        send_prompt(dc, &options, false).await?;
        Ok(DialogTurnResult::waiting())
    }
}

/// Accepts one of the configured choices, by value (case-insensitive) or 1-based index.
/// Resolves to `{"value": <choice>, "index": <0-based index>}`.
pub struct ChoicePrompt {
    id: String,
}

impl ChoicePrompt {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

fn recognize_choice(options: &PromptOptions, text: &str) -> Option<Value> {
    let found = options
        .choices
        .iter()
        .position(|choice| choice.eq_ignore_ascii_case(text))
        .or_else(|| {
            text.parse::<usize>()
                .ok()
                .filter(|n| (1..=options.choices.len()).contains(n))
                .map(|n| n - 1)
        })?;
    Some(json!({ "value": options.choices[found], "index": found }))
}

#[async_trait]
impl Dialog for ChoicePrompt {
    fn id(&self) -> &str {
        &self.id
    }

    async fn begin_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        options: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        begin_prompt(dc, options).await
    }

    async fn continue_dialog(&self, dc: &mut DialogContext<'_>) -> BotResult<DialogTurnResult> {
        continue_prompt(dc, recognize_choice).await
    }

    async fn resume_dialog(
        &self,
        dc: &mut DialogContext<'_>,
        _reason: DialogReason,
        _result: Option<Value>,
    ) -> BotResult<DialogTurnResult> {
        let options = stored_options(dc);
        send_prompt(dc, &options, false).await?;
        Ok(DialogTurnResult::waiting())
    }
}
