use relay_core::Activity;
use tracing::Span;

use crate::context::TelemetryLabels;

pub const TURNS_TOTAL: &str = "relay_turns_total";
pub const TURN_ERRORS_TOTAL: &str = "relay_turn_errors_total";
pub const TURN_DURATION_SECONDS: &str = "relay_turn_duration_seconds";
pub const REJECTED_CALLERS_TOTAL: &str = "relay_rejected_callers_total";

/// Records the turn's addressing on a span declared with `channel`, `conversation` and
/// `activity_id` fields.
pub fn with_common_fields(span: &Span, activity: &Activity) {
    span.record("channel", tracing::field::display(&activity.channel_id));
    span.record("conversation", tracing::field::display(&activity.conversation.id));
    if let Some(id) = &activity.id {
        span.record("activity_id", tracing::field::display(id));
    }
}

pub fn record_counter(name: &'static str, value: u64, labels: &TelemetryLabels) {
    metrics::counter!(name, labels.metric_labels()).increment(value);
}

pub fn record_histogram(name: &'static str, value: f64, labels: &TelemetryLabels) {
    metrics::histogram!(name, labels.metric_labels()).record(value);
}
