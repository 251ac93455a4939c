//! Extraction normalizer: typed tool invocations to draft objects.
//!
//! Never fails: missing fields get defaults, unresolvable operation names
//! become [`UNKNOWN_OPERATION`], and an empty list contributes no key at all.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, warn};

use super::model::{
    DEFAULT_SLEEP_HOUR, DEFAULT_WAKE_HOUR, ExtractedData, GoalDraft, GoalType, HabitDraft,
    MAX_OPERATIONS, MetricDraft, MetricOperator, OperationDraft, ScheduleDraft, UNKNOWN_OPERATION,
};
use super::tools::{
    CreateFullSystem, GoalInput, HabitInput, MetricInput, OperationInput, SetSchedule,
    ToolInvocation,
};

const PLACEHOLDER_OPERATION: &str = "Untitled Operation";
const PLACEHOLDER_GOAL: &str = "Untitled Goal";
const PLACEHOLDER_HABIT: &str = "Untitled Habit";
const PLACEHOLDER_METRIC: &str = "Untitled Metric";

static BATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// A per-batch token: millisecond clock plus a process-wide sequence, so two
/// batches never share a token even within the same millisecond.
fn batch_token() -> String {
    let seq = BATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}{:x}", Utc::now().timestamp_millis(), seq)
}

fn draft_id(prefix: &str, token: &str, index: usize) -> String {
    format!("{prefix}-{token}-{index}")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Look up an operation id by exact name.
pub fn resolve_operation_id(name: &str, operations: &[OperationDraft]) -> String {
    operations
        .iter()
        .find(|op| op.name == name)
        .map(|op| op.id.clone())
        .unwrap_or_else(|| UNKNOWN_OPERATION.to_string())
}

/// Turn one tool invocation into the drafts it contributes.
///
/// `existing` is the data accumulated before this turn; it is only read for
/// operation-name resolution.
pub fn normalize(invocation: ToolInvocation, existing: &ExtractedData) -> ExtractedData {
    let tool = invocation.name();
    let result = match invocation {
        ToolInvocation::CreateOperations(input) => ExtractedData {
            operations: normalize_operations(input.operations),
            ..Default::default()
        },
        ToolInvocation::CreateGoals(input) => ExtractedData {
            goals: normalize_goals(input.goals, existing.operations()),
            ..Default::default()
        },
        ToolInvocation::CreateHabits(input) => ExtractedData {
            habits: normalize_habits(input.habits, existing.operations()),
            ..Default::default()
        },
        ToolInvocation::CreateMetrics(input) => ExtractedData {
            metrics: normalize_metrics(input.metrics, existing.operations()),
            ..Default::default()
        },
        ToolInvocation::SetSchedule(input) => ExtractedData {
            schedule: Some(normalize_schedule(&input)),
            ..Default::default()
        },
        ToolInvocation::CreateFullSystem(input) => normalize_full_system(input, existing),
    };

    debug!(
        tool,
        operations = result.operations.as_ref().map_or(0, Vec::len),
        goals = result.goals.as_ref().map_or(0, Vec::len),
        habits = result.habits.as_ref().map_or(0, Vec::len),
        metrics = result.metrics.as_ref().map_or(0, Vec::len),
        schedule = result.schedule.is_some(),
        "Normalized tool invocation"
    );
    result
}

fn normalize_operations(mut inputs: Vec<OperationInput>) -> Option<Vec<OperationDraft>> {
    if inputs.is_empty() {
        return None;
    }
    if inputs.len() > MAX_OPERATIONS {
        warn!(
            received = inputs.len(),
            kept = MAX_OPERATIONS,
            "Truncating operations to cap"
        );
        inputs.truncate(MAX_OPERATIONS);
    }

    let token = batch_token();
    Some(
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| OperationDraft {
                id: draft_id("op", &token, i),
                name: non_empty(input.name).unwrap_or_else(|| PLACEHOLDER_OPERATION.to_string()),
                description: input.description.unwrap_or_default(),
            })
            .collect(),
    )
}

fn normalize_goals(
    inputs: Vec<GoalInput>,
    operations: &[OperationDraft],
) -> Option<Vec<GoalDraft>> {
    if inputs.is_empty() {
        return None;
    }

    let token = batch_token();
    Some(
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| {
                let operation_id = input
                    .operation_name
                    .as_deref()
                    .map(|name| resolve_operation_id(name, operations))
                    .unwrap_or_else(|| UNKNOWN_OPERATION.to_string());
                let goal_type = match input.goal_type.as_deref() {
                    Some("metric_based") => GoalType::MetricBased,
                    _ => GoalType::SubgoalBased,
                };
                let subgoals = match goal_type {
                    GoalType::SubgoalBased => Some(input.subgoals.unwrap_or_default()),
                    GoalType::MetricBased => None,
                };
                GoalDraft {
                    id: draft_id("goal", &token, i),
                    operation_id,
                    title: non_empty(input.title).unwrap_or_else(|| PLACEHOLDER_GOAL.to_string()),
                    goal_type,
                    subgoals,
                    linked_metric_name: non_empty(input.linked_metric_name),
                }
            })
            .collect(),
    )
}

/// Resolve an optional operation name: `None` stays `None`, a name becomes
/// an id or the unknown sentinel.
fn link_operation(
    name: &Option<String>,
    operations: &[OperationDraft],
) -> Option<String> {
    name.as_deref()
        .map(|name| resolve_operation_id(name, operations))
}

fn normalize_habits(
    inputs: Vec<HabitInput>,
    operations: &[OperationDraft],
) -> Option<Vec<HabitDraft>> {
    if inputs.is_empty() {
        return None;
    }

    let token = batch_token();
    Some(
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| {
                let linked_operation = non_empty(input.linked_operation);
                HabitDraft {
                    id: draft_id("habit", &token, i),
                    name: non_empty(input.name).unwrap_or_else(|| PLACEHOLDER_HABIT.to_string()),
                    operation_id: link_operation(&linked_operation, operations),
                    linked_operation,
                }
            })
            .collect(),
    )
}

fn parse_operator(raw: Option<&str>) -> Option<MetricOperator> {
    match raw?.trim() {
        "at_least" | ">=" => Some(MetricOperator::AtLeast),
        "at_most" | "<=" => Some(MetricOperator::AtMost),
        "exactly" | "=" | "==" => Some(MetricOperator::Exactly),
        _ => None,
    }
}

fn normalize_metrics(
    inputs: Vec<MetricInput>,
    operations: &[OperationDraft],
) -> Option<Vec<MetricDraft>> {
    if inputs.is_empty() {
        return None;
    }

    let token = batch_token();
    Some(
        inputs
            .into_iter()
            .enumerate()
            .map(|(i, input)| {
                let linked_operation = non_empty(input.linked_operation);
                MetricDraft {
                    id: draft_id("metric", &token, i),
                    name: non_empty(input.name).unwrap_or_else(|| PLACEHOLDER_METRIC.to_string()),
                    unit: input.unit.unwrap_or_default(),
                    optimal_value: input.optimal_value,
                    minimum_value: input.minimum_value,
                    operator: parse_operator(input.operator.as_deref()),
                    operation_id: link_operation(&linked_operation, operations),
                    linked_operation,
                }
            })
            .collect(),
    )
}

fn hour_or(value: Option<f64>, default: u8) -> u8 {
    match value {
        Some(h) if h.is_finite() && (0.0..=23.0).contains(&h.round()) => h.round() as u8,
        _ => default,
    }
}

fn normalize_schedule(input: &SetSchedule) -> ScheduleDraft {
    ScheduleDraft {
        wake_hour: hour_or(input.wake_hour, DEFAULT_WAKE_HOUR),
        sleep_hour: hour_or(input.sleep_hour, DEFAULT_SLEEP_HOUR),
    }
}

/// Operations first, so goals/habits/metrics in the same call resolve
/// against them.
fn normalize_full_system(input: CreateFullSystem, existing: &ExtractedData) -> ExtractedData {
    let operations = normalize_operations(input.operations);
    let known: &[OperationDraft] = match operations.as_deref() {
        Some(ops) => ops,
        None => existing.operations(),
    };

    ExtractedData {
        goals: normalize_goals(input.goals, known),
        habits: normalize_habits(input.habits, known),
        metrics: normalize_metrics(input.metrics, known),
        schedule: input.schedule.as_ref().map(normalize_schedule),
        operations,
    }
}
