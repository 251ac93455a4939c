//! Tool schema registry and typed tool invocations.
//!
//! Every tool the model may call during onboarding is described here, and
//! every raw tool call is parsed into a [`ToolInvocation`] variant before the
//! normalizer sees it. Payload fields are optional wherever the model is
//! known to omit them; defaults are applied later by the normalizer.

use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::llm::{ToolCall, ToolDefinition};

pub const CREATE_OPERATIONS: &str = "create_operations";
pub const CREATE_GOALS: &str = "create_goals";
pub const CREATE_HABITS: &str = "create_habits";
pub const CREATE_METRICS: &str = "create_metrics";
pub const SET_SCHEDULE: &str = "set_schedule";
pub const CREATE_FULL_SYSTEM: &str = "create_full_system";

/// Errors turning a raw tool call into a typed invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolParseError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid input for tool {tool}: {reason}")]
    InvalidInput { tool: String, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OperationInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CreateOperations {
    #[serde(default)]
    pub operations: Vec<OperationInput>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct GoalInput {
    #[serde(default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Free text; anything but `metric_based` means subgoal-based.
    #[serde(default)]
    pub goal_type: Option<String>,
    #[serde(default)]
    pub subgoals: Option<Vec<String>>,
    #[serde(default)]
    pub linked_metric_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CreateGoals {
    #[serde(default)]
    pub goals: Vec<GoalInput>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HabitInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub linked_operation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CreateHabits {
    #[serde(default)]
    pub habits: Vec<HabitInput>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MetricInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub optimal_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub minimum_value: Option<f64>,
    /// Free text; unrecognised operators become `None`.
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub linked_operation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CreateMetrics {
    #[serde(default)]
    pub metrics: Vec<MetricInput>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SetSchedule {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub wake_hour: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub sleep_hour: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CreateFullSystem {
    #[serde(default)]
    pub operations: Vec<OperationInput>,
    #[serde(default)]
    pub goals: Vec<GoalInput>,
    #[serde(default)]
    pub habits: Vec<HabitInput>,
    #[serde(default)]
    pub metrics: Vec<MetricInput>,
    #[serde(default)]
    pub schedule: Option<SetSchedule>,
}

/// A structurally valid tool call, one variant per tool.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    CreateOperations(CreateOperations),
    CreateGoals(CreateGoals),
    CreateHabits(CreateHabits),
    CreateMetrics(CreateMetrics),
    SetSchedule(SetSchedule),
    CreateFullSystem(CreateFullSystem),
}

impl ToolInvocation {
    /// Parse a tool call by name. Accepts any tool in the registry
    /// regardless of the current phase.
    pub fn parse(name: &str, input: &Value) -> Result<Self, ToolParseError> {
        fn payload<T: for<'de> Deserialize<'de>>(
            tool: &str,
            input: &Value,
        ) -> Result<T, ToolParseError> {
            T::deserialize(input).map_err(|e| ToolParseError::InvalidInput {
                tool: tool.to_string(),
                reason: e.to_string(),
            })
        }

        match name {
            CREATE_OPERATIONS => payload(name, input).map(Self::CreateOperations),
            CREATE_GOALS => payload(name, input).map(Self::CreateGoals),
            CREATE_HABITS => payload(name, input).map(Self::CreateHabits),
            CREATE_METRICS => payload(name, input).map(Self::CreateMetrics),
            SET_SCHEDULE => payload(name, input).map(Self::SetSchedule),
            CREATE_FULL_SYSTEM => payload(name, input).map(Self::CreateFullSystem),
            other => Err(ToolParseError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateOperations(_) => CREATE_OPERATIONS,
            Self::CreateGoals(_) => CREATE_GOALS,
            Self::CreateHabits(_) => CREATE_HABITS,
            Self::CreateMetrics(_) => CREATE_METRICS,
            Self::SetSchedule(_) => SET_SCHEDULE,
            Self::CreateFullSystem(_) => CREATE_FULL_SYSTEM,
        }
    }
}

impl TryFrom<&ToolCall> for ToolInvocation {
    type Error = ToolParseError;

    fn try_from(call: &ToolCall) -> Result<Self, Self::Error> {
        Self::parse(&call.name, &call.arguments)
    }
}

/// Accept a number, a numeric string, or null. Non-finite values such as
/// `"NaN"` or `"inf"` count as missing.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().filter(|v| v.is_finite()),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    })
}

// ── Schemas ─────────────────────────────────────────────────────────────

fn operation_item_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "Short name of the life area, e.g. \"Physical Health\""},
            "description": {"type": "string", "description": "One sentence on what this area covers for the user"}
        },
        "required": ["name", "description"]
    })
}

fn goal_item_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "operation_name": {"type": "string", "description": "Exact name of the operation this goal belongs to"},
            "title": {"type": "string", "description": "The goal, keeping any figures the user gave"},
            "goal_type": {"type": "string", "enum": ["subgoal_based", "metric_based"]},
            "subgoals": {"type": "array", "items": {"type": "string"}, "description": "Ordered steps, only for subgoal_based goals"},
            "linked_metric_name": {"type": "string", "description": "Metric that tracks this goal, only for metric_based goals"}
        },
        "required": ["operation_name", "title", "goal_type"]
    })
}

fn habit_item_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "description": "A daily yes/no practice"},
            "linked_operation": {"type": "string", "description": "Exact name of the related operation"}
        },
        "required": ["name"]
    })
}

fn metric_item_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "name": {"type": "string"},
            "unit": {"type": "string", "description": "e.g. hours, lbs, pages"},
            "optimal_value": {"type": ["number", "null"]},
            "minimum_value": {"type": ["number", "null"]},
            "operator": {"type": ["string", "null"], "enum": ["at_least", "at_most", "exactly", null],
                         "description": "null together with null values for a raw tracking metric"},
            "linked_operation": {"type": "string", "description": "Exact name of the related operation"}
        },
        "required": ["name", "unit"]
    })
}

fn schedule_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "wake_hour": {"type": "integer", "minimum": 0, "maximum": 23},
            "sleep_hour": {"type": "integer", "minimum": 0, "maximum": 23}
        },
        "required": ["wake_hour", "sleep_hour"]
    })
}

/// All onboarding tool definitions.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: CREATE_OPERATIONS.to_string(),
            description: "Record the user's life areas (operations). Call once the user has named them. At most 6."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "operations": {"type": "array", "items": operation_item_schema(), "maxItems": 6}
                },
                "required": ["operations"]
            }),
        },
        ToolDefinition {
            name: CREATE_GOALS.to_string(),
            description: "Record goals for one or more operations.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "goals": {"type": "array", "items": goal_item_schema()}
                },
                "required": ["goals"]
            }),
        },
        ToolDefinition {
            name: CREATE_HABITS.to_string(),
            description: "Record daily habits the user wants to keep.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "habits": {"type": "array", "items": habit_item_schema()}
                },
                "required": ["habits"]
            }),
        },
        ToolDefinition {
            name: CREATE_METRICS.to_string(),
            description: "Record daily numeric metrics, with optional targets.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "metrics": {"type": "array", "items": metric_item_schema()}
                },
                "required": ["metrics"]
            }),
        },
        ToolDefinition {
            name: SET_SCHEDULE.to_string(),
            description: "Record the user's usual wake and sleep hours (0-23).".to_string(),
            parameters: schedule_schema(),
        },
        ToolDefinition {
            name: CREATE_FULL_SYSTEM.to_string(),
            description: "Record a complete system in one call: operations, goals, habits, metrics and schedule."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "operations": {"type": "array", "items": operation_item_schema(), "maxItems": 6},
                    "goals": {"type": "array", "items": goal_item_schema()},
                    "habits": {"type": "array", "items": habit_item_schema()},
                    "metrics": {"type": "array", "items": metric_item_schema()},
                    "schedule": schedule_schema()
                },
                "required": ["operations", "goals", "habits", "metrics"]
            }),
        },
    ]
}

/// Tools offered on every conversational turn. The phase steers the model
/// through instructions only; any tool may be called.
pub fn conversation_tools() -> Vec<ToolDefinition> {
    tool_definitions()
}
