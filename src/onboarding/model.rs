//! Draft domain objects extracted during onboarding.

use serde::{Deserialize, Serialize};

/// Sentinel operation id for a name that matched no known operation.
pub const UNKNOWN_OPERATION: &str = "unknown";

/// Maximum operations kept per session.
pub const MAX_OPERATIONS: usize = 6;

/// Default wake hour when the model gives none or an invalid one.
pub const DEFAULT_WAKE_HOUR: u8 = 7;

/// Default sleep hour when the model gives none or an invalid one.
pub const DEFAULT_SLEEP_HOUR: u8 = 23;

/// A life area goals, habits and metrics hang off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationDraft {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// How progress on a goal is measured.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    #[default]
    SubgoalBased,
    MetricBased,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalDraft {
    pub id: String,
    /// Resolved operation id, or [`UNKNOWN_OPERATION`].
    pub operation_id: String,
    pub title: String,
    pub goal_type: GoalType,
    /// Present only for subgoal-based goals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgoals: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_metric_name: Option<String>,
}

/// A daily yes/no practice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HabitDraft {
    pub id: String,
    pub name: String,
    /// Operation name as the user or model phrased it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_operation: Option<String>,
    /// `None` when no operation was named, [`UNKNOWN_OPERATION`] when the
    /// name matched nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

/// Comparison used to judge a day's metric value against its targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricOperator {
    AtLeast,
    AtMost,
    Exactly,
}

/// A daily numeric measurement.
///
/// `optimal_value`, `minimum_value` and `operator` all `None` means a raw
/// tracking metric with no daily judgment. Co-nullability is not enforced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricDraft {
    pub id: String,
    pub name: String,
    pub unit: String,
    pub optimal_value: Option<f64>,
    pub minimum_value: Option<f64>,
    pub operator: Option<MetricOperator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

impl MetricDraft {
    /// True when the metric only records values without a target.
    pub fn is_raw_tracking(&self) -> bool {
        self.optimal_value.is_none() && self.minimum_value.is_none()
    }
}

/// Sleep schedule, hours in 0..=23.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDraft {
    pub wake_hour: u8,
    pub sleep_hour: u8,
}

impl Default for ScheduleDraft {
    fn default() -> Self {
        Self {
            wake_hour: DEFAULT_WAKE_HOUR,
            sleep_hour: DEFAULT_SLEEP_HOUR,
        }
    }
}

/// Everything extracted so far, or the slice produced by one turn.
///
/// Each top-level key is optional: an absent key means "nothing new",
/// which is what makes [`ExtractedData::merge`] a shallow, per-key overwrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExtractedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<OperationDraft>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals: Option<Vec<GoalDraft>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub habits: Option<Vec<HabitDraft>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricDraft>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleDraft>,
}

impl ExtractedData {
    pub fn is_empty(&self) -> bool {
        self.operations.is_none()
            && self.goals.is_none()
            && self.habits.is_none()
            && self.metrics.is_none()
            && self.schedule.is_none()
    }

    /// Overwrite every key present in `newer`; keys absent there are kept.
    pub fn merge(&mut self, newer: ExtractedData) {
        if newer.operations.is_some() {
            self.operations = newer.operations;
        }
        if newer.goals.is_some() {
            self.goals = newer.goals;
        }
        if newer.habits.is_some() {
            self.habits = newer.habits;
        }
        if newer.metrics.is_some() {
            self.metrics = newer.metrics;
        }
        if newer.schedule.is_some() {
            self.schedule = newer.schedule;
        }
    }

    /// Operations known so far (empty slice when none).
    pub fn operations(&self) -> &[OperationDraft] {
        self.operations.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(id: &str, name: &str) -> OperationDraft {
        OperationDraft {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn merge_overwrites_present_keys_only() {
        let mut base = ExtractedData {
            operations: Some(vec![op("op-1", "Health")]),
            schedule: Some(ScheduleDraft::default()),
            ..Default::default()
        };
        let newer = ExtractedData {
            habits: Some(vec![HabitDraft {
                id: "h-1".to_string(),
                name: "Meditate".to_string(),
                linked_operation: None,
                operation_id: None,
            }]),
            ..Default::default()
        };

        base.merge(newer);

        assert_eq!(base.operations().len(), 1);
        assert_eq!(base.habits.as_ref().unwrap()[0].name, "Meditate");
        assert!(base.schedule.is_some());
    }

    #[test]
    fn merge_is_shallow_not_deep() {
        let mut base = ExtractedData {
            operations: Some(vec![op("op-1", "Health"), op("op-2", "Career")]),
            ..Default::default()
        };
        base.merge(ExtractedData {
            operations: Some(vec![op("op-3", "Family")]),
            ..Default::default()
        });
        let names: Vec<&str> = base.operations().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Family"]);
    }

    #[test]
    fn empty_data_serializes_to_empty_object() {
        let data = ExtractedData::default();
        assert!(data.is_empty());
        assert_eq!(serde_json::to_value(&data).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn schedule_uses_camel_case() {
        let json = serde_json::to_value(ScheduleDraft::default()).unwrap();
        assert_eq!(json["wakeHour"], 7);
        assert_eq!(json["sleepHour"], 23);
    }

    #[test]
    fn metric_operator_serde() {
        let op: MetricOperator = serde_json::from_str("\"at_least\"").unwrap();
        assert_eq!(op, MetricOperator::AtLeast);
        assert_eq!(
            serde_json::to_string(&MetricOperator::AtMost).unwrap(),
            "\"at_most\""
        );
    }

    #[test]
    fn raw_tracking_metric() {
        let metric = MetricDraft {
            id: "m-1".to_string(),
            name: "Weight".to_string(),
            unit: "lbs".to_string(),
            optimal_value: None,
            minimum_value: None,
            operator: None,
            linked_operation: None,
            operation_id: None,
        };
        assert!(metric.is_raw_tracking());
    }

    #[test]
    fn goal_without_subgoals_omits_key() {
        let goal = GoalDraft {
            id: "g-1".to_string(),
            operation_id: UNKNOWN_OPERATION.to_string(),
            title: "Run a marathon".to_string(),
            goal_type: GoalType::MetricBased,
            subgoals: None,
            linked_metric_name: None,
        };
        let json = serde_json::to_value(&goal).unwrap();
        assert!(json.get("subgoals").is_none());
        assert_eq!(json["goal_type"], "metric_based");
    }
}
