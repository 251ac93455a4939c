//! Batch generator: a whole draft system from a list of goals in one call.
//!
//! Stateless and strict: the model's JSON must carry every top-level key or
//! the call fails. Sizes are requested in the prompt but passed through
//! unchecked, and names are not resolved to ids.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::OnboardingError;
use crate::llm::{ChatMessage, SystemPrompt};
use crate::store::Database;

use super::invoker::CompletionInvoker;
use super::model::{GoalType, MetricOperator, ScheduleDraft};
use super::prompts::{BATCH_SYSTEM_PROMPT, batch_user_prompt};

/// Batch output is parsed as strict JSON, so sample deterministically.
const BATCH_TEMPERATURE: f32 = 0.0;

/// Matches the first Markdown code fence in a reply, with or without a
/// language tag. Prose around the fence is ignored.
static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap()
});

/// One goal and how the user plans to get there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoalDetail {
    pub goal: String,
    #[serde(default, alias = "approach")]
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedOperation {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedGoal {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub operation_name: String,
    #[serde(default)]
    pub goal_type: GoalType,
    #[serde(default)]
    pub linked_metric_name: Option<String>,
    #[serde(default)]
    pub subgoals: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedHabit {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub operation_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedMetric {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub optimal_value: Option<f64>,
    #[serde(default)]
    pub minimum_value: Option<f64>,
    #[serde(default)]
    pub operator: Option<MetricOperator>,
    pub operation_name: String,
}

/// A complete draft system. References between entries are by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedSystem {
    pub operations: Vec<GeneratedOperation>,
    pub goals: Vec<GeneratedGoal>,
    pub habits: Vec<GeneratedHabit>,
    pub metrics: Vec<GeneratedMetric>,
    pub schedule: ScheduleDraft,
}

/// Body of the first code fence, or the whole reply when there is none.
fn strip_fence(raw: &str) -> &str {
    match FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim(),
        None => raw.trim(),
    }
}

impl GeneratedSystem {
    /// Parse the model's reply and assign sequential ids.
    ///
    /// Fails if the payload is not JSON, if any of the five top-level keys
    /// is missing, or if a schedule hour is outside 0..=23.
    pub fn parse(raw: &str) -> Result<Self, OnboardingError> {
        let body = strip_fence(raw);
        let mut system: GeneratedSystem = serde_json::from_str(body)
            .map_err(|e| OnboardingError::Generation(format!("unparseable system: {e}")))?;

        for (name, hour) in [
            ("wakeHour", system.schedule.wake_hour),
            ("sleepHour", system.schedule.sleep_hour),
        ] {
            if hour > 23 {
                return Err(OnboardingError::Generation(format!(
                    "schedule.{name} {hour} is outside 0-23"
                )));
            }
        }

        system.assign_ids();
        Ok(system)
    }

    fn assign_ids(&mut self) {
        for (i, op) in self.operations.iter_mut().enumerate() {
            op.id = format!("op-{i}");
        }
        for (i, goal) in self.goals.iter_mut().enumerate() {
            goal.id = format!("goal-{i}");
        }
        for (i, habit) in self.habits.iter_mut().enumerate() {
            habit.id = format!("habit-{i}");
        }
        for (i, metric) in self.metrics.iter_mut().enumerate() {
            metric.id = format!("metric-{i}");
        }
    }

    /// Name references that match nothing in this system.
    pub fn dangling_references(&self) -> Vec<String> {
        let operations: HashSet<&str> = self.operations.iter().map(|o| o.name.as_str()).collect();
        let metrics: HashSet<&str> = self.metrics.iter().map(|m| m.name.as_str()).collect();

        let mut dangling = Vec::new();
        for goal in &self.goals {
            if !operations.contains(goal.operation_name.as_str()) {
                dangling.push(format!("goal '{}' -> operation '{}'", goal.title, goal.operation_name));
            }
            if let Some(metric) = &goal.linked_metric_name {
                if !metrics.contains(metric.as_str()) {
                    dangling.push(format!("goal '{}' -> metric '{metric}'", goal.title));
                }
            }
        }
        for habit in &self.habits {
            if !operations.contains(habit.operation_name.as_str()) {
                dangling.push(format!("habit '{}' -> operation '{}'", habit.name, habit.operation_name));
            }
        }
        for metric in &self.metrics {
            if !operations.contains(metric.operation_name.as_str()) {
                dangling.push(format!(
                    "metric '{}' -> operation '{}'",
                    metric.name, metric.operation_name
                ));
            }
        }
        dangling
    }
}

/// Generates full draft systems and optionally stashes them for anonymous
/// users.
pub struct SystemGenerator {
    db: Arc<dyn Database>,
    invoker: Arc<CompletionInvoker>,
    max_tokens: u32,
}

impl SystemGenerator {
    pub fn new(db: Arc<dyn Database>, invoker: Arc<CompletionInvoker>, max_tokens: u32) -> Self {
        Self {
            db,
            invoker,
            max_tokens,
        }
    }

    /// One blocking model call, no session state.
    pub async fn generate_system(
        &self,
        goal_details: &[GoalDetail],
    ) -> Result<GeneratedSystem, OnboardingError> {
        if goal_details.is_empty() {
            return Err(OnboardingError::InvalidRequest(
                "goalDetails must contain at least one goal".to_string(),
            ));
        }

        let prompt = batch_user_prompt(
            goal_details
                .iter()
                .map(|d| (d.goal.as_str(), d.details.as_str())),
        );
        let raw = self
            .invoker
            .invoke_text(
                vec![ChatMessage::user(prompt)],
                SystemPrompt::Cacheable(Cow::Borrowed(BATCH_SYSTEM_PROMPT)),
                self.max_tokens,
                BATCH_TEMPERATURE,
            )
            .await?;

        let system = GeneratedSystem::parse(&raw).inspect_err(|e| {
            warn!(error = %e, "Batch generation returned an unusable system");
        })?;

        let dangling = system.dangling_references();
        if !dangling.is_empty() {
            warn!(count = dangling.len(), ?dangling, "Generated system has unmatched names");
        }

        info!(
            goals_in = goal_details.len(),
            operations = system.operations.len(),
            goals = system.goals.len(),
            habits = system.habits.len(),
            metrics = system.metrics.len(),
            "System generated"
        );
        Ok(system)
    }

    /// Persist a generated system in the background. The caller does not
    /// wait; a failed write is only logged.
    pub fn stash_draft(&self, draft_id: String, system: GeneratedSystem) {
        let db = Arc::clone(&self.db);
        tokio::spawn(async move {
            match db.save_draft_system(&draft_id, &system).await {
                Ok(()) => info!(draft_id, "Draft system stored"),
                Err(e) => warn!(draft_id, error = %e, "Failed to store draft system"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::{
        CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCompletionRequest,
        ToolCompletionResponse,
    };
    use crate::store::LibSqlBackend;

    const BULK_SYSTEM: &str = r#"```json
{
  "operations": [
    {"name": "Physical Health", "description": "Training, food and recovery"},
    {"name": "Nutrition", "description": "Eating enough to grow"}
  ],
  "goals": [
    {"title": "Bulk to 145lbs", "operation_name": "Physical Health", "goal_type": "metric_based",
     "linked_metric_name": "Body Weight", "subgoals": []}
  ],
  "habits": [
    {"name": "Eat 150g protein", "operation_name": "Nutrition"},
    {"name": "Lift weights", "operation_name": "Physical Health"},
    {"name": "Sleep 8 hours", "operation_name": "Physical Health"}
  ],
  "metrics": [
    {"name": "Body Weight", "unit": "lbs", "optimal_value": 145, "minimum_value": 140,
     "operator": "at_least", "operation_name": "Physical Health"},
    {"name": "Protein", "unit": "g", "optimal_value": null, "minimum_value": null,
     "operator": null, "operation_name": "Nutrition"}
  ],
  "schedule": {"wakeHour": 6, "sleepHour": 22}
}
```"#;

    struct ScriptedLlm {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            assert!(request.system.as_ref().is_some_and(|s| s.is_cacheable()));
            assert_eq!(request.temperature, Some(BATCH_TEMPERATURE));
            self.prompts
                .lock()
                .unwrap()
                .extend(request.messages.into_iter().map(|m| m.content));
            Ok(CompletionResponse {
                content: self.reply.clone(),
                input_tokens: 100,
                output_tokens: 200,
                finish_reason: FinishReason::Stop,
                response_id: None,
            })
        }
        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            unreachable!("batch generation never uses tools")
        }
    }

    async fn generator(reply: &str) -> (SystemGenerator, Arc<ScriptedLlm>, Arc<LibSqlBackend>) {
        let llm = Arc::new(ScriptedLlm::new(reply));
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let invoker = Arc::new(CompletionInvoker::new(llm.clone(), Duration::from_secs(5)));
        (SystemGenerator::new(db.clone(), invoker, 4096), llm, db)
    }

    fn bulk_request() -> Vec<GoalDetail> {
        vec![GoalDetail {
            goal: "bulk to 145lbs".to_string(),
            details: "eat more protein".to_string(),
        }]
    }

    #[tokio::test]
    async fn generates_bulk_system() {
        let (generator, llm, _) = generator(BULK_SYSTEM).await;
        let system = generator.generate_system(&bulk_request()).await.unwrap();

        assert!(!system.operations.is_empty());
        let goal = system
            .goals
            .iter()
            .find(|g| g.title.contains("145"))
            .expect("goal keeps the figure");
        let metric_name = goal.linked_metric_name.as_deref().unwrap();
        assert_eq!(system.metrics.iter().filter(|m| m.name == metric_name).count(), 1);
        assert!(system.schedule.wake_hour <= 23);
        assert!(system.schedule.sleep_hour <= 23);
        assert!(system.dangling_references().is_empty());

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0].contains("bulk to 145lbs"));
        assert!(prompts[0].contains("eat more protein"));
    }

    #[tokio::test]
    async fn assigns_sequential_ids() {
        let (generator, _, _) = generator(BULK_SYSTEM).await;
        let system = generator.generate_system(&bulk_request()).await.unwrap();

        let op_ids: Vec<&str> = system.operations.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(op_ids, ["op-0", "op-1"]);
        assert_eq!(system.goals[0].id, "goal-0");
        assert_eq!(system.habits[2].id, "habit-2");
        assert_eq!(system.metrics[1].id, "metric-1");
        // Names are not turned into ids.
        assert_eq!(system.goals[0].operation_name, "Physical Health");
    }

    #[tokio::test]
    async fn missing_schedule_is_rejected() {
        let reply = r#"{"operations":[{"name":"A","description":""}],"goals":[],"habits":[],"metrics":[]}"#;
        let (generator, _, _) = generator(reply).await;
        let err = generator.generate_system(&bulk_request()).await.unwrap_err();
        assert!(matches!(err, OnboardingError::Generation(ref m) if m.contains("schedule")));
    }

    #[tokio::test]
    async fn empty_goal_list_is_rejected() {
        let (generator, _, _) = generator(BULK_SYSTEM).await;
        let err = generator.generate_system(&[]).await.unwrap_err();
        assert!(matches!(err, OnboardingError::InvalidRequest(_)));
    }

    #[test]
    fn prose_reply_is_a_generation_error() {
        let err = GeneratedSystem::parse("Sure! Here is your system: operations...").unwrap_err();
        assert!(matches!(err, OnboardingError::Generation(_)));
    }

    #[test]
    fn out_of_range_hour_is_rejected() {
        let reply = r#"{"operations":[],"goals":[],"habits":[],"metrics":[],
                        "schedule":{"wakeHour":6,"sleepHour":24}}"#;
        assert!(GeneratedSystem::parse(reply).is_err());
    }

    #[test]
    fn sizes_outside_requested_bounds_pass_through() {
        let ops: Vec<String> = (0..7)
            .map(|i| format!(r#"{{"name":"Op {i}","description":""}}"#))
            .collect();
        let reply = format!(
            r#"{{"operations":[{}],"goals":[],"habits":[],"metrics":[],
                 "schedule":{{"wakeHour":7,"sleepHour":23}}}}"#,
            ops.join(",")
        );
        let system = GeneratedSystem::parse(&reply).unwrap();
        assert_eq!(system.operations.len(), 7);
        assert_eq!(system.operations[6].id, "op-6");
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fence("```\n{\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_fence("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[test]
    fn prose_around_fence_is_ignored() {
        let reply = "Here's your system:\n```json\n{\"operations\":[{\"name\":\"Health\"}],\
            \"goals\":[],\"habits\":[],\"metrics\":[],\
            \"schedule\":{\"wakeHour\":7,\"sleepHour\":23}}\n```\nLet me know if you want changes.";
        let system = GeneratedSystem::parse(reply).unwrap();
        assert_eq!(system.operations[0].name, "Health");
        assert_eq!(system.schedule.wake_hour, 7);
    }

    #[test]
    fn reports_dangling_references() {
        let reply = r#"{"operations":[{"name":"Health"}],
            "goals":[{"title":"Run a 10k","operation_name":"Fitness","linked_metric_name":"Pace"}],
            "habits":[{"name":"Stretch","operation_name":"Health"}],
            "metrics":[],"schedule":{"wakeHour":7,"sleepHour":23}}"#;
        let dangling = GeneratedSystem::parse(reply).unwrap().dangling_references();
        assert_eq!(dangling.len(), 2);
    }

    #[tokio::test]
    async fn stash_draft_persists_in_background() {
        let (generator, _, db) = generator(BULK_SYSTEM).await;
        let system = generator.generate_system(&bulk_request()).await.unwrap();
        generator.stash_draft("draft-abc".to_string(), system.clone());

        let mut stored = None;
        for _ in 0..50 {
            stored = db.get_draft_system("draft-abc").await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, Some(system));
    }
}
