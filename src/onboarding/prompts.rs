//! Phase catalog: the instruction the assistant follows in each phase, plus
//! the batch-generation prompts.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::llm::SystemPrompt;

use super::state::Phase;
use super::tools::{CREATE_GOALS, CREATE_HABITS, CREATE_METRICS, CREATE_OPERATIONS, SET_SCHEDULE};

const BASE: &str = "\
You are a warm, focused coach helping a new user set up their personal operating system: \
the life areas they run (operations), their goals, daily habits, numeric metrics and sleep schedule.

Guidelines:
- Be concise: 1-3 sentences per reply. Ask ONE question at a time.
- Acknowledge what the user shares before asking the next question.
- If an answer is vague, ask one brief follow-up before recording anything.
- Keep the user's own words and figures (\"145lbs\", \"8 hours\") when you record them.
- Record data only through the provided tools, and only once the user has given enough detail.
- Always include a short message to the user, even when you call a tool.";

const OPERATIONS: &str = "\
CURRENT PHASE: Operations
Collect: the 2-6 major areas of life the user wants to run deliberately \
(e.g. Physical Health, Career, Relationships, Finances).

Ask what areas of life matter most right now. Suggest a name and one-line description for each \
area they mention. When the user has agreed on their areas, call create_operations with all of them \
(at most 6).";

const GOALS: &str = "\
CURRENT PHASE: Goals
Collect: for each operation, one or more goals.

For every goal decide whether it breaks into concrete steps (subgoal_based, list the steps in order) \
or is tracked by a number (metric_based, name the metric). Use the operation's exact name in \
operation_name. When the goals for the area under discussion are clear, call create_goals.";

const HABITS: &str = "\
CURRENT PHASE: Habits
Collect: daily yes/no practices that move the user's goals forward.

Propose a few habits that fit the goals you recorded and let the user adjust them. Link each habit \
to an operation by its exact name. When the list is settled, call create_habits.";

const METRICS: &str = "\
CURRENT PHASE: Metrics
Collect: numbers the user will log each day.

For each metric capture a unit and, if the user wants a daily judgment, an optimal value, a minimum \
value and an operator (at_least, at_most or exactly). If they only want to record the number, leave \
values and operator null. Link each metric to an operation by its exact name. When done, call \
create_metrics.";

const SCHEDULE: &str = "\
CURRENT PHASE: Schedule
Collect: the hour the user usually wakes up and the hour they go to sleep (0-23, 24-hour clock).

Ask about their usual sleep rhythm. When you know both hours, call set_schedule.";

const COMPLETE: &str = "\
CURRENT PHASE: Complete
The system is set up. Answer questions about it briefly; do not record anything new.";

/// One catalog entry.
#[derive(Debug)]
pub struct PhaseEntry {
    /// Base guidelines plus the phase's instructions.
    pub instruction: String,
    /// The tool this phase expects the model to call.
    pub intended_tool: Option<&'static str>,
}

/// Phase → instruction table, built once on first use and never mutated.
static CATALOG: LazyLock<HashMap<Phase, PhaseEntry>> = LazyLock::new(|| {
    [
        (Phase::Operations, OPERATIONS, Some(CREATE_OPERATIONS)),
        (Phase::Goals, GOALS, Some(CREATE_GOALS)),
        (Phase::Habits, HABITS, Some(CREATE_HABITS)),
        (Phase::Metrics, METRICS, Some(CREATE_METRICS)),
        (Phase::Schedule, SCHEDULE, Some(SET_SCHEDULE)),
        (Phase::Complete, COMPLETE, None),
    ]
    .into_iter()
    .map(|(phase, text, intended_tool)| {
        (
            phase,
            PhaseEntry {
                instruction: format!("{BASE}\n\n{text}"),
                intended_tool,
            },
        )
    })
    .collect()
});

/// Catalog entry for a phase.
pub fn phase_entry(phase: Phase) -> &'static PhaseEntry {
    // Every Phase variant is inserted above.
    &CATALOG[&phase]
}

/// System instruction for a turn.
///
/// Static catalog text is `Cacheable`. The goals phase with an operation in
/// focus appends that operation's name, so it is always `Fresh`.
pub fn phase_instruction(phase: Phase, current_operation: Option<&str>) -> SystemPrompt {
    let entry = phase_entry(phase);
    match (phase, current_operation.map(str::trim)) {
        (Phase::Goals, Some(operation)) if !operation.is_empty() => SystemPrompt::Fresh(format!(
            "{}\n\nThe operation under discussion is \"{operation}\". Only record goals for this \
             operation and set operation_name to exactly \"{operation}\".",
            entry.instruction
        )),
        _ => SystemPrompt::Cacheable(Cow::Borrowed(entry.instruction.as_str())),
    }
}

/// System prompt for one-shot full-system generation.
pub const BATCH_SYSTEM_PROMPT: &str = "\
You design a personal operating system from a user's goals. Respond with ONLY a JSON object, \
no explanation, with exactly these top-level keys:

{
  \"operations\": [{\"name\": string, \"description\": string}],
  \"goals\": [{\"title\": string, \"operation_name\": string, \"goal_type\": \"metric_based\" | \"subgoal_based\",
              \"linked_metric_name\": string, \"subgoals\": [string]}],
  \"habits\": [{\"name\": string, \"operation_name\": string}],
  \"metrics\": [{\"name\": string, \"unit\": string, \"optimal_value\": number | null,
                \"minimum_value\": number | null, \"operator\": \"at_least\" | \"at_most\" | \"exactly\" | null,
                \"operation_name\": string}],
  \"schedule\": {\"wakeHour\": integer 0-23, \"sleepHour\": integer 0-23}
}

Rules:
- 2-4 operations, 3-8 habits, 2-6 metrics.
- Every goal's operation_name must exactly match an operation name, and its linked_metric_name must \
exactly match a metric name.
- Every habit and metric operation_name must exactly match an operation name.
- Keep the user's figures verbatim in goal titles (\"bulk to 145lbs\" stays \"145lbs\").
- Use null for optimal_value, minimum_value and operator when a metric is only recorded, not judged.";

/// User prompt listing the goals and how the user plans to pursue them.
pub fn batch_user_prompt<'a>(goal_details: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    let lines: Vec<String> = goal_details
        .into_iter()
        .enumerate()
        .map(|(i, (goal, approach))| format!("{}. Goal: {goal}\n   Approach: {approach}", i + 1))
        .collect();
    format!(
        "Build my system from these goals:\n\n{}\n\nRespond with ONLY valid JSON.",
        lines.join("\n")
    )
}
