//! Plan/task helper tracking over a transcript.

use std::collections::{BTreeSet, HashSet};

use kgate_protocol::chat::{ContentPart, Message, ToolSpec};
use kgate_protocol::kiro::{PlanModeMeta, PlanTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlanAction {
    Enter,
    Exit,
}

impl PlanAction {
    fn classify(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "task" | "plan" | "launchplanmode" | "launchplanagent" => Some(PlanAction::Enter),
            "exitplanmode" | "exitplan" | "exitplanagent" => Some(PlanAction::Exit),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Enter => "enter",
            PlanAction::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone)]
struct Pending {
    id: String,
    name: String,
    action: PlanAction,
}

#[derive(Debug, Default)]
struct PlanModeTracker {
    available: Vec<String>,
    /// Helper calls without a result yet, in call order.
    pending: Vec<Pending>,
    last: Option<(PlanAction, String)>,
    seen: bool,
}

impl PlanModeTracker {
    fn observe(&mut self, message: &Message) {
        for part in message.parts() {
            match part {
                ContentPart::ToolUse { id, name, .. } => {
                    let name = name.trim().to_string();
                    let id = id.trim().to_string();
                    let Some(action) = PlanAction::classify(&name) else {
                        continue;
                    };
                    if id.is_empty() {
                        continue;
                    }
                    self.pending.retain(|p| p.id != id);
                    self.pending.push(Pending {
                        id,
                        name: name.clone(),
                        action,
                    });
                    self.last = Some((action, name));
                    self.seen = true;
                }
                ContentPart::ToolResult { tool_use_id, .. } => {
                    let id = tool_use_id.trim();
                    let before = self.pending.len();
                    self.pending.retain(|p| p.id != id);
                    if self.pending.len() != before {
                        self.seen = true;
                    }
                }
                _ => {}
            }
        }
    }

    fn pending_ids(&self, action: PlanAction) -> Vec<&str> {
        let ids: BTreeSet<&str> = self
            .pending
            .iter()
            .filter(|p| p.action == action)
            .map(|p| p.id.as_str())
            .collect();
        ids.into_iter().collect()
    }

    fn directive(&self) -> Option<String> {
        let entering = self.pending_ids(PlanAction::Enter);
        if !entering.is_empty() {
            return Some(format!(
                "Plan directive: Task/plan agents ({}) are running; wait for their tool results before concluding.",
                entering.join(", ")
            ));
        }
        let exiting = self.pending_ids(PlanAction::Exit);
        if !exiting.is_empty() {
            return Some(format!(
                "Plan directive: ExitPlanMode requested via {}; acknowledge the exit once the tool returns.",
                exiting.join(", ")
            ));
        }
        if matches!(self.last, Some((PlanAction::Exit, _))) {
            return Some(
                "Plan directive: Plan helpers have exited; return to direct responses until a new Task agent is launched."
                    .to_string(),
            );
        }
        if !self.available.is_empty() {
            return Some(format!(
                "Plan directive: Plan helpers available ({}). Launch Task agents when multi-step orchestration is needed.",
                self.available.join(", ")
            ));
        }
        None
    }

    fn export(self) -> Option<(PlanModeMeta, Option<String>)> {
        if self.available.is_empty() && !self.seen {
            return None;
        }
        let directive = self.directive();
        let meta = PlanModeMeta {
            active: self.pending.iter().any(|p| p.action == PlanAction::Enter),
            pending: self
                .pending
                .iter()
                .map(|p| PlanTransition {
                    tool_use_id: p.id.clone(),
                    name: p.name.clone(),
                    action: p.action.as_str().to_string(),
                })
                .collect(),
            last_transition: self.last.as_ref().map(|(action, _)| action.as_str().to_string()),
            last_tool: self.last.map(|(_, name)| name),
            available: self.available,
        };
        Some((meta, directive))
    }
}

/// Declared plan helpers, sorted and de-duplicated case-insensitively.
fn available_helpers(tools: &[ToolSpec]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names: Vec<String> = tools
        .iter()
        .map(|tool| tool.name.trim())
        .filter(|name| PlanAction::classify(name).is_some())
        .filter(|name| seen.insert(name.to_ascii_lowercase()))
        .map(str::to_string)
        .collect();
    names.sort();
    names
}

/// Plan-mode metadata and a system directive, or `None` when neither the
/// declared tools nor the transcript involve plan helpers.
pub(crate) fn plan_mode(
    tools: &[ToolSpec],
    messages: &[Message],
) -> Option<(PlanModeMeta, Option<String>)> {
    let mut tracker = PlanModeTracker {
        available: available_helpers(tools),
        ..Default::default()
    };
    for message in messages {
        tracker.observe(message);
    }
    tracker.export()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgate_protocol::chat::ChatRequest;
    use serde_json::json;

    fn request(value: serde_json::Value) -> ChatRequest {
        serde_json::from_value(value).expect("request")
    }

    #[test]
    fn unanswered_task_call_is_active() {
        let req = request(json!({
            "messages": [
                {"role": "user", "content": "start planning"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Launching background agent"},
                    {"type": "tool_use", "name": "Task", "id": "plan_123", "input": {"goal": "audit"}}
                ]},
                {"role": "user", "content": "waiting..."}
            ],
            "tools": [
                {"name": "Task", "description": "Launch plan agents."},
                {"name": "ExitPlanMode", "description": "Stop plan mode."}
            ]
        }));
        let (meta, directive) = plan_mode(&req.tools, &req.messages).expect("plan mode");
        assert!(meta.active);
        assert_eq!(meta.available, ["ExitPlanMode", "Task"]);
        assert_eq!(meta.pending[0].tool_use_id, "plan_123");
        assert_eq!(meta.pending[0].action, "enter");
        assert_eq!(meta.last_tool.as_deref(), Some("Task"));
        assert!(directive.is_some_and(|d| d.contains("(plan_123) are running")));
    }

    #[test]
    fn answered_exit_clears_pending() {
        let req = request(json!({
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "name": "ExitPlanMode", "id": "x1", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "x1", "content": "ok"}
                ]}
            ]
        }));
        let (meta, directive) = plan_mode(&req.tools, &req.messages).expect("plan mode");
        assert!(!meta.active);
        assert!(meta.pending.is_empty());
        assert_eq!(meta.last_transition.as_deref(), Some("exit"));
        assert!(directive.is_some_and(|d| d.contains("have exited")));
    }

    #[test]
    fn unrelated_tools_produce_nothing() {
        let req = request(json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"name": "Read"}]
        }));
        assert!(plan_mode(&req.tools, &req.messages).is_none());
    }
}
