//! `rover-types` – the action vocabulary shared by every Rover crate.
//!
//! The decision service answers each photo with a [`DecisionResponse`]: a
//! journey note plus a short plan of [`Action`]s.  Nothing in a response is
//! trusted until [`DecisionResponse::validate`] has accepted the whole plan.

use std::fmt;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the number of actions accepted from a single response.
pub const MAX_ACTIONS_PER_CYCLE: usize = 3;

/// The closed set of tools the robot can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    MoveForward,
    TurnLeft,
    TurnRight,
    GoBackward,
}

impl ToolName {
    /// Wire name of the tool, as it appears in prompts and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::MoveForward => "move_forward",
            ToolName::TurnLeft => "turn_left",
            ToolName::TurnRight => "turn_right",
            ToolName::GoBackward => "go_backward",
        }
    }

    /// `true` for tools that translate the robot and therefore need a
    /// duration.
    pub fn requires_duration(self) -> bool {
        matches!(self, ToolName::MoveForward | ToolName::GoBackward)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single robot-executable command.
///
/// `duration` is in whole seconds.  It is signed on purpose: zero or negative
/// values must surface as a [`ValidationError`] rather than a decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Action {
    pub tool: ToolName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl Action {
    /// A movement action (`move_forward` / `go_backward`) lasting `seconds`.
    pub fn timed(tool: ToolName, seconds: i64) -> Self {
        Self {
            tool,
            duration: Some(seconds),
        }
    }

    /// A turn action, which never carries a duration.
    pub fn turn(tool: ToolName) -> Self {
        Self {
            tool,
            duration: None,
        }
    }

    /// Check the tool/duration invariant.
    ///
    /// Movement tools need a positive duration; turn tools must not carry one.
    ///
    /// # Errors
    ///
    /// Returns the [`ValidationError`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.tool.requires_duration(), self.duration) {
            (true, None) => Err(ValidationError::MissingDuration { tool: self.tool }),
            (true, Some(d)) if d <= 0 => Err(ValidationError::NonPositiveDuration {
                tool: self.tool,
                duration: d,
            }),
            (false, Some(d)) => Err(ValidationError::UnexpectedDuration {
                tool: self.tool,
                duration: d,
            }),
            _ => Ok(()),
        }
    }
}

/// Structured reply the decision service must produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DecisionResponse {
    /// Free-form reasoning; logged, never acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
    /// One-line summary of what the robot sees and intends.
    pub current_journey_note: String,
    /// The plan for this cycle, executed in order.
    pub next_actions: Vec<Action>,
}

impl DecisionResponse {
    /// Validate the whole response before anything is executed.
    ///
    /// Actions are checked first, in order, and the first failure is returned.
    /// The plan must then hold between 1 and [`MAX_ACTIONS_PER_CYCLE`] actions
    /// and the journey note must contain something other than whitespace.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`]; the caller must discard the entire
    /// response.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for action in &self.next_actions {
            action.validate()?;
        }
        if self.next_actions.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }
        if self.next_actions.len() > MAX_ACTIONS_PER_CYCLE {
            return Err(ValidationError::TooManyActions {
                count: self.next_actions.len(),
                max: MAX_ACTIONS_PER_CYCLE,
            });
        }
        if self.current_journey_note.trim().is_empty() {
            return Err(ValidationError::BlankJourneyNote);
        }
        Ok(())
    }
}

/// Everything the decision client needs for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionRequest {
    pub goal: Option<String>,
    pub journey_notes: Vec<String>,
    pub last_actions: Vec<Action>,
    pub image_path: Option<PathBuf>,
}

/// A decision response that breaks the action contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{tool} requires a duration")]
    MissingDuration { tool: ToolName },

    #[error("{tool} requires a positive duration, got {duration}")]
    NonPositiveDuration { tool: ToolName, duration: i64 },

    #[error("{tool} does not take a duration, got {duration}")]
    UnexpectedDuration { tool: ToolName, duration: i64 },

    #[error("response contains no actions")]
    EmptyPlan,

    #[error("response contains {count} actions, at most {max} are allowed")]
    TooManyActions { count: usize, max: usize },

    #[error("current_journey_note is blank")]
    BlankJourneyNote,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(actions: Vec<Action>) -> DecisionResponse {
        DecisionResponse {
            thoughts: None,
            current_journey_note: "hallway with a red door".to_string(),
            next_actions: actions,
        }
    }

    #[test]
    fn movement_tools_need_positive_duration() {
        for tool in [ToolName::MoveForward, ToolName::GoBackward] {
            assert!(Action::timed(tool, 1).validate().is_ok());
            assert!(Action::timed(tool, 30).validate().is_ok());
            assert_eq!(
                Action::turn(tool).validate(),
                Err(ValidationError::MissingDuration { tool })
            );
            assert_eq!(
                Action::timed(tool, 0).validate(),
                Err(ValidationError::NonPositiveDuration { tool, duration: 0 })
            );
            assert!(matches!(
                Action::timed(tool, -4).validate(),
                Err(ValidationError::NonPositiveDuration { .. })
            ));
        }
    }

    #[test]
    fn turn_tools_reject_any_duration() {
        for tool in [ToolName::TurnLeft, ToolName::TurnRight] {
            assert!(Action::turn(tool).validate().is_ok());
            for d in [-1, 0, 1, 5] {
                assert_eq!(
                    Action::timed(tool, d).validate(),
                    Err(ValidationError::UnexpectedDuration { tool, duration: d })
                );
            }
        }
    }

    #[test]
    fn tool_names_use_snake_case_on_the_wire() {
        let json = serde_json::to_string(&ToolName::GoBackward).unwrap();
        assert_eq!(json, "\"go_backward\"");
        let tool: ToolName = serde_json::from_str("\"turn_right\"").unwrap();
        assert_eq!(tool, ToolName::TurnRight);
        assert_eq!(ToolName::MoveForward.to_string(), "move_forward");
    }

    #[test]
    fn unknown_tool_fails_to_deserialize() {
        let result = serde_json::from_str::<Action>(r#"{"tool":"jump","duration":1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn turn_action_serializes_without_duration() {
        let json = serde_json::to_string(&Action::turn(ToolName::TurnLeft)).unwrap();
        assert_eq!(json, r#"{"tool":"turn_left"}"#);
    }

    #[test]
    fn response_parses_service_payload() {
        let raw = r#"{
            "current_journey_note": "saw a doorway",
            "next_actions": [
                {"tool": "move_forward", "duration": 2},
                {"tool": "turn_left"}
            ]
        }"#;
        let parsed: DecisionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.thoughts, None);
        assert_eq!(parsed.current_journey_note, "saw a doorway");
        assert_eq!(
            parsed.next_actions,
            vec![
                Action::timed(ToolName::MoveForward, 2),
                Action::turn(ToolName::TurnLeft)
            ]
        );
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn response_without_note_is_a_decode_error() {
        let raw = r#"{"next_actions":[{"tool":"turn_left"}]}"#;
        assert!(serde_json::from_str::<DecisionResponse>(raw).is_err());
    }

    #[test]
    fn response_validation_is_fail_fast_on_first_bad_action() {
        let resp = response(vec![
            Action::timed(ToolName::MoveForward, 1),
            Action::timed(ToolName::TurnRight, 2),
            Action::turn(ToolName::GoBackward),
        ]);
        assert_eq!(
            resp.validate(),
            Err(ValidationError::UnexpectedDuration {
                tool: ToolName::TurnRight,
                duration: 2
            })
        );
    }

    #[test]
    fn response_plan_size_is_bounded() {
        assert_eq!(response(vec![]).validate(), Err(ValidationError::EmptyPlan));

        let four = vec![Action::turn(ToolName::TurnLeft); 4];
        assert_eq!(
            response(four).validate(),
            Err(ValidationError::TooManyActions { count: 4, max: 3 })
        );

        let three = vec![Action::turn(ToolName::TurnLeft); 3];
        assert!(response(three).validate().is_ok());
    }

    #[test]
    fn blank_journey_note_is_rejected() {
        let mut resp = response(vec![Action::turn(ToolName::TurnLeft)]);
        resp.current_journey_note = "   ".to_string();
        assert_eq!(resp.validate(), Err(ValidationError::BlankJourneyNote));
    }

    #[test]
    fn response_schema_lists_every_tool() {
        let schema = serde_json::to_value(schemars::schema_for!(DecisionResponse)).unwrap();
        let text = schema.to_string();
        for tool in ["move_forward", "turn_left", "turn_right", "go_backward"] {
            assert!(text.contains(tool), "schema must mention {tool}");
        }
        let required = schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "current_journey_note"));
        assert!(required.iter().any(|v| v == "next_actions"));
    }
}
