// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::agbot::{PlantSite, TendReport};
use crate::motion::{Bounds, MotionError};

// Command from dispatcher/scheduler -> runtime
// Tagged by "action", eg. {"action": "move_to", "x": 120.0, "y": 40.0}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Stop,
    MoveTo { x: f64, y: f64 },
    MoveRelative { dx: f64, dy: f64 },
    Probe,
    Home,
    FindSize,
    /// Home and re-measure the workspace, then park
    Recalibrate,
    /// Re-home the probe lift and measure how far it drops
    MeasureThrow,
    Water { ml: f64 },
    Purge,
    Tend(PlantSite),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Stop => "stop",
            Command::MoveTo { .. } => "move_to",
            Command::MoveRelative { .. } => "move_relative",
            Command::Probe => "probe",
            Command::Home => "home",
            Command::FindSize => "find_size",
            Command::Recalibrate => "recalibrate",
            Command::MeasureThrow => "measure_throw",
            Command::Water { .. } => "water",
            Command::Purge => "purge",
            Command::Tend(_) => "tend",
        }
    }
}

// Outcome of one command, runtime -> dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    Done { action: String },
    Bounds { x_max: f64, y_max: f64 },
    Reading { value: f64 },
    Throw { mm: f64 },
    Tended(TendReport),
    Rejected { action: String, reason: String },
}

impl Reply {
    pub fn done(command: &Command) -> Self {
        Reply::Done {
            action: command.name().to_string(),
        }
    }

    pub fn rejected(command: &Command, error: &MotionError) -> Self {
        Reply::Rejected {
            action: command.name().to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<Bounds> for Reply {
    fn from(bounds: Bounds) -> Self {
        Reply::Bounds {
            x_max: bounds.x_max.value(),
            y_max: bounds.y_max.value(),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    /// Homed and waiting for commands
    Ok,
    /// Executing a command
    Busy,
    /// Not homed (startup, or a home was interrupted)
    Unhomed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json_shape() {
        let cmd: Command = serde_json::from_str(r#"{"action": "move_to", "x": 120.0, "y": 40}"#).unwrap();
        assert_eq!(cmd, Command::MoveTo { x: 120.0, y: 40.0 });

        let cmd: Command = serde_json::from_str(r#"{"action": "stop"}"#).unwrap();
        assert_eq!(cmd, Command::Stop);

        let json = serde_json::to_string(&Command::Water { ml: 2.5 }).unwrap();
        assert_eq!(json, r#"{"action":"water","ml":2.5}"#);
    }

    #[test]
    fn test_tend_command_carries_site() {
        let cmd: Command = serde_json::from_str(
            r#"{"action": "tend", "name": "basil", "sense": [10, 20], "water": [12, 20],
                "moisture_threshold": 40, "ml_response": 5}"#,
        )
        .unwrap();
        match cmd {
            Command::Tend(site) => {
                assert_eq!(site.name, "basil");
                assert_eq!(site.water, (12.0, 20.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_throw_reply_shape() {
        let cmd: Command = serde_json::from_str(r#"{"action": "measure_throw"}"#).unwrap();
        assert_eq!(cmd, Command::MeasureThrow);
        let json = serde_json::to_string(&Reply::Throw { mm: 15.5 }).unwrap();
        assert_eq!(json, r#"{"result":"throw","mm":15.5}"#);
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"action": "dance"}"#).is_err());
    }

    #[test]
    fn test_rejected_reply_carries_reason() {
        let reply = Reply::rejected(&Command::Probe, &MotionError::BoundsUnset);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["result"], "rejected");
        assert_eq!(json["action"], "probe");
        assert!(json["reason"].as_str().unwrap().contains("bounds"));
    }

    #[test]
    fn test_health_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::Unhomed).unwrap(), r#""unhomed""#);
    }
}
