// src/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mental-state class. Persisted as its integer code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Label {
    Relaxing,
    Focused,
}

impl Label {
    pub const ALL: [Label; 2] = [Label::Relaxing, Label::Focused];

    pub fn code(self) -> u8 {
        match self {
            Label::Relaxing => 0,
            Label::Focused => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Label::Relaxing),
            1 => Some(Label::Focused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Relaxing => "Relaxing",
            Label::Focused => "Focused",
        }
    }

    /// Name of the user-record flag set once this class has been collected.
    pub fn collected_flag(self) -> &'static str {
        match self {
            Label::Relaxing => "relaxed_data_collected",
            Label::Focused => "focused_data_collected",
        }
    }
}

impl From<Label> for u8 {
    fn from(label: Label) -> u8 {
        label.code()
    }
}

impl TryFrom<u8> for Label {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Label::from_code(code).ok_or_else(|| format!("invalid label code {code}"))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "relaxing" | "relaxed" | "relax" => Ok(Label::Relaxing),
            "1" | "focused" | "focus" => Ok(Label::Focused),
            other => Err(format!("unknown state '{other}' (expected Relaxing or Focused)")),
        }
    }
}

/// Which streaming activity owns the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Collecting(Label),
    Predicting,
}

impl Mode {
    pub fn is_idle(&self) -> bool {
        matches!(self, Mode::Idle)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Idle => f.write_str("idle"),
            Mode::Collecting(label) => write!(f, "collecting ({label})"),
            Mode::Predicting => f.write_str("predicting"),
        }
    }
}

/// Snapshot returned by the orchestrator's status query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub mode: Mode,
    pub identity: Option<String>,
    pub running: bool,
}

impl SessionStatus {
    pub fn active_label(&self) -> Option<Label> {
        match self.mode {
            Mode::Collecting(label) => Some(label),
            _ => None,
        }
    }
}

/// One smoothed output of the prediction worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmoothedPrediction {
    pub label: Label,
    /// Raw per-second predictions the vote was taken over, oldest first.
    pub votes: Vec<Label>,
}

impl SmoothedPrediction {
    pub fn focused_votes(&self) -> usize {
        self.votes.iter().filter(|l| **l == Label::Focused).count()
    }
}

impl fmt::Display for SmoothedPrediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_codes_round_trip_through_json() {
        let json = serde_json::to_string(&Label::Focused).unwrap();
        assert_eq!(json, "1");
        let back: Label = serde_json::from_str("0").unwrap();
        assert_eq!(back, Label::Relaxing);
        assert!(serde_json::from_str::<Label>("2").is_err());
    }

    #[test]
    fn label_parses_user_spellings() {
        assert_eq!("Focused".parse::<Label>().unwrap(), Label::Focused);
        assert_eq!("relaxed".parse::<Label>().unwrap(), Label::Relaxing);
        assert!("sleepy".parse::<Label>().is_err());
    }
}
