// Operator command sent back to the device
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("expected \"<name>,<state>\" but got {0:?}")]
    Malformed(String),
    #[error("command target name is empty")]
    EmptyTarget,
    #[error("desired state is not an integer: {0:?}")]
    InvalidState(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub target_name: String,
    pub desired_state: i64,
}

impl Command {
    pub fn new(target_name: impl Into<String>, desired_state: i64) -> Self {
        Self {
            target_name: target_name.into(),
            desired_state,
        }
    }

    /// Wire encoding published on the device command topic.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.target_name, self.desired_state)
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (name, state) = raw
            .split_once(',')
            .ok_or_else(|| CommandError::Malformed(raw.to_string()))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(CommandError::EmptyTarget);
        }

        let state = state.trim();
        let desired_state = state
            .parse::<i64>()
            .map_err(|_| CommandError::InvalidState(state.to_string()))?;

        Ok(Self::new(name, desired_state))
    }
}
