//! Text vocabulary spoken with clients

use crate::domain::models::{ActuatorKind, ClientAnswer};

/// Liveness ping pushed every heartbeat interval
pub const PING: &str = "ping";

/// Frames a client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Press(ActuatorKind),
}

impl ClientCommand {
    /// Only the exact literals `gate` and `garage` are commands
    pub fn parse(text: &str) -> Option<Self> {
        ActuatorKind::from_name(text).map(ClientCommand::Press)
    }
}

/// Frames the server sends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage {
    Ping,
    Connected(ActuatorKind),
    ConnectError(ActuatorKind),
    Result(ActuatorKind, ClientAnswer),
}

impl ServerMessage {
    pub fn to_text(&self) -> String {
        match self {
            Self::Ping => PING.to_string(),
            Self::Connected(kind) => format!("{}connect", kind.as_str()),
            Self::ConnectError(kind) => format!("{}error", kind.as_str()),
            Self::Result(kind, answer) => format!("{}:{}", kind.as_str(), answer.as_str()),
        }
    }
}
