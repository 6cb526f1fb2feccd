use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::console::stats::StatsSample;

/// Primary key of a server row in the panel database. Containers are named
/// after it (`minecraft_server_{id}`).
pub type ServerId = i64;

/// Severity tag attached to every console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warn,
    Success,
    Debug,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warn => "WARN",
            Severity::Success => "SUCCESS",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
        }
    }
}

/// Where a console line came from: the container's own output, or an
/// operator command echoed back to every observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Container,
    Command,
}

/// One console line, immutable once created.
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub server_id: ServerId,
    pub severity: Severity,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
}

impl LogEvent {
    pub fn container(server_id: ServerId, severity: Severity, text: String) -> Self {
        Self {
            server_id,
            severity,
            text,
            timestamp: Utc::now(),
            origin: Origin::Container,
        }
    }

    /// Synthetic event echoing an operator command. The panel frontend
    /// renders these with a `> ` prefix and a COMMAND level badge.
    pub fn command(server_id: ServerId, command: &str) -> Self {
        Self {
            server_id,
            severity: Severity::Info,
            text: format!("> {command}"),
            timestamp: Utc::now(),
            origin: Origin::Command,
        }
    }

    /// The level string the wire protocol and the history table carry.
    /// Command echoes are tagged COMMAND regardless of severity.
    pub fn log_level(&self) -> &'static str {
        match self.origin {
            Origin::Command => "COMMAND",
            Origin::Container => self.severity.as_str(),
        }
    }
}

/// Server-to-client frames on the console and stats sockets.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleMessage {
    Log {
        message: String,
        log_level: String,
        timestamp: DateTime<Utc>,
    },
    Stats {
        data: StatsSample,
    },
    Error {
        message: String,
    },
    Info {
        message: String,
    },
}

impl From<&LogEvent> for ConsoleMessage {
    fn from(event: &LogEvent) -> Self {
        ConsoleMessage::Log {
            message: event.text.clone(),
            log_level: event.log_level().to_string(),
            timestamp: event.timestamp,
        }
    }
}

/// Client-to-server frames on the console socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Command { command: String },
    GetHistory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_events_carry_command_level_and_prefix() {
        let event = LogEvent::command(7, "stop");
        assert_eq!(event.text, "> stop");
        assert_eq!(event.log_level(), "COMMAND");
        assert_eq!(event.origin, Origin::Command);
    }

    #[test]
    fn log_frame_wire_shape() {
        let event = LogEvent::container(3, Severity::Warn, "low memory".to_string());
        let json = serde_json::to_value(ConsoleMessage::from(&event)).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["message"], "low memory");
        assert_eq!(json["log_level"], "WARN");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn client_frames_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"command","command":"say hi"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Command { command } if command == "say hi"));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"get_history"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::GetHistory));
    }
}
