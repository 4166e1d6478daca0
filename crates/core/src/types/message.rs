//! Wire messages for the relay protocol
//!
//! The `channel` names are the compatibility contract with existing clients
//! and must appear byte-for-byte in the serialized JSON. Terminal byte
//! payloads travel base64-encoded inside the frame.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::{JobEvent, JobStatus, TelemetrySnapshot};
use crate::auth::Role;
use crate::error::{CoreError, Result};

/// Any frame on a relay connection
///
/// Deserialization tries each family in order; the families share no channel
/// names, so the untagged union is unambiguous. An unknown channel fails to
/// deserialize and the frame is dropped by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RelayMessage {
    /// Handshake and availability frames
    Control(ControlMessage),
    /// Observer-originated commands
    Command(ObserverCommand),
    /// Device-originated events
    Event(DeviceEvent),
}

/// Connection lifecycle frames
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "channel", content = "payload")]
pub enum ControlMessage {
    /// First frame on every connection; a bad credential closes the
    /// connection with no response
    #[serde(rename = "hello")]
    Hello { role: Role, token: String },

    /// Device availability, relay to observers
    #[serde(rename = "pi:online")]
    PiOnline,

    #[serde(rename = "pi:offline")]
    PiOffline,
}

/// Commands issued by observers, forwarded verbatim to the device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "channel", content = "payload")]
pub enum ObserverCommand {
    #[serde(rename = "terminal:start")]
    TerminalStart,

    /// Raw keystrokes, base64-encoded
    #[serde(rename = "terminal:input")]
    TerminalInput { data: String },

    #[serde(rename = "terminal:resize")]
    TerminalResize { cols: u16, rows: u16 },

    #[serde(rename = "hacking:start")]
    HackingStart {
        #[serde(
            rename = "systemPrompt",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        system_prompt: Option<String>,
    },

    #[serde(rename = "hacking:stop")]
    HackingStop,
}

/// Events produced by the device, broadcast verbatim to observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "channel", content = "payload")]
pub enum DeviceEvent {
    /// Shell output chunk, base64-encoded, in emission order
    #[serde(rename = "terminal:output")]
    TerminalOutput { data: String },

    #[serde(rename = "stats")]
    Stats(TelemetrySnapshot),

    #[serde(rename = "hacking:output")]
    HackingOutput(JobEvent),

    #[serde(rename = "hacking:status")]
    HackingStatus(JobStatus),
}

impl ObserverCommand {
    /// Create a terminal input command from raw bytes
    pub fn terminal_input(bytes: &[u8]) -> Self {
        Self::TerminalInput {
            data: BASE64.encode(bytes),
        }
    }
}

impl DeviceEvent {
    /// Create a terminal output event from raw bytes
    pub fn terminal_output(bytes: &[u8]) -> Self {
        Self::TerminalOutput {
            data: BASE64.encode(bytes),
        }
    }
}

/// Decode a base64 terminal payload back into raw bytes
pub fn decode_terminal_bytes(data: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(data)
        .map_err(|e| CoreError::InvalidMessageFormat(format!("bad base64 payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_names_are_wire_contract() {
        let cases: Vec<(RelayMessage, &str)> = vec![
            (
                RelayMessage::Command(ObserverCommand::TerminalStart),
                "terminal:start",
            ),
            (
                RelayMessage::Command(ObserverCommand::terminal_input(b"ls\n")),
                "terminal:input",
            ),
            (
                RelayMessage::Command(ObserverCommand::TerminalResize { cols: 80, rows: 24 }),
                "terminal:resize",
            ),
            (
                RelayMessage::Command(ObserverCommand::HackingStart {
                    system_prompt: None,
                }),
                "hacking:start",
            ),
            (
                RelayMessage::Command(ObserverCommand::HackingStop),
                "hacking:stop",
            ),
            (
                RelayMessage::Event(DeviceEvent::terminal_output(b"$ ")),
                "terminal:output",
            ),
            (
                RelayMessage::Event(DeviceEvent::Stats(TelemetrySnapshot::default())),
                "stats",
            ),
            (
                RelayMessage::Event(DeviceEvent::HackingStatus(JobStatus::Running)),
                "hacking:status",
            ),
            (RelayMessage::Control(ControlMessage::PiOnline), "pi:online"),
            (
                RelayMessage::Control(ControlMessage::PiOffline),
                "pi:offline",
            ),
        ];

        for (msg, channel) in cases {
            let value = serde_json::to_value(&msg).unwrap();
            assert_eq!(value["channel"], channel, "wrong tag for {:?}", msg);
        }
    }

    #[test]
    fn test_resize_wire_shape() {
        let msg = ObserverCommand::TerminalResize { cols: 120, rows: 40 };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"channel": "terminal:resize", "payload": {"cols": 120, "rows": 40}})
        );
    }

    #[test]
    fn test_hacking_status_payload_is_string() {
        let msg = DeviceEvent::HackingStatus(JobStatus::Completed);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"channel": "hacking:status", "payload": "completed"})
        );
    }

    #[test]
    fn test_hacking_start_system_prompt_field_name() {
        let msg = ObserverCommand::HackingStart {
            system_prompt: Some("scan the local network".into()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "channel": "hacking:start",
                "payload": {"systemPrompt": "scan the local network"}
            })
        );

        // The prompt is optional on the wire
        let decoded: ObserverCommand =
            serde_json::from_value(json!({"channel": "hacking:start", "payload": {}})).unwrap();
        assert_eq!(
            decoded,
            ObserverCommand::HackingStart {
                system_prompt: None
            }
        );
    }

    #[test]
    fn test_untagged_union_routes_by_channel() {
        let cmd: RelayMessage = serde_json::from_value(json!({
            "channel": "terminal:input",
            "payload": {"data": "aGVsbG8="}
        }))
        .unwrap();
        assert!(matches!(cmd, RelayMessage::Command(_)));

        let event: RelayMessage = serde_json::from_value(json!({
            "channel": "hacking:output",
            "payload": {"type": "info", "content": "starting"}
        }))
        .unwrap();
        assert!(matches!(event, RelayMessage::Event(_)));

        let control: RelayMessage =
            serde_json::from_value(json!({"channel": "pi:offline"})).unwrap();
        assert_eq!(control, RelayMessage::Control(ControlMessage::PiOffline));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let result: std::result::Result<RelayMessage, _> =
            serde_json::from_value(json!({"channel": "vfs:list", "payload": {}}));
        assert!(result.is_err());
    }

    #[test]
    fn test_hello_roundtrip() {
        let msg = RelayMessage::Control(ControlMessage::Hello {
            role: Role::Device,
            token: "pi-secret-token".into(),
        });
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"device\""));
        let decoded: RelayMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_terminal_bytes_roundtrip() {
        let bytes: Vec<u8> = (0..=255).collect();
        let DeviceEvent::TerminalOutput { data } = DeviceEvent::terminal_output(&bytes) else {
            panic!("expected output event");
        };
        assert_eq!(decode_terminal_bytes(&data).unwrap(), bytes);
    }

    #[test]
    fn test_bad_base64_payload() {
        let result = decode_terminal_bytes("definitely not base64!");
        assert!(matches!(result, Err(CoreError::InvalidMessageFormat(_))));
    }
}
