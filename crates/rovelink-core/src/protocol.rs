//! Wire protocol for the device link.
//!
//! All frames are JSON text. Outbound traffic is either a [`Command`]
//! (`{"action", "value"?, "timestamp"}`) or a [`CustomMessage`] envelope
//! (`{"type": "custom", "data", "timestamp"}`). Inbound frames are arbitrary
//! JSON objects whose `type` field is interpreted by listeners; only
//! `heartbeat` and `error` are recognised here.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Close code for an intentional, normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Inbound `type` consumed by the session layer.
pub const TYPE_HEARTBEAT: &str = "heartbeat";

/// Inbound `type` for device-reported errors.
pub const TYPE_ERROR: &str = "error";

/// Action name of the liveness probe sent while connected.
pub const ACTION_PING: &str = "ping";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(elapsed).unwrap_or(u64::MAX)
}

/// An outbound action/value command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_value"
    )]
    pub value: Option<f64>,
    pub timestamp: u64,
}

impl Command {
    /// Build a command stamped with the current time.
    pub fn new(action: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            action: action.into(),
            value,
            timestamp: now_millis(),
        }
    }

    /// The heartbeat probe.
    pub fn ping() -> Self {
        Self::new(ACTION_PING, None)
    }

    /// Serialize to a JSON text frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Integral values go out as JSON integers (`92`, not `92.0`); the device
/// firmware parses joint angles as integers.
#[allow(clippy::ref_option, clippy::cast_possible_truncation, clippy::float_cmp)]
fn serialize_value<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => {
            serializer.serialize_i64(*v as i64)
        }
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_none(),
    }
}

/// Envelope for payloads that are not a simple action/value command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: u64,
}

impl CustomMessage {
    pub fn new(data: Value) -> Self {
        Self {
            kind: "custom".to_string(),
            data,
            timestamp: now_millis(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A decoded inbound payload. The shape is owned by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundMessage(Value);

impl InboundMessage {
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// The `type` discriminator, if present and a string.
    pub fn message_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `message` field of a device error report.
    pub fn error_message(&self) -> Option<&str> {
        self.0.get("message").and_then(Value::as_str)
    }

    pub const fn as_value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Liveness acknowledgement; never forwarded to listeners.
    Heartbeat,
    /// Device-reported error; logged and forwarded.
    DeviceError(InboundMessage),
    /// Anything else; forwarded verbatim.
    Data(InboundMessage),
}

/// Parse and classify a text frame.
pub fn decode_inbound(text: &str) -> serde_json::Result<Inbound> {
    let message = InboundMessage(serde_json::from_str(text)?);
    Ok(match message.message_type() {
        Some(TYPE_HEARTBEAT) => Inbound::Heartbeat,
        Some(TYPE_ERROR) => Inbound::DeviceError(message),
        _ => Inbound::Data(message),
    })
}

/// Actions understood by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
    EmergencyStop,
    Resume,
    /// Arm joint 1..=6; the value is the target angle in degrees.
    Joint(u8),
    GetArmPosition,
    ArmEmergencyStop,
    ArmResume,
    StartAutoMode,
    StopAutoMode,
}

/// Number of arm joints on the device.
pub const JOINT_COUNT: u8 = 6;

impl DeviceAction {
    /// Name used in the `action` field.
    pub fn wire_name(self) -> String {
        match self {
            Self::Forward => "forward".into(),
            Self::Backward => "backward".into(),
            Self::Left => "left".into(),
            Self::Right => "right".into(),
            Self::Stop => "stop".into(),
            Self::EmergencyStop => "emgStop".into(),
            Self::Resume => "resume".into(),
            Self::Joint(n) => format!("joint{n}"),
            Self::GetArmPosition => "getArmPosition".into(),
            Self::ArmEmergencyStop => "armEmgStop".into(),
            Self::ArmResume => "armResume".into(),
            Self::StartAutoMode => "startAutoMode".into(),
            Self::StopAutoMode => "stopAutoMode".into(),
        }
    }

    /// Whether the action carries a `value`.
    pub const fn takes_value(self) -> bool {
        matches!(self, Self::Joint(_))
    }

    /// Build the command for this action. Joint angles are rounded to whole
    /// degrees.
    pub fn command(self, value: Option<f64>) -> Command {
        let value = if self.takes_value() {
            value.map(f64::round)
        } else {
            None
        };
        Command::new(self.wire_name(), value)
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire_name())
    }
}

/// Error returned when an action name is not part of the device vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for DeviceAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "forward" => Self::Forward,
            "backward" => Self::Backward,
            "left" => Self::Left,
            "right" => Self::Right,
            "stop" => Self::Stop,
            "emgStop" => Self::EmergencyStop,
            "resume" => Self::Resume,
            "getArmPosition" => Self::GetArmPosition,
            "armEmgStop" => Self::ArmEmergencyStop,
            "armResume" => Self::ArmResume,
            "startAutoMode" => Self::StartAutoMode,
            "stopAutoMode" => Self::StopAutoMode,
            other => {
                let joint = other
                    .strip_prefix("joint")
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|n| (1..=JOINT_COUNT).contains(n));
                match joint {
                    Some(n) => Self::Joint(n),
                    None => return Err(UnknownAction(s.to_string())),
                }
            }
        };
        Ok(action)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_without_value_omits_field() {
        let cmd = Command {
            action: "forward".into(),
            value: None,
            timestamp: 42,
        };
        assert_eq!(
            cmd.to_frame().unwrap(),
            r#"{"action":"forward","timestamp":42}"#
        );
    }

    #[test]
    fn integral_value_serializes_as_integer() {
        let cmd = Command {
            action: "joint1".into(),
            value: Some(92.0),
            timestamp: 7,
        };
        assert_eq!(
            cmd.to_frame().unwrap(),
            r#"{"action":"joint1","value":92,"timestamp":7}"#
        );
    }

    #[test]
    fn fractional_value_keeps_fraction() {
        let cmd = Command {
            action: "speed".into(),
            value: Some(0.5),
            timestamp: 7,
        };
        let v: Value = serde_json::from_str(&cmd.to_frame().unwrap()).unwrap();
        assert_eq!(v["value"], json!(0.5));
    }

    #[test]
    fn command_new_stamps_current_time() {
        let before = now_millis();
        let cmd = Command::new("stop", None);
        assert!(cmd.timestamp >= before);
        assert_eq!(cmd.action, "stop");
    }

    #[test]
    fn ping_is_a_plain_action() {
        let v: Value = serde_json::from_str(&Command::ping().to_frame().unwrap()).unwrap();
        assert_eq!(v["action"], "ping");
        assert!(v.get("value").is_none());
        assert!(v["timestamp"].is_u64());
    }

    #[test]
    fn custom_message_envelope() {
        let msg = CustomMessage::new(json!({"speed": 3}));
        let v: Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();
        assert_eq!(v["type"], "custom");
        assert_eq!(v["data"], json!({"speed": 3}));
        assert!(v["timestamp"].is_u64());
    }

    #[test]
    fn heartbeat_is_classified() {
        assert_eq!(
            decode_inbound(r#"{"type":"heartbeat"}"#).unwrap(),
            Inbound::Heartbeat
        );
    }

    #[test]
    fn error_payload_is_classified_with_message() {
        match decode_inbound(r#"{"type":"error","message":"servo overload"}"#).unwrap() {
            Inbound::DeviceError(msg) => {
                assert_eq!(msg.error_message(), Some("servo overload"));
            }
            other => panic!("expected DeviceError, got {other:?}"),
        }
    }

    #[test]
    fn other_payloads_are_data() {
        let inbound = decode_inbound(r#"{"type":"armStatus","joint1":90}"#).unwrap();
        match inbound {
            Inbound::Data(msg) => {
                assert_eq!(msg.message_type(), Some("armStatus"));
                assert_eq!(msg.get("joint1"), Some(&json!(90)));
            }
            other => panic!("expected Data, got {other:?}"),
        }
    }

    #[test]
    fn payload_without_type_is_data() {
        let inbound = decode_inbound(r#"{"battery":71}"#).unwrap();
        assert!(matches!(inbound, Inbound::Data(ref m) if m.message_type().is_none()));
    }

    #[test]
    fn malformed_text_is_rejected() {
        assert!(decode_inbound("not json").is_err());
        assert!(decode_inbound("").is_err());
    }

    #[test]
    fn device_action_names_round_trip() {
        for name in [
            "forward",
            "backward",
            "left",
            "right",
            "stop",
            "emgStop",
            "resume",
            "joint1",
            "joint6",
            "getArmPosition",
            "armEmgStop",
            "armResume",
            "startAutoMode",
            "stopAutoMode",
        ] {
            let action: DeviceAction = name.parse().unwrap();
            assert_eq!(action.wire_name(), name);
        }
    }

    #[test]
    fn out_of_range_joint_is_unknown() {
        assert!("joint0".parse::<DeviceAction>().is_err());
        assert!("joint7".parse::<DeviceAction>().is_err());
        assert!("jointx".parse::<DeviceAction>().is_err());
        assert_eq!(
            "fly".parse::<DeviceAction>(),
            Err(UnknownAction("fly".into()))
        );
    }

    #[test]
    fn joint_command_rounds_angle() {
        let cmd = DeviceAction::Joint(2).command(Some(44.6));
        assert_eq!(cmd.action, "joint2");
        assert_eq!(cmd.value, Some(45.0));
    }

    #[test]
    fn drive_command_drops_value() {
        let cmd = DeviceAction::Forward.command(Some(1.0));
        assert_eq!(cmd.value, None);
    }
}
