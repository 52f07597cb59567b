//! Socket.io v2 frame codec
//!
//! Engine.IO v3 packet type digit, optionally followed by a Socket.io
//! packet type digit and a JSON body. Only the default namespace is used.

use serde_json::Value;
use std::time::Duration;

use crate::error::SignalingError;

/// Default ping interval when the handshake omits one
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);

/// One decoded websocket frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Engine.IO handshake
    Open {
        sid: String,
        ping_interval: Duration,
        ping_timeout: Duration,
    },
    Close,
    Ping,
    Pong,
    /// Socket.io namespace connected
    Connect,
    /// Socket.io namespace disconnected
    Disconnect,
    /// Named event with arguments
    Event { name: String, args: Vec<Value> },
    /// Namespace-level error
    Error(Value),
    Noop,
}

impl Frame {
    pub fn event(name: &str, args: Vec<Value>) -> Self {
        Frame::Event {
            name: name.to_string(),
            args,
        }
    }

    /// Encode into websocket text
    pub fn encode(&self) -> String {
        match self {
            Frame::Open {
                sid,
                ping_interval,
                ping_timeout,
            } => {
                let body = serde_json::json!({
                    "sid": sid,
                    "upgrades": [],
                    "pingInterval": ping_interval.as_millis() as u64,
                    "pingTimeout": ping_timeout.as_millis() as u64,
                });
                format!("0{}", body)
            }
            Frame::Close => "1".to_string(),
            Frame::Ping => "2".to_string(),
            Frame::Pong => "3".to_string(),
            Frame::Connect => "40".to_string(),
            Frame::Disconnect => "41".to_string(),
            Frame::Event { name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                format!("42{}", Value::Array(array))
            }
            Frame::Error(body) => format!("44{}", body),
            Frame::Noop => "6".to_string(),
        }
    }

    /// Decode websocket text
    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        let mut chars = text.chars();
        let engine = chars
            .next()
            .ok_or_else(|| SignalingError::MalformedFrame("empty frame".to_string()))?;
        let rest = chars.as_str();

        match engine {
            '0' => {
                let body: Value = serde_json::from_str(rest)
                    .map_err(|e| SignalingError::MalformedFrame(format!("handshake: {}", e)))?;
                let millis = |key: &str, default: Duration| {
                    body.get(key)
                        .and_then(Value::as_u64)
                        .map(Duration::from_millis)
                        .filter(|d| !d.is_zero())
                        .unwrap_or(default)
                };
                Ok(Frame::Open {
                    sid: body.get("sid").and_then(Value::as_str).unwrap_or_default().to_string(),
                    ping_interval: millis("pingInterval", DEFAULT_PING_INTERVAL),
                    ping_timeout: millis("pingTimeout", Duration::from_millis(5_000)),
                })
            }
            '1' => Ok(Frame::Close),
            '2' => Ok(Frame::Ping),
            '3' => Ok(Frame::Pong),
            '6' => Ok(Frame::Noop),
            '4' => decode_message(rest),
            other => Err(SignalingError::MalformedFrame(format!("unknown packet type {}", other))),
        }
    }
}

fn decode_message(text: &str) -> Result<Frame, SignalingError> {
    let mut chars = text.chars();
    let kind = chars
        .next()
        .ok_or_else(|| SignalingError::MalformedFrame("empty message".to_string()))?;
    let body = chars.as_str();

    match kind {
        '0' => Ok(Frame::Connect),
        '1' => Ok(Frame::Disconnect),
        '2' => {
            // Acknowledged events carry a numeric id before the payload
            let payload = body.trim_start_matches(|c: char| c.is_ascii_digit());
            let value: Value = serde_json::from_str(payload)
                .map_err(|e| SignalingError::MalformedFrame(format!("event: {}", e)))?;
            let Value::Array(mut items) = value else {
                return Err(SignalingError::MalformedFrame("event payload is not an array".to_string()));
            };
            if items.is_empty() {
                return Err(SignalingError::MalformedFrame("event without name".to_string()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(SignalingError::MalformedFrame(format!("event name {}", other)));
                }
            };
            Ok(Frame::Event { name, args: items })
        }
        '4' => {
            let value = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()));
            Ok(Frame::Error(value))
        }
        other => Err(SignalingError::MalformedFrame(format!("unsupported message type {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_handshake() {
        let frame = Frame::decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#).unwrap();
        assert_eq!(
            frame,
            Frame::Open {
                sid: "abc".to_string(),
                ping_interval: Duration::from_secs(25),
                ping_timeout: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn test_zero_ping_interval_falls_back_to_default() {
        match Frame::decode(r#"0{"sid":"abc","pingInterval":0,"pingTimeout":0}"#).unwrap() {
            Frame::Open {
                ping_interval,
                ping_timeout,
                ..
            } => {
                assert_eq!(ping_interval, DEFAULT_PING_INTERVAL);
                assert_eq!(ping_timeout, Duration::from_millis(5_000));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(Frame::decode("2").unwrap(), Frame::Ping);
        assert_eq!(Frame::decode("3").unwrap(), Frame::Pong);
        assert_eq!(Frame::decode("40").unwrap(), Frame::Connect);
        assert_eq!(Frame::decode("41").unwrap(), Frame::Disconnect);
        assert_eq!(Frame::Pong.encode(), "3");
    }

    #[test]
    fn test_encode_join_event() {
        let frame = Frame::event("join", vec![json!("ABCDEF"), json!(3), json!(77)]);
        assert_eq!(frame.encode(), r#"42["join","ABCDEF",3,77]"#);
    }

    #[test]
    fn test_decode_signal_event() {
        let frame = Frame::decode(r#"42["signal",{"data":{"type":"offer","sdp":"v=0"},"from":"peer-1"}]"#).unwrap();
        match frame {
            Frame::Event { name, args } => {
                assert_eq!(name, "signal");
                assert_eq!(args[0]["from"], "peer-1");
                assert_eq!(args[0]["data"]["type"], "offer");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let frame = Frame::decode(r#"4212["leave"]"#).unwrap();
        assert_eq!(frame, Frame::event("leave", vec![]));
    }

    #[test]
    fn test_decode_namespace_error() {
        let frame = Frame::decode(r#"44{"message":"nope"}"#).unwrap();
        assert_eq!(frame, Frame::Error(json!({"message": "nope"})));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(Frame::decode("").is_err());
        assert!(Frame::decode("42{not json").is_err());
        assert!(Frame::decode("42[]").is_err());
        assert!(Frame::decode("42[1,2]").is_err());
        assert!(Frame::decode("9").is_err());
    }
}
