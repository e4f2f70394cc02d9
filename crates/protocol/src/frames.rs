use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Request kinds ────────────────────────────────────────────────────────────

/// Stable integer codes identifying every request and push kind on the wire.
pub mod kind {
    pub const GET_LATEST_SEQ: i32 = 1001;
    pub const PULL_BY_SEQ_LIST: i32 = 1002;
    pub const SEND_MSG: i32 = 1003;
    pub const SEND_SIGNAL_MSG: i32 = 1004;
    pub const PULL_BY_RANGE: i32 = 1005;
    pub const GET_READ_MAX_SEQ: i32 = 1006;
    pub const PULL_CONV_LAST_MESSAGE: i32 = 1007;
    /// Server→client message push.
    pub const PUSH_MSG: i32 = 2001;
    /// Server→client forced logout.
    pub const KICK_ONLINE: i32 = 2002;
    pub const LOGOUT: i32 = 2003;
    pub const SET_BACKGROUND_STATUS: i32 = 2004;
    pub const SUBSCRIBE_ONLINE_STATUS: i32 = 2005;
    /// Catch-all for undecodable wire data, echoed back to the client.
    pub const WS_DATA_ERROR: i32 = 3001;
}

/// Human-readable name for a request kind, for logs only.
pub fn kind_name(k: i32) -> &'static str {
    match k {
        kind::GET_LATEST_SEQ => "get_latest_seq",
        kind::PULL_BY_SEQ_LIST => "pull_by_seq_list",
        kind::SEND_MSG => "send_msg",
        kind::SEND_SIGNAL_MSG => "send_signal_msg",
        kind::PULL_BY_RANGE => "pull_by_range",
        kind::GET_READ_MAX_SEQ => "get_read_max_seq",
        kind::PULL_CONV_LAST_MESSAGE => "pull_conv_last_message",
        kind::PUSH_MSG => "push_msg",
        kind::KICK_ONLINE => "kick_online",
        kind::LOGOUT => "logout",
        kind::SET_BACKGROUND_STATUS => "set_background_status",
        kind::SUBSCRIBE_ONLINE_STATUS => "subscribe_online_status",
        kind::WS_DATA_ERROR => "ws_data_error",
        _ => "unknown",
    }
}

// ── Byte payload encoding ────────────────────────────────────────────────────

/// Serde codec for the opaque `data` payload: base64 in human-readable
/// formats (the web JSON codec), raw bytes in binary formats (postcard).
mod wire_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        if ser.is_human_readable() {
            ser.serialize_str(&STANDARD.encode(bytes))
        } else {
            ser.serialize_bytes(bytes)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        if de.is_human_readable() {
            let s = String::deserialize(de)?;
            STANDARD.decode(s).map_err(serde::de::Error::custom)
        } else {
            serde_bytes_owned(de)
        }
    }

    fn serde_bytes_owned<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        struct V;
        impl serde::de::Visitor<'_> for V {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("bytes")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
                Ok(v)
            }
        }
        de.deserialize_byte_buf(V)
    }
}

// ── Business frames ──────────────────────────────────────────────────────────

/// A client→gateway request frame.
///
/// `msg_incr` is an SDK-side correlation counter, echoed verbatim into the
/// matching [`Reply`]. `send_id` must equal the connection's authenticated
/// user id; a mismatch fails the connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Req {
    pub req_kind: i32,
    #[serde(default)]
    pub msg_incr: String,
    #[serde(default)]
    pub operation_id: String,
    #[serde(default)]
    pub send_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, with = "wire_bytes")]
    pub data: Vec<u8>,
}

/// A gateway→client reply or push frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub req_kind: i32,
    #[serde(default)]
    pub msg_incr: String,
    #[serde(default)]
    pub operation_id: String,
    #[serde(default)]
    pub err_code: i32,
    #[serde(default)]
    pub err_msg: String,
    #[serde(default, with = "wire_bytes")]
    pub data: Vec<u8>,
}

impl Reply {
    /// Successful reply to `req` carrying `data`.
    pub fn ok(req: &Req, data: Vec<u8>) -> Self {
        Self {
            req_kind: req.req_kind,
            msg_incr: req.msg_incr.clone(),
            operation_id: req.operation_id.clone(),
            err_code: 0,
            err_msg: String::new(),
            data,
        }
    }

    /// Error reply to `req` with a wire-stable code.
    pub fn err(req: &Req, code: i32, msg: impl Into<String>) -> Self {
        Self {
            req_kind: req.req_kind,
            msg_incr: req.msg_incr.clone(),
            operation_id: req.operation_id.clone(),
            err_code: code,
            err_msg: msg.into(),
            data: Vec::new(),
        }
    }

    /// A server-originated push (no request to correlate with).
    pub fn push(req_kind: i32, operation_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            req_kind,
            msg_incr: String::new(),
            operation_id: operation_id.into(),
            err_code: 0,
            err_msg: String::new(),
            data,
        }
    }
}

// ── Text heartbeat frames ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextKind {
    Ping,
    Pong,
}

/// Payload of a text frame: `{"type":"ping"}` / `{"type":"pong"}`.
/// Unknown `type` values fail deserialization, which fails the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPayload {
    #[serde(rename = "type")]
    pub kind: TextKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl TextPayload {
    pub fn pong(body: Option<serde_json::Value>) -> Self {
        Self {
            kind: TextKind::Pong,
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_echoes_correlation_fields() {
        let req = Req {
            req_kind: kind::SEND_MSG,
            msg_incr: "17".into(),
            operation_id: "op-1".into(),
            send_id: "alice".into(),
            token: "t".into(),
            data: vec![1, 2, 3],
        };
        let reply = Reply::ok(&req, vec![9]);
        assert_eq!(reply.req_kind, kind::SEND_MSG);
        assert_eq!(reply.msg_incr, "17");
        assert_eq!(reply.operation_id, "op-1");
        assert_eq!(reply.err_code, 0);
    }

    #[test]
    fn json_data_is_base64() {
        let req = Req {
            req_kind: kind::SEND_MSG,
            data: b"hello".to_vec(),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["data"], "aGVsbG8=");
        let back: Req = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, b"hello");
    }

    #[test]
    fn unknown_text_type_is_rejected() {
        assert!(serde_json::from_str::<TextPayload>(r#"{"type":"hello"}"#).is_err());
        let ping: TextPayload = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping.kind, TextKind::Ping);
    }
}
