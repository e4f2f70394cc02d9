use std::collections::HashMap;

use {
    axum::http::{HeaderMap, StatusCode},
    tern_protocol::{SdkKind, errcode},
};

/// Query parameter names of the handshake. Part of the client contract.
pub mod param {
    pub const SEND_ID: &str = "sendID";
    pub const PLATFORM_ID: &str = "platformID";
    pub const TOKEN: &str = "token";
    pub const OPERATION_ID: &str = "operationID";
    pub const COMPRESSION: &str = "compression";
    pub const SDK_TYPE: &str = "sdkType";
    pub const IS_BACKGROUND: &str = "isBackground";
    pub const IS_MSG_RESP: &str = "isMsgResp";
}

/// Validated handshake parameters, carried for the life of the connection.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub user_id: String,
    pub platform_id: i32,
    pub token: String,
    pub operation_id: String,
    pub compression: bool,
    pub sdk_kind: SdkKind,
    pub is_background: bool,
    /// When set, handshake errors and the success ack are delivered as one
    /// text frame on the upgraded channel instead of as HTTP status.
    pub is_msg_resp: bool,
}

/// A handshake rejection: HTTP status for the plain path, wire code + reason
/// for the `isMsgResp` path.
#[derive(Debug, Clone)]
pub struct HandshakeError {
    pub status: StatusCode,
    pub code: i32,
    pub reason: String,
}

impl HandshakeError {
    pub fn args(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: errcode::ARGS,
            reason: reason.into(),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            code: errcode::AUTH_INVALID,
            reason: reason.into(),
        }
    }

    pub fn over_capacity(limit: usize) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            code: errcode::OVER_CAPACITY,
            reason: format!("node connection limit {limit} reached"),
        }
    }
}

impl ConnectParams {
    /// Validate the handshake query string.
    ///
    /// Requires a non-empty token and user id and an integer platform id;
    /// `sdkType` must be one of `""`, `go`, `js` (empty means native). A
    /// missing operation id is replaced with a generated one so downstream
    /// logs always correlate.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, HandshakeError> {
        let get = |key: &str| query.get(key).map(String::as_str).unwrap_or("");

        let user_id = get(param::SEND_ID);
        if user_id.is_empty() {
            return Err(HandshakeError::args("missing sendID"));
        }
        let token = get(param::TOKEN);
        if token.is_empty() {
            return Err(HandshakeError::args("missing token"));
        }
        let platform_id: i32 = get(param::PLATFORM_ID)
            .parse()
            .map_err(|_| HandshakeError::args("platformID must be an integer"))?;
        let sdk_kind = SdkKind::from_param(get(param::SDK_TYPE))
            .map_err(|e| HandshakeError::args(e.to_string()))?;

        let operation_id = match get(param::OPERATION_ID) {
            "" => uuid::Uuid::new_v4().to_string(),
            op => op.to_string(),
        };

        Ok(Self {
            user_id: user_id.to_string(),
            platform_id,
            token: token.to_string(),
            operation_id,
            compression: get(param::COMPRESSION) == "gzip",
            sdk_kind,
            is_background: get(param::IS_BACKGROUND) == "true",
            is_msg_resp: get(param::IS_MSG_RESP) == "true",
        })
    }
}

/// Client-facing remote address, preferring the forwarded-for chain set by
/// the edge proxy over the socket peer.
pub fn remote_addr(headers: &HeaderMap, peer: std::net::SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.to_string())
}

/// Connection id: unique per live transport, stable for its lifetime.
pub fn derive_conn_id(remote: &str, now_ms: i64) -> String {
    format!("{:x}", md5::compute(format!("{remote}_{now_ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn minimal_valid_handshake() {
        let q = query(&[("sendID", "alice"), ("platformID", "2"), ("token", "t")]);
        let p = ConnectParams::from_query(&q).unwrap();
        assert_eq!(p.user_id, "alice");
        assert_eq!(p.platform_id, 2);
        assert_eq!(p.sdk_kind, SdkKind::Native);
        assert!(!p.compression);
        assert!(!p.operation_id.is_empty(), "operation id is generated");
    }

    #[test]
    fn rejects_missing_token_and_bad_platform() {
        let q = query(&[("sendID", "alice"), ("platformID", "2")]);
        assert_eq!(
            ConnectParams::from_query(&q).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );

        let q = query(&[("sendID", "a"), ("platformID", "ios"), ("token", "t")]);
        assert!(ConnectParams::from_query(&q).is_err());
    }

    #[test]
    fn sdk_type_js_selects_web_codec() {
        let q = query(&[
            ("sendID", "a"),
            ("platformID", "5"),
            ("token", "t"),
            ("sdkType", "js"),
            ("compression", "gzip"),
        ]);
        let p = ConnectParams::from_query(&q).unwrap();
        assert_eq!(p.sdk_kind, SdkKind::Web);
        assert!(p.compression);
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer = "127.0.0.1:9000".parse().unwrap();
        assert_eq!(remote_addr(&headers, peer), "203.0.113.9");
        assert_eq!(remote_addr(&HeaderMap::new(), peer), "127.0.0.1:9000");
    }

    #[test]
    fn conn_ids_differ_by_time_and_addr() {
        let a = derive_conn_id("1.2.3.4:5", 1000);
        let b = derive_conn_id("1.2.3.4:5", 1001);
        let c = derive_conn_id("1.2.3.4:6", 1000);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }
}
