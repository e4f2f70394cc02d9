//! Wire protocol shared between the gateway, its client SDKs and sibling
//! gateway nodes.
//!
//! A connection speaks one of two payload encodings, negotiated at handshake
//! time by the `sdkType` query parameter: the native SDK uses a compact
//! binary encoding (postcard), the web SDK uses JSON. Both carry the same
//! logical [`frames::Req`]/[`frames::Reply`] fields. Binary payloads may
//! additionally be gzip-transcoded when the client negotiated
//! `compression=gzip`.

pub mod codec;
pub mod compress;
pub mod error;
pub mod frames;
pub mod platform;

pub use {
    codec::SdkKind,
    error::{ProtoError, errcode},
    frames::{Reply, Req, TextKind, TextPayload},
};

use std::time::Duration;

/// Protocol revision spoken on the wire.
pub const PROTOCOL_VERSION: u32 = 3;

/// Hard cap on a single inbound frame. Anti-abuse limit, not flow control.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024;

/// How long the gateway waits for any inbound frame before declaring the
/// connection dead. Every inbound frame resets the clock.
pub const PONG_WAIT: Duration = Duration::from_secs(30);

/// Server→client ping cadence for web SDK clients: 0.9 × [`PONG_WAIT`].
pub const PING_PERIOD: Duration = Duration::from_secs(27);

/// Deadline applied to every outbound write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
