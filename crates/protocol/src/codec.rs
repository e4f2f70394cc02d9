use serde::{Serialize, de::DeserializeOwned};

use crate::error::ProtoError;

/// Which SDK family a connection belongs to, and therefore which payload
/// encoding its frames use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkKind {
    /// Native SDKs speak compact binary (postcard).
    Native,
    /// The web SDK speaks UTF-8 JSON.
    Web,
}

impl SdkKind {
    /// Parse the `sdkType` handshake parameter. Empty means native.
    pub fn from_param(s: &str) -> Result<Self, ProtoError> {
        match s {
            "" | "go" => Ok(Self::Native),
            "js" => Ok(Self::Web),
            other => Err(ProtoError::BadSdkType(other.to_string())),
        }
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtoError> {
        match self {
            Self::Native => Ok(postcard::to_allocvec(value)?),
            Self::Web => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, ProtoError> {
        match self {
            Self::Native => Ok(postcard::from_bytes(bytes)?),
            Self::Web => Ok(serde_json::from_slice(bytes)?),
        }
    }
}
