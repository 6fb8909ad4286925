//! Error types for link extraction and decoding.

/// Failure to extract or decode a subscription link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("no vless/vmess/trojan/ss/ssr links found (direct or base64)")]
    NoLinksFound,

    #[error("unsupported link scheme: '{0}'")]
    UnsupportedScheme(String),

    #[error("malformed {scheme} link: {reason}")]
    Malformed { scheme: &'static str, reason: String },

    #[error("{scheme} link is missing required field '{field}'")]
    MissingField {
        scheme: &'static str,
        field: &'static str,
    },

    #[error("invalid port '{0}': expected 1-65535")]
    InvalidPort(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid vmess JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized ss format: {0}")]
    UnrecognizedShadowsocks(String),

    #[error("unsupported transport network '{0}'")]
    UnsupportedNetwork(String),
}

pub type Result<T> = std::result::Result<T, LinkError>;
