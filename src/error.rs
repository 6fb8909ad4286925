use subxray_links::LinkError;

/// Errors raised while turning nodes into a routing configuration.
///
/// Everything here except [`ComposeError::Link`] and
/// [`ComposeError::UnsupportedPlugin`] is fatal for the whole run.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("SSR requires plugins (proto={protocol}, obfs={obfs}); cannot convert to native Xray")]
    UnsupportedPlugin { protocol: String, obfs: String },

    #[error("invalid wildcard IPv4 mask '{input}': {reason}")]
    InvalidMask { input: String, reason: String },

    #[error("invalid bypass IP range '{0}'")]
    InvalidCidr(String),

    #[error("no valid nodes parsed (all failed/unsupported)")]
    NoValidNodes,

    #[error("source config has no outbounds")]
    NoOutbounds,

    #[error("no proxy outbounds found in source config")]
    NoProxyOutbounds,

    #[error("no proxy outbound tags available for routing")]
    NoProxyTags,

    #[error("failed to serialize outbound: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid value for {name}: '{value}' ({reason})")]
    InvalidSetting {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, ComposeError>;
