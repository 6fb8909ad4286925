//! Stream-settings normalization shared by every decoder.
//!
//! Query parameters (or vmess JSON fields) describing the transport are
//! folded into a [`TransportDescriptor`]. Explicit query keys win over the
//! legacy vmess JSON keys; a missing network means plain TCP.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{LinkError, Result};

/// Transport network kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Kcp,
    Ws,
    Http,
    Quic,
    Grpc,
    HttpUpgrade,
    XHttp,
}

impl Network {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "tcp" | "raw" => Ok(Self::Tcp),
            "kcp" | "mkcp" => Ok(Self::Kcp),
            "ws" | "websocket" => Ok(Self::Ws),
            "http" | "h2" => Ok(Self::Http),
            "quic" => Ok(Self::Quic),
            "grpc" | "gun" => Ok(Self::Grpc),
            "httpupgrade" => Ok(Self::HttpUpgrade),
            "xhttp" | "splithttp" => Ok(Self::XHttp),
            _ => Err(LinkError::UnsupportedNetwork(raw.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Kcp => "kcp",
            Self::Ws => "ws",
            Self::Http => "http",
            Self::Quic => "quic",
            Self::Grpc => "grpc",
            Self::HttpUpgrade => "httpupgrade",
            Self::XHttp => "xhttp",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpn: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealitySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
    #[serde(rename = "spiderX", skip_serializing_if = "Option::is_none")]
    pub spider_x: Option<String>,
}

/// Exactly one security layer is active; fields exist only for that layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Security {
    None,
    Tls(TlsSettings),
    Reality(RealitySettings),
}

impl Security {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls(_) => "tls",
            Self::Reality(_) => "reality",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WsSettings {
    pub path: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSettings {
    pub service_name: String,
    pub multi_mode: bool,
}

/// Normalized transport for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescriptor {
    pub network: Network,
    pub security: Security,
    pub ws: Option<WsSettings>,
    pub grpc: Option<GrpcSettings>,
}

impl Default for TransportDescriptor {
    fn default() -> Self {
        Self {
            network: Network::Tcp,
            security: Security::None,
            ws: None,
            grpc: None,
        }
    }
}

/// Resolve a security keyword. Unknown non-empty values fall back to TLS.
fn security_kind(raw: &str) -> &'static str {
    match raw.to_ascii_lowercase().as_str() {
        "" | "none" => "none",
        "reality" => "reality",
        _ => "tls",
    }
}

/// First non-empty value among `keys` in the parameter map.
fn first_param<'a>(params: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .map(String::as_str)
        .find(|v| !v.is_empty())
}

/// A vmess JSON field as a string. Numbers are rendered, empty strings are
/// treated as absent.
pub(crate) fn legacy_str(legacy: Option<&Map<String, Value>>, key: &str) -> Option<String> {
    match legacy?.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Build the transport descriptor from query parameters and, for vmess, the
/// decoded JSON object.
pub fn normalize_transport(
    params: &BTreeMap<String, String>,
    legacy: Option<&Map<String, Value>>,
) -> Result<TransportDescriptor> {
    let network_raw = first_param(params, &["type", "net"])
        .map(str::to_string)
        .or_else(|| legacy_str(legacy, "net"));
    let network = match network_raw {
        Some(raw) => Network::parse(&raw)?,
        None => Network::Tcp,
    };

    let security_raw = first_param(params, &["security"])
        .map(str::to_string)
        .or_else(|| legacy_str(legacy, "tls"))
        .unwrap_or_default();

    let server_name = first_param(params, &["sni", "servername"])
        .map(str::to_string)
        .or_else(|| legacy_str(legacy, "sni"));
    let fingerprint = first_param(params, &["fp"]).map(str::to_string);

    let security = match security_kind(&security_raw) {
        "none" => Security::None,
        "reality" => Security::Reality(RealitySettings {
            server_name,
            fingerprint,
            public_key: first_param(params, &["pbk", "publicKey"]).map(str::to_string),
            short_id: first_param(params, &["sid", "shortId"]).map(str::to_string),
            spider_x: first_param(params, &["spx", "spiderX"]).map(str::to_string),
        }),
        _ => Security::Tls(TlsSettings {
            server_name,
            alpn: first_param(params, &["alpn"])
                .map(|a| a.split(',').map(str::to_string).collect()),
            fingerprint,
        }),
    };

    let ws = (network == Network::Ws).then(|| {
        let path = first_param(params, &["path"])
            .map(str::to_string)
            .or_else(|| legacy_str(legacy, "path"))
            .unwrap_or_else(|| "/".to_string());
        let mut headers = BTreeMap::new();
        if let Some(host) = first_param(params, &["host"])
            .map(str::to_string)
            .or_else(|| legacy_str(legacy, "host"))
        {
            headers.insert("Host".to_string(), host);
        }
        WsSettings { path, headers }
    });

    let grpc = (network == Network::Grpc).then(|| GrpcSettings {
        service_name: first_param(params, &["serviceName"])
            .map(str::to_string)
            .or_else(|| legacy_str(legacy, "path"))
            .unwrap_or_default(),
        multi_mode: false,
    });

    Ok(TransportDescriptor {
        network,
        security,
        ws,
        grpc,
    })
}
