//! Scheme-agnostic node model produced by the decoders.

use std::collections::BTreeMap;
use std::fmt;

/// Link scheme recognised by the extractor and decoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Vless,
    Trojan,
    Vmess,
    Shadowsocks,
    ShadowsocksR,
}

impl Scheme {
    /// Every supported scheme. `ssr` is listed before `ss` so prefix
    /// matching picks the longer scheme first.
    pub const ALL: [Scheme; 5] = [
        Scheme::Vless,
        Scheme::Vmess,
        Scheme::Trojan,
        Scheme::ShadowsocksR,
        Scheme::Shadowsocks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vless => "vless",
            Self::Trojan => "trojan",
            Self::Vmess => "vmess",
            Self::Shadowsocks => "ss",
            Self::ShadowsocksR => "ssr",
        }
    }

    /// `vless://`, `ss://`, ...
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Vless => "vless://",
            Self::Trojan => "trojan://",
            Self::Vmess => "vmess://",
            Self::Shadowsocks => "ss://",
            Self::ShadowsocksR => "ssr://",
        }
    }

    /// Detect the scheme of a link, case-insensitively.
    pub fn detect(link: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|scheme| {
            let prefix = scheme.prefix();
            link.get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        })
    }

    /// The link with its scheme prefix removed.
    pub fn strip<'a>(self, link: &'a str) -> &'a str {
        link.get(self.prefix().len()..).unwrap_or("")
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential carried by a node, shaped by its scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// vless / vmess user id. `alter_id` is only meaningful for vmess.
    Uid { id: String, alter_id: u32 },
    /// trojan password.
    Password(String),
    /// ss / ssr cipher and password.
    MethodPassword { method: String, password: String },
}

/// Scheme-specific data that does not fit the common record.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Vless,
    Trojan,
    /// The decoded vmess JSON object. Some transport fields only exist here.
    Vmess {
        raw: serde_json::Map<String, serde_json::Value>,
    },
    Shadowsocks,
    ShadowsocksR { protocol: String, obfs: String },
}

impl NodeKind {
    pub fn scheme(&self) -> Scheme {
        match self {
            Self::Vless => Scheme::Vless,
            Self::Trojan => Scheme::Trojan,
            Self::Vmess { .. } => Scheme::Vmess,
            Self::Shadowsocks => Scheme::Shadowsocks,
            Self::ShadowsocksR { .. } => Scheme::ShadowsocksR,
        }
    }
}

/// One proxy endpoint decoded from a subscription link.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDescriptor {
    pub kind: NodeKind,
    pub host: String,
    pub port: u16,
    pub credential: Credential,
    /// Display name from the link fragment or remarks. May be empty.
    pub name: String,
    /// Transport query parameters, keys case-sensitive as supplied.
    pub params: BTreeMap<String, String>,
}

impl NodeDescriptor {
    pub fn scheme(&self) -> Scheme {
        self.kind.scheme()
    }

    /// Look up a transport parameter, treating empty values as absent.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
