//! Runtime settings sourced from the environment.
//!
//! All environment access happens here, once, at process start. The rest of
//! the crate receives a [`Settings`] value and never reads the environment.

use crate::error::{ComposeError, Result};

pub const DEFAULT_HTTP_PORT: u16 = 3128;
pub const DEFAULT_SOCKS_PORT: u16 = 1080;
pub const DEFAULT_TPROXY_PORT: u16 = 12345;

/// User-declared bypass lists, each already split on commas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BypassLists {
    /// Exact domains (`BYPASS_DOMAINS`).
    pub domains: Vec<String>,
    /// Domain zones matched by suffix (`BYPASS_DOMAIN_ZONES`).
    pub domain_zones: Vec<String>,
    /// Literal CIDRs (`BYPASS_IP_CIDRS`).
    pub ip_cidrs: Vec<String>,
    /// Trailing-wildcard IPv4 masks (`BYPASS_IP_MASKS`).
    pub ip_masks: Vec<String>,
}

/// Transparent-capture inbound settings, present only when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub tproxy_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub http_port: u16,
    pub socks_port: u16,
    pub gateway: Option<GatewaySettings>,
    pub bypass: BypassLists,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            socks_port: DEFAULT_SOCKS_PORT,
            gateway: None,
            bypass: BypassLists::default(),
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway_enabled = parse_toggle("GATEWAY_MODE", lookup("GATEWAY_MODE"))?;
        let tproxy_port = parse_port(
            "GATEWAY_TPROXY_PORT",
            lookup("GATEWAY_TPROXY_PORT"),
            DEFAULT_TPROXY_PORT,
        )?;

        Ok(Self {
            http_port: parse_port("HTTP_PROXY_PORT", lookup("HTTP_PROXY_PORT"), DEFAULT_HTTP_PORT)?,
            socks_port: parse_port(
                "SOCKS_PROXY_PORT",
                lookup("SOCKS_PROXY_PORT"),
                DEFAULT_SOCKS_PORT,
            )?,
            gateway: gateway_enabled.then_some(GatewaySettings { tproxy_port }),
            bypass: BypassLists {
                domains: split_csv(lookup("BYPASS_DOMAINS")),
                domain_zones: split_csv(lookup("BYPASS_DOMAIN_ZONES")),
                ip_cidrs: split_csv(lookup("BYPASS_IP_CIDRS")),
                ip_masks: split_csv(lookup("BYPASS_IP_MASKS")),
            },
        })
    }
}

/// Split a comma-separated value, trimming items and dropping blanks.
pub fn split_csv(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_port(name: &'static str, raw: Option<String>, default: u16) -> Result<u16> {
    let Some(raw) = raw.filter(|v| !v.trim().is_empty()) else {
        return Ok(default);
    };
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ComposeError::InvalidSetting {
            name,
            value: raw,
            reason: "expected a port between 1 and 65535",
        }),
    }
}

fn parse_toggle(name: &'static str, raw: Option<String>) -> Result<bool> {
    let value = raw.unwrap_or_default();
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => Err(ComposeError::InvalidSetting {
            name,
            value,
            reason: "expected 0/1 or true/false",
        }),
    }
}
