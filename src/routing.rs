//! Routing rule composition.
//!
//! Bypass domains, zones, CIDRs and wildcard masks become `direct` rules
//! placed ahead of a single default rule. The default rule targets the only
//! proxy outbound, or a balancer over all of them when there are several.
//!
//! Bypass entries are an allow-list for local traffic, so any malformed entry
//! fails the whole composition rather than being skipped.

use std::collections::HashSet;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::Serialize;

use crate::config::BypassLists;
use crate::error::{ComposeError, Result};

pub const DIRECT_TAG: &str = "direct";
pub const BLOCK_TAG: &str = "block";
pub const BALANCER_TAG: &str = "proxy-auto";

/// Private, loopback and link-local ranges that always bypass the proxy.
pub const LOCAL_IP_RANGES: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "169.254.0.0/16",
];

/// What a rule matches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleMatch {
    Domain(Vec<String>),
    Ip(Vec<String>),
    /// Catch-all on transport networks, e.g. `tcp,udp`.
    Network(String),
}

/// Where matched traffic goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RuleTarget {
    #[serde(rename = "outboundTag")]
    Outbound(String),
    #[serde(rename = "balancerTag")]
    Balancer(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingRule {
    #[serde(rename = "type")]
    pub rule_type: &'static str,
    #[serde(flatten)]
    pub matcher: RuleMatch,
    #[serde(flatten)]
    pub target: RuleTarget,
}

impl RoutingRule {
    fn field(matcher: RuleMatch, target: RuleTarget) -> Self {
        Self {
            rule_type: "field",
            matcher,
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balancer {
    pub tag: String,
    pub selector: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSection {
    pub domain_strategy: &'static str,
    pub rules: Vec<RoutingRule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balancers: Option<Vec<Balancer>>,
}

/// Build the routing section for the given proxy tags.
///
/// `proxy_tags` must be non-empty and in outbound order.
pub fn compose_routing(bypass: &BypassLists, proxy_tags: &[String]) -> Result<RoutingSection> {
    if proxy_tags.is_empty() {
        return Err(ComposeError::NoProxyTags);
    }

    let mut rules = Vec::with_capacity(3);

    let domains = bypass_domains(bypass);
    if !domains.is_empty() {
        rules.push(RoutingRule::field(
            RuleMatch::Domain(domains),
            RuleTarget::Outbound(DIRECT_TAG.to_string()),
        ));
    }

    let ips = bypass_ips(bypass)?;
    if !ips.is_empty() {
        rules.push(RoutingRule::field(
            RuleMatch::Ip(ips),
            RuleTarget::Outbound(DIRECT_TAG.to_string()),
        ));
    }

    let (default_target, balancers) = match proxy_tags {
        [only] => (RuleTarget::Outbound(only.clone()), None),
        many => (
            RuleTarget::Balancer(BALANCER_TAG.to_string()),
            Some(vec![Balancer {
                tag: BALANCER_TAG.to_string(),
                selector: many.to_vec(),
            }]),
        ),
    };
    rules.push(RoutingRule::field(
        RuleMatch::Network("tcp,udp".to_string()),
        default_target,
    ));

    tracing::debug!(
        "composed {} routing rules for {} proxy outbounds",
        rules.len(),
        proxy_tags.len()
    );

    Ok(RoutingSection {
        domain_strategy: "IPOnDemand",
        rules,
        balancers,
    })
}

/// Exact domains as `full:` entries followed by zones as `domain:` entries.
pub fn bypass_domains(bypass: &BypassLists) -> Vec<String> {
    let exact = bypass.domains.iter().filter_map(|d| normalize_exact(d));
    let zones = bypass.domain_zones.iter().filter_map(|d| normalize_zone(d));
    dedupe(exact.chain(zones))
}

/// Local ranges followed by validated user CIDRs and converted masks.
pub fn bypass_ips(bypass: &BypassLists) -> Result<Vec<String>> {
    let mut ips: Vec<String> = LOCAL_IP_RANGES.iter().map(|s| s.to_string()).collect();
    for raw in bypass.ip_cidrs.iter().chain(&bypass.ip_masks) {
        let cidr = wildcard_to_cidr(raw)?;
        validate_range(&cidr)?;
        ips.push(cidr);
    }
    Ok(dedupe(ips.into_iter()))
}

fn dedupe(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items.filter(|item| seen.insert(item.clone())).collect()
}

/// `Example.COM.` → `full:example.com`.
pub fn normalize_exact(raw: &str) -> Option<String> {
    let host = extract_hostname(raw).to_lowercase();
    let host = host.trim_end_matches('.');
    (!host.is_empty()).then(|| format!("full:{host}"))
}

/// `.Corp.` → `domain:corp`.
pub fn normalize_zone(raw: &str) -> Option<String> {
    let host = extract_hostname(raw).to_lowercase();
    let host = host.trim_matches('.');
    (!host.is_empty()).then(|| format!("domain:{host}"))
}

/// Reduce a user entry to a bare hostname.
///
/// `https://a.example/x` → `a.example`, `a.example:8080` → `a.example`,
/// `*.a.example` → `a.example`.
fn extract_hostname(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    if raw.contains("://") {
        return url::Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
    }

    let mut host = raw.split('/').next().unwrap_or(raw);
    if host.matches(':').count() == 1 {
        if let Some((h, port)) = host.rsplit_once(':') {
            if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                host = h;
            }
        }
    }
    host.strip_prefix("*.").unwrap_or(host).to_string()
}

/// Convert a trailing-wildcard IPv4 mask to CIDR. Entries without `*` are
/// returned unchanged.
///
/// `198.51.100.*` → `198.51.100.0/24`, `203.0.*.*` → `203.0.0.0/16`.
pub fn wildcard_to_cidr(raw: &str) -> Result<String> {
    let candidate = raw.trim();
    if !candidate.contains('*') {
        return Ok(candidate.to_string());
    }

    let invalid = |reason: &str| ComposeError::InvalidMask {
        input: raw.to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = candidate.split('.').collect();
    if parts.len() != 4 {
        return Err(invalid("expected four dot-separated octets"));
    }

    let mut octets = [0u8; 4];
    let mut fixed = 0usize;
    let mut wildcard_seen = false;
    for (i, part) in parts.iter().enumerate() {
        if *part == "*" {
            wildcard_seen = true;
            continue;
        }
        if wildcard_seen {
            return Err(invalid("wildcard '*' must only appear in trailing octets"));
        }
        octets[i] = part
            .parse::<u8>()
            .map_err(|_| invalid("octet must be 0-255 or '*'"))?;
        fixed += 1;
    }
    if fixed == 0 {
        return Err(invalid("at least the first octet must be literal"));
    }

    let [a, b, c, d] = octets;
    Ok(format!("{a}.{b}.{c}.{d}/{}", fixed * 8))
}

/// Accept a CIDR (host bits may be set) or a bare IP address.
fn validate_range(value: &str) -> Result<()> {
    if value.parse::<IpNet>().is_ok() || value.parse::<IpAddr>().is_ok() {
        Ok(())
    } else {
        Err(ComposeError::InvalidCidr(value.to_string()))
    }
}
