//! Configuration document assembly.
//!
//! Two entry points share the same tail:
//!
//! ```text
//! compose_from_links(links)      compose_from_source(json)
//!   → synthesize_links              → source outbounds
//!   └──────────────┬──────────────────┘
//!                  → arrange_outbounds (proxy, dns, direct, block)
//!                  → proxy_tags → compose_routing
//!                  → inbounds + log → ConfigDocument
//! ```

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

use crate::config::Settings;
use crate::error::{ComposeError, Result};
use crate::outbound::{synthesize_links, SkippedLink};
use crate::routing::{compose_routing, RoutingSection, BLOCK_TAG, DIRECT_TAG};

const PROTOCOL_DIRECT: &str = "freedom";
const PROTOCOL_BLOCK: &str = "blackhole";
const PROTOCOL_DNS: &str = "dns";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Sniffing {
    pub enabled: bool,
    pub dest_override: Vec<&'static str>,
    pub route_only: bool,
}

impl Default for Sniffing {
    fn default() -> Self {
        Self {
            enabled: true,
            dest_override: vec!["http", "tls", "quic"],
            route_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbound {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<&'static str>,
    pub port: u16,
    pub protocol: &'static str,
    pub settings: Value,
    pub sniffing: Sniffing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
}

/// The complete document handed to the proxy engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDocument {
    pub log: Value,
    pub inbounds: Vec<Inbound>,
    pub outbounds: Vec<Value>,
    pub routing: RoutingSection,
}

impl ConfigDocument {
    /// Proxy outbounds, i.e. everything routed through by the default rule.
    pub fn proxy_outbound_count(&self) -> usize {
        self.outbounds.iter().filter(|o| is_proxy(o)).count()
    }
}

/// Outcome of link mode: the document plus per-link diagnostics.
#[derive(Debug, Clone)]
pub struct LinkComposition {
    pub document: ConfigDocument,
    pub skipped: Vec<SkippedLink>,
}

fn default_log() -> Value {
    json!({"loglevel": "info"})
}

/// Fixed HTTP and SOCKS listeners, plus the transparent-capture listener
/// when gateway mode is on.
pub fn build_inbounds(settings: &Settings) -> Vec<Inbound> {
    let mut inbounds = vec![
        Inbound {
            tag: None,
            port: settings.http_port,
            protocol: "http",
            settings: json!({"users": []}),
            sniffing: Sniffing::default(),
            stream_settings: None,
        },
        Inbound {
            tag: None,
            port: settings.socks_port,
            protocol: "socks",
            settings: json!({"auth": "noauth", "udp": true}),
            sniffing: Sniffing::default(),
            stream_settings: None,
        },
    ];

    if let Some(gateway) = settings.gateway {
        inbounds.push(Inbound {
            tag: Some("tproxy-in"),
            port: gateway.tproxy_port,
            protocol: "dokodemo-door",
            settings: json!({"network": "tcp,udp", "followRedirect": true}),
            sniffing: Sniffing::default(),
            stream_settings: Some(json!({"sockopt": {"tproxy": "tproxy"}})),
        });
    }
    inbounds
}

fn tag_of(outbound: &Value) -> Option<&str> {
    outbound.get("tag").and_then(Value::as_str)
}

fn protocol_of(outbound: &Value) -> Option<&str> {
    outbound.get("protocol").and_then(Value::as_str)
}

fn is_proxy(outbound: &Value) -> bool {
    !matches!(tag_of(outbound), Some(DIRECT_TAG | BLOCK_TAG))
        && !matches!(
            protocol_of(outbound),
            Some(PROTOCOL_DIRECT | PROTOCOL_BLOCK | PROTOCOL_DNS)
        )
}

/// Keep the first `direct` and `block` outbounds (synthesizing defaults when
/// absent) and order everything as proxy, dns, direct, block.
///
/// The engine picks default routes by position, so direct/block entries must
/// never precede proxies.
pub fn arrange_outbounds(outbounds: Vec<Value>) -> Result<Vec<Value>> {
    let mut direct: Option<Value> = None;
    let mut block: Option<Value> = None;
    let mut proxies = Vec::new();
    let mut dns = Vec::new();
    let mut direct_like = Vec::new();
    let mut block_like = Vec::new();

    for outbound in outbounds {
        match tag_of(&outbound) {
            Some(DIRECT_TAG) => {
                if direct.is_none() {
                    direct = Some(outbound);
                } else {
                    tracing::debug!("dropping duplicate '{DIRECT_TAG}' outbound");
                }
                continue;
            }
            Some(BLOCK_TAG) => {
                if block.is_none() {
                    block = Some(outbound);
                } else {
                    tracing::debug!("dropping duplicate '{BLOCK_TAG}' outbound");
                }
                continue;
            }
            _ => {}
        }
        match protocol_of(&outbound) {
            Some(PROTOCOL_DIRECT) => direct_like.push(outbound),
            Some(PROTOCOL_BLOCK) => block_like.push(outbound),
            Some(PROTOCOL_DNS) => dns.push(outbound),
            _ => proxies.push(outbound),
        }
    }

    if proxies.is_empty() {
        return Err(ComposeError::NoProxyOutbounds);
    }

    direct_like.push(direct.unwrap_or_else(
        || json!({"tag": DIRECT_TAG, "protocol": PROTOCOL_DIRECT, "settings": {}}),
    ));
    block_like.push(block.unwrap_or_else(
        || json!({"tag": BLOCK_TAG, "protocol": PROTOCOL_BLOCK, "settings": {}}),
    ));

    let mut arranged = proxies;
    arranged.extend(dns);
    arranged.extend(direct_like);
    arranged.extend(block_like);
    Ok(arranged)
}

/// Tags eligible for the default route, in outbound order.
pub fn proxy_tags(outbounds: &[Value]) -> Result<Vec<String>> {
    let tags: Vec<String> = outbounds
        .iter()
        .filter(|o| is_proxy(o))
        .filter_map(tag_of)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();
    if tags.is_empty() {
        return Err(ComposeError::NoProxyTags);
    }
    Ok(tags)
}

fn assemble(log: Value, outbounds: Vec<Value>, settings: &Settings) -> Result<ConfigDocument> {
    let outbounds = arrange_outbounds(outbounds)?;
    let tags = proxy_tags(&outbounds)?;
    let routing = compose_routing(&settings.bypass, &tags)?;
    tracing::info!(
        "assembled config: {} outbounds, {} proxy tags, balancer {}",
        outbounds.len(),
        tags.len(),
        if routing.balancers.is_some() { "on" } else { "off" }
    );
    Ok(ConfigDocument {
        log,
        inbounds: build_inbounds(settings),
        outbounds,
        routing,
    })
}

/// Link mode: decode every link, then assemble. Individual link failures are
/// reported in [`LinkComposition::skipped`].
pub fn compose_from_links(links: &[String], settings: &Settings) -> Result<LinkComposition> {
    let batch = synthesize_links(links);
    if batch.outbounds.is_empty() {
        return Err(ComposeError::NoValidNodes);
    }

    let outbounds = batch
        .outbounds
        .iter()
        .map(serde_json::to_value)
        .collect::<serde_json::Result<Vec<_>>>()
        .map_err(ComposeError::Serialize)?;

    Ok(LinkComposition {
        document: assemble(default_log(), outbounds, settings)?,
        skipped: batch.skipped,
    })
}

/// Augmentation mode: rebuild inbounds and routing around the outbounds of
/// an existing config, keeping its `log` section.
pub fn compose_from_source(source: Value, settings: &Settings) -> Result<ConfigDocument> {
    let Value::Object(mut source) = source else {
        return Err(ComposeError::NoOutbounds);
    };
    let outbounds = match source.remove("outbounds") {
        Some(Value::Array(outbounds)) if !outbounds.is_empty() => outbounds,
        _ => return Err(ComposeError::NoOutbounds),
    };
    let log = source.remove("log").unwrap_or_else(default_log);
    assemble(log, outbounds, settings)
}

/// Serialize the document and atomically replace `path` with it.
///
/// Written to a uniquely named temporary file in the same directory, then
/// renamed over `path`, so a failure never leaves a partial config there.
pub fn write_document(path: &Path, document: &ConfigDocument) -> anyhow::Result<()> {
    let mut json =
        serde_json::to_string_pretty(document).context("failed to serialize config document")?;
    json.push('\n');

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temporary config in {}", dir.display()))?;
    tmp.write_all(json.as_bytes())
        .and_then(|()| tmp.flush())
        .with_context(|| format!("failed to write temporary config {}", tmp.path().display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewaySettings;
    use crate::routing::BALANCER_TAG;

    fn vless(tag: &str, address: &str) -> Value {
        json!({
            "tag": tag,
            "protocol": "vless",
            "settings": {"vnext": [{"address": address, "port": 443, "users": []}]}
        })
    }

    fn tags(outbounds: &[Value]) -> Vec<&str> {
        outbounds.iter().map(|o| tag_of(o).unwrap_or("")).collect()
    }

    // ── Inbounds ─────────────────────────────────────────────────

    #[test]
    fn inbounds_without_gateway() {
        let inbounds = build_inbounds(&Settings::default());
        let protocols: Vec<&str> = inbounds.iter().map(|i| i.protocol).collect();
        assert_eq!(protocols, vec!["http", "socks"]);
        assert_eq!(inbounds[0].port, 3128);
        assert_eq!(inbounds[1].port, 1080);
    }

    #[test]
    fn gateway_adds_exactly_one_tproxy_inbound() {
        let settings = Settings {
            gateway: Some(GatewaySettings { tproxy_port: 23456 }),
            ..Settings::default()
        };
        let inbounds = build_inbounds(&settings);
        let tproxy: Vec<&Inbound> = inbounds
            .iter()
            .filter(|i| i.protocol == "dokodemo-door")
            .collect();
        assert_eq!(tproxy.len(), 1);
        assert_eq!(tproxy[0].port, 23456);

        let v = serde_json::to_value(tproxy[0]).unwrap();
        assert_eq!(v["tag"], "tproxy-in");
        assert_eq!(v["settings"]["followRedirect"], true);
        assert_eq!(v["streamSettings"]["sockopt"]["tproxy"], "tproxy");
    }

    #[test]
    fn sniffing_serializes_engine_keys() {
        let v = serde_json::to_value(Sniffing::default()).unwrap();
        assert_eq!(
            v,
            json!({"enabled": true, "destOverride": ["http", "tls", "quic"], "routeOnly": true})
        );
    }

    // ── Outbound arrangement ─────────────────────────────────────

    #[test]
    fn arrange_orders_proxy_dns_direct_block() {
        let arranged = arrange_outbounds(vec![
            json!({"tag": "block", "protocol": "blackhole"}),
            json!({"tag": "direct", "protocol": "freedom"}),
            json!({"tag": "dns-out", "protocol": "dns"}),
            vless("node1", "a.example"),
            json!({"tag": "frag", "protocol": "freedom"}),
            vless("node2", "b.example"),
        ])
        .unwrap();
        assert_eq!(
            tags(&arranged),
            vec!["node1", "node2", "dns-out", "frag", "direct", "block"]
        );
    }

    #[test]
    fn arrange_synthesizes_missing_direct_and_block() {
        let arranged = arrange_outbounds(vec![vless("node1", "a.example")]).unwrap();
        assert_eq!(
            arranged,
            vec![
                vless("node1", "a.example"),
                json!({"tag": "direct", "protocol": "freedom", "settings": {}}),
                json!({"tag": "block", "protocol": "blackhole", "settings": {}}),
            ]
        );
    }

    #[test]
    fn arrange_keeps_first_direct_and_block() {
        let arranged = arrange_outbounds(vec![
            json!({"tag": "direct", "protocol": "freedom", "settings": {"first": true}}),
            vless("node1", "a.example"),
            json!({"tag": "direct", "protocol": "freedom", "settings": {"first": false}}),
            json!({"tag": "block", "protocol": "blackhole", "settings": {"first": true}}),
            json!({"tag": "block", "protocol": "blackhole", "settings": {"first": false}}),
        ])
        .unwrap();
        assert_eq!(arranged.len(), 3);
        assert_eq!(arranged[1]["settings"]["first"], true);
        assert_eq!(arranged[2]["settings"]["first"], true);
    }

    #[test]
    fn arrange_without_proxies_fails() {
        let err = arrange_outbounds(vec![
            json!({"tag": "direct", "protocol": "freedom"}),
            json!({"tag": "dns-out", "protocol": "dns"}),
        ])
        .unwrap_err();
        assert!(matches!(err, ComposeError::NoProxyOutbounds));
    }

    #[test]
    fn proxy_tags_skip_untagged_and_builtin() {
        let outbounds = vec![
            vless("node1", "a.example"),
            json!({"protocol": "vless"}),
            json!({"tag": "dns-out", "protocol": "dns"}),
            json!({"tag": "direct", "protocol": "freedom"}),
        ];
        assert_eq!(proxy_tags(&outbounds).unwrap(), vec!["node1"]);
        assert!(matches!(
            proxy_tags(&[json!({"protocol": "vless"})]).unwrap_err(),
            ComposeError::NoProxyTags
        ));
    }

    // ── Augmentation mode ────────────────────────────────────────

    #[test]
    fn source_with_one_proxy_routes_to_it() {
        let source = json!({"log": {"loglevel": "warning"}, "outbounds": [vless("node1", "a.example")]});
        let doc = compose_from_source(source, &Settings::default()).unwrap();
        assert_eq!(doc.log, json!({"loglevel": "warning"}));
        assert!(doc.routing.balancers.is_none());

        let v = serde_json::to_value(&doc).unwrap();
        let default_rule = v["routing"]["rules"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(default_rule["outboundTag"], "node1");
        assert!(v["routing"].get("balancers").is_none());
    }

    #[test]
    fn source_with_two_proxies_uses_balancer() {
        let source = json!({"outbounds": [vless("node1", "a.example"), vless("node2", "b.example")]});
        let doc = compose_from_source(source, &Settings::default()).unwrap();
        assert_eq!(doc.log, default_log());

        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            v["routing"]["balancers"],
            json!([{"tag": BALANCER_TAG, "selector": ["node1", "node2"]}])
        );
        let default_rule = v["routing"]["rules"].as_array().unwrap().last().unwrap().clone();
        assert_eq!(default_rule["balancerTag"], BALANCER_TAG);
    }

    #[test]
    fn source_without_outbounds_fails() {
        for source in [
            json!({}),
            json!({"outbounds": []}),
            json!({"outbounds": {"tag": "x"}}),
            json!([1, 2]),
        ] {
            assert!(matches!(
                compose_from_source(source, &Settings::default()).unwrap_err(),
                ComposeError::NoOutbounds
            ));
        }
    }

    #[test]
    fn every_rule_has_an_effective_field() {
        let settings = Settings {
            gateway: Some(GatewaySettings { tproxy_port: 12345 }),
            ..Settings::default()
        };
        let source = json!({"outbounds": [vless("node1", "a.example")]});
        let v = serde_json::to_value(compose_from_source(source, &settings).unwrap()).unwrap();
        for rule in v["routing"]["rules"].as_array().unwrap() {
            assert_eq!(rule["type"], "field");
            assert!(
                ["domain", "ip", "network"].iter().any(|k| rule.get(*k).is_some()),
                "rule has no effective field: {rule}"
            );
        }
    }

    // ── Link mode ────────────────────────────────────────────────

    #[test]
    fn links_compose_with_direct_and_block_last() {
        let links = vec![
            "trojan://pw@a.example:443".to_string(),
            "ss://aes-256-gcm:pw@b.example:8388".to_string(),
        ];
        let composed = compose_from_links(&links, &Settings::default()).unwrap();
        assert!(composed.skipped.is_empty());
        assert_eq!(
            tags(&composed.document.outbounds),
            vec!["node1", "node2", "direct", "block"]
        );
        assert_eq!(composed.document.proxy_outbound_count(), 2);
        assert!(composed.document.routing.balancers.is_some());
    }

    #[test]
    fn links_all_failing_is_fatal() {
        let links = vec!["vmess://%%%".to_string(), "ss://%%%".to_string()];
        assert!(matches!(
            compose_from_links(&links, &Settings::default()).unwrap_err(),
            ComposeError::NoValidNodes
        ));
    }

    // ── Output ───────────────────────────────────────────────────

    fn sample_document() -> ConfigDocument {
        let source = json!({"outbounds": [vless("node1", "a.example")]});
        compose_from_source(source, &Settings::default()).unwrap()
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn write_document_replaces_target_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("config.json");
        std::fs::write(&out, "stale").unwrap();

        write_document(&out, &sample_document()).unwrap();

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.ends_with("}\n"));
        assert!(written.contains("\n  \"inbounds\": ["));
        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["outbounds"][0]["tag"], "node1");
        assert_eq!(dir_entries(dir.path()), vec!["config.json"]);
    }

    #[test]
    fn write_document_keeps_sibling_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let sibling = dir.path().join("config.tmp");
        std::fs::write(&sibling, "USER INPUT").unwrap();
        let out = dir.path().join("config.json");

        write_document(&out, &sample_document()).unwrap();

        assert_eq!(std::fs::read_to_string(&sibling).unwrap(), "USER INPUT");
        assert!(out.exists());
        assert_eq!(dir_entries(dir.path()), vec!["config.json", "config.tmp"]);
    }

    #[test]
    fn write_document_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("missing").join("config.json");
        assert!(write_document(&out, &sample_document()).is_err());
        assert!(!out.exists());
    }
}
