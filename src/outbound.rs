//! Outbound synthesis from decoded nodes.
//!
//! Each scheme maps to one Xray outbound protocol. Synthesis is a pure
//! function of the node, its transport and the assigned tag. The batch
//! driver [`synthesize_links`] numbers tags by link position so skipped links
//! leave visible gaps (`node1`, `node3`, ...).

use serde::Serialize;
use serde_json::{json, Map, Value};

use subxray_links::{
    decode_link, normalize_transport, Credential, NodeDescriptor, NodeKind, Security,
    TransportDescriptor,
};

use crate::error::{ComposeError, Result};

/// Characters of a link shown in skip diagnostics.
const PREVIEW_CHARS: usize = 32;

/// One engine-schema outbound entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEntry {
    pub tag: String,
    pub protocol: &'static str,
    pub settings: Value,
    #[serde(rename = "streamSettings", skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
}

/// Render a transport descriptor as an Xray `streamSettings` object.
pub fn stream_settings(transport: &TransportDescriptor) -> Value {
    let mut out = Map::new();
    out.insert("network".into(), json!(transport.network.as_str()));
    out.insert("security".into(), json!(transport.security.as_str()));
    if let Some(ws) = &transport.ws {
        out.insert("wsSettings".into(), json!(ws));
    }
    if let Some(grpc) = &transport.grpc {
        out.insert("grpcSettings".into(), json!(grpc));
    }
    match &transport.security {
        Security::None => {}
        Security::Tls(tls) => {
            out.insert("tlsSettings".into(), json!(tls));
        }
        Security::Reality(reality) => {
            out.insert("realitySettings".into(), json!(reality));
        }
    }
    Value::Object(out)
}

/// vless: `settings.vnext[0].users[0]` carries id, encryption and flow.
pub fn vless_outbound(
    node: &NodeDescriptor,
    transport: &TransportDescriptor,
    tag: &str,
) -> OutboundEntry {
    let mut user = Map::new();
    user.insert("id".into(), json!(credential_secret(&node.credential)));
    user.insert(
        "encryption".into(),
        json!(node.param("encryption").unwrap_or("none")),
    );
    if let Some(flow) = node.param("flow") {
        user.insert("flow".into(), json!(flow));
    }

    OutboundEntry {
        tag: tag.to_string(),
        protocol: "vless",
        settings: json!({
            "vnext": [{"address": node.host, "port": node.port, "users": [user]}]
        }),
        stream_settings: Some(stream_settings(transport)),
    }
}

pub fn trojan_outbound(
    node: &NodeDescriptor,
    transport: &TransportDescriptor,
    tag: &str,
) -> OutboundEntry {
    OutboundEntry {
        tag: tag.to_string(),
        protocol: "trojan",
        settings: json!({
            "servers": [{
                "address": node.host,
                "port": node.port,
                "password": credential_secret(&node.credential),
            }]
        }),
        stream_settings: Some(stream_settings(transport)),
    }
}

pub fn vmess_outbound(
    node: &NodeDescriptor,
    transport: &TransportDescriptor,
    tag: &str,
) -> OutboundEntry {
    let alter_id = match &node.credential {
        Credential::Uid { alter_id, .. } => *alter_id,
        _ => 0,
    };
    OutboundEntry {
        tag: tag.to_string(),
        protocol: "vmess",
        settings: json!({
            "vnext": [{
                "address": node.host,
                "port": node.port,
                "users": [{
                    "id": credential_secret(&node.credential),
                    "alterId": alter_id,
                    "security": "auto",
                }]
            }]
        }),
        stream_settings: Some(stream_settings(transport)),
    }
}

/// ss and plain ssr both become a native shadowsocks outbound without
/// stream settings.
pub fn shadowsocks_outbound(node: &NodeDescriptor, tag: &str) -> OutboundEntry {
    let (method, password) = match &node.credential {
        Credential::MethodPassword { method, password } => (method.as_str(), password.as_str()),
        other => ("", credential_secret(other)),
    };
    OutboundEntry {
        tag: tag.to_string(),
        protocol: "shadowsocks",
        settings: json!({
            "servers": [{
                "address": node.host,
                "port": node.port,
                "method": method,
                "password": password,
            }]
        }),
        stream_settings: None,
    }
}

fn credential_secret(credential: &Credential) -> &str {
    match credential {
        Credential::Uid { id, .. } => id,
        Credential::Password(password) => password,
        Credential::MethodPassword { password, .. } => password,
    }
}

/// Turn one decoded node into an outbound.
pub fn synthesize(node: &NodeDescriptor, tag: &str) -> Result<OutboundEntry> {
    match &node.kind {
        NodeKind::Vless => {
            let transport = normalize_transport(&node.params, None)?;
            Ok(vless_outbound(node, &transport, tag))
        }
        NodeKind::Trojan => {
            let transport = normalize_transport(&node.params, None)?;
            Ok(trojan_outbound(node, &transport, tag))
        }
        NodeKind::Vmess { raw } => {
            let transport = normalize_transport(&node.params, Some(raw))?;
            Ok(vmess_outbound(node, &transport, tag))
        }
        NodeKind::Shadowsocks => Ok(shadowsocks_outbound(node, tag)),
        NodeKind::ShadowsocksR { protocol, obfs } => {
            // Only origin/plain SSR is wire-compatible with shadowsocks.
            let protocol = protocol.to_ascii_lowercase();
            let obfs = obfs.to_ascii_lowercase();
            if protocol != "origin" || obfs != "plain" {
                return Err(ComposeError::UnsupportedPlugin { protocol, obfs });
            }
            Ok(shadowsocks_outbound(node, tag))
        }
    }
}

/// Decode and synthesize a single link.
pub fn synthesize_link(link: &str, tag: &str) -> Result<OutboundEntry> {
    let node = decode_link(link)?;
    synthesize(&node, tag)
}

/// A link that could not be turned into an outbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLink {
    pub tag: String,
    pub preview: String,
    pub reason: String,
}

/// Result of synthesizing a batch of links.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub outbounds: Vec<OutboundEntry>,
    pub skipped: Vec<SkippedLink>,
}

/// Synthesize every link, tagging by 1-based position. Failures are logged
/// and recorded, never propagated.
pub fn synthesize_links(links: &[String]) -> Batch {
    let mut batch = Batch::default();
    for (i, link) in links.iter().enumerate() {
        let tag = format!("node{}", i + 1);
        match synthesize_link(link, &tag) {
            Ok(outbound) => batch.outbounds.push(outbound),
            Err(e) => {
                let preview: String = link.chars().take(PREVIEW_CHARS).collect();
                tracing::warn!("skip {tag} ({preview}...): {e}");
                batch.skipped.push(SkippedLink {
                    tag,
                    preview,
                    reason: e.to_string(),
                });
            }
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    const UUID: &str = "11111111-1111-1111-1111-111111111111";

    fn value(entry: &OutboundEntry) -> Value {
        serde_json::to_value(entry).unwrap()
    }

    #[test]
    fn vless_reality_outbound() {
        let link = format!(
            "vless://{UUID}@r.example.com:443?security=reality&sni=www.example.com&fp=chrome&pbk=KEY&sid=01&type=tcp&flow=xtls-rprx-vision#r"
        );
        let v = value(&synthesize_link(&link, "node1").unwrap());
        assert_eq!(v["tag"], "node1");
        assert_eq!(v["protocol"], "vless");
        assert_eq!(
            v["settings"]["vnext"][0],
            json!({
                "address": "r.example.com",
                "port": 443,
                "users": [{"id": UUID, "encryption": "none", "flow": "xtls-rprx-vision"}]
            })
        );
        assert_eq!(
            v["streamSettings"],
            json!({
                "network": "tcp",
                "security": "reality",
                "realitySettings": {
                    "serverName": "www.example.com",
                    "fingerprint": "chrome",
                    "publicKey": "KEY",
                    "shortId": "01"
                }
            })
        );
    }

    #[test]
    fn trojan_ws_tls_outbound() {
        let link = "trojan://pw@t.example.com:8443?security=tls&type=ws&host=cdn.example.com&path=%2Fws&alpn=h2,http/1.1";
        let v = value(&synthesize_link(link, "node2").unwrap());
        assert_eq!(v["protocol"], "trojan");
        assert_eq!(
            v["settings"]["servers"][0],
            json!({"address": "t.example.com", "port": 8443, "password": "pw"})
        );
        assert_eq!(
            v["streamSettings"],
            json!({
                "network": "ws",
                "security": "tls",
                "wsSettings": {"path": "/ws", "headers": {"Host": "cdn.example.com"}},
                "tlsSettings": {"alpn": ["h2", "http/1.1"]}
            })
        );
    }

    #[test]
    fn vmess_grpc_outbound_uses_json_fields() {
        let payload = json!({
            "add": "vm.example.com", "port": "2083", "id": UUID, "aid": "0",
            "net": "grpc", "path": "svc", "tls": "tls", "sni": "vm.example.com"
        });
        let link = format!("vmess://{}", URL_SAFE_NO_PAD.encode(payload.to_string()));
        let v = value(&synthesize_link(&link, "node1").unwrap());
        assert_eq!(v["protocol"], "vmess");
        assert_eq!(
            v["settings"]["vnext"][0]["users"][0],
            json!({"id": UUID, "alterId": 0, "security": "auto"})
        );
        assert_eq!(v["streamSettings"]["network"], "grpc");
        assert_eq!(
            v["streamSettings"]["grpcSettings"],
            json!({"serviceName": "svc", "multiMode": false})
        );
        assert_eq!(
            v["streamSettings"]["tlsSettings"],
            json!({"serverName": "vm.example.com"})
        );
    }

    #[test]
    fn shadowsocks_outbound_has_no_stream_settings() {
        let v = value(&synthesize_link("ss://aes-256-gcm:pw@ss.example.com:8388", "node4").unwrap());
        assert_eq!(v["protocol"], "shadowsocks");
        assert_eq!(
            v["settings"]["servers"][0],
            json!({"address": "ss.example.com", "port": 8388, "method": "aes-256-gcm", "password": "pw"})
        );
        assert!(v.get("streamSettings").is_none());
    }

    fn ssr_link(protocol: &str, obfs: &str) -> String {
        let record = format!(
            "ssr.example.com:443:{protocol}:aes-256-cfb:{obfs}:{}",
            URL_SAFE_NO_PAD.encode("pw")
        );
        format!("ssr://{}", URL_SAFE_NO_PAD.encode(record))
    }

    #[test]
    fn plain_ssr_becomes_shadowsocks() {
        let v = value(&synthesize_link(&ssr_link("origin", "plain"), "node1").unwrap());
        assert_eq!(v["protocol"], "shadowsocks");
        assert_eq!(v["settings"]["servers"][0]["method"], "aes-256-cfb");
        assert_eq!(v["settings"]["servers"][0]["password"], "pw");
    }

    #[test]
    fn ssr_with_plugins_is_rejected() {
        let err = synthesize_link(&ssr_link("auth_aes128_md5", "plain"), "node1").unwrap_err();
        assert!(matches!(err, ComposeError::UnsupportedPlugin { .. }));
        assert!(err.to_string().contains("requires plugins"));

        let err = synthesize_link(&ssr_link("origin", "http_simple"), "node1").unwrap_err();
        assert!(matches!(err, ComposeError::UnsupportedPlugin { .. }));
    }

    #[test]
    fn unknown_network_is_a_per_link_error() {
        let link = format!("vless://{UUID}@a.example:443?type=pigeon");
        assert!(matches!(
            synthesize_link(&link, "node1").unwrap_err(),
            ComposeError::Link(_)
        ));
    }

    #[test]
    fn batch_tags_follow_link_position() {
        let links = vec![
            "trojan://pw@a.example:443".to_string(),
            "vmess://%%%not-base64".to_string(),
            "ss://aes-256-gcm:pw@c.example:8388".to_string(),
        ];
        let batch = synthesize_links(&links);
        let tags: Vec<&str> = batch.outbounds.iter().map(|o| o.tag.as_str()).collect();
        assert_eq!(tags, vec!["node1", "node3"]);
        assert_eq!(batch.skipped.len(), 1);
        assert_eq!(batch.skipped[0].tag, "node2");
        assert_eq!(batch.skipped[0].preview, "vmess://%%%not-base64");
    }

    #[test]
    fn skip_preview_is_truncated() {
        let long = format!("vmess://{}", "A".repeat(100));
        let batch = synthesize_links(&[long]);
        assert!(batch.outbounds.is_empty());
        assert_eq!(batch.skipped[0].preview.chars().count(), PREVIEW_CHARS);
    }
}
