//! Per-scheme link decoders.
//!
//! Every decoder turns one link into a [`NodeDescriptor`] or a typed
//! [`LinkError`]. Transport parameters are kept raw here; see
//! [`crate::transport`] for their interpretation.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::{Map, Value};
use url::Url;

use crate::b64;
use crate::error::{LinkError, Result};
use crate::node::{Credential, NodeDescriptor, NodeKind, Scheme};
use crate::transport::legacy_str;

/// Port assumed for vless/trojan links without an explicit port.
const DEFAULT_TLS_PORT: u16 = 443;

/// Decode a single link of any supported scheme.
pub fn decode_link(link: &str) -> Result<NodeDescriptor> {
    let link = link.trim();
    let scheme = Scheme::detect(link).ok_or_else(|| {
        LinkError::UnsupportedScheme(link.split("://").next().unwrap_or(link).to_string())
    })?;

    let node = match scheme {
        Scheme::Vless => decode_authority_link(link, Scheme::Vless)?,
        Scheme::Trojan => decode_authority_link(link, Scheme::Trojan)?,
        Scheme::Vmess => decode_vmess(link)?,
        Scheme::Shadowsocks => decode_shadowsocks(link)?,
        Scheme::ShadowsocksR => decode_shadowsocks_r(link)?,
    };
    tracing::debug!(
        "decoded {} node {}:{} ({})",
        node.scheme(),
        node.host,
        node.port,
        if node.name.is_empty() { "unnamed" } else { &node.name }
    );
    Ok(node)
}

fn percent_decode_lossy(s: &str) -> String {
    match urlencoding::decode_binary(s.as_bytes()) {
        Cow::Borrowed(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        Cow::Owned(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
    }
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(LinkError::InvalidPort(raw.to_string())),
    }
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn split_host_port(scheme: Scheme, hostport: &str) -> Result<(String, u16)> {
    let (host, port) = hostport.rsplit_once(':').ok_or(LinkError::Malformed {
        scheme: scheme.as_str(),
        reason: format!("expected host:port, got '{hostport}'"),
    })?;
    let host = strip_brackets(host);
    if host.is_empty() {
        return Err(LinkError::MissingField {
            scheme: scheme.as_str(),
            field: "host",
        });
    }
    Ok((host.to_string(), parse_port(port)?))
}

/// `vless://` and `trojan://`: `<credential>@host[:port][?query][#name]`.
fn decode_authority_link(link: &str, scheme: Scheme) -> Result<NodeDescriptor> {
    let url = Url::parse(link).map_err(|e| LinkError::Malformed {
        scheme: scheme.as_str(),
        reason: e.to_string(),
    })?;

    let host = url
        .host_str()
        .map(strip_brackets)
        .filter(|h| !h.is_empty())
        .ok_or(LinkError::MissingField {
            scheme: scheme.as_str(),
            field: "host",
        })?
        .to_string();

    let port = match url.port() {
        Some(0) => return Err(LinkError::InvalidPort("0".into())),
        Some(port) => port,
        None => DEFAULT_TLS_PORT,
    };

    let secret = percent_decode_lossy(url.username());
    if secret.is_empty() {
        return Err(LinkError::MissingField {
            scheme: scheme.as_str(),
            field: if scheme == Scheme::Vless { "id" } else { "password" },
        });
    }

    let params: BTreeMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let name = url.fragment().map(percent_decode_lossy).unwrap_or_default();

    let (kind, credential) = if scheme == Scheme::Vless {
        (
            NodeKind::Vless,
            Credential::Uid {
                id: secret,
                alter_id: 0,
            },
        )
    } else {
        (NodeKind::Trojan, Credential::Password(secret))
    };

    Ok(NodeDescriptor {
        kind,
        host,
        port,
        credential,
        name,
        params,
    })
}

/// `vmess://BASE64(JSON)`.
fn decode_vmess(link: &str) -> Result<NodeDescriptor> {
    let payload = Scheme::Vmess.strip(link).trim();
    let (payload, fragment) = match payload.split_once('#') {
        Some((p, f)) => (p, Some(f)),
        None => (payload, None),
    };

    let json: Value = serde_json::from_str(&b64::decode_lossy(payload)?)?;
    let Value::Object(raw) = json else {
        return Err(LinkError::Malformed {
            scheme: "vmess",
            reason: "payload is not a JSON object".into(),
        });
    };
    let obj = Some(&raw);

    let missing = |field: &'static str| LinkError::MissingField {
        scheme: "vmess",
        field,
    };
    let host = legacy_str(obj, "add")
        .or_else(|| legacy_str(obj, "host"))
        .ok_or_else(|| missing("add"))?;
    let port = parse_port(&legacy_str(obj, "port").ok_or_else(|| missing("port"))?)?;
    let id = legacy_str(obj, "id").ok_or_else(|| missing("id"))?;
    let alter_id = match legacy_str(obj, "aid") {
        Some(aid) => aid.trim().parse::<u32>().map_err(|_| LinkError::Malformed {
            scheme: "vmess",
            reason: format!("invalid alterId '{aid}'"),
        })?,
        None => 0,
    };
    let name = legacy_str(obj, "ps")
        .or_else(|| fragment.map(percent_decode_lossy))
        .unwrap_or_default();

    let params = vmess_params(&raw);

    Ok(NodeDescriptor {
        kind: NodeKind::Vmess { raw },
        host,
        port,
        credential: Credential::Uid { id, alter_id },
        name,
        params,
    })
}

/// Project vmess JSON keys onto query-style transport parameters.
fn vmess_params(raw: &Map<String, Value>) -> BTreeMap<String, String> {
    let obj = Some(raw);
    let mut params = BTreeMap::new();
    if let Some(net) = legacy_str(obj, "net") {
        params.insert("type".to_string(), net);
    }
    for key in ["host", "path", "alpn", "fp"] {
        if let Some(v) = legacy_str(obj, key) {
            params.insert(key.to_string(), v);
        }
    }
    if let Some(sni) = legacy_str(obj, "sni").or_else(|| legacy_str(obj, "servername")) {
        params.insert("sni".to_string(), sni);
    }
    if let Some(tls) = legacy_str(obj, "tls") {
        let tls = tls.to_ascii_lowercase();
        if tls == "tls" || tls == "reality" {
            params.insert("security".to_string(), tls);
        }
    }
    params
}

/// `ss://` in its three common shapes:
///
/// 1. `ss://method:password@host:port`
/// 2. `ss://BASE64(method:password)@host:port`
/// 3. `ss://BASE64(method:password@host:port)`
///
/// Each is tried in turn; the first that parses wins.
fn decode_shadowsocks(link: &str) -> Result<NodeDescriptor> {
    let body = Scheme::Shadowsocks.strip(link);
    let (body, name) = match body.split_once('#') {
        Some((b, f)) => (b, percent_decode_lossy(f)),
        None => (body, String::new()),
    };
    let (body, query) = body.split_once('?').unwrap_or((body, ""));
    let netloc = body.trim_start_matches('/');

    let mut attempts: Vec<Result<ShadowsocksParts>> = Vec::with_capacity(3);
    if let Some((userinfo, hostport)) = netloc.split_once('@') {
        let hostport = hostport.trim_end_matches('/');
        if userinfo.contains(':') {
            attempts.push(ss_cleartext(userinfo, hostport));
        }
        if attempts.last().map_or(true, |r| r.is_err()) {
            attempts.push(ss_base64_userinfo(userinfo, hostport));
        }
    }
    if attempts.last().map_or(true, |r| r.is_err()) {
        attempts.push(ss_base64_whole(netloc));
    }

    let parts = match attempts.pop() {
        Some(Ok(parts)) => parts,
        Some(Err(e)) => return Err(LinkError::UnrecognizedShadowsocks(e.to_string())),
        None => return Err(LinkError::UnrecognizedShadowsocks("empty link".into())),
    };

    // Plugin options are not representable natively; keep them for diagnostics.
    let params = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    Ok(NodeDescriptor {
        kind: NodeKind::Shadowsocks,
        host: parts.host,
        port: parts.port,
        credential: Credential::MethodPassword {
            method: parts.method,
            password: parts.password,
        },
        name,
        params,
    })
}

struct ShadowsocksParts {
    method: String,
    password: String,
    host: String,
    port: u16,
}

fn split_method_password(cred: &str) -> Result<(String, String)> {
    match cred.split_once(':') {
        Some((method, password)) if !method.is_empty() => {
            Ok((method.to_string(), password.to_string()))
        }
        _ => Err(LinkError::Malformed {
            scheme: "ss",
            reason: "expected method:password".into(),
        }),
    }
}

fn ss_cleartext(userinfo: &str, hostport: &str) -> Result<ShadowsocksParts> {
    let (method, password) = split_method_password(&percent_decode_lossy(userinfo))?;
    let (host, port) = split_host_port(Scheme::Shadowsocks, hostport)?;
    Ok(ShadowsocksParts {
        method,
        password,
        host,
        port,
    })
}

fn ss_base64_userinfo(userinfo: &str, hostport: &str) -> Result<ShadowsocksParts> {
    let decoded = b64::decode_lossy(&percent_decode_lossy(userinfo))?;
    let (method, password) = split_method_password(&decoded)?;
    // Some providers leave a stray `@host` inside the encoded userinfo.
    let password = password
        .split_once('@')
        .map_or(password.as_str(), |(p, _)| p)
        .to_string();
    let (host, port) = split_host_port(Scheme::Shadowsocks, hostport)?;
    Ok(ShadowsocksParts {
        method,
        password,
        host,
        port,
    })
}

fn ss_base64_whole(netloc: &str) -> Result<ShadowsocksParts> {
    let decoded = b64::decode_lossy(netloc)?;
    let (method, rest) = split_method_password(decoded.trim())?;
    let (password, hostport) = rest.rsplit_once('@').ok_or(LinkError::Malformed {
        scheme: "ss",
        reason: "expected method:password@host:port".into(),
    })?;
    let (host, port) = split_host_port(Scheme::Shadowsocks, hostport)?;
    Ok(ShadowsocksParts {
        method,
        password: password.to_string(),
        host,
        port,
    })
}

/// `ssr://BASE64(host:port:protocol:method:obfs:BASE64(password)[/?query])`.
fn decode_shadowsocks_r(link: &str) -> Result<NodeDescriptor> {
    let decoded = b64::decode_lossy(Scheme::ShadowsocksR.strip(link).trim())?;
    let (main, query) = decoded.split_once("/?").unwrap_or((&decoded, ""));

    // Split from the right so IPv6 hosts keep their colons.
    let fields: Vec<&str> = main.trim().rsplitn(6, ':').collect();
    let [password_b64, obfs, method, protocol, port, host] = fields[..] else {
        return Err(LinkError::Malformed {
            scheme: "ssr",
            reason: "expected host:port:protocol:method:obfs:password".into(),
        });
    };

    let host = strip_brackets(host);
    if host.is_empty() {
        return Err(LinkError::MissingField {
            scheme: "ssr",
            field: "host",
        });
    }
    let port = parse_port(port)?;
    let password = b64::decode_lossy(password_b64)?;

    let params: BTreeMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let name = params
        .get("remarks")
        .filter(|r| !r.is_empty())
        .map(|r| b64::decode_lossy(r).unwrap_or_else(|_| r.clone()))
        .unwrap_or_default();

    Ok(NodeDescriptor {
        kind: NodeKind::ShadowsocksR {
            protocol: protocol.to_string(),
            obfs: obfs.to_string(),
        },
        host: host.to_string(),
        port,
        credential: Credential::MethodPassword {
            method: method.to_string(),
            password,
        },
        name,
        params,
    })
}
