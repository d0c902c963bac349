//! Text-list to JSON conversion for channels and proxies, and loading the
//! resulting documents back at startup.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    errors::Error,
    normalize::{
        classify_channel, classify_proxy, ChannelKind, ChannelReference, Credentials,
        ProxyEndpoint, ProxyScheme,
    },
    Result,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatEntry {
    pub identifier: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatsDocument {
    #[serde(default)]
    pub chats: Vec<ChatEntry>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProxyEntry {
    #[serde(rename = "type")]
    pub kind: ProxyScheme,
    pub address: Option<String>,
    pub port: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub settings: ProxySettings,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxiesDocument {
    #[serde(default)]
    pub proxies: Vec<ProxyEntry>,
}

impl From<&ChannelReference> for ChatEntry {
    fn from(r: &ChannelReference) -> Self {
        Self {
            identifier: r.identifier.clone(),
            kind: r.kind,
            settings: serde_json::Map::new(),
        }
    }
}

impl ProxyEntry {
    /// `position` is 1-based among accepted entries.
    fn from_endpoint(p: &ProxyEndpoint, position: usize) -> Self {
        Self {
            kind: p.scheme,
            address: Some(p.host.clone()),
            port: Some(p.port.to_string()),
            username: p.credentials.as_ref().map(|c| c.username.clone()),
            password: p.credentials.as_ref().map(|c| c.password.clone()),
            settings: ProxySettings {
                comment: format!("Proxy {position}"),
            },
        }
    }

    fn to_endpoint(&self) -> std::result::Result<ProxyEndpoint, String> {
        if self.kind == ProxyScheme::Unknown {
            return Err("proxy type is unknown".to_string());
        }
        let host = self
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| "missing address".to_string())?;
        let port = self
            .port
            .as_deref()
            .ok_or_else(|| "missing port".to_string())?
            .trim()
            .parse::<u16>()
            .map_err(|e| format!("invalid port: {e}"))?;

        // Both halves must be present; a lone username is ignored.
        let credentials = match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(Credentials {
                username: u.to_string(),
                password: p.to_string(),
            }),
            _ => None,
        };

        Ok(ProxyEndpoint {
            scheme: self.kind,
            host: host.to_string(),
            port,
            credentials,
        })
    }
}

/// Convert a channel list (one identifier per line) into a `{"chats": [...]}` document.
///
/// Returns the number of accepted entries.
pub fn convert_chats(input: &Path, output: &Path) -> Result<usize> {
    let mut chats = Vec::new();
    for line in read_lines(input)? {
        let reference = classify_channel(&line);
        if !reference.is_known() {
            warn!(line = %line, "unrecognized chat identifier, skipping");
            continue;
        }
        chats.push(ChatEntry::from(&reference));
    }

    let count = chats.len();
    write_json(output, &ChatsDocument { chats })?;
    info!(count, output = %output.display(), "chat list converted");
    Ok(count)
}

/// Convert a proxy list (one proxy per line) into a `{"proxies": [...]}` document.
///
/// Returns the number of accepted entries.
pub fn convert_proxies(input: &Path, output: &Path) -> Result<usize> {
    let mut proxies = Vec::new();
    for line in read_lines(input)? {
        let endpoint = classify_proxy(&line);
        if !endpoint.is_known() {
            warn!(line = %line, "unrecognized proxy format, skipping");
            continue;
        }
        proxies.push(ProxyEntry::from_endpoint(&endpoint, proxies.len() + 1));
    }

    let count = proxies.len();
    write_json(output, &ProxiesDocument { proxies })?;
    info!(count, output = %output.display(), "proxy list converted");
    Ok(count)
}

/// Load the chats document. The file must exist; an empty `chats` array is
/// the explicit way to monitor every channel.
pub fn load_chats(path: &Path) -> Result<Vec<ChannelReference>> {
    let Some(doc) = read_json::<ChatsDocument>(path)? else {
        return Err(Error::config_format(path, "chats file not found"));
    };

    let mut out = Vec::with_capacity(doc.chats.len());
    for entry in doc.chats {
        if entry.kind == ChannelKind::Unknown {
            warn!(identifier = %entry.identifier, "chat entry of unknown type, skipping");
            continue;
        }
        out.push(ChannelReference {
            identifier: entry.identifier,
            kind: entry.kind,
        });
    }
    Ok(out)
}

/// Load the proxies document. A missing file means a direct connection.
pub fn load_proxies(path: &Path) -> Result<Vec<ProxyEndpoint>> {
    let Some(doc) = read_json::<ProxiesDocument>(path)? else {
        warn!(path = %path.display(), "proxies file not found, connecting directly");
        return Ok(Vec::new());
    };

    doc.proxies
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            entry.to_endpoint().map_err(|reason| {
                Error::config_format(path, format!("proxy #{}: {reason}", idx + 1))
            })
        })
        .collect()
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path).map_err(|e| Error::config_format(path, e))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::config_format(path, e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| Error::config_format(path, e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    fs::write(path, buf)?;
    Ok(())
}
