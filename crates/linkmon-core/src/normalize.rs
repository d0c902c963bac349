//! Classification of operator-entered channel and proxy lines.
//!
//! Both classifiers are total: unrecognized input yields an `Unknown` sentinel
//! and the caller decides what to drop.

use std::{fmt, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Username,
    InviteLink,
    #[serde(rename = "id")]
    NumericId,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelReference {
    pub identifier: String,
    pub kind: ChannelKind,
}

impl ChannelReference {
    pub fn is_known(&self) -> bool {
        self.kind != ChannelKind::Unknown
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyScheme {
    Socks5,
    Http,
    Unknown,
}

impl ProxyScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Socks5 => "socks5",
            Self::Http => "http",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl ProxyEndpoint {
    fn unknown(raw: &str) -> Self {
        Self {
            scheme: ProxyScheme::Unknown,
            host: raw.to_string(),
            port: 0,
            credentials: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.scheme != ProxyScheme::Unknown
    }

    /// `scheme://[user:pass@]host:port`, the form HTTP clients accept.
    pub fn to_url(&self) -> String {
        match &self.credentials {
            Some(c) => format!(
                "{}://{}:{}@{}:{}",
                self.scheme, c.username, c.password, self.host, self.port
            ),
            None => format!("{}://{}:{}", self.scheme, self.host, self.port),
        }
    }
}

fn invite_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https?://t\.me/joinchat/").expect("valid regex"))
}

/// Classify one channel line. First matching rule wins.
pub fn classify_channel(line: &str) -> ChannelReference {
    let kind = if line.starts_with('@') {
        ChannelKind::Username
    } else if invite_link_re().is_match(line) {
        ChannelKind::InviteLink
    // ASCII digits only; other Unicode numerals are Unknown.
    } else if !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()) {
        ChannelKind::NumericId
    } else {
        ChannelKind::Unknown
    };

    ChannelReference {
        identifier: line.to_string(),
        kind,
    }
}

/// Classify one proxy line.
///
/// Bare `host:port` and `host:port:user:pass` lines default to socks5; nothing
/// in the content is used to guess http instead. Prefixed lines follow the
/// same 2-or-4 part shape, so a dangling username is rejected rather than
/// silently dropped.
pub fn classify_proxy(line: &str) -> ProxyEndpoint {
    let (scheme, rest) = if let Some(rest) = line.strip_prefix("socks5://") {
        (ProxyScheme::Socks5, rest)
    } else if let Some(rest) = line.strip_prefix("http://") {
        (ProxyScheme::Http, rest)
    } else {
        (ProxyScheme::Socks5, line)
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let credentials = match parts.len() {
        2 => None,
        4 => Some(Credentials {
            username: parts[2].to_string(),
            password: parts[3].to_string(),
        }),
        _ => return ProxyEndpoint::unknown(line),
    };

    let host = parts[0];
    let Ok(port) = parts[1].parse::<u16>() else {
        return ProxyEndpoint::unknown(line);
    };
    if host.is_empty() {
        return ProxyEndpoint::unknown(line);
    }

    ProxyEndpoint {
        scheme,
        host: host.to_string(),
        port,
        credentials,
    }
}
