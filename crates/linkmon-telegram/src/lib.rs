//! Telegram adapter (teloxide).
//!
//! Implements the `linkmon-core` session, resolver and event-stream ports over
//! the Telegram Bot API.

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{Chat, ChatId, Recipient},
};
use tokio::time::sleep;
use tracing::{info, warn};

pub mod events;

use linkmon_core::{
    errors::Error,
    normalize::{classify_channel, ChannelKind, ProxyEndpoint},
    ports::{ChannelResolver, ResolvedChannel, SessionBootstrap},
    Result,
};

pub use events::TelegramEventStream;

/// Credentials and transport for one bot connection.
pub struct TelegramSession {
    token: String,
    proxy: Option<ProxyEndpoint>,
}

impl TelegramSession {
    pub fn new(token: impl Into<String>, proxy: Option<ProxyEndpoint>) -> Self {
        Self {
            token: token.into(),
            proxy,
        }
    }

    fn build_bot(&self) -> Result<Bot> {
        let mut builder = teloxide::net::default_reqwest_settings();
        if let Some(p) = &self.proxy {
            let proxy = reqwest::Proxy::all(p.to_url()).map_err(|e| {
                Error::Config(format!("invalid proxy {}:{}: {e}", p.host, p.port))
            })?;
            builder = builder.proxy(proxy);
            info!(scheme = %p.scheme, host = %p.host, port = p.port, "using proxy");
        }
        let client = builder
            .build()
            .map_err(|e| Error::External(format!("http client: {e}")))?;
        Ok(Bot::with_client(self.token.clone(), client))
    }
}

#[async_trait]
impl SessionBootstrap for TelegramSession {
    type Connection = TelegramConnection;

    async fn authenticate(&self) -> Result<TelegramConnection> {
        let bot = self.build_bot()?;
        let me = with_retry(|| bot.get_me())
            .await
            .map_err(|e| Error::External(format!("telegram authentication failed: {e}")))?;
        let username = me.username().to_string();
        info!(%username, "authenticated with telegram");
        Ok(TelegramConnection { bot, username })
    }
}

/// An authenticated bot.
#[derive(Clone)]
pub struct TelegramConnection {
    bot: Bot,
    username: String,
}

impl TelegramConnection {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    async fn get_chat(&self, recipient: Recipient) -> std::result::Result<Chat, String> {
        with_retry(|| self.bot.get_chat(recipient.clone()))
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ChannelResolver for TelegramConnection {
    async fn resolve(&self, identifier: &str) -> Result<ResolvedChannel> {
        let unreachable = |reason: String| Error::ChannelUnreachable {
            identifier: identifier.to_string(),
            reason,
        };

        let chat = match classify_channel(identifier).kind {
            ChannelKind::Username => self
                .get_chat(Recipient::ChannelUsername(identifier.to_string()))
                .await
                .map_err(unreachable)?,
            ChannelKind::NumericId => {
                let mut last_err = String::from("no candidate ids");
                let mut found = None;
                for id in numeric_candidates(identifier) {
                    match self.get_chat(Recipient::Id(ChatId(id))).await {
                        Ok(chat) => {
                            found = Some(chat);
                            break;
                        }
                        Err(e) => last_err = e,
                    }
                }
                found.ok_or_else(|| unreachable(last_err))?
            }
            ChannelKind::InviteLink => {
                return Err(unreachable(
                    "bots cannot join by invite link; add the bot to the chat and list its id"
                        .to_string(),
                ))
            }
            ChannelKind::Unknown => {
                return Err(unreachable("unrecognized identifier".to_string()));
            }
        };

        Ok(ResolvedChannel {
            identifier: identifier.to_string(),
            channel_id: chat.id.0.to_string(),
            title: chat.title().map(str::to_string),
        })
    }
}

/// Bot API ids to try for a numeric identifier. Positive channel ids (as shown
/// by user clients) are also tried in their `-100…` form.
fn numeric_candidates(identifier: &str) -> Vec<i64> {
    let Ok(id) = identifier.parse::<i64>() else {
        return Vec::new();
    };
    let mut out = vec![id];
    if id > 0 {
        if let Ok(prefixed) = format!("-100{id}").parse::<i64>() {
            out.push(prefixed);
        }
    }
    out
}

async fn with_retry<T, Fut>(
    mut op: impl FnMut() -> Fut,
) -> std::result::Result<T, teloxide::RequestError>
where
    Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
    Fut::IntoFuture: Send,
{
    const MAX_RETRIES: usize = 1;
    let mut attempts = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(teloxide::RequestError::RetryAfter(wait)) if attempts < MAX_RETRIES => {
                attempts += 1;
                warn!(?wait, "telegram rate limit, waiting before retry");
                sleep(wait).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_candidates_include_bot_api_form() {
        assert_eq!(numeric_candidates("1234567"), vec![1234567, -1001234567]);
        assert_eq!(numeric_candidates("-1001234567"), vec![-1001234567]);
        assert!(numeric_candidates("99999999999999999999").is_empty());
    }

    #[tokio::test]
    async fn rate_limited_call_waits_as_asked_then_retries() {
        let wait = std::time::Duration::from_millis(60);
        let mut calls = 0u32;
        let started = std::time::Instant::now();
        let out = with_retry(|| {
            calls += 1;
            let first = calls == 1;
            async move {
                if first {
                    Err(teloxide::RequestError::RetryAfter(wait))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls, 2);
        let elapsed = started.elapsed();
        assert!(elapsed >= wait, "retried after {elapsed:?}");
        assert!(elapsed < std::time::Duration::from_millis(900));
    }

    #[tokio::test]
    async fn second_rate_limit_is_returned() {
        let out: std::result::Result<(), _> = with_retry(|| async {
            Err(teloxide::RequestError::RetryAfter(
                std::time::Duration::from_millis(1),
            ))
        })
        .await;
        assert!(matches!(out, Err(teloxide::RequestError::RetryAfter(_))));
    }

    #[test]
    fn session_builds_bot_through_proxy() {
        let proxy = linkmon_core::normalize::classify_proxy("127.0.0.1:1080:u:p");
        let session = TelegramSession::new("123:abc", Some(proxy));
        assert!(session.build_bot().is_ok());

        let direct = TelegramSession::new("123:abc", None);
        assert!(direct.build_bot().is_ok());
    }
}
