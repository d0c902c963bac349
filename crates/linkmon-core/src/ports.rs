use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{domain::InboundMessageEvent, Result};

/// Source of inbound messages, supplied by the chat connection.
///
/// `Ok(None)` is a clean end of stream; `Err` means the upstream connection
/// dropped. Either ends the pipeline.
#[async_trait]
pub trait EventStream: Send {
    async fn next_event(&mut self) -> Result<Option<InboundMessageEvent>>;
}

#[async_trait]
impl EventStream for mpsc::Receiver<InboundMessageEvent> {
    async fn next_event(&mut self) -> Result<Option<InboundMessageEvent>> {
        Ok(self.recv().await)
    }
}

/// Durable destination for extracted links.
#[async_trait]
pub trait LinkSink: Send + Sync {
    /// Append one link; returns the assigned row id.
    async fn append(&self, channel_id: &str, message_id: i64, link: &str) -> Result<i64>;

    /// Release resources once all writers are done.
    async fn shutdown(&self) -> Result<()>;
}

/// A channel the connection confirmed it can see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedChannel {
    /// The identifier as written in the config (`@name`, id, invite link).
    pub identifier: String,
    /// The id events from this channel carry in `InboundMessageEvent::channel_id`.
    pub channel_id: String,
    pub title: Option<String>,
}

#[async_trait]
pub trait ChannelResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<ResolvedChannel>;
}

/// Produces an authenticated connection to the chat network.
///
/// Credential prompts, sessions and transport live behind this trait; the core
/// only sees the resulting connection.
#[async_trait]
pub trait SessionBootstrap: Send + Sync {
    type Connection: ChannelResolver;

    async fn authenticate(&self) -> Result<Self::Connection>;
}
