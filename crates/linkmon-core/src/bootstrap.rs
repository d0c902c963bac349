use tracing::{error, info};

use crate::{
    errors::Error,
    normalize::ChannelReference,
    ports::{ChannelResolver, ResolvedChannel},
};

/// Resolve every configured channel, keeping the reachable ones.
///
/// Unreachable channels are logged and left out; they are simply not monitored.
pub async fn verify_channels(
    resolver: &dyn ChannelResolver,
    chats: &[ChannelReference],
) -> Vec<ResolvedChannel> {
    let mut reachable = Vec::with_capacity(chats.len());
    for chat in chats {
        match resolver.resolve(&chat.identifier).await {
            Ok(resolved) => {
                info!(
                    identifier = %chat.identifier,
                    channel_id = %resolved.channel_id,
                    title = resolved.title.as_deref().unwrap_or(""),
                    "channel reachable"
                );
                reachable.push(resolved);
            }
            Err(e) => {
                let e = match e {
                    e @ Error::ChannelUnreachable { .. } => e,
                    other => Error::ChannelUnreachable {
                        identifier: chat.identifier.clone(),
                        reason: other.to_string(),
                    },
                };
                error!(identifier = %chat.identifier, error = %e, "channel not monitored");
            }
        }
    }
    info!(
        configured = chats.len(),
        reachable = reachable.len(),
        "channel verification finished"
    );
    reachable
}
