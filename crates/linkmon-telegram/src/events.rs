//! Update stream: teloxide dispatcher -> `InboundMessageEvent`s over mpsc.

use async_trait::async_trait;
use teloxide::{
    dispatching::ShutdownToken,
    prelude::*,
    types::{InlineKeyboardButtonKind, InlineKeyboardMarkup},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use linkmon_core::{
    domain::{Button, ButtonRow, InboundMessageEvent},
    errors::Error,
    ports::EventStream,
    Result,
};

use crate::TelegramConnection;

/// Live updates from a running dispatcher.
///
/// The stream ends when the dispatcher stops (Ctrl-C or [`TelegramEventStream::stop`]);
/// a dispatcher that dies abnormally surfaces as an error.
pub struct TelegramEventStream {
    rx: mpsc::Receiver<InboundMessageEvent>,
    dispatcher: Option<JoinHandle<()>>,
    shutdown: ShutdownToken,
}

impl TelegramConnection {
    /// Start long polling and return the event stream. `capacity` bounds the
    /// number of converted updates waiting for the pipeline.
    pub fn listen(&self, capacity: usize) -> TelegramEventStream {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(forward))
            .branch(Update::filter_channel_post().endpoint(forward));

        let mut dispatcher = Dispatcher::builder(self.bot(), handler)
            .dependencies(dptree::deps![tx])
            .default_handler(|_| async {})
            .enable_ctrlc_handler()
            .build();
        let shutdown = dispatcher.shutdown_token();

        let handle = tokio::spawn(async move {
            dispatcher.dispatch().await;
        });
        info!(bot = %self.username(), "listening for updates");

        TelegramEventStream {
            rx,
            dispatcher: Some(handle),
            shutdown,
        }
    }
}

impl TelegramEventStream {
    /// Stop polling and wait for the dispatcher to exit.
    pub async fn stop(mut self) {
        let dispatcher = self.dispatcher.take();
        stop_dispatcher(self.shutdown.shutdown(), dispatcher).await;
    }
}

/// A dispatcher that is idle cannot take the shutdown request, either because
/// it already exited or because its task has not started polling yet. The
/// latter would otherwise run forever, so the task is aborted.
async fn stop_dispatcher<F, E>(shutdown: std::result::Result<F, E>, handle: Option<JoinHandle<()>>)
where
    F: std::future::Future<Output = ()>,
{
    match shutdown {
        Ok(done) => done.await,
        Err(_) => {
            debug!("dispatcher idle, aborting its task");
            if let Some(handle) = &handle {
                handle.abort();
            }
        }
    }
    if let Some(handle) = handle {
        match handle.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => debug!("dispatcher task aborted"),
            Err(e) => warn!(error = %e, "dispatcher task ended abnormally"),
        }
    }
}

#[async_trait]
impl EventStream for TelegramEventStream {
    async fn next_event(&mut self) -> Result<Option<InboundMessageEvent>> {
        if let Some(event) = self.rx.recv().await {
            return Ok(Some(event));
        }

        // All senders are gone, so the dispatcher has exited.
        match self.dispatcher.take() {
            Some(handle) => match handle.await {
                Ok(()) => Ok(None),
                Err(e) => Err(Error::External(format!("telegram dispatcher failed: {e}"))),
            },
            None => Ok(None),
        }
    }
}

async fn forward(msg: Message, tx: mpsc::Sender<InboundMessageEvent>) -> ResponseResult<()> {
    let event = event_from_message(&msg);
    if tx.send(event).await.is_err() {
        debug!(chat_id = msg.chat.id.0, "event stream closed, update dropped");
    }
    Ok(())
}

pub fn event_from_message(msg: &Message) -> InboundMessageEvent {
    event_from_parts(
        msg.chat.id.0,
        msg.id.0,
        msg.text().or_else(|| msg.caption()),
        msg.reply_markup(),
    )
}

fn event_from_parts(
    chat_id: i64,
    message_id: i32,
    text: Option<&str>,
    markup: Option<&InlineKeyboardMarkup>,
) -> InboundMessageEvent {
    InboundMessageEvent::new(chat_id.to_string(), i64::from(message_id), text.unwrap_or(""))
        .with_buttons(markup.map(buttons_from_markup).unwrap_or_default())
}

/// Flatten teloxide's button kinds into label + optional target URL.
pub fn buttons_from_markup(markup: &InlineKeyboardMarkup) -> Vec<ButtonRow> {
    markup
        .inline_keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| {
                    let target_url = match &b.kind {
                        InlineKeyboardButtonKind::Url(url) => Some(url.to_string()),
                        InlineKeyboardButtonKind::WebApp(app) => Some(app.url.to_string()),
                        _ => None,
                    };
                    Button {
                        label: b.text.clone(),
                        target_url,
                    }
                })
                .collect()
        })
        .collect()
}
