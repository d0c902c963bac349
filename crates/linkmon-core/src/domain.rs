use chrono::NaiveDateTime;

/// One inline button attached to a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub target_url: Option<String>,
}

impl Button {
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target_url: Some(url.into()),
        }
    }

    pub fn plain(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            target_url: None,
        }
    }
}

pub type ButtonRow = Vec<Button>;

/// A message as delivered by the chat connection.
///
/// Exists only while the pipeline processes it; never persisted as-is.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundMessageEvent {
    pub channel_id: String,
    pub message_id: i64,
    pub text: String,
    pub buttons: Vec<ButtonRow>,
}

impl InboundMessageEvent {
    pub fn new(channel_id: impl Into<String>, message_id: i64, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            message_id,
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<ButtonRow>) -> Self {
        self.buttons = buttons;
        self
    }

    /// Target URLs of all buttons, row by row, left to right.
    pub fn button_urls(&self) -> impl Iterator<Item = &str> {
        self.buttons
            .iter()
            .flatten()
            .filter_map(|b| b.target_url.as_deref())
    }
}

/// A persisted row of the `links` table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedLink {
    pub id: i64,
    pub channel_id: String,
    pub message_id: i64,
    pub link: String,
    pub timestamp: NaiveDateTime,
}
