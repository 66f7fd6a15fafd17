//! Run-summary notifications.
//!
//! A [`Message`] is a header plus sections and dividers. It is delivered
//! through a [`NotificationSink`]; [`SlackWebhook`] posts it as block-kit
//! JSON to an incoming webhook.

use serde::Serialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::stats::Stats;

/// Environment variable holding the webhook URL.
pub const SLACK_HOOK_ENV: &str = "SLACK_HOOK";

/// Slack rejects section text longer than this.
const MAX_SECTION_CHARS: usize = 3000;

const POST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no webhook configured in the SLACK_HOOK environment variable")]
    MissingHook,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("could not post message: [{status}]: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Header { text: TextObject },
    Section { text: TextObject },
    Divider,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Message {
    pub blocks: Vec<Block>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_header(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push(Block::Header {
            text: TextObject {
                kind: "plain_text",
                text: text.into(),
            },
        });
        self
    }

    /// Append a markdown section. Blank text is dropped since the API
    /// refuses empty sections.
    pub fn add_block(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if text.trim().is_empty() {
            return self;
        }
        self.blocks.push(Block::Section {
            text: TextObject {
                kind: "mrkdwn",
                text: truncate(text, MAX_SECTION_CHARS),
            },
        });
        self
    }

    pub fn add_divider(&mut self) -> &mut Self {
        self.blocks.push(Block::Divider);
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "blocks": self.blocks })
    }
}

fn truncate(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }
    let mut cut: String = text.chars().take(max.saturating_sub(4)).collect();
    cut.push_str("\n...");
    cut
}

/// Somewhere a finished run can be reported.
pub trait NotificationSink {
    fn post(&self, message: &Message) -> Result<(), NotifyError>;
}

/// Slack incoming webhook.
pub struct SlackWebhook {
    hook: String,
    client: reqwest::blocking::Client,
}

impl SlackWebhook {
    pub fn new(hook: impl Into<String>) -> Result<Self, NotifyError> {
        let hook = hook.into();
        if hook.trim().is_empty() {
            return Err(NotifyError::MissingHook);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(POST_TIMEOUT)
            .build()?;
        Ok(Self { hook, client })
    }

    /// Read the webhook from `SLACK_HOOK`.
    pub fn from_env() -> Result<Self, NotifyError> {
        let hook = env::var(SLACK_HOOK_ENV).map_err(|_| NotifyError::MissingHook)?;
        Self::new(hook)
    }
}

impl NotificationSink for SlackWebhook {
    fn post(&self, message: &Message) -> Result<(), NotifyError> {
        debug!(blocks = message.blocks.len(), "posting notification");
        let resp = self.client.post(&self.hook).json(&message.to_json()).send()?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Compose the end-of-run message: run name, tool version, headline
/// metrics, then the top failure categories.
pub fn run_summary(stats: &Stats, run_name: &str, version: &str, max_fails: usize) -> Message {
    let mut msg = Message::new();
    msg.add_header(run_name)
        .add_block(format!("Version: ```{}```", version.trim()))
        .add_divider()
        .add_block(stats.stats_text())
        .add_divider()
        .add_block(format!("Top {}:", max_fails))
        .add_block(stats.fails_text(max_fails, false));
    msg
}
