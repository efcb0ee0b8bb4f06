use async_trait::async_trait;
use serde::Serialize;

use super::{Channel, ChannelError};
use crate::notifier::formatting::{severity_presentation, MessagePayload};

/// A team-chat webhook channel (Slack/Mattermost-style incoming webhook). Renders the
/// payload as a structured attachment block rather than a plain-text body.
pub struct TeamChatChannel {
    client: reqwest::Client,
    webhook_url: reqwest::Url,
}

impl TeamChatChannel {
    pub fn new(client: reqwest::Client, webhook_url: reqwest::Url) -> Self {
        Self { client, webhook_url }
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody {
    text: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct Attachment {
    color: &'static str,
    title: String,
    text: String,
}

#[async_trait]
impl Channel for TeamChatChannel {
    fn name(&self) -> &'static str {
        "team_chat"
    }

    #[tracing::instrument(level = "debug", skip(self, payload))]
    async fn send(&self, payload: &MessagePayload, recipient_handle: &str) -> Result<(), ChannelError> {
        let color = payload.severity.map(|s| severity_presentation(s).0).unwrap_or("#cccccc");
        let body = WebhookBody {
            text: format!("notification for {recipient_handle}"),
            attachments: vec![Attachment {
                color,
                title: payload.title.clone(),
                text: payload.body.clone(),
            }],
        };

        let encoded =
            serde_json::to_vec(&body).map_err(|err| ChannelError::Encoding(err.to_string()))?;

        let response = self
            .client
            .post(self.webhook_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(encoded)
            .send()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Transport(format!("team chat webhook responded with {status}")));
        }

        Ok(())
    }
}
