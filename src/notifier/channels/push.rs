use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::{Channel, ChannelError};
use crate::notifier::formatting::{severity_presentation, MessagePayload};

/// A push-messaging channel (e.g. a chat bot's direct-message API). Absent unless a bot
/// token is configured -- constructing one without a token is a programmer error, not a
/// runtime one, which is why `new` takes the token directly rather than an `Option`.
pub struct PushChannel {
    client: reqwest::Client,
    api_base: reqwest::Url,
    bot_token: SecretString,
}

impl PushChannel {
    pub fn new(client: reqwest::Client, api_base: reqwest::Url, bot_token: SecretString) -> Self {
        Self { client, api_base, bot_token }
    }
}

#[derive(Debug, Serialize)]
struct PushMessageBody<'a> {
    chat: &'a str,
    text: String,
}

#[async_trait]
impl Channel for PushChannel {
    fn name(&self) -> &'static str {
        "push"
    }

    #[tracing::instrument(level = "debug", skip(self, payload))]
    async fn send(&self, payload: &MessagePayload, recipient_handle: &str) -> Result<(), ChannelError> {
        let glyph = payload.severity.map(|s| severity_presentation(s).1).unwrap_or("");
        let text = format!("{glyph} {}\n{}", payload.title, payload.body).trim().to_string();

        let mut url = self.api_base.clone();
        url.query_pairs_mut().append_pair("token", self.bot_token.expose_secret());

        let body = serde_json::to_vec(&PushMessageBody { chat: recipient_handle, text })
            .map_err(|err| ChannelError::Encoding(err.to_string()))?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| ChannelError::Transport(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::NOT_FOUND {
            return Err(ChannelError::RecipientUnreachable);
        }
        if !status.is_success() {
            return Err(ChannelError::Transport(format!("push channel responded with {status}")));
        }

        Ok(())
    }
}
