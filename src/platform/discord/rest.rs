//! Discord REST client implementing [`Platform`].

use crate::config::DiscordConfig;
use crate::error::{BotError, Result};
use crate::platform::Platform;
use crate::platform::discord::decode::{decode_channel, decode_message_summary};
use crate::platform::discord::gateway::GatewayLink;
use crate::platform::discord::mirror::GuildMirror;
use crate::platform::types::{
    Attachment, AttachmentRef, ChannelId, ChannelInfo, CommandSpec, InteractionRef,
    InteractionResponse, Member, MessageId, MessageSummary, OutgoingMessage, Presence,
};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Ephemeral message flag.
const FLAG_EPHEMERAL: u64 = 1 << 6;

const CALLBACK_CHANNEL_MESSAGE: u8 = 4;
const CALLBACK_DEFERRED_MESSAGE: u8 = 5;
const CALLBACK_MODAL: u8 = 9;

/// Maximum page size accepted by the message-history endpoint.
pub const MAX_HISTORY_PAGE: usize = 100;

/// Discord REST API client. Occupancy and presence come from the
/// gateway-fed [`GuildMirror`]; presence writes go through the gateway.
pub struct DiscordClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    mirror: Arc<GuildMirror>,
    link: Arc<GatewayLink>,
}

impl DiscordClient {
    /// Build a client from configuration and a resolved bot token.
    pub fn new(config: &DiscordConfig, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| BotError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_owned(),
            token: token.into(),
            mirror: Arc::new(GuildMirror::new()),
            link: Arc::new(GatewayLink::default()),
        })
    }

    /// Guild state mirror shared with the gateway.
    #[must_use]
    pub fn mirror(&self) -> Arc<GuildMirror> {
        Arc::clone(&self.mirror)
    }

    /// Gateway link shared with the gateway session.
    #[must_use]
    pub fn link(&self) -> Arc<GatewayLink> {
        Arc::clone(&self.link)
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn execute(&self, request: reqwest::RequestBuilder, context: &str) -> Result<reqwest::Response> {
        let response = request
            .header(AUTHORIZATION, format!("Bot {}", self.token))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(BotError::from_status(status, context, &body))
    }

    /// Websocket URL advertised by the API.
    pub async fn gateway_url(&self) -> Result<String> {
        let response = self
            .execute(self.http.get(self.url("/gateway/bot")), "gateway lookup")
            .await?;
        let body: Value = response.json().await?;
        Ok(body
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("wss://gateway.discord.gg")
            .to_owned())
    }

    /// Replace the application's global slash commands.
    pub async fn sync_commands(&self, application_id: &str, commands: &[CommandSpec]) -> Result<usize> {
        if application_id.trim().is_empty() {
            return Err(BotError::InvalidInput("application id is empty".to_owned()));
        }
        let body: Vec<Value> = commands
            .iter()
            .map(|command| {
                json!({
                    "name": command.name,
                    "description": command.description,
                    "type": 1
                })
            })
            .collect();
        let response = self
            .execute(
                self.http
                    .put(self.url(&format!("/applications/{application_id}/commands")))
                    .json(&body),
                "command sync",
            )
            .await?;
        let synced: Vec<Value> = response.json().await?;
        Ok(synced.len())
    }

    fn interaction_payload(response: &InteractionResponse) -> Value {
        match response {
            InteractionResponse::Message {
                content,
                ephemeral,
                buttons,
            } => {
                let mut data = json!({ "content": content });
                if *ephemeral {
                    data["flags"] = json!(FLAG_EPHEMERAL);
                }
                if !buttons.is_empty() {
                    let row: Vec<Value> = buttons
                        .iter()
                        .map(|button| {
                            json!({
                                "type": 2,
                                "style": button.style.code(),
                                "label": button.label,
                                "custom_id": button.custom_id
                            })
                        })
                        .collect();
                    data["components"] = json!([{ "type": 1, "components": row }]);
                }
                json!({ "type": CALLBACK_CHANNEL_MESSAGE, "data": data })
            }
            InteractionResponse::Defer { ephemeral } => {
                let flags = if *ephemeral { FLAG_EPHEMERAL } else { 0 };
                json!({ "type": CALLBACK_DEFERRED_MESSAGE, "data": { "flags": flags } })
            }
            InteractionResponse::Modal(modal) => json!({
                "type": CALLBACK_MODAL,
                "data": {
                    "custom_id": modal.custom_id,
                    "title": modal.title,
                    "components": [{
                        "type": 1,
                        "components": [{
                            "type": 4,
                            "custom_id": modal.input_id,
                            "label": modal.input_label,
                            "style": 2,
                            "required": true,
                            "max_length": modal.max_length
                        }]
                    }]
                }
            }),
        }
    }
}

#[async_trait]
impl Platform for DiscordClient {
    async fn fetch_channel(&self, channel: ChannelId) -> Result<ChannelInfo> {
        let response = self
            .execute(
                self.http.get(self.url(&format!("/channels/{channel}"))),
                "channel lookup",
            )
            .await?;
        let body: Value = response.json().await?;
        decode_channel(&body)
            .ok_or_else(|| BotError::Transient(format!("malformed channel payload for {channel}")))
    }

    async fn occupants(&self, channel: ChannelId) -> Result<Vec<Member>> {
        self.mirror.occupants(channel)
    }

    async fn rename_channel(&self, channel: ChannelId, label: &str) -> Result<()> {
        if label.trim().is_empty() {
            return Err(BotError::InvalidInput("channel label is empty".to_owned()));
        }
        self.execute(
            self.http
                .patch(self.url(&format!("/channels/{channel}")))
                .json(&json!({ "name": label })),
            "channel rename",
        )
        .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<MessageId> {
        let url = self.url(&format!("/channels/{channel}/messages"));
        let request = match message.attachment {
            None => self.http.post(url).json(&json!({ "content": message.content })),
            Some(attachment) => {
                let payload = json!({
                    "content": message.content,
                    "attachments": [{ "id": 0, "filename": attachment.filename }]
                });
                let part = reqwest::multipart::Part::bytes(attachment.bytes.to_vec())
                    .file_name(attachment.filename.clone());
                let form = reqwest::multipart::Form::new()
                    .text("payload_json", payload.to_string())
                    .part("files[0]", part);
                self.http.post(url).multipart(form)
            }
        };
        let response = self.execute(request, "message send").await?;
        let body: Value = response.json().await?;
        body.get("id")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(|| BotError::Transient("message send returned no id".to_owned()))
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> Result<Vec<MessageSummary>> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        let response = self
            .execute(
                self.http
                    .get(self.url(&format!("/channels/{channel}/messages")))
                    .query(&[("limit", limit)]),
                "message history",
            )
            .await?;
        let items: Vec<Value> = response.json().await?;
        Ok(items.iter().filter_map(decode_message_summary).collect())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        self.execute(
            self.http
                .delete(self.url(&format!("/channels/{channel}/messages/{message}"))),
            "message delete",
        )
        .await?;
        Ok(())
    }

    async fn set_presence(&self, presence: Presence) -> Result<()> {
        self.link.update_presence(presence)
    }

    async fn respond(
        &self,
        interaction: &InteractionRef,
        response: InteractionResponse,
    ) -> Result<()> {
        let url = self.url(&format!(
            "/interactions/{}/{}/callback",
            interaction.id, interaction.token
        ));
        self.execute(
            self.http.post(url).json(&Self::interaction_payload(&response)),
            "interaction response",
        )
        .await?;
        Ok(())
    }

    async fn followup(
        &self,
        interaction: &InteractionRef,
        content: &str,
        ephemeral: bool,
    ) -> Result<()> {
        let url = self.url(&format!(
            "/webhooks/{}/{}",
            interaction.application_id, interaction.token
        ));
        let mut body = json!({ "content": content });
        if ephemeral {
            body["flags"] = json!(FLAG_EPHEMERAL);
        }
        self.execute(self.http.post(url).json(&body), "interaction follow-up")
            .await?;
        Ok(())
    }

    async fn edit_response(&self, interaction: &InteractionRef, content: &str) -> Result<()> {
        let url = self.url(&format!(
            "/webhooks/{}/{}/messages/@original",
            interaction.application_id, interaction.token
        ));
        self.execute(
            self.http
                .patch(url)
                .json(&json!({ "content": content, "components": [] })),
            "interaction edit",
        )
        .await?;
        Ok(())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Attachment> {
        // CDN URLs are pre-signed; no bot authorization header.
        let response = self.http.get(&attachment.url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(BotError::from_status(status, "attachment download", ""));
        }
        Ok(Attachment {
            filename: attachment.filename.clone(),
            bytes: response.bytes().await?,
        })
    }

    fn latency(&self) -> Option<Duration> {
        self.link.latency()
    }
}
