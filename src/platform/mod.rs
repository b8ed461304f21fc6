//! Community platform contract.
//!
//! The core never talks to the transport directly: it consumes typed
//! [`PlatformEvent`]s and calls the fallible [`Platform`] write API. The
//! Discord adapter lives in [`discord`]; tests use a recording fake.

pub mod discord;
pub mod events;
pub mod types;

pub use events::{CommandInvocation, InboundMessage, PlatformEvent};
pub use types::{
    Activity, ActivityKind, Attachment, AttachmentRef, Button, ButtonStyle, ChannelId,
    ChannelInfo, CommandSpec, GuildId, InteractionRef, InteractionResponse, Member, MessageId,
    MessageSummary, ModalSpec, OutgoingMessage, Presence, RoleId, UserId,
};

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Outbound platform API. Every call is a fallible remote call whose
/// failure is already classified into a [`crate::BotError`] kind.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Look up a channel handle.
    async fn fetch_channel(&self, channel: ChannelId) -> Result<ChannelInfo>;

    /// Current occupants of a voice channel, read fresh on every call.
    async fn occupants(&self, channel: ChannelId) -> Result<Vec<Member>>;

    /// Rewrite a channel's display label.
    async fn rename_channel(&self, channel: ChannelId, label: &str) -> Result<()>;

    /// Post a message, optionally with one attachment.
    async fn send_message(&self, channel: ChannelId, message: OutgoingMessage)
    -> Result<MessageId>;

    /// Most recent messages of a channel, newest first.
    async fn recent_messages(&self, channel: ChannelId, limit: usize)
    -> Result<Vec<MessageSummary>>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()>;

    /// Set the bot's own presence.
    async fn set_presence(&self, presence: Presence) -> Result<()>;

    /// Initial answer to an interaction.
    async fn respond(
        &self,
        interaction: &InteractionRef,
        response: InteractionResponse,
    ) -> Result<()>;

    /// Additional message after the initial answer.
    async fn followup(&self, interaction: &InteractionRef, content: &str, ephemeral: bool)
    -> Result<()>;

    /// Replace the initial answer's content and drop its components.
    async fn edit_response(&self, interaction: &InteractionRef, content: &str) -> Result<()>;

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Attachment>;

    /// Last measured gateway round trip, if any.
    fn latency(&self) -> Option<Duration>;
}
