//! Typed inbound platform events.

use crate::platform::types::{AttachmentRef, ChannelId, GuildId, InteractionRef, Member, MessageId, UserId};
use std::collections::HashMap;

/// Message received in a guild or DM channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub author: Member,
    pub content: String,
    pub mentions: Vec<UserId>,
    pub attachments: Vec<AttachmentRef>,
}

impl InboundMessage {
    #[must_use]
    pub fn mentions_user(&self, user: UserId) -> bool {
        self.mentions.contains(&user)
    }
}

/// Slash command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub interaction: InteractionRef,
    pub name: String,
    pub args: Vec<(String, String)>,
}

/// Events consumed by the core. Transport framing is decoded before this
/// point by the platform adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Session established; `user_id` is the bot's own account.
    Ready {
        user_id: UserId,
        application_id: String,
    },
    MemberJoined(Member),
    MemberLeft(Member),
    /// `before`/`after` are the member's voice channel on either side of the
    /// change (`None` = not connected).
    VoiceStateChanged {
        member: Member,
        before: Option<ChannelId>,
        after: Option<ChannelId>,
    },
    PresenceChanged(Member),
    MessageReceived(InboundMessage),
    CommandInvoked(CommandInvocation),
    ComponentPressed {
        interaction: InteractionRef,
        custom_id: String,
    },
    ModalSubmitted {
        interaction: InteractionRef,
        custom_id: String,
        values: HashMap<String, String>,
    },
}

impl PlatformEvent {
    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::MemberJoined(_) => "member_joined",
            Self::MemberLeft(_) => "member_left",
            Self::VoiceStateChanged { .. } => "voice_state_changed",
            Self::PresenceChanged(_) => "presence_changed",
            Self::MessageReceived(_) => "message_received",
            Self::CommandInvoked(_) => "command_invoked",
            Self::ComponentPressed { .. } => "component_pressed",
            Self::ModalSubmitted { .. } => "modal_submitted",
        }
    }
}
