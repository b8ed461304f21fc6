//! Value types shared by the platform contract and the core.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accepts both integer and string snowflakes (TOML configs use integers,
/// Discord payloads use strings).
#[derive(Deserialize)]
#[serde(untagged)]
enum SnowflakeRepr {
    Int(u64),
    Str(String),
}

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "SnowflakeRepr", into = "String")]
        pub struct $name(pub u64);

        impl $name {
            /// Raw numeric value.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }

        impl TryFrom<SnowflakeRepr> for $name {
            type Error = String;

            fn try_from(value: SnowflakeRepr) -> Result<Self, Self::Error> {
                match value {
                    SnowflakeRepr::Int(raw) => Ok(Self(raw)),
                    SnowflakeRepr::Str(raw) => raw
                        .parse()
                        .map_err(|e| format!("invalid snowflake `{raw}`: {e}")),
                }
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0.to_string()
            }
        }
    };
}

snowflake!(
    /// Channel (voice room or text channel) identifier.
    ChannelId
);
snowflake!(
    /// User identifier.
    UserId
);
snowflake!(
    /// Guild (server) identifier.
    GuildId
);
snowflake!(
    /// Message identifier.
    MessageId
);
snowflake!(
    /// Role identifier.
    RoleId
);

/// Activity kinds as numbered by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Playing,
    Streaming,
    Listening,
    Watching,
    Custom,
    Competing,
}

impl ActivityKind {
    /// Wire value used by the gateway.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Playing => 0,
            Self::Streaming => 1,
            Self::Listening => 2,
            Self::Watching => 3,
            Self::Custom => 4,
            Self::Competing => 5,
        }
    }

    /// Parse a gateway activity type.
    #[must_use]
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Playing),
            1 => Some(Self::Streaming),
            2 => Some(Self::Listening),
            3 => Some(Self::Watching),
            4 => Some(Self::Custom),
            5 => Some(Self::Competing),
            _ => None,
        }
    }
}

/// One entry of a member's rich presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub name: String,
}

impl Activity {
    pub fn new(kind: ActivityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Guild member as mirrored from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub display_name: String,
    pub bot: bool,
    pub roles: Vec<RoleId>,
    pub activities: Vec<Activity>,
}

impl Member {
    pub fn new(id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            bot: false,
            roles: Vec::new(),
            activities: Vec::new(),
        }
    }

    /// Builder helper: add an activity.
    #[must_use]
    pub fn with_activity(mut self, kind: ActivityKind, name: impl Into<String>) -> Self {
        self.activities.push(Activity::new(kind, name));
        self
    }

    /// Builder helper: add a role.
    #[must_use]
    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.push(role);
        self
    }

    /// The member's current subject: the name of the first "playing" activity.
    #[must_use]
    pub fn current_subject(&self) -> Option<&str> {
        self.activities
            .iter()
            .find(|activity| activity.kind == ActivityKind::Playing)
            .map(|activity| activity.name.trim())
            .filter(|name| !name.is_empty())
    }

    /// Platform mention markup.
    #[must_use]
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }

    #[must_use]
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

/// Minimal channel handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub guild_id: Option<GuildId>,
}

/// Entry of a channel's message history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: MessageId,
    pub author: UserId,
    pub timestamp: DateTime<Utc>,
}

/// File uploaded alongside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Bytes,
}

/// Reference to a file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub url: String,
}

/// Message to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub content: String,
    pub attachment: Option<Attachment>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// The bot's own presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub kind: ActivityKind,
    pub label: String,
}

impl Presence {
    pub fn new(kind: ActivityKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }
}

/// Everything needed to answer an interaction (slash command, button, modal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRef {
    pub id: String,
    pub token: String,
    pub application_id: String,
    pub channel_id: ChannelId,
    pub guild_id: Option<GuildId>,
    pub user: Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
}

impl ButtonStyle {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Primary => 1,
            Self::Secondary => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

/// Slash command registration entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
}

/// Single-field text modal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalSpec {
    pub custom_id: String,
    pub title: String,
    pub input_id: String,
    pub input_label: String,
    pub max_length: u16,
}

/// Initial answer to an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionResponse {
    Message {
        content: String,
        ephemeral: bool,
        buttons: Vec<Button>,
    },
    Defer {
        ephemeral: bool,
    },
    Modal(ModalSpec),
}

impl InteractionResponse {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            ephemeral: false,
            buttons: Vec::new(),
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            ephemeral: true,
            buttons: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn snowflake_accepts_int_and_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            id: ChannelId,
        }
        let from_int: Wrapper = toml::from_str("id = 123").unwrap();
        let from_str: Wrapper = toml::from_str(r#"id = "456""#).unwrap();
        assert_eq!(from_int.id, ChannelId(123));
        assert_eq!(from_str.id, ChannelId(456));
        assert!(toml::from_str::<Wrapper>(r#"id = "abc""#).is_err());
    }

    #[test]
    fn snowflake_serializes_as_string() {
        let json = serde_json::to_string(&UserId(42)).unwrap();
        assert_eq!(json, r#""42""#);
    }

    #[test]
    fn current_subject_uses_first_playing_activity() {
        let member = Member::new(UserId(1), "ana")
            .with_activity(ActivityKind::Listening, "Spotify")
            .with_activity(ActivityKind::Playing, "Rust")
            .with_activity(ActivityKind::Playing, "PHP");
        assert_eq!(member.current_subject(), Some("Rust"));
    }

    #[test]
    fn current_subject_ignores_blank_names() {
        let member = Member::new(UserId(1), "ana").with_activity(ActivityKind::Playing, "  ");
        assert_eq!(member.current_subject(), None);
        assert_eq!(Member::new(UserId(2), "rui").current_subject(), None);
    }

    #[test]
    fn unknown_activity_code_is_rejected() {
        assert_eq!(ActivityKind::Watching.code(), 3);
        assert_eq!(ActivityKind::from_code(0), Some(ActivityKind::Playing));
        assert_eq!(ActivityKind::from_code(42), None);
    }
}
