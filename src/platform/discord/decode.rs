//! Gateway dispatch decoding.
//!
//! Turns raw `t`/`d` dispatch payloads into [`PlatformEvent`]s and keeps the
//! [`GuildMirror`] current. Unknown or malformed payloads decode to `None`.

use crate::platform::discord::mirror::GuildMirror;
use crate::platform::events::{CommandInvocation, InboundMessage, PlatformEvent};
use crate::platform::types::{
    Activity, ActivityKind, AttachmentRef, ChannelId, ChannelInfo, GuildId, InteractionRef, Member,
    MessageId, MessageSummary, RoleId, UserId,
};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

const INTERACTION_APPLICATION_COMMAND: u64 = 2;
const INTERACTION_MESSAGE_COMPONENT: u64 = 3;
const INTERACTION_MODAL_SUBMIT: u64 = 5;

fn snowflake<T: FromStr>(value: Option<&Value>) -> Option<T> {
    match value? {
        Value::String(raw) => raw.parse().ok(),
        Value::Number(num) => num.to_string().parse().ok(),
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Decode a guild member object (`member` with nested `user`) or a bare
/// user object when no member data is available.
pub(crate) fn decode_member(member: Option<&Value>, user: Option<&Value>) -> Option<Member> {
    let user = user.or_else(|| member.and_then(|m| m.get("user")))?;
    let id: UserId = snowflake(user.get("id"))?;

    let nick = member
        .and_then(|m| str_field(m, "nick"))
        .filter(|nick| !nick.is_empty());
    let global_name = str_field(user, "global_name").filter(|name| !name.is_empty());
    let username = str_field(user, "username").unwrap_or_default();
    let display_name = nick.or(global_name).unwrap_or(username).to_owned();

    let roles = member
        .and_then(|m| m.get("roles"))
        .and_then(Value::as_array)
        .map(|roles| {
            roles
                .iter()
                .filter_map(|role| snowflake::<RoleId>(Some(role)))
                .collect()
        })
        .unwrap_or_default();

    Some(Member {
        id,
        display_name,
        bot: user.get("bot").and_then(Value::as_bool).unwrap_or(false),
        roles,
        activities: Vec::new(),
    })
}

pub(crate) fn decode_activities(value: Option<&Value>) -> Vec<Activity> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let kind = item
                .get("type")
                .and_then(Value::as_u64)
                .and_then(ActivityKind::from_code)?;
            let name = str_field(item, "name")?;
            Some(Activity::new(kind, name))
        })
        .collect()
}

/// Load a `GUILD_CREATE` snapshot into the mirror.
pub(crate) fn seed_guild(mirror: &GuildMirror, data: &Value) {
    if let Some(members) = data.get("members").and_then(Value::as_array) {
        for member in members {
            if let Some(decoded) = decode_member(Some(member), None) {
                mirror.upsert_member(decoded);
            }
        }
    }
    if let Some(presences) = data.get("presences").and_then(Value::as_array) {
        for presence in presences {
            if let Some(user) = snowflake::<UserId>(presence.get("user").and_then(|u| u.get("id")))
            {
                mirror.apply_presence(user, decode_activities(presence.get("activities")));
            }
        }
    }
    if let Some(states) = data.get("voice_states").and_then(Value::as_array) {
        for state in states {
            let user = snowflake::<UserId>(state.get("user_id"));
            let channel = snowflake::<ChannelId>(state.get("channel_id"));
            if let (Some(user), Some(channel)) = (user, channel) {
                mirror.seed_voice_state(user, channel);
            }
        }
    }
    mirror.mark_synced();
}

fn decode_message(data: &Value) -> Option<InboundMessage> {
    let author = decode_member(data.get("member"), data.get("author"))?;
    let mentions = data
        .get("mentions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| snowflake::<UserId>(item.get("id")))
                .collect()
        })
        .unwrap_or_default();
    let attachments = data
        .get("attachments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(AttachmentRef {
                        filename: str_field(item, "filename")?.to_owned(),
                        url: str_field(item, "url")?.to_owned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(InboundMessage {
        id: snowflake(data.get("id"))?,
        channel_id: snowflake(data.get("channel_id"))?,
        guild_id: snowflake(data.get("guild_id")),
        author,
        content: str_field(data, "content").unwrap_or_default().to_owned(),
        mentions,
        attachments,
    })
}

fn decode_interaction_ref(data: &Value, mirror: &GuildMirror) -> Option<InteractionRef> {
    let mut user = decode_member(data.get("member"), data.get("user"))?;
    if let Some(known) = mirror.member(user.id) {
        user.activities = known.activities;
    }
    Some(InteractionRef {
        id: str_field(data, "id")?.to_owned(),
        token: str_field(data, "token")?.to_owned(),
        application_id: str_field(data, "application_id")?.to_owned(),
        channel_id: snowflake(data.get("channel_id"))
            .or_else(|| snowflake(data.get("channel").and_then(|c| c.get("id"))))?,
        guild_id: snowflake(data.get("guild_id")),
        user,
    })
}

fn option_value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn decode_interaction(data: &Value, mirror: &GuildMirror) -> Option<PlatformEvent> {
    let interaction = decode_interaction_ref(data, mirror)?;
    let body = data.get("data")?;
    match data.get("type").and_then(Value::as_u64)? {
        INTERACTION_APPLICATION_COMMAND => {
            let args = body
                .get("options")
                .and_then(Value::as_array)
                .map(|options| {
                    options
                        .iter()
                        .filter_map(|option| {
                            Some((
                                str_field(option, "name")?.to_owned(),
                                option_value_to_string(option.get("value")?),
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default();
            Some(PlatformEvent::CommandInvoked(CommandInvocation {
                interaction,
                name: str_field(body, "name")?.to_owned(),
                args,
            }))
        }
        INTERACTION_MESSAGE_COMPONENT => Some(PlatformEvent::ComponentPressed {
            interaction,
            custom_id: str_field(body, "custom_id")?.to_owned(),
        }),
        INTERACTION_MODAL_SUBMIT => {
            let mut values = HashMap::new();
            for row in body
                .get("components")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
            {
                for input in row
                    .get("components")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    if let (Some(id), Some(value)) =
                        (str_field(input, "custom_id"), str_field(input, "value"))
                    {
                        values.insert(id.to_owned(), value.to_owned());
                    }
                }
            }
            Some(PlatformEvent::ModalSubmitted {
                interaction,
                custom_id: str_field(body, "custom_id")?.to_owned(),
                values,
            })
        }
        _ => None,
    }
}

/// Decode one dispatch, updating the mirror as a side effect.
pub(crate) fn decode_dispatch(
    event: &str,
    data: &Value,
    mirror: &GuildMirror,
) -> Option<PlatformEvent> {
    match event {
        "READY" => Some(PlatformEvent::Ready {
            user_id: snowflake(data.get("user").and_then(|u| u.get("id")))?,
            application_id: data
                .get("application")
                .and_then(|app| str_field(app, "id"))
                .unwrap_or_default()
                .to_owned(),
        }),
        "GUILD_CREATE" => {
            seed_guild(mirror, data);
            None
        }
        "GUILD_MEMBER_ADD" => {
            let member = decode_member(Some(data), None)?;
            Some(PlatformEvent::MemberJoined(mirror.upsert_member(member)))
        }
        "GUILD_MEMBER_UPDATE" => {
            let member = decode_member(Some(data), None)?;
            mirror.upsert_member(member);
            None
        }
        "GUILD_MEMBER_REMOVE" => {
            let departed = decode_member(None, data.get("user"))?;
            let member = mirror.remove_member(departed.id).unwrap_or(departed);
            Some(PlatformEvent::MemberLeft(member))
        }
        "PRESENCE_UPDATE" => {
            let user: UserId = snowflake(data.get("user").and_then(|u| u.get("id")))?;
            let member = mirror.apply_presence(user, decode_activities(data.get("activities")))?;
            Some(PlatformEvent::PresenceChanged(member))
        }
        "VOICE_STATE_UPDATE" => {
            let user: UserId = snowflake(data.get("user_id"))?;
            let member = decode_member(data.get("member"), None)
                .or_else(|| mirror.member(user))
                .unwrap_or_else(|| Member::new(user, user.to_string()));
            let after: Option<ChannelId> = snowflake(data.get("channel_id"));
            let (member, before) = mirror.apply_voice_state(member, after);
            if before == after {
                // Mute/deafen toggles arrive as voice-state updates too.
                return None;
            }
            Some(PlatformEvent::VoiceStateChanged {
                member,
                before,
                after,
            })
        }
        "MESSAGE_CREATE" => decode_message(data).map(PlatformEvent::MessageReceived),
        "INTERACTION_CREATE" => decode_interaction(data, mirror),
        _ => None,
    }
}

/// Parse a message-history entry.
pub(crate) fn decode_message_summary(item: &Value) -> Option<MessageSummary> {
    let timestamp = str_field(item, "timestamp")
        .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())?
        .with_timezone(&chrono::Utc);
    Some(MessageSummary {
        id: snowflake::<MessageId>(item.get("id"))?,
        author: snowflake(item.get("author").and_then(|a| a.get("id")))?,
        timestamp,
    })
}

pub(crate) fn decode_channel(item: &Value) -> Option<ChannelInfo> {
    Some(ChannelInfo {
        id: snowflake(item.get("id"))?,
        name: str_field(item, "name").unwrap_or_default().to_owned(),
        guild_id: snowflake::<GuildId>(item.get("guild_id")),
    })
}
