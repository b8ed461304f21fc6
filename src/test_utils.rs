//! Shared test doubles: a recording in-memory [`Platform`] and a scripted
//! [`Generator`].

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::ai::Generator;
use crate::error::{BotError, Result};
use crate::platform::{
    Attachment, AttachmentRef, ChannelId, ChannelInfo, GuildId, InteractionRef,
    InteractionResponse, Member, MessageId, MessageSummary, OutgoingMessage, Platform, Presence,
    UserId,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Bot's own user id in fakes.
pub const BOT_USER: UserId = UserId(999);

/// One recorded outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Rename { channel: ChannelId, label: String },
    Send { channel: ChannelId, message: OutgoingMessage },
    Delete { channel: ChannelId, message: MessageId },
    Presence(Presence),
    Respond { interaction: String, response: InteractionResponse },
    Followup { content: String, ephemeral: bool },
    EditResponse { content: String },
}

#[derive(Default)]
struct FakeState {
    channels: HashMap<ChannelId, String>,
    occupants: HashMap<ChannelId, Vec<Member>>,
    history: HashMap<ChannelId, Vec<MessageSummary>>,
    attachments: HashMap<String, Bytes>,
    fetches: HashMap<ChannelId, usize>,
    calls: Vec<Call>,
    rename_failures: HashMap<ChannelId, VecDeque<BotError>>,
    send_failures: VecDeque<BotError>,
    delete_failures: HashMap<MessageId, BotError>,
    presence_failures: VecDeque<BotError>,
    next_message_id: u64,
}

/// In-memory platform that records every write.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
    rename_delay: Option<Duration>,
    in_flight_renames: AtomicUsize,
    max_in_flight_renames: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        let platform = Self::default();
        platform.lock().next_message_id = 10_000;
        platform
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_channel(self, id: ChannelId, name: &str) -> Self {
        self.add_channel(id, name);
        self
    }

    /// Every rename takes `delay` before it completes.
    pub fn with_rename_delay(mut self, delay: Duration) -> Self {
        self.rename_delay = Some(delay);
        self
    }

    pub fn add_channel(&self, id: ChannelId, name: &str) {
        self.lock().channels.insert(id, name.to_owned());
    }

    pub fn channel_name(&self, id: ChannelId) -> Option<String> {
        self.lock().channels.get(&id).cloned()
    }

    pub fn set_occupants(&self, id: ChannelId, members: Vec<Member>) {
        self.lock().occupants.insert(id, members);
    }

    /// Seed `count` messages, oldest first, with ids `1..=count`.
    pub fn seed_history(&self, id: ChannelId, count: u64) {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let messages = (1..=count)
            .map(|n| MessageSummary {
                id: MessageId(n),
                author: UserId(1),
                timestamp: base + ChronoDuration::seconds(n as i64),
            })
            .collect();
        self.lock().history.insert(id, messages);
    }

    /// Remaining message ids, oldest first.
    pub fn history_ids(&self, id: ChannelId) -> Vec<u64> {
        self.lock()
            .history
            .get(&id)
            .map(|messages| messages.iter().map(|m| m.id.get()).collect())
            .unwrap_or_default()
    }

    pub fn add_attachment(&self, url: &str, bytes: &'static [u8]) {
        self.lock()
            .attachments
            .insert(url.to_owned(), Bytes::from_static(bytes));
    }

    pub fn fail_next_rename(&self, id: ChannelId, err: BotError) {
        self.lock().rename_failures.entry(id).or_default().push_back(err);
    }

    pub fn fail_next_send(&self, err: BotError) {
        self.lock().send_failures.push_back(err);
    }

    pub fn fail_delete(&self, message: MessageId, err: BotError) {
        self.lock().delete_failures.insert(message, err);
    }

    pub fn fail_next_presence(&self, err: BotError) {
        self.lock().presence_failures.push_back(err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn fetch_count(&self, id: ChannelId) -> usize {
        self.lock().fetches.get(&id).copied().unwrap_or(0)
    }

    pub fn renames(&self) -> Vec<(ChannelId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Rename { channel, label } => Some((channel, label)),
                _ => None,
            })
            .collect()
    }

    /// Message contents sent to `id`.
    pub fn sent(&self, id: ChannelId) -> Vec<OutgoingMessage> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { channel, message } if channel == id => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn sent_texts(&self, id: ChannelId) -> Vec<String> {
        self.sent(id).into_iter().map(|m| m.content).collect()
    }

    pub fn presences(&self) -> Vec<Presence> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Presence(presence) => Some(presence),
                _ => None,
            })
            .collect()
    }

    pub fn responses(&self) -> Vec<InteractionResponse> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Respond { response, .. } => Some(response),
                _ => None,
            })
            .collect()
    }

    pub fn followups(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Followup { content, ephemeral } => Some((content, ephemeral)),
                _ => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::EditResponse { content } => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<(ChannelId, MessageId)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Delete { channel, message } => Some((channel, message)),
                _ => None,
            })
            .collect()
    }

    /// Highest number of renames observed running at the same time.
    pub fn max_concurrent_renames(&self) -> usize {
        self.max_in_flight_renames.load(Ordering::SeqCst)
    }

    fn record(&self, call: Call) {
        self.lock().calls.push(call);
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn fetch_channel(&self, channel: ChannelId) -> Result<ChannelInfo> {
        let mut state = self.lock();
        *state.fetches.entry(channel).or_default() += 1;
        state
            .channels
            .get(&channel)
            .map(|name| ChannelInfo {
                id: channel,
                name: name.clone(),
                guild_id: Some(GuildId(1)),
            })
            .ok_or_else(|| BotError::NotFound(format!("channel {channel}")))
    }

    async fn occupants(&self, channel: ChannelId) -> Result<Vec<Member>> {
        Ok(self.lock().occupants.get(&channel).cloned().unwrap_or_default())
    }

    async fn rename_channel(&self, channel: ChannelId, label: &str) -> Result<()> {
        self.record(Call::Rename {
            channel,
            label: label.to_owned(),
        });
        let now = self.in_flight_renames.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight_renames.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.rename_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight_renames.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.lock();
        if let Some(err) = state
            .rename_failures
            .get_mut(&channel)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        match state.channels.get_mut(&channel) {
            Some(name) => {
                *name = label.to_owned();
                Ok(())
            }
            None => Err(BotError::NotFound(format!("channel {channel}"))),
        }
    }

    async fn send_message(&self, channel: ChannelId, message: OutgoingMessage) -> Result<MessageId> {
        self.record(Call::Send {
            channel,
            message: message.clone(),
        });
        let mut state = self.lock();
        if let Some(err) = state.send_failures.pop_front() {
            return Err(err);
        }
        state.next_message_id += 1;
        let id = MessageId(state.next_message_id);
        state.history.entry(channel).or_default().push(MessageSummary {
            id,
            author: BOT_USER,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    async fn recent_messages(&self, channel: ChannelId, limit: usize) -> Result<Vec<MessageSummary>> {
        let state = self.lock();
        let mut messages = state.history.get(&channel).cloned().unwrap_or_default();
        messages.reverse();
        messages.truncate(limit.min(100));
        Ok(messages)
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        self.record(Call::Delete { channel, message });
        let mut state = self.lock();
        if let Some(err) = state.delete_failures.remove(&message) {
            return Err(err);
        }
        if let Some(history) = state.history.get_mut(&channel) {
            history.retain(|m| m.id != message);
        }
        Ok(())
    }

    async fn set_presence(&self, presence: Presence) -> Result<()> {
        self.record(Call::Presence(presence));
        match self.lock().presence_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn respond(&self, interaction: &InteractionRef, response: InteractionResponse) -> Result<()> {
        self.record(Call::Respond {
            interaction: interaction.id.clone(),
            response,
        });
        Ok(())
    }

    async fn followup(&self, _interaction: &InteractionRef, content: &str, ephemeral: bool) -> Result<()> {
        self.record(Call::Followup {
            content: content.to_owned(),
            ephemeral,
        });
        Ok(())
    }

    async fn edit_response(&self, _interaction: &InteractionRef, content: &str) -> Result<()> {
        self.record(Call::EditResponse {
            content: content.to_owned(),
        });
        Ok(())
    }

    async fn download_attachment(&self, attachment: &AttachmentRef) -> Result<Attachment> {
        self.lock()
            .attachments
            .get(&attachment.url)
            .cloned()
            .map(|bytes| Attachment {
                filename: attachment.filename.clone(),
                bytes,
            })
            .ok_or_else(|| BotError::NotFound(format!("attachment {}", attachment.url)))
    }

    fn latency(&self) -> Option<Duration> {
        Some(Duration::from_millis(42))
    }
}

/// Generator that plays back scripted results, then echoes the prompt.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new(script: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn echo() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_owned());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("generated: {prompt}")))
    }
}

/// Member with a "playing" activity.
pub fn player(id: u64, name: &str, subject: &str) -> Member {
    Member::new(UserId(id), name).with_activity(crate::platform::ActivityKind::Playing, subject)
}

/// Interaction handle for `user` in `channel`.
pub fn interaction(id: &str, channel: ChannelId, user: Member) -> InteractionRef {
    InteractionRef {
        id: id.to_owned(),
        token: format!("token-{id}"),
        application_id: "app".to_owned(),
        channel_id: channel,
        guild_id: Some(GuildId(1)),
        user,
    }
}
