//! In-memory mirror of guild membership, presence and voice occupancy.
//!
//! The gateway is the only writer. Reads are cheap snapshots; nothing is
//! handed out by reference, so callers always see the state as of the call.
//!
//! Occupancy is only answered between a guild snapshot and the next session
//! reset. Until then the mirror reports itself unsynced.

use crate::error::{BotError, Result};
use crate::platform::types::{Activity, ChannelId, Member, UserId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MirrorState {
    members: HashMap<UserId, Member>,
    voice: HashMap<UserId, ChannelId>,
    synced: bool,
}

/// Guild state fed by gateway dispatches.
#[derive(Debug, Default)]
pub struct GuildMirror {
    state: Mutex<MirrorState>,
}

impl GuildMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MirrorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or refresh a member. Presence data is kept when the update
    /// carries none (member updates never include activities).
    pub fn upsert_member(&self, mut member: Member) -> Member {
        let mut state = self.lock();
        if member.activities.is_empty()
            && let Some(existing) = state.members.get(&member.id)
        {
            member.activities = existing.activities.clone();
        }
        state.members.insert(member.id, member.clone());
        member
    }

    /// Remove a member and any voice state they held.
    pub fn remove_member(&self, user: UserId) -> Option<Member> {
        let mut state = self.lock();
        state.voice.remove(&user);
        state.members.remove(&user)
    }

    /// Replace a member's activities. Returns the updated member when known.
    pub fn apply_presence(&self, user: UserId, activities: Vec<Activity>) -> Option<Member> {
        let mut state = self.lock();
        let member = state.members.get_mut(&user)?;
        member.activities = activities;
        Some(member.clone())
    }

    /// Record a voice-state change and return the previous channel.
    pub fn apply_voice_state(
        &self,
        member: Member,
        channel: Option<ChannelId>,
    ) -> (Member, Option<ChannelId>) {
        let member = self.upsert_member(member);
        let mut state = self.lock();
        let before = match channel {
            Some(channel) => state.voice.insert(member.id, channel),
            None => state.voice.remove(&member.id),
        };
        (member, before)
    }

    /// Seed voice state without emitting a change (guild snapshot).
    pub fn seed_voice_state(&self, user: UserId, channel: ChannelId) {
        self.lock().voice.insert(user, channel);
    }

    /// Mark the mirror as holding a complete guild snapshot.
    pub fn mark_synced(&self) {
        self.lock().synced = true;
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.lock().synced
    }

    /// Members currently connected to `channel`.
    ///
    /// `Transient` while no guild snapshot has arrived since the last reset.
    pub fn occupants(&self, channel: ChannelId) -> Result<Vec<Member>> {
        let state = self.lock();
        if !state.synced {
            return Err(BotError::Transient(format!(
                "guild state not synced; occupancy of {channel} unknown"
            )));
        }
        let mut occupants: Vec<Member> = state
            .voice
            .iter()
            .filter(|(_, current)| **current == channel)
            .map(|(user, _)| {
                state
                    .members
                    .get(user)
                    .cloned()
                    .unwrap_or_else(|| Member::new(*user, user.to_string()))
            })
            .collect();
        occupants.sort_by_key(|member| member.id);
        Ok(occupants)
    }

    #[must_use]
    pub fn member(&self, user: UserId) -> Option<Member> {
        self.lock().members.get(&user).cloned()
    }

    #[must_use]
    pub fn voice_channel_of(&self, user: UserId) -> Option<ChannelId> {
        self.lock().voice.get(&user).copied()
    }

    /// Drop everything (new session, fresh snapshot follows).
    pub fn clear(&self) {
        let mut state = self.lock();
        state.members.clear();
        state.voice.clear();
        state.synced = false;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::types::ActivityKind;

    #[test]
    fn voice_state_changes_report_previous_channel() {
        let mirror = GuildMirror::new();
        mirror.mark_synced();
        let ana = Member::new(UserId(1), "ana");

        let (_, before) = mirror.apply_voice_state(ana.clone(), Some(ChannelId(10)));
        assert_eq!(before, None);
        let (_, before) = mirror.apply_voice_state(ana.clone(), Some(ChannelId(20)));
        assert_eq!(before, Some(ChannelId(10)));
        let (_, before) = mirror.apply_voice_state(ana, None);
        assert_eq!(before, Some(ChannelId(20)));
        assert!(mirror.occupants(ChannelId(20)).unwrap().is_empty());
    }

    #[test]
    fn member_updates_keep_presence() {
        let mirror = GuildMirror::new();
        mirror.upsert_member(Member::new(UserId(1), "ana"));
        mirror.apply_presence(UserId(1), vec![Activity::new(ActivityKind::Playing, "Rust")]);

        mirror.upsert_member(Member::new(UserId(1), "Ana Renamed"));
        let member = mirror.member(UserId(1)).unwrap();
        assert_eq!(member.display_name, "Ana Renamed");
        assert_eq!(member.current_subject(), Some("Rust"));
    }

    #[test]
    fn occupants_are_filtered_by_channel() {
        let mirror = GuildMirror::new();
        mirror.mark_synced();
        mirror.apply_voice_state(Member::new(UserId(2), "rui"), Some(ChannelId(10)));
        mirror.apply_voice_state(Member::new(UserId(1), "ana"), Some(ChannelId(10)));
        mirror.apply_voice_state(Member::new(UserId(3), "eva"), Some(ChannelId(11)));

        let ids: Vec<UserId> = mirror
            .occupants(ChannelId(10))
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![UserId(1), UserId(2)]);
    }

    #[test]
    fn removing_member_clears_voice_state() {
        let mirror = GuildMirror::new();
        mirror.mark_synced();
        mirror.apply_voice_state(Member::new(UserId(1), "ana"), Some(ChannelId(10)));
        assert!(mirror.remove_member(UserId(1)).is_some());
        assert_eq!(mirror.voice_channel_of(UserId(1)), None);
        assert!(mirror.occupants(ChannelId(10)).unwrap().is_empty());
    }

    #[test]
    fn occupancy_is_unknown_until_snapshot_and_after_reset() {
        let mirror = GuildMirror::new();
        mirror.apply_voice_state(Member::new(UserId(1), "ana"), Some(ChannelId(10)));
        assert!(matches!(
            mirror.occupants(ChannelId(10)),
            Err(BotError::Transient(_))
        ));

        mirror.seed_voice_state(UserId(1), ChannelId(10));
        mirror.mark_synced();
        assert_eq!(mirror.occupants(ChannelId(10)).unwrap().len(), 1);

        mirror.clear();
        assert!(!mirror.is_synced());
        assert!(mirror.occupants(ChannelId(10)).is_err());
    }
}
