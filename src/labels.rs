//! Label State Machine.
//!
//! Each tracked voice room is either `Idle` (label is the configured
//! original) or `Active(subject)`. The event fast path and the drift sweep
//! both go through [`LabelMachine`], which holds one async lock per room
//! for the whole read-occupants / decide / write sequence. Occupancy is
//! always read fresh under that lock.
//!
//! A rename is issued only when the desired label differs from the cached
//! one. `PermissionDenied` aborts the transition; any other failure leaves
//! the cached label untouched for the next sweep to repair.

use crate::config::TrackedResourceConfig;
use crate::error::BotError;
use crate::platform::{ChannelId, Member, OutgoingMessage, Platform};
use crate::resources::{NamedResource, ResourceCache};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One managed voice room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedResource {
    pub id: ChannelId,
    pub original_label: String,
    pub current_label: String,
    pub last_write_at: Option<DateTime<Utc>>,
}

impl TrackedResource {
    #[must_use]
    pub fn new(id: ChannelId, original_label: impl Into<String>) -> Self {
        let original_label = original_label.into();
        Self {
            id,
            current_label: original_label.clone(),
            original_label,
            last_write_at: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LabelState {
        if self.current_label == self.original_label {
            LabelState::Idle
        } else {
            LabelState::Active(self.current_label.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelState {
    Idle,
    Active(String),
}

/// Result of one transition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOutcome {
    /// Desired label already cached; no write issued.
    Unchanged,
    Renamed { from: String, to: String },
    /// Transient failure or missing resource; left for the next sweep.
    Deferred,
    /// Permission failure; not retried.
    Aborted,
    /// Shutdown began; nothing applied.
    Discarded,
    /// The channel is not a tracked resource.
    Untracked,
}

impl LabelOutcome {
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Renamed { .. })
    }
}

/// Label used in an announcement after an `Idle -> Active` transition.
#[must_use]
pub fn announcement(member: &Member, subject: &str) -> String {
    format!(
        "{} started {subject} in a voice room. Join the challenge!",
        member.display_name
    )
}

/// Owner of every tracked room's label.
pub struct LabelMachine {
    platform: Arc<dyn Platform>,
    resources: Arc<ResourceCache>,
    tracked: HashMap<ChannelId, Arc<Mutex<TrackedResource>>>,
    order: Vec<ChannelId>,
    settle: Duration,
    shutdown: CancellationToken,
}

impl LabelMachine {
    #[must_use]
    pub fn new(
        platform: Arc<dyn Platform>,
        resources: Arc<ResourceCache>,
        tracked: &[TrackedResourceConfig],
        settle: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let order: Vec<ChannelId> = tracked.iter().map(|r| r.id).collect();
        let tracked = tracked
            .iter()
            .map(|r| {
                let resource = TrackedResource::new(r.id, r.original_label.clone());
                (r.id, Arc::new(Mutex::new(resource)))
            })
            .collect();
        Self {
            platform,
            resources,
            tracked,
            order,
            settle,
            shutdown,
        }
    }

    #[must_use]
    pub fn is_tracked(&self, id: ChannelId) -> bool {
        self.tracked.contains_key(&id)
    }

    /// Tracked ids in configuration order.
    #[must_use]
    pub fn tracked_ids(&self) -> &[ChannelId] {
        &self.order
    }

    /// Copy of every tracked room's state.
    pub async fn snapshot(&self) -> Vec<TrackedResource> {
        let mut out = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if let Some(entry) = self.tracked.get(id) {
                out.push(entry.lock().await.clone());
            }
        }
        out
    }

    /// Replace cached labels with the names the platform currently shows.
    pub async fn seed_from_platform(&self) -> usize {
        let mut seeded = 0;
        for id in &self.order {
            let Some(entry) = self.tracked.get(id) else {
                continue;
            };
            let mut resource = entry.lock().await;
            self.resources.invalidate(*id);
            match self.resources.resolve(self.platform.as_ref(), *id).await {
                Ok(info) => {
                    if info.name != resource.current_label {
                        debug!("label {id}: seeded as '{}'", info.name);
                    }
                    resource.current_label = info.name;
                    seeded += 1;
                }
                Err(e) => warn!("label {id}: cannot read current name: {e}"),
            }
        }
        seeded
    }

    /// A member occupies `channel` or changed subject while in it.
    ///
    /// The member's subject wins if they still occupy the room (last writer
    /// wins among occupants). An empty room goes back to its original label.
    pub async fn on_occupant(&self, channel: ChannelId, member: &Member) -> LabelOutcome {
        let Some(entry) = self.tracked.get(&channel) else {
            return LabelOutcome::Untracked;
        };
        let (outcome, announce) = {
            let mut resource = entry.lock().await;
            let occupants = match self.platform.occupants(channel).await {
                Ok(occupants) => occupants,
                Err(e) => {
                    warn!("label {channel}: cannot read occupants: {e}");
                    return LabelOutcome::Deferred;
                }
            };
            let desired = if occupants.is_empty() {
                resource.original_label.clone()
            } else if let Some(current) = occupants.iter().find(|m| m.id == member.id) {
                match current.current_subject() {
                    Some(subject) => subject.to_owned(),
                    None => return LabelOutcome::Unchanged,
                }
            } else {
                return LabelOutcome::Unchanged;
            };
            let was_idle = resource.state() == LabelState::Idle;
            let outcome = self.write(&mut resource, desired).await;
            let announce = match (&outcome, was_idle) {
                (LabelOutcome::Renamed { to, .. }, true) if *to != resource.original_label => {
                    Some(to.clone())
                }
                _ => None,
            };
            (outcome, announce)
        };
        if let Some(subject) = announce {
            self.announce(member, &subject).await;
        }
        outcome
    }

    /// Someone left `channel` (disconnect or move elsewhere).
    pub async fn on_departure(&self, channel: ChannelId) -> LabelOutcome {
        self.restore_if_empty(channel).await
    }

    /// A member's presence changed: re-evaluate every tracked room they occupy.
    pub async fn on_presence(&self, member: &Member) -> Vec<(ChannelId, LabelOutcome)> {
        let mut outcomes = Vec::new();
        for id in &self.order {
            let occupied = match self.platform.occupants(*id).await {
                Ok(occupants) => occupants.iter().any(|m| m.id == member.id),
                Err(e) => {
                    warn!("label {id}: cannot read occupants: {e}");
                    false
                }
            };
            if occupied {
                outcomes.push((*id, self.on_occupant(*id, member).await));
            }
        }
        outcomes
    }

    /// Drift correction for one room: empty with a stale label means write
    /// the original back. Occupied rooms are left alone.
    pub async fn reconcile(&self, channel: ChannelId) -> LabelOutcome {
        self.restore_if_empty(channel).await
    }

    /// Drift correction for every tracked room.
    pub async fn sweep(&self) -> Vec<(ChannelId, LabelOutcome)> {
        let mut outcomes = Vec::with_capacity(self.order.len());
        for id in &self.order {
            if self.shutdown.is_cancelled() {
                break;
            }
            outcomes.push((*id, self.reconcile(*id).await));
        }
        outcomes
    }

    async fn restore_if_empty(&self, channel: ChannelId) -> LabelOutcome {
        let Some(entry) = self.tracked.get(&channel) else {
            return LabelOutcome::Untracked;
        };
        let mut resource = entry.lock().await;
        match self.platform.occupants(channel).await {
            Ok(occupants) if occupants.is_empty() => {
                let original = resource.original_label.clone();
                self.write(&mut resource, original).await
            }
            Ok(_) => LabelOutcome::Unchanged,
            Err(e) => {
                warn!("label {channel}: cannot read occupants: {e}");
                LabelOutcome::Deferred
            }
        }
    }

    /// The only write path. Caller holds the room's lock.
    async fn write(&self, resource: &mut TrackedResource, desired: String) -> LabelOutcome {
        if self.shutdown.is_cancelled() {
            return LabelOutcome::Discarded;
        }
        if resource.current_label == desired {
            debug!("label {}: already '{desired}'", resource.id);
            return LabelOutcome::Unchanged;
        }
        let id = resource.id;
        if let Err(e) = self.resources.resolve(self.platform.as_ref(), id).await {
            warn!("label {id}: resource unavailable, skipping this cycle: {e}");
            return LabelOutcome::Deferred;
        }

        match self.platform.rename_channel(id, &desired).await {
            Ok(()) => {
                if self.shutdown.is_cancelled() {
                    info!("label {id}: rename to '{desired}' finished after shutdown; not applied");
                    return LabelOutcome::Discarded;
                }
                let from = std::mem::replace(&mut resource.current_label, desired.clone());
                resource.last_write_at = Some(Utc::now());
                self.resources.record_label(id, &desired);
                info!("label {id}: renamed '{from}' -> '{desired}'");
                if !self.settle.is_zero() {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.settle) => {}
                    }
                }
                LabelOutcome::Renamed { from, to: desired }
            }
            Err(BotError::PermissionDenied(e)) => {
                error!("label {id}: missing permission to rename: {e}");
                LabelOutcome::Aborted
            }
            Err(err @ BotError::NotFound(_)) => {
                warn!("label {id}: resource disappeared: {err}");
                self.resources.invalidate(id);
                LabelOutcome::Deferred
            }
            Err(err) => {
                warn!("label {id}: rename to '{desired}' failed, leaving it for the sweep: {err}");
                LabelOutcome::Deferred
            }
        }
    }

    async fn announce(&self, member: &Member, subject: &str) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let channel = match self
            .resources
            .resolve_named(self.platform.as_ref(), NamedResource::Activity)
            .await
        {
            Ok(info) => info.id,
            Err(e) => {
                warn!("announcement skipped: {e}");
                return;
            }
        };
        let text = announcement(member, subject);
        if let Err(e) = self
            .platform
            .send_message(channel, OutgoingMessage::text(text))
            .await
        {
            warn!("announcement to {channel} failed: {e}");
        }
    }
}
