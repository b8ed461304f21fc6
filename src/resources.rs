//! Resource Cache: last known handle for the handful of channels the bot
//! writes to.
//!
//! A miss performs one platform lookup and stores the result. A lookup that
//! fails leaves nothing behind, so the next call retries. Callers treat
//! [`BotError::NotFound`] as "skip this cycle".

use crate::config::BotConfig;
use crate::error::{BotError, Result};
use crate::platform::{ChannelId, ChannelInfo, Platform};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Well-known channels named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedResource {
    /// Activity announcements and history retention.
    Activity,
    Welcome,
    Log,
    /// Linked from welcome messages; never written to.
    Info,
}

impl NamedResource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Welcome => "welcome",
            Self::Log => "log",
            Self::Info => "info",
        }
    }
}

/// Cached channel handles keyed by id.
pub struct ResourceCache {
    named: HashMap<NamedResource, ChannelId>,
    handles: Mutex<HashMap<ChannelId, ChannelInfo>>,
}

impl ResourceCache {
    #[must_use]
    pub fn new(named: HashMap<NamedResource, ChannelId>) -> Self {
        Self {
            named,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Build from the configured channel ids.
    #[must_use]
    pub fn from_config(config: &BotConfig) -> Self {
        let named = [
            (NamedResource::Activity, config.text_resource_id),
            (NamedResource::Welcome, config.welcome_resource_id),
            (NamedResource::Log, config.log_resource_id),
            (NamedResource::Info, config.info_resource_id),
        ]
        .into_iter()
        .filter_map(|(name, id)| id.map(|id| (name, id)))
        .collect();
        Self::new(named)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, ChannelInfo>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured id of a named resource.
    #[must_use]
    pub fn id_of(&self, name: NamedResource) -> Option<ChannelId> {
        self.named.get(&name).copied()
    }

    /// Resolve a channel handle, looking it up on a miss.
    pub async fn resolve(&self, platform: &dyn Platform, id: ChannelId) -> Result<ChannelInfo> {
        if let Some(hit) = self.lock().get(&id).cloned() {
            return Ok(hit);
        }
        let info = platform.fetch_channel(id).await?;
        debug!("resource cache: resolved {} as #{}", id, info.name);
        self.lock().insert(id, info.clone());
        Ok(info)
    }

    /// Resolve a named resource. An unconfigured name is `NotFound`.
    pub async fn resolve_named(
        &self,
        platform: &dyn Platform,
        name: NamedResource,
    ) -> Result<ChannelInfo> {
        let id = self.id_of(name).ok_or_else(|| {
            BotError::NotFound(format!("{} resource is not configured", name.as_str()))
        })?;
        self.resolve(platform, id).await
    }

    /// Drop a cached handle so the next resolve looks it up again.
    pub fn invalidate(&self, id: ChannelId) {
        self.lock().remove(&id);
    }

    /// Keep a cached handle's name in step with a successful rename.
    pub fn record_label(&self, id: ChannelId, label: &str) {
        if let Some(info) = self.lock().get_mut(&id) {
            info.name = label.to_owned();
        }
    }

    /// Resolve every named resource once. Failures are logged, not returned.
    pub async fn warm(&self, platform: &dyn Platform) -> usize {
        let mut resolved = 0;
        for (name, id) in &self.named {
            match self.resolve(platform, *id).await {
                Ok(_) => resolved += 1,
                Err(e) => warn!("resource cache: cannot resolve {} ({id}): {e}", name.as_str()),
            }
        }
        resolved
    }

    #[must_use]
    pub fn cached(&self, id: ChannelId) -> Option<ChannelInfo> {
        self.lock().get(&id).cloned()
    }
}
