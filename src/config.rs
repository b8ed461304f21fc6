//! Configuration for the companion runtime.
//!
//! Loaded once at startup from a TOML file, validated, and passed by
//! reference to constructors. Nothing reads the environment after that,
//! except [`SecretRef::Env`] resolution.

use crate::error::{BotError, Result};
use crate::platform::types::{ActivityKind, ChannelId, Presence, RoleId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Reference to a secret value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecretRef {
    /// No secret.
    #[default]
    None,
    /// Inline literal (discouraged outside tests).
    Literal { value: String },
    /// Read from an environment variable at startup.
    Env { var: String },
}

impl SecretRef {
    /// Returns true when the reference points somewhere.
    #[must_use]
    pub fn is_set(&self) -> bool {
        match self {
            Self::None => false,
            Self::Literal { value } => !value.trim().is_empty(),
            Self::Env { var } => !var.trim().is_empty(),
        }
    }

    /// Resolve the secret. `Ok(None)` means no secret configured.
    pub fn resolve(&self) -> Result<Option<String>> {
        match self {
            Self::None => Ok(None),
            Self::Literal { value } => Ok(Some(value.trim().to_owned())),
            Self::Env { var } => {
                let value = std::env::var(var).map_err(|_| {
                    BotError::Config(format!("secret env var is missing: {var}"))
                })?;
                if value.trim().is_empty() {
                    return Err(BotError::Config(format!("secret env var is empty: {var}")));
                }
                Ok(Some(value.trim().to_owned()))
            }
        }
    }
}

/// A voice room whose label this process manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResourceConfig {
    pub id: ChannelId,
    pub original_label: String,
}

/// Discord connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Bot token.
    pub token: SecretRef,
    /// REST API base URL.
    pub api_base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Overwrite global slash commands on every ready event.
    pub sync_commands: bool,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: SecretRef::Env {
                var: "DISCORD_TOKEN".to_owned(),
            },
            api_base_url: "https://discord.com/api/v10".to_owned(),
            request_timeout_secs: 15,
            sync_commands: true,
        }
    }
}

/// Text generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// API key.
    pub api_key: SecretRef,
    /// Model identifier.
    pub model: String,
    /// API base URL.
    pub api_base_url: String,
    /// Upper bound on a single generation call, in seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: SecretRef::Env {
                var: "GEMINI_API_KEY".to_owned(),
            },
            model: "gemini-2.0-flash-lite".to_owned(),
            api_base_url: "https://generativelanguage.googleapis.com".to_owned(),
            timeout_secs: 20,
        }
    }
}

/// Bot presence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Steady-state presence kind.
    pub steady_kind: ActivityKind,
    /// Steady-state presence label.
    pub steady_label: String,
    /// Subjects rotated through by the activity announcement cycle.
    pub activity_subjects: Vec<String>,
    /// Topics used by the tips command.
    pub tip_topics: Vec<String>,
}

impl PresenceConfig {
    #[must_use]
    pub fn steady(&self) -> Presence {
        Presence::new(self.steady_kind, self.steady_label.clone())
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            steady_kind: ActivityKind::Watching,
            steady_label: "#code.lab".to_owned(),
            activity_subjects: ["Python", "Rust", "Java Script", "Visual Studio Code", "PHP"]
                .map(str::to_owned)
                .to_vec(),
            tip_topics: ["Python", "Rust", "Java Script", "C++", "PHP"]
                .map(str::to_owned)
                .to_vec(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Voice rooms whose labels follow their occupants' activity.
    pub resources: Vec<TrackedResourceConfig>,
    /// Text channel for activity announcements; its history is trimmed.
    pub text_resource_id: Option<ChannelId>,
    /// Text channel for join/leave lines.
    pub log_resource_id: Option<ChannelId>,
    /// Text channel for welcome messages.
    pub welcome_resource_id: Option<ChannelId>,
    /// Channel linked from welcome messages.
    pub info_resource_id: Option<ChannelId>,
    /// Role allowed to use `/say`.
    pub admin_role_id: Option<RoleId>,
    /// Messages kept by the history retention sweep.
    pub retention_keep: usize,
    /// Messages inspected by the history retention sweep.
    pub history_window: usize,
    /// Drift-correction sweep interval.
    pub sweep_interval_minutes: u64,
    /// History retention sweep interval.
    pub history_sweep_interval_minutes: u64,
    /// Activity announcement cycle interval.
    pub activity_interval_minutes: u64,
    /// How long an announced activity stays before the steady presence returns.
    pub activity_dwell_minutes: u64,
    /// Upper bound of the random delay before each task's first run.
    pub startup_jitter_secs: u64,
    /// AI response cache capacity (entries).
    pub ai_cache_capacity: usize,
    /// Cooldown for rate-limited commands.
    pub cooldown_seconds: u64,
    /// Wait for the anonymous-post buttons and image upload.
    pub upload_timeout_secs: u64,
    /// Pause after each successful rename.
    pub rename_settle_secs: u64,
    /// Community display name used in prompts and fallbacks.
    pub community_name: String,
    /// Words that make the bot answer a message without a mention.
    pub mention_triggers: Vec<String>,
    pub presence: PresenceConfig,
    pub discord: DiscordConfig,
    pub generation: GenerationConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            resources: Vec::new(),
            text_resource_id: None,
            log_resource_id: None,
            welcome_resource_id: None,
            info_resource_id: None,
            admin_role_id: None,
            retention_keep: 20,
            history_window: 100,
            sweep_interval_minutes: 20,
            history_sweep_interval_minutes: 20,
            activity_interval_minutes: 60,
            activity_dwell_minutes: 20,
            startup_jitter_secs: 10,
            ai_cache_capacity: 100,
            cooldown_seconds: 5,
            upload_timeout_secs: 60,
            rename_settle_secs: 2,
            community_name: "#code.lab".to_owned(),
            mention_triggers: vec!["sentry".to_owned(), "codebot".to_owned()],
            presence: PresenceConfig::default(),
            discord: DiscordConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

/// Severity of a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

/// Validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub id: &'static str,
    pub severity: ConfigSeverity,
    pub summary: String,
}

impl ConfigIssue {
    fn error(id: &'static str, summary: impl Into<String>) -> Self {
        Self {
            id,
            severity: ConfigSeverity::Error,
            summary: summary.into(),
        }
    }

    fn warning(id: &'static str, summary: impl Into<String>) -> Self {
        Self {
            id,
            severity: ConfigSeverity::Warning,
            summary: summary.into(),
        }
    }
}

fn minutes(value: u64) -> Duration {
    Duration::from_secs(value.saturating_mul(60))
}

impl BotConfig {
    /// Parse a TOML file without validating it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BotError::Config(e.to_string()))
    }

    /// Parse and validate. Warnings are logged; errors fail the load.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        let issues = config.validate();
        let mut errors = Vec::new();
        for issue in issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {}", issue.summary),
                ConfigSeverity::Error => errors.push(issue.summary),
            }
        }
        if !errors.is_empty() {
            return Err(BotError::Config(errors.join("; ")));
        }
        Ok(config)
    }

    /// Default config location (`./codebot.toml`).
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("codebot.toml")
    }

    /// Check the configuration without touching the network.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.resources.is_empty() {
            issues.push(ConfigIssue::error(
                "no-tracked-resources",
                "at least one voice resource must be configured",
            ));
        }
        let mut seen = HashSet::new();
        for resource in &self.resources {
            if !seen.insert(resource.id) {
                issues.push(ConfigIssue::error(
                    "duplicate-resource",
                    format!("voice resource {} is listed more than once", resource.id),
                ));
            }
            if resource.original_label.trim().is_empty() {
                issues.push(ConfigIssue::error(
                    "empty-original-label",
                    format!("voice resource {} has an empty original label", resource.id),
                ));
            }
        }

        if self.text_resource_id.is_none() {
            issues.push(ConfigIssue::error(
                "missing-text-resource",
                "text_resource_id is required for announcements and retention",
            ));
        }
        if self.log_resource_id.is_none() {
            issues.push(ConfigIssue::warning(
                "missing-log-resource",
                "log_resource_id is not set; join/leave lines are disabled",
            ));
        }
        if self.welcome_resource_id.is_none() {
            issues.push(ConfigIssue::warning(
                "missing-welcome-resource",
                "welcome_resource_id is not set; welcome messages are disabled",
            ));
        }

        for (id, value) in [
            ("zero-sweep-interval", self.sweep_interval_minutes),
            ("zero-history-interval", self.history_sweep_interval_minutes),
            ("zero-activity-interval", self.activity_interval_minutes),
        ] {
            if value == 0 {
                issues.push(ConfigIssue::error(id, format!("{id}: interval must be positive")));
            }
        }
        if self.activity_dwell_minutes >= self.activity_interval_minutes {
            issues.push(ConfigIssue::error(
                "dwell-exceeds-interval",
                "activity_dwell_minutes must be shorter than activity_interval_minutes",
            ));
        }

        if self.retention_keep == 0 {
            issues.push(ConfigIssue::error(
                "zero-retention",
                "retention_keep must be at least 1",
            ));
        }
        if self.history_window == 0 || self.history_window > 100 {
            issues.push(ConfigIssue::error(
                "history-window-range",
                "history_window must be between 1 and 100",
            ));
        }
        if self.retention_keep > self.history_window {
            issues.push(ConfigIssue::error(
                "retention-exceeds-window",
                "retention_keep must not exceed history_window",
            ));
        }

        if self.ai_cache_capacity == 0 {
            issues.push(ConfigIssue::warning(
                "ai-cache-disabled",
                "ai_cache_capacity is 0; every prompt calls the generator",
            ));
        }
        if self.presence.activity_subjects.is_empty() {
            issues.push(ConfigIssue::warning(
                "no-activity-subjects",
                "presence.activity_subjects is empty; the activity cycle only resets presence",
            ));
        }
        for (id, value) in [
            ("invalid-discord-api-url", &self.discord.api_base_url),
            ("invalid-generation-api-url", &self.generation.api_base_url),
        ] {
            if let Err(e) = Url::parse(value) {
                issues.push(ConfigIssue::error(id, format!("`{value}` is not a valid URL: {e}")));
            }
        }
        if !self.discord.token.is_set() {
            issues.push(ConfigIssue::error(
                "missing-discord-token",
                "discord.token is not configured",
            ));
        }

        issues
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        minutes(self.sweep_interval_minutes)
    }

    #[must_use]
    pub fn history_sweep_interval(&self) -> Duration {
        minutes(self.history_sweep_interval_minutes)
    }

    #[must_use]
    pub fn activity_interval(&self) -> Duration {
        minutes(self.activity_interval_minutes)
    }

    #[must_use]
    pub fn activity_dwell(&self) -> Duration {
        minutes(self.activity_dwell_minutes)
    }

    #[must_use]
    pub fn startup_jitter(&self) -> Duration {
        Duration::from_secs(self.startup_jitter_secs)
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    #[must_use]
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs.max(1))
    }

    #[must_use]
    pub fn rename_settle(&self) -> Duration {
        Duration::from_secs(self.rename_settle_secs)
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.timeout_secs.max(1))
    }
}
