//! Runtime wiring: builds every component from one [`BotConfig`], performs
//! the startup sequence on `Ready`, and drives the event loop until
//! shutdown.

use crate::ai::{AiResponseCache, GeminiGenerator, Generator, gemini::GeminiConfig};
use crate::config::BotConfig;
use crate::dispatch::{DispatchSettings, Dispatcher, command_definitions};
use crate::error::{BotError, Result};
use crate::labels::LabelMachine;
use crate::platform::discord::{DiscordClient, run_gateway};
use crate::platform::{CommandSpec, Platform, PlatformEvent, UserId};
use crate::resources::ResourceCache;
use crate::scheduler::{
    ActivityCycleTask, DriftSweepTask, HistoryRetentionTask, Scheduler, TASK_ACTIVITY_CYCLE,
    TASK_DRIFT_SWEEP, TASK_HISTORY_RETENTION,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Inbound event queue depth between the gateway and the event loop.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// How long shutdown waits for in-flight event handlers.
const HANDLER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Slash command registration backend.
#[async_trait]
pub trait CommandRegistry: Send + Sync {
    async fn register(&self, application_id: &str, commands: &[CommandSpec]) -> Result<usize>;
}

#[async_trait]
impl CommandRegistry for DiscordClient {
    async fn register(&self, application_id: &str, commands: &[CommandSpec]) -> Result<usize> {
        self.sync_commands(application_id, commands).await
    }
}

/// The assembled bot: every component owned once and shared by reference.
pub struct Companion {
    config: BotConfig,
    platform: Arc<dyn Platform>,
    resources: Arc<ResourceCache>,
    labels: Arc<LabelMachine>,
    ai: Arc<AiResponseCache>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Scheduler,
    registry: Option<Arc<dyn CommandRegistry>>,
    started: AtomicBool,
    handlers: TaskTracker,
    shutdown: CancellationToken,
}

impl Companion {
    /// Build every component. Nothing touches the platform until `Ready`.
    #[must_use]
    pub fn new(
        config: BotConfig,
        platform: Arc<dyn Platform>,
        generator: Arc<dyn Generator>,
        shutdown: CancellationToken,
    ) -> Self {
        let resources = Arc::new(ResourceCache::from_config(&config));
        let labels = Arc::new(LabelMachine::new(
            Arc::clone(&platform),
            Arc::clone(&resources),
            &config.resources,
            config.rename_settle(),
            shutdown.clone(),
        ));
        let ai = Arc::new(AiResponseCache::new(
            config.ai_cache_capacity,
            config.generation_timeout(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            DispatchSettings::from_config(&config),
            Arc::clone(&platform),
            Arc::clone(&resources),
            Arc::clone(&labels),
            Arc::clone(&ai),
            generator,
            shutdown.clone(),
        ));

        let jitter = config.startup_jitter();
        let scheduler = Scheduler::builder(shutdown.child_token())
            .with_task(
                TASK_DRIFT_SWEEP,
                config.sweep_interval(),
                jitter,
                Arc::new(DriftSweepTask::new(Arc::clone(&labels))),
            )
            .with_task(
                TASK_HISTORY_RETENTION,
                config.history_sweep_interval(),
                jitter,
                Arc::new(HistoryRetentionTask::new(
                    Arc::clone(&platform),
                    Arc::clone(&resources),
                    config.retention_keep,
                    config.history_window,
                    shutdown.clone(),
                )),
            )
            .with_task(
                TASK_ACTIVITY_CYCLE,
                config.activity_interval(),
                jitter,
                Arc::new(ActivityCycleTask::new(
                    Arc::clone(&platform),
                    config.presence.activity_subjects.clone(),
                    config.presence.steady(),
                    config.activity_dwell(),
                    shutdown.clone(),
                )),
            )
            .build();

        Self {
            config,
            platform,
            resources,
            labels,
            ai,
            dispatcher,
            scheduler,
            registry: None,
            started: AtomicBool::new(false),
            handlers: TaskTracker::new(),
            shutdown,
        }
    }

    /// Register slash commands through `registry` on the first `Ready`.
    #[must_use]
    pub fn with_command_registry(mut self, registry: Arc<dyn CommandRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn labels(&self) -> &Arc<LabelMachine> {
        &self.labels
    }

    #[must_use]
    pub fn ai_cache(&self) -> &Arc<AiResponseCache> {
        &self.ai
    }

    /// Startup sequence. Only the first call does the one-time work;
    /// later `Ready`s (after reconnects) just restore the presence.
    pub async fn on_ready(&self, user_id: UserId, application_id: &str) {
        self.dispatcher.set_bot_user(user_id);
        if let Err(e) = self.platform.set_presence(self.config.presence.steady()).await {
            warn!("startup: cannot set presence: {e}");
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("startup: already initialised, ignoring repeated ready");
            return;
        }

        let warmed = self.resources.warm(self.platform.as_ref()).await;
        let seeded = self.labels.seed_from_platform().await;
        info!("startup: {warmed} named resources resolved, {seeded} rooms seeded");

        if self.config.discord.sync_commands
            && let Some(registry) = &self.registry
        {
            match registry.register(application_id, &command_definitions()).await {
                Ok(count) => info!("startup: {count} slash commands registered"),
                Err(e) => warn!("startup: slash command sync failed: {e}"),
            }
        }

        if self.shutdown.is_cancelled() {
            return;
        }
        self.scheduler.start();
    }

    /// Handle one event to completion.
    pub async fn handle_event(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::Ready {
                user_id,
                application_id,
            } => self.on_ready(user_id, &application_id).await,
            other => self.dispatcher.handle(other).await,
        }
    }

    /// Consume events until the queue closes or shutdown fires. Each event
    /// runs on its own task.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PlatformEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                info!("event queue closed");
                break;
            };
            let companion = Arc::clone(&self);
            // Events for one room apply in lock order, not arrival order.
            // Each transition re-reads occupancy under the room lock, so the
            // last one to run still writes the label for the current room.
            self.handlers.spawn(async move {
                companion.handle_event(event).await;
            });
        }
        self.shutdown().await;
    }

    /// Stop the scheduler and wait briefly for in-flight handlers.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.shutdown().await;
        self.handlers.close();
        if tokio::time::timeout(HANDLER_DRAIN_TIMEOUT, self.handlers.wait())
            .await
            .is_err()
        {
            warn!(
                "shutdown: {} event handlers still running after {}s",
                self.handlers.len(),
                HANDLER_DRAIN_TIMEOUT.as_secs()
            );
        }
        let stats = self.ai.stats();
        info!(
            "shutdown complete (ai cache: {} hits, {} misses, {} failures)",
            stats.hits, stats.misses, stats.failures
        );
    }
}

/// Run the bot against Discord and Gemini until Ctrl-C.
pub async fn run_bot(config: BotConfig) -> Result<()> {
    let token = config
        .discord
        .token
        .resolve()?
        .ok_or_else(|| BotError::Config("discord token is not set".to_owned()))?;
    let client = Arc::new(DiscordClient::new(&config.discord, token)?);
    // Stored for the first identify; no session exists yet.
    let _ = client.link().update_presence(config.presence.steady());

    let generator: Arc<dyn Generator> = match config.generation.api_key.resolve()? {
        Some(key) => Arc::new(GeminiGenerator::new(GeminiConfig::from_settings(
            &config.generation,
            key,
        ))?),
        None => {
            warn!("generation api key is not set; every generated text uses its fallback");
            Arc::new(Unconfigured)
        }
    };

    let shutdown = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let companion = Arc::new(
        Companion::new(
            config,
            Arc::clone(&client) as Arc<dyn Platform>,
            generator,
            shutdown.clone(),
        )
        .with_command_registry(Arc::clone(&client) as Arc<dyn CommandRegistry>),
    );

    let gateway = tokio::spawn(run_gateway(Arc::clone(&client), event_tx, shutdown.clone()));
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received, shutting down"),
            Err(e) => error!("cannot listen for ctrl-c: {e}"),
        }
        signal_token.cancel();
    });

    companion.run(event_rx).await;
    if let Err(e) = gateway.await {
        warn!("gateway task ended abnormally: {e}");
    }
    Ok(())
}

/// Generator used when no API key is configured.
struct Unconfigured;

#[async_trait]
impl Generator for Unconfigured {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(BotError::PermissionDenied(
            "generation api key is not configured".to_owned(),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::config::TrackedResourceConfig;
    use crate::platform::{ChannelId, Member};
    use crate::scheduler::SchedulerState;
    use crate::test_utils::{FakePlatform, ScriptedGenerator, player};
    use std::sync::Mutex;

    const R1: ChannelId = ChannelId(10);
    const TEXT: ChannelId = ChannelId(20);

    #[derive(Default)]
    struct RecordingRegistry {
        registered: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl CommandRegistry for RecordingRegistry {
        async fn register(&self, application_id: &str, commands: &[CommandSpec]) -> Result<usize> {
            self.registered
                .lock()
                .unwrap()
                .push((application_id.to_owned(), commands.len()));
            Ok(commands.len())
        }
    }

    fn config() -> BotConfig {
        BotConfig {
            resources: vec![TrackedResourceConfig {
                id: R1,
                original_label: "Chill Out 1".to_owned(),
            }],
            text_resource_id: Some(TEXT),
            rename_settle_secs: 0,
            startup_jitter_secs: 0,
            ..BotConfig::default()
        }
    }

    fn companion(platform: &Arc<FakePlatform>, shutdown: CancellationToken) -> Companion {
        Companion::new(
            config(),
            Arc::clone(platform) as Arc<dyn Platform>,
            Arc::new(ScriptedGenerator::echo()),
            shutdown,
        )
    }

    fn platform() -> Arc<FakePlatform> {
        Arc::new(
            FakePlatform::new()
                .with_channel(R1, "Rust")
                .with_channel(TEXT, "activities"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ready_runs_startup_once() {
        let platform = platform();
        let registry = Arc::new(RecordingRegistry::default());
        let companion = companion(&platform, CancellationToken::new())
            .with_command_registry(Arc::clone(&registry) as Arc<dyn CommandRegistry>);

        companion.on_ready(UserId(999), "app-1").await;
        companion.on_ready(UserId(999), "app-1").await;

        assert_eq!(companion.scheduler().state(), SchedulerState::Running);
        assert_eq!(*registry.registered.lock().unwrap(), vec![("app-1".to_owned(), 4)]);
        assert_eq!(platform.presences()[0], companion.config.presence.steady());
        assert_eq!(platform.fetch_count(R1), 1);
        companion.shutdown().await;
        assert_eq!(companion.scheduler().state(), SchedulerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn drift_is_repaired_by_the_first_sweep() {
        let platform = platform();
        let companion = companion(&platform, CancellationToken::new());
        companion.on_ready(UserId(999), "app").await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(platform.renames(), vec![(R1, "Chill Out 1".to_owned())]);
        companion.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn events_flow_through_the_run_loop() {
        let platform = platform();
        let shutdown = CancellationToken::new();
        let companion = Arc::new(companion(&platform, shutdown.clone()));
        let (tx, rx) = mpsc::channel(8);
        let running = tokio::spawn(Arc::clone(&companion).run(rx));

        let ana = player(7, "ana", "Java Script");
        platform.set_occupants(R1, vec![ana.clone()]);
        tx.send(PlatformEvent::VoiceStateChanged {
            member: ana,
            before: None,
            after: Some(R1),
        })
        .await
        .unwrap();
        tx.send(PlatformEvent::MemberLeft(Member::new(UserId(8), "rui")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown.cancel();
        running.await.unwrap();
        assert_eq!(platform.renames(), vec![(R1, "Java Script".to_owned())]);
        assert_eq!(companion.scheduler().state(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn no_startup_after_shutdown() {
        let platform = platform();
        let shutdown = CancellationToken::new();
        let companion = companion(&platform, shutdown.clone());
        shutdown.cancel();

        companion.on_ready(UserId(999), "app").await;
        assert_ne!(companion.scheduler().state(), SchedulerState::Running);
    }
}
