//! Event Dispatcher: routes typed platform events to the label state
//! machine, the AI-backed greeters, slash commands, and the anonymous-post
//! flow.
//!
//! Every handler catches its own failures. Nothing returned from here can
//! stop the event loop.

pub mod commands;
pub mod cooldown;
pub mod say;

pub use commands::command_definitions;
pub use cooldown::{CooldownError, CooldownKey, Cooldowns};
pub use say::SayFlow;

use crate::ai::{AiResponseCache, Generator, prompts};
use crate::config::BotConfig;
use crate::error::BotError;
use crate::labels::LabelMachine;
use crate::platform::{
    ChannelId, InboundMessage, InteractionRef, InteractionResponse, Member, OutgoingMessage,
    Platform, PlatformEvent, RoleId, UserId,
};
use crate::resources::{NamedResource, ResourceCache};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The slice of [`BotConfig`] the dispatcher reads.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub admin_role: Option<RoleId>,
    pub community_name: String,
    pub mention_triggers: Vec<String>,
    pub tip_topics: Vec<String>,
    pub cooldown: Duration,
    pub upload_timeout: Duration,
}

impl DispatchSettings {
    #[must_use]
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            admin_role: config.admin_role_id,
            community_name: config.community_name.clone(),
            mention_triggers: config
                .mention_triggers
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            tip_topics: config.presence.tip_topics.clone(),
            cooldown: config.cooldown(),
            upload_timeout: config.upload_timeout(),
        }
    }
}

pub struct Dispatcher {
    settings: DispatchSettings,
    platform: Arc<dyn Platform>,
    resources: Arc<ResourceCache>,
    labels: Arc<LabelMachine>,
    ai: Arc<AiResponseCache>,
    generator: Arc<dyn Generator>,
    cooldowns: Cooldowns,
    say: Arc<SayFlow>,
    bot_user: OnceLock<UserId>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        settings: DispatchSettings,
        platform: Arc<dyn Platform>,
        resources: Arc<ResourceCache>,
        labels: Arc<LabelMachine>,
        ai: Arc<AiResponseCache>,
        generator: Arc<dyn Generator>,
        shutdown: CancellationToken,
    ) -> Self {
        let cooldowns = Cooldowns::new(settings.cooldown);
        let say = Arc::new(SayFlow::new(
            Arc::clone(&platform),
            settings.upload_timeout,
            shutdown,
        ));
        Self {
            settings,
            platform,
            resources,
            labels,
            ai,
            generator,
            cooldowns,
            say,
            bot_user: OnceLock::new(),
        }
    }

    /// Record the bot's own account. Later calls are ignored.
    pub fn set_bot_user(&self, user: UserId) {
        let _ = self.bot_user.set(user);
    }

    #[must_use]
    pub fn bot_user(&self) -> Option<UserId> {
        self.bot_user.get().copied()
    }

    /// Handle one event to completion.
    pub async fn handle(&self, event: PlatformEvent) {
        debug!("dispatch: {}", event.kind());
        match event {
            PlatformEvent::Ready { user_id, .. } => self.set_bot_user(user_id),
            PlatformEvent::MemberJoined(member) => self.on_member_joined(&member).await,
            PlatformEvent::MemberLeft(member) => {
                self.log_line(format!("🔸 User **{}** left the server.", member.display_name))
                    .await;
            }
            PlatformEvent::VoiceStateChanged {
                member,
                before,
                after,
            } => self.on_voice_state(&member, before, after).await,
            PlatformEvent::PresenceChanged(member) => {
                if member.bot {
                    return;
                }
                for (channel, outcome) in self.labels.on_presence(&member).await {
                    debug!("presence of {} in {channel}: {outcome:?}", member.id);
                }
            }
            PlatformEvent::MessageReceived(message) => self.on_message(&message).await,
            PlatformEvent::CommandInvoked(invocation) => self.on_command(&invocation).await,
            PlatformEvent::ComponentPressed {
                interaction,
                custom_id,
            } => {
                if say::owns_component(&custom_id) {
                    self.say.on_button(&interaction, &custom_id).await;
                } else {
                    self.respond(
                        &interaction,
                        InteractionResponse::ephemeral(say::STALE_BUTTON_TEXT),
                    )
                    .await;
                }
            }
            PlatformEvent::ModalSubmitted {
                interaction,
                custom_id,
                values,
            } => {
                if custom_id == say::MODAL_ID {
                    self.say.on_modal(&interaction, &values).await;
                } else {
                    self.respond(
                        &interaction,
                        InteractionResponse::ephemeral("Unknown form."),
                    )
                    .await;
                }
            }
        }
    }

    async fn on_voice_state(
        &self,
        member: &Member,
        before: Option<ChannelId>,
        after: Option<ChannelId>,
    ) {
        if before == after {
            return;
        }
        if let Some(left) = before.filter(|id| self.labels.is_tracked(*id)) {
            let outcome = self.labels.on_departure(left).await;
            debug!("{} left {left}: {outcome:?}", member.id);
        }
        if let Some(joined) = after.filter(|id| self.labels.is_tracked(*id)) {
            let outcome = self.labels.on_occupant(joined, member).await;
            debug!("{} joined {joined}: {outcome:?}", member.id);
        }
    }

    async fn on_member_joined(&self, member: &Member) {
        if member.bot {
            return;
        }
        info!("member joined: {} ({})", member.display_name, member.id);
        let info_channel = self
            .resources
            .id_of(NamedResource::Info)
            .map(|id| id.to_string());
        let prompt = prompts::welcome(
            &self.settings.community_name,
            &member.mention(),
            info_channel.as_deref(),
        );
        let welcome = self
            .ai
            .get_or_generate(&prompt, self.generator.as_ref())
            .await;
        self.post_named(NamedResource::Welcome, welcome.text).await;
        self.log_line(format!("🔹 User **{}** joined the server.", member.display_name))
            .await;
    }

    async fn on_message(&self, message: &InboundMessage) {
        if message.author.bot {
            return;
        }
        if self.say.offer_message(message) {
            return;
        }
        if !self.is_addressed(message) {
            return;
        }
        let generated = self
            .ai
            .get_or_generate(&prompts::mention_reply(&message.content), self.generator.as_ref())
            .await;
        let reply = if generated.is_fallback() {
            generated.text
        } else {
            format!(
                "Hello, {}! {}",
                message.author.display_name,
                generated.text.trim()
            )
        };
        if let Err(e) = self
            .platform
            .send_message(message.channel_id, OutgoingMessage::text(reply))
            .await
        {
            warn!("mention reply in {} failed: {e}", message.channel_id);
        }
    }

    /// The bot was mentioned, or a trigger word appears in the text.
    fn is_addressed(&self, message: &InboundMessage) -> bool {
        if self
            .bot_user()
            .is_some_and(|bot| message.mentions_user(bot))
        {
            return true;
        }
        let content = message.content.to_lowercase();
        content
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| self.settings.mention_triggers.iter().any(|t| t == word))
    }

    async fn log_line(&self, line: String) {
        self.post_named(NamedResource::Log, line).await;
    }

    async fn post_named(&self, name: NamedResource, content: String) {
        let channel = match self
            .resources
            .resolve_named(self.platform.as_ref(), name)
            .await
        {
            Ok(info) => info.id,
            Err(e) => {
                debug!("skipping {} post: {e}", name.as_str());
                return;
            }
        };
        match self
            .platform
            .send_message(channel, OutgoingMessage::text(content))
            .await
        {
            Ok(_) => {}
            Err(BotError::PermissionDenied(e)) => {
                error!("{} post denied in {channel}: {e}", name.as_str());
            }
            Err(e) => warn!("{} post failed in {channel}: {e}", name.as_str()),
        }
    }

    pub(crate) async fn respond(&self, interaction: &InteractionRef, response: InteractionResponse) {
        if let Err(e) = self.platform.respond(interaction, response).await {
            warn!("interaction {} not answered: {e}", interaction.id);
        }
    }
}
