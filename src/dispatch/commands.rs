//! Slash commands: `/ping`, `/coin`, `/tips`, `/say`.

use super::Dispatcher;
use super::cooldown::{CooldownError, CooldownKey};
use super::say;
use crate::ai::prompts;
use crate::error::BotError;
use crate::platform::{CommandInvocation, CommandSpec, InteractionRef, InteractionResponse, OutgoingMessage};
use rand::Rng;
use rand::seq::SliceRandom;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PING: &str = "ping";
pub const COIN: &str = "coin";
pub const TIPS: &str = "tips";
pub const SAY: &str = "say";

/// Commands registered with the platform.
#[must_use]
pub fn command_definitions() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: PING,
            description: "Show the bot's gateway latency",
        },
        CommandSpec {
            name: COIN,
            description: "Flip a coin",
        },
        CommandSpec {
            name: TIPS,
            description: "Post a programming tip in this channel",
        },
        CommandSpec {
            name: SAY,
            description: "Send an anonymous message (administrators only)",
        },
    ]
}

/// Commands that take a cooldown ticket before running.
#[must_use]
pub fn is_cooldown_guarded(name: &str) -> bool {
    name == COIN
}

#[must_use]
pub fn ping_text(latency: Option<Duration>) -> String {
    match latency {
        Some(latency) => format!("Pong! Latency: {:.2}ms", latency.as_secs_f64() * 1000.0),
        None => "Pong! Latency not measured yet.".to_owned(),
    }
}

#[must_use]
pub fn coin_text(heads: bool) -> String {
    let side = if heads { "Heads" } else { "Tails" };
    format!("The coin spun and landed on **{side}**")
}

#[must_use]
pub fn cooldown_text(err: &CooldownError) -> String {
    match err {
        CooldownError::Active { retry_after_secs } => {
            format!("This command is on cooldown. Try again in {retry_after_secs}s.")
        }
    }
}

pub const NOT_ADMIN_TEXT: &str = "Only administrators can use this command.";
pub const TIP_SENT_TEXT: &str = "Tip sent!";

impl Dispatcher {
    pub(super) async fn on_command(&self, invocation: &CommandInvocation) {
        let interaction = &invocation.interaction;
        if is_cooldown_guarded(&invocation.name) {
            let key = CooldownKey::new(
                invocation.name.as_str(),
                interaction.guild_id,
                interaction.user.id,
            );
            if let Err(err) = self.cooldowns.try_acquire(key) {
                debug!(
                    "/{} rejected for {}: {err}",
                    invocation.name, interaction.user.id
                );
                self.respond(interaction, InteractionResponse::ephemeral(cooldown_text(&err)))
                    .await;
                return;
            }
        }

        match invocation.name.as_str() {
            PING => {
                let text = ping_text(self.platform.latency());
                self.respond(interaction, InteractionResponse::message(text))
                    .await;
            }
            COIN => {
                let heads = rand::thread_rng().gen_bool(0.5);
                self.respond(interaction, InteractionResponse::message(coin_text(heads)))
                    .await;
            }
            TIPS => self.tips(interaction).await,
            SAY => {
                let allowed = self
                    .settings
                    .admin_role
                    .is_some_and(|role| interaction.user.has_role(role));
                let response = if allowed {
                    InteractionResponse::Modal(say::modal())
                } else {
                    InteractionResponse::ephemeral(NOT_ADMIN_TEXT)
                };
                self.respond(interaction, response).await;
            }
            other => {
                warn!("unknown command /{other}");
                self.respond(
                    interaction,
                    InteractionResponse::ephemeral(format!("Unknown command /{other}.")),
                )
                .await;
            }
        }
    }

    async fn tips(&self, interaction: &InteractionRef) {
        self.respond(interaction, InteractionResponse::Defer { ephemeral: true })
            .await;
        let topic = self
            .settings
            .tip_topics
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| "programming".to_owned());
        let generated = self
            .ai
            .get_or_generate(&prompts::tip(&topic), self.generator.as_ref())
            .await;
        let text = prompts::format_tip(&generated.text);

        let reply = match self
            .platform
            .send_message(interaction.channel_id, OutgoingMessage::text(text))
            .await
        {
            Ok(_) => {
                info!("tip about {topic} posted in {}", interaction.channel_id);
                TIP_SENT_TEXT.to_owned()
            }
            Err(BotError::PermissionDenied(e)) => {
                warn!("tip not posted in {}: {e}", interaction.channel_id);
                "❌ The bot is not allowed to post in this channel.".to_owned()
            }
            Err(e) => {
                warn!("tip not posted in {}: {e}", interaction.channel_id);
                format!("❌ Could not send the tip: {e}")
            }
        };
        if let Err(e) = self.platform.followup(interaction, &reply, true).await {
            warn!("/tips follow-up failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn definitions_cover_every_routed_command() {
        let names: Vec<&str> = command_definitions().iter().map(|c| c.name).collect();
        assert_eq!(names, vec![PING, COIN, TIPS, SAY]);
        assert!(is_cooldown_guarded(COIN));
        assert!(!is_cooldown_guarded(PING));
    }

    #[test]
    fn ping_formats_milliseconds() {
        assert_eq!(
            ping_text(Some(Duration::from_micros(42_500))),
            "Pong! Latency: 42.50ms"
        );
        assert!(ping_text(None).starts_with("Pong!"));
    }

    #[test]
    fn cooldown_text_names_the_wait() {
        let err = CooldownError::Active { retry_after_secs: 3 };
        assert_eq!(
            cooldown_text(&err),
            "This command is on cooldown. Try again in 3s."
        );
    }
}
