//! Discord adapter: REST client, gateway session and guild mirror.

mod decode;
pub mod gateway;
pub mod mirror;
pub mod rest;

pub use gateway::{GATEWAY_INTENTS, GatewayCommand, GatewayLink, run_gateway};
pub use mirror::GuildMirror;
pub use rest::DiscordClient;
