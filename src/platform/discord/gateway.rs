//! Discord gateway session: hello, identify, heartbeat, dispatch decoding,
//! presence updates, reconnect with backoff.

use crate::error::{BotError, Result};
use crate::platform::discord::decode::decode_dispatch;
use crate::platform::discord::rest::DiscordClient;
use crate::platform::events::PlatformEvent;
use crate::platform::types::Presence;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

/// GUILDS | GUILD_MEMBERS | GUILD_VOICE_STATES | GUILD_PRESENCES |
/// GUILD_MESSAGES | MESSAGE_CONTENT
pub const GATEWAY_INTENTS: u64 = 1 | (1 << 1) | (1 << 7) | (1 << 8) | (1 << 9) | (1 << 15);

const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_PRESENCE_UPDATE: u64 = 3;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 60;

/// Commands sent from the REST side into a live session.
#[derive(Debug, Clone)]
pub enum GatewayCommand {
    UpdatePresence(Presence),
}

#[derive(Debug, Default)]
struct LinkState {
    commands: Option<mpsc::Sender<GatewayCommand>>,
    latency: Option<Duration>,
    presence: Option<Presence>,
}

/// Shared state between the REST client and the current gateway session.
#[derive(Debug, Default)]
pub struct GatewayLink {
    state: Mutex<LinkState>,
}

impl GatewayLink {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach(&self, commands: mpsc::Sender<GatewayCommand>) {
        self.lock().commands = Some(commands);
    }

    fn detach(&self) {
        self.lock().commands = None;
    }

    fn record_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Last heartbeat round trip.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.lock().latency
    }

    /// Presence sent on the next identify.
    #[must_use]
    pub fn presence(&self) -> Option<Presence> {
        self.lock().presence.clone()
    }

    /// Remember `presence` and push it to the live session.
    pub fn update_presence(&self, presence: Presence) -> Result<()> {
        let mut state = self.lock();
        state.presence = Some(presence.clone());
        let Some(commands) = state.commands.as_ref() else {
            return Err(BotError::Transient("gateway is not connected".to_owned()));
        };
        commands
            .try_send(GatewayCommand::UpdatePresence(presence))
            .map_err(|e| BotError::Transient(format!("gateway command queue: {e}")))
    }
}

/// Detaches the command queue when a session ends, however it ends.
struct SessionGuard<'a>(&'a GatewayLink);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.detach();
    }
}

fn presence_payload(presence: Option<&Presence>) -> Value {
    let activities = match presence {
        Some(presence) => json!([{ "name": presence.label, "type": presence.kind.code() }]),
        None => json!([]),
    };
    json!({
        "since": Value::Null,
        "activities": activities,
        "status": "online",
        "afk": false
    })
}

/// Run gateway sessions until `shutdown` fires, reconnecting with
/// exponential backoff.
pub async fn run_gateway(
    client: Arc<DiscordClient>,
    event_tx: mpsc::Sender<PlatformEvent>,
    shutdown: CancellationToken,
) {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = run_session(&client, &event_tx, &shutdown) => result,
        };
        // Events are missed while disconnected; occupancy is unknown until
        // the next guild snapshot.
        client.mirror().clear();
        match result {
            Ok(SessionEnd::Shutdown) => break,
            Ok(SessionEnd::Reconnect { was_ready }) => {
                tracing::warn!("gateway session ended; reconnecting in {backoff_secs}s");
                if was_ready {
                    backoff_secs = INITIAL_BACKOFF_SECS;
                }
            }
            Err(err) => {
                tracing::warn!("gateway session failed: {err}; retrying in {backoff_secs}s");
                if matches!(err, BotError::PermissionDenied(_)) {
                    tracing::error!("gateway rejected the bot token; giving up");
                    break;
                }
            }
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
        }
        backoff_secs = backoff_secs.saturating_mul(2).min(MAX_BACKOFF_SECS);
    }
    tracing::info!("gateway stopped");
}

/// Gateway websocket URL with the protocol version and encoding pinned.
fn session_url(gateway_url: &str) -> Result<Url> {
    let mut url = Url::parse(gateway_url)
        .map_err(|e| BotError::InvalidInput(format!("gateway url `{gateway_url}`: {e}")))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("v", "10")
        .append_pair("encoding", "json");
    Ok(url)
}

enum SessionEnd {
    Shutdown,
    Reconnect { was_ready: bool },
}

fn transport(err: impl std::fmt::Display) -> BotError {
    BotError::Transient(format!("gateway transport: {err}"))
}

async fn run_session(
    client: &DiscordClient,
    event_tx: &mpsc::Sender<PlatformEvent>,
    shutdown: &CancellationToken,
) -> Result<SessionEnd> {
    let gateway_url = client.gateway_url().await?;
    let ws_url = session_url(&gateway_url)?;
    let (stream, _) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .map_err(transport)?;
    let (mut write, mut read) = stream.split();

    let hello = read
        .next()
        .await
        .ok_or_else(|| BotError::Transient("gateway closed before hello".to_owned()))?
        .map_err(transport)?;
    let hello_json: Value = match hello {
        Message::Text(text) => serde_json::from_str(&text)?,
        _ => return Err(BotError::Transient("unexpected gateway hello payload".to_owned())),
    };
    if hello_json.get("op").and_then(Value::as_u64) != Some(OP_HELLO) {
        return Err(BotError::Transient("gateway did not say hello".to_owned()));
    }
    let heartbeat_interval_ms = hello_json
        .get("d")
        .and_then(|v| v.get("heartbeat_interval"))
        .and_then(Value::as_u64)
        .unwrap_or(41_250);

    let link = client.link();
    let identify = json!({
        "op": OP_IDENTIFY,
        "d": {
            "token": client.token(),
            "intents": GATEWAY_INTENTS,
            "presence": presence_payload(link.presence().as_ref()),
            "properties": {
                "os": std::env::consts::OS,
                "browser": "codebot",
                "device": "codebot"
            }
        }
    });
    write
        .send(Message::Text(identify.to_string()))
        .await
        .map_err(transport)?;

    let (command_tx, mut command_rx) = mpsc::channel::<GatewayCommand>(8);
    link.attach(command_tx);
    let _guard = SessionGuard(link.as_ref());
    let mirror = client.mirror();

    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_interval_ms));
    let mut sequence: Option<u64> = None;
    let mut last_beat: Option<Instant> = None;
    let mut was_ready = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
            _ = heartbeat.tick() => {
                let beat = json!({ "op": OP_HEARTBEAT, "d": sequence });
                write.send(Message::Text(beat.to_string())).await.map_err(transport)?;
                last_beat = Some(Instant::now());
            }
            Some(command) = command_rx.recv() => {
                let GatewayCommand::UpdatePresence(presence) = command;
                let update = json!({ "op": OP_PRESENCE_UPDATE, "d": presence_payload(Some(&presence)) });
                write.send(Message::Text(update.to_string())).await.map_err(transport)?;
            }
            frame = read.next() => {
                let raw = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(SessionEnd::Reconnect { was_ready });
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(transport(err)),
                };
                let payload: Value = match serde_json::from_str(&raw) {
                    Ok(value) => value,
                    Err(_) => continue,
                };
                match payload.get("op").and_then(Value::as_u64) {
                    Some(OP_DISPATCH) => {
                        if let Some(seq) = payload.get("s").and_then(Value::as_u64) {
                            sequence = Some(seq);
                        }
                        let name = payload.get("t").and_then(Value::as_str).unwrap_or_default();
                        let Some(data) = payload.get("d") else {
                            continue;
                        };
                        if name == "READY" {
                            mirror.clear();
                            was_ready = true;
                        }
                        if let Some(event) = decode_dispatch(name, data, &mirror)
                            && event_tx.send(event).await.is_err()
                        {
                            return Ok(SessionEnd::Shutdown);
                        }
                    }
                    Some(OP_HEARTBEAT) => {
                        let beat = json!({ "op": OP_HEARTBEAT, "d": sequence });
                        write.send(Message::Text(beat.to_string())).await.map_err(transport)?;
                    }
                    Some(OP_HEARTBEAT_ACK) => {
                        if let Some(sent) = last_beat.take() {
                            link.record_latency(sent.elapsed());
                        }
                    }
                    Some(OP_RECONNECT) | Some(OP_INVALID_SESSION) => {
                        return Ok(SessionEnd::Reconnect { was_ready });
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::platform::types::ActivityKind;

    #[test]
    fn intents_cover_voice_presence_and_content() {
        assert_eq!(GATEWAY_INTENTS, 33_667);
    }

    #[test]
    fn presence_update_without_session_is_transient_but_remembered() {
        let link = GatewayLink::default();
        let presence = Presence::new(ActivityKind::Watching, "#code.lab");
        let err = link.update_presence(presence.clone()).unwrap_err();
        assert!(matches!(err, BotError::Transient(_)));
        assert_eq!(link.presence(), Some(presence));
    }

    #[tokio::test]
    async fn presence_update_reaches_attached_session() {
        let link = GatewayLink::default();
        let (tx, mut rx) = mpsc::channel(1);
        link.attach(tx);
        link.update_presence(Presence::new(ActivityKind::Playing, "Rust"))
            .unwrap();
        let GatewayCommand::UpdatePresence(sent) = rx.recv().await.unwrap();
        assert_eq!(sent.label, "Rust");

        link.detach();
        assert!(link.update_presence(Presence::new(ActivityKind::Playing, "PHP")).is_err());
    }

    #[test]
    fn session_url_pins_version_and_encoding() {
        let url = session_url("wss://gateway.discord.gg").unwrap();
        assert_eq!(url.as_str(), "wss://gateway.discord.gg/?v=10&encoding=json");
        let url = session_url("wss://gateway.discord.gg/?v=6").unwrap();
        assert_eq!(url.query(), Some("v=10&encoding=json"));
        assert!(session_url("not a url").is_err());
    }

    #[test]
    fn presence_payload_encodes_activity_type() {
        let payload = presence_payload(Some(&Presence::new(ActivityKind::Watching, "#code.lab")));
        assert_eq!(payload["activities"][0]["type"], 3);
        assert_eq!(payload["activities"][0]["name"], "#code.lab");
        assert_eq!(presence_payload(None)["activities"], json!([]));
    }
}
