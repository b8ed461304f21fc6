//! Anonymous post flow behind `/say`.
//!
//! Modal submit stores a draft and offers two buttons. The offer expires
//! after the upload timeout; "upload" then waits the same timeout for the
//! author's next message with an attachment. Every branch ends with a
//! visible answer to the admin who started it.

use crate::error::BotError;
use crate::platform::{
    Attachment, Button, ButtonStyle, ChannelId, InboundMessage, InteractionRef,
    InteractionResponse, ModalSpec, OutgoingMessage, Platform, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const MODAL_ID: &str = "say:modal";
pub const INPUT_ID: &str = "say:text";
const UPLOAD_PREFIX: &str = "say:upload:";
const SEND_PREFIX: &str = "say:send:";

/// Longest anonymous message accepted by the modal.
pub const MAX_MESSAGE_LEN: u16 = 2000;

pub const OFFER_TEXT: &str =
    "Message ready! Do you want to attach an image? If so, click the button below.";
pub const OFFER_EXPIRED_TEXT: &str = "Timed out. Action cancelled.";
pub const UPLOAD_EXPIRED_TEXT: &str = "❌ Upload expired: no image was received in time.";
pub const SENT_TEXT: &str = "✅ Message sent!";
pub const STALE_BUTTON_TEXT: &str = "❌ This action has expired.";

#[must_use]
pub fn modal() -> ModalSpec {
    ModalSpec {
        custom_id: MODAL_ID.to_owned(),
        title: "Send anonymous message".to_owned(),
        input_id: INPUT_ID.to_owned(),
        input_label: "Message".to_owned(),
        max_length: MAX_MESSAGE_LEN,
    }
}

#[derive(Debug, Clone)]
struct Draft {
    owner: UserId,
    channel: ChannelId,
    text: String,
}

enum ButtonAction {
    Upload(String),
    Send(String),
}

fn parse_button(custom_id: &str) -> Option<ButtonAction> {
    if let Some(id) = custom_id.strip_prefix(UPLOAD_PREFIX) {
        return Some(ButtonAction::Upload(id.to_owned()));
    }
    custom_id
        .strip_prefix(SEND_PREFIX)
        .map(|id| ButtonAction::Send(id.to_owned()))
}

/// Returns true when `custom_id` belongs to this flow.
#[must_use]
pub fn owns_component(custom_id: &str) -> bool {
    parse_button(custom_id).is_some()
}

pub struct SayFlow {
    platform: Arc<dyn Platform>,
    timeout: Duration,
    shutdown: CancellationToken,
    drafts: Mutex<HashMap<String, Draft>>,
    uploads: Mutex<HashMap<UserId, oneshot::Sender<InboundMessage>>>,
}

impl SayFlow {
    #[must_use]
    pub fn new(platform: Arc<dyn Platform>, timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            platform,
            timeout,
            shutdown,
            drafts: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    fn drafts(&self) -> MutexGuard<'_, HashMap<String, Draft>> {
        self.drafts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn uploads(&self) -> MutexGuard<'_, HashMap<UserId, oneshot::Sender<InboundMessage>>> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn pending_drafts(&self) -> usize {
        self.drafts().len()
    }

    /// Modal submitted: store the draft, offer the buttons, arm the expiry.
    pub async fn on_modal(
        self: &Arc<Self>,
        interaction: &InteractionRef,
        values: &HashMap<String, String>,
    ) {
        let text = values.get(INPUT_ID).map(|v| v.trim()).unwrap_or_default();
        if text.is_empty() {
            self.reply(interaction, "❌ The message is empty.").await;
            return;
        }
        let draft_id = Uuid::new_v4().simple().to_string();
        self.drafts().insert(
            draft_id.clone(),
            Draft {
                owner: interaction.user.id,
                channel: interaction.channel_id,
                text: text.to_owned(),
            },
        );
        let offer = InteractionResponse::Message {
            content: OFFER_TEXT.to_owned(),
            ephemeral: true,
            buttons: vec![
                Button {
                    custom_id: format!("{UPLOAD_PREFIX}{draft_id}"),
                    label: "📤 Upload image".to_owned(),
                    style: ButtonStyle::Primary,
                },
                Button {
                    custom_id: format!("{SEND_PREFIX}{draft_id}"),
                    label: "📨 Send without image".to_owned(),
                    style: ButtonStyle::Secondary,
                },
            ],
        };
        if let Err(e) = self.platform.respond(interaction, offer).await {
            warn!("say: cannot offer buttons: {e}");
            self.drafts().remove(&draft_id);
            return;
        }

        let flow = Arc::clone(self);
        let origin = interaction.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = flow.shutdown.cancelled() => return,
                _ = tokio::time::sleep(flow.timeout) => {}
            }
            if flow.drafts().remove(&draft_id).is_some() {
                debug!("say: draft {draft_id} expired");
                if let Err(e) = flow.platform.edit_response(&origin, OFFER_EXPIRED_TEXT).await {
                    warn!("say: cannot mark offer as expired: {e}");
                }
            }
        });
    }

    /// Button pressed on an offer.
    pub async fn on_button(&self, interaction: &InteractionRef, custom_id: &str) {
        let Some(action) = parse_button(custom_id) else {
            self.reply(interaction, STALE_BUTTON_TEXT).await;
            return;
        };
        let draft_id = match &action {
            ButtonAction::Upload(id) | ButtonAction::Send(id) => id.clone(),
        };
        let draft = {
            let mut drafts = self.drafts();
            let owned = drafts
                .get(&draft_id)
                .is_some_and(|draft| draft.owner == interaction.user.id);
            if owned { drafts.remove(&draft_id) } else { None }
        };
        let Some(draft) = draft else {
            self.reply(interaction, STALE_BUTTON_TEXT).await;
            return;
        };

        match action {
            ButtonAction::Send(_) => {
                if let Err(e) = self
                    .platform
                    .respond(interaction, InteractionResponse::Defer { ephemeral: true })
                    .await
                {
                    warn!("say: cannot acknowledge send: {e}");
                }
                self.post(interaction, &draft, None).await;
            }
            ButtonAction::Upload(_) => self.await_upload(interaction, &draft).await,
        }
    }

    async fn await_upload(&self, interaction: &InteractionRef, draft: &Draft) {
        let (tx, rx) = oneshot::channel();
        self.uploads().insert(draft.owner, tx);
        let prompt = format!(
            "Now send the image in this chat! You have {} seconds.",
            self.timeout.as_secs()
        );
        if let Err(e) = self
            .platform
            .respond(interaction, InteractionResponse::ephemeral(prompt))
            .await
        {
            warn!("say: cannot ask for the upload: {e}");
        }

        let message = tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.uploads().remove(&draft.owner);
                return;
            }
            received = tokio::time::timeout(self.timeout, rx) => received,
        };
        let message = match message {
            Ok(Ok(message)) => message,
            Ok(Err(_)) | Err(_) => {
                self.uploads().remove(&draft.owner);
                self.followup(interaction, UPLOAD_EXPIRED_TEXT).await;
                return;
            }
        };

        let Some(attachment_ref) = message.attachments.first() else {
            self.followup(interaction, "❌ The message had no image.").await;
            return;
        };
        let attachment = match self.platform.download_attachment(attachment_ref).await {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!("say: attachment download failed: {e}");
                self.followup(interaction, &format!("❌ Could not process the image: {e}"))
                    .await;
                return;
            }
        };
        if let Err(e) = self
            .platform
            .delete_message(message.channel_id, message.id)
            .await
        {
            debug!("say: could not delete the upload message: {e}");
        }
        self.post(interaction, draft, Some(attachment)).await;
    }

    /// Hand a message to a pending upload. Returns true when consumed.
    pub fn offer_message(&self, message: &InboundMessage) -> bool {
        if message.attachments.is_empty() {
            return false;
        }
        let Some(waiter) = self.uploads().remove(&message.author.id) else {
            return false;
        };
        waiter.send(message.clone()).is_ok()
    }

    async fn post(&self, interaction: &InteractionRef, draft: &Draft, attachment: Option<Attachment>) {
        let mut outgoing = OutgoingMessage::text(draft.text.clone());
        if let Some(attachment) = attachment {
            outgoing = outgoing.with_attachment(attachment);
        }
        let with_file = outgoing.attachment.is_some();
        match self.platform.send_message(draft.channel, outgoing).await {
            Ok(_) => {
                info!("say: anonymous message posted in {} (image: {with_file})", draft.channel);
                self.followup(interaction, SENT_TEXT).await;
            }
            Err(BotError::PermissionDenied(_)) => {
                self.followup(
                    interaction,
                    "❌ The bot is not allowed to send messages in this channel.",
                )
                .await;
            }
            Err(e) => {
                warn!("say: anonymous message failed: {e}");
                self.followup(interaction, &format!("❌ Could not send the message: {e}"))
                    .await;
            }
        }
    }

    async fn reply(&self, interaction: &InteractionRef, content: &str) {
        if let Err(e) = self
            .platform
            .respond(interaction, InteractionResponse::ephemeral(content))
            .await
        {
            warn!("say: cannot answer interaction: {e}");
        }
    }

    async fn followup(&self, interaction: &InteractionRef, content: &str) {
        if let Err(e) = self.platform.followup(interaction, content, true).await {
            warn!("say: follow-up failed: {e}");
        }
    }
}
