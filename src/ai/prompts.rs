//! Prompt builders for the three places the bot generates text.
//!
//! Cache keys carry the purpose as well as the full prompt text, so a tip
//! and a mention reply can never collide even if their wording did.

use std::fmt;

/// Which call site a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptPurpose {
    Tip,
    Welcome,
    MentionReply,
}

impl PromptPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tip => "tip",
            Self::Welcome => "welcome",
            Self::MentionReply => "mention",
        }
    }
}

impl fmt::Display for PromptPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt together with the text used when generation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub purpose: PromptPurpose,
    pub text: String,
    pub fallback: String,
}

impl Prompt {
    pub fn new(purpose: PromptPurpose, text: impl Into<String>, fallback: impl Into<String>) -> Self {
        Self {
            purpose,
            text: text.into(),
            fallback: fallback.into(),
        }
    }

    /// Cache key: purpose tag plus the complete prompt text.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}", self.purpose, self.text)
    }
}

pub const TIP_FALLBACK: &str = "Silence in war can also be a message.";

pub const MENTION_FALLBACK: &str =
    "Hi, did you say my name? Sorry I can't pay attention right now, I'm a bit busy...";

/// Programming tip about `topic`.
#[must_use]
pub fn tip(topic: &str) -> Prompt {
    Prompt::new(
        PromptPurpose::Tip,
        format!(
            "You are an expert in programming languages. Write one short, useful sentence \
             about programming techniques in {topic}, without emojis."
        ),
        TIP_FALLBACK,
    )
}

/// Wrap tip text for posting.
#[must_use]
pub fn format_tip(text: &str) -> String {
    format!("🔹***code**Tips*: _{}_", text.trim())
}

/// Welcome message for a new member.
#[must_use]
pub fn welcome(community: &str, mention: &str, info_channel: Option<&str>) -> Prompt {
    let info = info_channel.map(|id| format!("<#{id}>"));
    let visit = info
        .as_deref()
        .map(|link| format!(" To learn more about us, visit {link}"))
        .unwrap_or_default();
    let text = format!(
        "Write a welcome message for a new member of the Discord server \"{community}\". \
         Include a friendly greeting, the mention {mention}, the server name in bold \
         (\"**{community}**\"){}. Keep it short and in a programming mood.",
        info.as_deref()
            .map(|link| format!(" and an invitation to visit {link}"))
            .unwrap_or_default()
    );
    let fallback = format!("hey... {mention}, welcome to the **{community}** Discord!{visit}");
    Prompt::new(PromptPurpose::Welcome, text, fallback)
}

/// Reply to a message that mentioned the bot.
#[must_use]
pub fn mention_reply(content: &str) -> Prompt {
    Prompt::new(
        PromptPurpose::MentionReply,
        format!(
            "Imagine you are codeBot, a master of programming. Write a short reply to this \
             message, without starting with 'Hello': {content}"
        ),
        MENTION_FALLBACK,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_differ_across_purposes_with_same_text() {
        let a = Prompt::new(PromptPurpose::Tip, "same", "x");
        let b = Prompt::new(PromptPurpose::MentionReply, "same", "x");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn mention_key_contains_full_message() {
        let short = mention_reply("hi codebot");
        let long = mention_reply("hi codebot, how do lifetimes work?");
        assert_ne!(short.key(), long.key());
        assert!(long.key().ends_with("how do lifetimes work?"));
    }

    #[test]
    fn welcome_fallback_links_info_channel() {
        let prompt = welcome("#code.lab", "<@7>", Some("42"));
        assert!(prompt.fallback.contains("<@7>"));
        assert!(prompt.fallback.contains("**#code.lab**"));
        assert!(prompt.fallback.ends_with("visit <#42>"));

        let bare = welcome("#code.lab", "<@7>", None);
        assert!(bare.fallback.ends_with("Discord!"));
    }

    #[test]
    fn tip_is_wrapped() {
        assert_eq!(format_tip(" use iterators "), "🔹***code**Tips*: _use iterators_");
    }
}
