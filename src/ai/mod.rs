//! Generated text: the [`Generator`] seam, the response cache every caller
//! goes through, prompt builders, and the Gemini backend.

pub mod cache;
pub mod gemini;
pub mod prompts;

pub use cache::{AiResponseCache, CacheStats, GeneratedText, TextOrigin};
pub use gemini::GeminiGenerator;
pub use prompts::{Prompt, PromptPurpose};

use crate::error::Result;
use async_trait::async_trait;

/// Text generation backend.
///
/// Failures are classified: `InvalidInput` for prompts the service rejects,
/// `Transient`/`Timeout` for service-side trouble, `PermissionDenied` for a
/// bad key.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}
