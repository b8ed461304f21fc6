//! AI Response Cache.
//!
//! Memoizes generated text by prompt key in a [`moka`] cache with plain LRU
//! eviction at a fixed capacity. Pending maintenance runs after every insert,
//! so a full cache evicts exactly one entry per new key. Concurrent misses on
//! one key share a single generator call, and its failure too. Failures are
//! logged and answered with the prompt's fallback; they are never stored.

use crate::ai::Generator;
use crate::ai::prompts::Prompt;
use crate::error::BotError;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Where a piece of text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOrigin {
    Cache,
    Generator,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedText {
    pub text: String,
    pub origin: TextOrigin,
}

impl GeneratedText {
    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.origin == TextOrigin::Fallback
    }
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
struct CachedText {
    text: String,
    inserted_at: Instant,
}

/// Bounded memo of generated text.
pub struct AiResponseCache {
    capacity: usize,
    timeout: Duration,
    entries: Cache<String, CachedText>,
    counters: Arc<Counters>,
}

impl AiResponseCache {
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        let counters = Arc::new(Counters::default());
        let on_evict = Arc::clone(&counters);
        let entries = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |_key, _value, cause| {
                if matches!(cause, RemovalCause::Size) {
                    Counters::bump(&on_evict.evictions);
                }
            })
            .build();
        Self {
            capacity,
            timeout,
            entries,
            counters,
        }
    }

    /// Return the cached text for `prompt`, generating it on a miss.
    ///
    /// Never fails: any generator error or timeout yields the prompt's
    /// fallback text, which is not cached.
    pub async fn get_or_generate(&self, prompt: &Prompt, generator: &dyn Generator) -> GeneratedText {
        if self.capacity == 0 {
            Counters::bump(&self.counters.misses);
            return match self.generate(prompt, generator).await {
                Ok(text) => GeneratedText {
                    text,
                    origin: TextOrigin::Generator,
                },
                Err(err) => self.fail(prompt, &err),
            };
        }

        // Set only by the caller whose init future actually ran.
        let generated_here = AtomicBool::new(false);
        let result = self
            .entries
            .try_get_with(prompt.key(), async {
                generated_here.store(true, Ordering::Relaxed);
                Counters::bump(&self.counters.misses);
                let text = self.generate(prompt, generator).await?;
                Ok::<_, BotError>(CachedText {
                    text,
                    inserted_at: Instant::now(),
                })
            })
            .await;
        let generated_here = generated_here.load(Ordering::Relaxed);

        match result {
            Ok(entry) if generated_here => {
                self.entries.run_pending_tasks().await;
                debug!("ai cache: stored {} entry", prompt.purpose);
                GeneratedText {
                    text: entry.text,
                    origin: TextOrigin::Generator,
                }
            }
            Ok(entry) => {
                Counters::bump(&self.counters.hits);
                GeneratedText {
                    text: entry.text,
                    origin: TextOrigin::Cache,
                }
            }
            Err(err) if generated_here => self.fail(prompt, &err),
            Err(err) => {
                debug!("ai cache: shared {} failure: {err}", prompt.purpose);
                GeneratedText {
                    text: prompt.fallback.clone(),
                    origin: TextOrigin::Fallback,
                }
            }
        }
    }

    fn fail(&self, prompt: &Prompt, err: &BotError) -> GeneratedText {
        Counters::bump(&self.counters.failures);
        match err {
            BotError::InvalidInput(_) => {
                warn!("ai cache: {} prompt rejected: {err}", prompt.purpose);
            }
            _ => error!("ai cache: {} generation failed: {err}", prompt.purpose),
        }
        GeneratedText {
            text: prompt.fallback.clone(),
            origin: TextOrigin::Fallback,
        }
    }

    async fn generate(&self, prompt: &Prompt, generator: &dyn Generator) -> crate::Result<String> {
        if prompt.text.trim().is_empty() {
            return Err(BotError::InvalidInput("prompt is empty".to_owned()));
        }
        let text = tokio::time::timeout(self.timeout, generator.generate(&prompt.text))
            .await
            .map_err(|_| {
                BotError::Timeout(format!("generation exceeded {}s", self.timeout.as_secs()))
            })??;
        let text = text.trim();
        if text.is_empty() {
            return Err(BotError::Transient("generator returned empty text".to_owned()));
        }
        Ok(text.to_owned())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn contains(&self, prompt: &Prompt) -> bool {
        self.entries.contains_key(&prompt.key())
    }

    /// Age of a cached entry. Counts as a use for eviction order.
    pub async fn age(&self, prompt: &Prompt) -> Option<Duration> {
        self.entries
            .get(&prompt.key())
            .await
            .map(|entry| entry.inserted_at.elapsed())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }
}
