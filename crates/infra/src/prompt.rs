//! Non-interactive answer to the sign-in fallback question

use async_trait::async_trait;
use credcache_core::FallbackPrompt;
use tracing::info;

/// Answers the "try the other sign-in flow?" question with a fixed value,
/// for hosts that have no UI to ask with.
#[derive(Debug, Clone, Copy)]
pub struct StaticFallbackPrompt {
    answer: bool,
}

impl StaticFallbackPrompt {
    pub fn new(answer: bool) -> Self {
        Self { answer }
    }
}

#[async_trait]
impl FallbackPrompt for StaticFallbackPrompt {
    async fn confirm_fallback(&self) -> bool {
        info!(accepted = self.answer, "sign-in fallback answered from configuration");
        self.answer
    }
}
