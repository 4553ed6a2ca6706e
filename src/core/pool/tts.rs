use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{BoxError, ResourceFactory, ResourceKind, ResourcePool};
use crate::core::tts::{BoxedTTS, TtsSettings, create_tts_provider};

/// Pool of TTS provider instances keyed by `provider[:voice]`.
pub type TtsPool = ResourcePool<BoxedTTS, TtsSettings>;

/// Builds TTS providers from validated settings.
///
/// The HTTP providers share one connection pool and hold no per-request
/// state, so an instance may serve several sessions at once.
#[derive(Debug, Default, Clone, Copy)]
pub struct TtsProviderFactory;

#[async_trait]
impl ResourceFactory<BoxedTTS, TtsSettings> for TtsProviderFactory {
    async fn create(&self, settings: &TtsSettings) -> Result<BoxedTTS, BoxError> {
        Ok(create_tts_provider(settings)?)
    }

    fn max_concurrent_leases(&self) -> Option<usize> {
        None
    }

    async fn destroy(&self, tts: &BoxedTTS) {
        if let Err(e) = tts.close().await {
            warn!(provider = tts.provider_name(), error = %e, "Failed to close TTS provider");
        }
    }
}

impl TtsPool {
    pub fn for_tts() -> Self {
        Self::new(ResourceKind::Tts, Arc::new(TtsProviderFactory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tts_pool_closes_on_invalidate() {
        let pool = TtsPool::for_tts();
        let settings =
            TtsSettings::from_provider_config("indextts_vllm", &json!({"voice": "v"})).unwrap();
        let key = settings.pool_key();

        let lease = pool.acquire(&key, &settings).await.unwrap();
        assert!(lease.is_valid());
        assert_eq!(lease.key().instance, "indextts_vllm:v");

        assert!(pool.invalidate(&key).await);
        assert!(!lease.is_valid());
        pool.release(lease);
    }
}
