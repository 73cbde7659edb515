use async_trait::async_trait;
use std::sync::Arc;

use crate::message::Message;
use crate::Result;

/// Receives raw payloads delivered on a subscribed channel.
///
/// Handlers are invoked at least once per message, in no guaranteed order
/// across channels, and must tolerate redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]);
}

/// Publish/subscribe transport. Timeouts and retries belong to the
/// implementation; callers treat a failed send as a local error.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn send_raw(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()>;

    async fn send(&self, channel: &str, message: &Message) -> Result<()> {
        let payload = message.encode()?;
        self.send_raw(channel, payload).await
    }
}
