use async_trait::async_trait;
use metahost_core::{CoreError, Message, MessageBus, MessageHandler, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

/// A payload as it was handed to [`InMemoryBus::send_raw`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl SentMessage {
    pub fn decode(&self) -> Option<Message> {
        Message::decode(&self.payload).ok()
    }
}

/// In-process publish/subscribe bus.
///
/// Every subscription owns an unbounded queue drained by its own task, so a
/// send never waits on a handler and each subscriber sees its channel in
/// publish order. Messages sent to a channel nobody subscribes to are lost,
/// as with a real broker without durable queues.
///
/// A bus built with [`InMemoryBus::new`] keeps no history. Use
/// [`InMemoryBus::recording`] to retain every sent payload for inspection.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>>,
    sent: Option<Arc<Mutex<Vec<SentMessage>>>>,
    in_flight: Arc<InFlight>,
    unavailable: Arc<AtomicBool>,
}

/// Deliveries queued or being handled, with a wakeup for `settle`.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn is_idle(&self) -> bool {
        self.count.load(Ordering::SeqCst) == 0
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bus that keeps a copy of every message sent through it.
    pub fn recording() -> Self {
        Self {
            sent: Some(Arc::default()),
            ..Self::default()
        }
    }

    /// Every message sent so far, across all channels. Always empty on a
    /// bus that is not recording.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .as_ref()
            .and_then(|sent| sent.lock().ok().map(|s| s.clone()))
            .unwrap_or_default()
    }

    /// Decoded messages sent on `channel`.
    pub fn sent_on(&self, channel: &str) -> Vec<Message> {
        self.sent()
            .iter()
            .filter(|m| m.channel == channel)
            .filter_map(SentMessage::decode)
            .collect()
    }

    pub fn clear_sent(&self) {
        if let Some(Ok(mut sent)) = self.sent.as_ref().map(|sent| sent.lock()) {
            sent.clear();
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .read()
            .map(|s| s.get(channel).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make every following send fail with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Wait until every delivered message has been handled, including the
    /// messages those handlers sent in turn.
    pub async fn settle(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.in_flight.is_idle() {
                return;
            }
            idle.await;
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn send_raw(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CoreError::Transport(format!(
                "bus unavailable, cannot send on '{channel}'"
            )));
        }

        if let Some(sent) = &self.sent {
            sent.lock()
                .map_err(|_| CoreError::Transport("Bus lock poisoned".to_string()))?
                .push(SentMessage {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                });
        }

        let subscribers = self
            .subscribers
            .read()
            .map_err(|_| CoreError::Transport("Bus lock poisoned".to_string()))?;
        let Some(queues) = subscribers.get(channel) else {
            debug!(channel, "No subscribers, message dropped");
            return Ok(());
        };

        for queue in queues {
            self.in_flight.start();
            if queue.send(payload.clone()).is_err() {
                self.in_flight.finish();
                warn!(channel, "Subscriber queue closed, message dropped");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let in_flight = Arc::clone(&self.in_flight);
        let name = channel.to_string();

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                // one task per delivery so a panicking handler cannot stop the drain
                let handler = Arc::clone(&handler);
                let delivery = tokio::spawn(async move { handler.handle(&payload).await });
                if let Err(error) = delivery.await {
                    error!(channel = %name, error = %error, "Message handler failed");
                }
                in_flight.finish();
            }
        });

        self.subscribers
            .write()
            .map_err(|_| CoreError::Transport("Bus lock poisoned".to_string()))?
            .entry(channel.to_string())
            .or_default()
            .push(tx);

        debug!(channel, "Subscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use metahost_core::{Instance, INFO_CHANNEL};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, payload: &[u8]) {
            self.seen.lock().unwrap().push(payload.to_vec());
        }
    }

    fn info(id: &str) -> Message {
        Message::instance_info(Instance::new(id, "web", Utc::now()))
    }

    #[tokio::test]
    async fn test_delivers_to_every_subscriber_in_order() {
        let bus = InMemoryBus::recording();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        bus.subscribe(INFO_CHANNEL, first.clone()).await.unwrap();
        bus.subscribe(INFO_CHANNEL, second.clone()).await.unwrap();

        for id in ["a", "b", "c"] {
            assert_ok!(bus.send(INFO_CHANNEL, &info(id)).await);
        }
        bus.settle().await;

        for recorder in [first, second] {
            let ids: Vec<String> = recorder
                .seen
                .lock()
                .unwrap()
                .iter()
                .map(|p| match Message::decode(p).unwrap() {
                    Message::InstanceInfo { instance } => instance.id,
                    other => panic!("unexpected {other:?}"),
                })
                .collect();
            assert_eq!(ids, vec!["a", "b", "c"]);
        }
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let bus = InMemoryBus::recording();
        let web = Arc::new(Recorder::default());
        bus.subscribe("web", web.clone()).await.unwrap();

        bus.send("db", &info("x")).await.unwrap();
        bus.settle().await;

        assert!(web.seen.lock().unwrap().is_empty());
        assert_eq!(bus.sent_on("db").len(), 1);
        assert_eq!(bus.subscriber_count("web"), 1);
        assert_eq!(bus.subscriber_count("db"), 0);
    }

    #[tokio::test]
    async fn test_unavailable_bus_reports_transport_error() {
        let bus = InMemoryBus::recording();
        bus.set_unavailable(true);

        let result = bus.send(INFO_CHANNEL, &info("a")).await;
        assert!(matches!(assert_err!(result), CoreError::Transport(_)));
        assert!(bus.sent().is_empty());

        bus.set_unavailable(false);
        assert_ok!(bus.send(INFO_CHANNEL, &info("a")).await);
        assert_eq!(bus.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_sent() {
        let bus = InMemoryBus::recording();
        bus.send("web", &info("a")).await.unwrap();
        bus.clear_sent();
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn test_default_bus_keeps_no_history() {
        let bus = InMemoryBus::new();
        let web = Arc::new(Recorder::default());
        bus.subscribe("web", web.clone()).await.unwrap();

        for id in ["a", "b", "c"] {
            bus.send("web", &info(id)).await.unwrap();
        }
        bus.settle().await;

        assert_eq!(web.seen.lock().unwrap().len(), 3);
        assert!(bus.sent().is_empty());
        assert!(bus.sent_on("web").is_empty());
    }

    struct Panicky {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for Panicky {
        async fn handle(&self, _payload: &[u8]) {
            if self.handled.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("handler blew up");
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stall_delivery() {
        let bus = InMemoryBus::new();
        let handler = Arc::new(Panicky {
            handled: AtomicUsize::new(0),
        });
        bus.subscribe("web", handler.clone()).await.unwrap();

        bus.send("web", &info("a")).await.unwrap();
        bus.send("web", &info("b")).await.unwrap();

        assert_ok!(tokio::time::timeout(Duration::from_secs(5), bus.settle()).await);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_settle_on_idle_bus_returns_at_once() {
        let bus = InMemoryBus::new();
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), bus.settle()).await);
    }
}
