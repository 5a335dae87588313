use async_trait::async_trait;
use log::*;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Buffer used for each subscriber's inbound frame queue on the in-memory
/// bus.
const SUBSCRIBER_BUFFER: usize = 256;

/// Interface to a publish/subscribe substrate carrying opaque frame bytes.
///
/// Implementations decide transport, wire representation of the channel
/// namespace, and delivery semantics. The conversation layer assumes
/// at-most-once fan-out with no replay; duplicate delivery is not corrected
/// for.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Obtains a handle to the named channel.
    async fn open(&self, name: &str) -> io::Result<Box<dyn BusChannel>>;
}

/// Handle to one named channel of a [`Bus`].
#[async_trait]
pub trait BusChannel: Send + Sync {
    /// Name of the channel this handle is bound to.
    fn name(&self) -> &str;

    /// Begins receiving frames published to the channel, returning the
    /// inbound stream. Resolves once the subscription is active, meaning
    /// frames published afterwards will be observed.
    async fn subscribe(&mut self) -> io::Result<mpsc::Receiver<Vec<u8>>>;

    /// Publishes one frame to every current subscriber of the channel.
    async fn publish(&self, frame: Vec<u8>) -> io::Result<()>;

    /// Ceases receiving and releases the handle. Safe to invoke more than
    /// once.
    async fn close(&mut self) -> io::Result<()>;
}

type SubscriberId = u64;
type ChannelMap = HashMap<String, HashMap<SubscriberId, mpsc::Sender<Vec<u8>>>>;

/// In-memory [`Bus`] that fans each published frame out to every current
/// subscriber of its channel.
///
/// Reference substrate for tests and single-process embedding; delivery is
/// at-most-once and subscribers that fall behind beyond their buffer simply
/// delay the publisher.
pub struct InmemoryBus {
    channels: Arc<Mutex<ChannelMap>>,
    buffer: usize,
}

impl InmemoryBus {
    /// Creates a new bus whose subscribers queue up to `buffer` undelivered
    /// frames each.
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            buffer,
        }
    }
}

impl Default for InmemoryBus {
    fn default() -> Self {
        Self::new(SUBSCRIBER_BUFFER)
    }
}

#[async_trait]
impl Bus for InmemoryBus {
    async fn open(&self, name: &str) -> io::Result<Box<dyn BusChannel>> {
        Ok(Box::new(InmemoryChannel {
            name: name.to_string(),
            channels: Arc::clone(&self.channels),
            buffer: self.buffer,
            subscriber: None,
        }))
    }
}

struct InmemoryChannel {
    name: String,
    channels: Arc<Mutex<ChannelMap>>,
    buffer: usize,
    subscriber: Option<SubscriberId>,
}

#[async_trait]
impl BusChannel for InmemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&mut self) -> io::Result<mpsc::Receiver<Vec<u8>>> {
        if self.subscriber.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "Channel handle is already subscribed",
            ));
        }

        let id = rand::random();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.channels
            .lock()
            .await
            .entry(self.name.clone())
            .or_default()
            .insert(id, tx);
        self.subscriber = Some(id);
        Ok(rx)
    }

    async fn publish(&self, frame: Vec<u8>) -> io::Result<()> {
        // Snapshot the live senders so delivery happens outside the lock,
        // pruning any subscriber whose receiving half is gone.
        let targets: Vec<mpsc::Sender<Vec<u8>>> = {
            let mut lock = self.channels.lock().await;
            match lock.get_mut(&self.name) {
                Some(subscribers) => {
                    subscribers.retain(|_, tx| !tx.is_closed());
                    subscribers.values().cloned().collect()
                }
                None => Vec::new(),
            }
        };

        for tx in targets {
            if tx.send(frame.clone()).await.is_err() {
                trace!("Subscriber on {} hung up during delivery", self.name);
            }
        }

        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        if let Some(id) = self.subscriber.take() {
            let mut lock = self.channels.lock().await;
            let now_empty = match lock.get_mut(&self.name) {
                Some(subscribers) => {
                    subscribers.remove(&id);
                    subscribers.is_empty()
                }
                None => false,
            };
            if now_empty {
                lock.remove(&self.name);
            }
        }
        Ok(())
    }
}
