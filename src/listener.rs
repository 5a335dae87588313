use log::*;
use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::common::{self, BroadcastId, Bus, Frame, Host};

mod responder;
pub use responder::*;

/// Buffer for inbound requests awaiting pickup by the consumer.
const REQUEST_BUFFER: usize = 64;

/// Active subscription to a request channel, yielding one
/// [`IncomingRequest`] per broadcast received.
///
/// Produced by [`Node::listen`]; a successful bind means the subscription is
/// live and broadcasts published afterwards will be observed.
///
/// [`Node::listen`]: crate::Node::listen
pub struct Listener<T, U> {
    name: String,
    rx: mpsc::Receiver<IncomingRequest<T, U>>,
    shutdown: mpsc::Sender<oneshot::Sender<io::Result<()>>>,
    task: JoinHandle<()>,
}

impl<T, U> Listener<T, U>
where
    T: DeserializeOwned + Send + 'static,
    U: Serialize + Send + 'static,
{
    pub(crate) async fn bind(bus: Arc<dyn Bus>, host: Host, name: &str) -> io::Result<Self> {
        let mut channel = bus.open(&common::request_channel(name)).await?;
        let mut frames = channel.subscribe().await?;
        debug!("Listening for broadcasts of {name}");

        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<oneshot::Sender<io::Result<()>>>(1);

        let name = name.to_string();
        let task = tokio::spawn({
            let name = name.clone();
            async move {
                loop {
                    tokio::select! {
                        cb = shutdown_rx.recv() => {
                            debug!("Listener for {name} got close signal, so exiting");
                            let result = channel.close().await;
                            if let Some(cb) = cb {
                                let _ = cb.send(result);
                            }
                            break;
                        }
                        maybe = frames.recv() => {
                            let bytes = match maybe {
                                Some(bytes) => bytes,
                                None => {
                                    warn!("Request channel for {name} dropped by the bus");
                                    let _ = channel.close().await;
                                    break;
                                }
                            };

                            let request = match Frame::<T>::from_slice(&bytes) {
                                Ok(Frame::Request { host: origin, broadcast_id, body }) => {
                                    match accept::<U>(&bus, &host, &name, &broadcast_id).await {
                                        Ok(responder) => IncomingRequest {
                                            origin,
                                            broadcast_id,
                                            body,
                                            responder,
                                        },
                                        Err(x) => {
                                            error!(
                                                "Failed to ack broadcast {broadcast_id} of {name}: {x}"
                                            );
                                            continue;
                                        }
                                    }
                                }
                                Ok(frame) => {
                                    debug!(
                                        "Ignoring {} frame on request channel for {name}",
                                        frame.label()
                                    );
                                    continue;
                                }
                                Err(x) => {
                                    trace!(
                                        "Ignoring undecodable frame on request channel for {name}: {x}"
                                    );
                                    continue;
                                }
                            };

                            if tx.send(request).await.is_err() {
                                debug!("Consumer of listener for {name} hung up, so exiting");
                                let _ = channel.close().await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            name,
            rx,
            shutdown: shutdown_tx,
            task,
        })
    }
}

impl<T, U> Listener<T, U> {
    /// Logical channel name this listener is bound to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Yields the next inbound broadcast, or `None` once the listener has
    /// been closed.
    pub async fn next(&mut self) -> Option<IncomingRequest<T, U>> {
        self.rx.recv().await
    }

    /// Unsubscribes from the request channel and stops the intake task,
    /// reporting the outcome of releasing the subscription.
    pub async fn close(&self) -> io::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shutdown.send(tx).await.map_err(|_| {
            io::Error::new(io::ErrorKind::NotConnected, "Listener already closed")
        })?;
        rx.await
            .map_err(|x| io::Error::new(io::ErrorKind::Other, x))?
    }

    /// Returns true once the intake task has terminated.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Kills the intake task without releasing the subscription cleanly.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Opens the conversation's reply channel and publishes the `ack` that
/// commits this host to the conversation. Any failure aborts the accept and
/// the broadcast is dropped without surfacing to the consumer.
async fn accept<U: Serialize>(
    bus: &Arc<dyn Bus>,
    host: &Host,
    name: &str,
    broadcast_id: &BroadcastId,
) -> io::Result<Responder<U>> {
    let mut reply = bus.open(&common::reply_channel(name, broadcast_id)).await?;

    let ack = Frame::<U>::Ack { host: host.clone() }.to_vec()?;
    if let Err(x) = reply.publish(ack).await {
        if let Err(close_err) = reply.close().await {
            warn!("Failed to release reply channel after failed ack: {close_err}");
        }
        return Err(x);
    }

    Ok(Responder::new(reply, host.clone()))
}

/// One broadcast surfaced to a listener's consumer, bundling the request
/// body with the per-request reply operations.
pub struct IncomingRequest<T, U> {
    /// Host that issued the broadcast.
    pub origin: Host,

    /// Conversation id the reply channel is bound to.
    pub broadcast_id: BroadcastId,

    /// Request body, forwarded verbatim.
    pub body: T,

    responder: Responder<U>,
}

impl<T, U> IncomingRequest<T, U>
where
    U: Serialize + Send + 'static,
{
    /// Streams one reply body back to the requester.
    pub async fn reply(&self, body: U) -> Result<(), ReplyError> {
        self.responder.reply(body).await
    }

    /// Signals completion of this host's response stream. No reply can
    /// follow.
    pub async fn end(&self) -> Result<(), ReplyError> {
        self.responder.end().await
    }
}

impl<T, U> IncomingRequest<T, U> {
    /// Clones the per-request reply handle for use outside the handler.
    pub fn responder(&self) -> Responder<U> {
        self.responder.clone()
    }
}
