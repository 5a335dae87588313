use log::*;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::io;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::{ConversationEvent, RequestError, Responses};
use crate::common::{self, BroadcastId, Bus, BusChannel, Frame, Host};

/// Resolution of the timeout driver.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// State machine for one broadcast conversation, owned by the task spawned
/// per request. All mutation happens on that task, serialized between the
/// reply stream and the timeout tick.
pub(super) struct Aggregator<U> {
    bus: Arc<dyn Bus>,
    host: Host,
    name: String,
    id: BroadcastId,
    connect_timeout: Duration,
    idle_timeout: Duration,
    events: mpsc::Sender<ConversationEvent<U>>,

    responses: Responses<U>,
    expecting: HashSet<Host>,
    done: HashSet<Host>,
    last_message: Option<Instant>,
}

impl<U> Aggregator<U>
where
    U: DeserializeOwned + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        bus: Arc<dyn Bus>,
        host: Host,
        name: String,
        id: BroadcastId,
        expect: Vec<Host>,
        connect_timeout: Duration,
        idle_timeout: Duration,
        events: mpsc::Sender<ConversationEvent<U>>,
    ) -> Self {
        Self {
            bus,
            host,
            name,
            id,
            connect_timeout,
            idle_timeout,
            events,
            responses: Responses::new(),
            expecting: expect.into_iter().collect(),
            done: HashSet::new(),
            last_message: None,
        }
    }

    /// Drives the conversation to its single terminal event.
    pub(super) async fn run<T>(mut self, body: T)
    where
        T: Serialize + Send + 'static,
    {
        // With nobody to await there is nothing to publish either; the
        // conversation still completes through the event stream rather than
        // inline with the request call.
        if self.expecting.is_empty() {
            debug!("No hosts expected for broadcast of {}, completing", self.name);
            self.emit(ConversationEvent::End {
                responses: Responses::new(),
                expecting: Vec::new(),
            })
            .await;
            return;
        }

        // The rendezvous point for replies must be live before the request
        // goes out, otherwise early responders would be missed.
        let mut reply = match self
            .bus
            .open(&common::reply_channel(&self.name, &self.id))
            .await
        {
            Ok(x) => x,
            Err(x) => {
                self.fail(RequestError::Subscribe(x)).await;
                return;
            }
        };
        let mut frames = match reply.subscribe().await {
            Ok(x) => x,
            Err(x) => {
                if let Err(close_err) = reply.close().await {
                    warn!("Failed to release reply channel for {}: {close_err}", self.name);
                }
                self.fail(RequestError::Subscribe(x)).await;
                return;
            }
        };

        let start = Instant::now();
        let mut tick = time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if let Err(x) = self.publish_request(body).await {
            self.tear_down(&mut reply).await;
            self.fail(RequestError::Publish(x)).await;
            return;
        }

        loop {
            tokio::select! {
                maybe = frames.recv() => match maybe {
                    Some(bytes) => {
                        if let Some(terminal) = self.process(bytes).await {
                            self.tear_down(&mut reply).await;
                            self.emit(terminal).await;
                            break;
                        }
                    }
                    None => {
                        warn!("Reply channel for broadcast {} dropped by the bus", self.id);
                        self.tear_down(&mut reply).await;
                        let error = RequestError::Subscribe(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "Reply subscription dropped by the bus",
                        ));
                        self.fail(error).await;
                        break;
                    }
                },
                _ = tick.tick() => {
                    if let Some(terminal) = self.check_timeouts(start) {
                        self.tear_down(&mut reply).await;
                        self.emit(terminal).await;
                        break;
                    }
                }
            }
        }
    }

    /// Applies one inbound frame, emitting any non-terminal events and
    /// returning the terminal event once every awaited host has ended.
    async fn process(&mut self, bytes: Vec<u8>) -> Option<ConversationEvent<U>> {
        let frame = match Frame::<U>::from_slice(&bytes) {
            Ok(x) => x,
            Err(x) => {
                trace!(
                    "Ignoring undecodable frame on reply channel for broadcast {}: {x}",
                    self.id
                );
                return None;
            }
        };

        let now = Instant::now();

        match frame {
            Frame::Request { broadcast_id, .. } => {
                debug!(
                    "Ignoring request frame {broadcast_id} on reply channel for broadcast {}",
                    self.id
                );
                None
            }
            Frame::Ack { host } => {
                self.last_message = Some(now);
                if self.done.contains(&host) {
                    trace!("Ignoring ack from {host} after its end");
                    return None;
                }

                self.expecting.insert(host.clone());
                self.responses.entry(host.clone()).or_default();
                self.emit(ConversationEvent::Ack { host }).await;
                None
            }
            Frame::Data { host, body } => {
                self.last_message = Some(now);
                if self.done.contains(&host) {
                    trace!("Ignoring data from {host} after its end");
                    return None;
                }

                self.responses
                    .entry(host.clone())
                    .or_default()
                    .push(body.clone());
                self.expecting.insert(host.clone());
                self.emit(ConversationEvent::Data { host, body }).await;
                None
            }
            Frame::End { host } => {
                self.last_message = Some(now);
                if !self.done.insert(host.clone()) {
                    trace!("Ignoring duplicate end from {host}");
                    return None;
                }

                self.expecting.remove(&host);
                let responses = self.responses.get(&host).cloned().unwrap_or_default();
                self.emit(ConversationEvent::HostEnd { host, responses }).await;

                if self.expecting.is_empty() {
                    return Some(ConversationEvent::End {
                        responses: mem::take(&mut self.responses),
                        expecting: Vec::new(),
                    });
                }
                None
            }
        }
    }

    /// Evaluates the two timeout regimes against monotonic time, returning
    /// the terminal event when one has elapsed.
    fn check_timeouts(&mut self, start: Instant) -> Option<ConversationEvent<U>> {
        let now = Instant::now();
        let error = match self.last_message {
            None if now.duration_since(start) > self.connect_timeout => {
                RequestError::ConnectTimeout(self.connect_timeout)
            }
            Some(last) if now.duration_since(last) > self.idle_timeout => {
                RequestError::IdleTimeout(self.idle_timeout)
            }
            _ => return None,
        };

        // Whether anything was heard decides end vs error; which timeout
        // fired only decides the message.
        let expecting = self.expecting_sorted();
        if self.responses.is_empty() {
            debug!("Broadcast {} timed out with no responses: {error}", self.id);
            Some(ConversationEvent::Error { error, expecting })
        } else {
            debug!("Broadcast {} timed out still awaiting {expecting:?}", self.id);
            Some(ConversationEvent::End {
                responses: mem::take(&mut self.responses),
                expecting,
            })
        }
    }

    /// Publishes the request frame on the shared request channel, releasing
    /// the publish handle immediately afterwards.
    async fn publish_request<T: Serialize>(&self, body: T) -> io::Result<()> {
        let frame = Frame::Request {
            host: self.host.clone(),
            broadcast_id: self.id.clone(),
            body,
        }
        .to_vec()?;

        let mut channel = self.bus.open(&common::request_channel(&self.name)).await?;
        let outcome = channel.publish(frame).await;
        if let Err(x) = channel.close().await {
            warn!("Failed to release request channel for {}: {x}", self.name);
        }
        outcome
    }

    /// Stops frame intake so nothing can drive further state changes before
    /// the terminal event goes out. The run loop invokes this exactly once
    /// and exits right after emitting, which is what makes teardown
    /// idempotent from the outside.
    async fn tear_down(&mut self, reply: &mut Box<dyn BusChannel>) {
        if let Err(x) = reply.close().await {
            warn!("Failed to release reply channel for broadcast {}: {x}", self.id);
        }
    }

    /// Emits the terminal error carrying whichever hosts are still awaited.
    async fn fail(&mut self, error: RequestError) {
        let expecting = self.expecting_sorted();
        self.emit(ConversationEvent::Error { error, expecting }).await;
    }

    async fn emit(&self, event: ConversationEvent<U>) {
        if self.events.send(event).await.is_err() {
            trace!("Consumer of broadcast {} hung up", self.id);
        }
    }

    fn expecting_sorted(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.expecting.iter().cloned().collect();
        hosts.sort();
        hosts
    }
}
