use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{self, BroadcastId, Bus, Host};

mod aggregator;
mod error;
mod event;

pub use error::*;
pub use event::*;

use aggregator::Aggregator;

/// Default wait before the first inbound frame.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default tolerated inter-frame silence once a first frame has arrived.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Buffer for conversation events awaiting pickup by the consumer.
const EVENT_BUFFER: usize = 256;

/// Options controlling a single broadcast conversation.
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// Hosts completion is awaited from. `None` snapshots the presence
    /// registry at request construction; later presence changes never
    /// affect a conversation already in flight.
    pub expect: Option<Vec<Host>>,

    /// Maximum wait before the first inbound frame.
    pub connect_timeout: Duration,

    /// Maximum wait between consecutive inbound frames.
    pub idle_timeout: Duration,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            expect: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Live broadcast conversation, yielding [`ConversationEvent`]s until the
/// single terminal event.
///
/// Produced by [`Node::request`]. The conversation runs on its own task; the
/// handle only receives, so dropping it does not disturb listeners already
/// streaming replies.
///
/// [`Node::request`]: crate::Node::request
pub struct Conversation<U> {
    id: BroadcastId,
    rx: mpsc::Receiver<ConversationEvent<U>>,
    task: JoinHandle<()>,
}

impl<U> Conversation<U>
where
    U: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub(crate) fn spawn<T>(
        bus: Arc<dyn Bus>,
        host: Host,
        name: &str,
        body: T,
        expect: Vec<Host>,
        connect_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self
    where
        T: Serialize + Send + 'static,
    {
        let id = common::random_id();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let aggregator = Aggregator::new(
            bus,
            host,
            name.to_string(),
            id.clone(),
            expect,
            connect_timeout,
            idle_timeout,
            tx,
        );
        let task = tokio::spawn(aggregator.run(body));

        Self { id, rx, task }
    }
}

impl<U> Conversation<U> {
    /// Identifier of this conversation, as stamped on the request frame.
    pub fn id(&self) -> &BroadcastId {
        &self.id
    }

    /// Yields the next event, or `None` after the terminal event has been
    /// consumed.
    pub async fn next(&mut self) -> Option<ConversationEvent<U>> {
        self.rx.recv().await
    }

    /// Drives the conversation to its terminal event, returning the
    /// accumulated responses together with the hosts still awaited at
    /// completion (empty unless a timeout cut the conversation short).
    pub async fn wait(mut self) -> Result<(Responses<U>, Vec<Host>), RequestError> {
        while let Some(event) = self.next().await {
            match event {
                ConversationEvent::End {
                    responses,
                    expecting,
                } => return Ok((responses, expecting)),
                ConversationEvent::Error { error, .. } => return Err(error),
                _ => continue,
            }
        }

        Err(RequestError::Interrupted)
    }

    /// Returns true once the conversation task has terminated.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Kills the conversation task without emitting a terminal event.
    pub fn abort(&self) {
        self.task.abort();
    }
}
