use derive_more::{Display, Error};
use log::*;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::common::{BusChannel, Frame, Host};

/// Error produced by [`Responder`] operations.
#[derive(Debug, Display, Error)]
pub enum ReplyError {
    /// Reply or end attempted after the response stream already ended.
    #[display(fmt = "Response stream already ended")]
    AfterEnd,

    /// Underlying bus failure while encoding, publishing, or closing.
    #[display(fmt = "{}", _0)]
    Transport(io::Error),
}

impl From<io::Error> for ReplyError {
    fn from(x: io::Error) -> Self {
        Self::Transport(x)
    }
}

/// Per-request handle publishing a listener's replies for one conversation.
///
/// Clones share the terminal flag and the underlying reply channel, so once
/// any clone ends the stream every other clone refuses further replies.
pub struct Responder<U> {
    inner: Arc<Inner>,
    _body: PhantomData<U>,
}

struct Inner {
    host: Host,
    closed: AtomicBool,
    channel: Mutex<Option<Box<dyn BusChannel>>>,
}

// NOTE: Implemented manually to avoid requiring clone on the body type
impl<U> Clone for Responder<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _body: PhantomData,
        }
    }
}

impl<U> Responder<U> {
    pub(crate) fn new(channel: Box<dyn BusChannel>, host: Host) -> Self {
        Self {
            inner: Arc::new(Inner {
                host,
                closed: AtomicBool::new(false),
                channel: Mutex::new(Some(channel)),
            }),
            _body: PhantomData,
        }
    }

    /// Returns true once the response stream has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl<U> Responder<U>
where
    U: Serialize,
{
    /// Publishes one `data` frame carrying `body`, failing without
    /// publishing if the stream already ended.
    pub async fn reply(&self, body: U) -> Result<(), ReplyError> {
        if self.is_closed() {
            error!("Reply attempted after end of response stream");
            return Err(ReplyError::AfterEnd);
        }

        let frame = Frame::Data {
            host: self.inner.host.clone(),
            body,
        }
        .to_vec()?;

        let lock = self.inner.channel.lock().await;
        match lock.as_ref() {
            Some(channel) => Ok(channel.publish(frame).await?),
            None => {
                error!("Reply attempted after end of response stream");
                Err(ReplyError::AfterEnd)
            }
        }
    }

    /// Publishes the `end` frame and releases the reply channel.
    ///
    /// The terminal flag is set before anything is published so a racing
    /// [`reply`] on a clone of this handle observes the end. Publish and
    /// close failures are logged as warnings; the first encountered is
    /// returned.
    ///
    /// [`reply`]: Responder::reply
    pub async fn end(&self) -> Result<(), ReplyError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            error!("End attempted after end of response stream");
            return Err(ReplyError::AfterEnd);
        }

        let mut lock = self.inner.channel.lock().await;
        let mut channel = match lock.take() {
            Some(x) => x,
            None => return Err(ReplyError::AfterEnd),
        };

        let mut first_failure = None;

        match (Frame::<U>::End {
            host: self.inner.host.clone(),
        })
        .to_vec()
        {
            Ok(frame) => {
                if let Err(x) = channel.publish(frame).await {
                    warn!("Failed to publish end of response stream: {x}");
                    first_failure = Some(x);
                }
            }
            Err(x) => {
                warn!("Failed to encode end of response stream: {x}");
                first_failure = Some(x);
            }
        }

        if let Err(x) = channel.close().await {
            warn!("Failed to release reply channel: {x}");
            first_failure.get_or_insert(x);
        }

        match first_failure {
            Some(x) => Err(ReplyError::Transport(x)),
            None => Ok(()),
        }
    }
}
