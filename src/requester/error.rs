use derive_more::{Display, Error};
use std::io;
use std::time::Duration;

/// Terminal failure of a broadcast conversation.
///
/// The timeout messages are load-bearing: other implementations of the
/// protocol key log tooling off the exact literals, including the historical
/// "with the idle timeout" phrasing, so they must not be reworded.
#[derive(Debug, Display, Error)]
pub enum RequestError {
    /// No inbound frame arrived within the connect window.
    #[display(
        fmt = "Did not receive a message within the connect timeout interval of {}ms",
        "_0.as_millis()"
    )]
    ConnectTimeout(#[error(not(source))] Duration),

    /// Inter-frame silence exceeded the idle window before any host was
    /// recorded as responding.
    #[display(
        fmt = "Did not receive a message with the idle timeout interval of {}ms",
        "_0.as_millis()"
    )]
    IdleTimeout(#[error(not(source))] Duration),

    /// Subscribing to the reply channel failed, or the subscription was
    /// dropped by the bus mid-conversation.
    #[display(fmt = "{}", _0)]
    Subscribe(io::Error),

    /// Publishing the request frame failed.
    #[display(fmt = "{}", _0)]
    Publish(io::Error),

    /// The conversation task stopped before yielding a terminal event.
    #[display(fmt = "Conversation interrupted before completion")]
    Interrupted,
}
