use std::collections::HashMap;

use super::RequestError;
use crate::common::Host;

/// Replies accumulated by a conversation, keyed by host.
///
/// A host appears in the map iff it acked the broadcast or delivered data;
/// per-host arrival order of bodies is preserved.
pub type Responses<U> = HashMap<Host, Vec<U>>;

/// One observation on a broadcast conversation.
///
/// Per host, events follow the order ack, data (zero or more), host end.
/// Exactly one of the terminal [`End`] or [`Error`] variants is yielded per
/// conversation, always last.
///
/// [`End`]: ConversationEvent::End
/// [`Error`]: ConversationEvent::Error
#[derive(Debug)]
pub enum ConversationEvent<U> {
    /// A host acknowledged the broadcast and is now awaited, whether or not
    /// it was originally expected.
    Ack { host: Host },

    /// A host streamed one reply body.
    Data { host: Host, body: U },

    /// A host signalled completion; carries every body it delivered, in
    /// order.
    HostEnd { host: Host, responses: Vec<U> },

    /// Terminal: the conversation finished. `expecting` is empty on normal
    /// completion and lists the hosts still awaited when a timeout cut the
    /// conversation short after at least one host responded.
    End {
        responses: Responses<U>,
        expecting: Vec<Host>,
    },

    /// Terminal: the conversation failed before any host responded, or the
    /// bus failed during setup.
    Error {
        error: RequestError,
        expecting: Vec<Host>,
    },
}

impl<U> ConversationEvent<U> {
    /// Returns true for the [`End`] and [`Error`] variants.
    ///
    /// [`End`]: ConversationEvent::End
    /// [`Error`]: ConversationEvent::Error
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}
