#![doc = include_str!("../README.md")]

#[doc = include_str!("../README.md")]
#[cfg(doctest)]
pub struct ReadmeDoctests;

pub mod common;
pub mod listener;
pub mod requester;

mod node;

pub use common::{BroadcastId, Bus, BusChannel, Frame, Host, InmemoryBus, MemoryPresence, Presence};
pub use listener::{IncomingRequest, Listener, ReplyError, Responder};
pub use node::Node;
pub use requester::{
    Conversation, ConversationEvent, RequestError, RequestOptions, Responses,
};
pub use log;
