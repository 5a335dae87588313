use serde::{de::DeserializeOwned, Serialize};
use std::io;
use std::sync::Arc;

use crate::common::{Bus, Host, Presence};
use crate::listener::Listener;
use crate::requester::{Conversation, RequestOptions};

/// Entry point for participating in broadcast conversations over a shared
/// bus.
///
/// A node plays both roles: [`listen`] binds a handler for inbound
/// broadcasts of a name, [`request`] issues a broadcast and aggregates the
/// per-host replies. The hostname supplied at construction is stamped on
/// every outgoing frame and must stay stable for the process lifetime.
///
/// [`listen`]: Node::listen
/// [`request`]: Node::request
pub struct Node {
    bus: Arc<dyn Bus>,
    presence: Arc<dyn Presence>,
    host: Host,
}

impl Node {
    pub fn new(bus: Arc<dyn Bus>, presence: Arc<dyn Presence>, host: impl Into<Host>) -> Self {
        Self {
            bus,
            presence,
            host: host.into(),
        }
    }

    /// Hostname stamped on this node's frames.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Subscribes to broadcasts of `name`, resolving once the subscription
    /// is active. `T` is the request body type, `U` the reply body type.
    pub async fn listen<T, U>(&self, name: &str) -> io::Result<Listener<T, U>>
    where
        T: DeserializeOwned + Send + 'static,
        U: Serialize + Send + 'static,
    {
        Listener::bind(Arc::clone(&self.bus), self.host.clone(), name).await
    }

    /// Issues a broadcast of `body` to every listener of `name` and returns
    /// the conversation aggregating their replies.
    ///
    /// When `options.expect` is `None` the presence registry is snapshotted
    /// here, before the conversation task starts. With an empty expected
    /// set the conversation completes through its event stream without ever
    /// touching the bus.
    pub fn request<T, U>(&self, name: &str, body: T, options: RequestOptions) -> Conversation<U>
    where
        T: Serialize + Send + 'static,
        U: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let RequestOptions {
            expect,
            connect_timeout,
            idle_timeout,
        } = options;
        let expect = expect.unwrap_or_else(|| self.presence.hosts());

        Conversation::spawn(
            Arc::clone(&self.bus),
            self.host.clone(),
            name,
            body,
            expect,
            connect_timeout,
            idle_timeout,
        )
    }
}
