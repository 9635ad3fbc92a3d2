use super::{Connection, SendFn};
#[cfg(feature = "cross-thread-proxy")]
use super::{CallbackProxyFn, MessageProxyFn};

/// Builds a [`Connection`], accumulating a plain send callback instead
/// of binding to any particular transport.
#[derive(Default)]
pub struct ConnectionBuilder {
    forward_matches_to_bus: bool,
    #[cfg(feature = "cross-thread-proxy")]
    message_proxy: Option<MessageProxyFn>,
    #[cfg(feature = "cross-thread-proxy")]
    callback_proxy: Option<CallbackProxyFn>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `add_match` should, by default, also be forwarded to the
    /// bus daemon via `org.freedesktop.DBus.AddMatch`.
    pub fn forward_matches_to_bus(mut self, forward: bool) -> Self {
        self.forward_matches_to_bus = forward;
        self
    }

    /// Route match-callback invocations through `proxy` instead of running
    /// them inline during [`Connection::parse`]. `proxy` must run the call
    /// it is handed before returning, since `parse` is synchronous end to
    /// end and nothing else waits on the callback finishing later.
    #[cfg(feature = "cross-thread-proxy")]
    pub fn message_proxy<F>(mut self, proxy: F) -> Self
    where
        F: Fn(super::ProxiedCall) + Send + Sync + 'static,
    {
        self.message_proxy = Some(Box::new(proxy));
        self
    }

    /// Same contract as [`Self::message_proxy`], for reply callbacks.
    #[cfg(feature = "cross-thread-proxy")]
    pub fn callback_proxy<F>(mut self, proxy: F) -> Self
    where
        F: Fn(super::ProxiedCall) + Send + Sync + 'static,
    {
        self.callback_proxy = Some(Box::new(proxy));
        self
    }

    /// Build a connection whose only egress is `send`.
    pub fn build<F>(self, send: F) -> Connection
    where
        F: FnMut(&[u8]) -> std::io::Result<()> + 'static,
    {
        #[allow(unused_mut)]
        let mut connection = Connection::new(Box::new(send) as SendFn, self.forward_matches_to_bus);
        #[cfg(feature = "cross-thread-proxy")]
        connection.set_proxies(self.message_proxy, self.callback_proxy);
        connection
    }
}
