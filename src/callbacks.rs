//! Host notification interface.

use crate::xmlrpc::Value;

/// Notifications delivered by the session to its host.
///
/// Both methods are invoked from the session's reader task and delivered at
/// most once per event; the session never buffers or retries them. Hosts
/// that need to do slow work should hand the event off to their own task.
pub trait Callbacks: Send + Sync {
    /// The session left the connected state. `reason` is `"disconnect"` for
    /// a local [`crate::Client::disconnect`], `"end"` when the server closed
    /// the stream, the protocol-mismatch message on a bad handshake, or the
    /// socket error text.
    fn on_disconnect(&self, reason: &str) {
        let _ = reason;
    }

    /// A server-initiated call (e.g. `PlayerConnect`) arrived.
    fn on_callback(&self, method: &str, params: Vec<Value>) {
        let _ = (method, params);
    }
}

/// Host that ignores every notification.
pub struct NoopCallbacks;

impl Callbacks for NoopCallbacks {}
