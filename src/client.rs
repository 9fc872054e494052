//! Public client surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::callbacks::Callbacks;
use crate::error::{ClientError, DecodeError};
use crate::frame;
use crate::session::Session;
use crate::xmlrpc::{self, Value};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5000;

/// Behavior knobs, mirroring the dedicated-server client conventions.
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Log suppressed faults and undecodable server callbacks.
    pub show_errors: bool,
    /// Surface faults as errors. When off, a faulted call resolves to the
    /// "not available" sentinel instead.
    pub throw_errors: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            show_errors: false,
            throw_errors: true,
        }
    }
}

/// One entry of a [`Client::multicall`] batch.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Handle to one GBXRemote session. Cheap to clone; every clone shares the
/// same socket, handle counter and pending table.
#[derive(Clone)]
pub struct Client {
    host: String,
    port: u16,
    session: Arc<Session>,
}

/// Sentinel resolved by `call` when the session is unavailable or a fault
/// is suppressed.
fn unavailable() -> Value {
    Value::Bool(false)
}

impl Client {
    pub fn new(host: impl Into<String>, port: u16, callbacks: Arc<dyn Callbacks>) -> Self {
        Self::with_options(host, port, callbacks, ClientOptions::default())
    }

    /// Client for a dedicated server on the default local endpoint,
    /// `127.0.0.1:5000`.
    pub fn local(callbacks: Arc<dyn Callbacks>) -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, callbacks)
    }

    pub fn with_options(
        host: impl Into<String>,
        port: u16,
        callbacks: Arc<dyn Callbacks>,
        options: ClientOptions,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            session: Arc::new(Session::new(callbacks, options)),
        }
    }

    /// Connect and perform the protocol handshake.
    ///
    /// Resolves `Ok(true)` once the server presented the `GBXRemote 2`
    /// banner, `Ok(false)` if it presented anything else (the host receives
    /// `on_disconnect("GBXRemote 2 protocol not supported")` first), and
    /// `Err` on socket-level failure.
    pub async fn connect(&self) -> Result<bool, ClientError> {
        self.session.clone().connect(&self.host, self.port).await
    }

    /// Close the connection. Outstanding calls fail with
    /// [`ClientError::Disconnected`] and the host receives
    /// `on_disconnect("disconnect")`.
    pub async fn disconnect(&self) {
        self.session.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Invoke `method` on the server and await its result.
    ///
    /// When the session is not connected this performs no I/O and resolves
    /// to the unavailable sentinel. Faults follow
    /// [`ClientOptions::throw_errors`].
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        if !self.session.is_connected() {
            return Ok(unavailable());
        }
        match self.call_raw(method, &params).await {
            Ok(value) => Ok(value),
            Err(e @ (ClientError::Fault(_) | ClientError::Encode(_))) => self.suppress(e),
            Err(e) => Err(e),
        }
    }

    /// Invoke `method` without waiting for the result.
    ///
    /// A request handle is still minted so the wire stays well-formed, but
    /// no waiter is registered: whatever the server answers under that
    /// handle is discarded, faults included.
    pub async fn send(&self, method: &str, params: Vec<Value>) -> Result<(), ClientError> {
        if !self.session.is_connected() {
            return Ok(());
        }
        let body = match xmlrpc::serialize_method_call(method, &params) {
            Ok(body) => body,
            Err(e) => return self.suppress(ClientError::Encode(e)).map(|_| ()),
        };
        frame::check_request_size(body.len())?;
        let handle = self.session.register_no_reply();
        let request = frame::encode_request(handle, &body)?;
        tracing::debug!(method, handle, "fire-and-forget send");
        self.session.write_frame(&request).await
    }

    /// Package several calls into one `system.multicall` round trip.
    ///
    /// Returns one value per input call, in order. A sub-call that faulted
    /// is returned inline in its slot as the fault struct; it never fails
    /// the batch.
    pub async fn multicall(&self, calls: Vec<MethodCall>) -> Result<Vec<Value>, ClientError> {
        if !self.session.is_connected() {
            return Ok(Vec::new());
        }
        let entries: Vec<Value> = calls
            .into_iter()
            .map(|call| {
                let mut members = BTreeMap::new();
                members.insert("methodName".to_string(), Value::String(call.method));
                members.insert("params".to_string(), Value::Array(call.params));
                Value::Struct(members)
            })
            .collect();
        let batch = match self
            .call_raw("system.multicall", &[Value::Array(entries)])
            .await
        {
            Ok(value) => value,
            Err(e @ (ClientError::Fault(_) | ClientError::Encode(_))) => {
                return self.suppress(e).map(|_| Vec::new());
            }
            Err(e) => return Err(e),
        };
        let slots = match batch {
            Value::Array(slots) => slots,
            other => {
                return Err(ClientError::Decode(DecodeError::Unexpected {
                    expected: "a multicall result array".to_string(),
                    found: format!("{other:?}"),
                }));
            }
        };
        Ok(slots.into_iter().map(unwrap_slot).collect())
    }

    /// Forward an event to the current mode script:
    /// `TriggerModeScriptEventArray(event, params)`.
    pub async fn call_script(&self, event: &str, params: Vec<Value>) -> Result<Value, ClientError> {
        self.call(
            "TriggerModeScriptEventArray",
            vec![Value::from(event), Value::Array(params)],
        )
        .await
    }

    /// Shared issue path: serialize, guard the size, register the waiter,
    /// write, await. The size guard runs before a handle is minted, so a
    /// rejected request leaves the counter untouched.
    async fn call_raw(&self, method: &str, params: &[Value]) -> Result<Value, ClientError> {
        let body = xmlrpc::serialize_method_call(method, params)?;
        frame::check_request_size(body.len())?;
        let (handle, rx) = match self.session.register_call() {
            Ok(registered) => registered,
            Err(e) => {
                // The wrapped counter landed on a live waiter. Closing the
                // session is the only outcome that cannot misdeliver.
                self.session.teardown("request handle collision").await;
                return Err(e);
            }
        };
        let request = frame::encode_request(handle, &body)?;
        tracing::debug!(method, handle, len = request.len(), "issuing call");
        self.session.write_frame(&request).await?;
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Disconnected("connection closed".into())),
        }
    }

    fn suppress(&self, error: ClientError) -> Result<Value, ClientError> {
        if self.session.options.throw_errors {
            return Err(error);
        }
        if self.session.options.show_errors {
            tracing::warn!(error = %error, "call failed; resolving to the unavailable sentinel");
        }
        Ok(unavailable())
    }
}

fn unwrap_slot(slot: Value) -> Value {
    match slot {
        // Successful sub-calls arrive as a one-element array.
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        // Fault structs (and anything else) stay as-is.
        other => other,
    }
}
