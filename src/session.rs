//! Session internals: connection state, the reader task, demux, teardown.
//!
//! One task owns the read half of the socket. It feeds bytes to the
//! [`FrameDecoder`] and routes every complete message: the handshake banner
//! resolves the connect waiter, replies complete the matching entry in the
//! pending table, and server-initiated calls go to the host. No other code
//! reads from the socket.
//!
//! The parking_lot locks here guard plain state and are never held across
//! an await; only the writer lock is asynchronous, because a frame write
//! must finish before the next one starts.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::callbacks::Callbacks;
use crate::client::ClientOptions;
use crate::decoder::{Decoded, FrameDecoder};
use crate::error::ClientError;
use crate::pending::{CallOutcome, PendingCalls};
use crate::xmlrpc;

/// Banner the server must present during the handshake.
pub const HANDSHAKE_BANNER: &[u8] = b"GBXRemote 2";

/// Disconnect reason reported when the handshake banner does not match.
pub const PROTOCOL_MISMATCH: &str = "GBXRemote 2 protocol not supported";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub(crate) struct Session {
    pub(crate) options: ClientOptions,
    callbacks: Arc<dyn Callbacks>,
    state: Mutex<ConnectionState>,
    pending: Mutex<PendingCalls>,
    /// Write half of the socket; present exactly while a connection exists.
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    /// Completed by the reader task when the handshake resolves.
    connect_tx: Mutex<Option<oneshot::Sender<Result<bool, ClientError>>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(callbacks: Arc<dyn Callbacks>, options: ClientOptions) -> Self {
        Self {
            options,
            callbacks,
            state: Mutex::new(ConnectionState::Disconnected),
            pending: Mutex::new(PendingCalls::new()),
            writer: AsyncMutex::new(None),
            connect_tx: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        *self.state.lock() == ConnectionState::Connected
    }

    /// Open the socket, spawn the reader and await the handshake.
    ///
    /// `Ok(true)` means the server presented the expected banner; `Ok(false)`
    /// means it presented something else (the host has already been told).
    /// Socket-level failures surface as `Err`.
    pub(crate) async fn connect(self: Arc<Self>, host: &str, port: u16) -> Result<bool, ClientError> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }
        let (tx, rx) = oneshot::channel();
        *self.connect_tx.lock() = Some(tx);

        let stream = match open_socket(host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                *self.state.lock() = ConnectionState::Disconnected;
                self.connect_tx.lock().take();
                self.callbacks.on_disconnect(&e.to_string());
                return Err(ClientError::Io(e));
            }
        };
        tracing::debug!(host, port, "socket open; awaiting handshake");

        let (read, write) = stream.into_split();
        *self.writer.lock().await = Some(write);
        let task = tokio::spawn(run_reader(self.clone(), read));
        *self.reader.lock() = Some(task);

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Disconnected("connection closed".into())),
        }
    }

    /// Destroy the socket and notify the host with reason `"disconnect"`.
    pub(crate) async fn disconnect(&self) {
        let task = self.reader.lock().take();
        self.teardown("disconnect").await;
        // Stop the reader only after teardown has fully run; aborting first
        // could cancel a competing teardown between its await points.
        if let Some(task) = task {
            task.abort();
        }
    }

    pub(crate) fn register_call(
        &self,
    ) -> Result<(u32, oneshot::Receiver<CallOutcome>), ClientError> {
        self.pending.lock().register()
    }

    pub(crate) fn register_no_reply(&self) -> u32 {
        self.pending.lock().register_no_reply()
    }

    /// Write one framed request. Socket failure tears the session down.
    pub(crate) async fn write_frame(&self, frame: &[u8]) -> Result<(), ClientError> {
        let mut guard = self.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) => writer,
            None => return Err(ClientError::NotConnected),
        };
        let result = async {
            writer.write_all(frame).await?;
            writer.flush().await
        }
        .await;
        drop(guard);
        if let Err(e) = result {
            let reason = e.to_string();
            self.teardown(&reason).await;
            return Err(ClientError::Io(e));
        }
        Ok(())
    }

    /// Single-shot exit from the connected (or connecting) state.
    ///
    /// Drops the socket, fails a still-pending connect waiter, fails every
    /// outstanding call waiter with [`ClientError::Disconnected`], and
    /// notifies the host exactly once.
    pub(crate) async fn teardown(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        if let Some(tx) = self.connect_tx.lock().take() {
            let _ = tx.send(Err(ClientError::Disconnected(reason.to_string())));
        }
        *self.writer.lock().await = None;
        let waiters = self.pending.lock().drain();
        for tx in waiters {
            let _ = tx.send(Err(ClientError::Disconnected(reason.to_string())));
        }
        // Detach the reader handle; the task exits on its own once the
        // socket is gone. Never abort here: teardown runs on that task.
        self.reader.lock().take();
        tracing::debug!(reason, "session closed");
        self.callbacks.on_disconnect(reason);
    }

    /// Handshake banner arrived. Returns whether the reader should go on.
    async fn finish_handshake(&self, payload: &[u8]) -> bool {
        if payload == HANDSHAKE_BANNER {
            *self.state.lock() = ConnectionState::Connected;
            if let Some(tx) = self.connect_tx.lock().take() {
                let _ = tx.send(Ok(true));
            }
            tracing::debug!("handshake complete");
            return true;
        }
        tracing::warn!(
            banner = %String::from_utf8_lossy(payload),
            "unexpected handshake banner"
        );
        // Resolve the connect waiter to false, then tear down; the waiter
        // must not see the generic disconnect error for this case.
        let waiter = self.connect_tx.lock().take();
        if let Some(tx) = waiter {
            let _ = tx.send(Ok(false));
        }
        self.teardown(PROTOCOL_MISMATCH).await;
        false
    }

    /// A response frame arrived: decode and complete the matching waiter.
    /// A response nobody is waiting for is discarded.
    fn route_reply(&self, handle: u32, body: &[u8]) {
        let outcome: CallOutcome = match xmlrpc::parse_method_response(body) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(fault)) => Err(ClientError::Fault(fault)),
            // The waiter must still resolve, or its caller hangs.
            Err(e) => Err(ClientError::Decode(e)),
        };
        if !self.pending.lock().complete(handle, outcome) {
            tracing::debug!(handle, "response without a waiter; discarding");
        }
    }

    /// A server-initiated call arrived. Decode failures never tear the
    /// session down.
    fn deliver_callback(&self, handle: u32, body: &[u8]) {
        match xmlrpc::parse_method_call(body) {
            Ok((method, params)) => {
                tracing::debug!(handle, method = %method, "server callback");
                self.callbacks.on_callback(&method, params);
            }
            Err(e) => {
                if self.options.show_errors {
                    tracing::warn!(handle, error = %e, "undecodable server callback dropped");
                }
            }
        }
    }
}

async fn run_reader(session: Arc<Session>, mut read: OwnedReadHalf) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; 16 * 1024];
    loop {
        let n = match read.read(&mut chunk).await {
            Ok(0) => {
                session.teardown("end").await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                session.teardown(&e.to_string()).await;
                return;
            }
        };
        decoder.feed(&chunk[..n]);
        while let Some(message) = decoder.next() {
            match message {
                Decoded::Banner(payload) => {
                    if !session.finish_handshake(&payload).await {
                        return;
                    }
                }
                Decoded::Reply { handle, body } => session.route_reply(handle, &body),
                Decoded::Call { handle, body } => session.deliver_callback(handle, &body),
            }
        }
    }
}

async fn open_socket(host: &str, port: u16) -> std::io::Result<TcpStream> {
    let mut addrs = lookup_host((host, port)).await?;
    let addr = addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "host resolved to no addresses",
        )
    })?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(true)?;
    socket.connect(addr).await
}
