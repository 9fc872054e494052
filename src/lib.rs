//! Client for the GBXRemote 2 protocol, the length-framed XML-RPC
//! transport spoken by Trackmania and Maniaplanet dedicated servers.
//!
//! The client owns one TCP connection. A spawned reader task demultiplexes
//! the stream: responses to in-flight calls are correlated back to their
//! callers by request handle, while server-initiated callbacks
//! (`PlayerConnect`, chat messages, ...) are pushed to the host through
//! [`Callbacks`]. Requests and callbacks interleave freely on the one
//! socket.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gbxremote::{Callbacks, Client, Value};
//!
//! struct Host;
//!
//! impl Callbacks for Host {
//!     fn on_callback(&self, method: &str, params: Vec<Value>) {
//!         println!("<- {method} {params:?}");
//!     }
//! }
//!
//! # async fn run() -> Result<(), gbxremote::ClientError> {
//! let client = Client::new("127.0.0.1", 5000, Arc::new(Host));
//! if client.connect().await? {
//!     let version = client.call("GetVersion", vec![]).await?;
//!     println!("{version:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod callbacks;
mod client;
mod decoder;
mod error;
mod frame;
mod handle;
mod pending;
mod session;
mod xmlrpc;

pub use callbacks::{Callbacks, NoopCallbacks};
pub use client::{Client, ClientOptions, MethodCall, DEFAULT_HOST, DEFAULT_PORT};
pub use decoder::{Decoded, FrameDecoder};
pub use error::{ClientError, DecodeError, EncodeError, Fault};
pub use frame::{
    check_request_size, decode_request, encode_request, MAX_REQUEST_SIZE, RESPONSE_HANDLE_BIT,
};
pub use handle::{HandleAllocator, HANDLE_RANGE_END, HANDLE_RANGE_START};
pub use session::{HANDSHAKE_BANNER, PROTOCOL_MISMATCH};
pub use xmlrpc::{parse_method_call, parse_method_response, serialize_method_call, Value};
