//! End-to-end scenarios against a scripted server.
//!
//! The peer speaks server-side framing: its length prefix excludes the
//! 4-byte handle, while frames written by the client carry a prefix that
//! includes it. The helpers below keep that asymmetry in one place.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use gbxremote::{
    decode_request, parse_method_call, serialize_method_call, Callbacks, Client, ClientError,
    ClientOptions, MethodCall, Value, HANDSHAKE_BANNER, PROTOCOL_MISMATCH,
};

#[derive(Debug, Clone, PartialEq)]
enum HostEvent {
    Disconnect(String),
    Callback(String, Vec<Value>),
}

struct Recorder {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl Callbacks for Recorder {
    fn on_disconnect(&self, reason: &str) {
        let _ = self.tx.send(HostEvent::Disconnect(reason.to_string()));
    }

    fn on_callback(&self, method: &str, params: Vec<Value>) {
        let _ = self.tx.send(HostEvent::Callback(method.to_string(), params));
    }
}

fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<HostEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Recorder { tx }), rx)
}

async fn start_server() -> (TcpListener, String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr.ip().to_string(), addr.port())
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a host event")
        .expect("host event channel closed")
}

async fn send_banner(stream: &mut TcpStream) {
    stream
        .write_all(&(HANDSHAKE_BANNER.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stream.write_all(HANDSHAKE_BANNER).await.unwrap();
}

/// Read one client frame; the client's length prefix covers the handle.
async fn read_request(stream: &mut TcpStream) -> (u32, Vec<u8>) {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.unwrap();
    let len = u32::from_le_bytes(prefix) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    let mut framed = Vec::with_capacity(4 + len);
    framed.extend_from_slice(&prefix);
    framed.extend_from_slice(&payload);
    let (handle, body) = decode_request(&framed).expect("client frame should decode");
    (handle, body.to_vec())
}

/// Write one server frame; the server's length prefix excludes the handle.
async fn write_server_frame(stream: &mut TcpStream, handle: u32, body: &[u8]) {
    stream
        .write_all(&(body.len() as u32).to_le_bytes())
        .await
        .unwrap();
    stream.write_all(&handle.to_le_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
}

fn response_body(inner: &str) -> Vec<u8> {
    format!(
        "<?xml version=\"1.0\"?><methodResponse><params><param><value>{inner}</value>\
         </param></params></methodResponse>"
    )
    .into_bytes()
}

fn fault_body(code: i32, message: &str) -> Vec<u8> {
    format!(
        "<?xml version=\"1.0\"?><methodResponse><fault><value><struct>\
         <member><name>faultCode</name><value><int>{code}</int></value></member>\
         <member><name>faultString</name><value><string>{message}</string></value></member>\
         </struct></value></fault></methodResponse>"
    )
    .into_bytes()
}

#[tokio::test]
async fn handshake_success_connects() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_banner(&mut stream).await;
        // Hold the socket until the client hangs up.
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink).await;
    });

    let (callbacks, mut events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(client.connect().await.unwrap());
    assert!(client.is_connected());

    client.disconnect().await;
    assert!(!client.is_connected());
    assert_eq!(
        next_event(&mut events).await,
        HostEvent::Disconnect("disconnect".into())
    );
    server.await.unwrap();
}

#[tokio::test]
async fn handshake_banner_mismatch_resolves_false() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&5u32.to_le_bytes()).await.unwrap();
        stream.write_all(b"Hello").await.unwrap();
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink).await;
    });

    let (callbacks, mut events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(!client.connect().await.unwrap());
    assert!(!client.is_connected());
    assert_eq!(
        next_event(&mut events).await,
        HostEvent::Disconnect(PROTOCOL_MISMATCH.into())
    );
    // Teardown notifies exactly once.
    assert!(events.try_recv().is_err());
    server.await.unwrap();
}

#[tokio::test]
async fn call_round_trip() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_banner(&mut stream).await;
        let (handle, body) = read_request(&mut stream).await;
        assert_eq!(handle, 0x8000_0001);
        let (method, params) = parse_method_call(&body).unwrap();
        assert_eq!(method, "Hello");
        assert!(params.is_empty());
        write_server_frame(&mut stream, handle, &response_body("<string>world</string>")).await;
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink).await;
    });

    let (callbacks, _events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(client.connect().await.unwrap());
    let value = client.call("Hello", vec![]).await.unwrap();
    assert_eq!(value, Value::String("world".into()));
    client.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn callback_interleaved_with_call() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_banner(&mut stream).await;
        let (handle, _body) = read_request(&mut stream).await;
        // Push a callback before answering the in-flight call.
        let callback =
            serialize_method_call("PlayerConnect", &[Value::from("login"), Value::Bool(false)])
                .unwrap();
        write_server_frame(&mut stream, 0x0000_0001, &callback).await;
        write_server_frame(&mut stream, handle, &response_body("<string>world</string>")).await;
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink).await;
    });

    let (callbacks, mut events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(client.connect().await.unwrap());
    let value = client.call("Hello", vec![]).await.unwrap();
    assert_eq!(value, Value::String("world".into()));
    // The callback was delivered before the response completed the call.
    assert_eq!(
        events.try_recv().unwrap(),
        HostEvent::Callback(
            "PlayerConnect".into(),
            vec![Value::String("login".into()), Value::Bool(false)]
        )
    );
    client.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn multicall_unwraps_each_slot() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_banner(&mut stream).await;
        let (handle, body) = read_request(&mut stream).await;
        let (method, params) = parse_method_call(&body).unwrap();
        assert_eq!(method, "system.multicall");
        let entries = params[0].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        let first = entries[0].as_struct().unwrap();
        assert_eq!(first["methodName"], Value::String("GetA".into()));
        assert_eq!(first["params"], Value::Array(vec![Value::Int(1)]));

        // Successful slots are one-element arrays; a faulted sub-call is a
        // bare fault struct in its slot.
        let batch = "<array><data>\
             <value><array><data><value><string>r1</string></value></data></array></value>\
             <value><array><data><value><int>2</int></value></data></array></value>\
             <value><struct>\
             <member><name>faultCode</name><value><int>-506</int></value></member>\
             <member><name>faultString</name><value><string>unknown</string></value></member>\
             </struct></value>\
             </data></array>";
        write_server_frame(&mut stream, handle, &response_body(batch)).await;
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink).await;
    });

    let (callbacks, _events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(client.connect().await.unwrap());
    let results = client
        .multicall(vec![
            MethodCall::new("GetA", vec![Value::Int(1)]),
            MethodCall::new("GetB", vec![]),
            MethodCall::new("GetC", vec![]),
        ])
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Value::String("r1".into()));
    assert_eq!(results[1], Value::Int(2));
    let fault_slot = results[2].as_struct().unwrap();
    assert_eq!(fault_slot["faultCode"], Value::Int(-506));
    assert_eq!(fault_slot["faultString"], Value::String("unknown".into()));
    client.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn oversize_call_leaves_the_session_untouched() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_banner(&mut stream).await;
        // The first frame on the wire must be the follow-up call: the
        // oversize request wrote nothing and minted no handle.
        let (handle, body) = read_request(&mut stream).await;
        assert_eq!(handle, 0x8000_0001);
        let (method, _params) = parse_method_call(&body).unwrap();
        assert_eq!(method, "Hello");
        write_server_frame(&mut stream, handle, &response_body("<string>world</string>")).await;
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink).await;
    });

    let (callbacks, _events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(client.connect().await.unwrap());

    let oversize = "x".repeat(5 * 1024 * 1024);
    let err = client
        .call("EchoBlob", vec![Value::from(oversize)])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::RequestTooLarge { .. }));
    assert!(client.is_connected());

    let value = client.call("Hello", vec![]).await.unwrap();
    assert_eq!(value, Value::String("world".into()));
    client.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn send_is_fire_and_forget_and_its_response_is_discarded() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_banner(&mut stream).await;
        let (first, _body) = read_request(&mut stream).await;
        assert_eq!(first, 0x8000_0001);
        let (second, _body) = read_request(&mut stream).await;
        assert_eq!(second, 0x8000_0002);
        // Fault the fire-and-forget handle first; nobody is listening, so
        // the client must drop it and still resolve the awaited call.
        write_server_frame(&mut stream, first, &fault_body(-1000, "ignored")).await;
        write_server_frame(&mut stream, second, &response_body("<string>world</string>")).await;
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink).await;
    });

    let (callbacks, _events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(client.connect().await.unwrap());
    client.send("Ignore", vec![Value::Int(1)]).await.unwrap();
    let value = client.call("Hello", vec![]).await.unwrap();
    assert_eq!(value, Value::String("world".into()));
    client.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn fault_respects_the_error_options() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (mut stream, _) = listener.accept().await.unwrap();
            send_banner(&mut stream).await;
            let (handle, _body) = read_request(&mut stream).await;
            write_server_frame(&mut stream, handle, &fault_body(-1000, "Login unknown.")).await;
            let mut sink = [0u8; 64];
            let _ = stream.read(&mut sink).await;
        }
    });

    // Default options raise the fault.
    let (callbacks, _events) = recorder();
    let client = Client::new(host.clone(), port, callbacks);
    assert!(client.connect().await.unwrap());
    match client.call("Kick", vec![Value::from("login")]).await {
        Err(ClientError::Fault(fault)) => {
            assert_eq!(fault.code, -1000);
            assert_eq!(fault.message, "Login unknown.");
        }
        other => panic!("expected a fault, got {other:?}"),
    }
    client.disconnect().await;

    // With throw_errors off the fault resolves to the sentinel.
    let (callbacks, _events) = recorder();
    let quiet = Client::with_options(
        host,
        port,
        callbacks,
        ClientOptions {
            show_errors: false,
            throw_errors: false,
        },
    );
    assert!(quiet.connect().await.unwrap());
    let value = quiet.call("Kick", vec![Value::from("login")]).await.unwrap();
    assert_eq!(value, Value::Bool(false));
    quiet.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn server_close_fails_outstanding_calls() {
    let (listener, host, port) = start_server().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        send_banner(&mut stream).await;
        // Take the request, then hang up without answering.
        let _ = read_request(&mut stream).await;
    });

    let (callbacks, mut events) = recorder();
    let client = Client::new(host, port, callbacks);
    assert!(client.connect().await.unwrap());
    let err = client.call("Hello", vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::Disconnected(_)));
    assert_eq!(
        next_event(&mut events).await,
        HostEvent::Disconnect("end".into())
    );
    server.await.unwrap();
}

#[tokio::test]
async fn requests_without_a_connection_do_nothing() {
    let (callbacks, _events) = recorder();
    let client = Client::new("127.0.0.1", 1, callbacks);

    assert_eq!(
        client.call("Hello", vec![]).await.unwrap(),
        Value::Bool(false)
    );
    client.send("Hello", vec![]).await.unwrap();
    assert_eq!(
        client
            .multicall(vec![MethodCall::new("Hello", vec![])])
            .await
            .unwrap(),
        Vec::<Value>::new()
    );
    assert_eq!(
        client.call_script("Shootmania.GetScores", vec![]).await.unwrap(),
        Value::Bool(false)
    );
}
