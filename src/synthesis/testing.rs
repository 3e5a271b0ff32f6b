//! Fake synthesis backend for tests.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Start a one-shot backend on a free local port.
///
/// It accepts one connection, checks the generation request carries
/// `transcript`, sends `replies` in order and then waits for the relay to
/// close the socket. The task resolves to whether a close frame arrived.
pub async fn fake_backend(transcript: &'static str, replies: Vec<serde_json::Value>) -> (String, JoinHandle<bool>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

        let request = ws.next().await.unwrap().unwrap();
        let request: serde_json::Value = serde_json::from_str(request.to_text().unwrap()).unwrap();
        assert_eq!(request["transcript"], transcript);
        assert_eq!(request["output_format"]["encoding"], "pcm_s16le");
        assert_eq!(request["output_format"]["sample_rate"], 16000);

        for reply in replies {
            ws.send(Message::Text(reply.to_string())).await.unwrap();
        }

        let mut saw_close = false;
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                saw_close = true;
                break;
            }
        }
        saw_close
    });

    (format!("ws://{}", addr), server)
}

/// A closed local port: connecting to it is refused.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}
