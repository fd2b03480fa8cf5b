//! Mock Gemini Live server
//!
//! Accepts WebSocket connections the way the BidiGenerateContent endpoint
//! does: the first client frame must be `setup`, answered with
//! `setupComplete`. After that the test drives the connection through a
//! [`MockConnection`]. Server frames are sent as binary JSON, like the real
//! service.

#![allow(dead_code)]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How long helpers wait for traffic before failing the test
pub const WAIT: Duration = Duration::from_secs(5);

enum ServerFrame {
    Json(Value),
    Close,
}

/// Listening mock server.
pub struct MockGemini {
    pub url: String,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

/// One accepted upstream session.
pub struct MockConnection {
    /// The `setup` message the client opened with
    pub setup: Value,
    to_client: mpsc::UnboundedSender<ServerFrame>,
    from_client: mpsc::UnboundedReceiver<Value>,
}

impl MockGemini {
    /// Bind on an ephemeral port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, conn_tx).await {
                        eprintln!("mock gemini connection error: {e}");
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/live"),
            connections,
        }
    }

    /// Wait for the next client to finish its setup handshake.
    pub async fn accept(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("timed out waiting for upstream connection")
            .expect("mock server stopped")
    }
}

impl MockConnection {
    pub fn send(&self, message: Value) {
        let _ = self.to_client.send(ServerFrame::Json(message));
    }

    /// Close the upstream side.
    pub fn close(&self) {
        let _ = self.to_client.send(ServerFrame::Close);
    }

    /// Next JSON frame from the client.
    pub async fn recv(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client connection ended")
    }

    /// Skip frames until one has `key` at the top level.
    pub async fn recv_with(&mut self, key: &str) -> Value {
        loop {
            let frame = self.recv().await;
            if frame.get(key).is_some() {
                return frame;
            }
        }
    }

    // Helpers for common server messages

    pub fn input_transcription(&self, text: &str) {
        self.send(json!({"serverContent": {"inputTranscription": {"text": text}}}));
    }

    pub fn output_transcription(&self, text: &str) {
        self.send(json!({"serverContent": {"outputTranscription": {"text": text}}}));
    }

    pub fn audio(&self, data: &str) {
        self.send(json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": data}}]
                }
            }
        }));
    }

    pub fn interrupted(&self) {
        self.send(json!({"serverContent": {"interrupted": true}}));
    }

    pub fn turn_complete(&self) {
        self.send(json!({"serverContent": {"turnComplete": true}}));
    }

    pub fn tool_call(&self, id: &str, name: &str, args: Value) {
        self.send(json!({
            "toolCall": {"functionCalls": [{"id": id, "name": name, "args": args}]}
        }));
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn_tx: mpsc::UnboundedSender<MockConnection>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    let setup = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => break serde_json::from_str::<Value>(&text)?,
            Some(Ok(Message::Binary(data))) => break serde_json::from_slice::<Value>(&data)?,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(()),
        }
    };
    if setup.get("setup").is_none() {
        return Err("first frame was not setup".into());
    }

    write
        .send(Message::Binary(json!({"setupComplete": {}}).to_string().into()))
        .await?;

    let (to_client, mut outbound) = mpsc::unbounded_channel();
    let (inbound, from_client) = mpsc::unbounded_channel();
    if conn_tx
        .send(MockConnection {
            setup,
            to_client,
            from_client,
        })
        .is_err()
    {
        return Ok(());
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(ServerFrame::Json(value)) => {
                    write.send(Message::Binary(value.to_string().into())).await?;
                }
                Some(ServerFrame::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound.send(serde_json::from_str(&text)?);
                }
                Some(Ok(Message::Binary(data))) => {
                    let _ = inbound.send(serde_json::from_slice(&data)?);
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
}
