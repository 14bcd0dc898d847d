use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use lq_protocol::{ClientFrame, ServerFrame};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

type BoxError = Box<dyn std::error::Error>;

/// A WebSocket client speaking the reactive query wire protocol, for tests.
pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, BoxError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), BoxError> {
        let json = serde_json::to_string(frame)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Send raw text, bypassing frame serialization (malformed-input tests).
    pub async fn send_text(&mut self, text: &str) -> Result<(), BoxError> {
        self.write.send(Message::Text(text.to_owned().into())).await?;
        Ok(())
    }

    /// Receive the next server frame, skipping ping/pong.
    pub async fn recv_frame(&mut self) -> Result<ServerFrame, BoxError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: ServerFrame = serde_json::from_str(&text)?;
                    return Ok(frame);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    /// Receive the next frame within `timeout`, or `None` if nothing arrives.
    ///
    /// Used both to await expected frames with a deadline and to assert
    /// silence (e.g. no update after unsubscribe).
    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<ServerFrame> {
        match tokio::time::timeout(timeout, self.recv_frame()).await {
            Ok(Ok(frame)) => Some(frame),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    pub async fn close(&mut self) -> Result<(), BoxError> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
