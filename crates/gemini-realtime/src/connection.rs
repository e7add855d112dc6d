use crate::types::{ClientMessage, ServerMessage, Setup};
use anyhow::{Context, Result};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_LIVE_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Appends the API key to a Live endpoint URL.
pub fn live_url(base: &str, api_key: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", base, separator, api_key)
}

/// Write half of a Live connection.
pub struct LiveSink {
    inner: SplitSink<Socket, WsMessage>,
}

impl LiveSink {
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let payload = serde_json::to_string(msg)?;
        self.inner.send(WsMessage::Text(payload.into())).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.inner.send(WsMessage::Close(None)).await?;
        Ok(())
    }
}

/// Read half of a Live connection.
pub struct LiveStream {
    inner: SplitStream<Socket>,
}

impl LiveStream {
    /// Next parsed server message. `None` once the server closed the socket.
    ///
    /// The server sends JSON in both text and binary frames. Frames that do
    /// not parse are logged and skipped.
    pub async fn next(&mut self) -> Option<Result<ServerMessage>> {
        while let Some(frame) = self.inner.next().await {
            let parsed = match frame {
                Ok(WsMessage::Text(text)) => serde_json::from_str::<ServerMessage>(text.as_str()),
                Ok(WsMessage::Binary(data)) => serde_json::from_slice::<ServerMessage>(&data),
                Ok(WsMessage::Close(close_frame)) => {
                    info!(?close_frame, "Live connection closed by server.");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            };
            match parsed {
                Ok(msg) => return Some(Ok(msg)),
                Err(e) => {
                    error!(error = %e, "Failed to parse Live server message, skipping.");
                    continue;
                }
            }
        }
        debug!("Live socket stream ended.");
        None
    }
}

/// Opens a Live session and sends `setup`. Does not wait for
/// `setupComplete`; that arrives as the first server message.
pub async fn connect(url: &str, setup: Setup) -> Result<(LiveSink, LiveStream)> {
    let (socket, _) = connect_async(url)
        .await
        .context("Failed to connect to the Live API")?;
    info!(model = %setup.model, "Connected to the Live API.");
    let (inner_tx, inner_rx) = socket.split();
    let mut sink = LiveSink { inner: inner_tx };
    if let Err(e) = sink.send(&ClientMessage::Setup(setup)).await {
        warn!(error = %e, "Failed to send Live setup message.");
        return Err(e.context("Failed to send setup"));
    }
    Ok((sink, LiveStream { inner: inner_rx }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_live_url() {
        assert_eq!(live_url("wss://x/live", "k"), "wss://x/live?key=k");
        assert_eq!(live_url("wss://x/live?alt=1", "k"), "wss://x/live?alt=1&key=k");
    }

    #[tokio::test]
    async fn test_connect_sends_setup_and_reads_binary_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let first = ws.next().await.unwrap().unwrap();
            let setup: serde_json::Value =
                serde_json::from_str(first.to_text().unwrap()).unwrap();
            ws.send(WsMessage::Binary(b"{\"setupComplete\":{}}".to_vec().into()))
                .await
                .unwrap();
            ws.send(WsMessage::Text("not json".into())).await.unwrap();
            ws.send(WsMessage::Text(
                "{\"serverContent\":{\"turnComplete\":true}}".into(),
            ))
            .await
            .unwrap();
            ws.close(None).await.unwrap();
            setup
        });

        let (_sink, mut stream) = connect(&format!("ws://{}", addr), Setup::audio("m", "", vec![]))
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(first.setup_complete.is_some());
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.server_content.unwrap().turn_complete, Some(true));
        assert!(stream.next().await.is_none());

        let setup = server.await.unwrap();
        assert_eq!(setup["setup"]["model"], "m");
    }
}
