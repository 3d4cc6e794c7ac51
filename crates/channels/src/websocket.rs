//! WebSocket client channel.
//!
//! Socket I/O runs in a background task so the session loop only ever waits
//! on mpsc queues, which keeps [`Channel::receive`] cancel-safe. The task
//! answers pings, decodes UTF-8 binary frames as text, and reports a clean
//! close as [`Inbound::Closed`].

use std::time::Duration;

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tether_protocol::MAX_FRAME_BYTES,
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream, connect_async_with_config,
        tungstenite::{Message, protocol::WebSocketConfig},
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use tether_metrics::{counter, transport as transport_metrics};

use crate::{
    Result,
    channel::{Channel, Inbound},
    error::Error,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Command {
    Send(String, oneshot::Sender<Result<()>>),
    Close,
}

pub struct WebSocketChannel {
    uri: String,
    events: mpsc::UnboundedReceiver<Result<Inbound>>,
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl WebSocketChannel {
    /// Open a connection, failing if the handshake does not complete within
    /// `connect_timeout`.
    pub async fn connect(uri: &str, connect_timeout: Duration) -> Result<Self> {
        validate_uri(uri)?;

        let config = WebSocketConfig::default()
            .max_message_size(Some(MAX_FRAME_BYTES))
            .max_frame_size(Some(MAX_FRAME_BYTES));

        info!(uri = %uri, "connecting to websocket endpoint");
        #[cfg(feature = "metrics")]
        counter!(transport_metrics::CONNECTION_ATTEMPTS_TOTAL).increment(1);

        let (stream, response) = tokio::time::timeout(
            connect_timeout,
            connect_async_with_config(uri, Some(config), false),
        )
        .await
        .map_err(|_| Error::ConnectTimeout {
            uri: uri.to_string(),
            timeout: connect_timeout,
        })??;
        info!(uri = %uri, status = %response.status(), "websocket connected");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(stream, event_tx, command_rx));

        Ok(Self {
            uri: uri.to_string(),
            events: event_rx,
            commands: command_tx,
            task: Some(task),
        })
    }
}

#[async_trait]
impl Channel for WebSocketChannel {
    fn peer(&self) -> &str {
        &self.uri
    }

    async fn receive(&mut self) -> Result<Inbound> {
        match self.events.recv().await {
            Some(event) => event,
            None => Ok(Inbound::Closed),
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Send(text, ack_tx))
            .map_err(|_| Error::Closed)?;
        ack_rx.await.map_err(|_| Error::Closed)?
    }

    async fn close(&mut self) -> Result<()> {
        // A closed queue means the pump already exited.
        let _ = self.commands.send(Command::Close);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::external("websocket task", e))?;
        }
        Ok(())
    }
}

fn validate_uri(uri: &str) -> Result<()> {
    let parsed = url::Url::parse(uri).map_err(|e| Error::invalid_uri(uri, e))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(Error::invalid_uri(
            uri,
            format!("unsupported scheme '{other}', expected ws:// or wss://"),
        )),
    }
}

/// Forward frames between the socket and the channel queues until either
/// side closes.
async fn pump(
    stream: WsStream,
    events: mpsc::UnboundedSender<Result<Inbound>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let (mut sink, mut reader) = stream.split();

    loop {
        tokio::select! {
            msg = reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(Ok(Inbound::Message(text.to_string())));
                    },
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(Ok(Inbound::Message(text)));
                        },
                        Err(_) => warn!(bytes = data.len(), "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            let _ = events.send(Err(e.into()));
                            return;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("websocket closed by peer");
                        let _ = events.send(Ok(Inbound::Closed));
                        return;
                    },
                    Some(Ok(_)) => {}, // pong, raw frames
                    Some(Err(e)) => {
                        let _ = events.send(Err(Error::WebSocket(e)));
                        return;
                    },
                }
            },
            command = commands.recv() => {
                match command {
                    Some(Command::Send(text, ack)) => {
                        let result = sink.send(Message::Text(text.into())).await.map_err(Error::from);
                        let _ = ack.send(result);
                    },
                    Some(Command::Close) | None => {
                        debug!("closing websocket");
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        let _ = events.send(Ok(Inbound::Closed));
                        return;
                    },
                }
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, tokio::net::TcpListener, tokio_tungstenite::accept_async};

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let uri = format!("ws://{}", listener.local_addr().unwrap());
        (listener, uri)
    }

    #[tokio::test]
    async fn exchanges_frames_and_sees_close() {
        let (listener, uri) = listen().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::Ping(vec![1, 2].into())).await.unwrap();
            ws.send(Message::Text("hello".into())).await.unwrap();
            ws.send(Message::Binary(br#"{"a":1}"#.to_vec().into()))
                .await
                .unwrap();

            let reply = loop {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(text) => break text.to_string(),
                    _ => continue,
                }
            };
            ws.close(None).await.unwrap();
            reply
        });

        let mut channel = WebSocketChannel::connect(&uri, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(channel.peer(), uri);
        assert_eq!(
            channel.receive().await.unwrap(),
            Inbound::Message("hello".into())
        );
        assert_eq!(
            channel.receive().await.unwrap(),
            Inbound::Message(r#"{"a":1}"#.into())
        );

        channel.send(r#"{"action":"wave"}"#.into()).await.unwrap();
        assert_eq!(server.await.unwrap(), r#"{"action":"wave"}"#);

        assert_eq!(channel.receive().await.unwrap(), Inbound::Closed);
        assert_eq!(channel.receive().await.unwrap(), Inbound::Closed);
        channel.close().await.unwrap();
    }

    #[tokio::test]
    async fn client_close_reaches_server() {
        let (listener, uri) = listen().await;
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            matches!(ws.next().await, Some(Ok(Message::Close(_))) | None)
        });

        let mut channel = WebSocketChannel::connect(&uri, Duration::from_secs(5))
            .await
            .unwrap();
        channel.close().await.unwrap();

        assert!(server.await.unwrap());
        assert!(channel.send("late".into()).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let (listener, uri) = listen().await;
        drop(listener);
        let err = WebSocketChannel::connect(&uri, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::WebSocket(_)));
    }

    #[test]
    fn rejects_non_websocket_uris() {
        assert!(validate_uri("ws://localhost:8765").is_ok());
        assert!(validate_uri("wss://example.com/socket").is_ok());
        assert!(matches!(
            validate_uri("http://localhost:8765"),
            Err(Error::InvalidUri { .. })
        ));
        assert!(matches!(
            validate_uri("localhost:8765 nope"),
            Err(Error::InvalidUri { .. })
        ));
    }
}
