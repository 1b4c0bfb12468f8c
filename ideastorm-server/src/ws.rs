use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use ideastorm_collab::{RoomConnection, Session};
use log::{debug, info};
use tokio::{
    select,
    sync::mpsc,
    time::{interval, Instant},
};

use crate::{context::ServerContext, Router};

/// Heartbeat cadence for one connection. A connection silent for longer
/// than the timeout is treated as gone, going through the same cleanup
/// path as an explicit close.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(65),
        }
    }
}

async fn gateway(
    State(context): State<ServerContext>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, context))
}

/// Pumps one connection: inbound frames into the session handler,
/// outbound envelopes onto the socket, and a heartbeat in between.
async fn handle_socket(socket: WebSocket, context: ServerContext) {
    info!("New client connected");

    let (mut sink, mut stream) = socket.split();
    let (sender, mut outbound) = mpsc::unbounded_channel();

    let heartbeat = context.heartbeat;
    let session = Session::new(context.collab.clone(), RoomConnection::new(sender));

    let mut ticker = interval(heartbeat.interval);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut last_seen = Instant::now();

    loop {
        select! {
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    last_seen = Instant::now();
                    session.handle(&text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => last_seen = Instant::now(),
                Some(Err(err)) => {
                    debug!("Connection errored: {}", err);
                    break;
                }
            },
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if last_seen.elapsed() > heartbeat.timeout {
                    info!("Connection timed out, treating as disconnected");
                    break;
                }

                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("Client disconnected");
    session.close();
}

pub fn router() -> Router {
    Router::new().route("/ws", get(gateway))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use async_trait::async_trait;
    use ideastorm_collab::{Analysis, AnalysisError, Analyzer, Collab};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    struct NullAnalyzer;

    #[async_trait]
    impl Analyzer for NullAnalyzer {
        async fn analyze(&self, _transcription: &str) -> Result<Analysis, AnalysisError> {
            Ok(Analysis {
                themes: vec![],
                prompts: vec![],
            })
        }
    }

    async fn spawn_server(heartbeat: Heartbeat) -> (Arc<Collab>, std::net::SocketAddr) {
        let collab = Arc::new(Collab::new(Arc::new(NullAnalyzer)));
        let context = ServerContext {
            collab: collab.clone(),
            heartbeat,
        };

        let app = Router::new().merge(router()).with_state(context);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        (collab, addr)
    }

    /// Opens a raw socket and completes the upgrade by hand, so the
    /// client is free to ignore pings afterwards.
    async fn upgraded_socket(addr: std::net::SocketAddr) -> TcpStream {
        let mut socket = TcpStream::connect(addr).await.unwrap();

        let request = format!(
            "GET /ws HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        );
        socket.write_all(request.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut buffer = [0u8; 1024];

        while !response.windows(4).any(|w| w == b"\r\n\r\n") {
            let read = socket.read(&mut buffer).await.unwrap();
            assert!(read > 0, "server closed during the handshake");
            response.extend_from_slice(&buffer[..read]);
        }

        assert!(response.starts_with(b"HTTP/1.1 101"));

        socket
    }

    /// Client frames must be masked. A zero key keeps the payload as-is.
    fn masked_text_frame(payload: &str) -> Vec<u8> {
        let bytes = payload.as_bytes();
        assert!(bytes.len() < 126);

        let mut frame = vec![0x81, 0x80 | bytes.len() as u8];
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(bytes);

        frame
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition was not reached in time");
    }

    #[tokio::test]
    async fn test_silent_connection_is_detached_on_heartbeat_timeout() {
        let (collab, addr) = spawn_server(Heartbeat {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(150),
        })
        .await;

        let mut socket = upgraded_socket(addr).await;

        socket
            .write_all(&masked_text_frame(
                r#"{"type":"join_room","room_code":"QUIET1"}"#,
            ))
            .await
            .unwrap();

        let rooms = collab.rooms.clone();
        wait_until(move || {
            rooms
                .room("QUIET1")
                .map_or(false, |room| room.participant_count() == 1)
        })
        .await;

        // Stay silent and never answer a ping. The server must give up
        // on its own and release the participant.
        let rooms = collab.rooms.clone();
        wait_until(move || {
            rooms
                .room("QUIET1")
                .map_or(true, |room| room.participant_count() == 0)
        })
        .await;
    }
}
