//! WebSocket plumbing between a socket and its [`Connection`]
//!
//! [`attach`] splits a WebSocket into a [`Connection`] handle and a [`Pump`].
//! Running the pump forwards queued outbound frames to the socket and feeds
//! each inbound binary frame to the connection's dispatcher until the peer
//! goes away, then closes the connection.

use crate::connection::Connection;
use crate::error::Result;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub struct Pump<S> {
    connection: Connection,
    stream: WebSocketStream<S>,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Wraps an established WebSocket. Register handlers on the returned
/// connection before running the pump so no early frame goes unhandled.
pub fn attach<S>(stream: WebSocketStream<S>, remote_addr: Option<SocketAddr>) -> (Connection, Pump<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (connection, outbound) = Connection::detached(remote_addr);
    let pump = Pump {
        connection: connection.clone(),
        stream,
        outbound,
    };
    (connection, pump)
}

/// Opens a client WebSocket to `url`.
pub async fn connect(url: &str) -> Result<(Connection, Pump<MaybeTlsStream<TcpStream>>)> {
    let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
    let remote_addr = match stream.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };
    Ok(attach(stream, remote_addr))
}

impl<S> Pump<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Runs until the socket closes or fails. The connection is closed on
    /// return.
    pub async fn run(self) {
        let Pump {
            connection,
            stream,
            mut outbound,
        } = self;
        let (mut sink, mut source) = stream.split();

        let writer_connection = connection.clone();
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = sink.send(Message::Binary(frame)).await {
                            debug!("<{}> Write failed: {}", writer_connection, e);
                            break;
                        }
                    }
                    _ = writer_connection.shutdown_requested() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Binary(frame)) => connection.handle_frame(frame),
                Ok(Message::Text(_)) => warn!("<{}> Ignoring text frame", connection),
                Ok(Message::Close(_)) => break,
                // Ping/pong control frames are answered by tungstenite.
                Ok(_) => {}
                Err(e) => {
                    debug!("<{}> Read failed: {}", connection, e);
                    break;
                }
            }
        }

        writer.abort();
        connection.close();
    }
}
