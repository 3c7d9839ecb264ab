//! Accepts WebSocket connections and hands each one to a callback
//!
//! The listener holds no game state. For every accepted socket it performs
//! the WebSocket handshake, wraps the stream in a [`Connection`], lets the
//! callback register handlers, and only then starts pumping frames.

use log::{error, info, warn};
use shared::transport;
use shared::Connection;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

pub struct Listener {
    socket: TcpListener,
}

impl Listener {
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let socket = TcpListener::bind(addr).await?;
        info!("Listening on {}", socket.local_addr()?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Accepts connections forever, invoking `on_connection` once per socket
    /// from that socket's own task.
    pub async fn run<F>(self, on_connection: F)
    where
        F: Fn(Connection) + Send + Sync + 'static,
    {
        let on_connection = Arc::new(on_connection);
        loop {
            match self.socket.accept().await {
                Ok((stream, addr)) => {
                    let on_connection = Arc::clone(&on_connection);
                    tokio::spawn(async move {
                        serve(stream, addr, on_connection.as_ref()).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn serve<F>(stream: TcpStream, addr: SocketAddr, on_connection: &F)
where
    F: Fn(Connection),
{
    let websocket = match tokio_tungstenite::accept_async(stream).await {
        Ok(websocket) => websocket,
        Err(e) => {
            warn!("<{}> WebSocket handshake failed: {}", addr, e);
            return;
        }
    };
    info!("<{}> Connected", addr);

    let (connection, pump) = transport::attach(websocket, Some(addr));
    on_connection(connection);
    pump.run().await;
}
