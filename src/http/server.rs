//! Listener and per-connection threads
//!
//! Every accepted socket gets its own thread running a [`Connection`] to
//! completion. Connections share nothing but the [`ServerContext`].

use super::connection::{Connection, ServerContext};
use super::session::from_tcp_stream;
use super::Result;
use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

/// Accept backlog
const LISTEN_BACKLOG: i32 = 128;

/// HTTP server
pub struct HttpServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl HttpServer {
    /// Bind a listening socket
    pub fn bind(addr: SocketAddr, context: ServerContext) -> Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;

        let listener: TcpListener = socket.into();
        info!("listening on {}", listener.local_addr()?);

        Ok(HttpServer {
            listener,
            context: Arc::new(context),
        })
    }

    /// Get the bound address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever
    pub fn serve(&self) -> Result<()> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    let context = Arc::clone(&self.context);
                    let spawned = thread::Builder::new()
                        .name("http-conn".to_string())
                        .spawn(move || handle_connection(stream, context));
                    if let Err(e) = spawned {
                        error!("unable to spawn connection thread: {}", e);
                    }
                }
                Err(e) => warn!("accept failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Run one client connection until it closes
pub fn handle_connection(stream: TcpStream, context: Arc<ServerContext>) {
    let peer = stream.peer_addr().ok();
    let local_port = stream.local_addr().map(|a| a.port()).unwrap_or(0);
    let clienthost = match peer {
        Some(addr) => format!("[{}]", addr.ip()),
        None => "[unknown]".to_string(),
    };
    debug!("accepted connection from {}", clienthost);

    let mut conn = Connection::new(from_tcp_stream(stream), context, clienthost);
    conn.set_local_port(local_port);
    if let Err(e) = conn.run() {
        debug!("connection ended with error: {}", e);
    }
}
