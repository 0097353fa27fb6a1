//! TCP listener for incoming remote shell connections.
//!
//! Deliberately minimal: bind an address, accept a connection, hand the
//! stream to a session. Transport security and framing are out of scope
//! here; the accepted stream is treated as a raw shell byte channel.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("Failed to clone stream: {0}")]
    Clone(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ListenerError>;

/// Listener bound to a local address.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind to `addr` (host:port).
    pub fn bind(addr: &str) -> Result<Self> {
        let inner = TcpListener::bind(addr).map_err(|source| ListenerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        info!("listening on {}", addr);
        Ok(Self { inner })
    }

    /// Local address actually bound (useful with port 0).
    #[allow(dead_code)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Block until one connection arrives.
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().map_err(ListenerError::Accept)?;
        info!("connection from {}", peer);
        Ok((stream, peer))
    }
}

/// Split a stream into independent read and write halves.
pub fn split(stream: &TcpStream) -> Result<(TcpStream, TcpStream)> {
    let rx = stream.try_clone().map_err(ListenerError::Clone)?;
    let tx = stream.try_clone().map_err(ListenerError::Clone)?;
    Ok((rx, tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_bind_and_accept() {
        let listener = Listener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
        });

        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        client.join().unwrap();
    }

    #[test]
    fn test_bind_bad_address_fails() {
        assert!(Listener::bind("not an address").is_err());
    }
}
