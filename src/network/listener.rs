//! TCP listener setup for the host server

use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;

use crate::error::NetworkError;

const BACKLOG: i32 = 1024;

/// Bind a non-blocking TCP listener with address reuse, so a restarted host
/// can take its port back immediately.
pub fn bind_tcp(addr: SocketAddr) -> Result<tokio::net::TcpListener, NetworkError> {
    let bind_err = |e: std::io::Error| NetworkError::BindFailed(format!("{}: {}", addr, e));

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nodelay(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(BACKLOG).map_err(bind_err)?;

    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)
}

/// Parse `host:port` into a socket address
pub fn resolve_bind_addr(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| NetworkError::BindFailed(format!("{}:{}: {}", host, port, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = bind_tcp(resolve_bind_addr("127.0.0.1", 0).unwrap()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::net::TcpStream::connect(addr).await;
        assert!(client.is_ok());
    }

    #[test]
    fn test_bad_bind_address() {
        assert!(matches!(
            resolve_bind_addr("not an address", 80),
            Err(NetworkError::BindFailed(_))
        ));
    }
}
