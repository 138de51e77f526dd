//! TCP-specific connections.

use super::{ConnectionConfiguration, ConnectionError};
use crate::transport::AsyncTransport;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A transport over Tokio's TCP stream halves.
pub type TcpTransport = AsyncTransport<OwnedReadHalf, OwnedWriteHalf>;

/// Apply socket options used for every peer stream, inbound or outbound.
pub fn configure_stream(stream: &TcpStream) -> Result<(), ConnectionError> {
    // No delay is helpful for the small packets of the p2p protocol.
    stream.set_nodelay(true)?;
    Ok(())
}

/// Establish a TCP connection with timeout and nodelay.
pub async fn establish_tcp_connection(
    socket_addr: SocketAddr,
    timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    match tokio::time::timeout(timeout, TcpStream::connect(socket_addr)).await {
        Ok(Ok(stream)) => {
            configure_stream(&stream)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(ConnectionError::Io(e)),
        Err(_) => Err(ConnectionError::Timeout),
    }
}

/// Connect to a peer and wrap the stream in a transport.
///
/// No handshake is performed, the caller drives the protocol.
pub async fn connect(
    socket_addr: SocketAddr,
    configuration: &ConnectionConfiguration,
) -> Result<TcpTransport, ConnectionError> {
    let stream = establish_tcp_connection(socket_addr, configuration.connection_timeout).await?;
    let (reader, writer) = stream.into_split();
    log::debug!("Connected to {socket_addr}");
    Ok(AsyncTransport::new(reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, writer) = stream.into_split();
            let mut transport = AsyncTransport::new(reader, writer);
            let message = transport.read().await.unwrap();
            transport.write(&message).await.unwrap();
        });

        let configuration = ConnectionConfiguration::new(0);
        let mut transport = connect(addr, &configuration).await.unwrap();
        transport.write(&Message::GetAddr).await.unwrap();
        assert_eq!(transport.read().await.unwrap(), Message::GetAddr);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = establish_tcp_connection(addr, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ConnectionError::Io(_))));
    }
}
