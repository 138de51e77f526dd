//! Neo p2p connection establishment.
//!
//! This module covers the pieces every connection needs before the protocol
//! runs: the local identity announced in the version handshake, TCP
//! establishment and the connection error type.
//!
//! # Examples
//!
//! ```
//! use neo_peers_connection::{connect, ConnectionConfiguration, MAINNET_MAGIC};
//! use neo_peers_connection::message::Message;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let configuration = ConnectionConfiguration::new(MAINNET_MAGIC);
//! let mut transport = connect("127.0.0.1:10333".parse()?, &configuration).await?;
//!
//! // Every connection opens with the local version.
//! transport
//!     .write(&Message::Version(configuration.version_payload(0)))
//!     .await?;
//! let response = transport.read().await?;
//! println!("Received: {:?}", response.command());
//! # Ok(())
//! # }
//! ```

mod configuration;
mod error;
mod tcp;

pub use configuration::{
    default_user_agent, ConnectionConfiguration, DEFAULT_CONNECTION_TIMEOUT,
    DEFAULT_PROTOCOL_VERSION, MAINNET_MAGIC,
};
pub use error::ConnectionError;
pub use tcp::{configure_stream, connect, establish_tcp_connection, TcpTransport};
