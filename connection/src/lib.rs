mod codec;
mod connection;
pub mod message;
mod transport;
pub mod user_agent;

pub use codec::{Hash160, Hash256};
pub use connection::{
    configure_stream, connect, default_user_agent, establish_tcp_connection,
    ConnectionConfiguration, ConnectionError, TcpTransport, DEFAULT_CONNECTION_TIMEOUT,
    DEFAULT_PROTOCOL_VERSION, MAINNET_MAGIC,
};
pub use transport::{AsyncTransport, AsyncTransportReader, AsyncTransportWriter, TransportError};
pub use user_agent::{UserAgent, UserAgentError};
