//! Framed message transport.
//!
//! Frames are the serialized [`Message`] envelope: two fixed header bytes
//! followed by a CompactSize payload length and the payload.

use crate::message::{Message, FLAG_COMPRESSED, PAYLOAD_MAX_SIZE};
use crate::transport::TransportError;
use bitcoin::consensus::encode;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Flags, command and the first byte of the length prefix.
const HEADER_SIZE: usize = 3;
/// Header plus the longest CompactSize extension.
const MAX_PREFIX_SIZE: usize = HEADER_SIZE + 8;

/// Number of extra length bytes announced by the first CompactSize byte.
fn length_extension(marker: u8) -> usize {
    match marker {
        0xFD => 2,
        0xFE => 4,
        0xFF => 8,
        _ => 0,
    }
}

/// State machine for the [`AsyncTransportReader`] read method.
///
/// Tracks progress across interruptions so the read can be cancelled (e.g.
/// by `tokio::select!`) and resumed without losing partially read bytes.
#[derive(Debug)]
enum ReceiveState {
    /// Reading flags, command and the first length byte.
    ReadingHeader {
        header: [u8; HEADER_SIZE],
        bytes_read: usize,
    },
    /// Reading the remaining bytes of a multi-byte length.
    ReadingLength {
        prefix: [u8; MAX_PREFIX_SIZE],
        prefix_len: usize,
        bytes_read: usize,
    },
    /// Reading the message payload.
    ReadingPayload {
        /// Complete frame including the prefix.
        buffer: Vec<u8>,
        bytes_read: usize,
    },
}

impl ReceiveState {
    fn reading_header() -> Self {
        ReceiveState::ReadingHeader {
            header: [0u8; HEADER_SIZE],
            bytes_read: 0,
        }
    }

    fn reading_payload(prefix: &[u8], payload_len: usize) -> Self {
        let mut buffer = Vec::with_capacity(prefix.len() + payload_len);
        buffer.extend_from_slice(prefix);
        buffer.resize(prefix.len() + payload_len, 0);

        ReceiveState::ReadingPayload {
            buffer,
            bytes_read: prefix.len(),
        }
    }
}

/// Decode the payload length from a complete prefix.
fn payload_length(prefix: &[u8]) -> Result<usize, TransportError> {
    let marker = prefix[HEADER_SIZE - 1];
    let extension = &prefix[HEADER_SIZE..];
    let len = match extension.len() {
        0 => marker as u64,
        _ => {
            let mut bytes = [0u8; 8];
            bytes[..extension.len()].copy_from_slice(extension);
            u64::from_le_bytes(bytes)
        }
    };
    if len > PAYLOAD_MAX_SIZE as u64 {
        return Err(TransportError::OversizedPayload(len));
    }
    Ok(len as usize)
}

async fn read_exact_resumable<R>(
    reader: &mut R,
    buffer: &mut [u8],
    bytes_read: &mut usize,
    context: &'static str,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin + Send,
{
    while *bytes_read < buffer.len() {
        let n = reader.read(&mut buffer[*bytes_read..]).await?;
        if n == 0 {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                context,
            )));
        }
        *bytes_read += n;
    }
    Ok(())
}

/// Writer half of the transport.
#[derive(Debug)]
pub struct AsyncTransportWriter<W> {
    writer: W,
}

impl<W> AsyncTransportWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write and flush one message.
    pub async fn write(&mut self, message: &Message) -> Result<(), TransportError> {
        let data = encode::serialize(message);
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shut down the write direction of the underlying stream.
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// The underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Reader half of the transport.
#[derive(Debug)]
pub struct AsyncTransportReader<R> {
    receive_state: ReceiveState,
    reader: R,
}

impl<R> AsyncTransportReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            receive_state: ReceiveState::reading_header(),
            reader,
        }
    }

    /// Read one message.
    ///
    /// This function is cancellation safe, it can be used in `tokio::select!`
    /// without the risk of losing a partially read frame.
    pub async fn read(&mut self) -> Result<Message, TransportError> {
        loop {
            match &mut self.receive_state {
                ReceiveState::ReadingHeader { header, bytes_read } => {
                    read_exact_resumable(
                        &mut self.reader,
                        header,
                        bytes_read,
                        "connection closed while reading header",
                    )
                    .await?;

                    let header = *header;
                    if header[0] & FLAG_COMPRESSED != 0 {
                        self.receive_state = ReceiveState::reading_header();
                        return Err(TransportError::Compressed);
                    }

                    let extension = length_extension(header[HEADER_SIZE - 1]);
                    if extension == 0 {
                        let payload_len = payload_length(&header[..])?;
                        self.receive_state = ReceiveState::reading_payload(&header[..], payload_len);
                    } else {
                        let mut prefix = [0u8; MAX_PREFIX_SIZE];
                        prefix[..HEADER_SIZE].copy_from_slice(&header[..]);
                        self.receive_state = ReceiveState::ReadingLength {
                            prefix,
                            prefix_len: HEADER_SIZE + extension,
                            bytes_read: HEADER_SIZE,
                        };
                    }
                }

                ReceiveState::ReadingLength {
                    prefix,
                    prefix_len,
                    bytes_read,
                } => {
                    let prefix_len = *prefix_len;
                    read_exact_resumable(
                        &mut self.reader,
                        &mut prefix[..prefix_len],
                        bytes_read,
                        "connection closed while reading length",
                    )
                    .await?;

                    let payload_len = payload_length(&prefix[..prefix_len])?;
                    let prefix = *prefix;
                    self.receive_state =
                        ReceiveState::reading_payload(&prefix[..prefix_len], payload_len);
                }

                ReceiveState::ReadingPayload { buffer, bytes_read } => {
                    read_exact_resumable(
                        &mut self.reader,
                        buffer,
                        bytes_read,
                        "connection closed while reading payload",
                    )
                    .await?;

                    let result = encode::deserialize::<Message>(buffer);
                    self.receive_state = ReceiveState::reading_header();
                    return Ok(result?);
                }
            }
        }
    }
}

/// Message transport over any `AsyncRead` + `AsyncWrite` pair.
///
/// # Examples
///
/// ```rust
/// use neo_peers_connection::message::Message;
/// use neo_peers_connection::AsyncTransport;
/// use tokio::net::TcpStream;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let stream = TcpStream::connect("127.0.0.1:10333").await?;
/// let (reader, writer) = stream.into_split();
/// let mut transport = AsyncTransport::new(reader, writer);
///
/// transport.write(&Message::GetAddr).await?;
/// let response = transport.read().await?;
/// println!("Received {}", response.command());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AsyncTransport<R, W> {
    writer: AsyncTransportWriter<W>,
    reader: AsyncTransportReader<R>,
}

impl<R, W> AsyncTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            writer: AsyncTransportWriter::new(writer),
            reader: AsyncTransportReader::new(reader),
        }
    }

    /// Read one message, cancellation safe.
    pub async fn read(&mut self) -> Result<Message, TransportError> {
        self.reader.read().await
    }

    pub async fn write(&mut self, message: &Message) -> Result<(), TransportError> {
        self.writer.write(message).await
    }

    /// Split into independently usable halves.
    pub fn into_split(self) -> (AsyncTransportReader<R>, AsyncTransportWriter<W>) {
        (self.reader, self.writer)
    }
}
