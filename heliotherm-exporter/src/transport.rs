//! Byte-stream transports and framed request/reply exchange.
//!
//! The heat pump is reached either through a TCP-to-serial LAN gateway or a
//! local serial port. Both end up as one boxed async byte stream, so the
//! codec and poller never branch on the transport kind.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use heliotherm_protocol::frame::{self, FrameError};
use heliotherm_protocol::Command;

use crate::config::ConnectionConfig;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("No reply within {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Could not resynchronize with the device")]
    Desynchronized,
}

/// Async byte stream (TCP socket, serial port, or a test double).
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Capability to open a byte stream to the heat pump.
///
/// Boxed-future form keeps the trait object-safe; tests substitute fake
/// connectors backed by in-memory duplex pipes.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ByteStream>, TransportError>> + Send + '_>>;
}

/// Production connector: opens the transport selected by configuration.
pub struct NetConnector {
    config: ConnectionConfig,
    connect_timeout: Duration,
}

impl NetConnector {
    pub fn new(config: ConnectionConfig, connect_timeout: Duration) -> Self {
        Self {
            config,
            connect_timeout,
        }
    }
}

impl Connector for NetConnector {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ByteStream>, TransportError>> + Send + '_>>
    {
        Box::pin(async move {
            match &self.config {
                ConnectionConfig::Gateway { host, port } => {
                    let stream = tokio::time::timeout(
                        self.connect_timeout,
                        TcpStream::connect((host.as_str(), *port)),
                    )
                    .await
                    .map_err(|_| {
                        TransportError::Connect(format!(
                            "timeout connecting to gateway {}:{}",
                            host, port
                        ))
                    })?
                    .map_err(|e| TransportError::Connect(e.to_string()))?;

                    // queries are tiny; don't let Nagle delay them
                    stream.set_nodelay(true).ok();

                    debug!(host = %host, port = *port, "Connected to LAN gateway");
                    Ok(Box::new(stream) as Box<dyn ByteStream>)
                }
                ConnectionConfig::Serial {
                    device,
                    baud,
                    data_bits,
                    parity,
                    stop_bits,
                } => {
                    let parity = match parity.to_lowercase().as_str() {
                        "even" => tokio_serial::Parity::Even,
                        "odd" => tokio_serial::Parity::Odd,
                        _ => tokio_serial::Parity::None,
                    };

                    let stop_bits = match stop_bits {
                        2 => tokio_serial::StopBits::Two,
                        _ => tokio_serial::StopBits::One,
                    };

                    let data_bits = match data_bits {
                        5 => tokio_serial::DataBits::Five,
                        6 => tokio_serial::DataBits::Six,
                        7 => tokio_serial::DataBits::Seven,
                        _ => tokio_serial::DataBits::Eight,
                    };

                    let builder = tokio_serial::new(device, *baud)
                        .parity(parity)
                        .stop_bits(stop_bits)
                        .data_bits(data_bits);

                    let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
                        TransportError::Connect(format!("serial open failed: {}", e))
                    })?;

                    debug!(device = %device, baud = *baud, "Opened serial port");
                    Ok(Box::new(serial) as Box<dyn ByteStream>)
                }
            }
        })
    }
}

/// Upper bound on garbage bytes discarded while hunting for a frame start.
const RESYNC_WINDOW: usize = 256;

const READ_CHUNK: usize = 1024;

/// An open connection with framed request/reply exchange.
///
/// Owns the stream exclusively; one exchange is in flight at a time.
pub struct Link {
    stream: Box<dyn ByteStream>,
    carry: Vec<u8>,
    response_timeout: Duration,
}

impl Link {
    pub fn new(stream: Box<dyn ByteStream>, response_timeout: Duration) -> Self {
        Self {
            stream,
            carry: Vec::new(),
            response_timeout,
        }
    }

    /// Write raw bytes without waiting for a reply (modem wake-up string).
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Send a command and wait for its decoded reply payload.
    pub async fn exchange(&mut self, command: &Command) -> Result<Vec<u8>, TransportError> {
        // unsolicited leftovers from a previous exchange are stale by now
        self.carry.clear();

        let request = frame::encode_command(command);
        self.stream.write_all(&request).await?;
        self.stream.flush().await?;

        self.read_reply().await
    }

    /// Read until one complete frame decodes, resynchronizing past garbage
    /// (e.g. echoed request frames on a half-duplex line) up to
    /// [`RESYNC_WINDOW`] bytes.
    async fn read_reply(&mut self) -> Result<Vec<u8>, TransportError> {
        let deadline = tokio::time::Instant::now() + self.response_timeout;
        let mut discarded = 0usize;

        loop {
            loop {
                match frame::decode_frame(&self.carry) {
                    Ok(Some(decoded)) => {
                        self.carry.drain(..decoded.consumed);
                        return Ok(decoded.payload);
                    }
                    Ok(None) => break,
                    Err(err @ FrameError::Header(_)) => {
                        let skip = frame::resync(&self.carry).max(1);
                        discarded += skip;
                        if discarded > RESYNC_WINDOW {
                            self.carry.clear();
                            return Err(TransportError::Desynchronized);
                        }
                        debug!(skipped = skip, error = %err, "Resynchronizing input");
                        self.carry.drain(..skip);
                    }
                    Err(err) => {
                        // corrupted frame (checksum, prefix, bad length) is a
                        // rejection, never a value
                        warn!(error = %err, "Rejecting reply frame");
                        self.carry.clear();
                        return Err(err.into());
                    }
                }
            }

            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or(TransportError::Timeout(self.response_timeout))?;

            let mut buf = [0u8; READ_CHUNK];
            let n = tokio::time::timeout(remaining, self.stream.read(&mut buf))
                .await
                .map_err(|_| TransportError::Timeout(self.response_timeout))??;

            if n == 0 {
                return Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }

            self.carry.extend_from_slice(&buf[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heliotherm_protocol::frame::{encode_command, encode_reply};
    use tokio::io::duplex;

    fn link_over(device_side_writes: Vec<u8>) -> (Link, tokio::io::DuplexStream) {
        let (local, remote) = duplex(4096);
        let mut link = Link::new(Box::new(local), Duration::from_millis(100));
        link.carry = device_side_writes; // pre-seed for decode-only tests
        (link, remote)
    }

    #[tokio::test]
    async fn test_exchange_roundtrip() {
        let (local, mut remote) = duplex(4096);
        let mut link = Link::new(Box::new(local), Duration::from_millis(100));

        let device = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = remote.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], encode_command(&Command::Login).as_slice());
            remote.write_all(&encode_reply(b"OK;")).await.unwrap();
            remote
        });

        let payload = link.exchange(&Command::Login).await.unwrap();
        assert_eq!(payload, b"OK;");
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_reply_split_across_reads() {
        let (local, mut remote) = duplex(4096);
        let mut link = Link::new(Box::new(local), Duration::from_millis(200));

        let device = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            remote.read(&mut buf).await.unwrap();
            let reply = encode_reply(b"MP,NR=0,NAME=Temp. Aussen,VAL=21.5,");
            let (head, tail) = reply.split_at(5);
            remote.write_all(head).await.unwrap();
            remote.flush().await.unwrap();
            tokio::task::yield_now().await;
            remote.write_all(tail).await.unwrap();
            remote
        });

        let payload = link.exchange(&Command::ReadProcessValue(0)).await.unwrap();
        assert_eq!(payload, b"MP,NR=0,NAME=Temp. Aussen,VAL=21.5,");
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_resyncs_past_echoed_request() {
        let (local, mut remote) = duplex(4096);
        let mut link = Link::new(Box::new(local), Duration::from_millis(200));

        let device = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = remote.read(&mut buf).await.unwrap();
            // echo the request back (half-duplex line), then answer
            remote.write_all(&buf[..n]).await.unwrap();
            remote.write_all(&encode_reply(b"OK;")).await.unwrap();
            remote
        });

        let payload = link.exchange(&Command::Login).await.unwrap();
        assert_eq!(payload, b"OK;");
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_rejects_corrupted_reply() {
        let (local, mut remote) = duplex(4096);
        let mut link = Link::new(Box::new(local), Duration::from_millis(100));

        let device = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            remote.read(&mut buf).await.unwrap();
            let mut reply = encode_reply(b"MP,NR=0,VAL=21.5,");
            reply[10] ^= 0x01; // corrupt one payload byte
            remote.write_all(&reply).await.unwrap();
            remote
        });

        let result = link.exchange(&Command::ReadProcessValue(0)).await;
        assert!(matches!(
            result,
            Err(TransportError::Frame(FrameError::Checksum { .. }))
        ));
        device.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_times_out_without_reply() {
        let (local, remote) = duplex(4096);
        let mut link = Link::new(Box::new(local), Duration::from_millis(100));

        // keep the remote end alive but silent
        let result = link.exchange(&Command::Login).await;
        drop(remote);

        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_exchange_gives_up_after_resync_window() {
        let (mut link, _remote) = link_over(vec![0x02; RESYNC_WINDOW + 16]);

        let result = link.read_reply().await;
        assert!(matches!(result, Err(TransportError::Desynchronized)));
        assert!(link.carry.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_reports_closed_connection() {
        let (local, remote) = duplex(4096);
        let mut link = Link::new(Box::new(local), Duration::from_millis(100));
        drop(remote);

        let result = link.exchange(&Command::Login).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
