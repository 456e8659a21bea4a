//! Physical links: a TCP socket or a serial line, split into halves.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use armory_core::config::{Parity, SerialEndpointConfig, TcpEndpointConfig};
use armory_core::constants::DEFAULT_CONNECT_TIMEOUT_MS;
use bytes::{Bytes, BytesMut};
use serialport::SerialPort;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{Result, TransportError};

const TCP_READ_CHUNK: usize = 1024;

/// Serial bytes separated by less than this gap belong to one message.
const SERIAL_IDLE_GAP: Duration = Duration::from_millis(20);

/// Flush threshold for a serial line that never goes idle.
const SERIAL_MAX_PENDING: usize = 4096;

const SERIAL_CHUNK_CAPACITY: usize = 32;

/// Where a client connects to.
#[derive(Debug, Clone)]
pub(crate) enum LinkTarget {
    Tcp(TcpEndpointConfig),
    Serial(SerialEndpointConfig),
}

impl LinkTarget {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Tcp(config) => format!("tcp://{}", config.address()),
            Self::Serial(config) => format!("serial://{}@{}", config.path, config.baud_rate),
        }
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        match self {
            Self::Tcp(config) => config.connect_timeout(),
            Self::Serial(_) => Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    pub(crate) async fn open(&self) -> Result<(LinkReader, LinkWriter)> {
        match self {
            Self::Tcp(config) => {
                let stream = TcpStream::connect(config.address()).await?;
                stream.set_nodelay(true)?;
                let (reader, writer) = stream.into_split();
                Ok((LinkReader::Tcp(reader), LinkWriter::Tcp(writer)))
            }
            Self::Serial(config) => open_serial(config.clone()).await,
        }
    }
}

async fn open_serial(config: SerialEndpointConfig) -> Result<(LinkReader, LinkWriter)> {
    let name = config.path.clone();
    let (read_port, write_port) = tokio::task::spawn_blocking(move || {
        let port = serialport::new(&config.path, config.baud_rate)
            .data_bits(data_bits(config.data_bits))
            .stop_bits(stop_bits(config.stop_bits))
            .parity(parity(config.parity))
            .timeout(SERIAL_IDLE_GAP)
            .open()?;
        let clone = port.try_clone()?;
        Ok::<_, TransportError>((port, clone))
    })
    .await
    .map_err(|e| TransportError::ConnectFailed(e.to_string()))??;

    let (tx, rx) = mpsc::channel(SERIAL_CHUNK_CAPACITY);
    std::thread::Builder::new()
        .name(format!("serial-reader {name}"))
        .spawn(move || serial_read_loop(read_port, tx))?;

    Ok((
        LinkReader::Serial(rx),
        LinkWriter::Serial(Arc::new(Mutex::new(write_port))),
    ))
}

/// Blocking reader for a serial line.
///
/// Bytes are coalesced until the line stays idle for one read timeout, so a
/// board frame split across several reads is delivered as one chunk. The loop
/// ends once the session drops its receiver.
fn serial_read_loop(mut port: Box<dyn SerialPort>, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut chunk = [0u8; 256];
    let mut pending = BytesMut::new();

    while !tx.is_closed() {
        match port.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                if pending.len() >= SERIAL_MAX_PENDING
                    && tx.blocking_send(Ok(pending.split().freeze())).is_err()
                {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                if !pending.is_empty() && tx.blocking_send(Ok(pending.split().freeze())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                debug!(error = %e, "Serial read failed");
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    trace!("Serial reader stopped");
}

fn data_bits(bits: u8) -> serialport::DataBits {
    match bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn stop_bits(bits: u8) -> serialport::StopBits {
    if bits == 2 {
        serialport::StopBits::Two
    } else {
        serialport::StopBits::One
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

/// Inbound half of an open link.
pub(crate) enum LinkReader {
    Tcp(OwnedReadHalf),
    Serial(mpsc::Receiver<io::Result<Bytes>>),
}

impl LinkReader {
    /// Next chunk of bytes, or `None` once the peer closed the link.
    ///
    /// Cancel safe.
    pub(crate) async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self {
            Self::Tcp(stream) => {
                let mut buf = BytesMut::with_capacity(TCP_READ_CHUNK);
                let n = stream.read_buf(&mut buf).await?;
                Ok((n > 0).then(|| buf.freeze()))
            }
            Self::Serial(rx) => rx.recv().await.transpose(),
        }
    }
}

/// Outbound half of an open link.
pub(crate) enum LinkWriter {
    Tcp(OwnedWriteHalf),
    Serial(Arc<Mutex<Box<dyn SerialPort>>>),
}

impl LinkWriter {
    pub(crate) async fn write_all(&mut self, data: Bytes) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => {
                stream.write_all(&data).await?;
                stream.flush().await
            }
            Self::Serial(port) => {
                let port = Arc::clone(port);
                tokio::task::spawn_blocking(move || {
                    let mut port = port.lock().unwrap_or_else(PoisonError::into_inner);
                    port.write_all(&data)?;
                    port.flush()
                })
                .await
                .map_err(io::Error::other)?
            }
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        if let Self::Tcp(stream) = self {
            let _ = stream.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(5, serialport::DataBits::Five)]
    #[case(7, serialport::DataBits::Seven)]
    #[case(8, serialport::DataBits::Eight)]
    #[case(9, serialport::DataBits::Eight)]
    fn test_data_bits(#[case] bits: u8, #[case] expected: serialport::DataBits) {
        assert_eq!(data_bits(bits), expected);
    }

    #[test]
    fn test_describe() {
        let tcp = LinkTarget::Tcp(TcpEndpointConfig {
            host: "10.0.0.5".into(),
            port: 4000,
            ..TcpEndpointConfig::default()
        });
        assert_eq!(tcp.describe(), "tcp://10.0.0.5:4000");

        let serial = LinkTarget::Serial(SerialEndpointConfig::default());
        assert_eq!(serial.describe(), "serial:///dev/ttyUSB0@9600");
        assert_eq!(serial.connect_timeout(), Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS));
    }

    #[tokio::test]
    async fn test_serial_open_missing_device_fails() {
        let target = LinkTarget::Serial(SerialEndpointConfig {
            path: "/dev/armory-test-does-not-exist".into(),
            ..SerialEndpointConfig::default()
        });
        assert!(target.open().await.is_err());
    }
}
