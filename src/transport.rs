//! Network transport layer for ISO-on-TCP communication
//!
//! The [`S7Transport`] trait abstracts one synchronous request/response
//! exchange of TPKT frames; [`TcpTransport`] implements it over a blocking
//! `TcpStream` with per-operation timeouts (applied to each send and each
//! recv). Receiving is driven by the TPKT length field: a 4-byte header
//! read followed by an exact read of the remainder.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::constants::{MAX_FRAME_SIZE, TPKT_SIZE, TPKT_VERSION};
use crate::error::{S7Error, S7Result};

/// Counters for frames and bytes exchanged over a transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames sent.
    pub requests_sent: u64,
    /// Frames received.
    pub responses_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// I/O errors observed.
    pub errors: u64,
}

/// One synchronous TPKT frame exchange.
///
/// Implementations own the socket; every error that reaches the caller has
/// already been mapped into the library's error taxonomy.
pub trait S7Transport {
    /// Send a frame and receive the complete response frame.
    fn exchange(&mut self, frame: &[u8]) -> S7Result<Vec<u8>>;

    /// True while the underlying connection is usable.
    fn is_connected(&self) -> bool;

    /// Close the connection; idempotent.
    fn close(&mut self) -> S7Result<()>;

    /// Transfer statistics.
    fn stats(&self) -> TransportStats;
}

/// Blocking TCP transport for ISO-on-TCP (port 102).
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    connected: bool,
    stats: TransportStats,
}

impl TcpTransport {
    /// Resolve `host:port` and connect with the given timeout; the same
    /// timeout is installed as the per-operation read/write timeout.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> S7Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| S7Error::connection(format!("failed to resolve {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| {
                S7Error::connection(format!("no address found for {host}:{port}"))
            })?;

        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
            if e.kind() == std::io::ErrorKind::TimedOut {
                S7Error::timeout(format!("connecting to {addr} timed out"))
            } else {
                S7Error::connection(format!("failed to connect to {addr}: {e}"))
            }
        })?;

        stream
            .set_nodelay(true)
            .and_then(|_| stream.set_read_timeout(Some(timeout)))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
            .map_err(|e| S7Error::connection(format!("failed to configure socket: {e}")))?;

        debug!(%addr, ?timeout, "TCP transport connected");
        Ok(Self {
            stream,
            peer: addr,
            connected: true,
            stats: TransportStats::default(),
        })
    }

    /// Peer address of this transport.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> S7Result<()> {
        self.stream.read_exact(buf).map_err(map_io_error)
    }
}

/// Map socket errors into the library taxonomy: timeouts stay timeouts,
/// everything else is a communication failure.
fn map_io_error(e: std::io::Error) -> S7Error {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            S7Error::timeout(format!("socket operation timed out: {e}"))
        }
        std::io::ErrorKind::UnexpectedEof => {
            S7Error::communication("the connection has been closed by the peer")
        }
        _ => S7Error::communication(format!("socket error: {e}")),
    }
}

impl S7Transport for TcpTransport {
    fn exchange(&mut self, frame: &[u8]) -> S7Result<Vec<u8>> {
        if !self.connected {
            return Err(S7Error::connection("transport is closed"));
        }

        let result = (|| {
            self.stream.write_all(frame).map_err(map_io_error)?;
            self.stats.requests_sent += 1;
            self.stats.bytes_sent += frame.len() as u64;

            let mut header = [0u8; TPKT_SIZE];
            self.recv_exact(&mut header)?;
            if header[0] != TPKT_VERSION {
                return Err(S7Error::protocol(format!(
                    "invalid TPKT version 0x{:02X} from the peer",
                    header[0]
                )));
            }
            let total = u16::from_be_bytes([header[2], header[3]]) as usize;
            if !(TPKT_SIZE..=MAX_FRAME_SIZE).contains(&total) {
                return Err(S7Error::protocol(format!(
                    "invalid TPKT length {total} from the peer"
                )));
            }

            let mut response = vec![0u8; total];
            response[..TPKT_SIZE].copy_from_slice(&header);
            self.recv_exact(&mut response[TPKT_SIZE..])?;

            self.stats.responses_received += 1;
            self.stats.bytes_received += total as u64;
            Ok(response)
        })();

        if result.is_err() {
            self.stats.errors += 1;
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) -> S7Result<()> {
        if self.connected {
            self.connected = false;
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
            debug!(peer = %self.peer, "TCP transport closed");
        }
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .field("connected", &self.connected)
            .finish()
    }
}
