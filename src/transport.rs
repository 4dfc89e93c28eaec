//! Raw UDP primitives for talking to the electronic load.
//!
//! Outbound commands go out on a short-lived socket per call. Inbound
//! replies arrive on a fixed local port; the instrument always answers there
//! regardless of which ephemeral port the command left from, so the receive
//! side can only tell its own traffic apart by the sender's address.

use crate::constants::*;
use crate::error::Result;
use log::{debug, warn};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

/// Addresses of one instrument link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transport {
    remote: SocketAddr,
    local_port: u16,
}

impl Transport {
    pub fn new(remote: SocketAddr, local_port: u16) -> Self {
        Self { remote, local_port }
    }

    /// Instrument address commands are sent to and replies are accepted from
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Unspecified address of the same family as the remote, on `port`
    fn any_addr(&self, port: u16) -> SocketAddr {
        match self.remote {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        }
    }

    /// Send one command line to the instrument. No delivery confirmation.
    pub fn send(&self, message: &str) -> Result<()> {
        let socket = UdpSocket::bind(self.any_addr(0))?;
        debug!("Sending: {}", message);
        let datagram = format!("{}{}", message, LINE_TERMINATOR);
        socket.send_to(datagram.as_bytes(), self.remote)?;
        Ok(())
    }

    /// Bind the local receive port
    pub fn bind_receiver(&self) -> Result<Receiver> {
        let socket = UdpSocket::bind(self.any_addr(self.local_port))?;
        socket.set_read_timeout(Some(Duration::from_millis(RECV_POLL_TIMEOUT_MS)))?;
        Ok(Receiver {
            socket,
            remote: self.remote,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }
}

/// Receive half of a link, owned by the channel's receive loop
#[derive(Debug)]
pub struct Receiver {
    socket: UdpSocket,
    remote: SocketAddr,
    buf: Vec<u8>,
}

impl Receiver {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Wait up to one poll period for a reply line.
    ///
    /// Returns `Ok(None)` when nothing arrived in time or when the datagram
    /// came from anyone other than the configured instrument.
    pub fn recv_line(&mut self) -> Result<Option<String>> {
        let (len, source) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::ConnectionReset
                ) =>
            {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        if source != self.remote {
            warn!("Ignoring packet from {}", source);
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&self.buf[..len]).trim().to_string();
        debug!("Received: {}", line);
        Ok(Some(line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loopback_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    #[test]
    fn send_appends_line_terminator() {
        let instrument = loopback_socket();
        let transport = Transport::new(instrument.local_addr().unwrap(), 0);

        transport.send(":MEASure:VOLTage?").unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = instrument.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b":MEASure:VOLTage?\n");
    }

    #[test]
    fn receiver_trims_lines_from_the_instrument() {
        let instrument = loopback_socket();
        let transport = Transport::new(instrument.local_addr().unwrap(), 0);
        let mut receiver = transport.bind_receiver().unwrap();
        let port = receiver.local_addr().unwrap().port();

        instrument
            .send_to(b"  3.912V\r\n", ("127.0.0.1", port))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let line = loop {
            if let Some(line) = receiver.recv_line().unwrap() {
                break line;
            }
            assert!(Instant::now() < deadline, "no reply received");
        };
        assert_eq!(line, "3.912V");
    }

    #[test]
    fn receiver_drops_foreign_packets() {
        let instrument = loopback_socket();
        let stranger = loopback_socket();
        let transport = Transport::new(instrument.local_addr().unwrap(), 0);
        let mut receiver = transport.bind_receiver().unwrap();
        let port = receiver.local_addr().unwrap().port();

        stranger.send_to(b"ON", ("127.0.0.1", port)).unwrap();
        instrument.send_to(b"OFF", ("127.0.0.1", port)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut lines = Vec::new();
        while lines.is_empty() && Instant::now() < deadline {
            if let Some(line) = receiver.recv_line().unwrap() {
                lines.push(line);
            }
        }
        assert_eq!(lines, vec!["OFF".to_string()]);
    }

    #[test]
    fn receiver_times_out_quietly() {
        let instrument = loopback_socket();
        let transport = Transport::new(instrument.local_addr().unwrap(), 0);
        let mut receiver = transport.bind_receiver().unwrap();

        assert_eq!(receiver.recv_line().unwrap(), None);
    }
}
