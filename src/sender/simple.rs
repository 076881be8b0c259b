use std::io::{Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;
use crate::errors::KnockError;
use crate::knock::{Knock, Transport};
use crate::sender::Sender;

/// Default upper bound on how long a UDP knock waits before the next one.
pub const UDP_SETTLE: Duration = Duration::from_millis(200);

/// Knocks with ordinary sockets: connect, write the payload, hang up.
///
/// A UDP knock is done once the listener acknowledges the datagram with an
/// empty reply, or after `udp_settle` when no reply comes.
#[derive(Debug, Clone)]
pub struct SimpleSender {
    pub connect_timeout: Duration,
    pub udp_settle: Duration,
}

impl Default for SimpleSender {
    fn default() -> Self {
        SimpleSender::new(Duration::from_secs(2))
    }
}

impl SimpleSender {
    pub fn new(connect_timeout: Duration) -> Self {
        SimpleSender {
            connect_timeout,
            udp_settle: UDP_SETTLE,
        }
    }

    fn knock_tcp(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), KnockError> {
        let send_err = |source| KnockError::Send { port: addr.port(), source };

        let mut stream = TcpStream::connect_timeout(&addr, self.connect_timeout).map_err(send_err)?;
        stream.write_all(payload).map_err(send_err)?;

        // Wait for the listener to hang up so the next knock can't overtake this one
        let _ = stream.shutdown(Shutdown::Write);
        let _ = stream.set_read_timeout(Some(self.connect_timeout));
        let mut sink = [0u8; 64];
        let _ = stream.read(&mut sink);

        Ok(())
    }

    pub(crate) fn knock_udp(&self, addr: SocketAddr, payload: &[u8]) -> Result<(), KnockError> {
        let send_err = |source| KnockError::Send { port: addr.port(), source };

        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(send_err)?;
        socket.connect(addr).map_err(send_err)?;
        socket.send(payload).map_err(send_err)?;

        // Datagrams to different steps can be picked up out of order, so hold
        // the next knock until this one is acknowledged or has had time to land
        let started = Instant::now();
        let _ = socket.set_read_timeout(Some(self.udp_settle.max(Duration::from_millis(1))));
        let mut ack = [0u8; 1];
        if let Err(e) = socket.recv(&mut ack) {
            // Refused or timed out, either way nothing more is coming
            debug!(port = addr.port(), error = %e, "no acknowledgement for UDP knock");
            thread::sleep(self.udp_settle.saturating_sub(started.elapsed()));
        }
        Ok(())
    }
}

impl Sender for SimpleSender {
    fn knock(&mut self, host: Ipv4Addr, knock: &Knock) -> Result<(), KnockError> {
        let addr = SocketAddr::from((host, knock.port));
        match knock.transport {
            Transport::Tcp => self.knock_tcp(addr, &knock.payload),
            Transport::Udp => self.knock_udp(addr, &knock.payload),
        }
    }
}

// -- Unit tests --
