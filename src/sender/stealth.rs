use std::net::{Ipv4Addr, SocketAddr};
use std::os::fd::OwnedFd;
use tracing::debug;
use crate::errors::KnockError;
use crate::knock::{Knock, Transport};
use crate::packet::syn_segment::{SynSegment, PROBE_SRC_PORT};
use crate::rawsocket;
use crate::sender::simple::SimpleSender;
use crate::sender::Sender;

/// Knocks with hand-built SYN segments over a raw socket. Needs CAP_NET_RAW.
///
/// The kernel has no socket for the probe, so it answers the target's SYN-ACK
/// with a RST and the handshake never completes. UDP knocks have no handshake
/// to hide and go out as plain datagrams.
#[derive(Debug)]
pub struct StealthSender {
    fd: OwnedFd,
    src_ip: Option<(Ipv4Addr, Ipv4Addr)>, // (target, local address used toward it)
    datagrams: SimpleSender,
}

impl StealthSender {
    pub fn new() -> Result<Self, KnockError> {
        let fd = rawsocket::new_send_socket()?;
        Ok(StealthSender {
            fd,
            src_ip: None,
            datagrams: SimpleSender::default(),
        })
    }

    fn source_for(&mut self, host: Ipv4Addr) -> Result<Ipv4Addr, KnockError> {
        match self.src_ip {
            Some((target, src_ip)) if target == host => Ok(src_ip),
            _ => {
                let src_ip = rawsocket::lookup_local_ip(host)?;
                self.src_ip = Some((host, src_ip));
                Ok(src_ip)
            }
        }
    }
}

impl Sender for StealthSender {
    fn knock(&mut self, host: Ipv4Addr, knock: &Knock) -> Result<(), KnockError> {
        match knock.transport {
            Transport::Udp => self.datagrams.knock_udp(SocketAddr::from((host, knock.port)), &knock.payload),
            Transport::Tcp => {
                let src_ip = self.source_for(host)?;
                let segment = SynSegment::new(PROBE_SRC_PORT, knock.port, &knock.payload).to_bytes(src_ip, host)?;
                let n = rawsocket::send_segment(&self.fd, &segment, host)?;
                debug!(%src_ip, %host, port = knock.port, bytes = n, "sent SYN probe");
                Ok(())
            }
        }
    }
}
