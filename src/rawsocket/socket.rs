use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, UdpSocket};
use std::os::fd::{AsRawFd, OwnedFd};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use nix::errno::Errno;
use nix::sys::socket::{sendto, socket, AddressFamily, MsgFlags, SockFlag, SockProtocol, SockType, SockaddrIn};
use tracing::debug;
use crate::errors::KnockError;

// Any port works for a route lookup, nothing is sent
const DISCARD_PORT: u16 = 9;

/// Raw IPv4 socket for hand-built TCP segments. The kernel still writes the IP header.
pub fn new_send_socket() -> Result<OwnedFd, Errno> {
    socket(AddressFamily::Inet, SockType::Raw, SockFlag::empty(), SockProtocol::Tcp)
}

/// Send one encoded TCP segment to `dst_ip`. Returns bytes written.
pub fn send_segment(fd: &OwnedFd, segment: &[u8], dst_ip: Ipv4Addr) -> Result<usize, Errno> {
    // Port is ignored for raw sockets, the segment carries its own
    let addr = SockaddrIn::from(SocketAddrV4::new(dst_ip, 0));
    sendto(fd.as_raw_fd(), segment, &addr, MsgFlags::empty())
}

/// Lookup the local IPv4 address the kernel will put in the IP header toward `dst_ip`.
///
/// Asks the routing table first. Interfaces are only scanned when no route
/// can be resolved.
pub fn lookup_local_ip(dst_ip: Ipv4Addr) -> Result<Ipv4Addr, KnockError> {
    if dst_ip.is_loopback() {
        return Ok(Ipv4Addr::LOCALHOST);
    }

    match route_source_ip(dst_ip) {
        Ok(src_ip) => return Ok(src_ip),
        Err(e) => debug!(%dst_ip, error = %e, "no route lookup, scanning interfaces"),
    }

    let interfaces = NetworkInterface::show().map_err(|_| KnockError::LocalAddress)?;
    let candidates: Vec<(Ipv4Addr, Option<Ipv4Addr>)> = interfaces
        .into_iter()
        .flat_map(|interface| interface.addr)
        .filter_map(|addr| match addr {
            Addr::V4(v4_addr) => Some((v4_addr.ip, v4_addr.netmask)),
            Addr::V6(_) => None,
        })
        .collect();

    pick_source_ip(&candidates, dst_ip).ok_or(KnockError::LocalAddress)
}

/// Source address of the route toward `dst_ip`. Connecting a UDP socket sends
/// nothing but makes the kernel pick the route and bind its source address.
fn route_source_ip(dst_ip: Ipv4Addr) -> io::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((dst_ip, DISCARD_PORT))?;

    match socket.local_addr()?.ip() {
        IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
        other => Err(io::Error::new(io::ErrorKind::AddrNotAvailable, format!("route picked {}", other))),
    }
}

/// Prefer an address on the same subnet as `dst_ip`, else the first non-loopback one.
fn pick_source_ip(candidates: &[(Ipv4Addr, Option<Ipv4Addr>)], dst_ip: Ipv4Addr) -> Option<Ipv4Addr> {
    let same_subnet = candidates.iter().find(|(ip, netmask)| match netmask {
        Some(mask) => {
            let mask = u32::from(*mask);
            !ip.is_loopback() && u32::from(*ip) & mask == u32::from(dst_ip) & mask
        }
        None => false,
    });

    same_subnet
        .or_else(|| candidates.iter().find(|(ip, _)| !ip.is_loopback()))
        .map(|(ip, _)| *ip)
}

// -- Unit tests --
