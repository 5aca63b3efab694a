pub mod noop;

use log::debug;
use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

/// Port WoL listeners conventionally watch ("discard").
pub const WOL_PORT: u16 = 9;

/// The local side of the segment packets are broadcast on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Link {
    pub addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl Link {
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(broadcast_octets(self.addr.octets(), self.netmask.octets()))
    }

    pub fn wol_destination(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.broadcast(), WOL_PORT))
    }
}

/// Sets every host bit of `addr`, for any address width.
pub fn broadcast_octets<const N: usize>(addr: [u8; N], netmask: [u8; N]) -> [u8; N] {
    let mut out = addr;
    for (o, m) in out.iter_mut().zip(netmask) {
        *o |= !m;
    }
    out
}

pub trait Transport: Send {
    /// Returns the link to broadcast on, or `None` while the network is down.
    fn link(&self) -> Option<Link>;
    /// Sends one datagram, returning the number of bytes written.
    fn send_to(&mut self, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;
}

/// Broadcasts over a real UDP socket, reading the local address and netmask
/// from the OS interface table on every call.
pub struct UdpBroadcast {
    interface: Option<String>,
    socket: Option<UdpSocket>,
}

impl UdpBroadcast {
    /// `interface` pins the transport to one interface by name; otherwise the
    /// first up, broadcast-capable LAN interface with an IPv4 address wins.
    pub fn new(interface: Option<String>) -> Self {
        UdpBroadcast {
            interface,
            socket: None,
        }
    }

    fn socket(&mut self) -> io::Result<&UdpSocket> {
        if self.socket.is_none() {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
            socket.set_broadcast(true)?;
            self.socket = Some(socket);
        }
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no socket"))
    }
}

fn ipv4_link(interface: &NetworkInterface) -> Option<Link> {
    interface.ips.iter().find_map(|net| match net {
        IpNetwork::V4(v4) => Some(Link {
            addr: v4.ip(),
            netmask: v4.mask(),
        }),
        IpNetwork::V6(_) => None,
    })
}

// Point-to-point links (e.g. a /32 tunnel) have no subnet to broadcast on.
fn is_lan_candidate(interface: &NetworkInterface) -> bool {
    interface.is_broadcast() && !interface.is_point_to_point()
}

fn select_link(interfaces: &[NetworkInterface], name: Option<&str>) -> Option<Link> {
    interfaces
        .iter()
        .filter(|i| i.is_up() && !i.is_loopback())
        .filter(|i| match name {
            Some(n) => i.name == n,
            None => is_lan_candidate(i),
        })
        .find_map(ipv4_link)
}

impl Transport for UdpBroadcast {
    fn link(&self) -> Option<Link> {
        let link = select_link(&datalink::interfaces(), self.interface.as_deref());
        debug!("link for {:?}: {:?}", self.interface, link);
        link
    }

    fn send_to(&mut self, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        let sent = self.socket()?.send_to(payload, dest);
        if sent.is_err() {
            // Rebind next time; the interface may have changed underneath.
            self.socket = None;
        }
        sent
    }
}
