use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::iface::NetInterface;
use crate::packet::MDNS_PORT;

/// IPv4 mDNS group.
pub const MDNS_V4_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// IPv6 link-local mDNS group.
pub const MDNS_V6_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

/// Address family a socket lane serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

/// The multicast destination for a lane, IPv6 scoped to the interface.
pub fn group_endpoint(family: Family, iface: &NetInterface) -> SocketAddr {
    match family {
        Family::V4 => SocketAddr::V4(SocketAddrV4::new(MDNS_V4_GROUP, MDNS_PORT)),
        Family::V6 => SocketAddr::V6(SocketAddrV6::new(
            MDNS_V6_GROUP,
            MDNS_PORT,
            0,
            iface.index,
        )),
    }
}

fn base_socket(family: Family) -> io::Result<Socket> {
    let domain = match family {
        Family::V4 => Domain::IPV4,
        Family::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if family == Family::V6 {
        socket.set_only_v6(true)?;
    }
    set_recv_anyif(&socket)?;
    Ok(socket)
}

fn into_tokio(socket: Socket) -> io::Result<UdpSocket> {
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// The listener for one interface/family: wildcard-bound on 5353 and joined
/// to the mDNS group scoped to exactly that interface, so datagrams read
/// from it are attributable to the interface without per-packet ancillary
/// data.
pub fn listener(family: Family, iface: &NetInterface) -> io::Result<UdpSocket> {
    let socket = base_socket(family)?;
    match family {
        Family::V4 => {
            let bind: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT));
            socket.bind(&bind.into())?;
            let local = iface.ipv4().next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no ipv4 address")
            })?;
            socket.join_multicast_v4(&MDNS_V4_GROUP, &local)?;
        }
        Family::V6 => {
            let bind: SocketAddr =
                SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, MDNS_PORT, 0, 0));
            socket.bind(&bind.into())?;
            socket.join_multicast_v6(&MDNS_V6_GROUP, iface.index)?;
        }
    }
    into_tokio(socket)
}

/// Unicast reply client: ephemeral port on the interface address so replies
/// egress the right link.
pub fn unicast_client(family: Family, iface: &NetInterface) -> io::Result<UdpSocket> {
    let socket = base_socket(family)?;
    let bind = local_endpoint(family, iface, 0)?;
    socket.bind(&bind.into())?;
    into_tokio(socket)
}

/// Multicast reply client: bound to the interface address on 5353, with the
/// outgoing multicast interface pinned and TTL 255 per mDNS convention.
pub fn multicast_client(family: Family, iface: &NetInterface) -> io::Result<UdpSocket> {
    let socket = base_socket(family)?;
    match family {
        Family::V4 => {
            let local = iface.ipv4().next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no ipv4 address")
            })?;
            socket.set_multicast_if_v4(&local)?;
            socket.set_multicast_ttl_v4(255)?;
        }
        Family::V6 => {
            socket.set_multicast_if_v6(iface.index)?;
            socket.set_multicast_hops_v6(255)?;
        }
    }
    let bind = local_endpoint(family, iface, MDNS_PORT)?;
    socket.bind(&bind.into())?;
    into_tokio(socket)
}

fn local_endpoint(family: Family, iface: &NetInterface, port: u16) -> io::Result<SocketAddr> {
    match family {
        Family::V4 => {
            let addr = iface.ipv4().next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no ipv4 address")
            })?;
            Ok(SocketAddr::V4(SocketAddrV4::new(addr, port)))
        }
        Family::V6 => {
            let addr = iface.ipv6().next().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "no ipv6 address")
            })?;
            Ok(SocketAddr::V6(SocketAddrV6::new(addr, port, 0, iface.index)))
        }
    }
}

/// Ask the kernel to deliver packets arriving on any interface, including
/// Apple's AWDL virtual interface. Must be applied before bind.
#[cfg(target_os = "macos")]
fn set_recv_anyif(socket: &Socket) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SO_RECV_ANYIF is not in the libc crate; the value is stable ABI.
    const SO_RECV_ANYIF: libc::c_int = 0x1104;
    let enable: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            SO_RECV_ANYIF,
            &enable as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "macos"))]
fn set_recv_anyif(_socket: &Socket) -> io::Result<()> {
    Ok(())
}
