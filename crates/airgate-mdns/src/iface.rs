use std::collections::BTreeMap;
use std::io;
use std::net::IpAddr;

use tracing::debug;

/// A network interface with the addresses the responder binds on.
#[derive(Debug, Clone)]
pub struct NetInterface {
    pub name: String,
    pub index: u32,
    pub addrs: Vec<IpAddr>,
}

impl NetInterface {
    pub fn ipv4(&self) -> impl Iterator<Item = std::net::Ipv4Addr> + '_ {
        self.addrs.iter().filter_map(|a| match a {
            IpAddr::V4(v4) => Some(*v4),
            IpAddr::V6(_) => None,
        })
    }

    pub fn ipv6(&self) -> impl Iterator<Item = std::net::Ipv6Addr> + '_ {
        self.addrs.iter().filter_map(|a| match a {
            IpAddr::V6(v6) => Some(*v6),
            IpAddr::V4(_) => None,
        })
    }

    /// Non-loopback unicast addresses, the set advertised in A/AAAA records.
    pub fn unicast_addrs(&self) -> Vec<IpAddr> {
        self.addrs
            .iter()
            .copied()
            .filter(|a| !a.is_loopback() && !a.is_multicast())
            .collect()
    }
}

/// Enumerate the interfaces the responder should serve: up with at least one
/// address, not loopback, not a PPP link, and carrying an interface index
/// (needed for scoped IPv6 multicast).
pub fn multicast_interfaces() -> io::Result<Vec<NetInterface>> {
    let mut by_name: BTreeMap<String, NetInterface> = BTreeMap::new();

    for iface in if_addrs::get_if_addrs()? {
        if iface.is_loopback() || iface.name.starts_with("ppp") {
            continue;
        }
        let Some(index) = iface.index else {
            debug!("skipping {}: no interface index", iface.name);
            continue;
        };
        let entry = by_name
            .entry(iface.name.clone())
            .or_insert_with(|| NetInterface {
                name: iface.name.clone(),
                index,
                addrs: Vec::new(),
            });
        entry.addrs.push(iface.ip());
    }

    Ok(by_name.into_values().collect())
}

/// The interfaces matching the AWDL policy: by name, `awdl0` unless
/// configured otherwise.
pub fn awdl_interfaces(awdl_name: &str) -> io::Result<Vec<NetInterface>> {
    Ok(multicast_interfaces()?
        .into_iter()
        .filter(|i| i.name == awdl_name)
        .collect())
}

/// Platform hook fired when the responder starts and stops.
///
/// On macOS the system only carries traffic on the AWDL virtual interface
/// while something native asks it to; the embedder supplies that native
/// nudge here. Everywhere else the no-op default applies.
pub trait AwdlPlatform: Send + Sync {
    fn start_awdl(&self) -> io::Result<()> {
        Ok(())
    }

    fn stop_awdl(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Default hook: does nothing.
pub struct NoopAwdl;

impl AwdlPlatform for NoopAwdl {}
