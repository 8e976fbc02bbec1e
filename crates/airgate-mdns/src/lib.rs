/// Multicast DNS responder and resolver.
///
/// The responder owns a fleet of UDP sockets (one listener plus unicast and
/// multicast reply clients per interface and address family), answers
/// queries for services registered in its authoritative catalog, and fans
/// every non-query datagram out to active discovery walks. The AWDL
/// interface gets the one raw socket option it needs behind a platform
/// module, so the crate compiles and runs unchanged off-macOS.
pub mod catalog;
pub mod iface;
pub mod packet;
pub mod responder;
pub mod service;
pub mod sockets;

pub use catalog::Catalog;
pub use iface::{awdl_interfaces, multicast_interfaces, AwdlPlatform, NetInterface, NoopAwdl};
pub use packet::{Message, Name, Question, RData, Record, MAX_PACKET_LEN, MDNS_PORT};
pub use responder::{MdnsResponder, ServiceEndpoint, DISCOVER_TIMEOUT};
pub use service::{ServiceInstance, RECORD_TTL};

/// Errors raised by the mDNS layer.
#[derive(Debug, thiserror::Error)]
pub enum MdnsError {
    #[error("dns message truncated")]
    Truncated,
    #[error("dns label exceeds 63 bytes")]
    LabelTooLong,
    #[error("dns name exceeds 255 bytes")]
    NameTooLong,
    #[error("dns compression pointer loop")]
    PointerLoop,
    #[error("encoded packet would be {len} bytes, cap is {MAX_PACKET_LEN}")]
    PacketTooLarge { len: usize },
    #[error("no usable multicast interface")]
    NoInterfaces,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
