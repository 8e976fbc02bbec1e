use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tokio::sync::RwLock;
use tracing::info;

use airgate_mdns::{awdl_interfaces, multicast_interfaces, MdnsResponder, ServiceInstance};
use airgate_types::{receiver_id, ReceiverFlags};

use crate::channel::Peer;

/// Service type senders browse for.
pub const AIRDROP_SERVICE: &str = "_airdrop._tcp";

/// Service type the bridge's companion clients browse for to find the
/// HTTPS endpoint without prior configuration.
pub const PROXY_SERVICE: &str = "_airdrop_proxy._tcp";

struct Registered {
    peer: Arc<Peer>,
    /// Absent only when the registry runs detached from mDNS (tests).
    service: Option<ServiceInstance>,
}

struct RegistryInner {
    peers: RwLock<HashMap<String, Registered>>,
    responder: Option<MdnsResponder>,
    https_port: u16,
    flags: ReceiverFlags,
    awdl_iface: String,
}

/// The peer registry: receiver-id to peer handle plus the mDNS service each
/// one advertises. Routes `Host`-header lookups from the HTTP handlers and
/// owns the `_airdrop._tcp` lifecycle of every peer.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new(
        responder: MdnsResponder,
        https_port: u16,
        flags: ReceiverFlags,
        awdl_iface: String,
    ) -> Self {
        Self::build(Some(responder), https_port, flags, awdl_iface)
    }

    /// A registry with no mDNS behind it, for exercising the HTTP handlers
    /// without sockets or an AWDL interface.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self::build(None, 8443, ReceiverFlags::ADVERTISED, "awdl0".to_string())
    }

    fn build(
        responder: Option<MdnsResponder>,
        https_port: u16,
        flags: ReceiverFlags,
        awdl_iface: String,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                peers: RwLock::new(HashMap::new()),
                responder,
                https_port,
                flags,
                awdl_iface,
            }),
        }
    }

    /// Register a peer: build its `_airdrop._tcp` instance (instance and
    /// host labels are the receiver id) and announce it. Registering the
    /// same id again just replaces the entry.
    pub async fn register_peer(&self, peer: Arc<Peer>) -> Result<()> {
        let id = peer.id().to_string();
        let service = match &self.inner.responder {
            Some(responder) => {
                let service = self.airdrop_service(&id)?;
                responder.register(&service).await;
                Some(service)
            }
            None => None,
        };
        self.inner
            .peers
            .write()
            .await
            .insert(id, Registered { peer, service });
        Ok(())
    }

    /// Remove a peer and send the mDNS goodbye. No-op for unknown ids, so
    /// double-unregistration during teardown is harmless.
    pub async fn unregister_peer(&self, id: &str) {
        let removed = self.inner.peers.write().await.remove(id);
        if let Some(entry) = removed {
            if let (Some(responder), Some(service)) = (&self.inner.responder, &entry.service) {
                responder.unregister(service).await;
            }
        }
    }

    /// Resolve the first `Host`-header label to a peer.
    pub async fn lookup(&self, id: &str) -> Option<Arc<Peer>> {
        self.inner.peers.read().await.get(id).map(|e| e.peer.clone())
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.peers.read().await.len()
    }

    /// Advertise the bridge itself as `_airdrop_proxy._tcp` on every
    /// multicast interface.
    pub async fn publish_proxy(&self) -> Result<()> {
        let Some(responder) = &self.inner.responder else {
            return Ok(());
        };

        let addrs: Vec<IpAddr> = multicast_interfaces()
            .context("interface enumeration failed")?
            .iter()
            .flat_map(|i| i.unicast_addrs())
            .collect();
        ensure!(!addrs.is_empty(), "no address to advertise the proxy on");

        let label = format!("airgate-{}", &receiver_id()[..6]);
        let service = ServiceInstance {
            service: PROXY_SERVICE.to_string(),
            instance: label.clone(),
            host: label,
            port: self.inner.https_port,
            addrs,
            txt: Vec::new(),
        };
        responder.register(&service).await;
        info!("proxy service {} published", service.instance_domain());
        Ok(())
    }

    fn airdrop_service(&self, id: &str) -> Result<ServiceInstance> {
        let addrs: Vec<IpAddr> = awdl_interfaces(&self.inner.awdl_iface)
            .context("interface enumeration failed")?
            .iter()
            .flat_map(|i| i.unicast_addrs())
            .collect();
        ensure!(
            !addrs.is_empty(),
            "awdl interface {} has no usable address",
            self.inner.awdl_iface
        );

        Ok(ServiceInstance {
            service: AIRDROP_SERVICE.to_string(),
            instance: id.to_string(),
            host: id.to_string(),
            port: self.inner.https_port,
            addrs,
            txt: vec![("flags".to_string(), self.inner.flags.txt_value())],
        })
    }
}
