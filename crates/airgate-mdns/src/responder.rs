use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::catalog::Catalog;
use crate::iface::{AwdlPlatform, NetInterface};
use crate::packet::{Message, Name, Question, RData, Record, MAX_PACKET_LEN, TYPE_PTR};
use crate::service::ServiceInstance;
use crate::sockets::{self, Family};
use crate::MdnsError;

/// Default client-side discovery timeout.
pub const DISCOVER_TIMEOUT: Duration = Duration::from_secs(30);

/// A `(host, port)` pair produced by a discovery walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub host: String,
    pub port: u16,
}

/// One interface × family slice of the socket fleet.
struct Lane {
    iface: NetInterface,
    family: Family,
    unicast: Arc<UdpSocket>,
    multicast: Arc<UdpSocket>,
    group: SocketAddr,
}

struct Inner {
    catalog: Catalog,
    lanes: Vec<Lane>,
    watchers: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    next_watcher: AtomicU64,
    cancel: CancellationToken,
    platform: Arc<dyn AwdlPlatform>,
}

/// The mDNS responder/resolver.
///
/// Spawning it builds three sockets per interface and address family (a
/// group-joined listener plus unicast and multicast reply clients) and one
/// receive task per listener. Registered service instances are answered
/// authoritatively; non-query traffic feeds active discovery walks.
#[derive(Clone)]
pub struct MdnsResponder {
    inner: Arc<Inner>,
}

impl MdnsResponder {
    /// Bring the fleet up on `interfaces`. The cancellation token closes
    /// every listener loop; `platform` is invoked before any socket exists
    /// and again at shutdown.
    pub fn spawn(
        interfaces: Vec<NetInterface>,
        platform: Arc<dyn AwdlPlatform>,
        cancel: CancellationToken,
    ) -> Result<Self, MdnsError> {
        if interfaces.is_empty() {
            return Err(MdnsError::NoInterfaces);
        }
        platform.start_awdl()?;

        let mut lanes = Vec::new();
        let mut listeners = Vec::new();
        for iface in &interfaces {
            for family in [Family::V4, Family::V6] {
                let has_family = match family {
                    Family::V4 => iface.ipv4().next().is_some(),
                    Family::V6 => iface.ipv6().next().is_some(),
                };
                if !has_family {
                    continue;
                }
                let listener = match sockets::listener(family, iface) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("mdns listener on {} ({family:?}) failed: {e}", iface.name);
                        continue;
                    }
                };
                let unicast = sockets::unicast_client(family, iface)?;
                let multicast = sockets::multicast_client(family, iface)?;
                lanes.push(Lane {
                    iface: iface.clone(),
                    family,
                    unicast: Arc::new(unicast),
                    multicast: Arc::new(multicast),
                    group: sockets::group_endpoint(family, iface),
                });
                listeners.push((lanes.len() - 1, listener));
            }
        }
        if lanes.is_empty() {
            return Err(MdnsError::NoInterfaces);
        }

        let inner = Arc::new(Inner {
            catalog: Catalog::new(),
            lanes,
            watchers: Mutex::new(HashMap::new()),
            next_watcher: AtomicU64::new(1),
            cancel,
            platform,
        });

        for (lane_idx, listener) in listeners {
            let inner = inner.clone();
            tokio::spawn(run_listener(inner, lane_idx, listener));
        }

        let responder = Self { inner };
        info!(
            "mdns responder up on {} socket lane(s)",
            responder.inner.lanes.len()
        );
        Ok(responder)
    }

    /// Add an instance's records to the catalog and announce them
    /// unsolicited on every multicast client. Re-registering the same
    /// instance overwrites the previous registration.
    pub async fn register(&self, service: &ServiceInstance) {
        let records = service.records();
        self.inner.catalog.register(&service.owner_key(), records.clone());
        info!(
            "registered {} ({} records)",
            service.instance_domain(),
            records.len()
        );
        self.announce(records).await;
    }

    /// Remove an instance and send the goodbye (TTL 0). A second unregister
    /// of the same instance is a no-op.
    pub async fn unregister(&self, service: &ServiceInstance) {
        let removed = self.inner.catalog.remove_owner(&service.owner_key());
        if removed.is_empty() {
            return;
        }
        info!("unregistered {}", service.instance_domain());
        self.announce(service.goodbye_records()).await;
    }

    /// Best-effort multicast announcement; mDNS tolerates duplicates and
    /// losses.
    async fn announce(&self, records: Vec<Record>) {
        let msg = Message::response(records);
        let bytes = match msg.encode() {
            Ok(b) => b,
            Err(e) => {
                warn!("announcement encode failed, not sent: {e}");
                return;
            }
        };
        for lane in &self.inner.lanes {
            if let Err(e) = lane.multicast.send_to(&bytes, lane.group).await {
                debug!("announce on {} failed: {e}", lane.iface.name);
            }
        }
    }

    /// Start a discovery for `service` (bare type, e.g. `_airdrop_proxy._tcp`).
    ///
    /// Sends a PTR query on every lane and lazily yields `(host, port)`
    /// pairs as PTR→SRV chains complete, until `timeout` elapses or the
    /// responder shuts down.
    pub fn discover(
        &self,
        service: &str,
        timeout: Duration,
    ) -> mpsc::UnboundedReceiver<ServiceEndpoint> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();

        let handle = self.inner.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.inner
            .watchers
            .lock()
            .expect("watcher lock poisoned")
            .insert(handle, watch_tx);

        let inner = self.inner.clone();
        let service_domain = Name::new(format!("{service}.local"));
        tokio::spawn(async move {
            let query = Message::query(Question::new(service_domain.clone(), TYPE_PTR));
            match query.encode() {
                Ok(bytes) => {
                    for lane in &inner.lanes {
                        if let Err(e) = lane.multicast.send_to(&bytes, lane.group).await {
                            debug!("discover query on {} failed: {e}", lane.iface.name);
                        }
                    }
                }
                Err(e) => warn!("discover query encode failed: {e}"),
            }

            let mut walk = DiscoveryWalk::new(service_domain);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    _ = inner.cancel.cancelled() => break,
                    msg = watch_rx.recv() => {
                        let Some(msg) = msg else { break };
                        for endpoint in walk.absorb(&msg) {
                            if out_tx.send(endpoint).is_err() {
                                break;
                            }
                        }
                    }
                }
            }

            inner
                .watchers
                .lock()
                .expect("watcher lock poisoned")
                .remove(&handle);
        });

        out_rx
    }

    /// Stop the fleet: reverse the platform hook and cancel every listener.
    pub fn shutdown(&self) {
        if let Err(e) = self.inner.platform.stop_awdl() {
            warn!("awdl platform stop failed: {e}");
        }
        self.inner.cancel.cancel();
    }
}

async fn run_listener(inner: Arc<Inner>, lane_idx: usize, listener: UdpSocket) {
    let lane = &inner.lanes[lane_idx];
    let mut buf = vec![0u8; MAX_PACKET_LEN];
    loop {
        let (len, src) = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            recv = listener.recv_from(&mut buf) => match recv {
                Ok(pair) => pair,
                Err(e) => {
                    // Listener task terminates on socket error; the operator
                    // restarts the process rather than us respawning here.
                    warn!("mdns recv on {} ({:?}) failed: {e}", lane.iface.name, lane.family);
                    break;
                }
            },
        };

        let msg = match Message::decode(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                trace!("undecodable datagram from {src}: {e}");
                continue;
            }
        };

        if msg.is_query() {
            handle_query(&inner, lane, msg, src).await;
        } else {
            fan_out(&inner, msg);
        }
    }
    debug!(
        "mdns listener on {} ({:?}) exited",
        lane.iface.name, lane.family
    );
}

async fn handle_query(inner: &Inner, lane: &Lane, mut query: Message, src: SocketAddr) {
    let Some((response, unicast)) = resolve_query(&inner.catalog, &mut query) else {
        return;
    };
    let bytes = match response.encode() {
        Ok(b) => b,
        Err(e) => {
            debug!("response to {src} dropped: {e}");
            return;
        }
    };
    let result = if unicast {
        lane.unicast.send_to(&bytes, src).await
    } else {
        lane.multicast.send_to(&bytes, lane.group).await
    };
    if let Err(e) = result {
        debug!("reply on {} failed: {e}", lane.iface.name);
    }
}

/// Answer a query from the catalog.
///
/// Clears the unicast-response bit from every question; the reply goes
/// unicast if any question carried it. Returns `None` (send nothing) when no
/// record matches.
fn resolve_query(catalog: &Catalog, query: &mut Message) -> Option<(Message, bool)> {
    let mut unicast = false;
    let mut answers: Vec<Record> = Vec::new();
    for question in &mut query.questions {
        if question.take_unicast_bit() {
            unicast = true;
        }
        answers.extend(catalog.answers(&question.name, question.qtype));
    }
    if answers.is_empty() {
        return None;
    }
    Some((Message::response(answers), unicast))
}

fn fan_out(inner: &Inner, msg: Message) {
    let mut watchers = inner.watchers.lock().expect("watcher lock poisoned");
    if watchers.is_empty() {
        return;
    }
    watchers.retain(|_, tx| tx.send(msg.clone()).is_ok());
}

/// Incremental PTR→SRV walk over incoming response messages.
struct DiscoveryWalk {
    service: Name,
    instances: HashSet<Name>,
    seen: HashSet<(String, u16)>,
}

impl DiscoveryWalk {
    fn new(service: Name) -> Self {
        Self {
            service,
            instances: HashSet::new(),
            seen: HashSet::new(),
        }
    }

    /// Feed one response; returns any endpoints newly completed by it.
    fn absorb(&mut self, msg: &Message) -> Vec<ServiceEndpoint> {
        let records = || msg.answers.iter().chain(&msg.additionals);

        for record in records() {
            if let RData::Ptr(target) = &record.rdata {
                if record.name == self.service {
                    self.instances.insert(target.clone());
                }
            }
        }

        let mut found = Vec::new();
        for record in records() {
            if let RData::Srv { port, target, .. } = &record.rdata {
                if self.instances.contains(&record.name) {
                    let key = (target.as_str().to_ascii_lowercase(), *port);
                    if self.seen.insert(key) {
                        found.push(ServiceEndpoint {
                            host: target.as_str().to_string(),
                            port: *port,
                        });
                    }
                }
            }
        }
        found
    }
}
