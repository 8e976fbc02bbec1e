use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{anyhow, bail, Result};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use airgate_types::wire::AskRequest;
use airgate_types::{receiver_id, AskedFile, HubFrame, HubMessage};

use crate::registry::Registry;

/// A connected back-end peer.
///
/// Created when the WebSocket arrives, destroyed on disconnect. The channel
/// tasks are the only writer of `display_name`; everything else reads.
pub struct Peer {
    id: String,
    display_name: RwLock<String>,
    outbound: mpsc::UnboundedSender<Outbound>,
    /// Scheme+authority the peer reached us on; file links are built on it.
    base_url: String,
}

pub(crate) struct Outbound {
    pub(crate) frame: HubFrame,
    pub(crate) reply: Option<oneshot::Sender<HubFrame>>,
}

impl Peer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> String {
        self.display_name
            .read()
            .expect("display name lock poisoned")
            .clone()
    }

    fn set_display_name(&self, name: String) {
        *self
            .display_name
            .write()
            .expect("display name lock poisoned") = name;
    }

    /// URL the peer can download an uploaded file from.
    pub fn file_url(&self, path: &str) -> String {
        format!("{}/files/{}", self.base_url, path)
    }

    /// Enqueue a request and wait for the peer's reply, matched by id.
    pub async fn request(&self, message: HubMessage) -> Result<HubFrame> {
        let (tx, rx) = oneshot::channel();
        let frame = HubFrame::request(message);
        self.outbound
            .send(Outbound {
                frame,
                reply: Some(tx),
            })
            .map_err(|_| anyhow!("peer {} channel closed", self.id))?;
        rx.await
            .map_err(|_| anyhow!("peer {} went away before replying", self.id))
    }

    /// Forward an AirDrop `/Ask` to the peer; true means accepted.
    pub async fn ask(&self, ask: &AskRequest) -> Result<bool> {
        let files = ask
            .files
            .iter()
            .map(|f| AskedFile {
                name: f.file_name.clone(),
                kind: f.file_type.clone(),
                directory: f.file_is_directory,
            })
            .collect();
        let icon = ask
            .file_icon
            .as_ref()
            .map(|d| base64::engine::general_purpose::STANDARD.encode(d.as_ref()));

        let reply = self
            .request(HubMessage::AskRequest {
                sender_name: ask.sender_computer_name.clone(),
                sender_model: ask.sender_model_name.clone(),
                bundle_id: ask.bundle_id.clone(),
                icon,
                files,
            })
            .await?;

        match reply.message {
            HubMessage::AskResponse { accepted } => Ok(accepted),
            other => bail!("peer answered ask with {}", variant_name(&other)),
        }
    }

    /// Tell the peer a file is ready and wait for its ack.
    pub async fn notify_uploaded(&self, name: &str, url: &str) -> Result<()> {
        let reply = self
            .request(HubMessage::FileUploadRequest {
                name: name.to_string(),
                url: url.to_string(),
            })
            .await?;
        match reply.message {
            HubMessage::FileUploadResponse { ok: true } => Ok(()),
            HubMessage::FileUploadResponse { ok: false } => {
                bail!("peer refused uploaded file {name}")
            }
            other => bail!("peer acked upload with {}", variant_name(&other)),
        }
    }
}

/// Table of in-flight requests awaiting a `replyTo`.
///
/// Owned by one channel; the std Mutex guards map touches only and is never
/// held across an await.
#[derive(Clone, Default)]
struct PendingReplies(Arc<Mutex<HashMap<String, oneshot::Sender<HubFrame>>>>);

impl PendingReplies {
    fn track(&self, id: String, tx: oneshot::Sender<HubFrame>) {
        self.0.lock().expect("pending lock poisoned").insert(id, tx);
    }

    /// Route a reply frame to its waiter. False when nobody is waiting.
    fn complete(&self, frame: HubFrame) -> bool {
        let Some(reply_to) = frame.reply_to.clone() else {
            return false;
        };
        let slot = self
            .0
            .lock()
            .expect("pending lock poisoned")
            .remove(&reply_to);
        match slot {
            Some(tx) => {
                // The waiter may have been cancelled; that is fine.
                let _ = tx.send(frame);
                true
            }
            None => false,
        }
    }

    /// Drop every waiter, failing their one-shots.
    fn fail_all(&self) {
        self.0.lock().expect("pending lock poisoned").clear();
    }
}

/// Drive one peer connection to completion.
///
/// Registers the peer (allocating its receiver id and mDNS advertisement),
/// then pumps the socket until either side closes or the root cancellation
/// fires. On the way out every pending reply fails and the peer is
/// unregistered; a second disconnect finds nothing left to undo.
pub async fn handle_peer(
    socket: WebSocket,
    registry: Registry,
    base_url: String,
    cancel: CancellationToken,
) {
    let id = receiver_id();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let peer = Arc::new(Peer {
        id: id.clone(),
        display_name: RwLock::new(id.clone()),
        outbound: out_tx,
        base_url,
    });

    if let Err(e) = registry.register_peer(peer.clone()).await {
        warn!("peer {id} registration failed: {e}");
        return;
    }
    info!("peer {id} connected");

    let (mut sender, mut receiver) = socket.split();
    let pending = PendingReplies::default();

    let send_pending = pending.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            // Track before the bytes hit the wire so a fast reply always
            // finds its waiter.
            if let Some(reply) = out.reply {
                send_pending.track(out.frame.id.clone(), reply);
            }
            let text = match serde_json::to_string(&out.frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!("unserialisable hub frame dropped: {e}");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_pending = pending.clone();
    let recv_peer = peer.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<HubFrame>(&text) {
                    Ok(frame) => dispatch_frame(&recv_peer, &recv_pending, frame),
                    Err(e) => {
                        warn!(
                            "peer {} bad frame: {e} -- raw: {}",
                            recv_peer.id,
                            &text[..text.len().min(200)]
                        );
                    }
                },
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = cancel.cancelled() => {
            send_task.abort();
            recv_task.abort();
        }
    }

    pending.fail_all();
    registry.unregister_peer(&id).await;
    info!("peer {id} disconnected");
}

/// Inbound frame routing: replies complete their waiter, unsolicited frames
/// are handled in place, everything else is logged and dropped.
fn dispatch_frame(peer: &Peer, pending: &PendingReplies, frame: HubFrame) {
    if frame.reply_to.is_some() {
        let reply_to = frame.reply_to.clone().unwrap_or_default();
        if !pending.complete(frame) {
            warn!("peer {} replied to unknown id {reply_to}", peer.id);
        }
        return;
    }
    match frame.message {
        HubMessage::Connect { name } => {
            info!("peer {} identifies as {name:?}", peer.id);
            peer.set_display_name(name);
        }
        other => {
            debug!(
                "peer {} sent unsolicited {}, ignored",
                peer.id,
                variant_name(&other)
            );
        }
    }
}

fn variant_name(message: &HubMessage) -> &'static str {
    match message {
        HubMessage::Connect { .. } => "connect",
        HubMessage::AskRequest { .. } => "askRequest",
        HubMessage::AskResponse { .. } => "askResponse",
        HubMessage::FileUploadRequest { .. } => "fileUploadRequest",
        HubMessage::FileUploadResponse { .. } => "fileUploadResponse",
    }
}

/// A peer with no socket behind it: tests drive the outbound queue directly
/// and complete the reply one-shots themselves.
#[cfg(test)]
pub(crate) fn stub_peer(id: &str) -> (Arc<Peer>, mpsc::UnboundedReceiver<Outbound>) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let peer = Arc::new(Peer {
        id: id.to_string(),
        display_name: RwLock::new(id.to_string()),
        outbound: out_tx,
        base_url: "https://gateway.local:8443".into(),
    });
    (peer, out_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_peer() -> (Arc<Peer>, mpsc::UnboundedReceiver<Outbound>) {
        stub_peer("testpeer0001")
    }

    /// Emulate the writer task: move the reply slot into the pending table.
    fn writer_step(pending: &PendingReplies, out: Outbound) -> HubFrame {
        if let Some(reply) = out.reply {
            pending.track(out.frame.id.clone(), reply);
        }
        out.frame
    }

    #[tokio::test]
    async fn concurrent_asks_complete_by_id_not_order() {
        let (peer, mut out_rx) = test_peer();
        let pending = PendingReplies::default();

        let mut waits = Vec::new();
        for i in 0..8 {
            let peer = peer.clone();
            waits.push(tokio::spawn(async move {
                peer.request(HubMessage::FileUploadRequest {
                    name: format!("file{i}"),
                    url: format!("https://x/files/{i}"),
                })
                .await
            }));
        }

        let mut frames = Vec::new();
        for _ in 0..8 {
            frames.push(writer_step(&pending, out_rx.recv().await.unwrap()));
        }

        // Replies arrive in reverse order; correlation is by id.
        for frame in frames.iter().rev() {
            let reply = HubFrame::reply(&frame.id, HubMessage::FileUploadResponse { ok: true });
            dispatch_frame(&peer, &pending, reply);
        }

        for wait in waits {
            let reply = wait.await.unwrap().unwrap();
            assert!(matches!(
                reply.message,
                HubMessage::FileUploadResponse { ok: true }
            ));
        }
    }

    #[tokio::test]
    async fn unknown_reply_is_dropped_without_damage() {
        let (peer, mut out_rx) = test_peer();
        let pending = PendingReplies::default();

        let ask = {
            let peer = peer.clone();
            tokio::spawn(async move {
                peer.ask(&AskRequest {
                    sender_computer_name: "iPhone".into(),
                    ..Default::default()
                })
                .await
            })
        };

        let frame = writer_step(&pending, out_rx.recv().await.unwrap());

        // A reply for an id nobody asked about: logged, dropped.
        let stray = HubFrame::reply("not-a-real-id", HubMessage::AskResponse { accepted: true });
        dispatch_frame(&peer, &pending, stray);

        // The real reply still lands.
        let real = HubFrame::reply(&frame.id, HubMessage::AskResponse { accepted: false });
        dispatch_frame(&peer, &pending, real);

        assert!(!ask.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn ask_rejection_surfaces_as_false() {
        let (peer, mut out_rx) = test_peer();
        let pending = PendingReplies::default();

        let ask = {
            let peer = peer.clone();
            tokio::spawn(async move { peer.ask(&AskRequest::default()).await })
        };
        let frame = writer_step(&pending, out_rx.recv().await.unwrap());
        dispatch_frame(
            &peer,
            &pending,
            HubFrame::reply(&frame.id, HubMessage::AskResponse { accepted: false }),
        );
        assert!(!ask.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn disconnect_fails_every_pending_reply() {
        let (peer, mut out_rx) = test_peer();
        let pending = PendingReplies::default();

        let mut waits = Vec::new();
        for _ in 0..4 {
            let peer = peer.clone();
            waits.push(tokio::spawn(async move {
                peer.request(HubMessage::AskRequest {
                    sender_name: "x".into(),
                    sender_model: "y".into(),
                    bundle_id: "z".into(),
                    icon: None,
                    files: vec![],
                })
                .await
            }));
        }
        for _ in 0..4 {
            writer_step(&pending, out_rx.recv().await.unwrap());
        }

        pending.fail_all();

        for wait in waits {
            assert!(wait.await.unwrap().is_err());
        }
    }

    #[tokio::test]
    async fn connect_updates_display_name() {
        let (peer, _out_rx) = test_peer();
        let pending = PendingReplies::default();
        assert_eq!(peer.display_name(), "testpeer0001");

        dispatch_frame(
            &peer,
            &pending,
            HubFrame::request(HubMessage::Connect {
                name: "Living Room PC".into(),
            }),
        );
        assert_eq!(peer.display_name(), "Living Room PC");
    }

    #[test]
    fn file_url_shape() {
        let (peer, _out_rx) = test_peer();
        assert_eq!(
            peer.file_url("abc123def456/photo.jpeg"),
            "https://gateway.local:8443/files/abc123def456/photo.jpeg"
        );
    }
}
