use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

use airgate_cpio::ExtractError;
use airgate_types::wire::{
    decode_plist, encode_plist, AskRequest, AskResponseBody, DiscoverRequest, DiscoverResponse,
    MAX_PLIST_BYTES,
};
use airgate_types::receiver_id;

use crate::channel::{self, Peer};
use crate::registry::Registry;
use crate::state::AppState;

/// Body cap for `/Upload`: AirDrop batches can be large.
const MAX_UPLOAD_BYTES: usize = 4 * 1024 * 1024 * 1024;

/// Content type Apple sends archives with.
const CPIO_CONTENT_TYPE: &str = "application/x-cpio";

// ── Routing prelude ─────────────────────────────────────────────────────

/// Resolve the request's `Host` header to a registered peer: the substring
/// before the first `.` (port stripped) is the receiver id. Runs before any
/// body read, so unknown hosts cost nothing.
async fn host_peer(registry: &Registry, headers: &HeaderMap) -> Result<Arc<Peer>, StatusCode> {
    let label = host_label(headers).ok_or(StatusCode::BAD_REQUEST)?;
    registry.lookup(label).await.ok_or_else(|| {
        info!("no peer registered for host label {label:?}");
        StatusCode::NOT_FOUND
    })
}

fn host_label(headers: &HeaderMap) -> Option<&str> {
    let host = headers.get(header::HOST)?.to_str().ok()?;
    let host = host.split(':').next()?;
    let label = host.split('.').next()?;
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn plist_response<T: Serialize>(value: &T) -> Result<Response, StatusCode> {
    let bytes = encode_plist(value).map_err(|e| {
        warn!("response plist encode failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

// ── Handlers ────────────────────────────────────────────────────────────

/// POST /Discover: validate the (optional) signed sender record and answer
/// with the receiver identity.
pub async fn discover(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, StatusCode> {
    let peer = host_peer(&state.registry, &headers).await?;

    let bytes = axum::body::to_bytes(body, MAX_PLIST_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let request: DiscoverRequest = decode_plist(&bytes).map_err(|e| {
        warn!("discover body undecodable: {e}");
        StatusCode::BAD_REQUEST
    })?;

    match request.sender_record_data {
        Some(record) if !record.as_ref().is_empty() => {
            let contact = state.verifier.verify(record.as_ref()).map_err(|e| {
                warn!("sender record rejected: {e:#}");
                StatusCode::BAD_REQUEST
            })?;
            // Everyone mode: decoded but never filtered on.
            info!(
                "discover from sender with {} validated contact hash(es)",
                contact.validated_email_hashes.len() + contact.validated_phone_hashes.len()
            );
        }
        _ => {
            info!("discover without sender record (everyone mode)");
        }
    }

    plist_response(&DiscoverResponse::for_receiver(&peer.display_name()))
}

/// POST /Ask: relay the transfer request to the peer; 406 when it declines.
pub async fn ask(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, StatusCode> {
    let peer = host_peer(&state.registry, &headers).await?;

    let bytes = axum::body::to_bytes(body, MAX_PLIST_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let request: AskRequest = decode_plist(&bytes).map_err(|e| {
        warn!("ask body undecodable: {e}");
        StatusCode::BAD_REQUEST
    })?;

    info!(
        "ask from {:?} ({} file(s)) for peer {}",
        request.sender_computer_name,
        request.files.len(),
        peer.id()
    );

    let accepted = peer.ask(&request).await.map_err(|e| {
        warn!("ask relay to peer {} failed: {e}", peer.id());
        StatusCode::BAD_GATEWAY
    })?;

    if !accepted {
        info!("peer {} declined the transfer", peer.id());
        return Ok(StatusCode::NOT_ACCEPTABLE.into_response());
    }

    plist_response(&AskResponseBody {
        receiver_computer_name: peer.display_name(),
        receiver_model_name: peer.display_name(),
    })
}

/// POST /Upload: inflate the gzip'd CPIO body, extract it into a staging
/// dir, hand every file to the peer, then drop the staging dir.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, StatusCode> {
    let peer = host_peer(&state.registry, &headers).await?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with(CPIO_CONTENT_TYPE) {
        warn!("upload with content type {content_type:?} refused");
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let batch = receiver_id();
    let staging = std::env::temp_dir().join(format!("airgate-{batch}"));
    tokio::fs::create_dir_all(&staging).await.map_err(|e| {
        warn!("staging dir {} failed: {e}", staging.display());
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let outcome = match receive_archive(body, &staging).await {
        Ok(files) => {
            info!(
                "upload for peer {} extracted {} file(s)",
                peer.id(),
                files.len()
            );
            deliver(&state, &peer, &batch, &staging, files).await
        }
        Err(ExtractError::PathTraversal { name }) => {
            warn!("upload rejected: traversal in entry {name:?}");
            Err(StatusCode::BAD_REQUEST)
        }
        Err(e) => {
            warn!("upload extraction failed: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    // Best-effort staging cleanup on both paths.
    if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
        warn!("staging cleanup {} failed: {e}", staging.display());
    }

    outcome.map(|()| StatusCode::OK)
}

/// Stream the request body through the gzip decoder into the extractor.
/// Apple compresses the archive but sends no `Content-Encoding` header.
async fn receive_archive(body: Body, staging: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let stream = body
        .into_data_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let reader = StreamReader::new(stream);
    let decoder = async_compression::tokio::bufread::GzipDecoder::new(reader);
    airgate_cpio::extract(decoder, staging).await
}

/// Move each extracted file into the exposed upload tree and wait for the
/// peer to ack its `fileUploadRequest`.
async fn deliver(
    state: &AppState,
    peer: &Peer,
    batch: &str,
    staging: &Path,
    files: Vec<PathBuf>,
) -> Result<(), StatusCode> {
    for file in files {
        let rel = file
            .strip_prefix(staging)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .to_path_buf();
        let url_path = state
            .uploads
            .publish(&file, batch, &rel)
            .await
            .map_err(|e| {
                warn!("publishing {} failed: {e}", file.display());
                StatusCode::INTERNAL_SERVER_ERROR
            })?;

        let name = rel.to_string_lossy().into_owned();
        let url = peer.file_url(&url_path);
        peer.notify_uploaded(&name, &url).await.map_err(|e| {
            warn!("upload notification to peer {} failed: {e}", peer.id());
            StatusCode::BAD_GATEWAY
        })?;
    }
    Ok(())
}

/// GET /hub: a back-end peer connecting its full-duplex channel.
pub async fn hub_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let authority = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string();
    let base_url = format!("https://{authority}");
    let registry = state.registry.clone();
    let cancel = state.cancel.child_token();
    ws.on_upgrade(move |socket| channel::handle_peer(socket, registry, base_url, cancel))
}

/// GET /health: liveness check.
pub async fn health() -> &'static str {
    "ok"
}

/// Upper bound handed to the router's body limit layer.
pub const fn upload_body_limit() -> usize {
    MAX_UPLOAD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn headers_with_host(host: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_str(host).unwrap());
        headers
    }

    /// Minimal odc archive with one regular file.
    fn tiny_archive(name: &str, data: &[u8]) -> Vec<u8> {
        use airgate_cpio::{format_octal, MAGIC, TRAILER};
        let mut out = Vec::new();
        for (entry_name, entry_data, mode) in
            [(name, data, 0o100644u32), (TRAILER, &b""[..], 0)]
        {
            out.extend_from_slice(MAGIC);
            out.extend_from_slice(&format_octal(0, 6));
            out.extend_from_slice(&format_octal(1, 5));
            out.extend_from_slice(&format_octal(mode, 6));
            out.extend_from_slice(&format_octal(0, 6));
            out.extend_from_slice(&format_octal(0, 6));
            out.extend_from_slice(&format_octal(1, 6));
            out.extend_from_slice(&format_octal(0, 6));
            out.extend_from_slice(&format_octal(0, 11));
            out.push(b'0');
            out.extend_from_slice(&format_octal(entry_name.len() as u32 + 1, 6));
            out.extend_from_slice(&format_octal(entry_data.len() as u32, 11));
            out.extend_from_slice(entry_name.as_bytes());
            out.push(0);
            out.extend_from_slice(entry_data);
        }
        out
    }

    #[tokio::test]
    async fn receive_archive_inflates_and_extracts() {
        let archive = tiny_archive("report.pdf", b"%PDF-1.4 fake");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&archive).unwrap();
        let gzipped = encoder.finish().unwrap();

        let staging = tempfile::tempdir().unwrap();
        let files = receive_archive(Body::from(gzipped), staging.path())
            .await
            .unwrap();

        assert_eq!(files, vec![staging.path().join("report.pdf")]);
        assert_eq!(std::fs::read(&files[0]).unwrap(), b"%PDF-1.4 fake");
    }

    #[tokio::test]
    async fn receive_archive_rejects_plain_body() {
        // Not gzip at all: the decoder errors out as an IO failure.
        let staging = tempfile::tempdir().unwrap();
        let result = receive_archive(Body::from("not gzip data"), staging.path()).await;
        assert!(result.is_err());
    }

    #[test]
    fn host_label_takes_first_label() {
        let headers = headers_with_host("ab12cd34ef56.local");
        assert_eq!(host_label(&headers), Some("ab12cd34ef56"));
    }

    #[test]
    fn host_label_strips_port() {
        let headers = headers_with_host("ab12cd34ef56.local:8443");
        assert_eq!(host_label(&headers), Some("ab12cd34ef56"));

        let bare = headers_with_host("ab12cd34ef56:8443");
        assert_eq!(host_label(&bare), Some("ab12cd34ef56"));
    }

    #[test]
    fn host_label_rejects_missing_or_empty() {
        assert_eq!(host_label(&HeaderMap::new()), None);
        let empty = headers_with_host(".local");
        assert_eq!(host_label(&empty), None);
    }

    #[test]
    fn plist_response_sets_binary_content_type() {
        let response =
            plist_response(&DiscoverResponse::for_receiver("someone")).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
    }

    // ── Handler-level tests ─────────────────────────────────────────────

    use crate::channel;
    use crate::registry::Registry;
    use crate::uploads::UploadStore;
    use crate::verify::RecordVerifier;
    use airgate_types::{HubFrame, HubMessage};
    use tokio_util::sync::CancellationToken;

    /// App state around a detached registry; the tempdir guard keeps the
    /// upload root alive for the test's duration.
    async fn test_state(registry: Registry) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState {
            registry,
            verifier: Arc::new(RecordVerifier::load(None)),
            uploads: Arc::new(
                UploadStore::new(dir.path().to_path_buf()).await.unwrap(),
            ),
            cancel: CancellationToken::new(),
        };
        (state, dir)
    }

    /// Stub peer loop answering every request with the given verdict.
    fn answer_asks(
        mut out_rx: tokio::sync::mpsc::UnboundedReceiver<channel::Outbound>,
        accepted: bool,
    ) {
        tokio::spawn(async move {
            while let Some(out) = out_rx.recv().await {
                if let Some(reply) = out.reply {
                    let _ = reply.send(HubFrame::reply(
                        &out.frame.id,
                        HubMessage::AskResponse { accepted },
                    ));
                }
            }
        });
    }

    #[tokio::test]
    async fn discover_with_empty_record_returns_display_name() {
        let registry = Registry::detached();
        let (peer, _out_rx) = channel::stub_peer("ab12cd34ef56");
        registry.register_peer(peer).await.unwrap();
        let (state, _dir) = test_state(registry).await;

        let body = Body::from(encode_plist(&DiscoverRequest::default()).unwrap());
        let response = discover(
            State(state),
            headers_with_host("ab12cd34ef56.local"),
            body,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), MAX_PLIST_BYTES)
            .await
            .unwrap();
        let decoded: DiscoverResponse = decode_plist(&bytes).unwrap();
        assert_eq!(decoded.receiver_computer_name, "ab12cd34ef56");
        assert_eq!(decoded.receiver_model_name, "ab12cd34ef56");
    }

    #[tokio::test]
    async fn discover_for_unknown_host_is_404() {
        let (state, _dir) = test_state(Registry::detached()).await;

        let body = Body::from(encode_plist(&DiscoverRequest::default()).unwrap());
        let err = discover(
            State(state),
            headers_with_host("nobodyhome000.local"),
            body,
        )
        .await
        .unwrap_err();

        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ask_declined_by_peer_is_406_with_empty_body() {
        let registry = Registry::detached();
        let (peer, out_rx) = channel::stub_peer("cd34ef56ab12");
        registry.register_peer(peer).await.unwrap();
        answer_asks(out_rx, false);
        let (state, _dir) = test_state(registry).await;

        let request = AskRequest {
            sender_computer_name: "Pat's iPhone".into(),
            ..Default::default()
        };
        let body = Body::from(encode_plist(&request).unwrap());
        let response = ask(
            State(state),
            headers_with_host("cd34ef56ab12.local"),
            body,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
        let bytes = axum::body::to_bytes(response.into_body(), MAX_PLIST_BYTES)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn ask_accepted_by_peer_returns_receiver_names() {
        let registry = Registry::detached();
        let (peer, out_rx) = channel::stub_peer("ef56ab12cd34");
        registry.register_peer(peer).await.unwrap();
        answer_asks(out_rx, true);
        let (state, _dir) = test_state(registry).await;

        let body = Body::from(encode_plist(&AskRequest::default()).unwrap());
        let response = ask(
            State(state),
            headers_with_host("ef56ab12cd34.local"),
            body,
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), MAX_PLIST_BYTES)
            .await
            .unwrap();
        let decoded: AskResponseBody = decode_plist(&bytes).unwrap();
        assert_eq!(decoded.receiver_computer_name, "ef56ab12cd34");
    }
}
