use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One frame on the peer channel.
///
/// Every frame carries a unique `id`. Replies set `replyTo` to the `id` of
/// the request they answer; requests originated by the bridge never set it.
/// The message body is flattened, so the wire form is
/// `{"id": "...", "replyTo": "...", "<variant>": { ... }}` with exactly one
/// top-level key naming the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubFrame {
    pub id: String,
    #[serde(rename = "replyTo", default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(flatten)]
    pub message: HubMessage,
}

impl HubFrame {
    /// A request frame with a fresh id and no `replyTo`.
    pub fn request(message: HubMessage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reply_to: None,
            message,
        }
    }

    /// A reply to the frame with id `reply_to`.
    pub fn reply(reply_to: &str, message: HubMessage) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            reply_to: Some(reply_to.to_string()),
            message,
        }
    }
}

/// Messages exchanged with a back-end peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HubMessage {
    /// Peer announces itself after connecting; `name` becomes its display name.
    Connect { name: String },

    /// Bridge asks the peer to approve an incoming transfer.
    AskRequest {
        sender_name: String,
        sender_model: String,
        bundle_id: String,
        /// JPEG preview icon, base64-encoded, when the sender supplied one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
        files: Vec<AskedFile>,
    },

    /// Peer's verdict on an `askRequest`.
    AskResponse { accepted: bool },

    /// Bridge tells the peer a file finished uploading and where to fetch it.
    FileUploadRequest { name: String, url: String },

    /// Peer acknowledges a `fileUploadRequest`.
    FileUploadResponse { ok: bool },
}

/// One file in an `askRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskedFile {
    pub name: String,
    /// Uniform type identifier reported by the sender (e.g. `public.jpeg`).
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub directory: bool,
}
