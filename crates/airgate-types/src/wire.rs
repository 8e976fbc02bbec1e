use plist::Data;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Hard cap on plist bodies, both directions. AirDrop control-plane payloads
/// are small; anything larger is either corrupt or hostile.
pub const MAX_PLIST_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PlistError {
    #[error("plist body is {len} bytes, cap is {MAX_PLIST_BYTES}")]
    TooLarge { len: usize },
    #[error("plist decode failed: {0}")]
    Decode(#[source] plist::Error),
    #[error("plist encode failed: {0}")]
    Encode(#[source] plist::Error),
}

/// Decode an Apple binary plist (or XML plist, the library sniffs) into a
/// typed record. Fails on bodies over [`MAX_PLIST_BYTES`].
pub fn decode_plist<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PlistError> {
    if bytes.len() > MAX_PLIST_BYTES {
        return Err(PlistError::TooLarge { len: bytes.len() });
    }
    plist::from_bytes(bytes).map_err(PlistError::Decode)
}

/// Encode a typed record as an Apple binary plist. Fails if the output would
/// exceed [`MAX_PLIST_BYTES`].
pub fn encode_plist<T: Serialize>(value: &T) -> Result<Vec<u8>, PlistError> {
    let mut buf = Vec::new();
    plist::to_writer_binary(&mut buf, value).map_err(PlistError::Encode)?;
    if buf.len() > MAX_PLIST_BYTES {
        return Err(PlistError::TooLarge { len: buf.len() });
    }
    Ok(buf)
}

// ── HTTP endpoint bodies ────────────────────────────────────────────────
//
// Field names on the wire are Apple's; the serde renames pin them so the
// in-memory names can stay idiomatic.

/// Body of `POST /Discover`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverRequest {
    /// CMS-signed contact record, absent when the sender is in Everyone mode.
    #[serde(
        rename = "SenderRecordData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_record_data: Option<Data>,
}

/// Response of `POST /Discover`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverResponse {
    #[serde(rename = "ReceiverComputerName")]
    pub receiver_computer_name: String,
    #[serde(rename = "ReceiverModelName")]
    pub receiver_model_name: String,
    /// UTF-8 JSON blob; currently always `{"Version":1}`.
    #[serde(rename = "ReceiverMediaCapabilities")]
    pub receiver_media_capabilities: Data,
}

impl DiscoverResponse {
    pub fn for_receiver(name: &str) -> Self {
        Self {
            receiver_computer_name: name.to_string(),
            receiver_model_name: name.to_string(),
            receiver_media_capabilities: Data::from(br#"{"Version":1}"#.to_vec()),
        }
    }
}

/// Body of `POST /Ask`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    #[serde(rename = "SenderComputerName", default)]
    pub sender_computer_name: String,
    #[serde(rename = "SenderModelName", default)]
    pub sender_model_name: String,
    /// Sender's mDNS instance name.
    #[serde(rename = "SenderID", default)]
    pub sender_id: String,
    #[serde(rename = "BundleID", default)]
    pub bundle_id: String,
    /// JPEG 2000 preview of the first item, when the sender includes one.
    #[serde(rename = "FileIcon", default, skip_serializing_if = "Option::is_none")]
    pub file_icon: Option<Data>,
    #[serde(rename = "Files", default)]
    pub files: Vec<AskRequestFile>,
    #[serde(
        rename = "SenderRecordData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_record_data: Option<Data>,
}

/// One file entry in an [`AskRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequestFile {
    #[serde(rename = "FileName", default)]
    pub file_name: String,
    #[serde(rename = "FileType", default)]
    pub file_type: String,
    #[serde(rename = "FileIsDirectory", default)]
    pub file_is_directory: bool,
    #[serde(rename = "ConvertMediaFormats", default)]
    pub convert_media_formats: bool,
    #[serde(rename = "FileBomPath", default, skip_serializing_if = "Option::is_none")]
    pub file_bom_path: Option<String>,
}

/// Response of `POST /Ask` when the peer accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponseBody {
    #[serde(rename = "ReceiverComputerName")]
    pub receiver_computer_name: String,
    #[serde(rename = "ReceiverModelName")]
    pub receiver_model_name: String,
}

/// The contact record carried inside a verified `SenderRecordData` blob.
///
/// Decoded for completeness; the bridge runs in Everyone mode and never
/// filters on it. A contact-restricted mode would compare the validated
/// hashes against a stored contact set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderContactRecord {
    #[serde(rename = "ValidatedEmailHashes", default)]
    pub validated_email_hashes: Vec<String>,
    #[serde(rename = "ValidatedPhoneHashes", default)]
    pub validated_phone_hashes: Vec<String>,
    #[serde(rename = "ValidAsOf", default, skip_serializing_if = "Option::is_none")]
    pub valid_as_of: Option<plist::Date>,
    #[serde(rename = "encDsID", default, skip_serializing_if = "Option::is_none")]
    pub enc_ds_id: Option<String>,
    #[serde(
        rename = "SuggestValidDuration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub suggest_valid_duration: Option<i64>,
}
