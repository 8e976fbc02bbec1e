/// Shared wire types for the airgate bridge.
///
/// Three surfaces meet here:
/// - the JSON hub protocol spoken to back-end peers over the WebSocket channel,
/// - the Apple binary-plist bodies of the AirDrop HTTPS endpoints,
/// - the receiver capability flags advertised in the mDNS TXT record.
pub mod flags;
pub mod hub;
pub mod ids;
pub mod wire;

pub use flags::ReceiverFlags;
pub use hub::{AskedFile, HubFrame, HubMessage};
pub use ids::receiver_id;
pub use wire::{
    decode_plist, encode_plist, AskRequest, AskRequestFile, AskResponseBody, DiscoverRequest,
    DiscoverResponse, PlistError, SenderContactRecord, MAX_PLIST_BYTES,
};
