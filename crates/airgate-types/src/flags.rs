use bitflags::bitflags;

bitflags! {
    /// Receiver capability bits advertised in the `_airdrop._tcp` TXT record.
    ///
    /// The TXT value is the decimal rendering of the raw u16, e.g. `flags=651`.
    /// Senders ignore bits they do not know, so adding one is always
    /// backwards-compatible.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReceiverFlags: u16 {
        /// Receiver accepts URLs (clipboard-style shares).
        const URL = 0x0001;
        /// Receiver understands DvZip-compressed payloads.
        const DVZIP = 0x0002;
        /// Receiver supports pipelined requests.
        const PIPELINING = 0x0004;
        /// Receiver accepts batches mixing file types.
        const MIXED_TYPES = 0x0008;
        /// Receiver supports Iris transfers.
        const IRIS = 0x0040;
        /// Receiver answers `/Discover`.
        const DISCOVER = 0x0080;
        /// Receiver accepts asset bundles.
        const ASSET_BUNDLE = 0x0200;
    }
}

impl ReceiverFlags {
    /// The set the bridge advertises by default. Renders as `651` in TXT.
    pub const ADVERTISED: ReceiverFlags = ReceiverFlags::URL
        .union(ReceiverFlags::DVZIP)
        .union(ReceiverFlags::MIXED_TYPES)
        .union(ReceiverFlags::DISCOVER)
        .union(ReceiverFlags::ASSET_BUNDLE);

    /// Decimal string for the TXT record value.
    pub fn txt_value(self) -> String {
        self.bits().to_string()
    }
}

impl Default for ReceiverFlags {
    fn default() -> Self {
        Self::ADVERTISED
    }
}
