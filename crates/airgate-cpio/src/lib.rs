/// Streaming extractor for CPIO archives in the portable ASCII (odc) format,
/// the container AirDrop senders wrap uploads in.
///
/// The reader is push-driven: callers feed it byte buffers of any size and it
/// never needs the whole archive in memory. Entry names are sandboxed to the
/// extraction root; hostile archives fail instead of escaping it.
pub mod extract;
pub mod header;
pub mod octal;

pub use extract::{extract, Extractor};
pub use header::{decode_header, EntryHeader, EntryKind, HEADER_LEN, MAGIC, TRAILER};
pub use octal::{format_octal, parse_octal, OctalError};

/// Errors surfaced while reading an archive.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("bad cpio magic (want 070707)")]
    BadMagic,
    #[error("bad octal in {field} field: {source}")]
    BadOctal {
        field: &'static str,
        #[source]
        source: OctalError,
    },
    #[error("entry name escapes the extraction root: {name:?}")]
    PathTraversal { name: String },
    #[error("archive truncated before trailer")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
