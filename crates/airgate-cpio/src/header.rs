use crate::octal::parse_octal;
use crate::ExtractError;

/// odc header layout: 76 bytes of ASCII, no payload padding anywhere in the
/// archive.
///
/// ```text
/// [0..6]    magic "070707"
/// [6..12]   device        [12..17]  inode
/// [17..23]  mode          [23..29]  uid
/// [29..35]  gid           [35..41]  nlink
/// [41..47]  rdev          [47..58]  mtime
/// [58..59]  reserved
/// [59..65]  namesize      [65..76]  filesize
/// ```
///
/// `namesize` counts the trailing NUL of the name that follows the header.
pub const HEADER_LEN: usize = 76;

/// Magic bytes opening every odc header.
pub const MAGIC: &[u8; 6] = b"070707";

/// Entry name that terminates the archive.
pub const TRAILER: &str = "TRAILER!!!";

const MODE_FMT_MASK: u32 = 0o170000;
const MODE_DIR: u32 = 0o040000;
const MODE_FILE: u32 = 0o100000;

/// What kind of filesystem object an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    /// Symlinks, fifos, devices: skipped during extraction.
    Other,
}

/// The fields of one entry header the extractor cares about.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub mode: u32,
    pub kind: EntryKind,
    /// Length of the name that follows, including its trailing NUL.
    pub name_len: usize,
    pub file_size: u64,
}

/// Decode a 76-byte odc header.
pub fn decode_header(buf: &[u8]) -> Result<EntryHeader, ExtractError> {
    debug_assert_eq!(buf.len(), HEADER_LEN);
    if &buf[0..6] != MAGIC {
        return Err(ExtractError::BadMagic);
    }

    let mode = parse_octal(&buf[17..23])
        .map_err(|source| ExtractError::BadOctal { field: "mode", source })?;
    let name_len = parse_octal(&buf[59..65]).map_err(|source| ExtractError::BadOctal {
        field: "namesize",
        source,
    })? as usize;
    let file_size = parse_octal(&buf[65..76]).map_err(|source| ExtractError::BadOctal {
        field: "filesize",
        source,
    })? as u64;

    let kind = match mode & MODE_FMT_MASK {
        MODE_DIR => EntryKind::Directory,
        MODE_FILE => EntryKind::File,
        _ => EntryKind::Other,
    };

    Ok(EntryHeader {
        mode,
        kind,
        name_len,
        file_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octal::format_octal;

    fn raw_header(mode: u32, name_len: u32, file_size: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&format_octal(0, 6)); // device
        buf.extend_from_slice(&format_octal(0, 5)); // inode
        buf.extend_from_slice(&format_octal(mode, 6));
        buf.extend_from_slice(&format_octal(0, 6)); // uid
        buf.extend_from_slice(&format_octal(0, 6)); // gid
        buf.extend_from_slice(&format_octal(1, 6)); // nlink
        buf.extend_from_slice(&format_octal(0, 6)); // rdev
        buf.extend_from_slice(&format_octal(0, 11)); // mtime
        buf.push(b'0'); // reserved
        buf.extend_from_slice(&format_octal(name_len, 6));
        buf.extend_from_slice(&format_octal(file_size, 11));
        assert_eq!(buf.len(), HEADER_LEN);
        buf
    }

    #[test]
    fn decodes_regular_file() {
        let raw = raw_header(0o100644, 9, 33);
        let header = decode_header(&raw).unwrap();
        assert_eq!(header.kind, EntryKind::File);
        assert_eq!(header.name_len, 9);
        assert_eq!(header.file_size, 33);
    }

    #[test]
    fn decodes_directory_and_other() {
        let dir = decode_header(&raw_header(0o040755, 5, 0)).unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);

        let link = decode_header(&raw_header(0o120777, 5, 4)).unwrap();
        assert_eq!(link.kind, EntryKind::Other);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut raw = raw_header(0o100644, 2, 0);
        raw[0] = b'0';
        raw[5] = b'1';
        assert!(matches!(
            decode_header(&raw),
            Err(ExtractError::BadMagic)
        ));
    }

    #[test]
    fn rejects_bad_octal() {
        let mut raw = raw_header(0o100644, 2, 0);
        raw[20] = b'9'; // inside the mode field
        assert!(matches!(
            decode_header(&raw),
            Err(ExtractError::BadOctal { field: "mode", .. })
        ));
    }
}
