use std::path::{Component, Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::header::{decode_header, EntryHeader, EntryKind, HEADER_LEN, TRAILER};
use crate::ExtractError;

enum State {
    /// Waiting for the next 76-byte header.
    Header,
    /// Waiting for the entry name (`name_len` bytes incl. trailing NUL).
    Name(EntryHeader),
    /// Skipping over the payload of an entry we do not materialise.
    Skip { remaining: u64 },
    /// Streaming payload bytes into an open output file.
    Data {
        file: File,
        path: PathBuf,
        remaining: u64,
    },
    /// Saw the trailer. All further input is ignored.
    End,
}

/// Push-driven odc reader extracting into a sandboxed output directory.
///
/// Feed it buffers of any size: extracting an archive one byte at a time
/// produces exactly the same tree as feeding it in one piece. Call
/// [`Extractor::finish`] at end of input to get the created files; a stream
/// that ends before the trailer is a truncation error. On failure, whatever
/// was already extracted is left on disk for the caller to clean up.
pub struct Extractor {
    root: PathBuf,
    state: State,
    /// Partial header/name bytes carried across feed() calls.
    stash: Vec<u8>,
    created: Vec<PathBuf>,
}

impl Extractor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: State::Header,
            stash: Vec::new(),
            created: Vec::new(),
        }
    }

    /// True once the trailer has been consumed.
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::End)
    }

    /// Consume one buffer of archive bytes.
    pub async fn feed(&mut self, mut input: &[u8]) -> Result<(), ExtractError> {
        loop {
            match &mut self.state {
                State::Header => {
                    let Some(raw) = take_exact(&mut self.stash, &mut input, HEADER_LEN) else {
                        return Ok(());
                    };
                    let header = decode_header(&raw)?;
                    self.state = State::Name(header);
                }

                State::Name(header) => {
                    let header = header.clone();
                    let Some(raw) = take_exact(&mut self.stash, &mut input, header.name_len)
                    else {
                        return Ok(());
                    };
                    self.state = self.begin_entry(&header, &raw).await?;
                }

                State::Skip { remaining } => {
                    if *remaining == 0 {
                        self.state = State::Header;
                        continue;
                    }
                    let n = (*remaining).min(input.len() as u64) as usize;
                    if n == 0 {
                        return Ok(());
                    }
                    *remaining -= n as u64;
                    input = &input[n..];
                }

                State::Data {
                    file,
                    path,
                    remaining,
                } => {
                    let n = (*remaining).min(input.len() as u64) as usize;
                    if n == 0 {
                        return Ok(());
                    }
                    file.write_all(&input[..n]).await?;
                    *remaining -= n as u64;
                    input = &input[n..];

                    if *remaining == 0 {
                        file.flush().await?;
                        let path = path.clone();
                        debug!("extracted {}", path.display());
                        self.created.push(path);
                        self.state = State::Header;
                    }
                }

                State::End => return Ok(()),
            }
        }
    }

    /// End of input: return the files created, in archive order.
    pub fn finish(self) -> Result<Vec<PathBuf>, ExtractError> {
        match self.state {
            State::End => Ok(self.created),
            _ => Err(ExtractError::Truncated),
        }
    }

    /// Decide what to do with an entry once its name is known.
    async fn begin_entry(
        &mut self,
        header: &EntryHeader,
        raw_name: &[u8],
    ) -> Result<State, ExtractError> {
        let name = String::from_utf8_lossy(strip_nul(raw_name)).into_owned();

        if name == TRAILER {
            return Ok(State::End);
        }
        if name.is_empty() || name == "." || name == ".." {
            return Ok(State::Skip {
                remaining: header.file_size,
            });
        }

        let Some(relative) = sanitize_name(&name)? else {
            return Ok(State::Skip {
                remaining: header.file_size,
            });
        };

        if header.kind != EntryKind::File {
            return Ok(State::Skip {
                remaining: header.file_size,
            });
        }

        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;

        if header.file_size == 0 {
            // Nothing to stream; record it and move straight on.
            self.created.push(path);
            return Ok(State::Header);
        }

        Ok(State::Data {
            file,
            path,
            remaining: header.file_size,
        })
    }
}

/// Turn an archive entry name into a path that cannot leave the root.
///
/// Both `/` and `\` act as separators; leading separators and `./` segments
/// are dropped, so absolute names are re-rooted. Any `..` component is a
/// traversal attempt and fails the extraction. Returns `None` when nothing
/// usable remains (e.g. the name was just `/`).
fn sanitize_name(name: &str) -> Result<Option<PathBuf>, ExtractError> {
    let mut out = PathBuf::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(ExtractError::PathTraversal {
                    name: name.to_string(),
                })
            }
            other => {
                // A component that still smuggles path syntax (drive prefix
                // and the like) must not re-anchor the path.
                match Path::new(other).components().next() {
                    Some(Component::Normal(_)) | None => {}
                    _ => {
                        return Err(ExtractError::PathTraversal {
                            name: name.to_string(),
                        })
                    }
                }
                out.push(other);
            }
        }
    }
    if out.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(out))
    }
}

fn strip_nul(raw: &[u8]) -> &[u8] {
    match raw.last() {
        Some(0) => &raw[..raw.len() - 1],
        _ => raw,
    }
}

/// Assemble exactly `n` bytes from the stash plus the front of `input`.
/// Returns `None` (stashing everything) when fewer than `n` are available.
fn take_exact(stash: &mut Vec<u8>, input: &mut &[u8], n: usize) -> Option<Vec<u8>> {
    if stash.len() + input.len() < n {
        stash.extend_from_slice(input);
        *input = &[];
        return None;
    }
    let from_input = n - stash.len();
    let mut out = std::mem::take(stash);
    out.extend_from_slice(&input[..from_input]);
    *input = &input[from_input..];
    Some(out)
}

/// Drive an [`Extractor`] from an `AsyncRead` of already-decompressed archive
/// bytes. Stops reading once the trailer is seen; trailing bytes past it are
/// the caller's to drain or drop.
pub async fn extract<R>(mut reader: R, root: &Path) -> Result<Vec<PathBuf>, ExtractError>
where
    R: AsyncRead + Unpin,
{
    let mut extractor = Extractor::new(root);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        extractor.feed(&buf[..n]).await?;
        if extractor.is_finished() {
            break;
        }
    }
    extractor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_accepts_nested_relative_paths() {
        let path = sanitize_name("test3/test4/test.csv").unwrap().unwrap();
        assert_eq!(path, PathBuf::from("test3/test4/test.csv"));
    }

    #[test]
    fn sanitize_reroots_absolute_names() {
        let path = sanitize_name("/etc/hostname").unwrap().unwrap();
        assert_eq!(path, PathBuf::from("etc/hostname"));
    }

    #[test]
    fn sanitize_rejects_dot_dot() {
        assert!(matches!(
            sanitize_name("../../etc/passwd"),
            Err(ExtractError::PathTraversal { .. })
        ));
        assert!(matches!(
            sanitize_name("ok/../../escape"),
            Err(ExtractError::PathTraversal { .. })
        ));
        assert!(matches!(
            sanitize_name("..\\..\\windows\\system32"),
            Err(ExtractError::PathTraversal { .. })
        ));
    }

    #[test]
    fn sanitize_drops_empty_and_dot_segments() {
        let path = sanitize_name("./a//b/./c").unwrap().unwrap();
        assert_eq!(path, PathBuf::from("a/b/c"));
        assert!(sanitize_name("/").unwrap().is_none());
    }

    #[test]
    fn take_exact_spans_buffers() {
        let mut stash = Vec::new();
        let mut first: &[u8] = b"abc";
        assert!(take_exact(&mut stash, &mut first, 5).is_none());
        assert_eq!(stash, b"abc");

        let mut second: &[u8] = b"defgh";
        let got = take_exact(&mut stash, &mut second, 5).unwrap();
        assert_eq!(got, b"abcde");
        assert_eq!(second, b"fgh");
        assert!(stash.is_empty());
    }
}
