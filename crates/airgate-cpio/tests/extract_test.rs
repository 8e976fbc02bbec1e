/// Integration tests: build odc archives in memory, extract them into a temp
/// dir, and check the resulting tree byte-for-byte.
use airgate_cpio::{extract, format_octal, ExtractError, Extractor, MAGIC, TRAILER};

const FILE_MODE: u32 = 0o100644;
const DIR_MODE: u32 = 0o040755;

fn push_entry(archive: &mut Vec<u8>, name: &str, mode: u32, data: &[u8]) {
    archive.extend_from_slice(MAGIC);
    archive.extend_from_slice(&format_octal(0, 6)); // device
    archive.extend_from_slice(&format_octal(1, 5)); // inode
    archive.extend_from_slice(&format_octal(mode, 6));
    archive.extend_from_slice(&format_octal(0, 6)); // uid
    archive.extend_from_slice(&format_octal(0, 6)); // gid
    archive.extend_from_slice(&format_octal(1, 6)); // nlink
    archive.extend_from_slice(&format_octal(0, 6)); // rdev
    archive.extend_from_slice(&format_octal(0, 11)); // mtime
    archive.push(b'0'); // reserved
    archive.extend_from_slice(&format_octal(name.len() as u32 + 1, 6));
    archive.extend_from_slice(&format_octal(data.len() as u32, 11));
    archive.extend_from_slice(name.as_bytes());
    archive.push(0);
    archive.extend_from_slice(data);
}

fn finish_archive(archive: &mut Vec<u8>) {
    push_entry(archive, TRAILER, 0, b"");
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn single_file() {
    let mut archive = Vec::new();
    let data = pattern(33);
    push_entry(&mut archive, "test.bin", FILE_MODE, &data);
    finish_archive(&mut archive);

    let dir = tempfile::tempdir().unwrap();
    let files = extract(archive.as_slice(), dir.path()).await.unwrap();

    assert_eq!(files, vec![dir.path().join("test.bin")]);
    assert_eq!(std::fs::read(&files[0]).unwrap(), data);
}

#[tokio::test]
async fn many_small_files() {
    let mut archive = Vec::new();
    for i in 0..100 {
        push_entry(
            &mut archive,
            &format!("file{i:02}.bin"),
            FILE_MODE,
            &pattern(1024),
        );
    }
    finish_archive(&mut archive);

    let dir = tempfile::tempdir().unwrap();
    let files = extract(archive.as_slice(), dir.path()).await.unwrap();

    assert_eq!(files.len(), 100);
    for (i, path) in files.iter().enumerate() {
        assert_eq!(path, &dir.path().join(format!("file{i:02}.bin")));
        assert_eq!(std::fs::metadata(path).unwrap().len(), 1024);
    }
}

#[tokio::test]
async fn large_files() {
    let mut archive = Vec::new();
    for i in 0..5 {
        push_entry(
            &mut archive,
            &format!("big{i}.bin"),
            FILE_MODE,
            &pattern(10240),
        );
    }
    finish_archive(&mut archive);

    let dir = tempfile::tempdir().unwrap();
    let files = extract(archive.as_slice(), dir.path()).await.unwrap();

    assert_eq!(files.len(), 5);
    for path in &files {
        assert_eq!(std::fs::read(path).unwrap(), pattern(10240));
    }
}

#[tokio::test]
async fn nested_structure() {
    let mut archive = Vec::new();
    push_entry(&mut archive, "test1", DIR_MODE, b"");
    push_entry(&mut archive, "test1/test.txt", FILE_MODE, b"alpha");
    push_entry(&mut archive, "test2/test.log", FILE_MODE, b"beta");
    push_entry(&mut archive, "./test3/test4/test.csv", FILE_MODE, b"gamma");
    finish_archive(&mut archive);

    let dir = tempfile::tempdir().unwrap();
    let files = extract(archive.as_slice(), dir.path()).await.unwrap();

    assert_eq!(
        files,
        vec![
            dir.path().join("test1/test.txt"),
            dir.path().join("test2/test.log"),
            dir.path().join("test3/test4/test.csv"),
        ]
    );
    assert_eq!(std::fs::read(&files[2]).unwrap(), b"gamma");

    // Everything stays below the extraction root.
    for path in &files {
        assert!(path.starts_with(dir.path()));
    }
}

#[tokio::test]
async fn byte_at_a_time_matches_single_feed() {
    let mut archive = Vec::new();
    push_entry(&mut archive, "a/b/one.bin", FILE_MODE, &pattern(700));
    push_entry(&mut archive, "two.bin", FILE_MODE, b"");
    push_entry(&mut archive, "three.bin", FILE_MODE, &pattern(65));
    finish_archive(&mut archive);

    let whole = tempfile::tempdir().unwrap();
    let whole_files = extract(archive.as_slice(), whole.path()).await.unwrap();

    let trickle = tempfile::tempdir().unwrap();
    let mut extractor = Extractor::new(trickle.path());
    for byte in &archive {
        extractor.feed(std::slice::from_ref(byte)).await.unwrap();
    }
    let trickle_files = extractor.finish().unwrap();

    assert_eq!(whole_files.len(), trickle_files.len());
    for (a, b) in whole_files.iter().zip(&trickle_files) {
        assert_eq!(a.strip_prefix(whole.path()), b.strip_prefix(trickle.path()));
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap());
    }
}

#[tokio::test]
async fn traversal_is_rejected() {
    let mut archive = Vec::new();
    push_entry(&mut archive, "../../etc/passwd", FILE_MODE, b"root:x:0:0");
    finish_archive(&mut archive);

    let dir = tempfile::tempdir().unwrap();
    let err = extract(archive.as_slice(), dir.path()).await.unwrap_err();
    assert!(matches!(err, ExtractError::PathTraversal { .. }));
    // Nothing may appear outside the extraction root.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn absolute_names_are_rerooted() {
    let mut archive = Vec::new();
    push_entry(&mut archive, "/tmp/abs.bin", FILE_MODE, b"data");
    finish_archive(&mut archive);

    let dir = tempfile::tempdir().unwrap();
    let files = extract(archive.as_slice(), dir.path()).await.unwrap();
    assert_eq!(files, vec![dir.path().join("tmp/abs.bin")]);
}

#[tokio::test]
async fn dot_entries_are_skipped() {
    let mut archive = Vec::new();
    push_entry(&mut archive, ".", DIR_MODE, b"");
    push_entry(&mut archive, "..", DIR_MODE, b"");
    push_entry(&mut archive, "kept.bin", FILE_MODE, b"kept");
    finish_archive(&mut archive);

    let dir = tempfile::tempdir().unwrap();
    let files = extract(archive.as_slice(), dir.path()).await.unwrap();
    assert_eq!(files, vec![dir.path().join("kept.bin")]);
}

#[tokio::test]
async fn truncated_archive_errors() {
    let mut archive = Vec::new();
    push_entry(&mut archive, "cut.bin", FILE_MODE, &pattern(500));
    // No trailer, and chop mid-payload.
    archive.truncate(archive.len() - 100);

    let dir = tempfile::tempdir().unwrap();
    let err = extract(archive.as_slice(), dir.path()).await.unwrap_err();
    assert!(matches!(err, ExtractError::Truncated));
}

#[tokio::test]
async fn bad_magic_errors() {
    let mut archive = Vec::new();
    push_entry(&mut archive, "x.bin", FILE_MODE, b"x");
    finish_archive(&mut archive);
    archive[0] = b'9';

    let dir = tempfile::tempdir().unwrap();
    let err = extract(archive.as_slice(), dir.path()).await.unwrap_err();
    assert!(matches!(err, ExtractError::BadMagic));
}

#[tokio::test]
async fn bytes_after_trailer_are_ignored() {
    let mut archive = Vec::new();
    push_entry(&mut archive, "only.bin", FILE_MODE, b"only");
    finish_archive(&mut archive);
    // Garbage past the trailer must not be parsed as another header.
    archive.extend_from_slice(&[0xFF; 200]);

    let dir = tempfile::tempdir().unwrap();
    let mut extractor = Extractor::new(dir.path());
    extractor.feed(&archive).await.unwrap();
    assert!(extractor.is_finished());
    let files = extractor.finish().unwrap();
    assert_eq!(files, vec![dir.path().join("only.bin")]);
}
