use super::*;

fn temp_file_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("lansync-{}-{}", label, uuid::Uuid::new_v4()))
}

#[test]
fn file_hash_should_match_blake3() {
    let path = temp_file_path("hash");
    let payload = b"lansync hash fixture";
    std::fs::write(&path, payload).expect("write hash fixture");

    let hex = file_hash_hex(&path).expect("hash fixture file");
    assert_eq!(hex, blake3::hash(payload).to_hex().to_string());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn resolve_target_path_should_join_forward_slashes() {
    let base = Path::new("/data/games/demo");
    let resolved = resolve_target_path(base, "assets/textures/wall.dat").expect("resolve path");
    assert_eq!(resolved, base.join("assets").join("textures").join("wall.dat"));
}

#[test]
fn resolve_target_path_should_normalize_backslashes() {
    let base = Path::new("/data/games/demo");
    let resolved = resolve_target_path(base, r"bin\game.exe").expect("resolve path");
    assert_eq!(resolved, base.join("bin").join("game.exe"));
}

#[test]
fn resolve_target_path_should_reject_traversal() {
    let base = Path::new("/data/games/demo");
    let error = resolve_target_path(base, "../outside.dat").expect_err("traversal must fail");
    assert_eq!(error.code, "transfer_path_invalid");

    let error = resolve_target_path(base, "/etc/passwd").expect_err("absolute must fail");
    assert_eq!(error.code, "transfer_path_invalid");

    let error = resolve_target_path(base, "  ").expect_err("blank must fail");
    assert_eq!(error.code, "transfer_path_invalid");
}

#[tokio::test]
async fn writer_should_preallocate_and_write_at_offset() {
    let path = temp_file_path("writer");
    let mut writer = FileStreamWriter::open(&path, 8, 4)
        .await
        .expect("open writer");
    writer.write_all(b"tail").await.expect("write tail");
    writer.flush().await.expect("flush writer");
    drop(writer);

    let bytes = std::fs::read(&path).expect("read written file");
    assert_eq!(bytes.len(), 8);
    assert_eq!(&bytes[4..], b"tail");

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn writer_should_create_missing_parent_dirs() {
    let root = temp_file_path("writer-dirs");
    let nested = root.join("a").join("b").join("file.bin");
    let mut writer = FileStreamWriter::open(&nested, 3, 0)
        .await
        .expect("open nested writer");
    writer.write_all(b"abc").await.expect("write nested");
    writer.flush().await.expect("flush nested");
    drop(writer);

    assert_eq!(std::fs::read(&nested).expect("read nested"), b"abc");

    let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn reader_should_stream_from_offset() {
    let path = temp_file_path("reader");
    std::fs::write(&path, b"0123456789").expect("write reader fixture");

    let mut reader = FileStreamReader::open(&path, 6).await.expect("open reader");
    let mut buffer = [0u8; 16];
    let read_count = reader.read_into(&mut buffer).await.expect("read slice");
    assert_eq!(&buffer[..read_count], b"6789");

    let read_count = reader.read_into(&mut buffer).await.expect("read eof");
    assert_eq!(read_count, 0);

    let _ = std::fs::remove_file(&path);
}
