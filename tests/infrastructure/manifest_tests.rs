use super::*;

fn temp_install_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("lansync-manifest-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create manifest fixture dir");
    dir
}

#[test]
fn build_manifest_should_sort_and_normalize_paths() {
    let dir = temp_install_dir();
    std::fs::create_dir_all(dir.join("data").join("maps")).expect("create nested dirs");
    std::fs::write(dir.join("zeta.bin"), b"zz").expect("write zeta");
    std::fs::write(dir.join("data").join("maps").join("arena.map"), b"arena").expect("write map");
    std::fs::write(dir.join("alpha.txt"), b"a").expect("write alpha");

    let files = build_manifest(&dir).expect("build manifest");
    let paths: Vec<&str> = files.iter().map(|file| file.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["alpha.txt", "data/maps/arena.map", "zeta.bin"]);
    assert_eq!(files[1].size_bytes, 5);
    assert_eq!(files[1].hash, blake3::hash(b"arena").to_hex().to_string());
    assert_eq!(manifest_total_bytes(&files), 8);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn build_manifest_should_skip_sidecar() {
    let dir = temp_install_dir();
    std::fs::write(dir.join("game.bin"), b"payload").expect("write game file");
    std::fs::write(dir.join(SIDECAR_FILE_NAME), b"{}").expect("write sidecar");

    let files = build_manifest(&dir).expect("build manifest");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].relative_path, "game.bin");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn build_manifest_should_reject_missing_dir() {
    let dir = std::env::temp_dir().join(format!("lansync-missing-{}", uuid::Uuid::new_v4()));
    let error = build_manifest(&dir).expect_err("missing dir must fail");
    assert_eq!(error.code, "manifest_scan_failed");
}
