use super::*;

use crate::core::models::{CompletedFile, PendingFile};

fn temp_target_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lansync-state-{}-{}", label, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create state fixture dir");
    dir
}

fn sample_state(target_dir: &Path) -> TransferState {
    TransferState {
        app_id: "730".to_string(),
        game_name: "Counter Demo".to_string(),
        target_path: target_dir.to_string_lossy().to_string(),
        peer_device_id: "peer-1".to_string(),
        peer_address: "192.168.1.20".to_string(),
        peer_catalog_port: 45678,
        peer_transfer_port: 45679,
        build_id: "20260801".to_string(),
        total_bytes: 300,
        transferred_bytes: 0,
        completed_files: vec![CompletedFile {
            relative_path: "done.bin".to_string(),
            size_bytes: 100,
        }],
        pending_files: vec![PendingFile {
            relative_path: "half.bin".to_string(),
            size_bytes: 200,
            transferred_bytes: 50,
            hash: blake3::hash(b"half").to_hex().to_string(),
        }],
        started_at: 1_000,
        updated_at: 1_000,
    }
}

#[tokio::test]
async fn save_then_load_should_roundtrip() {
    let dir = temp_target_dir("roundtrip");
    let mut state = sample_state(&dir);
    save_state(&mut state).await.expect("save state");

    assert_eq!(state.transferred_bytes, 150);
    assert!(state.updated_at > 1_000);
    assert!(!sidecar_path(&dir).with_extension("json.tmp").exists());

    let loaded = load_state(&dir).expect("load saved state");
    assert_eq!(loaded.app_id, "730");
    assert_eq!(loaded.transferred_bytes, 150);
    assert_eq!(loaded.pending_files[0].transferred_bytes, 50);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_should_return_none_for_missing_sidecar() {
    let dir = temp_target_dir("missing");
    assert!(load_state(&dir).is_none());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn load_should_return_none_for_corrupt_sidecar() {
    let dir = temp_target_dir("corrupt");
    std::fs::write(sidecar_path(&dir), b"{not json").expect("write corrupt sidecar");
    assert!(load_state(&dir).is_none());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn load_should_repair_accounting_drift() {
    let dir = temp_target_dir("drift");
    let mut state = sample_state(&dir);
    save_state(&mut state).await.expect("save state");

    let raw = std::fs::read_to_string(sidecar_path(&dir)).expect("read sidecar");
    let drifted = raw.replace("\"transferredBytes\": 150", "\"transferredBytes\": 9999");
    assert_ne!(raw, drifted);
    std::fs::write(sidecar_path(&dir), drifted).expect("write drifted sidecar");

    let loaded = load_state(&dir).expect("load drifted state");
    assert_eq!(loaded.transferred_bytes, 150);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn delete_should_tolerate_missing_sidecar() {
    let dir = temp_target_dir("delete");
    delete_state(&dir).await.expect("delete missing sidecar");

    let mut state = sample_state(&dir);
    save_state(&mut state).await.expect("save state");
    delete_state(&dir).await.expect("delete sidecar");
    assert!(!sidecar_path(&dir).exists());

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn find_incomplete_transfers_should_scan_roots() {
    let root = temp_target_dir("scan-root");
    let game_a = root.join("Counter Demo");
    let game_b = root.join("Another Game");
    std::fs::create_dir_all(&game_a).expect("create game a dir");
    std::fs::create_dir_all(&game_b).expect("create game b dir");
    std::fs::write(game_b.join("notes.json"), b"{}").expect("write unrelated file");

    let mut state_a = sample_state(&game_a);
    save_state(&mut state_a).await.expect("save state a");
    let mut state_b = sample_state(&game_b);
    state_b.app_id = "440".to_string();
    state_b.target_path = game_b.to_string_lossy().to_string();
    save_state(&mut state_b).await.expect("save state b");

    let found = find_incomplete_transfers(std::slice::from_ref(&root));
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].app_id, "440");
    assert_eq!(found[1].app_id, "730");

    let missing = PathBuf::from(format!("/tmp/lansync-no-root-{}", uuid::Uuid::new_v4()));
    assert!(find_incomplete_transfers(&[missing]).is_empty());

    let _ = std::fs::remove_dir_all(&root);
}
