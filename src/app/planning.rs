use crate::core::models::{GameRecord, PeerRecord, SyncJob, SyncJobKind};

// A local record without installed files cannot be updated, only downloaded
// fresh, regardless of how its version compares.
pub fn plan_sync_jobs(local_games: &[GameRecord], peer: &PeerRecord) -> Vec<SyncJob> {
    let mut jobs = Vec::new();
    for remote in &peer.games {
        // Served catalogs already filter these, but records can also arrive
        // from persisted snapshots that still carry them.
        if !remote.installed || remote.hidden {
            continue;
        }
        let local = local_games
            .iter()
            .find(|game| game.app_id == remote.app_id);
        let job = match local {
            Some(local) if local.installed => remote.is_newer_than(local).then(|| SyncJob {
                kind: SyncJobKind::Update,
                local: Some(local.clone()),
                remote: remote.clone(),
                peer_device_id: peer.device_id.clone(),
                peer_display_name: peer.display_name.clone(),
            }),
            other => Some(SyncJob {
                kind: SyncJobKind::NewDownload,
                local: other.cloned(),
                remote: remote.clone(),
                peer_device_id: peer.device_id.clone(),
                peer_display_name: peer.display_name.clone(),
            }),
        };
        if let Some(job) = job {
            jobs.push(job);
        }
    }
    jobs.sort_by(|left, right| left.remote.name.cmp(&right.remote.name));
    jobs
}
