//! End-to-end tests exercising the store through its public surface

use rand::{Rng, SeedableRng};
use snapvault::{AssetStore, MatchDecision, SnapshotLimits, StoreError};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn open_store(dir: &TempDir) -> AssetStore {
    AssetStore::builder(dir.path().join("store"))
        .min_orphan_age(Duration::ZERO)
        .build()
        .unwrap()
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random()).collect()
}

#[test]
fn snapshot_is_idempotent() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("a.txt", b"alpha"), ("dir/b.txt", b"beta")]);
    let store = open_store(&home);

    let first = store.snapshot_run(ws.path(), "r1").unwrap();
    let stats_after_first = store.stats().unwrap();
    let second = store.snapshot_run(ws.path(), "r2").unwrap();

    assert_eq!(first.files, second.files);
    let stats_after_second = store.stats().unwrap();
    assert_eq!(stats_after_first.blob_count, stats_after_second.blob_count);
    assert_eq!(stats_after_first.total_bytes, stats_after_second.total_bytes);
}

#[test]
fn roundtrip_restores_exact_bytes_and_layout() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    let payload = random_bytes(7, 200_000);
    write_tree(
        ws.path(),
        &[
            ("model/weights.bin", payload.as_slice()),
            ("train.py", b"import torch\n"),
            ("config/deep/nested.yaml", b"depth: 3\n"),
        ],
    );
    let store = open_store(&home);
    store.snapshot_run(ws.path(), "exp").unwrap();

    let target = home.path().join("replay");
    let report = store.restore_run("exp", &target, false).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.restored_count, 3);

    assert_eq!(fs::read(target.join("model/weights.bin")).unwrap(), payload);
    assert_eq!(fs::read(target.join("train.py")).unwrap(), b"import torch\n");
    assert_eq!(
        fs::read(target.join("config/deep/nested.yaml")).unwrap(),
        b"depth: 3\n"
    );
}

#[test]
fn identical_files_share_one_blob() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(
        ws.path(),
        &[
            ("copy1.bin", b"duplicated payload"),
            ("copy2.bin", b"duplicated payload"),
            ("unique.bin", b"something else"),
        ],
    );
    let store = open_store(&home);

    let manifest = store.snapshot_run(ws.path(), "r1").unwrap();
    assert_eq!(manifest.file_count(), 3);
    assert_eq!(store.stats().unwrap().blob_count, 2);

    // Deleting the only run frees exactly the two physical blobs.
    let deletion = store.delete_run("r1", false).unwrap();
    assert_eq!(deletion.blobs_deleted, 2);
    assert_eq!(store.stats().unwrap().blob_count, 0);
}

#[test]
fn shared_blobs_survive_deleting_one_run() {
    let home = TempDir::new().unwrap();
    let ws1 = TempDir::new().unwrap();
    let ws2 = TempDir::new().unwrap();
    write_tree(ws1.path(), &[("shared.bin", b"common"), ("only1.bin", b"one")]);
    write_tree(ws2.path(), &[("shared.bin", b"common"), ("only2.bin", b"two")]);
    let store = open_store(&home);

    store.snapshot_run(ws1.path(), "r1").unwrap();
    store.snapshot_run(ws2.path(), "r2").unwrap();
    assert_eq!(store.stats().unwrap().blob_count, 3);

    let deletion = store.delete_run("r1", false).unwrap();
    assert_eq!(deletion.kept_assets.len(), 1);
    assert_eq!(deletion.orphaned_assets.len(), 1);

    // r2 still restores completely.
    let target = home.path().join("r2-out");
    let report = store.restore_run("r2", &target, false).unwrap();
    assert!(report.is_complete());
    assert_eq!(fs::read(target.join("shared.bin")).unwrap(), b"common");

    // And deleting r2 now frees everything.
    store.delete_run("r2", false).unwrap();
    assert_eq!(store.stats().unwrap().blob_count, 0);
}

#[test]
fn restore_is_partial_when_a_blob_is_lost() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("safe.txt", b"safe"), ("doomed.txt", b"doomed")]);
    let store = open_store(&home);

    let manifest = store.snapshot_run(ws.path(), "r1").unwrap();
    let doomed_fp = manifest
        .files
        .iter()
        .find(|e| e.path == "doomed.txt")
        .unwrap()
        .fingerprint
        .clone();
    fs::remove_file(store.blobs().path_for(&doomed_fp)).unwrap();

    let target = home.path().join("out");
    let report = store.restore_run("r1", &target, false).unwrap();
    assert_eq!(report.restored_count, manifest.file_count() - 1);
    assert_eq!(report.missing_blobs, vec![doomed_fp]);
    assert!(target.join("safe.txt").is_file());
    assert!(!target.join("doomed.txt").exists());
}

#[test]
fn restore_reports_truncated_blob_instead_of_placing_it() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("weights.bin", b"twenty-one byte file!")]);
    let store = open_store(&home);

    let manifest = store.snapshot_run(ws.path(), "r1").unwrap();
    let fp = manifest.files[0].fingerprint.clone();
    fs::write(store.blobs().path_for(&fp), b"oops").unwrap();

    let target = home.path().join("out");
    let report = store.restore_run("r1", &target, false).unwrap();
    assert_eq!(report.restored_count, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(!report.is_complete());
    assert!(!target.join("weights.bin").exists());
}

#[test]
fn ignore_file_controls_the_snapshot() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(
        ws.path(),
        &[
            (".rnignore", b"*.ckpt\n!final.ckpt\ndata/\n"),
            ("final.ckpt", b"keep"),
            ("epoch3.ckpt", b"drop"),
            ("data/huge.bin", b"drop too"),
            ("src/main.py", b"keep"),
        ],
    );
    let store = open_store(&home);

    let manifest = store.snapshot_run(ws.path(), "r1").unwrap();
    let mut paths: Vec<_> = manifest.files.iter().map(|e| e.path.clone()).collect();
    paths.sort();
    assert_eq!(paths, [".rnignore", "final.ckpt", "src/main.py"]);
}

#[test]
fn decide_exposes_subtree_pruning() {
    let matcher = snapvault::IgnoreMatcher::from_patterns(["logs/", "*.tmp"]);
    assert_eq!(matcher.decide("logs", true), MatchDecision::ExcludeSubtree);
    assert_eq!(matcher.decide("scratch.tmp", false), MatchDecision::Exclude);
    assert_eq!(matcher.decide("src/main.rs", false), MatchDecision::Include);
}

#[test]
fn snapshot_limit_rejects_oversized_workspace() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("big.bin", random_bytes(1, 4096).as_slice())]);

    let store = AssetStore::builder(home.path().join("store"))
        .limits(SnapshotLimits {
            max_total_bytes: 1024,
            ..Default::default()
        })
        .build()
        .unwrap();

    let err = store.snapshot_run(ws.path(), "r1").unwrap_err();
    assert!(matches!(err, StoreError::LimitExceeded { .. }));
    assert!(store.list_runs().unwrap().is_empty());
}

#[test]
fn dry_run_deletion_leaves_disk_untouched() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("a.txt", b"payload")]);
    let store = open_store(&home);
    store.snapshot_run(ws.path(), "r1").unwrap();

    let before = store.stats().unwrap();
    let deletion = store.delete_run("r1", true).unwrap();
    assert!(deletion.dry_run);
    assert_eq!(deletion.blobs_deleted, 1);

    let after = store.stats().unwrap();
    assert_eq!(before.blob_count, after.blob_count);
    assert_eq!(before.manifest_count, after.manifest_count);
    assert!(store.load_manifest("r1").is_ok());
}

#[test]
fn orphan_sweep_reclaims_unmanifested_blobs() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("live.txt", b"live")]);
    let store = open_store(&home);
    store.snapshot_run(ws.path(), "r1").unwrap();

    // A blob with no manifest, as an interrupted snapshot would leave.
    let orphan = store.blobs().store_bytes(b"stranded").unwrap();

    let sweep = store.cleanup_orphaned_blobs(false).unwrap();
    assert_eq!(sweep.orphaned_blobs, vec![orphan.fingerprint.clone()]);
    assert!(!store.blobs().exists(&orphan.fingerprint));

    let report = store
        .restore_run("r1", &home.path().join("out"), false)
        .unwrap();
    assert!(report.is_complete());
}

#[test]
fn zip_export_roundtrip() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);
    let store = open_store(&home);
    store.snapshot_run(ws.path(), "r1").unwrap();

    let zip_path = home.path().join("r1.zip");
    let report = store.export_run_to_zip("r1", &zip_path).unwrap();
    assert_eq!(report.restored_count, 2);

    let mut archive = zip::ZipArchive::new(fs::File::open(&zip_path).unwrap()).unwrap();
    let names: Vec<_> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"a.txt".to_string()));
    assert!(names.contains(&"sub/b.txt".to_string()));
}

#[test]
fn corrupt_manifest_does_not_block_other_runs() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    write_tree(ws.path(), &[("a.txt", b"intact")]);
    let store = open_store(&home);
    store.snapshot_run(ws.path(), "good").unwrap();

    fs::write(
        store.root().join("manifests").join("mangled.json"),
        b"not json at all",
    )
    .unwrap();

    // The sweep skips the corrupt manifest, reports it, and keeps the
    // intact run's blob alive.
    let sweep = store.cleanup_orphaned_blobs(false).unwrap();
    assert!(sweep.orphaned_blobs.is_empty());
    assert_eq!(sweep.errors.len(), 1);

    let report = store
        .restore_run("good", &home.path().join("out"), false)
        .unwrap();
    assert!(report.is_complete());
}
