//! End-to-end tests for the copy-verify-relocate engine against real
//! temporary directories, with in-memory metadata and notification doubles.

mod common;

use common::{test_id, test_item, InMemoryMetadata, RecordingNotifier};
use tempfile::TempDir;
use tiermover::config::Config;
use tiermover::engine::{path_stats, Engine, MigrationOutcome};
use tiermover::ManagerError;

struct Fixture {
    config: Config,
    _fast: TempDir,
    _slow: TempDir,
}

fn fixture() -> Fixture {
    let fast = TempDir::new().unwrap();
    let slow = TempDir::new().unwrap();

    let mut config = Config::default();
    config.storage.fast_root = fast.path().to_path_buf();
    config.storage.slow_root = slow.path().to_path_buf();
    config.space.safety_margin = 0;
    config.engine.copy_retry_attempts = 2;

    Fixture {
        config,
        _fast: fast,
        _slow: slow,
    }
}

fn write_source_tree(fixture: &Fixture, name: &str) -> std::path::PathBuf {
    let source = fixture.config.storage.fast_root.join(name);
    std::fs::create_dir_all(source.join("sub")).unwrap();
    std::fs::write(source.join("a.mkv"), vec![1u8; 4096]).unwrap();
    std::fs::write(source.join("sub/b.nfo"), vec![2u8; 512]).unwrap();
    source
}

#[tokio::test]
async fn committed_migration_moves_data_and_notifies() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-a");
    let (src_bytes, src_files) = path_stats(&source).unwrap();

    let mut item = test_item('a', Some(source.clone()), None);
    item.name = "show-a".to_string();
    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let report = engine.migrate(&test_id('a')).await.unwrap();

    assert_eq!(report.outcome, MigrationOutcome::Committed);
    assert_eq!(report.bytes_copied, src_bytes);
    assert_eq!(report.files_copied, src_files);

    // Source removed, destination holds the verified copy
    assert!(!source.exists());
    let dest = fixture.config.storage.slow_root.join("sonarr").join("show-a");
    assert_eq!(path_stats(&dest).unwrap(), (src_bytes, src_files));

    // Metadata points at the slow tier, notification fired with the label
    let updated = metadata.item(&test_id('a')).unwrap();
    assert_eq!(updated.slow_path.as_deref(), Some(dest.as_path()));
    let calls = notifier.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "sonarr");
}

#[tokio::test]
async fn already_migrated_item_is_a_noop() {
    let fixture = fixture();
    let item = test_item(
        'b',
        None,
        Some(fixture.config.storage.slow_root.join("sonarr/item-b")),
    );
    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let report = engine.migrate(&test_id('b')).await.unwrap();
    assert_eq!(report.outcome, MigrationOutcome::AlreadyMigrated);
    assert!(notifier.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unfinished_item_is_skipped_without_side_effects() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-c");
    let mut item = test_item('c', Some(source.clone()), None);
    item.completed_at = None;
    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let report = engine.migrate(&test_id('c')).await.unwrap();
    assert_eq!(report.outcome, MigrationOutcome::Skipped);
    assert!(source.exists());
    assert!(metadata.path_updates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn insufficient_space_aborts_before_any_write() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-d");
    let mut item = test_item('d', Some(source.clone()), None);
    item.size_bytes = u64::MAX / 2;
    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let err = engine.migrate(&test_id('d')).await.unwrap_err();
    assert!(matches!(err, ManagerError::InsufficientSpace(_)));

    // Source intact, nothing written to the slow tier
    assert!(source.exists());
    assert_eq!(
        std::fs::read_dir(&fixture.config.storage.slow_root)
            .unwrap()
            .count(),
        0
    );
}

#[tokio::test]
async fn dry_run_leaves_both_tiers_untouched() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-e");
    let item = test_item('e', Some(source.clone()), None);
    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, true);

    let report = engine.migrate(&test_id('e')).await.unwrap();
    assert_eq!(report.outcome, MigrationOutcome::DryRun);

    assert!(source.exists());
    assert_eq!(
        std::fs::read_dir(&fixture.config.storage.slow_root)
            .unwrap()
            .count(),
        0
    );
    assert!(metadata.path_updates.lock().unwrap().is_empty());
    assert!(notifier.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn metadata_failure_removes_destination_and_keeps_source() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-f");
    let mut item = test_item('f', Some(source.clone()), None);
    item.name = "show-f".to_string();
    let metadata = InMemoryMetadata::failing_updates(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let err = engine.migrate(&test_id('f')).await.unwrap_err();
    assert!(matches!(err, ManagerError::MetadataError(_)));

    // Source survives a failed commit; the copied destination is discarded
    assert!(source.exists());
    let dest = fixture.config.storage.slow_root.join("sonarr").join("show-f");
    assert!(!dest.exists());
    assert!(notifier.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn preexisting_verified_destination_short_circuits_copy() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-g");
    let mut item = test_item('0', Some(source.clone()), None);
    item.name = "show-g".to_string();

    // A previous run already copied everything but crashed before commit
    let dest = fixture.config.storage.slow_root.join("sonarr").join("show-g");
    std::fs::create_dir_all(dest.join("sub")).unwrap();
    std::fs::copy(source.join("a.mkv"), dest.join("a.mkv")).unwrap();
    std::fs::copy(source.join("sub/b.nfo"), dest.join("sub/b.nfo")).unwrap();

    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let report = engine.migrate(&test_id('0')).await.unwrap();
    assert_eq!(report.outcome, MigrationOutcome::Committed);
    // Shortcut path: no copy attempt was needed
    assert_eq!(report.attempts, 0);
    assert!(!source.exists());
}

#[tokio::test]
async fn stale_partial_destination_is_recopied() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-h");
    let mut item = test_item('1', Some(source.clone()), None);
    item.name = "show-h".to_string();

    // Partial leftovers from a crashed copy: wrong file count
    let dest = fixture.config.storage.slow_root.join("sonarr").join("show-h");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("a.mkv"), vec![1u8; 100]).unwrap();

    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let report = engine.migrate(&test_id('1')).await.unwrap();
    assert_eq!(report.outcome, MigrationOutcome::Committed);
    assert_eq!(report.attempts, 1);
    assert_eq!(path_stats(&dest).unwrap().1, 2);
}

#[tokio::test]
async fn exhausted_copy_retries_leave_source_untouched() {
    let fixture = fixture();
    let source = write_source_tree(&fixture, "show-2");
    let stats_before = path_stats(&source).unwrap();
    let mut item = test_item('2', Some(source.clone()), None);
    item.name = "show-2".to_string();

    // A regular file squatting on the label directory makes every copy
    // attempt fail when the destination tree is created
    let label_dir = fixture.config.storage.slow_root.join("sonarr");
    std::fs::write(&label_dir, b"not a directory").unwrap();

    let metadata = InMemoryMetadata::new(vec![item]);
    let notifier = RecordingNotifier::default();
    let engine = Engine::new(&fixture.config, &metadata, &notifier, false);

    let err = engine.migrate(&test_id('2')).await.unwrap_err();
    assert!(matches!(
        err,
        ManagerError::IoError(_) | ManagerError::CopyFailed(_)
    ));

    // Source intact after exhausting both attempts; no partial destination,
    // no commit, no notification
    assert_eq!(path_stats(&source).unwrap(), stats_before);
    assert!(!label_dir.join("show-2").exists());
    assert!(metadata.path_updates.lock().unwrap().is_empty());
    assert!(notifier.calls.lock().unwrap().is_empty());
}
