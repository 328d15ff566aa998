//! Integration tests for the sync cycle and single-mailbox rescans.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;

use common::{FakeBackend, FakeIndex, Harness, config_with, entry, options};
use mailsync_core::{
    Error, FolderStatus, MailSourceConfig, MailSourceOptions, MailboxEntry, MailboxKey,
    MailboxPath, MailboxPolicy, Protocol, RemoteBackend, RemoteFolderProbe, RescanOutcome,
    Result, SyncSettings,
};

#[tokio::test]
async fn test_only_scannable_mailboxes_are_rescanned() {
    let mut config = config_with(0);
    for (i, policy) in [
        MailboxPolicy::Read,
        MailboxPolicy::Read,
        MailboxPolicy::Ignore,
        MailboxPolicy::Unknown,
        MailboxPolicy::Move,
    ]
    .into_iter()
    .enumerate()
    {
        config.insert_mailbox(entry(i, policy));
    }
    let (h, backend) = Harness::fake(config, FakeIndex::new(5)).await;

    assert_eq!(h.source.sync_mail().await.unwrap(), 3);
    assert_eq!(
        h.index.scanned_keys(),
        vec![
            MailboxKey::from_index(0),
            MailboxKey::from_index(1),
            MailboxKey::from_index(4)
        ]
    );
    assert_eq!(backend.marks.load(Ordering::SeqCst), 3);
    assert_eq!(h.source.last_rescan_count(), 3);
    assert_eq!(h.message().await, "Rescanned 3 mailboxes");
    assert_eq!(h.source.state_label(), "Idle");
}

#[tokio::test]
async fn test_scan_request_carries_mailbox_settings() {
    let mut config = config_with(0);
    let mut mailbox = entry(0, MailboxPolicy::Read);
    mailbox.apply_tags = vec!["work".into()];
    mailbox.primary_tag = Some("7".into());
    mailbox.process_new = true;
    mailbox.local = Some("/var/lib/mailsync/0000".into());
    config.insert_mailbox(mailbox);
    let (h, _) = Harness::fake(config, FakeIndex::new(1)).await;

    h.source.sync_mail().await.unwrap();

    let scans = h.index.scans.lock().unwrap().clone();
    assert_eq!(scans.len(), 1);
    let scan = &scans[0];
    assert_eq!(scan.path, std::path::PathBuf::from("/var/lib/mailsync/0000"));
    assert_eq!(scan.apply_tags, vec!["work".to_string(), "7".to_string()]);
    assert!(scan.process_new);
    assert_eq!(scan.session, "local");
    assert_eq!(scan.stop_after, Some(SyncSettings::RESCAN_BATCH_SIZE));
    assert_eq!(scan.label.as_deref(), Some("Rescan(0000, 2500)"));
}

#[tokio::test]
async fn test_unchanged_mailboxes_are_not_rescanned() {
    let mut opts = options();
    opts.settings.forced_probe_odds = 0;
    let backend = Arc::new(FakeBackend::new(false));
    let h = Harness::new(config_with(4), backend.clone(), FakeIndex::new(3), opts).await;

    assert_eq!(h.source.sync_mail().await.unwrap(), 0);
    assert_eq!(h.index.scan_count(), 0);
    assert_eq!(backend.probes.load(Ordering::SeqCst), 4);
    assert_eq!(h.message().await, "Rescanned 0 mailboxes");
}

#[tokio::test]
async fn test_forced_probe_rate() {
    let backend = Arc::new(FakeBackend::new(false));
    let h = Harness::new(config_with(1), backend, FakeIndex::new(1), options()).await;

    for _ in 0..1000 {
        h.source.sync_mail().await.unwrap();
    }
    let forced = h.index.scan_count();
    assert!((30..=70).contains(&forced), "forced {forced} probes");
}

#[tokio::test]
async fn test_budget_runs_out() {
    let mut opts = options();
    opts.settings.rescan_batch_size = 10;
    let backend = Arc::new(FakeBackend::new(true));
    let h = Harness::new(config_with(5), backend.clone(), FakeIndex::new(4), opts).await;

    let rescanned = h.source.sync_mail().await.unwrap();

    let stops: Vec<_> = h
        .index
        .scans
        .lock()
        .unwrap()
        .iter()
        .map(|s| s.stop_after)
        .collect();
    assert_eq!(stops, vec![Some(10), Some(6), Some(2)]);
    assert_eq!(h.index.processed.load(Ordering::SeqCst), 10);
    // The scan that drained the budget does not move the baseline.
    assert_eq!(rescanned, 2);
    assert_eq!(backend.marks.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_debug_mode_shrinks_budget() {
    let mut opts = options();
    opts.settings.debug = true;
    let backend = Arc::new(FakeBackend::new(true));
    let h = Harness::new(config_with(1), backend, FakeIndex::new(1), opts).await;

    h.source.sync_mail().await.unwrap();
    let scans = h.index.scans.lock().unwrap().clone();
    assert_eq!(scans[0].stop_after, Some(SyncSettings::RESCAN_BATCH_SIZE / 10));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_messages_never_exceed_budget(
        mailboxes in 0usize..12,
        per_scan in 0usize..40,
        batch in 1usize..100,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let processed = rt.block_on(async {
            let opts = MailSourceOptions {
                settings: SyncSettings {
                    rescan_batch_size: batch,
                    jitter: Duration::ZERO,
                    ..SyncSettings::default()
                },
                rng_seed: Some(1),
                ..MailSourceOptions::default()
            };
            let h = Harness::new(
                config_with(mailboxes),
                Arc::new(FakeBackend::new(true)),
                FakeIndex::new(per_scan),
                opts,
            )
            .await;
            h.source.sync_mail().await.unwrap();
            h.index.processed.load(Ordering::SeqCst)
        });
        prop_assert!(processed <= batch);
    }
}

#[tokio::test]
async fn test_interrupt_stops_cycle() {
    let index = FakeIndex::new(1);
    index.interrupt_at.store(2, Ordering::SeqCst);
    let (h, backend) = Harness::fake(config_with(5), index).await;

    let rescanned = h.source.sync_mail().await.unwrap();

    assert_eq!(h.index.scan_count(), 2);
    // The interrupted scan does not count.
    assert_eq!(rescanned, 1);
    assert_eq!(backend.marks.load(Ordering::SeqCst), 1);
    let message = h.message().await;
    assert!(message.starts_with("Interrupted: Test stop"), "{message}");
    assert!(message.ends_with("Rescanned 1 mailboxes"), "{message}");
    assert!(!h.source.interrupt_signal().is_raised());
}

#[tokio::test]
async fn test_interrupt_raised_before_cycle_is_cleared() {
    let (h, _) = Harness::fake(config_with(2), FakeIndex::new(1)).await;
    h.source.interrupt_rescan("stale");
    assert_eq!(h.source.sync_mail().await.unwrap(), 2);
}

#[tokio::test]
async fn test_per_mailbox_failures_are_counted() {
    let mut config = config_with(3);
    let mut dangling = entry(3, MailboxPolicy::Read);
    dangling.path = MailboxPath::Registry(MailboxKey::from_index(999));
    config.insert_mailbox(dangling);
    let index = FakeIndex::new(2);
    index
        .missing
        .lock()
        .unwrap()
        .insert(MailboxKey::from_index(1));
    let (h, _) = Harness::fake(config, index).await;

    assert_eq!(h.source.sync_mail().await.unwrap(), 2);
    assert_eq!(
        h.message().await,
        "Rescanned 2 mailboxes, failed to rescan 2"
    );
}

#[tokio::test]
async fn test_internal_error_aborts_cycle() {
    let index = FakeIndex::new(2);
    index.broken.store(true, Ordering::SeqCst);
    let (h, _) = Harness::fake(config_with(3), index).await;

    let err = h.source.sync_mail().await.unwrap_err();
    assert!(matches!(err, Error::Index(_)));
    assert_eq!(h.index.scan_count(), 1);
    assert_eq!(h.message().await, "Internal error");
    assert_eq!(h.source.state_label(), "Idle");
}

#[tokio::test]
async fn test_rescan_during_scan_is_unavailable() {
    let index = FakeIndex::new(1);
    *index.reenter.lock().unwrap() = Some(MailboxKey::from_index(1));
    let (h, _) = Harness::fake(config_with(2), index).await;

    h.source.sync_mail().await.unwrap();

    let outcomes = h.index.reentry_outcomes.lock().unwrap().clone();
    assert_eq!(outcomes, vec![RescanOutcome::Unavailable; 2]);
    assert_eq!(h.index.scan_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_cycles_never_overlap_scans() {
    let index = FakeIndex::new(1);
    *index.delay.lock().unwrap() = Some(Duration::from_secs(10));
    let (h, _) = Harness::fake(config_with(3), index).await;

    let a = h.source.clone();
    let b = h.source.clone();
    let (ra, rb) = tokio::join!(a.sync_mail(), b.sync_mail());
    ra.unwrap();
    rb.unwrap();

    assert_eq!(h.index.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_sync_leaves_worker_idle() {
    let index = FakeIndex::new(1);
    *index.delay.lock().unwrap() = Some(Duration::from_secs(10));
    let (h, _) = Harness::fake(config_with(2), index).await;

    let abandoned = tokio::time::timeout(Duration::from_secs(1), h.source.sync_mail()).await;
    assert!(abandoned.is_err());
    assert_eq!(h.source.state_label(), "Idle");

    assert!(h.source.open().await.unwrap());
    assert_eq!(h.source.state_label(), "Idle");
    assert_eq!(
        h.source
            .rescan_mailbox(&MailboxKey::from_index(0), None)
            .await
            .unwrap(),
        RescanOutcome::Processed(1)
    );
    assert_eq!(h.source.state_label(), "Idle");
}

#[tokio::test]
async fn test_rescan_mailbox_edge_cases() {
    let mut config = config_with(1);
    config.insert_mailbox(entry(1, MailboxPolicy::Ignore));
    let mut null = entry(2, MailboxPolicy::Read);
    null.path = MailboxPath::Direct("/dev/null".into());
    config.insert_mailbox(null);
    let (h, _) = Harness::fake(config, FakeIndex::new(4)).await;

    assert!(matches!(
        h.source.rescan_mailbox(&MailboxKey::from_index(9), None).await,
        Err(Error::NoSuchMailbox(_))
    ));
    assert_eq!(
        h.source
            .rescan_mailbox(&MailboxKey::from_index(1), None)
            .await
            .unwrap(),
        RescanOutcome::Processed(0)
    );
    assert_eq!(
        h.source
            .rescan_mailbox(&MailboxKey::from_index(2), None)
            .await
            .unwrap(),
        RescanOutcome::Processed(0)
    );
    assert_eq!(h.index.scan_count(), 0);

    assert_eq!(
        h.source
            .rescan_mailbox(&MailboxKey::from_index(0), Some(3))
            .await
            .unwrap(),
        RescanOutcome::Processed(3)
    );
    assert_eq!(h.message().await, "Rescanning: /var/mail/box0");
}

#[tokio::test]
async fn test_dangling_reference_is_unavailable() {
    let mut config = config_with(0);
    let mut dangling = entry(0, MailboxPolicy::Read);
    dangling.path = MailboxPath::Registry(MailboxKey::from_index(42));
    config.insert_mailbox(dangling);
    let (h, _) = Harness::fake(config, FakeIndex::new(1)).await;

    assert_eq!(
        h.source
            .rescan_mailbox(&MailboxKey::from_index(0), None)
            .await
            .unwrap(),
        RescanOutcome::Unavailable
    );
}

/// IMAP server where every folder but "Gone" exists.
struct FolderServer;

#[async_trait]
impl RemoteFolderProbe for FolderServer {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn folder_status(&self, folder: &str) -> Result<FolderStatus> {
        if folder == "Gone" {
            return Err(Error::Remote("NO [NONEXISTENT] Unknown folder".into()));
        }
        Ok(FolderStatus {
            uid_validity: 1,
            uid_next: 10,
            exists: 9,
        })
    }
}

#[tokio::test]
async fn test_missing_remote_folder_does_not_abort_cycle() {
    let mut config = MailSourceConfig::new("work", Protocol::Imap);
    for (i, folder) in ["INBOX", "Sent", "Gone", "Archive"].into_iter().enumerate() {
        config.insert_mailbox(
            MailboxEntry::new(MailboxKey::from_index(i), MailboxPath::Direct(folder.into()))
                .with_policy(MailboxPolicy::Read),
        );
    }
    let backend = Arc::new(RemoteBackend::new(Protocol::Imap, Arc::new(FolderServer)));
    let h = Harness::new(config, backend, FakeIndex::new(1), options()).await;

    assert_eq!(h.source.sync_mail().await.unwrap(), 3);
    assert_eq!(
        h.index.scanned_keys(),
        vec![
            MailboxKey::from_index(0),
            MailboxKey::from_index(1),
            MailboxKey::from_index(3)
        ]
    );
    assert_eq!(
        h.message().await,
        "Rescanned 3 mailboxes, failed to rescan 1"
    );
}
