//! Cloud reconciliation: reset the local collections to the remote archive.
//!
//! One pass clears every managed image off the medium, lists the archive and
//! the remote pending queues, and downloads the archive entries that are not
//! already waiting in a queue. Queue blobs are delivered by the wake-time
//! pull path, so skipping them here keeps the same image from being fetched
//! twice.

use alloc::vec::Vec;

use crate::blob::{BlobStore, LIST_PAGE_MAX, ListMarker, SasUrl, parse_sas_url};
use crate::env::JobEnv;
use crate::name::{Collection, ImageName, is_valid_image_name, storage_path, temporary_expiry};
use crate::store::{MediaStore, commit_image};

/// Archive prefixes and the local collection each one maps onto.
const ARCHIVE_PREFIXES: [(&str, &str); 2] = [
    ("all/permanent/", "queue-permanent/"),
    ("all/temporary/", "queue-temporary/"),
];

/// Transfer attempts per entry before it is reported as failed.
const DOWNLOAD_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncError {
    NetworkDown,
    ClockInvalid,
    BadCredentials,
    ListFailed,
    StorageFailed,
}

impl SyncError {
    pub const fn message(self) -> &'static str {
        match self {
            Self::NetworkDown => "Network down",
            Self::ClockInvalid => "Clock not set",
            Self::BadCredentials => "Bad SAS URL",
            Self::ListFailed => "List failed",
            Self::StorageFailed => "SD unavailable",
        }
    }
}

/// Tally of one reconciliation pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Entries fetched and committed.
    pub downloaded: usize,
    /// Local files cleared at the start of the pass.
    pub removed: usize,
    /// Entries skipped: still queued remotely, already expired, or unusable
    /// names.
    pub skipped: usize,
    /// Bytes committed.
    pub bytes: usize,
    /// Entries that failed every transfer attempt.
    pub failed: Vec<ImageName>,
}

/// Run one reconciliation pass against the container behind `sas_url`.
pub async fn run_sync<E: JobEnv>(env: &mut E, sas_url: &str) -> Result<SyncReport, SyncError> {
    if !env.network_connected() {
        return Err(SyncError::NetworkDown);
    }
    // Expiry decisions below depend on real time; refusing to sync beats
    // downloading images only to prune them on the next render.
    if !env.epoch_is_valid() {
        return Err(SyncError::ClockInvalid);
    }
    let sas = parse_sas_url(sas_url).ok_or(SyncError::BadCredentials)?;

    let mut report = SyncReport::default();
    let now_epoch = env.now_epoch();

    // The medium goes first. A listing failure after this point leaves it
    // empty until a rerun succeeds.
    clear_local(env, &mut report)?;

    let mut queued = Vec::new();
    for collection in [Collection::Permanent, Collection::Temporary] {
        let prefix = collection.prefix();
        list_prefix(env, &sas, prefix, prefix, &mut queued).await?;
    }
    queued.sort_unstable();
    queued.dedup();

    let mut desired = Vec::new();
    for (remote_prefix, local_prefix) in ARCHIVE_PREFIXES {
        list_prefix(env, &sas, remote_prefix, local_prefix, &mut desired).await?;
    }
    desired.sort_unstable();
    desired.dedup();
    log::info!(
        "sync listing archive={} queued={}",
        desired.len(),
        queued.len()
    );

    for name in desired {
        if queued.binary_search(&name).is_ok() {
            report.skipped += 1;
            continue;
        }
        if temporary_expiry(&name).is_some_and(|expiry| expiry <= now_epoch) {
            report.skipped += 1;
            continue;
        }
        download_one(env, &sas, &name, &mut report).await;
    }

    Ok(report)
}

/// Delete every managed image in both collections. The archive is the source
/// of truth for this pass.
fn clear_local<E: JobEnv>(env: &mut E, report: &mut SyncReport) -> Result<(), SyncError> {
    let mut present = Vec::new();
    for collection in [Collection::Permanent, Collection::Temporary] {
        env.media()
            .list(collection, &mut present)
            .map_err(|_| SyncError::StorageFailed)?;
    }
    for name in present {
        let path = storage_path(&name);
        if env.media().remove(path.as_str()).is_ok() {
            report.removed += 1;
        }
    }
    Ok(())
}

/// Page through one remote prefix, mapping each entry onto `local_prefix`.
async fn list_prefix<E: JobEnv>(
    env: &mut E,
    sas: &SasUrl<'_>,
    remote_prefix: &str,
    local_prefix: &str,
    out: &mut Vec<ImageName>,
) -> Result<(), SyncError> {
    let mut marker: Option<ListMarker> = None;
    loop {
        let page = env
            .blob()
            .list_page(sas, remote_prefix, marker.as_deref(), LIST_PAGE_MAX)
            .await
            .map_err(|_| SyncError::ListFailed)?;

        for remote_name in &page.names {
            let Some(stem) = remote_name.strip_prefix(remote_prefix) else {
                continue;
            };
            let mut local = ImageName::new();
            let _ = local.push_str(local_prefix);
            if local.push_str(stem).is_err() || !is_valid_image_name(&local) {
                log::warn!("sync skipping unusable entry name={}", remote_name.as_str());
                continue;
            }
            out.push(local);
        }

        match page.next_marker {
            Some(next) => marker = Some(next),
            None => break,
        }
    }
    Ok(())
}

async fn download_one<E: JobEnv>(
    env: &mut E,
    sas: &SasUrl<'_>,
    name: &ImageName,
    report: &mut SyncReport,
) {
    let remote = remote_name(name);

    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match env.blob().download(sas, remote.as_str()).await {
            Ok(data) => {
                let path = storage_path(name);
                match commit_image(env.media(), path.as_str(), &data) {
                    Ok(()) => {
                        report.downloaded += 1;
                        report.bytes += data.len();
                        log::info!("sync fetched name={} bytes={}", name.as_str(), data.len());
                    }
                    Err(err) => {
                        log::error!("sync commit failed name={} stage={err:?}", name.as_str());
                        report.failed.push(name.clone());
                    }
                }
                return;
            }
            Err(_) => {
                log::warn!(
                    "sync download failed name={} attempt={attempt}",
                    name.as_str()
                );
            }
        }
    }
    report.failed.push(name.clone());
}

/// Local name back to its archive counterpart; archive prefixes are the
/// shorter of the two, so the result always fits.
fn remote_name(local: &ImageName) -> ImageName {
    let mut remote = ImageName::new();
    for (remote_prefix, local_prefix) in ARCHIVE_PREFIXES {
        if let Some(stem) = local.strip_prefix(local_prefix) {
            let _ = remote.push_str(remote_prefix);
            let _ = remote.push_str(stem);
            return remote;
        }
    }
    let _ = remote.push_str(local);
    remote
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testenv::TestEnv;
    use embassy_futures::block_on;

    const SAS: &str = "https://frames.blob.example.net/photos?sv=2024-05-04&sig=abc123";

    fn connected_env() -> TestEnv {
        let mut env = TestEnv::new();
        env.connected = true;
        env.epoch = 1_700_000_000;
        env.media.ensure_mounted().unwrap();
        env
    }

    #[test]
    fn preconditions_checked_in_order() {
        let mut env = TestEnv::new();
        env.epoch = 1_700_000_000;
        assert_eq!(
            block_on(run_sync(&mut env, SAS)).unwrap_err(),
            SyncError::NetworkDown
        );

        env.connected = true;
        env.epoch = 0;
        assert_eq!(
            block_on(run_sync(&mut env, SAS)).unwrap_err(),
            SyncError::ClockInvalid
        );

        env.epoch = 1_700_000_000;
        assert_eq!(
            block_on(run_sync(&mut env, "https://host/c?sv=1")).unwrap_err(),
            SyncError::BadCredentials
        );
        // Nothing touched storage or the network.
        assert_eq!(env.blob.list_calls, 0);
    }

    #[test]
    fn resets_medium_to_the_archive() {
        let mut env = connected_env();
        env.blob.insert("all/permanent/keep.g4", b"remote");
        env.blob
            .insert("all/temporary/20991231T235959Z__new.g4", b"new");
        env.media.insert("/queue-permanent/keep.g4", b"local");
        env.media.insert("/queue-permanent/stale.g4", b"stale");

        let report = block_on(run_sync(&mut env, SAS)).unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.downloaded, 2);
        assert!(report.failed.is_empty());
        // Local copies never survive; the archive version wins.
        assert_eq!(
            env.media.file("/queue-permanent/keep.g4"),
            Some(&b"remote"[..])
        );
        assert!(
            env.media
                .contains("/queue-temporary/20991231T235959Z__new.g4")
        );
        assert!(!env.media.contains("/queue-permanent/stale.g4"));
    }

    #[test]
    fn queued_entries_are_not_refetched() {
        let mut env = connected_env();
        env.blob.insert("all/permanent/pending.g4", b"x");
        env.blob.insert("queue-permanent/pending.g4", b"x");

        let report = block_on(run_sync(&mut env, SAS)).unwrap();
        assert_eq!(report.downloaded, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(env.blob.download_calls, 0);
        // The pull path delivers it; sync leaves the slot empty.
        assert!(!env.media.contains("/queue-permanent/pending.g4"));
    }

    #[test]
    fn expired_entries_are_not_downloaded() {
        let mut env = connected_env();
        env.blob
            .insert("all/temporary/20210101T000000Z__old.g4", b"old");

        let report = block_on(run_sync(&mut env, SAS)).unwrap();
        assert_eq!(report.downloaded, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(env.blob.download_calls, 0);
    }

    #[test]
    fn listing_failure_leaves_the_medium_cleared() {
        let mut env = connected_env();
        env.media.insert("/queue-permanent/only.g4", b"x");
        env.blob.fail_list = true;

        assert_eq!(
            block_on(run_sync(&mut env, SAS)).unwrap_err(),
            SyncError::ListFailed
        );
        // Known gap carried over from the delete-first ordering: the files
        // stay gone until a rerun succeeds.
        assert!(!env.media.contains("/queue-permanent/only.g4"));
    }

    #[test]
    fn transient_download_failures_retry() {
        let mut env = connected_env();
        env.blob.insert("all/permanent/a.g4", b"bytes");
        env.blob.fail_downloads = 2;

        let report = block_on(run_sync(&mut env, SAS)).unwrap();
        assert_eq!(report.downloaded, 1);
        assert!(report.failed.is_empty());
        assert_eq!(env.blob.download_calls, 3);
    }

    #[test]
    fn persistent_failures_reported_and_recoverable() {
        let mut env = connected_env();
        env.blob.insert("all/permanent/a.g4", b"bytes");
        env.blob.fail_downloads = DOWNLOAD_ATTEMPTS;

        let report = block_on(run_sync(&mut env, SAS)).unwrap();
        assert_eq!(report.downloaded, 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].as_str(), "queue-permanent/a.g4");
        assert!(!env.media.contains("/queue-permanent/a.g4"));

        // A rerun with a healthy network completes the transfer.
        let report = block_on(run_sync(&mut env, SAS)).unwrap();
        assert_eq!(report.downloaded, 1);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn listing_paginates_past_the_page_cap() {
        let mut env = connected_env();
        for i in 0..(LIST_PAGE_MAX + 3) {
            let mut name = alloc::string::String::from("all/permanent/img");
            name.push_str(itoa(i).as_str());
            name.push_str(".g4");
            env.blob.insert(&name, b"x");
        }

        let report = block_on(run_sync(&mut env, SAS)).unwrap();
        assert_eq!(report.downloaded, LIST_PAGE_MAX + 3);
        assert!(env.blob.list_calls >= 4);
    }

    fn itoa(value: usize) -> heapless::String<8> {
        let mut out = heapless::String::new();
        let mut digits = heapless::Vec::<u8, 8>::new();
        let mut v = value;
        loop {
            let _ = digits.push(b'0' + (v % 10) as u8);
            v /= 10;
            if v == 0 {
                break;
            }
        }
        for d in digits.iter().rev() {
            let _ = out.push(*d as char);
        }
        out
    }
}
