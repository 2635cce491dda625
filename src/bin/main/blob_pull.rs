//! One-shot pending-queue pull executed on each wake.
//!
//! The companion app drops freshly-shared photos under the container's
//! `queue-temporary/` and `queue-permanent/` prefixes. On wake the firmware
//! fetches the first pending blob (temporary first), hands it to the upload
//! job for an atomic commit, marks it as the next render and deletes the
//! remote blob so it is not pulled twice. Anything left in the queues is
//! picked up on later wakes, one image per cycle.

use embassy_time::{Instant, Timer};
use log::{info, warn};
use stillframe_core::{
    blob::{BlobStore, SasUrl, parse_sas_url},
    jobs::{JobEngine, JobState},
    name::{Collection, ImageName, is_valid_image_name},
    state::StateStore,
};

const PULL_ATTEMPTS: u32 = 3;
const UPLOAD_POLL_MS: u64 = 50;
const UPLOAD_WAIT_TIMEOUT_MS: u64 = 120_000;

/// Pull at most one pending image. Returns `true` when a new image landed on
/// the medium and was marked as the priority render.
pub(super) async fn pull_once<B: BlobStore, S: StateStore>(
    engine: &JobEngine,
    blob: &mut B,
    state: &mut S,
    sas_url: &str,
) -> bool {
    let Some(sas) = parse_sas_url(sas_url) else {
        warn!("pull skipped: bad archive url");
        return false;
    };

    let Some(name) = next_pending(blob, &sas).await else {
        return false;
    };
    if !is_valid_image_name(&name) {
        warn!("pull: invalid pending name {name}");
        return false;
    }

    let mut data = None;
    for attempt in 1..=PULL_ATTEMPTS {
        match blob.download(&sas, &name).await {
            Ok(bytes) => {
                data = Some(bytes);
                break;
            }
            Err(err) => warn!("pull download failed attempt={attempt}: {err:?}"),
        }
    }
    let Some(data) = data else {
        return false;
    };
    let bytes = data.len();

    let Some(id) = engine.enqueue_upload(&name, data, Instant::now().as_millis()) else {
        warn!("pull: job table full");
        return false;
    };

    let deadline = Instant::now().as_millis() + UPLOAD_WAIT_TIMEOUT_MS;
    loop {
        match engine.job(id) {
            Some(job) if job.state == JobState::Done => break,
            Some(job) if job.state == JobState::Error => {
                warn!("pull upload failed msg={}", job.message);
                return false;
            }
            Some(_) => {}
            None => {
                warn!("pull upload vanished id={id}");
                return false;
            }
        }
        if Instant::now().as_millis() >= deadline {
            warn!("pull upload timed out id={id}");
            return false;
        }
        Timer::after_millis(UPLOAD_POLL_MS).await;
    }

    state.set_priority_image(&name);
    if let Err(err) = blob.delete(&sas, &name).await {
        // The committed image stays; the next wake re-pulls and overwrites.
        warn!("pull: queue delete failed: {err:?}");
    }
    info!("pull complete name={name} bytes={bytes}");
    true
}

/// First blob waiting in either pending queue; fresh shares go to the
/// temporary queue, so it is checked first.
async fn next_pending<B: BlobStore>(blob: &mut B, sas: &SasUrl<'_>) -> Option<ImageName> {
    for collection in [Collection::Temporary, Collection::Permanent] {
        match blob.list_page(sas, collection.prefix(), None, 1).await {
            Ok(page) => {
                if let Some(name) = page.names.first() {
                    return Some(name.clone());
                }
            }
            Err(err) => {
                warn!("pull listing failed: {err:?}");
                return None;
            }
        }
    }
    info!("pull: queues empty");
    None
}
