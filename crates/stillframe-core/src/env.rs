//! Platform seam for the job worker.

use crate::blob::BlobStore;
use crate::clock::VALID_EPOCH_MIN;
use crate::sched::RenderGate;
use crate::state::StateStore;
use crate::store::MediaStore;

/// Everything the worker needs from the platform.
///
/// The firmware provides one implementation wired to real hardware; host
/// tests use the in-memory fakes behind the same trait.
pub trait JobEnv {
    type Media: MediaStore;
    type Blob: BlobStore;
    type State: StateStore;

    fn media(&mut self) -> &mut Self::Media;
    fn blob(&mut self) -> &mut Self::Blob;
    fn state(&mut self) -> &mut Self::State;

    /// Monotonic milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Current UTC epoch, zero or stale when never synced.
    fn now_epoch(&self) -> u64;

    fn epoch_is_valid(&self) -> bool {
        self.now_epoch() >= VALID_EPOCH_MIN
    }

    fn network_connected(&self) -> bool;

    /// Uniform value in `0..bound` for random rotation. `bound` is nonzero.
    fn random(&mut self, bound: u32) -> u32;

    /// Bring up the panel once per boot; repeated calls are cheap no-ops.
    fn render_init(&mut self) -> bool;

    /// Decode and display the image at `path`. Blocking; the panel refresh
    /// dominates the job's runtime.
    fn render_image(&mut self, path: &str) -> bool;

    /// Suspend flag consulted by the render scheduler while a sync holds the
    /// panel still.
    fn render_gate(&self) -> &RenderGate;

    /// Whether the provisioning portal currently owns the radio.
    fn portal_is_active(&self) -> bool {
        false
    }

    /// Tear the portal down so a sync can use the network.
    fn portal_stop(&mut self) {}
}
