//! Hardware-side [`JobEnv`] wiring for the frame firmware.

use embassy_time::Instant;
use esp_hal::rng::Rng;
use log::info;
use stillframe_core::{
    blob::{BlobHandle, SharedBlobStore},
    env::JobEnv,
    sched::RenderGate,
    store::MemoryMediaStore,
};
use stillframe_hal_esp32s3::{
    clock::WallClock, network::ConnectivityHandle, storage::rtc_state::RtcStateStore,
};

/// Platform bundle handed to the job worker.
///
/// The media and blob backends are in-memory stand-ins for bring-up; the
/// blob side is a handle onto the container shared with the wake-time pull.
/// TODO: swap MemoryMediaStore for the SD card once embedded-sdmmc grows
/// long-filename support.
/// TODO: swap the shared in-memory container for the HTTPS blob client.
/// TODO: drive the IT8951 e-ink controller from render_image once the panel
/// driver port lands.
pub(super) struct FrameEnv {
    pub media: MemoryMediaStore,
    pub blob: BlobHandle<'static>,
    pub state: RtcStateStore,
    rng: Rng,
    gate: &'static RenderGate,
    connectivity: &'static ConnectivityHandle,
    clock: &'static WallClock,
    renderer_ready: bool,
}

impl FrameEnv {
    pub fn new(
        gate: &'static RenderGate,
        connectivity: &'static ConnectivityHandle,
        clock: &'static WallClock,
        remote: &'static SharedBlobStore,
    ) -> Self {
        Self {
            media: MemoryMediaStore::new(),
            blob: remote.handle(),
            state: RtcStateStore::new(),
            rng: Rng::new(),
            gate,
            connectivity,
            clock,
            renderer_ready: false,
        }
    }
}

impl JobEnv for FrameEnv {
    type Media = MemoryMediaStore;
    type Blob = BlobHandle<'static>;
    type State = RtcStateStore;

    fn media(&mut self) -> &mut Self::Media {
        &mut self.media
    }

    fn blob(&mut self) -> &mut Self::Blob {
        &mut self.blob
    }

    fn state(&mut self) -> &mut Self::State {
        &mut self.state
    }

    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    fn now_epoch(&self) -> u64 {
        self.clock.now_epoch(Instant::now().as_millis())
    }

    fn network_connected(&self) -> bool {
        self.connectivity.is_online()
    }

    fn random(&mut self, bound: u32) -> u32 {
        self.rng.random() % bound.max(1)
    }

    fn render_init(&mut self) -> bool {
        if !self.renderer_ready {
            info!("panel init");
            self.renderer_ready = true;
        }
        true
    }

    fn render_image(&mut self, path: &str) -> bool {
        info!("panel draw path={path}");
        true
    }

    fn render_gate(&self) -> &RenderGate {
        self.gate
    }
}
