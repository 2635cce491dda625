//! Deterministic in-memory environment for host tests.

use alloc::string::String;
use alloc::vec::Vec;

use crate::blob::MemoryBlobStore;
use crate::env::JobEnv;
use crate::sched::RenderGate;
use crate::state::MemoryStateStore;
use crate::store::MemoryMediaStore;

pub(crate) struct TestEnv {
    pub media: MemoryMediaStore,
    pub blob: MemoryBlobStore,
    pub state: MemoryStateStore,
    pub gate: RenderGate,
    pub now_ms: u64,
    pub epoch: u64,
    pub connected: bool,
    pub render_init_ok: bool,
    pub render_ok: bool,
    /// Paths handed to the renderer, in order.
    pub rendered: Vec<String>,
    pub portal_active: bool,
    pub portal_stops: u32,
    rng_state: u32,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            media: MemoryMediaStore::new(),
            blob: MemoryBlobStore::new(),
            state: MemoryStateStore::new(),
            gate: RenderGate::new(),
            now_ms: 0,
            epoch: 0,
            connected: false,
            render_init_ok: true,
            render_ok: true,
            rendered: Vec::new(),
            portal_active: false,
            portal_stops: 0,
            rng_state: 0x2545_F491,
        }
    }
}

impl JobEnv for TestEnv {
    type Media = MemoryMediaStore;
    type Blob = MemoryBlobStore;
    type State = MemoryStateStore;

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
        self.now_ms
    }

    fn now_epoch(&self) -> u64 {
        self.epoch
    }

    fn network_connected(&self) -> bool {
        self.connected
    }

    fn random(&mut self, bound: u32) -> u32 {
        // Small LCG; the sequence only needs to be repeatable.
        self.rng_state = self.rng_state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        self.rng_state % bound.max(1)
    }

    fn render_init(&mut self) -> bool {
        self.render_init_ok
    }

    fn render_image(&mut self, path: &str) -> bool {
        if self.render_ok {
            self.rendered.push(String::from(path));
        }
        self.render_ok
    }

    fn render_gate(&self) -> &RenderGate {
        &self.gate
    }

    fn portal_is_active(&self) -> bool {
        self.portal_active
    }

    fn portal_stop(&mut self) {
        self.portal_active = false;
        self.portal_stops += 1;
    }
}
