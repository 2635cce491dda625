//! Render scheduling: periodic refresh, failure retry and the suspend gate.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::jobs::JobEngine;
use crate::select::SelectMode;

/// Suspend flag raised while a sync rewrites the collections.
pub struct RenderGate {
    suspended: AtomicBool,
}

impl RenderGate {
    pub const fn new() -> Self {
        Self {
            suspended: AtomicBool::new(false),
        }
    }

    pub fn suspend(&self) {
        self.suspended.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

impl Default for RenderGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives RenderNext jobs on a fixed cadence.
///
/// Exactly one render job is in flight at a time. A failed or vanished job
/// reschedules after the retry interval; an explicit refresh request takes
/// effect as soon as the gate and the in-flight job allow.
pub struct RenderScheduler {
    mode: SelectMode,
    refresh_interval_ms: u64,
    retry_interval_ms: u64,
    job_id: Option<u32>,
    pending_refresh: bool,
    last_refresh_ms: u64,
    next_attempt_ms: u64,
    pre_enqueue_hook: Option<fn()>,
}

impl RenderScheduler {
    /// A zero `refresh_interval_ms` disables the cadence; only explicit
    /// requests render.
    pub const fn new(mode: SelectMode, refresh_interval_ms: u64, retry_interval_ms: u64) -> Self {
        Self {
            mode,
            refresh_interval_ms,
            retry_interval_ms,
            job_id: None,
            pending_refresh: true,
            last_refresh_ms: 0,
            next_attempt_ms: 0,
            pre_enqueue_hook: None,
        }
    }

    /// Runs on the caller's task right before each render job is enqueued.
    pub fn set_pre_enqueue_hook(&mut self, hook: fn()) {
        self.pre_enqueue_hook = Some(hook);
    }

    /// No refresh pending and no job in flight.
    pub fn is_idle(&self) -> bool {
        !self.pending_refresh && self.job_id.is_none()
    }

    pub fn request_refresh(&mut self) {
        if !self.pending_refresh {
            log::info!("render refresh requested");
        }
        self.pending_refresh = true;
    }

    pub fn tick(&mut self, engine: &JobEngine, gate: &RenderGate, now_ms: u64) {
        if let Some(id) = self.job_id {
            match engine.job(id) {
                Some(info) if info.state.is_terminal() => {
                    self.job_id = None;
                    if info.success {
                        self.last_refresh_ms = now_ms;
                        self.pending_refresh = false;
                        self.next_attempt_ms = 0;
                    } else {
                        log::warn!(
                            "render job failed id={id} msg={} retry_ms={}",
                            info.message,
                            self.retry_interval_ms
                        );
                        self.next_attempt_ms = now_ms + self.retry_interval_ms;
                    }
                }
                Some(_) => {}
                None => {
                    // Collected before we saw the outcome; treat as a failure.
                    self.job_id = None;
                    self.next_attempt_ms = now_ms + self.retry_interval_ms;
                }
            }
        }

        let interval_due = self.refresh_interval_ms > 0
            && now_ms.saturating_sub(self.last_refresh_ms) >= self.refresh_interval_ms;
        if !(self.pending_refresh || interval_due) {
            return;
        }
        if self.job_id.is_some() || now_ms < self.next_attempt_ms || gate.is_suspended() {
            return;
        }

        if let Some(hook) = self.pre_enqueue_hook {
            hook();
        }
        match engine.enqueue_render_next(self.mode, now_ms) {
            Some(id) => {
                log::info!("render job enqueued id={id} mode={:?}", self.mode);
                self.job_id = Some(id);
            }
            None => {
                log::warn!("render enqueue failed retry_ms={}", self.retry_interval_ms);
                self.next_attempt_ms = now_ms + self.retry_interval_ms;
            }
        }
    }
}
