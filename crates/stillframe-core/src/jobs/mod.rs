//! Single-worker job engine for everything that touches the storage medium.
//!
//! Callers enqueue work and poll by id; the worker owns the medium and runs
//! jobs strictly one at a time. Terminal jobs linger in the table for a
//! minute so pollers can observe the outcome, then get collected.

use alloc::string::String;
use alloc::vec::Vec;

use crate::name::ImageName;
use crate::select::SelectMode;

mod engine;
mod render;
mod table;

#[cfg(test)]
mod tests;

pub use engine::JobEngine;

/// Job table capacity.
pub const MAX_JOBS: usize = 16;
/// Pending-work channel depth; enqueues beyond this fail fast.
pub const QUEUE_DEPTH: usize = 8;
/// Terminal jobs younger than this survive garbage collection.
pub const GC_MIN_AGE_MS: u64 = 60_000;

pub const MESSAGE_MAX: usize = 96;
pub type Message = heapless::String<MESSAGE_MAX>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// What a job does. Arguments that do not fit a tag live on the job itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobKind {
    /// Enumerate both collections, sorted.
    List,
    Delete,
    Upload,
    Display,
    /// Rotate to the next image and draw it.
    RenderNext(SelectMode),
    /// Mirror the cloud archive onto the medium.
    SyncFromCloud,
}

/// Point-in-time copy of a job's public fields.
#[derive(Clone, Debug)]
pub struct JobInfo {
    pub id: u32,
    pub kind: JobKind,
    pub state: JobState,
    pub success: bool,
    pub bytes: usize,
    pub message: Message,
    pub created_ms: u64,
    pub updated_ms: u64,
}

pub(crate) struct Job {
    pub id: u32,
    pub kind: JobKind,
    pub state: JobState,
    pub success: bool,
    pub bytes: usize,
    pub message: Message,
    pub created_ms: u64,
    pub updated_ms: u64,

    /// Target image for Delete, Upload and Display.
    pub name: ImageName,
    /// Upload bytes; dropped by the worker once the job finishes.
    pub payload: Option<Vec<u8>>,
    /// Container SAS URL for SyncFromCloud.
    pub sas_url: Option<String>,
    /// Listing result, or the names a sync failed to fetch.
    pub names: Vec<ImageName>,
}

impl Job {
    pub(crate) fn new(kind: JobKind, now_ms: u64) -> Self {
        Self {
            id: 0,
            kind,
            state: JobState::Queued,
            success: false,
            bytes: 0,
            message: Message::new(),
            created_ms: now_ms,
            updated_ms: now_ms,
            name: ImageName::new(),
            payload: None,
            sas_url: None,
            names: Vec::new(),
        }
    }

    pub(crate) fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            kind: self.kind,
            state: self.state,
            success: self.success,
            bytes: self.bytes,
            message: self.message.clone(),
            created_ms: self.created_ms,
            updated_ms: self.updated_ms,
        }
    }

    pub(crate) fn set_message(&mut self, msg: &str) {
        self.message.clear();
        let _ = self.message.push_str(msg);
    }
}
