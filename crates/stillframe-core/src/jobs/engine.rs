//! Job intake, the worker loop and the per-kind handlers.

use core::cell::RefCell;
use core::fmt::Write as _;

use alloc::string::String;
use alloc::vec::Vec;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::table::JobTable;
use super::{Job, JobInfo, JobKind, JobState, Message, QUEUE_DEPTH};
use crate::env::JobEnv;
use crate::name::{Collection, ImageName, is_valid_image_name, storage_path};
use crate::select::SelectMode;
use crate::store::{MediaStore, commit_image};
use crate::sync::run_sync;

/// Shared front door to the storage worker.
///
/// `enqueue_*` and the poll methods are safe from any task; the worker
/// methods must run on exactly one task.
pub struct JobEngine {
    table: Mutex<CriticalSectionRawMutex, RefCell<JobTable>>,
    queue: Channel<CriticalSectionRawMutex, u32, QUEUE_DEPTH>,
}

impl JobEngine {
    pub const fn new() -> Self {
        Self {
            table: Mutex::new(RefCell::new(JobTable::new())),
            queue: Channel::new(),
        }
    }

    pub fn enqueue_list(&self, now_ms: u64) -> Option<u32> {
        self.enqueue(Job::new(JobKind::List, now_ms))
    }

    pub fn enqueue_delete(&self, name: &str, now_ms: u64) -> Option<u32> {
        let mut job = Job::new(JobKind::Delete, now_ms);
        let _ = job.name.push_str(name);
        self.enqueue(job)
    }

    pub fn enqueue_upload(&self, name: &str, data: Vec<u8>, now_ms: u64) -> Option<u32> {
        let mut job = Job::new(JobKind::Upload, now_ms);
        let _ = job.name.push_str(name);
        job.payload = Some(data);
        self.enqueue(job)
    }

    pub fn enqueue_display(&self, name: &str, now_ms: u64) -> Option<u32> {
        let mut job = Job::new(JobKind::Display, now_ms);
        let _ = job.name.push_str(name);
        self.enqueue(job)
    }

    pub fn enqueue_render_next(&self, mode: SelectMode, now_ms: u64) -> Option<u32> {
        self.enqueue(Job::new(JobKind::RenderNext(mode), now_ms))
    }

    pub fn enqueue_sync(&self, sas_url: &str, now_ms: u64) -> Option<u32> {
        let mut job = Job::new(JobKind::SyncFromCloud, now_ms);
        job.sas_url = Some(String::from(sas_url));
        self.enqueue(job)
    }

    /// Snapshot a job by id. `None` once the job has been collected.
    pub fn job(&self, id: u32) -> Option<JobInfo> {
        if id == 0 {
            return None;
        }
        self.table
            .lock(|table| table.borrow().get(id).map(Job::info))
    }

    /// Copy out the names attached to a terminal job: the listing of a Done
    /// List job, or the entries a sync could not fetch.
    pub fn job_names(&self, id: u32, out: &mut Vec<ImageName>) -> bool {
        self.table.lock(|table| {
            let table = table.borrow();
            let Some(job) = table.get(id) else {
                return false;
            };
            let readable = match job.kind {
                JobKind::List => job.state == JobState::Done,
                JobKind::SyncFromCloud => job.state.is_terminal(),
                _ => false,
            };
            if !readable {
                return false;
            }
            out.extend(job.names.iter().cloned());
            true
        })
    }

    /// Collect stale terminal jobs outside the enqueue path.
    pub fn purge(&self, now_ms: u64) {
        self.table.lock(|table| table.borrow_mut().gc(now_ms));
    }

    fn enqueue(&self, job: Job) -> Option<u32> {
        let now_ms = job.created_ms;
        let kind = job.kind;
        let id = self
            .table
            .lock(|table| table.borrow_mut().store(job, now_ms))?;

        if self.queue.try_send(id).is_err() {
            // The job stays observable so the caller sees why it never ran.
            self.table.lock(|table| {
                if let Some(job) = table.borrow_mut().get_mut(id) {
                    job.state = JobState::Error;
                    job.success = false;
                    job.payload = None;
                    job.set_message("Queue full");
                    job.updated_ms = now_ms;
                }
            });
            log::warn!("job queue full id={id} kind={kind:?}");
            return Some(id);
        }

        log::info!("job enqueued id={id} kind={kind:?}");
        Some(id)
    }

    /// Worker loop; run exactly once, on the task that owns the medium.
    pub async fn run<E: JobEnv>(&self, env: &mut E) -> ! {
        loop {
            self.service_one(env).await;
        }
    }

    /// Wait for one queued job and run it to completion.
    pub async fn service_one<E: JobEnv>(&self, env: &mut E) {
        let id = self.queue.receive().await;
        self.execute(env, id).await;
    }

    async fn execute<E: JobEnv>(&self, env: &mut E, id: u32) {
        let Some((kind, name, payload, sas_url)) = self.begin(id, env.now_ms()) else {
            return;
        };
        log::info!("job start id={id} kind={kind:?}");

        if env.media().ensure_mounted().is_err() {
            log::error!("job failed id={id} err=sd-init");
            self.finish(id, Outcome::error("SD init failed"), env.now_ms());
            return;
        }

        let outcome = match kind {
            JobKind::List => handle_list(env),
            JobKind::Delete => handle_delete(env, &name),
            JobKind::Upload => handle_upload(env, &name, payload),
            JobKind::Display => handle_display(env, &name),
            JobKind::RenderNext(mode) => match super::render::render_next(env, mode) {
                Ok(rendered) => {
                    log::info!("job render id={id} name={}", rendered.as_str());
                    Outcome::done()
                }
                Err(message) => Outcome::error(message),
            },
            JobKind::SyncFromCloud => handle_sync(env, sas_url.as_deref()).await,
        };

        if outcome.success {
            log::info!("job done id={id}");
        } else {
            log::warn!("job error id={id} msg={}", outcome.message);
        }
        self.finish(id, outcome, env.now_ms());
    }

    /// Mark the job Running and snapshot what the handler needs. `None` when
    /// the job was evicted before the worker got to it.
    fn begin(&self, id: u32, now_ms: u64) -> Option<(JobKind, ImageName, Option<Vec<u8>>, Option<String>)> {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            let job = table.get_mut(id)?;
            job.state = JobState::Running;
            job.updated_ms = now_ms;
            Some((job.kind, job.name.clone(), job.payload.take(), job.sas_url.take()))
        })
    }

    fn finish(&self, id: u32, outcome: Outcome, now_ms: u64) {
        self.table.lock(|table| {
            let mut table = table.borrow_mut();
            if let Some(job) = table.get_mut(id) {
                job.state = if outcome.success {
                    JobState::Done
                } else {
                    JobState::Error
                };
                job.success = outcome.success;
                job.bytes = outcome.bytes;
                job.names = outcome.names;
                job.payload = None;
                job.set_message(outcome.message.as_str());
                job.updated_ms = now_ms;
            }
        });
    }
}

impl Default for JobEngine {
    fn default() -> Self {
        Self::new()
    }
}

struct Outcome {
    success: bool,
    message: Message,
    bytes: usize,
    names: Vec<ImageName>,
}

impl Outcome {
    fn done() -> Self {
        Self {
            success: true,
            message: Message::new(),
            bytes: 0,
            names: Vec::new(),
        }
    }

    fn error(message: &str) -> Self {
        let mut outcome = Self::done();
        outcome.success = false;
        outcome.message = Message::new();
        let _ = outcome.message.push_str(message);
        outcome
    }
}

fn handle_list<E: JobEnv>(env: &mut E) -> Outcome {
    let mut names = Vec::new();
    if env.media().list(Collection::Permanent, &mut names).is_err()
        || env.media().list(Collection::Temporary, &mut names).is_err()
    {
        return Outcome::error("SD unavailable");
    }
    names.sort_unstable();
    let mut outcome = Outcome::done();
    outcome.names = names;
    outcome
}

fn handle_delete<E: JobEnv>(env: &mut E, name: &str) -> Outcome {
    if !is_valid_image_name(name) {
        return Outcome::error("Invalid name");
    }
    let path = storage_path(name);
    match env.media().exists(path.as_str()) {
        Ok(true) => {}
        Ok(false) => return Outcome::error("Not found"),
        Err(_) => return Outcome::error("SD unavailable"),
    }
    if env.media().remove(path.as_str()).is_err() {
        return Outcome::error("Delete failed");
    }
    Outcome::done()
}

fn handle_upload<E: JobEnv>(env: &mut E, name: &str, payload: Option<Vec<u8>>) -> Outcome {
    let Some(data) = payload.filter(|data| !data.is_empty()) else {
        return Outcome::error("Invalid filename");
    };
    if !is_valid_image_name(name) {
        return Outcome::error("Invalid filename");
    }

    let path = storage_path(name);
    log::info!("upload start name={name} bytes={}", data.len());
    match commit_image(env.media(), path.as_str(), &data) {
        Ok(()) => {
            log::info!("upload committed path={}", path.as_str());
            let mut outcome = Outcome::done();
            outcome.bytes = data.len();
            outcome
        }
        Err(err) => {
            log::error!("upload failed path={} stage={err:?}", path.as_str());
            Outcome::error(err.message())
        }
    }
}

fn handle_display<E: JobEnv>(env: &mut E, name: &str) -> Outcome {
    if !is_valid_image_name(name) {
        return Outcome::error("Invalid name");
    }
    let path = storage_path(name);
    match env.media().exists(path.as_str()) {
        Ok(true) => {}
        Ok(false) => return Outcome::error("Not found"),
        Err(_) => return Outcome::error("SD unavailable"),
    }
    match super::render::draw(env, path.as_str()) {
        Ok(()) => Outcome::done(),
        Err(message) => Outcome::error(message),
    }
}

async fn handle_sync<E: JobEnv>(env: &mut E, sas_url: Option<&str>) -> Outcome {
    let sas_url = sas_url.unwrap_or_default();

    if env.portal_is_active() {
        env.portal_stop();
    }

    // Keep the panel still while files churn underneath the picker. A gate
    // someone else already closed stays closed afterwards.
    let was_suspended = env.render_gate().is_suspended();
    env.render_gate().suspend();
    let result = run_sync(env, sas_url).await;
    if !was_suspended {
        env.render_gate().resume();
    }

    match result {
        Ok(report) => {
            log::info!(
                "sync complete downloaded={} removed={} skipped={} failed={}",
                report.downloaded,
                report.removed,
                report.skipped,
                report.failed.len()
            );
            if report.failed.is_empty() {
                let mut outcome = Outcome::done();
                outcome.bytes = report.bytes;
                outcome
            } else {
                let mut message = Message::new();
                let _ = write!(message, "{} downloads failed", report.failed.len());
                let mut outcome = Outcome::error(message.as_str());
                outcome.bytes = report.bytes;
                outcome.names = report.failed;
                outcome
            }
        }
        Err(err) => Outcome::error(err.message()),
    }
}
