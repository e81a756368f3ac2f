// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scheduling of decode jobs across contexts.
//!
//! Contexts that have work to do wait in a FIFO until a job is run for them. A context with a job
//! in flight is never queued again before that job finishes, so the backend of a context is never
//! called from two jobs at once. Jobs of different contexts may run in parallel.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::sys::eventfd::EfdFlags;
use nix::sys::eventfd::EventFd;
use thiserror::Error;

use crate::decoder::worker::DecodeWorker;
use crate::device::context::Context;
use crate::device::context::ContextId;

/// Receives the end of every job.
pub trait JobFinisher {
    fn job_finish(&self, ctx: &Arc<Context>);
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to create EventFd for awaiting job event: {0}")]
    AwaitingJobEventFd(Errno),
    #[error("failed to spawn job runner thread: {0}")]
    Spawn(std::io::Error),
}

#[derive(Default)]
struct SchedulerState {
    ready: VecDeque<Arc<Context>>,
    running: HashSet<ContextId>,
}

pub struct JobScheduler {
    state: Mutex<SchedulerState>,
    /// Notified whenever a job finishes.
    job_done: Condvar,
    /// Signaled once for every context made ready.
    awaiting_job_event: EventFd,
}

impl JobScheduler {
    pub fn new() -> Result<Self, SchedulerError> {
        Ok(Self {
            state: Mutex::new(Default::default()),
            job_done: Condvar::new(),
            awaiting_job_event: EventFd::from_flags(EfdFlags::EFD_SEMAPHORE)
                .map_err(SchedulerError::AwaitingJobEventFd)?,
        })
    }

    /// Queues `ctx` for a job if it has work to do and is neither queued nor running already.
    /// Returns whether the context was queued.
    pub fn try_schedule(&self, ctx: &Arc<Context>) -> bool {
        let mut state = self.state.lock().unwrap();

        if state.running.contains(&ctx.id()) {
            log::debug!("[{}] job already running", ctx.id());
            return false;
        }
        if state.ready.iter().any(|c| c.id() == ctx.id()) {
            return false;
        }
        if !ctx.job_ready() {
            return false;
        }

        state.ready.push_back(Arc::clone(ctx));
        drop(state);

        self.wake();
        log::debug!("[{}] job scheduled", ctx.id());
        true
    }

    /// Takes the next context to run a job for, and marks it running.
    pub fn next_job(&self) -> Option<Arc<Context>> {
        let mut state = self.state.lock().unwrap();
        let ctx = state.ready.pop_front()?;
        state.running.insert(ctx.id());
        Some(ctx)
    }

    /// Removes `id` from the contexts waiting for a job. A running job is not affected.
    pub fn cancel(&self, id: ContextId) {
        self.state.lock().unwrap().ready.retain(|c| c.id() != id);
    }

    /// Blocks until no job of `id` is in flight.
    pub fn wait_idle(&self, id: ContextId) {
        let state = self.state.lock().unwrap();
        let _state = self
            .job_done
            .wait_while(state, |state| state.running.contains(&id))
            .unwrap();
    }

    pub fn is_running(&self, id: ContextId) -> bool {
        self.state.lock().unwrap().running.contains(&id)
    }

    pub fn num_ready(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    /// Runs jobs on the calling thread until no context is ready. Returns the number of jobs run.
    pub fn run_pending(&self, worker: &DecodeWorker) -> usize {
        let mut jobs = 0;
        while let Some(ctx) = self.next_job() {
            let status = worker.run_job(&ctx, self);
            log::debug!("[{}] job done: {:?}", ctx.id(), status);
            jobs += 1;
        }
        jobs
    }

    fn wake(&self) {
        if let Err(e) = self.awaiting_job_event.write(1) {
            log::error!("failed to signal awaiting job event: {}", e);
        }
    }

    fn wait(&self) -> Result<(), Errno> {
        self.awaiting_job_event.read().map(|_| ())
    }
}

impl JobFinisher for JobScheduler {
    fn job_finish(&self, ctx: &Arc<Context>) {
        self.state.lock().unwrap().running.remove(&ctx.id());
        self.job_done.notify_all();
        self.try_schedule(ctx);
    }
}

/// Runs jobs on a dedicated thread.
pub struct JobRunner {
    scheduler: Arc<JobScheduler>,
    running: Arc<AtomicBool>,
    worker_thread: Option<JoinHandle<()>>,
}

impl JobRunner {
    pub fn start(scheduler: Arc<JobScheduler>, worker: DecodeWorker) -> Result<Self, SchedulerError> {
        let running = Arc::new(AtomicBool::new(true));

        let thread_scheduler = Arc::clone(&scheduler);
        let thread_running = Arc::clone(&running);
        let worker_thread = thread::Builder::new()
            .name("decode-jobs".into())
            .spawn(move || {
                while thread_running.load(Ordering::Acquire) {
                    if let Err(e) = thread_scheduler.wait() {
                        log::error!("failed to wait for jobs: {}", e);
                        break;
                    }
                    thread_scheduler.run_pending(&worker);
                }
                log::debug!("job runner exiting");
            })
            .map_err(SchedulerError::Spawn)?;

        Ok(Self {
            scheduler,
            running,
            worker_thread: Some(worker_thread),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.worker_thread
            .as_ref()
            .is_some_and(|worker_thread| !worker_thread.is_finished())
    }

    /// Stops the thread once the job in flight, if any, is done.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.scheduler.wake();
        if let Some(worker_thread) = self.worker_thread.take() {
            let _ = worker_thread.join();
        }
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
