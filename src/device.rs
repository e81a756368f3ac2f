// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The decoder device: the set of open contexts and the entry points of the client.
//!
//! Bitstream can only enter a context through a request, which is validated against the
//! controls the codec of the context requires before its buffer is queued. Capture buffers are
//! queued directly. Every queueing operation gives the scheduler a chance to start a job.

pub mod context;
pub mod controls;
pub mod queue;
pub mod request;

use std::collections::HashMap;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context as _;
use thiserror::Error;

use crate::backend::DecodeBackend;
use crate::decoder::scheduler::JobRunner;
use crate::decoder::scheduler::JobScheduler;
use crate::decoder::scheduler::SchedulerError;
use crate::decoder::worker::DecodeWorker;
use crate::device::context::Context;
use crate::device::context::ContextId;
use crate::device::context::LifecycleState;
use crate::device::queue::CaptureBuffer;
use crate::device::queue::InputBuffer;
use crate::device::queue::QueueError;
use crate::device::request::validate_request;
use crate::device::request::ContextLookup;
use crate::device::request::Request;
use crate::device::request::RequestError;
use crate::device::request::RequestHandle;
use crate::format::DecoderCapabilities;
use crate::format::HwArch;
use crate::format::SupportedFormats;
use crate::Codec;
use crate::QueueDirection;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("codec {0:?} is not supported by this device")]
    UnsupportedCodec(Codec),
    #[error("no context with id {0}")]
    UnknownContext(ContextId),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Description of the decoder hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub hw_arch: HwArch,
    pub capabilities: DecoderCapabilities,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            hw_arch: HwArch::default(),
            capabilities: DecoderCapabilities::FORMAT_MM21
                | DecoderCapabilities::FORMAT_MT21C
                | DecoderCapabilities::FORMAT_H264_SLICE
                | DecoderCapabilities::FORMAT_VP8_FRAME
                | DecoderCapabilities::FORMAT_VP9_FRAME,
        }
    }
}

impl DeviceConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn hw_arch(mut self, hw_arch: HwArch) -> Self {
        self.hw_arch = hw_arch;
        self
    }

    pub fn capabilities(mut self, capabilities: DecoderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

pub struct Device {
    formats: Arc<SupportedFormats>,
    contexts: Mutex<HashMap<ContextId, Arc<Context>>>,
    next_context_id: AtomicU32,
    scheduler: Arc<JobScheduler>,
    worker: DecodeWorker,
}

impl Device {
    pub fn new(config: DeviceConfig) -> Result<Self, DeviceError> {
        let formats = Arc::new(SupportedFormats::new(config.capabilities, config.hw_arch));

        log::info!(
            "decoder device {:?}: {} formats",
            config.hw_arch,
            formats.formats().len()
        );

        Ok(Self {
            formats,
            contexts: Mutex::new(HashMap::new()),
            next_context_id: AtomicU32::new(0),
            scheduler: Arc::new(JobScheduler::new()?),
            worker: DecodeWorker::new(),
        })
    }

    pub fn formats(&self) -> &Arc<SupportedFormats> {
        &self.formats
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Opens a decoding session for `codec`, decoded by `backend`.
    pub fn open_context(
        &self,
        codec: Codec,
        mut backend: Box<dyn DecodeBackend>,
    ) -> Result<Arc<Context>, DeviceError> {
        if !self.formats.supports_codec(codec) {
            return Err(DeviceError::UnsupportedCodec(codec));
        }
        backend
            .init(codec, &self.formats)
            .with_context(|| format!("failed to initialize backend for {:?}", codec))?;

        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let ctx = Arc::new(Context::new(id, codec, Arc::clone(&self.formats), backend));
        self.contexts.lock().unwrap().insert(id, Arc::clone(&ctx));

        log::debug!("[{}] open context for {:?}", id, codec);

        Ok(ctx)
    }

    /// Closes a session. Both queues are stopped, which returns pending buffers to the client
    /// and flushes the backend.
    pub fn close_context(&self, id: ContextId) -> Result<(), DeviceError> {
        let ctx = self
            .contexts
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or(DeviceError::UnknownContext(id))?;

        self.scheduler.cancel(id);
        self.scheduler.wait_idle(id);
        ctx.streamoff(QueueDirection::Input);
        ctx.streamoff(QueueDirection::Capture);
        self.scheduler.cancel(id);
        ctx.set_lifecycle(LifecycleState::Free);

        log::debug!(
            "[{}] close context, {} frames decoded",
            id,
            ctx.decoded_frame_count()
        );

        Ok(())
    }

    fn context(&self, id: ContextId) -> Result<Arc<Context>, DeviceError> {
        self.find_context(id).ok_or(DeviceError::UnknownContext(id))
    }

    /// Validates `request` and queues its buffer into the input queue of its context.
    ///
    /// Nothing is queued if validation fails.
    pub fn queue_request(&self, request: Request) -> Result<Arc<RequestHandle>, RequestError> {
        let ctx = validate_request(&request, self)?;
        let (_, buffer, handle) = request.into_queued()?;

        ctx.buf_queue(buffer)?;
        log::debug!("[{}] request {} queued", ctx.id(), handle.id());
        self.scheduler.try_schedule(&ctx);

        Ok(handle)
    }

    /// Input buffers can only be queued with a request, see [`Device::queue_request`].
    pub fn queue_input_buffer(
        &self,
        id: ContextId,
        buffer: InputBuffer,
    ) -> Result<(), DeviceError> {
        self.context(id)?;
        log::error!("[{}] input buffer {:?} queued without request", id, buffer);
        Err(QueueError::RequestRequired.into())
    }

    pub fn queue_capture_buffer(
        &self,
        id: ContextId,
        buffer: CaptureBuffer,
    ) -> Result<(), DeviceError> {
        let ctx = self.context(id)?;
        ctx.buf_queue(buffer)?;
        self.scheduler.try_schedule(&ctx);
        Ok(())
    }

    pub fn streamon(&self, id: ContextId, direction: QueueDirection) -> Result<(), DeviceError> {
        let ctx = self.context(id)?;
        ctx.streamon(direction);
        self.scheduler.try_schedule(&ctx);
        Ok(())
    }

    pub fn streamoff(&self, id: ContextId, direction: QueueDirection) -> Result<(), DeviceError> {
        let ctx = self.context(id)?;
        if direction == QueueDirection::Input {
            // A job finishing meanwhile may have queued the context again.
            self.scheduler.cancel(id);
            self.scheduler.wait_idle(id);
            ctx.streamoff(direction);
            self.scheduler.cancel(id);
        } else {
            ctx.streamoff(direction);
        }
        Ok(())
    }

    /// Runs the jobs of every ready context on the calling thread. Returns the number of jobs
    /// run.
    pub fn run_pending(&self) -> usize {
        self.scheduler.run_pending(&self.worker)
    }

    /// Starts running jobs on a dedicated thread, until the returned runner is stopped or
    /// dropped.
    pub fn start_runner(&self) -> Result<JobRunner, DeviceError> {
        Ok(JobRunner::start(Arc::clone(&self.scheduler), self.worker)?)
    }
}

impl ContextLookup for Device {
    fn find_context(&self, id: ContextId) -> Option<Arc<Context>> {
        self.contexts.lock().unwrap().get(&id).cloned()
    }
}
