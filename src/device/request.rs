// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Requests: the atomic unit of work of a stateless decoder.
//!
//! A [`Request`] bundles one bitstream buffer with the control values needed to decode it. It is
//! checked by [`validate_request`] before being admitted; once admitted it lives on as a shared
//! [`RequestHandle`] that the worker applies and completes.

use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::device::context::Context;
use crate::device::context::ContextId;
use crate::device::controls::required_controls;
use crate::device::controls::ControlError;
use crate::device::controls::ControlId;
use crate::device::controls::ControlSnapshot;
use crate::device::queue::InputBuffer;
use crate::device::queue::QueueError;

pub type RequestId = u64;

/// Why the buffers of a request do not form a valid unit of work.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestShape {
    NoBuffer,
    TooManyBuffers(usize),
}

impl fmt::Display for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestShape::NoBuffer => write!(f, "no buffer provided with the request"),
            RequestShape::TooManyBuffers(n) => {
                write!(f, "too many buffers ({}) provided with the request", n)
            }
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{0}")]
    InvalidRequestShape(RequestShape),
    #[error("cannot find context {0} for the request buffer")]
    ContextNotFound(ContextId),
    #[error("cannot find control handler for request")]
    ControlSetNotFound,
    #[error("missing required codec control {0:?}")]
    MissingMandatoryControl(ControlId),
    #[error("invalid control value: {0}")]
    InvalidControl(#[from] ControlError),
    #[error("buffer cannot be admitted: {0}")]
    Admission(#[from] QueueError),
}

/// Resolves the context a request buffer is targeted at.
pub trait ContextLookup {
    fn find_context(&self, id: ContextId) -> Option<Arc<Context>>;
}

/// A buffer attached to a request, along with the context whose input queue it goes to.
#[derive(Debug)]
pub struct RequestBuffer {
    pub context: ContextId,
    pub buffer: InputBuffer,
}

/// A unit of work being submitted by a client.
#[derive(Debug)]
pub struct Request {
    id: RequestId,
    buffers: Vec<RequestBuffer>,
    controls: Option<ControlSnapshot>,
}

impl Request {
    pub fn new(id: RequestId) -> Self {
        Self {
            id,
            buffers: Vec::new(),
            controls: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn add_buffer(mut self, context: ContextId, buffer: InputBuffer) -> Self {
        self.buffers.push(RequestBuffer { context, buffer });
        self
    }

    pub fn set_controls(mut self, controls: ControlSnapshot) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn buffers(&self) -> &[RequestBuffer] {
        &self.buffers
    }

    pub fn controls(&self) -> Option<&ControlSnapshot> {
        self.controls.as_ref()
    }

    /// Turns a validated request into the buffer to queue and the handle shared with it.
    pub(crate) fn into_queued(
        self,
    ) -> Result<(ContextId, InputBuffer, Arc<RequestHandle>), RequestError> {
        let controls = self.controls.ok_or(RequestError::ControlSetNotFound)?;
        let mut buffers = self.buffers;
        let RequestBuffer {
            context,
            mut buffer,
        } = match buffers.len() {
            1 => buffers.remove(0),
            0 => return Err(RequestError::InvalidRequestShape(RequestShape::NoBuffer)),
            n => {
                return Err(RequestError::InvalidRequestShape(
                    RequestShape::TooManyBuffers(n),
                ))
            }
        };
        let handle = Arc::new(RequestHandle::new(self.id, controls));
        buffer.set_request(Arc::clone(&handle));
        Ok((context, buffer, handle))
    }
}

/// Progress of an admitted request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting in the input queue.
    Queued,
    /// Its controls have been applied to the context for decoding.
    Applied,
    /// Its buffer has been completed.
    Complete,
}

/// An admitted request, shared between the client and the buffer it was queued with.
#[derive(Debug)]
pub struct RequestHandle {
    id: RequestId,
    controls: ControlSnapshot,
    state: Mutex<RequestState>,
    completed: Condvar,
}

impl RequestHandle {
    fn new(id: RequestId, controls: ControlSnapshot) -> Self {
        Self {
            id,
            controls,
            state: Mutex::new(RequestState::Queued),
            completed: Condvar::new(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn controls(&self) -> &ControlSnapshot {
        &self.controls
    }

    pub fn state(&self) -> RequestState {
        *self.state.lock().unwrap()
    }

    pub fn is_complete(&self) -> bool {
        self.state() == RequestState::Complete
    }

    pub(crate) fn mark_applied(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == RequestState::Queued {
            *state = RequestState::Applied;
        }
    }

    /// Marks the request complete and wakes up everyone waiting on it.
    pub(crate) fn complete(&self) {
        *self.state.lock().unwrap() = RequestState::Complete;
        self.completed.notify_all();
    }

    /// Blocks until the request is complete.
    pub fn wait(&self) {
        let state = self.state.lock().unwrap();
        let _state = self
            .completed
            .wait_while(state, |s| *s != RequestState::Complete)
            .unwrap();
    }

    /// Blocks until the request is complete or `timeout` expires. Returns whether the request
    /// completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .completed
            .wait_timeout_while(state, timeout, |s| *s != RequestState::Complete)
            .unwrap();
        *state == RequestState::Complete
    }
}

/// Checks that `request` can be admitted into the input queue of its context.
///
/// The request must carry exactly one buffer, target an existing context, and hold every control
/// its codec requires. The final word belongs to the admission check of the input queue. Nothing
/// is modified, whatever the result.
pub fn validate_request<L>(request: &Request, contexts: &L) -> Result<Arc<Context>, RequestError>
where
    L: ContextLookup + ?Sized,
{
    let buffer = match request.buffers() {
        [buffer] => buffer,
        [] => {
            log::error!("No buffer provided with the request");
            return Err(RequestError::InvalidRequestShape(RequestShape::NoBuffer));
        }
        buffers => {
            log::error!("Too many buffers ({}) provided with the request", buffers.len());
            return Err(RequestError::InvalidRequestShape(
                RequestShape::TooManyBuffers(buffers.len()),
            ));
        }
    };

    let ctx = contexts.find_context(buffer.context).ok_or_else(|| {
        log::error!("Cannot find context {} for request buffer", buffer.context);
        RequestError::ContextNotFound(buffer.context)
    })?;

    let controls = request.controls().ok_or_else(|| {
        log::error!("Cannot find control handler for request");
        RequestError::ControlSetNotFound
    })?;

    if let Some(missing) = required_controls(ctx.codec()).find(|id| controls.find(*id).is_none()) {
        log::error!("Missing required codec control {:?}", missing);
        return Err(RequestError::MissingMandatoryControl(missing));
    }

    if let Err(e) = ctx.check_controls(controls) {
        log::error!("Invalid control in request: {}", e);
        return Err(e.into());
    }

    ctx.validate_input(&buffer.buffer)?;

    Ok(ctx)
}
