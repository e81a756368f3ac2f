// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode jobs.
//!
//! A job takes the next pending input buffer of a context, applies the controls of the request it
//! was queued with, and hands its bitstream to the backend. [`worker::DecodeWorker`] runs a single
//! job, and [`scheduler::JobScheduler`] decides which context runs the next one, making sure a
//! context never has two jobs in flight.

pub mod scheduler;
pub mod worker;

use nix::errno::Errno;
use thiserror::Error;

use crate::backend::DecodeOutcome;

/// Failures happening while a job runs. They are logged and recorded on the buffers involved,
/// never returned to the client that submitted the work.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("virtual address of input buffer {0} is unavailable")]
    BufferMappingUnavailable(usize),
    #[error("input buffer {0} is not pending")]
    InputUnavailable(usize),
    #[error("no capture buffer to write the frame into")]
    OutputUnavailable,
    #[error("decode failed: {0}")]
    DecodeRecoverable(Errno),
    #[error("hardware failed to decode the buffer")]
    DecodeIo,
}

/// What a job did.
#[derive(Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// There was no input buffer to decode.
    NoInput,
    /// The backend was called and did not fail.
    Decoded(DecodeOutcome),
    Failed(JobError),
}
