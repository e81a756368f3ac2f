// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode backends.
//!
//! A backend is the hardware-specific part of the decoder: it parses the bitstream it is given,
//! programs the hardware with the active control values of the context, and writes decoded frames
//! into the capture buffers it obtains from the context. This module contains the interface
//! between the decode worker and backends, which is not tied to any particular hardware.

pub mod dummy;
#[cfg(feature = "v4l2")]
pub mod v4l2;

use bytes::Bytes;
use nix::errno::Errno;

use crate::device::context::Context;
use crate::format::SupportedFormats;
use crate::video_frame::FrameBuffer;
use crate::Codec;

/// Compressed data handed to a backend for one decode call.
#[derive(Clone, Debug)]
pub struct Bitstream {
    /// Index of the input buffer the data comes from.
    pub index: usize,
    /// CPU mapping of the input buffer.
    pub va: Bytes,
    pub dma_addr: u64,
    /// Number of meaningful bytes in `va`.
    pub size: usize,
    pub timestamp: u64,
}

impl Bitstream {
    /// The meaningful part of the buffer.
    pub fn data(&self) -> &[u8] {
        &self.va[..self.size.min(self.va.len())]
    }
}

/// How a decode call failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The hardware failed on the buffer. The buffer keeps a persistent error flag.
    Io,
    /// Any other failure, reported with its errno.
    Recoverable(Errno),
}

/// Result of a decode call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The input has been fully consumed and can be completed.
    Consumed,
    /// The input has not been consumed yet and must be submitted again by the next job.
    Pending,
    Error(DecodeErrorKind),
}

impl DecodeOutcome {
    /// Maps a raw return code, where zero means consumed, a positive value means pending and a
    /// negative value is an errno.
    pub fn from_raw(ret: i32) -> Self {
        match ret {
            0 => DecodeOutcome::Consumed,
            r if r > 0 => DecodeOutcome::Pending,
            r => match Errno::from_raw(-r) {
                Errno::EIO => DecodeOutcome::Error(DecodeErrorKind::Io),
                errno => DecodeOutcome::Error(DecodeErrorKind::Recoverable(errno)),
            },
        }
    }

    /// Whether the input buffer is done with, successfully or not.
    pub fn input_done(&self) -> bool {
        !matches!(self, DecodeOutcome::Pending)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DecodeOutcome::Error(_))
    }
}

/// Hardware-specific part of the decoder.
///
/// `decode` is called with the bitstream of the next input buffer, or with no bitstream at all to
/// flush the frames the hardware still holds. Frames are written into the capture buffers
/// returned by [`Context::get_capture_buffer`] and handed back through [`Context::cap_to_disp`].
/// The backend sets `resolution_changed` when the stream switches to a new resolution.
///
/// Calls for a given context never overlap.
pub trait DecodeBackend: Send {
    /// Prepares the backend for a session decoding `codec`, before any decode call.
    fn init(&mut self, _codec: Codec, _formats: &SupportedFormats) -> anyhow::Result<()> {
        Ok(())
    }

    fn decode(
        &mut self,
        ctx: &Context,
        bitstream: Option<&Bitstream>,
        frame: Option<FrameBuffer>,
        resolution_changed: &mut bool,
    ) -> DecodeOutcome;
}
