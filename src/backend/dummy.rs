// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains a dummy backend whose only purpose is to let the decoder run so we can
//! test it in isolation.
//!
//! The backend follows a script of [`DummyStep`]s, one per decode call, and "decodes" a frame by
//! writing the CRC32 of the bitstream at the start of the luma plane of the capture buffer. Every
//! call is recorded in a [`DummyLog`] shared with whoever created the backend.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::bail;

use crate::backend::Bitstream;
use crate::backend::DecodeBackend;
use crate::backend::DecodeErrorKind;
use crate::backend::DecodeOutcome;
use crate::device::context::Context;
use crate::device::controls::required_controls;
use crate::device::controls::ControlValue;
use crate::format::SupportedFormats;
use crate::video_frame::FrameBuffer;
use crate::Codec;

/// What the backend does with the frame of a decode call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameAction {
    /// No frame is produced.
    Drop,
    /// The frame is written into the next capture buffer right away.
    Emit,
    /// The frame is kept until the next flush, like a reordered frame.
    Hold,
}

/// Behavior of one decode call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DummyStep {
    pub outcome: DecodeOutcome,
    pub frame: FrameAction,
    pub resolution_changed: bool,
}

impl DummyStep {
    pub fn consumed() -> Self {
        Self {
            outcome: DecodeOutcome::Consumed,
            frame: FrameAction::Emit,
            resolution_changed: false,
        }
    }

    pub fn pending() -> Self {
        Self {
            outcome: DecodeOutcome::Pending,
            frame: FrameAction::Drop,
            resolution_changed: false,
        }
    }

    pub fn error(kind: DecodeErrorKind) -> Self {
        Self {
            outcome: DecodeOutcome::Error(kind),
            frame: FrameAction::Drop,
            resolution_changed: false,
        }
    }

    pub fn frame(mut self, frame: FrameAction) -> Self {
        self.frame = frame;
        self
    }

    pub fn resolution_change(mut self) -> Self {
        self.resolution_changed = true;
        self
    }
}

/// A decode call as seen by the dummy backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyCall {
    /// Index of the input buffer, or `None` for a flush.
    pub input: Option<usize>,
    pub crc: Option<u32>,
    /// Value of the first control the codec requires, as active during the call.
    pub control: Option<ControlValue>,
    pub outcome: DecodeOutcome,
}

#[derive(Debug, Default)]
pub struct DummyLog {
    pub calls: Vec<DummyCall>,
    /// Capture buffer index and CRC of every frame written.
    pub frames: Vec<(usize, u32)>,
}

/// Dummy backend that can be used for any codec.
#[derive(Default)]
pub struct DummyBackend {
    script: VecDeque<DummyStep>,
    held: VecDeque<u32>,
    /// Codecs the backend accepts to be initialized for, or all of them if `None`.
    codecs: Option<Vec<Codec>>,
    log: Arc<Mutex<DummyLog>>,
}

impl DummyBackend {
    /// A backend consuming every buffer and emitting one frame per buffer.
    pub fn new() -> Self {
        Default::default()
    }

    /// A backend following `script`, then consuming every buffer once the script is exhausted.
    pub fn with_script<I: IntoIterator<Item = DummyStep>>(script: I) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Restricts the codecs the backend can be initialized for.
    pub fn supporting<I: IntoIterator<Item = Codec>>(mut self, codecs: I) -> Self {
        self.codecs = Some(codecs.into_iter().collect());
        self
    }

    pub fn log(&self) -> Arc<Mutex<DummyLog>> {
        Arc::clone(&self.log)
    }

    /// Writes the frame identified by `crc` into the next capture buffer. Returns `false` if there
    /// is no capture buffer to write into.
    fn write_frame(&self, ctx: &Context, frame: Option<FrameBuffer>, crc: u32) -> bool {
        let Some(frame) = frame.or_else(|| ctx.get_capture_buffer()) else {
            return false;
        };

        if let Some(va) = &frame.base_y.va {
            va.write(0, &crc.to_le_bytes());
        }

        match ctx.cap_to_disp(&frame, false) {
            Ok(()) => {
                self.log.lock().unwrap().frames.push((frame.index, crc));
                true
            }
            Err(e) => {
                log::error!("dummy backend cannot display frame: {}", e);
                false
            }
        }
    }
}

impl DecodeBackend for DummyBackend {
    fn init(&mut self, codec: Codec, formats: &SupportedFormats) -> anyhow::Result<()> {
        if let Some(codecs) = &self.codecs {
            if !codecs.contains(&codec) {
                bail!("dummy backend cannot decode {:?}", codec);
            }
        }
        if formats.default_capture_format().is_none() {
            bail!("no capture format to decode {:?} into", codec);
        }
        Ok(())
    }

    fn decode(
        &mut self,
        ctx: &Context,
        bitstream: Option<&Bitstream>,
        frame: Option<FrameBuffer>,
        resolution_changed: &mut bool,
    ) -> DecodeOutcome {
        let control = required_controls(ctx.codec())
            .next()
            .and_then(|id| ctx.control(id));

        let Some(bitstream) = bitstream else {
            let mut frame = frame;
            while let Some(crc) = self.held.front().copied() {
                if !self.write_frame(ctx, frame.take(), crc) {
                    break;
                }
                self.held.pop_front();
            }

            self.log.lock().unwrap().calls.push(DummyCall {
                input: None,
                crc: None,
                control,
                outcome: DecodeOutcome::Consumed,
            });
            return DecodeOutcome::Consumed;
        };

        let step = self.script.pop_front().unwrap_or_else(DummyStep::consumed);
        let crc = crc32fast::hash(bitstream.data());

        match step.frame {
            FrameAction::Drop => (),
            FrameAction::Emit => {
                if !self.write_frame(ctx, frame, crc) {
                    self.held.push_back(crc);
                }
            }
            FrameAction::Hold => self.held.push_back(crc),
        }

        *resolution_changed = step.resolution_changed;

        self.log.lock().unwrap().calls.push(DummyCall {
            input: Some(bitstream.index),
            crc: Some(crc),
            control,
            outcome: step.outcome,
        });

        step.outcome
    }
}
