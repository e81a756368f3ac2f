// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decoding contexts.
//!
//! A [`Context`] holds everything belonging to one decoding session: its two buffer queues, the
//! active control values, the capture format and the backend doing the actual decoding. All the
//! mutable session state lives in a single [`ContextState`] behind one lock, which is only held
//! for short sections and never while the backend is decoding.

use std::collections::VecDeque;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::backend::Bitstream;
use crate::backend::DecodeBackend;
use crate::backend::DecodeOutcome;
use crate::decoder::worker::flush_decoder;
use crate::decoder::JobError;
use crate::device::controls::ControlError;
use crate::device::controls::ControlHandler;
use crate::device::controls::ControlId;
use crate::device::controls::ControlSnapshot;
use crate::device::controls::ControlValue;
use crate::device::queue::BufferState;
use crate::device::queue::CaptureBuffer;
use crate::device::queue::CaptureQueue;
use crate::device::queue::DoneBuffer;
use crate::device::queue::InputBuffer;
use crate::device::queue::InputQueue;
use crate::device::queue::QueueBuffer;
use crate::device::queue::QueueError;
use crate::device::request::RequestHandle;
use crate::format::CaptureFormat;
use crate::format::SupportedFormats;
use crate::format::VDEC_MIN_HEIGHT;
use crate::format::VDEC_MIN_WIDTH;
use crate::video_frame::FrameBuffer;
use crate::video_frame::FramePlane;
use crate::video_frame::UV_PLANE;
use crate::video_frame::Y_PLANE;
use crate::Codec;
use crate::QueueDirection;
use crate::Resolution;

pub type ContextId = u32;

/// Lifecycle of a decoding session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// The session is closed.
    Free,
    /// Freshly opened, no bitstream received yet.
    Init,
    /// Bitstream is flowing and headers are expected.
    Header,
    /// The capture queue has been stopped and the decoder flushed.
    Flush,
}

/// Events reported to the client of a context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContextEvent {
    /// The stream switched to a new resolution.
    SourceChange,
}

/// A buffer handed to [`Context::buf_queue`].
#[derive(Debug)]
pub enum QueuedBuffer {
    Input(InputBuffer),
    Capture(CaptureBuffer),
}

impl From<InputBuffer> for QueuedBuffer {
    fn from(buffer: InputBuffer) -> Self {
        QueuedBuffer::Input(buffer)
    }
}

impl From<CaptureBuffer> for QueuedBuffer {
    fn from(buffer: CaptureBuffer) -> Self {
        QueuedBuffer::Capture(buffer)
    }
}

/// Mutable state of a context, guarded by the context lock.
#[derive(Debug)]
pub(crate) struct ContextState {
    pub(crate) lifecycle: LifecycleState,
    pub(crate) input: InputQueue,
    pub(crate) capture: CaptureQueue,
    pub(crate) capture_format: Option<CaptureFormat>,
    pub(crate) events: VecDeque<ContextEvent>,
    /// Number of capture buffers the stream needs, reported through the volatile
    /// `MinBuffersForCapture` control.
    pub(crate) dpb_size: u32,
    /// Sequence number given to the next input buffer queued.
    pub(crate) next_input_sequence: u64,
}

pub struct Context {
    id: ContextId,
    codec: Codec,
    formats: Arc<SupportedFormats>,
    state: Mutex<ContextState>,
    controls: Mutex<ControlHandler>,
    backend: Mutex<Box<dyn DecodeBackend>>,
    decoded_frame_cnt: AtomicU32,
}

impl Context {
    pub(crate) fn new(
        id: ContextId,
        codec: Codec,
        formats: Arc<SupportedFormats>,
        backend: Box<dyn DecodeBackend>,
    ) -> Self {
        let capture_format = formats.default_capture_format().map(|format| {
            CaptureFormat::new(format, Resolution::from((VDEC_MIN_WIDTH, VDEC_MIN_HEIGHT)))
        });

        Self {
            id,
            codec,
            formats,
            state: Mutex::new(ContextState {
                lifecycle: LifecycleState::Init,
                input: InputQueue::new(),
                capture: CaptureQueue::new(),
                capture_format,
                events: VecDeque::new(),
                dpb_size: 1,
                next_input_sequence: 0,
            }),
            controls: Mutex::new(ControlHandler::new()),
            backend: Mutex::new(backend),
            decoded_frame_cnt: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn formats(&self) -> &Arc<SupportedFormats> {
        &self.formats
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap()
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lock_state().lifecycle
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: LifecycleState) {
        self.lock_state().lifecycle = lifecycle;
    }

    /// Number of frames successfully written to capture buffers so far.
    pub fn decoded_frame_count(&self) -> u32 {
        self.decoded_frame_cnt.load(Ordering::Relaxed)
    }

    pub fn capture_format(&self) -> Option<CaptureFormat> {
        self.lock_state().capture_format
    }

    /// Sets the coded resolution of the stream, adjusted to what the hardware supports, and
    /// recomputes the capture format from it.
    pub fn set_resolution(&self, resolution: Resolution) -> Option<CaptureFormat> {
        let framesizes = self.formats.framesizes(self.codec.fourcc())?;
        let format = self.formats.default_capture_format()?;
        let capture_format = CaptureFormat::new(format, framesizes.adjust(resolution));

        log::debug!(
            "[{}] capture format {} {}x{}",
            self.id,
            capture_format.format.fourcc,
            capture_format.coded_resolution.width,
            capture_format.coded_resolution.height
        );

        self.lock_state().capture_format = Some(capture_format);
        Some(capture_format)
    }

    /// Sets the number of capture buffers the stream needs.
    pub fn set_dpb_size(&self, dpb_size: u32) {
        self.lock_state().dpb_size = dpb_size;
    }

    /// Checks that `buffer` can be admitted into the input queue.
    pub fn validate_input(&self, buffer: &InputBuffer) -> Result<(), QueueError> {
        self.lock_state().input.validate(buffer)
    }

    /// Enqueues `buffer` into the queue matching its direction.
    ///
    /// The first input buffer ever queued moves the context from `Init` to `Header`.
    pub fn buf_queue<B: Into<QueuedBuffer>>(&self, buffer: B) -> Result<(), QueueError> {
        let mut state = self.lock_state();

        match buffer.into() {
            QueuedBuffer::Input(mut buffer) => {
                log::debug!("[{}] queue input buffer {}", self.id, buffer.index());
                buffer.set_sequence(state.next_input_sequence);
                state.input.queue(buffer)?;
                state.next_input_sequence += 1;
                if state.lifecycle == LifecycleState::Init {
                    state.lifecycle = LifecycleState::Header;
                }
            }
            QueuedBuffer::Capture(buffer) => {
                log::debug!("[{}] queue capture buffer {}", self.id, buffer.index());
                state.capture.queue(buffer)?;
            }
        }

        Ok(())
    }

    /// Builds the descriptor of the next pending capture buffer, if any. The buffer stays
    /// queued.
    pub fn get_capture_buffer(&self) -> Option<FrameBuffer> {
        let state = self.lock_state();

        let Some(buffer) = state.capture.next() else {
            log::debug!("[{}] no free capture buffer", self.id);
            return None;
        };
        let format = state.capture_format?;

        let plane = |i: usize| {
            buffer.plane(i).map(|p| FramePlane {
                va: p.mapping.clone(),
                dma_addr: p.dma_addr,
                size: format.sizeimage[i],
            })
        };

        let base_y = plane(Y_PLANE)?;
        let base_c = if format.num_planes() == 2 {
            Some(plane(UV_PLANE)?)
        } else {
            None
        };

        log::debug!(
            "[{}] frame buffer {} y {:#x} c {:?}",
            self.id,
            buffer.index(),
            base_y.dma_addr,
            base_c.as_ref().map(|c| c.dma_addr)
        );

        Some(FrameBuffer {
            index: buffer.index(),
            base_y,
            base_c,
        })
    }

    /// Completes the capture buffer described by `frame`, with the payload of every plane set to
    /// its size in the capture format.
    pub fn cap_to_disp(&self, frame: &FrameBuffer, error: bool) -> Result<(), JobError> {
        let mut state = self.lock_state();

        if state.capture.next().map(|b| b.index()) != Some(frame.index) {
            log::error!("[{}] no capture buffer to display {}", self.id, frame.index);
            return Err(JobError::OutputUnavailable);
        }
        let sizeimage = state.capture_format.map(|f| (f.sizeimage, f.num_planes()));
        let Some(mut buffer) = state.capture.remove_next() else {
            return Err(JobError::OutputUnavailable);
        };

        if let Some((sizes, num_planes)) = sizeimage {
            for (plane, size) in sizes.iter().take(num_planes).enumerate() {
                buffer.set_plane_payload(plane, *size);
            }
        }

        let buf_state = if error {
            BufferState::Error
        } else {
            self.decoded_frame_cnt.fetch_add(1, Ordering::Relaxed);
            BufferState::Done
        };
        state.capture.buf_done(buffer, buf_state);

        log::debug!("[{}] capture buffer {} done ({:?})", self.id, frame.index, buf_state);

        Ok(())
    }

    /// Removes the input buffer `index`, queued as `sequence`, from the head of the input queue
    /// and completes it according to `outcome`. A buffer queued again under the same index after
    /// a stream-off is left alone.
    pub(crate) fn out_to_done(
        &self,
        index: usize,
        sequence: u64,
        outcome: DecodeOutcome,
    ) -> Result<(), JobError> {
        let mut state = self.lock_state();

        if !is_head(&state.input, index, sequence) {
            log::error!("[{}] free bitstream buffer {} failed", self.id, index);
            return Err(JobError::InputUnavailable(index));
        }
        let Some(buffer) = state.input.remove_next() else {
            return Err(JobError::InputUnavailable(index));
        };

        let buf_state = if outcome.is_error() {
            BufferState::Error
        } else {
            BufferState::Done
        };
        state.input.buf_done(buffer, buf_state);

        Ok(())
    }

    /// Sets the persistent error flag of the input buffer `index`, queued as `sequence`, if it is
    /// still pending.
    pub(crate) fn set_input_error(&self, index: usize, sequence: u64) {
        let mut state = self.lock_state();

        match state.input.next_mut() {
            Some(buffer) if buffer.index() == index && buffer.sequence() == sequence => {
                buffer.set_error()
            }
            _ => log::error!("[{}] input buffer {} is not pending", self.id, index),
        }
    }

    pub(crate) fn queue_event(&self, event: ContextEvent) {
        self.lock_state().events.push_back(event);
    }

    pub fn dequeue_event(&self) -> Option<ContextEvent> {
        self.lock_state().events.pop_front()
    }

    pub fn dequeue_input(&self) -> Option<DoneBuffer<InputBuffer>> {
        self.lock_state().input.dequeue()
    }

    pub fn dequeue_capture(&self) -> Option<DoneBuffer<CaptureBuffer>> {
        self.lock_state().capture.dequeue()
    }

    pub fn num_pending(&self, direction: QueueDirection) -> usize {
        let state = self.lock_state();
        match direction {
            QueueDirection::Input => state.input.num_pending(),
            QueueDirection::Capture => state.capture.num_pending(),
        }
    }

    /// Whether a job can be run for this context: input is streaming, the next input buffer can
    /// be read, and a capture buffer is available unless the capture queue is buffered.
    pub fn job_ready(&self) -> bool {
        let state = self.lock_state();

        if state.lifecycle == LifecycleState::Free {
            return false;
        }
        if !state.input.is_streaming() {
            return false;
        }
        if !state.input.next().is_some_and(|b| b.mapping().is_some()) {
            return false;
        }

        self.formats.capture_buffered()
            || (state.capture.is_streaming() && state.capture.num_pending() > 0)
    }

    pub fn streamon(&self, direction: QueueDirection) {
        let mut state = self.lock_state();

        log::debug!("[{}] stream on {:?}", self.id, direction);

        match direction {
            QueueDirection::Input => state.input.set_streaming(true),
            QueueDirection::Capture => {
                state.capture.set_streaming(true);
                if state.lifecycle == LifecycleState::Flush {
                    state.lifecycle = LifecycleState::Header;
                }
            }
        }
    }

    /// Stops a queue. Pending buffers are returned to the client with an error.
    ///
    /// Stopping the input queue also completes the requests of the returned buffers. Stopping
    /// the capture queue first flushes the backend, which may still write frames into pending
    /// capture buffers.
    pub fn streamoff(&self, direction: QueueDirection) {
        log::debug!("[{}] stream off {:?}", self.id, direction);

        match direction {
            QueueDirection::Input => {
                let requests = {
                    let mut state = self.lock_state();
                    state.input.set_streaming(false);
                    let requests = state
                        .input
                        .pending()
                        .filter_map(|b| b.request().cloned())
                        .collect::<Vec<_>>();
                    state.input.drain_pending(BufferState::Error);
                    requests
                };

                for request in requests {
                    request.complete();
                }
            }
            QueueDirection::Capture => {
                let outcome = flush_decoder(self);
                log::debug!("[{}] flush done: {:?}", self.id, outcome);

                let mut state = self.lock_state();
                state.capture.set_streaming(false);
                state.capture.drain_pending(BufferState::Error);
                if state.lifecycle != LifecycleState::Free {
                    state.lifecycle = LifecycleState::Flush;
                }
            }
        }
    }

    /// Current value of control `id`. Volatile controls are read from the context state.
    pub fn control(&self, id: ControlId) -> Option<ControlValue> {
        let controls = self.controls.lock().unwrap();
        let cfg = controls.config(id)?;

        if cfg.volatile {
            match id {
                ControlId::MinBuffersForCapture => {
                    let dpb_size = self.lock_state().dpb_size;
                    Some(ControlValue::Integer(dpb_size as i64))
                }
                _ => controls.get(id).cloned(),
            }
        } else {
            controls.get(id).cloned()
        }
    }

    /// Sets control `id` outside of any request.
    pub fn set_control(&self, id: ControlId, value: ControlValue) -> Result<(), ControlError> {
        self.controls.lock().unwrap().set(id, value)
    }

    /// Checks the values of `snapshot` against the configuration of the controls, without
    /// applying them.
    pub fn check_controls(&self, snapshot: &ControlSnapshot) -> Result<(), ControlError> {
        self.controls.lock().unwrap().check_snapshot(snapshot)
    }

    /// Makes the control values of `request` the active ones.
    pub(crate) fn apply_request_controls(
        &self,
        request: &RequestHandle,
    ) -> Result<(), ControlError> {
        self.controls
            .lock()
            .unwrap()
            .apply_snapshot(request.controls())?;
        request.mark_applied();
        Ok(())
    }

    /// Runs the backend. Only one decode call runs at a time for a context.
    pub(crate) fn decode(
        &self,
        bitstream: Option<&Bitstream>,
        frame: Option<FrameBuffer>,
        resolution_changed: &mut bool,
    ) -> DecodeOutcome {
        let mut backend = self.backend.lock().unwrap();
        backend.decode(self, bitstream, frame, resolution_changed)
    }
}

fn is_head(queue: &InputQueue, index: usize, sequence: u64) -> bool {
    queue
        .next()
        .is_some_and(|b| b.index() == index && b.sequence() == sequence)
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("codec", &self.codec)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::device::queue::CapturePlane;
    use crate::format::DecoderCapabilities;
    use crate::format::HwArch;
    use crate::video_frame::PlaneMapping;

    pub(crate) fn formats(hw_arch: HwArch) -> Arc<SupportedFormats> {
        let caps = DecoderCapabilities::FORMAT_MM21
            | DecoderCapabilities::FORMAT_MT21C
            | DecoderCapabilities::FORMAT_H264_SLICE
            | DecoderCapabilities::FORMAT_VP8_FRAME
            | DecoderCapabilities::FORMAT_VP9_FRAME;
        Arc::new(SupportedFormats::new(caps, hw_arch))
    }

    pub(crate) fn context(codec: Codec) -> Context {
        Context::new(0, codec, formats(HwArch::LatSingleCore), Box::new(DummyBackend::new()))
    }

    pub(crate) fn input(index: usize) -> InputBuffer {
        InputBuffer::new(index, Bytes::from(vec![index as u8; 16]), 0x10_0000 * (index as u64 + 1))
    }

    /// A capture buffer with planes large enough for the given capture format.
    pub(crate) fn capture(index: usize, format: &CaptureFormat) -> CaptureBuffer {
        let planes = (0..format.num_planes())
            .map(|i| {
                CapturePlane::new(
                    PlaneMapping::new(format.sizeimage[i]),
                    0x100_0000 * (index as u64 + 1) + 0x10_0000 * i as u64,
                )
            })
            .collect();
        CaptureBuffer::new(index, planes)
    }

    #[test]
    fn first_input_moves_to_header_once() {
        crate::tests::init_logging();
        let ctx = context(Codec::H264Slice);
        assert_eq!(ctx.lifecycle(), LifecycleState::Init);

        ctx.buf_queue(input(0)).unwrap();
        assert_eq!(ctx.lifecycle(), LifecycleState::Header);

        ctx.set_lifecycle(LifecycleState::Flush);
        ctx.buf_queue(input(1)).unwrap();
        assert_eq!(ctx.lifecycle(), LifecycleState::Flush);
    }

    #[test]
    fn capture_buffer_does_not_leave_init() {
        let ctx = context(Codec::Vp9Frame);
        let format = ctx.capture_format().unwrap();

        ctx.buf_queue(capture(0, &format)).unwrap();
        assert_eq!(ctx.lifecycle(), LifecycleState::Init);
        assert_eq!(ctx.num_pending(QueueDirection::Capture), 1);
    }

    #[test]
    fn frame_buffer_descriptor() {
        let ctx = context(Codec::H264Slice);
        assert!(ctx.get_capture_buffer().is_none());

        let format = ctx.set_resolution(Resolution::from((320, 240))).unwrap();
        assert_eq!(format.coded_resolution, Resolution::from((320, 256)));
        let buffer = capture(3, &format);
        ctx.buf_queue(buffer.clone()).unwrap();

        let frame = ctx.get_capture_buffer().unwrap();
        assert_eq!(frame.index, 3);
        assert_eq!(frame.num_planes(), 2);
        assert_eq!(frame.base_y.dma_addr, buffer.plane(0).unwrap().dma_addr);
        assert_eq!(frame.base_y.size, 320 * 256);
        let base_c = frame.base_c.as_ref().unwrap();
        assert_eq!(base_c.dma_addr, buffer.plane(1).unwrap().dma_addr);
        assert_eq!(base_c.size, 320 * 256 / 2);
        assert!(base_c
            .va
            .as_ref()
            .unwrap()
            .same_memory(buffer.plane(1).unwrap().mapping.as_ref().unwrap()));

        // Building the descriptor leaves the buffer queued.
        assert_eq!(ctx.num_pending(QueueDirection::Capture), 1);
    }

    #[test]
    fn cap_to_disp_sets_payloads() {
        let ctx = context(Codec::H264Slice);
        let format = ctx.capture_format().unwrap();
        ctx.buf_queue(capture(0, &format)).unwrap();
        ctx.buf_queue(capture(1, &format)).unwrap();

        let frame = ctx.get_capture_buffer().unwrap();
        ctx.cap_to_disp(&frame, false).unwrap();
        let frame = ctx.get_capture_buffer().unwrap();
        ctx.cap_to_disp(&frame, true).unwrap();

        let done = ctx.dequeue_capture().unwrap();
        assert_eq!(done.state, BufferState::Done);
        assert_eq!(done.buffer.plane(0).unwrap().bytes_used, format.sizeimage[0]);
        assert_eq!(done.buffer.plane(1).unwrap().bytes_used, format.sizeimage[1]);
        assert_eq!(ctx.dequeue_capture().unwrap().state, BufferState::Error);
        assert_eq!(ctx.decoded_frame_count(), 1);

        assert_eq!(ctx.cap_to_disp(&frame, false), Err(JobError::OutputUnavailable));
    }

    #[test]
    fn job_readiness() {
        let lat = context(Codec::H264Slice);
        lat.buf_queue(input(0)).unwrap();
        assert!(!lat.job_ready());
        lat.streamon(QueueDirection::Input);
        // Buffered capture: no capture buffer needed.
        assert!(lat.job_ready());

        let pure = Context::new(
            1,
            Codec::H264Slice,
            formats(HwArch::PureSingleCore),
            Box::new(DummyBackend::new()),
        );
        pure.buf_queue(input(0)).unwrap();
        pure.streamon(QueueDirection::Input);
        pure.streamon(QueueDirection::Capture);
        assert!(!pure.job_ready());
        let format = pure.capture_format().unwrap();
        pure.buf_queue(capture(0, &format)).unwrap();
        assert!(pure.job_ready());
    }

    #[test]
    fn unmapped_head_is_not_ready() {
        let ctx = context(Codec::Vp8Frame);
        ctx.streamon(QueueDirection::Input);
        ctx.buf_queue(InputBuffer::unmapped(0, 16, 0x1000)).unwrap();

        assert!(!ctx.job_ready());
    }

    #[test]
    fn streamoff_input_returns_buffers() {
        let ctx = context(Codec::H264Slice);
        ctx.streamon(QueueDirection::Input);
        ctx.buf_queue(input(0)).unwrap();
        ctx.buf_queue(input(1)).unwrap();

        ctx.streamoff(QueueDirection::Input);

        assert_eq!(ctx.num_pending(QueueDirection::Input), 0);
        assert!(!ctx.job_ready());
        let first = ctx.dequeue_input().unwrap();
        assert_eq!(first.buffer.index(), 0);
        assert!(first.has_error());
        assert_eq!(ctx.dequeue_input().unwrap().buffer.index(), 1);
    }

    #[test]
    fn streamoff_capture_flushes() {
        let ctx = context(Codec::H264Slice);
        let format = ctx.capture_format().unwrap();
        ctx.streamon(QueueDirection::Capture);
        ctx.buf_queue(capture(0, &format)).unwrap();

        ctx.streamoff(QueueDirection::Capture);

        assert_eq!(ctx.lifecycle(), LifecycleState::Flush);
        assert_eq!(ctx.dequeue_capture().unwrap().state, BufferState::Error);

        ctx.streamon(QueueDirection::Capture);
        assert_eq!(ctx.lifecycle(), LifecycleState::Header);
    }

    #[test]
    fn volatile_min_buffers() {
        let ctx = context(Codec::Vp9Frame);
        assert_eq!(
            ctx.control(ControlId::MinBuffersForCapture),
            Some(ControlValue::Integer(1))
        );

        ctx.set_dpb_size(8);
        assert_eq!(
            ctx.control(ControlId::MinBuffersForCapture),
            Some(ControlValue::Integer(8))
        );
    }

    #[test]
    fn set_input_error_only_on_head() {
        let ctx = context(Codec::H264Slice);
        ctx.buf_queue(input(0)).unwrap();

        ctx.set_input_error(1, 0);
        assert!(!ctx.lock_state().input.next().unwrap().error());
        ctx.set_input_error(0, 1);
        assert!(!ctx.lock_state().input.next().unwrap().error());
        ctx.set_input_error(0, 0);
        assert!(ctx.lock_state().input.next().unwrap().error());
    }

    #[test]
    fn requeued_index_gets_new_sequence() {
        let ctx = context(Codec::H264Slice);
        ctx.streamon(QueueDirection::Input);
        ctx.buf_queue(input(0)).unwrap();
        ctx.streamoff(QueueDirection::Input);
        ctx.dequeue_input().unwrap();
        ctx.streamon(QueueDirection::Input);
        ctx.buf_queue(input(0)).unwrap();

        // Completion of the first queueing does not touch the second one.
        assert_eq!(
            ctx.out_to_done(0, 0, DecodeOutcome::Consumed),
            Err(JobError::InputUnavailable(0))
        );
        assert_eq!(ctx.num_pending(QueueDirection::Input), 1);
        assert_eq!(ctx.out_to_done(0, 1, DecodeOutcome::Consumed), Ok(()));
        assert_eq!(ctx.dequeue_input().unwrap().state, BufferState::Done);
    }
}
