// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::Arc;

use bytes::Bytes;

use crate::backend::Bitstream;
use crate::backend::DecodeErrorKind;
use crate::backend::DecodeOutcome;
use crate::decoder::scheduler::JobFinisher;
use crate::decoder::JobError;
use crate::decoder::JobStatus;
use crate::device::context::Context;
use crate::device::context::ContextEvent;
use crate::device::queue::QueueBuffer;
use crate::device::request::RequestHandle;

/// What the worker needs from the input buffer at the head of the queue. Taken under the context
/// lock, used after it is released.
struct PendingInput {
    index: usize,
    sequence: u64,
    va: Option<Bytes>,
    dma_addr: u64,
    bytes_used: usize,
    timestamp: u64,
    request: Option<Arc<RequestHandle>>,
}

/// Runs decode jobs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodeWorker;

impl DecodeWorker {
    pub fn new() -> Self {
        Self
    }

    /// Decodes the next pending input buffer of `ctx`.
    ///
    /// The job is always reported finished to `scheduler` before returning, whatever happened.
    /// The input buffer is completed unless the backend asks for it to be submitted again.
    pub fn run_job(&self, ctx: &Arc<Context>, scheduler: &dyn JobFinisher) -> JobStatus {
        let src = ctx.lock_state().input.next().map(|buf| PendingInput {
            index: buf.index(),
            sequence: buf.sequence(),
            va: buf.mapping().cloned(),
            dma_addr: buf.dma_addr(),
            bytes_used: buf.bytes_used(),
            timestamp: buf.timestamp(),
            request: buf.request().cloned(),
        });

        let Some(src) = src else {
            log::debug!("[{}] no available source buffer", ctx.id());
            scheduler.job_finish(ctx);
            return JobStatus::NoInput;
        };

        let Some(va) = src.va else {
            log::error!("[{}] input buffer {} has no virtual address", ctx.id(), src.index);
            scheduler.job_finish(ctx);
            return JobStatus::Failed(JobError::BufferMappingUnavailable(src.index));
        };

        let bitstream = Bitstream {
            index: src.index,
            va,
            dma_addr: src.dma_addr,
            size: src.bytes_used,
            timestamp: src.timestamp,
        };

        log::debug!(
            "[{}] decode input buffer {} dma {:#x} size {} ts {}",
            ctx.id(),
            bitstream.index,
            bitstream.dma_addr,
            bitstream.size,
            bitstream.timestamp
        );

        match &src.request {
            Some(request) => {
                if let Err(e) = ctx.apply_request_controls(request) {
                    log::error!(
                        "[{}] failed to apply controls of request {}: {}",
                        ctx.id(),
                        request.id(),
                        e
                    );
                }
            }
            None => log::error!(
                "[{}] input buffer {} has no request, decoding with current controls",
                ctx.id(),
                src.index
            ),
        }

        let mut resolution_changed = false;
        let outcome = ctx.decode(Some(&bitstream), None, &mut resolution_changed);

        if let DecodeOutcome::Error(kind) = outcome {
            log::error!(
                "[{}] decode input buffer {} failed: {:?}",
                ctx.id(),
                src.index,
                kind
            );
            if kind == DecodeErrorKind::Io {
                ctx.set_input_error(src.index, src.sequence);
            }
        }

        if resolution_changed {
            log::info!("[{}] resolution changed", ctx.id());
            ctx.queue_event(ContextEvent::SourceChange);
        }

        if outcome.input_done() {
            if let Err(e) = ctx.out_to_done(src.index, src.sequence, outcome) {
                log::error!("[{}] {}", ctx.id(), e);
            }
            if let Some(request) = &src.request {
                request.complete();
            }
        }

        scheduler.job_finish(ctx);

        match outcome {
            DecodeOutcome::Error(DecodeErrorKind::Io) => JobStatus::Failed(JobError::DecodeIo),
            DecodeOutcome::Error(DecodeErrorKind::Recoverable(errno)) => {
                JobStatus::Failed(JobError::DecodeRecoverable(errno))
            }
            outcome => JobStatus::Decoded(outcome),
        }
    }
}

/// Asks the backend of `ctx` to output the frames it still holds. The input queue is left
/// untouched.
pub fn flush_decoder(ctx: &Context) -> DecodeOutcome {
    let mut resolution_changed = false;
    let outcome = ctx.decode(None, None, &mut resolution_changed);

    log::debug!("[{}] flush decoder: {:?}", ctx.id(), outcome);

    outcome
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::thread;

    use nix::errno::Errno;

    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::backend::dummy::DummyStep;
    use crate::backend::dummy::FrameAction;
    use crate::backend::DecodeBackend;
    use crate::device::context::tests::capture;
    use crate::device::context::tests::formats;
    use crate::device::context::tests::input;
    use crate::device::context::ContextId;
    use crate::device::controls::ControlId;
    use crate::device::controls::ControlSnapshot;
    use crate::device::controls::ControlValue;
    use crate::device::queue::BufferState;
    use crate::device::request::Request;
    use crate::device::request::RequestState;
    use crate::format::HwArch;
    use crate::video_frame::FrameBuffer;
    use crate::Codec;
    use crate::QueueDirection;

    #[derive(Default)]
    struct RecordingFinisher {
        finished: Mutex<Vec<ContextId>>,
    }

    impl RecordingFinisher {
        fn count(&self) -> usize {
            self.finished.lock().unwrap().len()
        }
    }

    impl JobFinisher for RecordingFinisher {
        fn job_finish(&self, ctx: &Arc<Context>) {
            self.finished.lock().unwrap().push(ctx.id());
        }
    }

    fn context_with(backend: DummyBackend) -> Arc<Context> {
        crate::tests::init_logging();
        Arc::new(Context::new(
            7,
            Codec::Vp9Frame,
            formats(HwArch::LatSingleCore),
            Box::new(backend),
        ))
    }

    fn vp9_controls(tag: u8) -> ControlSnapshot {
        ControlSnapshot::new().with(
            ControlId::Vp9Frame,
            ControlValue::Compound(Bytes::from(vec![tag; 4])),
        )
    }

    /// Queues input buffer `index` with a request, like an admitted request would be.
    fn queue_with_request(ctx: &Context, index: usize, tag: u8) -> Arc<RequestHandle> {
        let (_, buffer, handle) = Request::new(index as u64)
            .add_buffer(ctx.id(), input(index))
            .set_controls(vp9_controls(tag))
            .into_queued()
            .unwrap();
        ctx.buf_queue(buffer).unwrap();
        handle
    }

    #[test]
    fn no_input() {
        let ctx = context_with(DummyBackend::new());
        let finisher = RecordingFinisher::default();

        assert_eq!(DecodeWorker::new().run_job(&ctx, &finisher), JobStatus::NoInput);
        assert_eq!(finisher.count(), 1);
    }

    #[test]
    fn consumed_completes_input_and_request() {
        let backend = DummyBackend::new();
        let log = backend.log();
        let ctx = context_with(backend);
        let format = ctx.capture_format().unwrap();
        ctx.buf_queue(capture(0, &format)).unwrap();
        let request = queue_with_request(&ctx, 0, 0xaa);
        let finisher = RecordingFinisher::default();

        let status = DecodeWorker::new().run_job(&ctx, &finisher);

        assert_eq!(status, JobStatus::Decoded(DecodeOutcome::Consumed));
        assert_eq!(finisher.count(), 1);
        assert!(request.is_complete());
        let done = ctx.dequeue_input().unwrap();
        assert_eq!(done.state, BufferState::Done);
        assert!(!done.has_error());

        // The request controls were active while decoding.
        let log = log.lock().unwrap();
        assert_eq!(
            log.calls[0].control,
            Some(ControlValue::Compound(Bytes::from(vec![0xaa; 4])))
        );
        let crc = crc32fast::hash(&[0u8; 16]);
        assert_eq!(log.frames, vec![(0, crc)]);

        let frame = ctx.dequeue_capture().unwrap();
        let luma = frame.buffer.plane(0).unwrap().mapping.as_ref().unwrap().read(4);
        assert_eq!(luma, crc.to_le_bytes().to_vec());
        assert_eq!(ctx.decoded_frame_count(), 1);
    }

    #[test]
    fn pending_keeps_input_queued() {
        let ctx = context_with(DummyBackend::with_script([DummyStep::pending()]));
        let request = queue_with_request(&ctx, 0, 1);
        let finisher = RecordingFinisher::default();

        let status = DecodeWorker::new().run_job(&ctx, &finisher);

        assert_eq!(status, JobStatus::Decoded(DecodeOutcome::Pending));
        assert_eq!(finisher.count(), 1);
        assert_eq!(ctx.num_pending(QueueDirection::Input), 1);
        assert!(ctx.dequeue_input().is_none());
        assert!(ctx.dequeue_capture().is_none());
        assert_eq!(request.state(), RequestState::Applied);
        assert!(!ctx.lock_state().input.next().unwrap().error());

        // The next job submits the same buffer again.
        let status = DecodeWorker::new().run_job(&ctx, &finisher);
        assert_eq!(status, JobStatus::Decoded(DecodeOutcome::Consumed));
        assert_eq!(ctx.dequeue_input().unwrap().buffer.index(), 0);
        assert!(request.is_complete());
    }

    #[test]
    fn io_error_sets_persistent_flag() {
        let ctx = context_with(DummyBackend::with_script([DummyStep::error(
            DecodeErrorKind::Io,
        )]));
        let request = queue_with_request(&ctx, 0, 1);
        let finisher = RecordingFinisher::default();

        let status = DecodeWorker::new().run_job(&ctx, &finisher);

        assert_eq!(status, JobStatus::Failed(JobError::DecodeIo));
        assert_eq!(finisher.count(), 1);
        assert_eq!(ctx.num_pending(QueueDirection::Input), 0);
        let done = ctx.dequeue_input().unwrap();
        assert_eq!(done.state, BufferState::Error);
        assert!(done.buffer.error());
        assert!(request.is_complete());
    }

    #[test]
    fn other_errors_do_not_set_persistent_flag() {
        let ctx = context_with(DummyBackend::with_script([DummyStep::error(
            DecodeErrorKind::Recoverable(Errno::EINVAL),
        )]));
        queue_with_request(&ctx, 0, 1);
        let finisher = RecordingFinisher::default();

        let status = DecodeWorker::new().run_job(&ctx, &finisher);

        assert_eq!(status, JobStatus::Failed(JobError::DecodeRecoverable(Errno::EINVAL)));
        let done = ctx.dequeue_input().unwrap();
        assert_eq!(done.state, BufferState::Error);
        assert!(!done.buffer.error());
    }

    #[test]
    fn unmapped_input_is_left_queued() {
        let backend = DummyBackend::new();
        let log = backend.log();
        let ctx = context_with(backend);
        ctx.buf_queue(crate::device::queue::InputBuffer::unmapped(0, 16, 0x1000))
            .unwrap();
        let finisher = RecordingFinisher::default();

        let status = DecodeWorker::new().run_job(&ctx, &finisher);

        assert_eq!(status, JobStatus::Failed(JobError::BufferMappingUnavailable(0)));
        assert_eq!(finisher.count(), 1);
        assert_eq!(ctx.num_pending(QueueDirection::Input), 1);
        assert!(log.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn input_without_request_uses_current_controls() {
        let backend = DummyBackend::new();
        let log = backend.log();
        let ctx = context_with(backend);
        let value = ControlValue::Compound(Bytes::from_static(&[9, 9]));
        ctx.set_control(ControlId::Vp9Frame, value.clone()).unwrap();
        ctx.buf_queue(input(0)).unwrap();

        let status = DecodeWorker::new().run_job(&ctx, &RecordingFinisher::default());

        assert_eq!(status, JobStatus::Decoded(DecodeOutcome::Consumed));
        assert_eq!(log.lock().unwrap().calls[0].control, Some(value));
    }

    #[test]
    fn inputs_complete_in_order() {
        let ctx = context_with(DummyBackend::with_script([
            DummyStep::consumed(),
            DummyStep::pending(),
            DummyStep::error(DecodeErrorKind::Recoverable(Errno::EAGAIN)),
            DummyStep::consumed(),
        ]));
        for i in 0..3 {
            queue_with_request(&ctx, i, i as u8);
        }
        let finisher = RecordingFinisher::default();
        let worker = DecodeWorker::new();

        while ctx.num_pending(QueueDirection::Input) > 0 {
            worker.run_job(&ctx, &finisher);
        }

        let order = std::iter::from_fn(|| ctx.dequeue_input())
            .map(|done| done.buffer.index())
            .collect::<Vec<_>>();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(finisher.count(), 4);
    }

    #[test]
    fn resolution_change_raises_event() {
        let ctx = context_with(DummyBackend::with_script([
            DummyStep::consumed().resolution_change()
        ]));
        queue_with_request(&ctx, 0, 1);

        DecodeWorker::new().run_job(&ctx, &RecordingFinisher::default());

        assert_eq!(ctx.dequeue_event(), Some(ContextEvent::SourceChange));
        assert_eq!(ctx.dequeue_event(), None);
    }

    #[test]
    fn flush_leaves_input_queue_alone() {
        let ctx = context_with(DummyBackend::with_script([
            DummyStep::consumed().frame(FrameAction::Hold),
            DummyStep::pending(),
        ]));
        let format = ctx.capture_format().unwrap();
        queue_with_request(&ctx, 0, 1);
        queue_with_request(&ctx, 1, 2);
        DecodeWorker::new().run_job(&ctx, &RecordingFinisher::default());
        assert!(ctx.dequeue_capture().is_none());
        ctx.buf_queue(capture(0, &format)).unwrap();

        let outcome = flush_decoder(&ctx);

        assert!(outcome.input_done());
        assert_eq!(ctx.num_pending(QueueDirection::Input), 1);
        assert_eq!(ctx.lock_state().input.next().unwrap().index(), 1);
        // The held frame came out.
        assert_eq!(ctx.dequeue_capture().unwrap().buffer.index(), 0);
    }

    /// Backend that signals when it starts decoding, then blocks until released.
    struct BlockingBackend {
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
        outcome: DecodeOutcome,
    }

    impl DecodeBackend for BlockingBackend {
        fn decode(
            &mut self,
            _: &Context,
            _: Option<&Bitstream>,
            _: Option<FrameBuffer>,
            _: &mut bool,
        ) -> DecodeOutcome {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            self.outcome
        }
    }

    #[test]
    fn job_in_flight_leaves_requeued_index_alone() {
        crate::tests::init_logging();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let ctx = Arc::new(Context::new(
            7,
            Codec::Vp9Frame,
            formats(HwArch::LatSingleCore),
            Box::new(BlockingBackend {
                entered: entered_tx,
                release: release_rx,
                outcome: DecodeOutcome::Error(DecodeErrorKind::Io),
            }),
        ));
        ctx.streamon(QueueDirection::Input);
        let old_request = queue_with_request(&ctx, 0, 1);

        let job_ctx = Arc::clone(&ctx);
        let job = thread::spawn(move || {
            DecodeWorker::new().run_job(&job_ctx, &RecordingFinisher::default())
        });
        entered_rx.recv().unwrap();

        // While the backend is busy, the client restarts the stream and reuses index 0.
        ctx.streamoff(QueueDirection::Input);
        assert!(old_request.is_complete());
        assert_eq!(ctx.dequeue_input().unwrap().state, BufferState::Error);
        ctx.streamon(QueueDirection::Input);
        let new_request = queue_with_request(&ctx, 0, 2);

        release_tx.send(()).unwrap();
        assert_eq!(job.join().unwrap(), JobStatus::Failed(JobError::DecodeIo));

        assert_eq!(ctx.num_pending(QueueDirection::Input), 1);
        assert!(!ctx.lock_state().input.next().unwrap().error());
        assert!(ctx.dequeue_input().is_none());
        assert_eq!(new_request.state(), RequestState::Queued);
    }
}
