// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Input and capture buffer queues of a decoding context.
//!
//! Buffers are owned by their queue between the moment they are queued by the client and the
//! moment they are completed. Completed buffers wait in a done list until the client dequeues
//! them, at which point ownership goes back to the client.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::device::request::RequestHandle;
use crate::video_frame::PlaneMapping;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("buffer {0} is already queued")]
    DuplicateIndex(usize),
    #[error("buffer {0} has no CPU mapping")]
    NotMapped(usize),
    #[error("buffer {index} uses {bytes_used} bytes out of {length}")]
    InvalidBytesUsed {
        index: usize,
        bytes_used: usize,
        length: usize,
    },
    #[error("input buffers must be queued through a request")]
    RequestRequired,
}

/// Completion status reported for a buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferState {
    Done,
    Error,
}

pub trait QueueBuffer {
    fn index(&self) -> usize;
}

/// A compressed bitstream buffer.
#[derive(Clone, Debug)]
pub struct InputBuffer {
    index: usize,
    mapping: Option<Bytes>,
    dma_addr: u64,
    length: usize,
    bytes_used: usize,
    timestamp: u64,
    request: Option<Arc<RequestHandle>>,
    error: bool,
    /// Position of the buffer in the stream of buffers queued to a context, telling apart two
    /// queueings of the same index.
    sequence: u64,
}

impl InputBuffer {
    /// Creates a buffer holding `data`, all of it being used.
    pub fn new(index: usize, data: Bytes, dma_addr: u64) -> Self {
        let length = data.len();
        Self {
            index,
            mapping: Some(data),
            dma_addr,
            length,
            bytes_used: length,
            timestamp: 0,
            request: None,
            error: false,
            sequence: 0,
        }
    }

    /// Creates a buffer whose memory cannot be mapped by the CPU.
    pub fn unmapped(index: usize, length: usize, dma_addr: u64) -> Self {
        Self {
            index,
            mapping: None,
            dma_addr,
            length,
            bytes_used: length,
            timestamp: 0,
            request: None,
            error: false,
            sequence: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_bytes_used(mut self, bytes_used: usize) -> Self {
        self.bytes_used = bytes_used;
        self
    }

    pub fn mapping(&self) -> Option<&Bytes> {
        self.mapping.as_ref()
    }

    pub fn dma_addr(&self) -> u64 {
        self.dma_addr
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn request(&self) -> Option<&Arc<RequestHandle>> {
        self.request.as_ref()
    }

    pub(crate) fn set_request(&mut self, request: Arc<RequestHandle>) {
        self.request = Some(request);
    }

    /// Persistent error flag, set when the hardware failed on this buffer. It survives the
    /// buffer being dequeued and queued again.
    pub fn error(&self) -> bool {
        self.error
    }

    pub(crate) fn set_error(&mut self) {
        self.error = true;
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

impl QueueBuffer for InputBuffer {
    fn index(&self) -> usize {
        self.index
    }
}

/// One plane of a capture buffer.
#[derive(Clone, Debug)]
pub struct CapturePlane {
    pub mapping: Option<PlaneMapping>,
    pub dma_addr: u64,
    pub length: usize,
    pub bytes_used: usize,
}

impl CapturePlane {
    pub fn new(mapping: PlaneMapping, dma_addr: u64) -> Self {
        let length = mapping.len();
        Self {
            mapping: Some(mapping),
            dma_addr,
            length,
            bytes_used: 0,
        }
    }
}

/// A buffer receiving decoded frames.
#[derive(Clone, Debug)]
pub struct CaptureBuffer {
    index: usize,
    planes: Vec<CapturePlane>,
}

impl CaptureBuffer {
    pub fn new(index: usize, planes: Vec<CapturePlane>) -> Self {
        Self { index, planes }
    }

    pub fn planes(&self) -> &[CapturePlane] {
        &self.planes
    }

    pub fn plane(&self, plane: usize) -> Option<&CapturePlane> {
        self.planes.get(plane)
    }

    pub(crate) fn set_plane_payload(&mut self, plane: usize, bytes_used: usize) {
        match self.planes.get_mut(plane) {
            Some(p) => p.bytes_used = bytes_used,
            None => log::error!("capture buffer {} has no plane {}", self.index, plane),
        }
    }
}

impl QueueBuffer for CaptureBuffer {
    fn index(&self) -> usize {
        self.index
    }
}

/// A buffer the decoder is done with, waiting to be dequeued by the client.
#[derive(Clone, Debug)]
pub struct DoneBuffer<B> {
    pub buffer: B,
    pub state: BufferState,
}

impl DoneBuffer<InputBuffer> {
    /// Whether the buffer must be reported to the client as errored.
    pub fn has_error(&self) -> bool {
        self.state == BufferState::Error || self.buffer.error()
    }
}

/// FIFO of buffers pending processing, plus the list of completed ones.
#[derive(Debug)]
pub struct BufferQueue<B: QueueBuffer> {
    pending: VecDeque<B>,
    done: VecDeque<DoneBuffer<B>>,
    streaming: bool,
}

impl<B: QueueBuffer> Default for BufferQueue<B> {
    fn default() -> Self {
        Self {
            pending: Default::default(),
            done: Default::default(),
            streaming: false,
        }
    }
}

impl<B: QueueBuffer> BufferQueue<B> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn is_queued(&self, index: usize) -> bool {
        self.pending.iter().any(|b| b.index() == index)
    }

    pub fn queue(&mut self, buffer: B) -> Result<(), QueueError> {
        if self.is_queued(buffer.index()) {
            return Err(QueueError::DuplicateIndex(buffer.index()));
        }
        self.pending.push_back(buffer);
        Ok(())
    }

    pub fn next(&self) -> Option<&B> {
        self.pending.front()
    }

    pub fn next_mut(&mut self) -> Option<&mut B> {
        self.pending.front_mut()
    }

    pub fn remove_next(&mut self) -> Option<B> {
        self.pending.pop_front()
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &B> {
        self.pending.iter()
    }

    pub fn buf_done(&mut self, buffer: B, state: BufferState) {
        self.done.push_back(DoneBuffer { buffer, state });
    }

    /// Takes the oldest completed buffer.
    pub fn dequeue(&mut self) -> Option<DoneBuffer<B>> {
        self.done.pop_front()
    }

    pub fn num_done(&self) -> usize {
        self.done.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn set_streaming(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    /// Completes every pending buffer with `state`, returning their indices.
    pub fn drain_pending(&mut self, state: BufferState) -> Vec<usize> {
        let mut drained = Vec::with_capacity(self.pending.len());
        while let Some(buffer) = self.pending.pop_front() {
            drained.push(buffer.index());
            self.buf_done(buffer, state);
        }
        drained
    }
}

pub type InputQueue = BufferQueue<InputBuffer>;
pub type CaptureQueue = BufferQueue<CaptureBuffer>;

impl InputQueue {
    /// Checks that `buffer` can be admitted into the queue.
    pub fn validate(&self, buffer: &InputBuffer) -> Result<(), QueueError> {
        if buffer.mapping().is_none() {
            return Err(QueueError::NotMapped(buffer.index()));
        }
        if buffer.bytes_used() == 0 || buffer.bytes_used() > buffer.length() {
            return Err(QueueError::InvalidBytesUsed {
                index: buffer.index(),
                bytes_used: buffer.bytes_used(),
                length: buffer.length(),
            });
        }
        if self.is_queued(buffer.index()) {
            return Err(QueueError::DuplicateIndex(buffer.index()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(index: usize) -> InputBuffer {
        InputBuffer::new(index, Bytes::from_static(&[0, 0, 1, 0x65]), 0x1000 * index as u64)
    }

    #[test]
    fn fifo_order() {
        let mut queue = InputQueue::new();
        for i in 0..3 {
            queue.queue(input(i)).unwrap();
        }

        assert_eq!(queue.next().map(|b| b.index()), Some(0));
        let first = queue.remove_next().unwrap();
        queue.buf_done(first, BufferState::Done);
        assert_eq!(queue.next().map(|b| b.index()), Some(1));
        assert_eq!(queue.num_pending(), 2);
        assert_eq!(queue.dequeue().map(|b| b.buffer.index()), Some(0));
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn duplicate_index_rejected() {
        let mut queue = InputQueue::new();
        queue.queue(input(0)).unwrap();

        assert_eq!(queue.queue(input(0)), Err(QueueError::DuplicateIndex(0)));
        assert_eq!(queue.validate(&input(0)), Err(QueueError::DuplicateIndex(0)));
    }

    #[test]
    fn admission_checks() {
        let queue = InputQueue::new();

        assert_eq!(queue.validate(&input(0)), Ok(()));
        assert_eq!(
            queue.validate(&InputBuffer::unmapped(1, 16, 0)),
            Err(QueueError::NotMapped(1))
        );
        assert_eq!(
            queue.validate(&input(2).with_bytes_used(0)),
            Err(QueueError::InvalidBytesUsed {
                index: 2,
                bytes_used: 0,
                length: 4
            })
        );
        assert!(queue.validate(&input(3).with_bytes_used(5)).is_err());
    }

    #[test]
    fn persistent_error_reported() {
        let mut queue = InputQueue::new();
        let mut buffer = input(0);
        buffer.set_error();
        queue.buf_done(buffer, BufferState::Done);

        let done = queue.dequeue().unwrap();
        assert!(done.has_error());
        assert!(done.buffer.error());
    }

    #[test]
    fn drain_pending_completes_everything() {
        let mut queue = InputQueue::new();
        queue.queue(input(0)).unwrap();
        queue.queue(input(1)).unwrap();

        assert_eq!(queue.drain_pending(BufferState::Error), vec![0, 1]);
        assert_eq!(queue.num_pending(), 0);
        assert_eq!(queue.num_done(), 2);
        assert!(queue.dequeue().unwrap().has_error());
    }

    #[test]
    fn capture_plane_payload() {
        let mut buffer = CaptureBuffer::new(
            0,
            vec![
                CapturePlane::new(PlaneMapping::new(64), 0x10000),
                CapturePlane::new(PlaneMapping::new(32), 0x20000),
            ],
        );
        buffer.set_plane_payload(1, 32);
        buffer.set_plane_payload(2, 32);

        assert_eq!(buffer.plane(0).unwrap().bytes_used, 0);
        assert_eq!(buffer.plane(1).unwrap().bytes_used, 32);
        assert_eq!(buffer.plane(0).unwrap().length, 64);
    }
}
