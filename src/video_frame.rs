// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Memory of decoded frames, and the descriptor handed to backends to write into it.

use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Mutex;

pub const Y_PLANE: usize = 0;
pub const UV_PLANE: usize = 1;

/// CPU mapping of one plane of a capture buffer.
///
/// The memory is owned by whoever allocated the buffer; clones share the same memory.
#[derive(Clone, Default)]
pub struct PlaneMapping {
    data: Arc<Mutex<Vec<u8>>>,
}

impl PlaneMapping {
    pub fn new(size: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0; size])),
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `src` at `offset`, truncating what does not fit. Returns the number of bytes
    /// written.
    pub fn write(&self, offset: usize, src: &[u8]) -> usize {
        let mut data = self.data.lock().unwrap();
        if offset >= data.len() {
            return 0;
        }
        let len = src.len().min(data.len() - offset);
        data[offset..offset + len].copy_from_slice(&src[..len]);
        len
    }

    /// Copies the first `len` bytes of the plane into a new vector.
    pub fn read(&self, len: usize) -> Vec<u8> {
        let data = self.data.lock().unwrap();
        data[..len.min(data.len())].to_vec()
    }

    /// Whether `self` and `other` map the same memory.
    pub fn same_memory(&self, other: &PlaneMapping) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl Debug for PlaneMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaneMapping").field("len", &self.len()).finish()
    }
}

/// One plane of a [`FrameBuffer`].
#[derive(Clone, Debug)]
pub struct FramePlane {
    /// CPU mapping of the plane, if the buffer has one.
    pub va: Option<PlaneMapping>,
    pub dma_addr: u64,
    /// Size of the plane for the configured capture format.
    pub size: usize,
}

/// Destination of a decoded frame, as seen by a decode backend.
///
/// The descriptor is built from the next pending capture buffer every time a backend asks for
/// one, and is not kept around afterwards.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    /// Index of the capture buffer the planes belong to.
    pub index: usize,
    pub base_y: FramePlane,
    /// Chroma plane, for two-plane formats.
    pub base_c: Option<FramePlane>,
}

impl FrameBuffer {
    pub fn num_planes(&self) -> usize {
        if self.base_c.is_some() {
            2
        } else {
            1
        }
    }

    pub fn plane(&self, plane: usize) -> Option<&FramePlane> {
        match plane {
            Y_PLANE => Some(&self.base_y),
            UV_PLANE => self.base_c.as_ref(),
            _ => None,
        }
    }
}
