// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Interoperability with V4L2 pixel formats.

use crate::format::FrameSizeRange;
use crate::Codec;
use crate::Fourcc;

impl From<v4l2r::PixelFormat> for Fourcc {
    fn from(value: v4l2r::PixelFormat) -> Self {
        Fourcc(value.to_u32())
    }
}

impl From<Fourcc> for v4l2r::PixelFormat {
    fn from(value: Fourcc) -> Self {
        v4l2r::PixelFormat::from_u32(value.0)
    }
}

impl From<Codec> for v4l2r::PixelFormat {
    fn from(value: Codec) -> Self {
        value.fourcc().into()
    }
}

impl Codec {
    /// Codec of the compressed V4L2 pixel format `format`, if it is one of ours.
    pub fn from_pixel_format(format: v4l2r::PixelFormat) -> Option<Self> {
        Codec::from_fourcc(format.into())
    }
}

impl FrameSizeRange {
    pub fn pixel_format(&self) -> v4l2r::PixelFormat {
        self.fourcc.into()
    }
}
