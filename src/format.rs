// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Formats and frame sizes supported by the decoder.
//!
//! The table is derived from the hardware capabilities once, when the device is created, and then
//! shared read-only by all the contexts of that device.

use std::ops::BitOr;
use std::str::FromStr;

use crate::utils::align_up;
use crate::Codec;
use crate::Fourcc;
use crate::Resolution;

pub const VDEC_MIN_WIDTH: u32 = 64;
pub const VDEC_MIN_HEIGHT: u32 = 64;
pub const VDEC_MAX_WIDTH: u32 = 1920;
pub const VDEC_MAX_HEIGHT: u32 = 1088;

/// Alignment of the width and height of decoded frames. MM21 stores 16x32 tiles and the hardware
/// writes whole 64x64 blocks.
const CAPTURE_ALIGNMENT: usize = 64;

/// Bitmask of the formats a decoder instance is able to handle.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DecoderCapabilities(pub u32);

impl DecoderCapabilities {
    pub const FORMAT_MT21C: Self = Self(0x10);
    pub const FORMAT_MM21: Self = Self(0x20);
    pub const FORMAT_H264_SLICE: Self = Self(0x100);
    pub const FORMAT_VP8_FRAME: Self = Self(0x200);
    pub const FORMAT_VP9_FRAME: Self = Self(0x400);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DecoderCapabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Hardware architecture of the decoder.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum HwArch {
    /// A single core doing both entropy decoding and reconstruction. Only H.264 into MM21 is
    /// supported, and every job needs a capture buffer to write into.
    PureSingleCore,
    /// A LAT (entropy) core followed by a reconstruction core. The capture queue is buffered: a
    /// job can be started before a capture buffer is available.
    #[default]
    LatSingleCore,
}

impl FromStr for HwArch {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pure" => Ok(HwArch::PureSingleCore),
            "lat" => Ok(HwArch::LatSingleCore),
            _ => Err("unrecognized hardware architecture. Valid values: pure, lat"),
        }
    }
}

/// Role of a format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatKind {
    /// Compressed bitstream, accepted on the input queue.
    Compressed,
    /// Decoded frame, produced on the capture queue.
    Frame,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VideoFormat {
    pub fourcc: Fourcc,
    pub kind: FormatKind,
    pub num_planes: usize,
}

/// Stepwise range of resolutions accepted for a compressed format.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameSizeRange {
    pub fourcc: Fourcc,
    pub min_width: u32,
    pub max_width: u32,
    pub step_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub step_height: u32,
}

impl FrameSizeRange {
    fn stepwise_fhd(fourcc: Fourcc) -> Self {
        Self {
            fourcc,
            min_width: VDEC_MIN_WIDTH,
            max_width: VDEC_MAX_WIDTH,
            step_width: 16,
            min_height: VDEC_MIN_HEIGHT,
            max_height: VDEC_MAX_HEIGHT,
            step_height: 16,
        }
    }

    pub fn contains(&self, res: Resolution) -> bool {
        (self.min_width..=self.max_width).contains(&res.width)
            && (self.min_height..=self.max_height).contains(&res.height)
    }

    /// Returns the closest resolution to `res` that fits in the range, rounded up to the steps.
    pub fn adjust(&self, res: Resolution) -> Resolution {
        let width = res.width.clamp(self.min_width, self.max_width);
        let height = res.height.clamp(self.min_height, self.max_height);
        Resolution {
            width: (align_up(width as usize, self.step_width as usize) as u32).min(self.max_width),
            height: (align_up(height as usize, self.step_height as usize) as u32)
                .min(self.max_height),
        }
    }
}

const PREFERRED_CAPTURE_FORMATS: [&[u8; 4]; 2] = [b"MM21", b"MT21"];
const PREFERRED_INPUT_CODECS: [Codec; 3] = [Codec::H264Slice, Codec::Vp9Frame, Codec::Vp8Frame];

/// The formats and frame sizes of one decoder device.
#[derive(Clone, Debug)]
pub struct SupportedFormats {
    formats: Vec<VideoFormat>,
    framesizes: Vec<FrameSizeRange>,
    capture_buffered: bool,
}

impl SupportedFormats {
    pub fn new(capabilities: DecoderCapabilities, hw_arch: HwArch) -> Self {
        let mut table = Self {
            formats: Vec::new(),
            framesizes: Vec::new(),
            capture_buffered: false,
        };

        match hw_arch {
            HwArch::PureSingleCore => {
                table.add_format(Codec::H264Slice.fourcc());
                table.add_format(Fourcc::from(b"MM21"));
            }
            HwArch::LatSingleCore => {
                table.capture_buffered = true;
                let candidates = [
                    (DecoderCapabilities::FORMAT_MM21, Fourcc::from(b"MM21")),
                    (DecoderCapabilities::FORMAT_MT21C, Fourcc::from(b"MT21")),
                    (DecoderCapabilities::FORMAT_H264_SLICE, Codec::H264Slice.fourcc()),
                    (DecoderCapabilities::FORMAT_VP8_FRAME, Codec::Vp8Frame.fourcc()),
                    (DecoderCapabilities::FORMAT_VP9_FRAME, Codec::Vp9Frame.fourcc()),
                ];
                for (cap, fourcc) in candidates {
                    if capabilities.contains(cap) {
                        table.add_format(fourcc);
                    }
                }
            }
        }

        log::debug!(
            "num_formats: {} num_framesizes: {} dec_capability: 0x{:x}",
            table.formats.len(),
            table.framesizes.len(),
            capabilities.0
        );

        table
    }

    fn add_format(&mut self, fourcc: Fourcc) {
        if Codec::from_fourcc(fourcc).is_some() {
            self.formats.push(VideoFormat {
                fourcc,
                kind: FormatKind::Compressed,
                num_planes: 1,
            });
            self.framesizes.push(FrameSizeRange::stepwise_fhd(fourcc));
        } else if PREFERRED_CAPTURE_FORMATS.iter().any(|f| Fourcc::from(*f) == fourcc) {
            self.formats.push(VideoFormat {
                fourcc,
                kind: FormatKind::Frame,
                num_planes: 2,
            });
        } else {
            log::error!("Can not add unsupported format type {}", fourcc);
        }
    }

    pub fn formats(&self) -> &[VideoFormat] {
        &self.formats
    }

    pub fn formats_of_kind(&self, kind: FormatKind) -> impl Iterator<Item = &VideoFormat> {
        self.formats.iter().filter(move |f| f.kind == kind)
    }

    pub fn find(&self, fourcc: Fourcc) -> Option<&VideoFormat> {
        self.formats.iter().find(|f| f.fourcc == fourcc)
    }

    pub fn framesizes(&self, fourcc: Fourcc) -> Option<&FrameSizeRange> {
        self.framesizes.iter().find(|f| f.fourcc == fourcc)
    }

    pub fn supports_codec(&self, codec: Codec) -> bool {
        self.find(codec.fourcc()).is_some()
    }

    /// Whether jobs may run without a capture buffer being queued.
    pub fn capture_buffered(&self) -> bool {
        self.capture_buffered
    }

    /// The first supported input format in order of preference.
    pub fn default_input_format(&self) -> Option<VideoFormat> {
        PREFERRED_INPUT_CODECS
            .iter()
            .find_map(|codec| self.find(codec.fourcc()).copied())
    }

    /// The first supported capture format in order of preference.
    pub fn default_capture_format(&self) -> Option<VideoFormat> {
        PREFERRED_CAPTURE_FORMATS
            .iter()
            .find_map(|fourcc| self.find(Fourcc::from(*fourcc)).copied())
    }
}

/// Layout of the decoded frames written into capture buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CaptureFormat {
    pub format: VideoFormat,
    pub coded_resolution: Resolution,
    /// Size in bytes of each plane. Only the first `format.num_planes` entries are meaningful.
    pub sizeimage: [usize; 2],
}

impl CaptureFormat {
    pub fn new(format: VideoFormat, resolution: Resolution) -> Self {
        let width = align_up(resolution.width as usize, CAPTURE_ALIGNMENT);
        let height = align_up(resolution.height as usize, CAPTURE_ALIGNMENT);
        let luma = width * height;
        let sizeimage = match format.num_planes {
            2 => [luma, luma / 2],
            _ => [luma + luma / 2, 0],
        };

        Self {
            format,
            coded_resolution: Resolution::from((width as u32, height as u32)),
            sizeimage,
        }
    }

    pub fn num_planes(&self) -> usize {
        self.format.num_planes
    }
}
