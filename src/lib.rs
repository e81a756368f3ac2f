// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Decode-job pipeline of a stateless hardware video decoder.
//!
//! For every decoding session ([`device::context::Context`]) the pipeline drains queued bitstream
//! buffers one at a time, applies the codec controls submitted with each of them through the
//! request API, hands the pair to a [`backend::DecodeBackend`] and routes the outcome back to
//! buffer completion. Requests are validated against the mandatory controls of the active codec
//! before they are admitted into the input queue.

pub mod backend;
pub mod decoder;
pub mod device;
pub mod format;
pub mod utils;
pub mod video_frame;

use std::fmt;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn get_area(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(value: Resolution) -> Self {
        (value.width, value.height)
    }
}

/// A four character code identifying a pixel or bitstream format.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<Fourcc> for u32 {
    fn from(fourcc: Fourcc) -> Self {
        fourcc.0
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(n: &[u8; 4]) -> Self {
        Self(n[0] as u32 | (n[1] as u32) << 8 | (n[2] as u32) << 16 | (n[3] as u32) << 24)
    }
}

impl From<Fourcc> for [u8; 4] {
    fn from(n: Fourcc) -> Self {
        [
            n.0 as u8,
            (n.0 >> 8) as u8,
            (n.0 >> 16) as u8,
            (n.0 >> 24) as u8,
        ]
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: [u8; 4] = (*self).into();
        f.write_fmt(format_args!(
            "{}{}{}{}",
            c[0] as char, c[1] as char, c[2] as char, c[3] as char
        ))
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}

/// Direction of a buffer queue, seen from the decoder.
///
/// `Input` carries compressed bitstream (V4L2 `OUTPUT`), `Capture` carries decoded frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueueDirection {
    Input,
    Capture,
}

/// Codecs accepted on the input queue. Each of them is a "stateless" bitstream format, i.e. the
/// parsed parameters of every frame travel as controls next to the slice data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    H264Slice,
    Vp8Frame,
    Vp9Frame,
}

impl Codec {
    pub fn fourcc(&self) -> Fourcc {
        match self {
            Codec::H264Slice => Fourcc::from(b"S264"),
            Codec::Vp8Frame => Fourcc::from(b"VP8F"),
            Codec::Vp9Frame => Fourcc::from(b"VP9F"),
        }
    }

    pub fn from_fourcc(fourcc: Fourcc) -> Option<Self> {
        [Codec::H264Slice, Codec::Vp8Frame, Codec::Vp9Frame]
            .into_iter()
            .find(|codec| codec.fourcc() == fourcc)
    }
}

impl FromStr for Codec {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h264" | "H264" => Ok(Codec::H264Slice),
            "vp8" | "VP8" => Ok(Codec::Vp8Frame),
            "vp9" | "VP9" => Ok(Codec::Vp9Frame),
            _ => Err("unrecognized codec. Valid values: h264, vp8, vp9"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Initializes logging once for the whole test binary.
    pub fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn fourcc_display() {
        assert_eq!(Fourcc::from(b"MM21").to_string(), "MM21");
        assert_eq!(Codec::H264Slice.fourcc().to_string(), "S264");
    }

    #[test]
    fn codec_from_fourcc() {
        assert_eq!(Codec::from_fourcc(Fourcc::from(b"VP9F")), Some(Codec::Vp9Frame));
        assert_eq!(Codec::from_fourcc(Fourcc::from(b"NV12")), None);
    }

    #[test]
    fn codec_from_str() {
        assert_eq!("vp8".parse::<Codec>(), Ok(Codec::Vp8Frame));
        assert!("av1".parse::<Codec>().is_err());
    }
}
