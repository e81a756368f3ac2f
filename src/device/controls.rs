// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Codec controls of a decoding context.
//!
//! Stateless codecs receive the parsed parameters of every frame as controls attached to the
//! request carrying the frame's bitstream. [`STATELESS_CONTROLS`] lists the controls exposed for
//! each codec and whether a request must carry them.

use std::collections::HashMap;

use bytes::Bytes;
use enumn::N;
use thiserror::Error;

use crate::Codec;

/// Identifiers of the controls handled by the decoder. Values match the V4L2 control ids.
#[derive(N, Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlId {
    MinBuffersForCapture = 0x0098_0927,
    H264Profile = 0x0099_0a6b,
    Vp8Profile = 0x0099_0aff,
    Vp9Profile = 0x0099_0b00,
    H264DecodeMode = 0x00a4_0900,
    H264Sps = 0x00a4_0902,
    H264Pps = 0x00a4_0903,
    H264ScalingMatrix = 0x00a4_0904,
    H264DecodeParams = 0x00a4_0907,
    Vp8Frame = 0x00a4_09c8,
    Vp9Frame = 0x00a4_0a2c,
}

pub const H264_PROFILE_BASELINE: i64 = 0;
pub const H264_PROFILE_MAIN: i64 = 2;
pub const H264_PROFILE_EXTENDED: i64 = 3;
pub const H264_PROFILE_HIGH: i64 = 4;

pub const H264_DECODE_MODE_SLICE_BASED: i64 = 0;
pub const H264_DECODE_MODE_FRAME_BASED: i64 = 1;

pub const VP_PROFILE_0: i64 = 0;
pub const VP_PROFILE_3: i64 = 3;

const fn bit(n: i64) -> u64 {
    1 << (n as u32)
}

/// Value of a control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlValue {
    /// Integer and menu controls.
    Integer(i64),
    /// Codec parameter structures, kept opaque.
    Compound(Bytes),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlKind {
    Integer { min: i64, max: i64, step: i64, def: i64 },
    Menu { min: i64, max: i64, def: i64, skip_mask: u64 },
    Compound,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ControlConfig {
    pub id: ControlId,
    pub kind: ControlKind,
    /// The value is read from the driver state every time rather than stored.
    pub volatile: bool,
}

impl ControlConfig {
    const fn compound(id: ControlId) -> Self {
        Self {
            id,
            kind: ControlKind::Compound,
            volatile: false,
        }
    }

    const fn menu(id: ControlId, min: i64, max: i64, def: i64, skip_mask: u64) -> Self {
        Self {
            id,
            kind: ControlKind::Menu {
                min,
                max,
                def,
                skip_mask,
            },
            volatile: false,
        }
    }

    fn default_value(&self) -> ControlValue {
        match self.kind {
            ControlKind::Integer { def, .. } | ControlKind::Menu { def, .. } => {
                ControlValue::Integer(def)
            }
            ControlKind::Compound => ControlValue::Compound(Bytes::new()),
        }
    }

    fn check(&self, value: &ControlValue) -> Result<(), ControlError> {
        match (self.kind, value) {
            (ControlKind::Integer { min, max, step, .. }, ControlValue::Integer(v)) => {
                if *v < min || *v > max || (step > 1 && (*v - min) % step != 0) {
                    return Err(ControlError::OutOfRange(self.id, *v));
                }
                Ok(())
            }
            (
                ControlKind::Menu {
                    min,
                    max,
                    skip_mask,
                    ..
                },
                ControlValue::Integer(v),
            ) => {
                if *v < min || *v > max {
                    return Err(ControlError::OutOfRange(self.id, *v));
                }
                if *v < 64 && skip_mask & bit(*v) != 0 {
                    return Err(ControlError::SkippedMenuItem(self.id, *v));
                }
                Ok(())
            }
            (ControlKind::Compound, ControlValue::Compound(_)) => Ok(()),
            _ => Err(ControlError::WrongType(self.id)),
        }
    }
}

/// A control exposed by the stateless decoder, tied to the codec it applies to.
#[derive(Copy, Clone, Debug)]
pub struct StatelessControl {
    pub cfg: ControlConfig,
    pub codec: Codec,
    /// Whether every request for `codec` must carry this control.
    pub needed_in_request: bool,
}

pub static STATELESS_CONTROLS: [StatelessControl; 10] = [
    StatelessControl {
        cfg: ControlConfig::compound(ControlId::H264Sps),
        codec: Codec::H264Slice,
        needed_in_request: true,
    },
    StatelessControl {
        cfg: ControlConfig::compound(ControlId::H264Pps),
        codec: Codec::H264Slice,
        needed_in_request: true,
    },
    StatelessControl {
        cfg: ControlConfig::compound(ControlId::H264ScalingMatrix),
        codec: Codec::H264Slice,
        needed_in_request: true,
    },
    StatelessControl {
        cfg: ControlConfig::compound(ControlId::H264DecodeParams),
        codec: Codec::H264Slice,
        needed_in_request: true,
    },
    StatelessControl {
        cfg: ControlConfig::menu(
            ControlId::H264Profile,
            H264_PROFILE_BASELINE,
            H264_PROFILE_HIGH,
            H264_PROFILE_MAIN,
            bit(H264_PROFILE_BASELINE) | bit(H264_PROFILE_EXTENDED),
        ),
        codec: Codec::H264Slice,
        needed_in_request: false,
    },
    StatelessControl {
        // Only frame-based decoding is supported by the hardware.
        cfg: ControlConfig::menu(
            ControlId::H264DecodeMode,
            H264_DECODE_MODE_FRAME_BASED,
            H264_DECODE_MODE_FRAME_BASED,
            H264_DECODE_MODE_FRAME_BASED,
            0,
        ),
        codec: Codec::H264Slice,
        needed_in_request: true,
    },
    StatelessControl {
        cfg: ControlConfig::compound(ControlId::Vp8Frame),
        codec: Codec::Vp8Frame,
        needed_in_request: true,
    },
    StatelessControl {
        cfg: ControlConfig::menu(ControlId::Vp8Profile, VP_PROFILE_0, VP_PROFILE_3, VP_PROFILE_0, 0),
        codec: Codec::Vp8Frame,
        needed_in_request: false,
    },
    StatelessControl {
        cfg: ControlConfig::compound(ControlId::Vp9Frame),
        codec: Codec::Vp9Frame,
        needed_in_request: true,
    },
    StatelessControl {
        cfg: ControlConfig::menu(ControlId::Vp9Profile, VP_PROFILE_0, VP_PROFILE_3, VP_PROFILE_0, 0),
        codec: Codec::Vp9Frame,
        needed_in_request: false,
    },
];

const MIN_BUFFERS_FOR_CAPTURE: ControlConfig = ControlConfig {
    id: ControlId::MinBuffersForCapture,
    kind: ControlKind::Integer {
        min: 0,
        max: 32,
        step: 1,
        def: 1,
    },
    volatile: true,
};

/// Returns the controls every request must carry when decoding `codec`.
pub fn required_controls(codec: Codec) -> impl Iterator<Item = ControlId> {
    STATELESS_CONTROLS
        .iter()
        .filter(move |ctrl| ctrl.codec == codec && ctrl.needed_in_request)
        .map(|ctrl| ctrl.cfg.id)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("control {0:?} is not handled by this decoder")]
    Unknown(ControlId),
    #[error("value {1} is out of range for control {0:?}")]
    OutOfRange(ControlId, i64),
    #[error("menu item {1} of control {0:?} is not supported")]
    SkippedMenuItem(ControlId, i64),
    #[error("wrong value type for control {0:?}")]
    WrongType(ControlId),
}

/// The control values attached to a single request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlSnapshot {
    values: HashMap<ControlId, ControlValue>,
}

impl ControlSnapshot {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn set(&mut self, id: ControlId, value: ControlValue) -> &mut Self {
        self.values.insert(id, value);
        self
    }

    pub fn with(mut self, id: ControlId, value: ControlValue) -> Self {
        self.set(id, value);
        self
    }

    pub fn find(&self, id: ControlId) -> Option<&ControlValue> {
        self.values.get(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ControlId, &ControlValue)> {
        self.values.iter()
    }
}

/// The active control state of a context, i.e. the values the backend sees when decoding.
#[derive(Debug)]
pub struct ControlHandler {
    controls: HashMap<ControlId, (ControlConfig, ControlValue)>,
}

impl ControlHandler {
    /// Registers the decoder controls, each one set to its default value.
    pub fn new() -> Self {
        let controls = std::iter::once(MIN_BUFFERS_FOR_CAPTURE)
            .chain(STATELESS_CONTROLS.iter().map(|ctrl| ctrl.cfg))
            .map(|cfg| (cfg.id, (cfg, cfg.default_value())))
            .collect::<HashMap<_, _>>();

        log::debug!("Registered {} controls", controls.len());

        Self { controls }
    }

    pub fn config(&self, id: ControlId) -> Option<&ControlConfig> {
        self.controls.get(&id).map(|(cfg, _)| cfg)
    }

    /// Current value of a control. Volatile controls return their last cached value; their live
    /// value is provided by the owner of the handler.
    pub fn get(&self, id: ControlId) -> Option<&ControlValue> {
        self.controls.get(&id).map(|(_, value)| value)
    }

    pub fn set(&mut self, id: ControlId, value: ControlValue) -> Result<(), ControlError> {
        let (cfg, current) = self
            .controls
            .get_mut(&id)
            .ok_or(ControlError::Unknown(id))?;
        cfg.check(&value)?;
        *current = value;
        Ok(())
    }

    /// Checks every value of `snapshot` without applying any.
    pub fn check_snapshot(&self, snapshot: &ControlSnapshot) -> Result<(), ControlError> {
        for (id, value) in snapshot.iter() {
            let (cfg, _) = self.controls.get(id).ok_or(ControlError::Unknown(*id))?;
            cfg.check(value)?;
        }
        Ok(())
    }

    /// Makes the values of `snapshot` the active ones. Either all values are applied or none.
    pub fn apply_snapshot(&mut self, snapshot: &ControlSnapshot) -> Result<(), ControlError> {
        self.check_snapshot(snapshot)?;

        for (id, value) in snapshot.iter() {
            if let Some((_, current)) = self.controls.get_mut(id) {
                *current = value.clone();
            }
        }

        Ok(())
    }
}

impl Default for ControlHandler {
    fn default() -> Self {
        Self::new()
    }
}
