// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs a file through the decode pipeline, using the dummy backend.
//!
//! The file is cut into chunks, each one submitted as the bitstream of one request. The CRC32 of
//! every frame written by the backend is printed.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use bytes::Bytes;

use stateless_vdec::backend::dummy::DummyBackend;
use stateless_vdec::device::context::Context;
use stateless_vdec::device::controls::required_controls;
use stateless_vdec::device::controls::ControlId;
use stateless_vdec::device::controls::ControlSnapshot;
use stateless_vdec::device::controls::ControlValue;
use stateless_vdec::device::controls::H264_DECODE_MODE_FRAME_BASED;
use stateless_vdec::device::queue::CaptureBuffer;
use stateless_vdec::device::queue::CapturePlane;
use stateless_vdec::device::queue::InputBuffer;
use stateless_vdec::device::request::Request;
use stateless_vdec::device::Device;
use stateless_vdec::device::DeviceConfig;
use stateless_vdec::format::HwArch;
use stateless_vdec::video_frame::PlaneMapping;
use stateless_vdec::Codec;
use stateless_vdec::QueueDirection;
use stateless_vdec::Resolution;

/// Feeds a file to the stateless decode pipeline
#[derive(Debug, FromArgs)]
struct Args {
    /// input file
    #[argh(positional)]
    input: PathBuf,

    /// codec of the input (h264, vp8 or vp9). Default: h264
    #[argh(option, default = "Codec::H264Slice")]
    codec: Codec,

    /// hardware architecture to emulate (pure or lat). Default: lat
    #[argh(option, default = "HwArch::LatSingleCore")]
    hw_arch: HwArch,

    /// size of the chunk submitted with each request. Default: 4096
    #[argh(option, default = "4096")]
    chunk_size: usize,

    /// coded width of the stream. Default: 320
    #[argh(option, default = "320")]
    width: u32,

    /// coded height of the stream. Default: 240
    #[argh(option, default = "240")]
    height: u32,

    /// number of capture buffers to allocate. Default: 4
    #[argh(option, default = "4")]
    capture_buffers: usize,

    /// whether to run the jobs on the calling thread instead of a job runner thread
    #[argh(switch)]
    synchronous: bool,
}

/// Control values for `chunk`. The dummy backend does not parse them.
fn controls_for(codec: Codec, chunk: &[u8]) -> ControlSnapshot {
    let header = Bytes::copy_from_slice(&chunk[..chunk.len().min(16)]);
    required_controls(codec).fold(ControlSnapshot::new(), |snapshot, id| {
        let value = match id {
            ControlId::H264DecodeMode => ControlValue::Integer(H264_DECODE_MODE_FRAME_BASED),
            _ => ControlValue::Compound(header.clone()),
        };
        snapshot.with(id, value)
    })
}

fn new_capture_buffer(ctx: &Context, index: usize) -> CaptureBuffer {
    let format = ctx.capture_format().expect("no capture format");
    let planes = (0..format.num_planes())
        .map(|i| CapturePlane::new(PlaneMapping::new(format.sizeimage[i]), 0))
        .collect();
    CaptureBuffer::new(index, planes)
}

/// Prints the frames written so far. Unless `requeue` is false, a new capture buffer is queued for
/// every frame dequeued.
fn print_frames(
    ctx: &Arc<Context>,
    device: &Device,
    next_capture_index: &mut usize,
    total: &mut usize,
    requeue: bool,
) {
    while let Some(done) = ctx.dequeue_capture() {
        let crc = done
            .buffer
            .plane(0)
            .and_then(|p| p.mapping.as_ref())
            .map(|m| u32::from_le_bytes(m.read(4).try_into().unwrap_or_default()))
            .unwrap_or_default();
        println!("frame {:4}: {:?} crc32 {:08x}", *total, done.state, crc);
        *total += 1;

        if requeue {
            device
                .queue_capture_buffer(ctx.id(), new_capture_buffer(ctx, *next_capture_index))
                .expect("failed to queue capture buffer");
            *next_capture_index += 1;
        }
    }
}

fn main() {
    env_logger::init();

    let args: Args = argh::from_env();

    let input = fs::read(&args.input).expect("error reading input file");

    let device = Device::new(DeviceConfig::new().hw_arch(args.hw_arch))
        .expect("failed to create device");
    let ctx = device
        .open_context(args.codec, Box::new(DummyBackend::new()))
        .expect("failed to open context");
    ctx.set_resolution(Resolution::from((args.width, args.height)))
        .expect("no capture format");

    let mut next_capture_index = 0;
    while next_capture_index < args.capture_buffers {
        device
            .queue_capture_buffer(ctx.id(), new_capture_buffer(&ctx, next_capture_index))
            .expect("failed to queue capture buffer");
        next_capture_index += 1;
    }

    device
        .streamon(ctx.id(), QueueDirection::Capture)
        .expect("failed to start capture queue");
    device
        .streamon(ctx.id(), QueueDirection::Input)
        .expect("failed to start input queue");

    let mut runner = if args.synchronous {
        None
    } else {
        Some(device.start_runner().expect("failed to start job runner"))
    };

    let mut total = 0;
    for (i, chunk) in input.chunks(args.chunk_size.max(1)).enumerate() {
        let buffer = InputBuffer::new(i, Bytes::copy_from_slice(chunk), 0).with_timestamp(i as u64);
        let request = Request::new(i as u64)
            .add_buffer(ctx.id(), buffer)
            .set_controls(controls_for(args.codec, chunk));
        let handle = device.queue_request(request).expect("request rejected");

        if args.synchronous {
            device.run_pending();
        }
        while !handle.wait_timeout(Duration::from_millis(10)) {
            print_frames(&ctx, &device, &mut next_capture_index, &mut total, true);
        }
        print_frames(&ctx, &device, &mut next_capture_index, &mut total, true);

        if let Some(done) = ctx.dequeue_input() {
            if done.has_error() {
                log::error!("chunk {} failed to decode", i);
            }
        }
    }

    if let Some(runner) = runner.as_mut() {
        runner.stop();
    }
    device.close_context(ctx.id()).expect("failed to close context");
    print_frames(&ctx, &device, &mut next_capture_index, &mut total, false);

    println!("{} frames decoded", ctx.decoded_frame_count());
}
