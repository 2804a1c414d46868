// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Software implementation of the hardware traits, with no dependency.
//!
//! This module illustrates how the trait seams of this crate map onto a
//! device. [`SoftwareDevice`] behaves like a capture and playback card with
//! a fixed mode table: output commands are recorded instead of reaching
//! hardware, and the methods in the "hardware side" section let a test (or a
//! signal generator thread) deliver the callbacks a real card would.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::device::AttributeId;
use crate::device::IO_SUPPORT_CAPTURE;
use crate::device::IO_SUPPORT_PLAYBACK;
use crate::events::FormatChange;
use crate::events::FrameCompletionResult;
use crate::modes::AudioSampleRate;
use crate::modes::AudioSampleType;
use crate::modes::AudioStreamType;
use crate::modes::DisplayMode;
use crate::modes::DisplayModeId;
use crate::modes::InputFrame;
use crate::modes::PixelFormat;
use crate::modes::VideoFrame;
use crate::HardwareDevice;
use crate::HardwareError;
use crate::InputCallbacks;
use crate::OutputCallbacks;
use crate::VideoInputPort;
use crate::VideoOutputPort;

/// Pixel formats the software device accepts.
const PIXEL_FORMATS: [PixelFormat; 4] = [
    PixelFormat::Yuv8,
    PixelFormat::Yuv10,
    PixelFormat::Argb8,
    PixelFormat::Bgra8,
];

fn default_modes() -> Vec<DisplayMode> {
    fn mode(
        id: DisplayModeId,
        name: &str,
        width: u32,
        height: u32,
        frame_duration: i64,
        frame_timescale: i64,
    ) -> DisplayMode {
        DisplayMode {
            id,
            name: name.to_string(),
            width,
            height,
            frame_duration,
            frame_timescale,
        }
    }

    vec![
        mode(DisplayModeId::Hd720p60, "720p60", 1280, 720, 1000, 60000),
        mode(DisplayModeId::Hd1080i50, "1080i50", 1920, 1080, 1000, 25000),
        mode(DisplayModeId::Hd1080p25, "1080p25", 1920, 1080, 1000, 25000),
        mode(DisplayModeId::Hd1080p30, "1080p30", 1920, 1080, 1000, 30000),
        mode(
            DisplayModeId::Hd1080p5994,
            "1080p59.94",
            1920,
            1080,
            1001,
            60000,
        ),
        mode(DisplayModeId::Hd1080p6000, "1080p60", 1920, 1080, 1000, 60000),
    ]
}

/// One input-path command received from a session, in issue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOp {
    EnableInput(DisplayModeId, PixelFormat, bool),
    DisableInput,
    Start,
    Stop,
    Pause,
    Flush,
}

#[derive(Default)]
struct OutputHwState {
    enabled_mode: Option<DisplayModeId>,
    audio_config: Option<(AudioSampleRate, AudioSampleType, u32, AudioStreamType)>,
    displayed_frames: u64,
    /// Every scheduled playback start issued, as (start_time, timescale,
    /// speed).
    playback_starts: Vec<(i64, i64, f64)>,
}

#[derive(Default)]
struct InputHwState {
    enabled: bool,
    ops: Vec<StreamOp>,
}

/// A capture and playback device implemented in software.
pub struct SoftwareDevice {
    name: String,
    io_support: AtomicI64,
    format_detection: AtomicBool,
    output_modes: Mutex<Vec<DisplayMode>>,
    input_modes: Mutex<Vec<DisplayMode>>,
    output: Mutex<OutputHwState>,
    input: Mutex<InputHwState>,
    output_callbacks: Mutex<Option<Arc<dyn OutputCallbacks>>>,
    input_callbacks: Mutex<Option<Arc<dyn InputCallbacks>>>,
}

impl SoftwareDevice {
    /// Returns a device named `name` supporting both capture and playback,
    /// with format detection and the default mode table.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            io_support: AtomicI64::new(IO_SUPPORT_CAPTURE | IO_SUPPORT_PLAYBACK),
            format_detection: AtomicBool::new(true),
            output_modes: Mutex::new(default_modes()),
            input_modes: Mutex::new(default_modes()),
            output: Mutex::new(Default::default()),
            input: Mutex::new(Default::default()),
            output_callbacks: Mutex::new(None),
            input_callbacks: Mutex::new(None),
        }
    }

    /// Replaces the video I/O support attribute bitmask.
    pub fn set_io_support(&self, io_support: i64) {
        self.io_support.store(io_support, Ordering::SeqCst);
    }

    /// Sets the format detection flag attribute.
    pub fn set_format_detection(&self, supported: bool) {
        self.format_detection.store(supported, Ordering::SeqCst);
    }

    /// Replaces the modes enumerated and accepted for output.
    pub fn set_output_modes(&self, modes: Vec<DisplayMode>) {
        *self.output_modes.lock().unwrap() = modes;
    }

    /// Replaces the modes enumerated and accepted for capture.
    pub fn set_input_modes(&self, modes: Vec<DisplayMode>) {
        *self.input_modes.lock().unwrap() = modes;
    }

    pub fn has_output_callbacks(&self) -> bool {
        self.output_callbacks.lock().unwrap().is_some()
    }

    pub fn has_input_callbacks(&self) -> bool {
        self.input_callbacks.lock().unwrap().is_some()
    }

    pub fn video_output_enabled(&self) -> bool {
        self.output.lock().unwrap().enabled_mode.is_some()
    }

    pub fn audio_output_enabled(&self) -> bool {
        self.output.lock().unwrap().audio_config.is_some()
    }

    pub fn video_input_enabled(&self) -> bool {
        self.input.lock().unwrap().enabled
    }

    /// Number of frames submitted for synchronous display.
    pub fn displayed_frame_count(&self) -> u64 {
        self.output.lock().unwrap().displayed_frames
    }

    /// Scheduled playback starts issued so far.
    pub fn playback_starts(&self) -> Vec<(i64, i64, f64)> {
        self.output.lock().unwrap().playback_starts.clone()
    }

    /// Input-path commands received so far, in issue order.
    pub fn stream_ops(&self) -> Vec<StreamOp> {
        self.input.lock().unwrap().ops.clone()
    }

    // Hardware side: deliver the callbacks a real card would. The callback
    // slot lock is released before invoking so a callback can issue
    // commands back into the device.

    fn output_target(&self) -> Option<Arc<dyn OutputCallbacks>> {
        self.output_callbacks.lock().unwrap().clone()
    }

    fn input_target(&self) -> Option<Arc<dyn InputCallbacks>> {
        self.input_callbacks.lock().unwrap().clone()
    }

    /// Signals completion of an output frame.
    pub fn complete_frame(&self, result: FrameCompletionResult) {
        if let Some(target) = self.output_target() {
            target.scheduled_frame_completed(result);
        }
    }

    /// Signals that scheduled playback stopped.
    pub fn stop_playback(&self) {
        if let Some(target) = self.output_target() {
            target.scheduled_playback_stopped();
        }
    }

    /// Requests more audio samples from the registered callback target.
    pub fn request_audio_samples(&self, preroll: bool) {
        if let Some(target) = self.output_target() {
            target.render_audio_samples(preroll);
        }
    }

    /// Delivers a captured frame.
    pub fn push_input_frame(&self, frame: InputFrame) {
        if let Some(target) = self.input_target() {
            target.input_frame_arrived(frame);
        }
    }

    /// Signals a detected change of the input format.
    pub fn change_input_format(&self, change: FormatChange) {
        if let Some(target) = self.input_target() {
            target.input_format_changed(change);
        }
    }
}

impl HardwareDevice for SoftwareDevice {
    fn display_name(&self) -> Result<String, HardwareError> {
        Ok(self.name.clone())
    }

    fn int_attribute(&self, id: AttributeId) -> Result<i64, HardwareError> {
        match id {
            AttributeId::VideoIoSupport => Ok(self.io_support.load(Ordering::SeqCst)),
            _ => Err(HardwareError::NotSupported),
        }
    }

    fn flag_attribute(&self, id: AttributeId) -> Result<bool, HardwareError> {
        match id {
            AttributeId::SupportsInputFormatDetection => {
                Ok(self.format_detection.load(Ordering::SeqCst))
            }
            _ => Err(HardwareError::NotSupported),
        }
    }
}

impl VideoOutputPort for SoftwareDevice {
    fn display_modes(&self) -> Box<dyn Iterator<Item = DisplayMode> + '_> {
        Box::new(self.output_modes.lock().unwrap().clone().into_iter())
    }

    fn supports_display_mode(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
    ) -> Result<bool, HardwareError> {
        let known_mode = self.output_modes.lock().unwrap().iter().any(|m| m.id == mode);
        Ok(known_mode && PIXEL_FORMATS.contains(&pixel_format))
    }

    fn enable_video_output(&self, mode: DisplayModeId) -> Result<(), HardwareError> {
        if !self.output_modes.lock().unwrap().iter().any(|m| m.id == mode) {
            return Err(HardwareError::NotSupported);
        }
        self.output.lock().unwrap().enabled_mode = Some(mode);
        Ok(())
    }

    fn disable_video_output(&self) -> Result<(), HardwareError> {
        self.output.lock().unwrap().enabled_mode = None;
        Ok(())
    }

    fn enable_audio_output(
        &self,
        sample_rate: AudioSampleRate,
        sample_type: AudioSampleType,
        channels: u32,
        stream_type: AudioStreamType,
    ) -> Result<(), HardwareError> {
        self.output.lock().unwrap().audio_config =
            Some((sample_rate, sample_type, channels, stream_type));
        Ok(())
    }

    fn begin_audio_preroll(&self) -> Result<(), HardwareError> {
        if self.output.lock().unwrap().audio_config.is_none() {
            return Err(HardwareError::Failed);
        }
        // The software ring buffer is filled by a single request: report
        // preroll completion immediately.
        self.request_audio_samples(true);
        Ok(())
    }

    fn disable_audio_output(&self) -> Result<(), HardwareError> {
        self.output.lock().unwrap().audio_config = None;
        Ok(())
    }

    fn display_frame_sync(&self, frame: &VideoFrame) -> Result<(), HardwareError> {
        let mut output = self.output.lock().unwrap();
        if output.enabled_mode.is_none() {
            return Err(HardwareError::InvalidArgument);
        }
        if frame.data.len() < (frame.row_bytes * frame.height) as usize {
            return Err(HardwareError::InvalidArgument);
        }
        output.displayed_frames += 1;
        Ok(())
    }

    fn start_scheduled_playback(
        &self,
        start_time: i64,
        timescale: i64,
        speed: f64,
    ) -> Result<(), HardwareError> {
        self.output
            .lock()
            .unwrap()
            .playback_starts
            .push((start_time, timescale, speed));
        Ok(())
    }

    fn set_output_callbacks(&self, callbacks: Option<Arc<dyn OutputCallbacks>>) {
        *self.output_callbacks.lock().unwrap() = callbacks;
    }
}

impl VideoInputPort for SoftwareDevice {
    fn display_modes(&self) -> Box<dyn Iterator<Item = DisplayMode> + '_> {
        Box::new(self.input_modes.lock().unwrap().clone().into_iter())
    }

    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        detect_format: bool,
    ) -> Result<(), HardwareError> {
        if !self.input_modes.lock().unwrap().iter().any(|m| m.id == mode) {
            return Err(HardwareError::NotSupported);
        }
        let mut input = self.input.lock().unwrap();
        input.enabled = true;
        input
            .ops
            .push(StreamOp::EnableInput(mode, pixel_format, detect_format));
        Ok(())
    }

    fn disable_video_input(&self) -> Result<(), HardwareError> {
        let mut input = self.input.lock().unwrap();
        input.enabled = false;
        input.ops.push(StreamOp::DisableInput);
        Ok(())
    }

    fn start_streams(&self) -> Result<(), HardwareError> {
        let mut input = self.input.lock().unwrap();
        if !input.enabled {
            return Err(HardwareError::Failed);
        }
        input.ops.push(StreamOp::Start);
        Ok(())
    }

    fn stop_streams(&self) -> Result<(), HardwareError> {
        self.input.lock().unwrap().ops.push(StreamOp::Stop);
        Ok(())
    }

    fn pause_streams(&self) -> Result<(), HardwareError> {
        self.input.lock().unwrap().ops.push(StreamOp::Pause);
        Ok(())
    }

    fn flush_streams(&self) -> Result<(), HardwareError> {
        self.input.lock().unwrap().ops.push(StreamOp::Flush);
        Ok(())
    }

    fn set_input_callbacks(&self, callbacks: Option<Arc<dyn InputCallbacks>>) {
        *self.input_callbacks.lock().unwrap() = callbacks;
    }
}
