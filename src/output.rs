// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Playback session over the output half of a device.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use log::error;
use thiserror::Error;

use crate::device::Capability;
use crate::device::DeviceHandle;
use crate::device::QueryError;
use crate::events::AudioSamplesRequest;
use crate::events::FrameCompletionResult;
use crate::events::ListenerSet;
use crate::modes::AudioSampleRate;
use crate::modes::AudioSampleType;
use crate::modes::AudioStreamType;
use crate::modes::DisplayMode;
use crate::modes::DisplayModeId;
use crate::modes::PixelFormat;
use crate::modes::VideoFrame;
use crate::HardwareDevice;
use crate::HardwareError;
use crate::OutputCallbacks;
use crate::VideoOutputPort;

/// Error returned when a session cannot be constructed on a device.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum NewSessionError {
    #[error("device does not support {0}")]
    MissingCapability(Capability),
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Error returned when the video output path cannot be enabled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnableVideoOutputError {
    #[error("display mode rejected by the hardware")]
    ModeNotSupported,
    #[error("failed to enable video output: {0}")]
    Hardware(HardwareError),
}

/// Error returned when the audio output path cannot be enabled.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EnableAudioOutputError {
    #[error("failed to configure the audio stream: {0}")]
    Configure(HardwareError),
    #[error("failed to begin audio preroll: {0}")]
    Preroll(HardwareError),
}

/// Error returned when a frame cannot be displayed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DisplayFrameError {
    #[error("video output is not enabled")]
    VideoOutputDisabled,
    #[error("failed to display frame: {0}")]
    Hardware(#[from] HardwareError),
}

#[derive(Default)]
struct OutputState {
    video_enabled: bool,
    audio_enabled: bool,
    /// Frame timing of the enabled mode, recorded when the output path is
    /// enabled so the application can pace frame submission.
    frame_duration: i64,
    frame_timescale: i64,
}

/// State shared between the session and the hardware callback thread.
struct OutputShared<D> {
    port: Arc<D>,
    state: Mutex<OutputState>,
    frame_completed: ListenerSet<FrameCompletionResult>,
    playback_stopped: ListenerSet<()>,
    audio_samples_needed: ListenerSet<AudioSamplesRequest>,
}

impl<D: VideoOutputPort> OutputCallbacks for OutputShared<D> {
    fn scheduled_frame_completed(&self, result: FrameCompletionResult) {
        self.frame_completed.dispatch(&result);
    }

    fn scheduled_playback_stopped(&self) {
        self.playback_stopped.dispatch(&());
    }

    fn render_audio_samples(&self, preroll: bool) {
        self.audio_samples_needed
            .dispatch(&AudioSamplesRequest { preroll });

        // Preroll completion is the trigger that moves playback from queued
        // to running: start the clock at time 0 with unit speed.
        if preroll {
            if let Err(e) = self.port.start_scheduled_playback(0, 100, 1.0) {
                error!("failed to start scheduled playback after preroll: {}", e);
            }
        }
    }
}

/// An active playback binding to one device.
///
/// Constructing the session validates that the device supports playback and
/// registers the session as the single target of the device's playback
/// callbacks; dropping it disables any enabled output path and releases the
/// registration. At most one live session per device is supported: a second
/// session would replace this session's callback registration and leave both
/// in an unspecified state.
///
/// Completion notifications are republished through the `*_listeners` sets,
/// synchronously on the hardware's callback thread.
pub struct OutputSession<D: HardwareDevice + VideoOutputPort + 'static> {
    handle: DeviceHandle<D>,
    shared: Arc<OutputShared<D>>,
}

impl<D: HardwareDevice + VideoOutputPort + 'static> OutputSession<D> {
    /// Creates a playback session on the device behind `handle`.
    ///
    /// Fails without registering any callback if the device does not report
    /// the playback capability.
    pub fn new(handle: DeviceHandle<D>) -> Result<Self, NewSessionError> {
        if !handle.has_capability(Capability::Playback)? {
            return Err(NewSessionError::MissingCapability(Capability::Playback));
        }

        let shared = Arc::new(OutputShared {
            port: Arc::clone(handle.device()),
            state: Mutex::new(OutputState::default()),
            frame_completed: ListenerSet::new(),
            playback_stopped: ListenerSet::new(),
            audio_samples_needed: ListenerSet::new(),
        });

        handle
            .device()
            .set_output_callbacks(Some(Arc::clone(&shared) as Arc<dyn OutputCallbacks>));

        Ok(Self { handle, shared })
    }

    /// Handle of the device this session plays out to.
    pub fn handle(&self) -> &DeviceHandle<D> {
        &self.handle
    }

    /// Returns a fresh iterator over the display modes supported for
    /// output. The hardware is re-queried on every call.
    pub fn display_modes(&self) -> Box<dyn Iterator<Item = DisplayMode> + '_> {
        self.shared.port.display_modes()
    }

    /// Whether the device can output `mode` in `pixel_format`. Pure query,
    /// no state change.
    pub fn supports_display_mode(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
    ) -> Result<bool, QueryError> {
        self.shared
            .port
            .supports_display_mode(mode, pixel_format)
            .map_err(QueryError)
    }

    /// Switches the output path to `mode` and permits frame display.
    pub fn enable_video_output(&self, mode: &DisplayMode) -> Result<(), EnableVideoOutputError> {
        self.shared
            .port
            .enable_video_output(mode.id)
            .map_err(|e| match e {
                HardwareError::NotSupported | HardwareError::InvalidArgument => {
                    EnableVideoOutputError::ModeNotSupported
                }
                other => EnableVideoOutputError::Hardware(other),
            })?;

        let mut state = self.shared.state.lock().unwrap();
        state.video_enabled = true;
        state.frame_duration = mode.frame_duration;
        state.frame_timescale = mode.frame_timescale;

        Ok(())
    }

    /// Disables the output path. Frame display fails until the path is
    /// enabled again.
    pub fn disable_video_output(&self) -> Result<(), HardwareError> {
        self.shared.port.disable_video_output()?;
        self.shared.state.lock().unwrap().video_enabled = false;
        Ok(())
    }

    /// Whether the video output path is currently enabled.
    pub fn video_output_enabled(&self) -> bool {
        self.shared.state.lock().unwrap().video_enabled
    }

    /// Duration of one frame of the enabled output mode, or `None` if video
    /// output has never been enabled.
    pub fn frame_duration(&self) -> Option<Duration> {
        let state = self.shared.state.lock().unwrap();
        if state.frame_timescale == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(
            state.frame_duration as f64 / state.frame_timescale as f64,
        ))
    }

    /// Configures a continuous 48kHz audio stream and begins preroll.
    ///
    /// The hardware starts requesting samples through the
    /// audio-samples-needed notification immediately; once its ring buffer
    /// is filled, the session starts scheduled playback.
    pub fn enable_audio_output(
        &self,
        channels: u32,
        sample_type: AudioSampleType,
    ) -> Result<(), EnableAudioOutputError> {
        self.shared
            .port
            .enable_audio_output(
                AudioSampleRate::Rate48kHz,
                sample_type,
                channels,
                AudioStreamType::Continuous,
            )
            .map_err(EnableAudioOutputError::Configure)?;

        self.shared
            .port
            .begin_audio_preroll()
            .map_err(EnableAudioOutputError::Preroll)?;

        self.shared.state.lock().unwrap().audio_enabled = true;
        Ok(())
    }

    pub fn disable_audio_output(&self) -> Result<(), HardwareError> {
        self.shared.port.disable_audio_output()?;
        self.shared.state.lock().unwrap().audio_enabled = false;
        Ok(())
    }

    /// Submits `frame` for immediate, synchronous display.
    ///
    /// Fails without reaching the hardware if video output is not enabled.
    pub fn display_frame(&self, frame: &VideoFrame) -> Result<(), DisplayFrameError> {
        if !self.shared.state.lock().unwrap().video_enabled {
            return Err(DisplayFrameError::VideoOutputDisabled);
        }

        self.shared.port.display_frame_sync(frame)?;
        Ok(())
    }

    /// Listeners notified when an output frame completes, with the
    /// completion result reported by the hardware.
    pub fn frame_completed_listeners(&self) -> &ListenerSet<FrameCompletionResult> {
        &self.shared.frame_completed
    }

    /// Listeners notified when scheduled playback stops.
    pub fn playback_stopped_listeners(&self) -> &ListenerSet<()> {
        &self.shared.playback_stopped
    }

    /// Listeners notified when the hardware requests more audio samples.
    pub fn audio_samples_needed_listeners(&self) -> &ListenerSet<AudioSamplesRequest> {
        &self.shared.audio_samples_needed
    }
}

impl<D: HardwareDevice + VideoOutputPort + 'static> Drop for OutputSession<D> {
    fn drop(&mut self) {
        let (video_enabled, audio_enabled) = {
            let state = self.shared.state.lock().unwrap();
            (state.video_enabled, state.audio_enabled)
        };

        if video_enabled {
            if let Err(e) = self.shared.port.disable_video_output() {
                error!("failed to disable video output on session teardown: {}", e);
            }
        }
        if audio_enabled {
            if let Err(e) = self.shared.port.disable_audio_output() {
                error!("failed to disable audio output on session teardown: {}", e);
            }
        }

        // The hardware must not call back into state that is going away.
        self.handle.device().set_output_callbacks(None);
    }
}
