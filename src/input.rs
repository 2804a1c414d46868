// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capture session over the input half of a device.

use std::sync::Arc;
use std::sync::Mutex;

use log::error;
use log::warn;
use thiserror::Error;

use crate::device::Capability;
use crate::device::DeviceHandle;
use crate::events::CaptureError;
use crate::events::FormatChange;
use crate::events::ListenerSet;
use crate::modes::DisplayMode;
use crate::modes::InputFrame;
use crate::modes::PixelFormat;
use crate::output::NewSessionError;
use crate::HardwareDevice;
use crate::HardwareError;
use crate::InputCallbacks;
use crate::VideoInputPort;

/// Error returned when capture cannot be started.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StartCaptureError {
    #[error("capture is already running")]
    AlreadyCapturing,
    #[error("failed to enable video input: {0}")]
    EnableVideoInputFailed(HardwareError),
    #[error("failed to start streams: {0}")]
    StartStreamsFailed(HardwareError),
    #[error(transparent)]
    Query(#[from] crate::device::QueryError),
}

#[derive(Default)]
struct InputState {
    capturing: bool,
    /// Whether the input was enabled with format detection, i.e. whether
    /// format-changed callbacks reconfigure the input path.
    apply_detected_mode: bool,
    /// Signal validity of the last delivered frame, used to notify on
    /// transitions only.
    last_signal_valid: Option<bool>,
}

/// State shared between the session and the hardware callback thread.
struct InputShared<D> {
    port: Arc<D>,
    state: Mutex<InputState>,
    frame_arrived: ListenerSet<InputFrame>,
    signal_changed: ListenerSet<bool>,
    format_changed: ListenerSet<FormatChange>,
    capture_errors: ListenerSet<CaptureError>,
}

impl<D: VideoInputPort> InputShared<D> {
    /// Re-enables the input path for the newly detected mode. Returns the
    /// notification to publish if a step failed.
    fn reapply_input_mode(&self, change: &FormatChange) -> Result<(), CaptureError> {
        // RGB 4:4:4 signals cannot be captured into a YUV frame format.
        let pixel_format = if change.rgb444 {
            PixelFormat::Rgb10
        } else {
            PixelFormat::Yuv8
        };

        self.port
            .pause_streams()
            .and_then(|()| self.port.enable_video_input(change.new_mode.id, pixel_format, true))
            .map_err(CaptureError::ReenableVideoInputFailed)?;

        self.port
            .flush_streams()
            .and_then(|()| self.port.start_streams())
            .map_err(CaptureError::RestartStreamsFailed)
    }
}

impl<D: VideoInputPort> InputCallbacks for InputShared<D> {
    fn input_format_changed(&self, change: FormatChange) {
        let apply = {
            let state = self.state.lock().unwrap();
            state.capturing && state.apply_detected_mode
        };

        if apply {
            if let Err(e) = self.reapply_input_mode(&change) {
                error!("input format change could not be applied: {}", e);
                self.capture_errors.dispatch(&e);
            }
        }

        // The new descriptor is republished either way; reconfiguring
        // anything beyond the input path is the application's job.
        self.format_changed.dispatch(&change);
    }

    fn input_frame_arrived(&self, frame: InputFrame) {
        let signal_transition = {
            let mut state = self.state.lock().unwrap();
            if !state.capturing {
                return;
            }
            let transition = state.last_signal_valid != Some(frame.has_signal);
            state.last_signal_valid = Some(frame.has_signal);
            transition
        };

        if signal_transition {
            self.signal_changed.dispatch(&frame.has_signal);
        }
        self.frame_arrived.dispatch(&frame);
    }
}

/// An active capture binding to one device.
///
/// Constructing the session validates that the device supports capture and
/// registers the session as the single target of the device's capture
/// callbacks; dropping it stops a running capture and releases the
/// registration. At most one live session per device is supported: a second
/// session would replace this session's callback registration and leave both
/// in an unspecified state.
pub struct InputSession<D: HardwareDevice + VideoInputPort + 'static> {
    handle: DeviceHandle<D>,
    shared: Arc<InputShared<D>>,
}

impl<D: HardwareDevice + VideoInputPort + 'static> InputSession<D> {
    /// Creates a capture session on the device behind `handle`.
    ///
    /// Fails without registering any callback if the device does not report
    /// the capture capability.
    pub fn new(handle: DeviceHandle<D>) -> Result<Self, NewSessionError> {
        if !handle.has_capability(Capability::Capture)? {
            return Err(NewSessionError::MissingCapability(Capability::Capture));
        }

        let shared = Arc::new(InputShared {
            port: Arc::clone(handle.device()),
            state: Mutex::new(InputState::default()),
            frame_arrived: ListenerSet::new(),
            signal_changed: ListenerSet::new(),
            format_changed: ListenerSet::new(),
            capture_errors: ListenerSet::new(),
        });

        handle
            .device()
            .set_input_callbacks(Some(Arc::clone(&shared) as Arc<dyn InputCallbacks>));

        Ok(Self { handle, shared })
    }

    /// Handle of the device this session captures from.
    pub fn handle(&self) -> &DeviceHandle<D> {
        &self.handle
    }

    /// Returns a fresh iterator over the display modes supported for
    /// capture. The hardware is re-queried on every call.
    pub fn display_modes(&self) -> Box<dyn Iterator<Item = DisplayMode> + '_> {
        self.shared.port.display_modes()
    }

    /// Whether the device can detect the format of its input signal.
    pub fn supports_format_detection(&self) -> Result<bool, crate::device::QueryError> {
        self.handle.has_capability(Capability::FormatDetection)
    }

    /// Enables the input path for `mode` and starts the capture streams.
    ///
    /// Format detection is requested from the hardware only when
    /// `apply_detected_mode` is set and the device supports it; the session
    /// then re-enables the input path itself whenever the hardware detects a
    /// new format.
    pub fn start_capture(
        &self,
        mode: &DisplayMode,
        apply_detected_mode: bool,
    ) -> Result<(), StartCaptureError> {
        if self.shared.state.lock().unwrap().capturing {
            return Err(StartCaptureError::AlreadyCapturing);
        }

        let detect = apply_detected_mode && self.supports_format_detection()?;

        self.shared
            .port
            .enable_video_input(mode.id, PixelFormat::Yuv8, detect)
            .map_err(StartCaptureError::EnableVideoInputFailed)?;

        if let Err(e) = self.shared.port.start_streams() {
            // Unwind the input enable so a later start finds a clean path.
            if let Err(e) = self.shared.port.disable_video_input() {
                warn!("failed to disable video input after a failed start: {}", e);
            }
            return Err(StartCaptureError::StartStreamsFailed(e));
        }

        let mut state = self.shared.state.lock().unwrap();
        state.capturing = true;
        state.apply_detected_mode = detect;
        state.last_signal_valid = None;
        Ok(())
    }

    /// Stops the capture streams and disables the input path.
    ///
    /// The session stops delivering frame notifications even if the hardware
    /// commands fail, so capture can be restarted on a misbehaving device.
    pub fn stop_capture(&self) -> Result<(), HardwareError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.capturing {
                return Ok(());
            }
            state.capturing = false;
            state.apply_detected_mode = false;
        }

        self.shared.port.stop_streams()?;
        self.shared.port.disable_video_input()?;
        Ok(())
    }

    /// Whether capture is currently running.
    pub fn is_capturing(&self) -> bool {
        self.shared.state.lock().unwrap().capturing
    }

    /// Listeners notified of every captured frame.
    pub fn frame_arrived_listeners(&self) -> &ListenerSet<InputFrame> {
        &self.shared.frame_arrived
    }

    /// Listeners notified when the input signal becomes valid or invalid.
    pub fn signal_changed_listeners(&self) -> &ListenerSet<bool> {
        &self.shared.signal_changed
    }

    /// Listeners notified when the hardware detects a new input format.
    pub fn format_changed_listeners(&self) -> &ListenerSet<FormatChange> {
        &self.shared.format_changed
    }

    /// Listeners notified of capture failures that originate on the
    /// hardware callback thread.
    pub fn capture_error_listeners(&self) -> &ListenerSet<CaptureError> {
        &self.shared.capture_errors
    }
}

impl<D: HardwareDevice + VideoInputPort + 'static> Drop for InputSession<D> {
    fn drop(&mut self) {
        if let Err(e) = self.stop_capture() {
            error!("failed to stop capture on session teardown: {}", e);
        }
        // The hardware must not call back into state that is going away.
        self.handle.device().set_input_callbacks(None);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::device::IO_SUPPORT_PLAYBACK;
    use crate::devices::SoftwareDevice;
    use crate::devices::StreamOp;
    use crate::modes::DisplayModeId;
    use crate::modes::VideoFrame;

    fn capture_session() -> (Arc<SoftwareDevice>, InputSession<SoftwareDevice>) {
        let device = Arc::new(SoftwareDevice::new("in"));
        let session = InputSession::new(DeviceHandle::new(Arc::clone(&device))).unwrap();
        (device, session)
    }

    fn mode(device: &SoftwareDevice, id: DisplayModeId) -> DisplayMode {
        VideoInputPort::display_modes(device)
            .find(|m| m.id == id)
            .unwrap()
    }

    fn input_frame(mode: &DisplayMode, has_signal: bool) -> InputFrame {
        InputFrame {
            video: VideoFrame::new(mode.width, mode.height, PixelFormat::Yuv8),
            has_signal,
        }
    }

    #[test]
    fn construction_requires_capture_capability() {
        let device = Arc::new(SoftwareDevice::new("playback only"));
        device.set_io_support(IO_SUPPORT_PLAYBACK);

        match InputSession::new(DeviceHandle::new(Arc::clone(&device))) {
            Err(NewSessionError::MissingCapability(Capability::Capture)) => (),
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert!(!device.has_input_callbacks());
    }

    #[test]
    fn start_and_stop_capture() {
        let (device, session) = capture_session();
        let mode = mode(&device, DisplayModeId::Hd1080p25);

        assert!(!session.is_capturing());
        session.start_capture(&mode, false).unwrap();
        assert!(session.is_capturing());
        assert_eq!(
            device.stream_ops(),
            vec![
                StreamOp::EnableInput(DisplayModeId::Hd1080p25, PixelFormat::Yuv8, false),
                StreamOp::Start,
            ]
        );

        assert_eq!(
            session.start_capture(&mode, false),
            Err(StartCaptureError::AlreadyCapturing)
        );

        session.stop_capture().unwrap();
        assert!(!session.is_capturing());
        assert_eq!(
            device.stream_ops()[2..],
            [StreamOp::Stop, StreamOp::DisableInput]
        );
    }

    #[test]
    fn format_detection_only_requested_when_supported() {
        let (device, session) = capture_session();
        device.set_format_detection(false);
        let mode = mode(&device, DisplayModeId::Hd1080p25);

        session.start_capture(&mode, true).unwrap();
        assert_eq!(
            device.stream_ops()[0],
            StreamOp::EnableInput(DisplayModeId::Hd1080p25, PixelFormat::Yuv8, false)
        );
    }

    #[test]
    fn format_change_reenables_input_path() {
        let (device, session) = capture_session();
        session
            .start_capture(&mode(&device, DisplayModeId::Hd1080p25), true)
            .unwrap();

        let changes = Arc::new(Mutex::new(Vec::new()));
        let changes2 = Arc::clone(&changes);
        session
            .format_changed_listeners()
            .subscribe(move |c: &FormatChange| changes2.lock().unwrap().push(c.clone()));

        let change = FormatChange {
            new_mode: mode(&device, DisplayModeId::Hd1080p5994),
            display_mode_changed: true,
            field_dominance_changed: false,
            colorspace_changed: true,
            rgb444: true,
        };
        device.change_input_format(change.clone());

        // Pause, re-enable with the detected RGB format, flush, restart.
        assert_eq!(
            device.stream_ops()[2..],
            [
                StreamOp::Pause,
                StreamOp::EnableInput(DisplayModeId::Hd1080p5994, PixelFormat::Rgb10, true),
                StreamOp::Flush,
                StreamOp::Start,
            ]
        );
        // The descriptor is republished unchanged.
        assert_eq!(*changes.lock().unwrap(), vec![change]);
    }

    #[test]
    fn format_change_without_detection_is_republished_only() {
        let (device, session) = capture_session();
        session
            .start_capture(&mode(&device, DisplayModeId::Hd1080p25), false)
            .unwrap();
        let ops_before = device.stream_ops().len();

        let notified = Arc::new(AtomicUsize::new(0));
        let notified2 = Arc::clone(&notified);
        session.format_changed_listeners().subscribe(move |_| {
            notified2.fetch_add(1, Ordering::SeqCst);
        });

        device.change_input_format(FormatChange {
            new_mode: mode(&device, DisplayModeId::Hd720p60),
            display_mode_changed: true,
            field_dominance_changed: false,
            colorspace_changed: false,
            rgb444: false,
        });

        assert_eq!(device.stream_ops().len(), ops_before);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn signal_changes_notify_on_transitions_only() {
        let (device, session) = capture_session();
        let mode = mode(&device, DisplayModeId::Hd1080p25);
        session.start_capture(&mode, false).unwrap();

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let frames = Arc::new(AtomicUsize::new(0));

        let transitions2 = Arc::clone(&transitions);
        session
            .signal_changed_listeners()
            .subscribe(move |valid: &bool| transitions2.lock().unwrap().push(*valid));
        let frames2 = Arc::clone(&frames);
        session.frame_arrived_listeners().subscribe(move |_| {
            frames2.fetch_add(1, Ordering::SeqCst);
        });

        device.push_input_frame(input_frame(&mode, true));
        device.push_input_frame(input_frame(&mode, true));
        device.push_input_frame(input_frame(&mode, false));
        device.push_input_frame(input_frame(&mode, false));
        device.push_input_frame(input_frame(&mode, true));

        assert_eq!(*transitions.lock().unwrap(), vec![true, false, true]);
        assert_eq!(frames.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn frames_outside_capture_are_dropped() {
        let (device, session) = capture_session();
        let mode = mode(&device, DisplayModeId::Hd1080p25);

        let frames = Arc::new(AtomicUsize::new(0));
        let frames2 = Arc::clone(&frames);
        session.frame_arrived_listeners().subscribe(move |_| {
            frames2.fetch_add(1, Ordering::SeqCst);
        });

        device.push_input_frame(input_frame(&mode, true));
        assert_eq!(frames.load(Ordering::SeqCst), 0);

        session.start_capture(&mode, false).unwrap();
        device.push_input_frame(input_frame(&mode, true));
        assert_eq!(frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_stops_capture_and_unregisters() {
        let (device, session) = capture_session();
        session
            .start_capture(&mode(&device, DisplayModeId::Hd1080p25), false)
            .unwrap();
        assert!(device.has_input_callbacks());

        drop(session);
        assert!(!device.has_input_callbacks());
        assert!(!device.video_input_enabled());
    }
}
