// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This crate contains a host-side session and event-dispatch layer for SDI
//! capture and playback cards driven through a vendor SDK.
//!
//! The layer is SDK-independent and relies on a handful of traits being
//! implemented on top of a given vendor's bindings. This means that adapting
//! a new SDK, and writing application code that drives capture or playback,
//! are two completely orthogonal tasks: implementing the traits for an SDK
//! makes all session types in this crate available on its hardware.
//!
//! # Traits to implement on top of the SDK
//!
//! * [`HardwareDevice`] exposes the name and attribute queries of a raw
//!   device reference.
//! * [`VideoOutputPort`] exposes the playback half of a device: display-mode
//!   enumeration, video/audio output control, synchronous frame display, and
//!   registration of the scheduled-playback callbacks.
//! * [`VideoInputPort`] exposes the capture half: video input control,
//!   stream start/stop, and registration of the capture callbacks.
//! * [`DeviceDiscovery`] delivers device arrival and removal notifications
//!   into a [`DeviceRegistry`].
//!
//! # Anatomy of an application
//!
//! A discovery implementation pushes raw devices into a [`DeviceRegistry`],
//! which wraps each one in a [`DeviceHandle`]. Selecting a handle for
//! playback or capture promotes it into an [`OutputSession`] or
//! [`InputSession`]; construction validates the relevant capability and
//! registers the session as the device's callback target. The session then
//! republishes hardware-driven completion signals to its subscribed
//! listeners and tears the registration down again when dropped.
//!
//! Listeners run synchronously on the SDK's callback thread. They must not
//! block and must not touch UI state directly; marshaling back onto an
//! application's own thread is the listener's responsibility.
//!
//! The [`devices`] module contains a software implementation of all of these
//! traits that can be used to exercise applications without hardware.

pub mod device;
pub mod devices;
pub mod events;
pub mod input;
pub mod modes;
pub mod output;

pub use device::Capability;
pub use device::DeviceHandle;
pub use device::QueryError;
pub use events::ListenerId;
pub use events::ListenerSet;
pub use input::InputSession;
pub use output::OutputSession;

use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;

use device::AttributeId;
use events::FormatChange;
use events::FrameCompletionResult;
use modes::AudioSampleRate;
use modes::AudioSampleType;
use modes::AudioStreamType;
use modes::DisplayMode;
use modes::DisplayModeId;
use modes::InputFrame;
use modes::PixelFormat;
use modes::VideoFrame;

/// Failure reported by the hardware for a single SDK call.
///
/// Stands in for the SDK's raw result codes; trait implementations map
/// whatever their bindings return onto these variants.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    #[error("operation failed on the hardware side")]
    Failed,
    #[error("operation not supported by this device")]
    NotSupported,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("device is busy")]
    Busy,
}

/// Trait for querying the identity and attributes of a raw device.
///
/// Implementations must query the hardware on every call rather than cache:
/// attribute values can change while a device is connected (e.g. when its
/// I/O profile is reconfigured) and [`DeviceHandle`] relies on observing the
/// live state.
pub trait HardwareDevice: Send + Sync {
    /// Human-readable model name of the device.
    fn display_name(&self) -> Result<String, HardwareError>;
    /// Value of the integer attribute `id`.
    fn int_attribute(&self, id: AttributeId) -> Result<i64, HardwareError>;
    /// Value of the flag attribute `id`.
    fn flag_attribute(&self, id: AttributeId) -> Result<bool, HardwareError>;
}

/// Callbacks invoked by the hardware while scheduled playback is active.
///
/// Invoked on the SDK's callback thread; implementations must not block.
pub trait OutputCallbacks: Send + Sync {
    /// A frame submitted for output has been displayed (or dropped).
    fn scheduled_frame_completed(&self, result: FrameCompletionResult);
    /// Scheduled playback has come to a stop.
    fn scheduled_playback_stopped(&self);
    /// The hardware wants more audio samples. `preroll` is true while the
    /// initial buffer fill is still in progress.
    fn render_audio_samples(&self, preroll: bool);
}

/// Trait for the playback half of a device.
pub trait VideoOutputPort: Send + Sync {
    /// Returns a fresh iterator over the display modes supported for output.
    ///
    /// The sequence is finite, and deterministic as long as the hardware
    /// state does not change.
    fn display_modes(&self) -> Box<dyn Iterator<Item = DisplayMode> + '_>;

    /// Whether the device can output `mode` in `pixel_format`.
    fn supports_display_mode(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
    ) -> Result<bool, HardwareError>;

    fn enable_video_output(&self, mode: DisplayModeId) -> Result<(), HardwareError>;
    fn disable_video_output(&self) -> Result<(), HardwareError>;

    fn enable_audio_output(
        &self,
        sample_rate: AudioSampleRate,
        sample_type: AudioSampleType,
        channels: u32,
        stream_type: AudioStreamType,
    ) -> Result<(), HardwareError>;
    /// Starts the preroll sequence. The hardware will invoke
    /// [`OutputCallbacks::render_audio_samples`] with the preroll flag set
    /// until its ring buffer is filled.
    fn begin_audio_preroll(&self) -> Result<(), HardwareError>;
    fn disable_audio_output(&self) -> Result<(), HardwareError>;

    /// Submits `frame` for immediate display and returns once the hardware
    /// has accepted it.
    fn display_frame_sync(&self, frame: &VideoFrame) -> Result<(), HardwareError>;

    /// Starts the scheduled playback clock at `start_time`, expressed in
    /// units of `timescale`, running at `speed`.
    fn start_scheduled_playback(
        &self,
        start_time: i64,
        timescale: i64,
        speed: f64,
    ) -> Result<(), HardwareError>;

    /// Registers `callbacks` as the single target of playback callbacks, or
    /// clears the registration when `None`. Registering replaces any
    /// previous target.
    fn set_output_callbacks(&self, callbacks: Option<Arc<dyn OutputCallbacks>>);
}

/// Callbacks invoked by the hardware while capture is active.
///
/// Invoked on the SDK's callback thread; implementations must not block.
pub trait InputCallbacks: Send + Sync {
    /// The characteristics of the input signal changed. Only delivered when
    /// the input was enabled with format detection.
    fn input_format_changed(&self, change: FormatChange);
    /// A captured frame is available.
    fn input_frame_arrived(&self, frame: InputFrame);
}

/// Trait for the capture half of a device.
pub trait VideoInputPort: Send + Sync {
    /// Returns a fresh iterator over the display modes supported for
    /// capture.
    fn display_modes(&self) -> Box<dyn Iterator<Item = DisplayMode> + '_>;

    /// Configures the input path for `mode`. With `detect_format` set the
    /// hardware reports signal changes through
    /// [`InputCallbacks::input_format_changed`].
    fn enable_video_input(
        &self,
        mode: DisplayModeId,
        pixel_format: PixelFormat,
        detect_format: bool,
    ) -> Result<(), HardwareError>;
    fn disable_video_input(&self) -> Result<(), HardwareError>;

    fn start_streams(&self) -> Result<(), HardwareError>;
    fn stop_streams(&self) -> Result<(), HardwareError>;
    fn pause_streams(&self) -> Result<(), HardwareError>;
    fn flush_streams(&self) -> Result<(), HardwareError>;

    /// Registers `callbacks` as the single target of capture callbacks, or
    /// clears the registration when `None`. Registering replaces any
    /// previous target.
    fn set_input_callbacks(&self, callbacks: Option<Arc<dyn InputCallbacks>>);
}

/// Trait for SDK discovery layers that push device arrivals and removals.
pub trait DeviceDiscovery {
    type Device: HardwareDevice;

    /// Starts delivering notifications to `registry`. Devices that are
    /// already connected are announced immediately.
    ///
    /// Instantiating the discovery machinery is SDK-specific and can fail in
    /// SDK-specific ways, hence the open error type.
    fn enable(&mut self, registry: Arc<DeviceRegistry<Self::Device>>) -> anyhow::Result<()>;

    /// Stops delivering notifications.
    fn disable(&mut self);
}

struct RegistryInner<D> {
    devices: Vec<(u32, DeviceHandle<D>)>,
    // TODO: recycle device ids if registries ever live long enough for 2^32
    // arrivals.
    id_counter: u32,
}

/// Tracks the devices currently connected and republishes arrivals and
/// removals.
///
/// A [`DeviceDiscovery`] implementation feeds this registry from the SDK's
/// notification thread; all methods take `&self` so the registry can be
/// shared between that thread and the application.
pub struct DeviceRegistry<D> {
    inner: Mutex<RegistryInner<D>>,
    arrived: ListenerSet<DeviceHandle<D>>,
    removed: ListenerSet<DeviceHandle<D>>,
}

impl<D> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                devices: Vec::new(),
                id_counter: 0,
            }),
            arrived: ListenerSet::new(),
            removed: ListenerSet::new(),
        }
    }
}

impl<D: HardwareDevice> DeviceRegistry<D> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Wraps a newly arrived `device`, stores its handle, and notifies the
    /// arrival listeners.
    pub fn device_arrived(&self, device: Arc<D>) -> DeviceHandle<D> {
        let handle = DeviceHandle::new(device);

        {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.id_counter;
            inner.id_counter += 1;
            inner.devices.push((id, handle.clone()));
        }

        self.arrived.dispatch(&handle);
        handle
    }

    /// Forgets the handle wrapping `device` and notifies the removal
    /// listeners. Returns the removed handle, or `None` if the device was
    /// never registered.
    ///
    /// Sessions created from the handle are owned by the application, which
    /// is expected to subscribe to removals and drop them.
    pub fn device_removed(&self, device: &Arc<D>) -> Option<DeviceHandle<D>> {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            let index = inner
                .devices
                .iter()
                .position(|(_, handle)| Arc::ptr_eq(handle.device(), device))?;
            inner.devices.remove(index).1
        };

        self.removed.dispatch(&handle);
        Some(handle)
    }

    /// Snapshot of the connected devices, in arrival order.
    pub fn handles(&self) -> Vec<DeviceHandle<D>> {
        self.inner
            .lock()
            .unwrap()
            .devices
            .iter()
            .map(|(_, handle)| handle.clone())
            .collect()
    }

    /// Listeners notified of device arrivals.
    pub fn arrived_listeners(&self) -> &ListenerSet<DeviceHandle<D>> {
        &self.arrived
    }

    /// Listeners notified of device removals.
    pub fn removed_listeners(&self) -> &ListenerSet<DeviceHandle<D>> {
        &self.removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::devices::SoftwareDevice;

    #[test]
    fn registry_arrival_and_removal() {
        let registry = DeviceRegistry::new();
        let arrivals = Arc::new(AtomicUsize::new(0));
        let removals = Arc::new(AtomicUsize::new(0));

        let arrivals2 = Arc::clone(&arrivals);
        registry.arrived_listeners().subscribe(move |_| {
            arrivals2.fetch_add(1, Ordering::SeqCst);
        });
        let removals2 = Arc::clone(&removals);
        registry.removed_listeners().subscribe(move |_| {
            removals2.fetch_add(1, Ordering::SeqCst);
        });

        let first = Arc::new(SoftwareDevice::new("first"));
        let second = Arc::new(SoftwareDevice::new("second"));

        registry.device_arrived(Arc::clone(&first));
        registry.device_arrived(Arc::clone(&second));
        assert_eq!(arrivals.load(Ordering::SeqCst), 2);
        assert_eq!(registry.handles().len(), 2);
        assert_eq!(registry.handles()[0].name().unwrap(), "first");
        assert_eq!(registry.handles()[1].name().unwrap(), "second");

        let removed = registry.device_removed(&first).unwrap();
        assert!(Arc::ptr_eq(removed.device(), &first));
        assert_eq!(removals.load(Ordering::SeqCst), 1);
        assert_eq!(registry.handles().len(), 1);

        // Removing it again is a no-op.
        assert!(registry.device_removed(&first).is_none());
        assert_eq!(removals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removal_matches_by_identity() {
        let registry = DeviceRegistry::new();
        let connected = Arc::new(SoftwareDevice::new("same name"));
        let stranger = Arc::new(SoftwareDevice::new("same name"));

        registry.device_arrived(Arc::clone(&connected));
        assert!(registry.device_removed(&stranger).is_none());
        assert_eq!(registry.handles().len(), 1);
    }
}
