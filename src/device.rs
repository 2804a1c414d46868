// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Read-only wrapper around a raw hardware device reference.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::HardwareDevice;
use crate::HardwareError;

/// Bit of the video I/O support attribute signaling capture support.
pub const IO_SUPPORT_CAPTURE: i64 = 1 << 0;
/// Bit of the video I/O support attribute signaling playback support.
pub const IO_SUPPORT_PLAYBACK: i64 = 1 << 1;

/// Well-known device attributes queriable through [`HardwareDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeId {
    /// Integer attribute: bitmask of `IO_SUPPORT_*` values.
    VideoIoSupport,
    /// Flag attribute: whether the device can detect its input format.
    SupportsInputFormatDetection,
}

/// A capability a device may or may not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Capture,
    Playback,
    FormatDetection,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Capability::Capture => write!(f, "capture"),
            Capability::Playback => write!(f, "playback"),
            Capability::FormatDetection => write!(f, "input format detection"),
        }
    }
}

/// A name or attribute query failed on the hardware side.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("device attribute query failed: {0}")]
pub struct QueryError(#[source] pub HardwareError);

/// Identity and capability wrapper around a raw device reference.
///
/// The handle does not own the device: the discovery side keeps its own
/// reference for as long as the hardware is connected. Every accessor
/// re-queries the hardware, so results reflect its live state; callers that
/// need a stable snapshot must keep their own copy of the result.
pub struct DeviceHandle<D> {
    device: Arc<D>,
}

// Not derived so that `D` itself does not need to be `Clone`.
impl<D> Clone for DeviceHandle<D> {
    fn clone(&self) -> Self {
        Self {
            device: Arc::clone(&self.device),
        }
    }
}

impl<D: HardwareDevice> DeviceHandle<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self { device }
    }

    /// Raw device reference this handle wraps.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Human-readable name of the device.
    pub fn name(&self) -> Result<String, QueryError> {
        self.device.display_name().map_err(QueryError)
    }

    /// Whether the device currently reports `capability`.
    pub fn has_capability(&self, capability: Capability) -> Result<bool, QueryError> {
        match capability {
            Capability::Capture => self.io_support().map(|s| s & IO_SUPPORT_CAPTURE != 0),
            Capability::Playback => self.io_support().map(|s| s & IO_SUPPORT_PLAYBACK != 0),
            Capability::FormatDetection => self
                .device
                .flag_attribute(AttributeId::SupportsInputFormatDetection)
                .map_err(QueryError),
        }
    }

    fn io_support(&self) -> Result<i64, QueryError> {
        self.device
            .int_attribute(AttributeId::VideoIoSupport)
            .map_err(QueryError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::SoftwareDevice;

    #[test]
    fn name_query() {
        let device = Arc::new(SoftwareDevice::new("SDI Playout 4K"));
        let handle = DeviceHandle::new(device);
        assert_eq!(handle.name().unwrap(), "SDI Playout 4K");
    }

    #[test]
    fn capabilities_track_live_attribute_state() {
        let device = Arc::new(SoftwareDevice::new("test"));
        let handle = DeviceHandle::new(Arc::clone(&device));

        device.set_io_support(IO_SUPPORT_CAPTURE | IO_SUPPORT_PLAYBACK);
        assert!(handle.has_capability(Capability::Capture).unwrap());
        assert!(handle.has_capability(Capability::Playback).unwrap());

        // The same handle must observe an attribute change on the next call.
        device.set_io_support(IO_SUPPORT_CAPTURE);
        assert!(handle.has_capability(Capability::Capture).unwrap());
        assert!(!handle.has_capability(Capability::Playback).unwrap());

        device.set_format_detection(false);
        assert!(!handle.has_capability(Capability::FormatDetection).unwrap());
        device.set_format_detection(true);
        assert!(handle.has_capability(Capability::FormatDetection).unwrap());
    }

    #[test]
    fn clones_share_the_device() {
        let device = Arc::new(SoftwareDevice::new("test"));
        let handle = DeviceHandle::new(Arc::clone(&device));
        let clone = handle.clone();
        assert!(Arc::ptr_eq(handle.device(), clone.device()));
    }
}
