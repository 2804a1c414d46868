// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Video and audio format descriptions exchanged with the hardware.
//!
//! The raw values of the enums in this module are the vendor SDK's own codes
//! (fourccs for display modes and pixel formats, literal rates and depths for
//! audio), so implementations of the hardware traits can convert to and from
//! the values their bindings hand them using [`enumn::N`].

use std::time::Duration;

use enumn::N;

/// Identifier of a video display mode, as used by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum DisplayModeId {
    Ntsc = 0x6e747363,        // 'ntsc'
    Pal = 0x70616c20,         // 'pal '
    Hd720p60 = 0x68703630,    // 'hp60'
    Hd1080i50 = 0x48693530,   // 'Hi50'
    Hd1080p24 = 0x32347073,   // '24ps'
    Hd1080p25 = 0x48703235,   // 'Hp25'
    Hd1080p30 = 0x48703330,   // 'Hp30'
    Hd1080p5994 = 0x48703539, // 'Hp59'
    Hd1080p6000 = 0x48703630, // 'Hp60'
    Uhd2160p30 = 0x346b3330,  // '4k30'
}

/// Pixel format of a video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum PixelFormat {
    Yuv8 = 0x32767579,  // '2vuy'
    Yuv10 = 0x76323130, // 'v210'
    Argb8 = 0x20,
    Bgra8 = 0x42475241, // 'BGRA'
    Rgb10 = 0x72323130, // 'r210'
}

/// Description of a display mode supported by a device.
///
/// `frame_duration` and `frame_timescale` express the frame rate as the
/// rational `frame_timescale / frame_duration` frames per second, which is
/// how the hardware reports fractional rates such as 59.94.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    pub id: DisplayModeId,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub frame_duration: i64,
    pub frame_timescale: i64,
}

impl DisplayMode {
    /// Frames per second of this mode.
    pub fn frame_rate(&self) -> f64 {
        self.frame_timescale as f64 / self.frame_duration as f64
    }

    /// Duration of a single frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_duration as f64 / self.frame_timescale as f64)
    }
}

/// Audio sample rate of an output stream. The hardware only runs its audio
/// clock at 48kHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum AudioSampleRate {
    Rate48kHz = 48000,
}

/// Bit depth of audio samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum AudioSampleType {
    Int16 = 16,
    Int32 = 32,
}

/// Scheduling discipline of an audio output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum AudioStreamType {
    /// Samples are played back continuously as they are provided.
    Continuous = 0,
    /// Samples carry their own timestamps.
    TimeStamped = 2,
}

/// A video frame to be displayed, or received from a capture stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub row_bytes: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Returns a zero-filled frame of `width`x`height` in `pixel_format`,
    /// with rows packed at 4 bytes per pixel for RGB formats and 2 for YUV.
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let bytes_per_pixel = match pixel_format {
            PixelFormat::Yuv8 | PixelFormat::Yuv10 => 2,
            PixelFormat::Argb8 | PixelFormat::Bgra8 | PixelFormat::Rgb10 => 4,
        };
        let row_bytes = width * bytes_per_pixel;
        Self {
            width,
            height,
            row_bytes,
            pixel_format,
            data: vec![0; (row_bytes * height) as usize],
        }
    }
}

/// A frame delivered by a capture stream.
///
/// `has_signal` is false when the hardware produced the frame without a valid
/// input signal; the frame data is then undefined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFrame {
    pub video: VideoFrame,
    pub has_signal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mode_id_roundtrip() {
        assert_eq!(DisplayModeId::n(0x48703539), Some(DisplayModeId::Hd1080p5994));
        assert_eq!(DisplayModeId::Hd1080p5994 as u32, 0x48703539);
        assert_eq!(DisplayModeId::n(0xdeadbeef), None);
        assert_eq!(PixelFormat::n(0x32767579), Some(PixelFormat::Yuv8));
    }

    #[test]
    fn fractional_frame_rate() {
        let mode = DisplayMode {
            id: DisplayModeId::Hd1080p5994,
            name: "1080p59.94".into(),
            width: 1920,
            height: 1080,
            frame_duration: 1001,
            frame_timescale: 60000,
        };
        assert!((mode.frame_rate() - 59.94).abs() < 0.01);
        assert_eq!(mode.frame_duration(), Duration::from_secs_f64(1001.0 / 60000.0));
    }

    #[test]
    fn frame_geometry() {
        let frame = VideoFrame::new(1920, 1080, PixelFormat::Yuv8);
        assert_eq!(frame.row_bytes, 1920 * 2);
        assert_eq!(frame.data.len(), 1920 * 2 * 1080);

        let frame = VideoFrame::new(720, 576, PixelFormat::Bgra8);
        assert_eq!(frame.row_bytes, 720 * 4);
        assert_eq!(frame.data.len(), 720 * 4 * 576);
    }
}
