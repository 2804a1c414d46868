// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Device implementations that do not require hardware.
//!
//! [software::SoftwareDevice] implements every hardware trait of this crate
//! in pure software. It can be used as a reference for how to adapt a real
//! SDK, to exercise application code without a capture card, and it is what
//! this crate's own tests drive sessions against.

#[cfg(any(test, feature = "software-device"))]
pub mod software;
#[cfg(any(test, feature = "software-device"))]
pub use software::SoftwareDevice;
#[cfg(any(test, feature = "software-device"))]
pub use software::StreamOp;
