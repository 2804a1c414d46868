// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Notification payloads and the listener list they are dispatched through.
//!
//! Sessions republish hardware callbacks to a [`ListenerSet`] per
//! notification kind. Dispatch happens synchronously on whatever thread the
//! hardware delivers its callback on: listeners must not block, and a
//! listener that updates UI state is responsible for marshaling itself onto
//! its own execution context. The session never performs that hop.

use std::sync::Arc;
use std::sync::Mutex;

use enumn::N;
use thiserror::Error;

use crate::modes::DisplayMode;
use crate::HardwareError;

/// Outcome reported by the hardware for a completed output frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, N)]
#[repr(u32)]
pub enum FrameCompletionResult {
    Completed = 0,
    DisplayedLate = 1,
    Dropped = 2,
    Flushed = 3,
}

/// Request for more audio samples from the hardware's ring buffer filler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSamplesRequest {
    /// True while the hardware is still prerolling, i.e. filling its buffer
    /// before the playback clock starts.
    pub preroll: bool,
}

/// Description of an input format change detected by the hardware.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatChange {
    /// The newly detected display mode.
    pub new_mode: DisplayMode,
    /// Whether the display mode itself changed.
    pub display_mode_changed: bool,
    /// Whether the field dominance changed.
    pub field_dominance_changed: bool,
    /// Whether the signal colorspace changed.
    pub colorspace_changed: bool,
    /// True if the detected signal is RGB 4:4:4 rather than YUV 4:2:2.
    pub rgb444: bool,
}

/// Capture-path failure reported through the notification channel rather
/// than a return value, because it originates on the hardware callback
/// thread.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    #[error("failed to re-enable video input after a format change: {0}")]
    ReenableVideoInputFailed(HardwareError),
    #[error("failed to restart streams after a format change: {0}")]
    RestartStreamsFailed(HardwareError),
}

/// Handle to a subscribed listener, used to unsubscribe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct ListenerSetInner<E> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<E>)>,
}

/// An ordered set of listeners for one notification kind.
///
/// Listeners are invoked in subscription order. Dispatching with zero
/// listeners is a no-op. The set snapshots its listeners before invoking
/// them, so a listener may subscribe or unsubscribe from within its own
/// invocation without deadlocking; such changes take effect on the next
/// dispatch.
pub struct ListenerSet<E> {
    inner: Mutex<ListenerSetInner<E>>,
}

impl<E> Default for ListenerSet<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(ListenerSetInner {
                next_id: 0,
                listeners: Vec::new(),
            }),
        }
    }
}

impl<E> ListenerSet<E> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Add `listener` to the set and return the id that removes it.
    pub fn subscribe<F: Fn(&E) + Send + Sync + 'static>(&self, listener: F) -> ListenerId {
        let mut inner = self.inner.lock().unwrap();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    /// Remove the listener registered under `id`. Returns false if it was
    /// already removed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let prev_len = inner.listeners.len();
        inner.listeners.retain(|(lid, _)| *lid != id);
        inner.listeners.len() != prev_len
    }

    /// Number of currently subscribed listeners.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke all listeners with `event`, in subscription order.
    pub(crate) fn dispatch(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .inner
            .lock()
            .unwrap()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }
}
