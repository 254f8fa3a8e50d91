//! Client windows.

use crate::object::{ReadySignal, TransactionObject};
use crate::types::ObjectKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width and height in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl Size {
    /// Creates a size.
    #[must_use]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Position and size of a window frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Geometry {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

impl Geometry {
    /// Creates a geometry.
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The size part.
    #[must_use]
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Edges that stay fixed when the client picks a different size than
/// requested.
///
/// Without gravity the top-left corner stays put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Gravity {
    /// Keep the right edge in place.
    pub right: bool,
    /// Keep the bottom edge in place.
    pub bottom: bool,
}

/// Server-side decoration size around the client content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Margins {
    /// Left border.
    pub left: i32,
    /// Right border.
    pub right: i32,
    /// Title bar.
    pub top: i32,
    /// Bottom border.
    pub bottom: i32,
}

impl Margins {
    fn horizontal(&self) -> i32 {
        self.left + self.right
    }

    fn vertical(&self) -> i32 {
        self.top + self.bottom
    }
}

/// Window state that goes through transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToplevelState {
    /// Frame geometry, decorations included.
    pub geometry: Geometry,
    /// Anchor used when the client answers with another size.
    pub gravity: Gravity,
}

impl ToplevelState {
    /// Adopts the size the client actually chose.
    fn adjust_for_gravity(&mut self, actual: Size) {
        if self.gravity.right {
            self.geometry.x += self.geometry.width - actual.width;
        }
        if self.gravity.bottom {
            self.geometry.y += self.geometry.height - actual.height;
        }
        self.geometry.width = actual.width;
        self.geometry.height = actual.height;
    }
}

/// A size request waiting to be sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Configure {
    /// Serial the client acknowledges.
    pub serial: u32,
    /// Requested content size, decorations excluded.
    pub size: Size,
}

/// A client window.
///
/// Layout code edits [`pending_mut`](Self::pending_mut) and submits a
/// transaction with the window. On commit the window asks its client for
/// the new size through a [`Configure`]; the host delivers the configures
/// from [`take_configures`](Self::take_configures) and reports answers with
/// [`ack_configure`](Self::ack_configure).
pub struct Toplevel {
    key: ObjectKey,
    current: ToplevelState,
    pending: ToplevelState,
    committed: ToplevelState,
    margins: Margins,
    mapped: bool,
    last_serial: u32,
    target_serial: u32,
    outbox: Vec<Configure>,
    waiting: Option<ReadySignal>,
}

impl Toplevel {
    /// Creates a mapped window showing `geometry`.
    pub fn new(key: impl Into<ObjectKey>, geometry: Geometry) -> Self {
        let state = ToplevelState {
            geometry,
            gravity: Gravity::default(),
        };
        Self {
            key: key.into(),
            current: state,
            pending: state,
            committed: state,
            margins: Margins::default(),
            mapped: true,
            last_serial: 0,
            target_serial: 0,
            outbox: Vec::new(),
            waiting: None,
        }
    }

    /// State visible on screen.
    #[must_use]
    pub fn current(&self) -> &ToplevelState {
        &self.current
    }

    /// State layout code is building.
    #[must_use]
    pub fn pending(&self) -> &ToplevelState {
        &self.pending
    }

    /// Mutable access to the pending state.
    pub fn pending_mut(&mut self) -> &mut ToplevelState {
        &mut self.pending
    }

    /// State sent to the client by the last commit.
    #[must_use]
    pub fn committed(&self) -> &ToplevelState {
        &self.committed
    }

    /// Decoration margins.
    #[must_use]
    pub fn margins(&self) -> Margins {
        self.margins
    }

    /// Sets the decoration margins used for the next configure.
    pub fn set_margins(&mut self, margins: Margins) {
        self.margins = margins;
    }

    /// Whether the client surface still exists.
    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// True while a commit waits for the client.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.is_some()
    }

    /// Drains configures that have not been delivered yet.
    pub fn take_configures(&mut self) -> Vec<Configure> {
        std::mem::take(&mut self.outbox)
    }

    /// Handles the client acknowledging `serial` with a buffer of `size`
    /// (decorations excluded).
    ///
    /// Acks for configures older than the last committed one are ignored.
    /// Returns true if the ack completed the outstanding commit.
    pub fn ack_configure(&mut self, serial: u32, size: Size) -> bool {
        if self.waiting.is_none() {
            return false;
        }
        if serial < self.target_serial {
            tracing::trace!(object = %self.key, serial, target = self.target_serial, "ignoring old ack");
            return false;
        }

        let actual = Size::new(
            size.width + self.margins.horizontal(),
            size.height + self.margins.vertical(),
        );
        self.committed.adjust_for_gravity(actual);
        self.emit_ready();
        true
    }

    /// Tears down the client surface.
    ///
    /// A commit that was waiting for the client is reported ready; the
    /// window keeps its current size from now on.
    pub fn unmap(&mut self) {
        self.mapped = false;
        self.outbox.clear();
        self.emit_ready();
    }

    fn emit_ready(&mut self) {
        if let Some(signal) = self.waiting.take() {
            signal.ready();
        }
    }
}

impl TransactionObject for Toplevel {
    fn object_key(&self) -> ObjectKey {
        self.key.clone()
    }

    fn commit(&mut self, signal: ReadySignal) {
        self.committed = self.pending;
        tracing::debug!(object = %self.key, geometry = %self.pending.geometry, "committing toplevel state");

        // A newer commit supersedes whatever the previous one waited for.
        self.waiting = Some(signal);

        if self.pending.geometry.size() == self.current.geometry.size() || !self.mapped {
            self.emit_ready();
            return;
        }

        let size = Size::new(
            (self.pending.geometry.width - self.margins.horizontal()).max(1),
            (self.pending.geometry.height - self.margins.vertical()).max(1),
        );
        self.last_serial += 1;
        self.target_serial = self.last_serial;
        self.outbox.push(Configure {
            serial: self.last_serial,
            size,
        });
    }

    fn apply(&mut self) {
        if !self.mapped {
            self.committed.geometry.width = self.current.geometry.width;
            self.committed.geometry.height = self.current.geometry.height;
        }
        self.current = self.committed;
    }
}

impl fmt::Debug for Toplevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toplevel")
            .field("key", &self.key)
            .field("current", &self.current.geometry)
            .field("pending", &self.pending.geometry)
            .field("mapped", &self.mapped)
            .field("waiting", &self.is_waiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{Config, SharedConfig};
    use crate::object::ObjectRef;
    use crate::transaction::{TransactionManager, TransactionState};
    use crate::types::TransactionId;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn manager() -> (TransactionManager, ManualClock) {
        let clock = ManualClock::new();
        let config = SharedConfig::new(Config::new().transaction_timeout(Duration::from_millis(100)))
            .unwrap();
        (TransactionManager::with_clock(config, clock.clone()), clock)
    }

    fn window(geometry: Geometry) -> Arc<Mutex<Toplevel>> {
        Arc::new(Mutex::new(Toplevel::new("view-1", geometry)))
    }

    fn submit(manager: &mut TransactionManager, view: &Arc<Mutex<Toplevel>>) -> TransactionId {
        let object: ObjectRef = view.clone();
        let mut txn = manager.begin();
        txn.add_object(&object).unwrap();
        manager.submit(txn).unwrap()
    }

    #[test]
    fn move_without_resize_skips_the_client() {
        let (mut manager, _clock) = manager();
        let view = window(Geometry::new(0, 0, 800, 600));
        view.lock().pending_mut().geometry = Geometry::new(50, 50, 800, 600);

        let id = submit(&mut manager, &view);

        assert_eq!(manager.state_of(id), None);
        let view = view.lock();
        assert_eq!(view.current().geometry, Geometry::new(50, 50, 800, 600));
        assert!(view.outbox.is_empty());
    }

    #[test]
    fn resize_waits_for_ack() {
        let (mut manager, _clock) = manager();
        let view = window(Geometry::new(0, 0, 800, 600));
        view.lock().set_margins(Margins {
            left: 2,
            right: 2,
            top: 30,
            bottom: 2,
        });
        view.lock().pending_mut().geometry = Geometry::new(0, 0, 1004, 632);

        let id = submit(&mut manager, &view);
        assert_eq!(manager.state_of(id), Some(TransactionState::Committed));

        let configures = view.lock().take_configures();
        assert_eq!(configures.len(), 1);
        assert_eq!(configures[0].size, Size::new(1000, 600));

        assert!(view.lock().ack_configure(configures[0].serial, Size::new(1000, 600)));
        manager.dispatch();

        assert_eq!(manager.state_of(id), None);
        assert_eq!(view.lock().current().geometry, Geometry::new(0, 0, 1004, 632));
    }

    #[test]
    fn stale_ack_is_ignored() {
        let (mut manager, clock) = manager();
        let view = window(Geometry::new(0, 0, 100, 100));
        view.lock().pending_mut().geometry.width = 200;
        submit(&mut manager, &view);
        clock.advance(Duration::from_millis(100));
        manager.dispatch();

        view.lock().pending_mut().geometry.width = 300;
        let second = submit(&mut manager, &view);
        let configures = view.lock().take_configures();
        assert_eq!(configures.len(), 2);

        assert!(!view.lock().ack_configure(configures[0].serial, Size::new(200, 100)));
        assert!(view.lock().ack_configure(configures[1].serial, Size::new(300, 100)));
        manager.dispatch();
        assert_eq!(manager.state_of(second), None);
    }

    #[test]
    fn gravity_keeps_bottom_right_corner() {
        let (mut manager, _clock) = manager();
        let view = window(Geometry::new(100, 100, 400, 300));
        {
            let mut view = view.lock();
            let pending = view.pending_mut();
            pending.geometry = Geometry::new(0, 0, 500, 400);
            pending.gravity = Gravity {
                right: true,
                bottom: true,
            };
        }
        submit(&mut manager, &view);

        // The client only grows to 450x350.
        let serial = view.lock().take_configures()[0].serial;
        view.lock().ack_configure(serial, Size::new(450, 350));
        manager.dispatch();

        assert_eq!(view.lock().current().geometry, Geometry::new(50, 50, 450, 350));
    }

    #[test]
    fn unresponsive_client_is_applied_at_timeout() {
        let (mut manager, clock) = manager();
        let view = window(Geometry::new(0, 0, 100, 100));
        view.lock().pending_mut().geometry.width = 200;
        submit(&mut manager, &view);

        clock.advance(Duration::from_millis(100));
        manager.dispatch();
        assert_eq!(view.lock().current().geometry.width, 200);
    }

    #[test]
    fn unmap_releases_waiting_commit_and_keeps_size() {
        let (mut manager, _clock) = manager();
        let view = window(Geometry::new(0, 0, 100, 100));
        view.lock().pending_mut().geometry = Geometry::new(10, 10, 200, 200);
        let id = submit(&mut manager, &view);

        view.lock().unmap();
        manager.dispatch();

        assert_eq!(manager.state_of(id), None);
        let view = view.lock();
        assert!(!view.is_mapped());
        assert_eq!(view.current().geometry, Geometry::new(10, 10, 100, 100));
    }

    #[test]
    fn configure_size_is_at_least_one_pixel() {
        let (mut manager, _clock) = manager();
        let view = window(Geometry::new(0, 0, 100, 100));
        view.lock().set_margins(Margins {
            left: 5,
            right: 5,
            top: 5,
            bottom: 5,
        });
        view.lock().pending_mut().geometry = Geometry::new(0, 0, 4, 4);
        submit(&mut manager, &view);

        let configures = view.lock().take_configures();
        assert_eq!(configures[0].size, Size::new(1, 1));
    }
}
