//! Monitors.

use crate::object::{ReadySignal, TransactionObject};
use crate::objects::Size;
use crate::types::ObjectKey;
use serde::{Deserialize, Serialize};

/// Output configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    /// Mode resolution.
    pub mode: Size,
    /// Refresh rate in mHz.
    pub refresh_mhz: u32,
    /// Position in the layout.
    pub position: (i32, i32),
    /// Scale factor.
    pub scale: f64,
    /// Whether the output is enabled.
    pub enabled: bool,
}

impl Default for OutputState {
    fn default() -> Self {
        Self {
            mode: Size::new(1920, 1080),
            refresh_mhz: 60_000,
            position: (0, 0),
            scale: 1.0,
            enabled: true,
        }
    }
}

/// A monitor.
///
/// The compositor programs outputs itself, so a commit never waits.
#[derive(Debug)]
pub struct Output {
    key: ObjectKey,
    current: OutputState,
    pending: OutputState,
    committed: OutputState,
}

impl Output {
    /// Creates an output named `name` (e.g. `DP-1`).
    pub fn new(name: impl Into<ObjectKey>, state: OutputState) -> Self {
        Self {
            key: name.into(),
            current: state,
            pending: state,
            committed: state,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub fn current(&self) -> &OutputState {
        &self.current
    }

    /// Mutable access to the pending configuration.
    pub fn pending_mut(&mut self) -> &mut OutputState {
        &mut self.pending
    }
}

impl TransactionObject for Output {
    fn object_key(&self) -> ObjectKey {
        self.key.clone()
    }

    fn commit(&mut self, signal: ReadySignal) {
        self.committed = self.pending;
        signal.ready();
    }

    fn apply(&mut self) {
        self.current = self.committed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SharedConfig;
    use crate::object::ObjectRef;
    use crate::objects::{Geometry, Toplevel};
    use crate::transaction::TransactionManager;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn output_change_applies_on_submit() {
        let mut manager = TransactionManager::new(SharedConfig::default());
        let output = Arc::new(Mutex::new(Output::new("DP-1", OutputState::default())));
        output.lock().pending_mut().scale = 2.0;

        let object: ObjectRef = output.clone();
        let mut txn = manager.begin();
        txn.add_object(&object).unwrap();
        manager.submit(txn).unwrap();

        assert_eq!(output.lock().current().scale, 2.0);
        assert!(manager.is_idle());
    }

    #[test]
    fn output_waits_for_windows_in_the_same_transaction() {
        let mut manager = TransactionManager::new(SharedConfig::default());
        let output = Arc::new(Mutex::new(Output::new("DP-1", OutputState::default())));
        let view = Arc::new(Mutex::new(Toplevel::new(
            "view-1",
            Geometry::new(0, 0, 1920, 1080),
        )));
        output.lock().pending_mut().mode = Size::new(2560, 1440);
        view.lock().pending_mut().geometry = Geometry::new(0, 0, 2560, 1440);

        let mut txn = manager.begin();
        let o: ObjectRef = output.clone();
        let v: ObjectRef = view.clone();
        txn.add_object(&o).unwrap();
        txn.add_object(&v).unwrap();
        manager.submit(txn).unwrap();

        // The output is ready, but the mode switch lands with the window.
        assert_eq!(output.lock().current().mode, Size::new(1920, 1080));

        let serial = view.lock().take_configures()[0].serial;
        view.lock().ack_configure(serial, Size::new(2560, 1440));
        manager.dispatch();
        assert_eq!(output.lock().current().mode, Size::new(2560, 1440));
    }
}
