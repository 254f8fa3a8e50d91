//! Reference participants.
//!
//! [`Toplevel`] models a client window that has to acknowledge a configure
//! before its new size is real. [`Output`] models a monitor whose changes
//! are ready as soon as they are committed.

mod output;
mod toplevel;

pub use output::{Output, OutputState};
pub use toplevel::{Configure, Geometry, Gravity, Margins, Size, Toplevel, ToplevelState};
