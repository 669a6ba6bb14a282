//! Garbage collection
//!
//! A non-moving, stop-the-world tri-color mark-sweep collector. Roots are
//! supplied by pre-mark hooks; objects about to be reclaimed are announced
//! to finalize hooks.

mod collector;
mod hooks;
mod roots;
mod stats;

pub use collector::{FinalizeHook, Gc, Marker, PreMarkHook};
pub use hooks::HookHandle;
pub use roots::{RootSet, Rooted};
pub use stats::{GcRunStats, GcStats};
