//!
//! Graphics subsystem: display drivers.

pub mod ddraw;

pub use ddraw::{DisplayContext, DisplayMode, InitError, InitState};
