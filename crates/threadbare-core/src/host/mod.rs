//! Minimal host contract the rest of the layer is built on.
//!
//! Everything above this module assumes exactly three host facilities: native
//! schedulable execution units, one binary per-unit wait channel that another
//! unit can signal, and a mutual-exclusion primitive (covered by
//! `parking_lot` at the mutex seam). Each supported platform implements the
//! same surface in its own backend module.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub(crate) use linux::{
    NativeHandle, WaitChannel, cancel_unit, cpu_count, current_unit, spawn_unit,
};
