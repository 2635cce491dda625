//! Platform-agnostic core of the Stillframe photo-frame firmware.
//!
//! Everything that touches the storage medium goes through the single-worker
//! job engine in [`jobs`]; the hardware-facing crates only provide the trait
//! implementations wired into [`env::JobEnv`].

#![no_std]

extern crate alloc;

pub mod blob;
pub mod clock;
pub mod env;
pub mod jobs;
pub mod name;
pub mod sched;
pub mod select;
pub mod state;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testenv;
