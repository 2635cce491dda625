//! ESP32-S3 platform pieces for the Stillframe firmware: retained state in
//! RTC memory, the shared connectivity status and the settable wall clock.

#![no_std]

pub mod clock;
pub mod network;
pub mod storage;
