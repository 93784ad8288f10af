//! Userspace driver for the embedded controller of QC71-based laptops
//! (Tongfang GK5CN6Z, Slimbook PROX, Avell A60, XMG Fusion 15 and friends).
//!
//! Everything goes through one firmware method: the EC transaction channel
//! in [`crate::core::ec`]. The fan mode logic in [`crate::core::fan`] and the
//! attribute-shaped [`adapters`] are layered on top of it, and [`Platform`]
//! ties them together for the daemon.

pub mod adapters;
pub mod client;
pub mod config;
pub mod core;
pub mod daemon;
pub mod platform;
pub mod protocol;

pub use crate::platform::Platform;
