//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates (`core-service`, `core-playback`). Host applications can
//! depend on `offline-core-workspace` and enable `desktop-shims` or
//! `proxy-server` without wiring each crate individually.

#[cfg(any(feature = "desktop-shims", feature = "proxy-server"))]
pub use core_service;

#[cfg(feature = "proxy-server")]
pub use core_playback;
