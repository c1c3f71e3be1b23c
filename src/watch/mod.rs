// src/watch/mod.rs

//! Source inputs and watch mode.
//!
//! This module is responsible for:
//! - Compiling `include` / `exclude` glob patterns per action.
//! - Hashing the files each action includes, reusing hashes of files that
//!   did not change.
//! - Wiring up a cross-platform filesystem watcher (`notify`).
//! - Turning changes into invalidated actions and live syncs, and re-running
//!   the affected requests ([`DevSession`]).

pub mod cache;
pub mod controller;
pub mod path_utils;
pub mod patterns;
pub mod session;
pub mod sources;
pub mod watcher;

pub use controller::{Invalidation, SyncTarget, WatchController};
pub use patterns::{STATE_DIR, SourceDefaults, SourceProfile};
pub use session::DevSession;
pub use sources::SourceResolver;
pub use watcher::{WatchEvent, WatcherHandle, spawn_watcher};
