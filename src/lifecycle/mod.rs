//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (Server::start):
//!     created → preparing → bind listener → ready → startup hooks (background)
//!     → accept loop until the shutdown latch is set
//!
//! Stop (Server::stop):
//!     → stopped → release signal listener → set shutdown latch
//!     → drain connections (bounded) → shutdown hooks → close database → done
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Server::stop, once
//! ```
//!
//! # Design Decisions
//! - State changes are compare-and-swap on a single atomic
//! - Every cross-task handoff is a set-once [`Latch`], so late waiters never
//!   miss a signal
//! - Drain has a fixed timeout; shutdown hooks run even when it expires

pub mod latch;
pub mod signals;
pub mod state;

pub use latch::Latch;
pub use state::{State, StateCell};
