//! Server lifecycle state machine.
//!
//! ```text
//! Created ──start──▶ Preparing ──bound──▶ Ready ──stop──▶ Stopped
//!    │                   │                                   ▲
//!    │                   └──────────stop / bind failure──────┤
//!    └── stop: no-op                                         │
//! ```
//!
//! Transitions are compare-and-swap so concurrent `start`/`stop` callers
//! agree on a single winner.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Coarse server status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum State {
    Created = 0,
    Preparing = 1,
    Ready = 2,
    Stopped = 3,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => State::Created,
            1 => State::Preparing,
            2 => State::Ready,
            _ => State::Stopped,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Created => "created",
            State::Preparing => "preparing",
            State::Ready => "ready",
            State::Stopped => "stopped",
        })
    }
}

/// Atomically updated [`State`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(State::Created as u8))
    }

    pub fn get(&self) -> State {
        State::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`. On failure returns the current state.
    pub fn transition(&self, from: State, to: State) -> Result<(), State> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(State::from_u8)
    }

    /// Unconditionally store `state`, returning the previous one.
    pub fn swap(&self, state: State) -> State {
        State::from_u8(self.0.swap(state as u8, Ordering::SeqCst))
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
