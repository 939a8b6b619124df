//! # Fallback State Machine
//!
//! ```text
//! Uninitialized -> Loading(Cache | Remote) -> Ready <-> Degraded
//! ```
//!
//! Any remote failure, on reads or writes, moves the engine to `Degraded`.
//! A successful refresh moves it back to `Ready`.

use std::fmt;
use std::sync::RwLock;

use serde::Serialize;

use crate::observability::{log_event, Event};

/// Where the boot load is coming from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Cache,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "source")]
pub enum EngineState {
    Uninitialized,
    Loading(LoadSource),
    Ready,
    /// Remote unreachable; stale data is served under degraded trust
    Degraded,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Loading(LoadSource::Cache) => "loading_from_cache",
            EngineState::Loading(LoadSource::Remote) => "loading_from_remote",
            EngineState::Ready => "ready",
            EngineState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared engine state with transition logging
#[derive(Debug)]
pub struct EngineStateCell {
    state: RwLock<EngineState>,
}

impl Default for EngineStateCell {
    fn default() -> Self {
        Self {
            state: RwLock::new(EngineState::Uninitialized),
        }
    }
}

impl EngineStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> EngineState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(EngineState::Degraded)
    }

    pub fn is_degraded(&self) -> bool {
        self.get() == EngineState::Degraded
    }

    /// Move to `next`; returns the previous state
    pub fn transition(&self, next: EngineState, reason: &str) -> EngineState {
        let previous = match self.state.write() {
            Ok(mut state) => std::mem::replace(&mut *state, next),
            Err(_) => return EngineState::Degraded,
        };
        if previous != next {
            log_event(
                Event::StateTransition,
                &[
                    ("from", previous.as_str()),
                    ("to", next.as_str()),
                    ("reason", reason),
                ],
            );
        }
        previous
    }

    /// Enter `Degraded` from any state
    pub fn degrade(&self, reason: &str) -> EngineState {
        self.transition(EngineState::Degraded, reason)
    }

    /// Enter `Ready` from any state
    pub fn recover(&self, reason: &str) -> EngineState {
        self.transition(EngineState::Ready, reason)
    }
}
