//! Adapter lifecycle state machine:
//! `Idle -> Init -> Ready -> Running -> Stopped -> (Running | destroyed)`.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Init,
    Ready,
    Running,
    Stopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot {action} from adapter state {from:?}")]
pub struct InvalidTransition {
    pub from: AdapterState,
    pub action: &'static str,
}

/// Errors an adapter lifecycle call can surface: either the state
/// machine itself refused the call, or the plugin's own lifecycle
/// method failed partway through.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("plugin {1} failed: {0}")]
    Plugin(#[source] crate::drivers::traits::PluginError, &'static str),
}

impl AdapterState {
    /// `init`: allocates cache/event loop/callbacks; valid from `Idle`.
    pub fn can_init(self) -> bool {
        matches!(self, AdapterState::Idle)
    }

    /// `start`: valid from `Ready` or `Stopped`.
    pub fn can_start(self) -> bool {
        matches!(self, AdapterState::Ready | AdapterState::Stopped)
    }

    /// `stop`: valid only while `Running`.
    pub fn can_stop(self) -> bool {
        matches!(self, AdapterState::Running)
    }

    /// `uninit`: valid from any state but `Idle` (nothing to tear down).
    pub fn can_uninit(self) -> bool {
        !matches!(self, AdapterState::Idle)
    }
}
