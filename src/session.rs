use crate::base::{Error, ErrorKind, Result};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport is open.
    Uninitialized,
    /// Transport open, configuration commands accepted.
    Configuring,
    /// Measurements are being delivered; configuration is frozen.
    Streaming,
    /// The transport failed. Only `uninitialize` is accepted.
    Faulted,
}

/// Guards every facade operation against the current session state.
#[derive(Debug)]
pub(crate) struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Session {
        Session {
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// `Uninitialized -> Configuring`, once the transport is open.
    pub fn begin_configuring(&mut self) -> Result<()> {
        match self.state {
            SessionState::Uninitialized => {
                self.transition(SessionState::Configuring);
                Ok(())
            }
            _ => Err(Error::config(
                "device is already initialized, call uninitialize first",
            )),
        }
    }

    /// Admits a configuration command.
    pub fn ensure_configurable(&self) -> Result<()> {
        match self.state {
            SessionState::Configuring => Ok(()),
            SessionState::Streaming => Err(Error::config(
                "device is streaming, uninitialize and initialize again to reconfigure",
            )),
            SessionState::Uninitialized => Err(Error::config("device is not initialized")),
            SessionState::Faulted => Err(Error::io(
                "session faulted, uninitialize and initialize again",
            )),
        }
    }

    /// Admits a measurement request.
    pub fn ensure_acquirable(&self) -> Result<()> {
        match self.state {
            SessionState::Configuring | SessionState::Streaming => Ok(()),
            SessionState::Uninitialized => Err(Error::config("device is not initialized")),
            SessionState::Faulted => Err(Error::io(
                "session faulted, uninitialize and initialize again",
            )),
        }
    }

    /// `Configuring -> Streaming` on the first measurement request.
    pub fn begin_streaming(&mut self) {
        if self.state == SessionState::Configuring {
            self.transition(SessionState::Streaming);
        }
    }

    /// Passes `result` through, faulting the session on an I/O error.
    ///
    /// A call aborted while `cancel` is raised leaves the state alone.
    pub fn track<T>(&mut self, result: Result<T>, cancel: &AtomicBool) -> Result<T> {
        if let Err(e) = &result {
            if cancel.load(Ordering::SeqCst) {
                debug!("Call cancelled in state {:?}: {}", self.state, e);
            } else if e.kind() == ErrorKind::Io && self.state != SessionState::Uninitialized {
                warn!("Session faulted: {}", e);
                self.transition(SessionState::Faulted);
            }
        }
        result
    }

    /// `* -> Uninitialized`.
    pub fn close(&mut self) {
        self.transition(SessionState::Uninitialized);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
