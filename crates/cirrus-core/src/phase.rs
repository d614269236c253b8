//! Session lifecycle
//!
//! `Created → Accessed → Terminated`. Domain exchanges happen while
//! `Accessed`; `Terminated` is absorbing, so a terminated session can never be
//! accessed again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Phase of a connector/driver session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Session exists, no `ACCESS` yet
    #[default]
    Created,
    /// `ACCESS` sent (connector) or accepted (driver)
    Accessed,
    /// `ABORTED` sent/accepted or transport closed
    Terminated,
}

impl SessionPhase {
    /// Move to `Accessed`; only valid from `Created`
    pub fn access(&mut self) -> bool {
        if *self == SessionPhase::Created {
            *self = SessionPhase::Accessed;
            true
        } else {
            false
        }
    }

    /// Undo a failed access attempt; only valid from `Accessed`
    pub fn revert_access(&mut self) -> bool {
        if *self == SessionPhase::Accessed {
            *self = SessionPhase::Created;
            true
        } else {
            false
        }
    }

    /// Move to `Terminated`; returns the previous phase
    pub fn terminate(&mut self) -> SessionPhase {
        std::mem::replace(self, SessionPhase::Terminated)
    }

    /// Whether domain requests are accepted
    pub fn is_accessed(self) -> bool {
        self == SessionPhase::Accessed
    }

    /// Whether the session is terminated
    pub fn is_terminated(self) -> bool {
        self == SessionPhase::Terminated
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Created => "created",
            SessionPhase::Accessed => "accessed",
            SessionPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_is_absorbing() {
        let mut phase = SessionPhase::default();
        assert!(phase.access());
        assert!(!phase.access());
        assert_eq!(phase.terminate(), SessionPhase::Accessed);
        assert!(!phase.access());
        assert!(!phase.revert_access());
        assert!(phase.is_terminated());
    }

    #[test]
    fn failed_access_can_be_retried() {
        let mut phase = SessionPhase::Created;
        assert!(phase.access());
        assert!(phase.revert_access());
        assert_eq!(phase, SessionPhase::Created);
        assert!(phase.access());
    }
}
