//! Registration State Machine
//!
//! Defines the valid lifecycle transitions of a device registration:
//!
//! ```text
//! Unregistered -> Registered -> (Updated)* -> { Deregistered | Expired }
//! ```
//!
//! `Deregistered` and `Expired` are terminal.

use std::fmt;

/// Lifecycle state of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationState {
    Unregistered,
    Registered,
    Updated,
    Deregistered,
    Expired,
}

impl RegistrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationState::Deregistered | RegistrationState::Expired)
    }

    /// Registered or updated, i.e. visible in the directory
    pub fn is_live(&self) -> bool {
        matches!(self, RegistrationState::Registered | RegistrationState::Updated)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Registered => "registered",
            RegistrationState::Updated => "updated",
            RegistrationState::Deregistered => "deregistered",
            RegistrationState::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// Registration accepted by the server
    Register,
    /// Lease renewed by the client
    Update,
    /// Explicit deregistration
    Deregister,
    /// Lease ran out before an update arrived
    LeaseExpired,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(RegistrationState),
    /// Transition was invalid from current state
    Invalid {
        from: RegistrationState,
        event: RegistrationEvent,
    },
}

/// Per-registration lifecycle tracker
#[derive(Debug, Clone)]
pub struct RegistrationStateMachine {
    current_state: RegistrationState,
}

impl Default for RegistrationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistrationStateMachine {
    /// Create a new state machine in Unregistered state
    pub fn new() -> Self {
        Self {
            current_state: RegistrationState::Unregistered,
        }
    }

    pub fn state(&self) -> RegistrationState {
        self.current_state
    }

    /// Process an event and return the transition result; invalid events
    /// leave the state untouched
    pub fn process_event(&mut self, event: RegistrationEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: RegistrationEvent) -> Option<RegistrationState> {
        use RegistrationEvent::*;
        use RegistrationState::*;

        match (self.current_state, event) {
            (Unregistered, Register) => Some(Registered),

            (Registered | Updated, Update) => Some(Updated),
            (Registered | Updated, Deregister) => Some(Deregistered),
            (Registered | Updated, LeaseExpired) => Some(Expired),

            // Terminal states and out-of-order events
            _ => None,
        }
    }
}
