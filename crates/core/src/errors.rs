use thiserror::Error;

use crate::domain::agent::{ActionStatus, AlertStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid alert transition from {from:?} to {to:?}")]
    InvalidAlertTransition { from: AlertStatus, to: AlertStatus },
    #[error("invalid action transition from {from:?} to {to:?}")]
    InvalidActionTransition { from: ActionStatus, to: ActionStatus },
}

#[cfg(test)]
mod tests {
    use crate::domain::agent::{ActionStatus, AlertStatus};
    use crate::errors::DomainError;

    #[test]
    fn transition_errors_keep_both_states() {
        let alert = DomainError::InvalidAlertTransition {
            from: AlertStatus::Dismissed,
            to: AlertStatus::Pending,
        };
        assert_eq!(alert.to_string(), "invalid alert transition from Dismissed to Pending");

        let action = DomainError::InvalidActionTransition {
            from: ActionStatus::Executed,
            to: ActionStatus::Approved,
        };
        assert!(action.to_string().contains("Executed"));
    }
}
