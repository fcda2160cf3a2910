use crate::types::{Epoch, EventHash, Frame, ValidatorId};

#[derive(Debug, thiserror::Error)]
pub enum OrderingError {
    #[error("Claimed frame {claimed} mismatched with calculated frame {calculated}")]
    WrongFrame { claimed: Frame, calculated: Frame },
    #[error("Event has wrong epoch: event epoch {event}, active epoch {active}")]
    WrongEpoch { event: Epoch, active: Epoch },
    #[error("Event wasn't created by an existing validator: {0}")]
    UnknownCreator(ValidatorId),
    #[error("Event not found: {0}")]
    EventNotFound(EventHash),

    #[error(
        "Every root must vote for every not decided subject, roots are possibly processed out of order (election frame={frame}, validator={subject})"
    )]
    MissingVote { frame: Frame, subject: ValidatorId },
    #[error(
        "Root {root} must be forkless caused by at least 2/3W of prev roots, roots are possibly processed out of order (election frame={frame})"
    )]
    InsufficientObservedRoots { frame: Frame, root: EventHash },
    #[error(
        "Forkless caused by 2 fork roots => more than 1/3W are Byzantine (election frame={frame}, validator={subject})"
    )]
    ForkedRoots { frame: Frame, subject: ValidatorId },
    #[error(
        "All the roots are decided as 'no', which is possible only if more than 1/3W are Byzantine (election frame={frame})"
    )]
    AllRootsDecidedNo { frame: Frame },

    #[error("Orderer already bootstrapped")]
    AlreadyBootstrapped,
    #[error("Orderer not bootstrapped")]
    NotBootstrapped,
    #[error("Orderer halted after fatal error: {0}")]
    Halted(String),

    #[error("Mismatched length: expected {expect}, actual {actual}")]
    MismatchedLength { expect: usize, actual: usize },
    #[error("Failed to decode store snapshot: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Ordering service stopped")]
    ServiceStopped,
}

impl OrderingError {
    /// Whether the error leaves the local replica in an untrustworthy state.
    ///
    /// Non-fatal errors reject a single call and leave shared state untouched.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            OrderingError::WrongFrame { .. }
                | OrderingError::AlreadyBootstrapped
                | OrderingError::NotBootstrapped
                | OrderingError::MismatchedLength { .. }
                | OrderingError::Decode(_)
                | OrderingError::InvalidConfiguration(_)
                | OrderingError::ServiceStopped
        )
    }
}
