use std::fmt;

/// Logical round number used to stage the election.
pub type Frame = u32;
/// Validator-set epoch. Frame numbering restarts at [`FIRST_FRAME`] on every rotation.
pub type Epoch = u32;
/// Identifier of a validator, valid within the current epoch's validator set.
pub type ValidatorId = u32;
/// Voting weight of a validator.
pub type Weight = u64;

pub const FIRST_FRAME: Frame = 1;
pub const FIRST_EPOCH: Epoch = 1;

/// 32-byte identifier of an event in the DAG.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventHash(pub [u8; 32]);

impl EventHash {
    pub const ZERO: EventHash = EventHash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for EventHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for EventHash {
    // Short form, enough to tell events apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHash({self})")
    }
}

/// A frame/validator coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot {
    pub frame: Frame,
    pub validator: ValidatorId,
}

/// A root event together with the slot it occupies.
///
/// Honest validators produce at most one root per slot; two roots at the same slot are a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootAndSlot {
    pub hash: EventHash,
    pub slot: Slot,
}

impl RootAndSlot {
    pub fn new(hash: EventHash, frame: Frame, validator: ValidatorId) -> Self {
        Self {
            hash,
            slot: Slot { frame, validator },
        }
    }
}

/// A decided frame handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Epoch the block was decided in.
    pub epoch: Epoch,
    /// Frame the Atropos was elected for.
    pub frame: Frame,
    /// The Atropos event.
    pub atropos: EventHash,
    /// Validators with a detected fork, in the validator set's sort order.
    pub cheaters: Vec<ValidatorId>,
}
