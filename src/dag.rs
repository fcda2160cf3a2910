//! Events and the DAG collaborators the orderer consumes.
//!
//! The orderer never walks the DAG itself to answer reachability questions. It relies on a
//! [`DagIndex`] for the forkless-cause relation and fork detection, and on an [`EventSource`]
//! to resolve parents.

use sha2::{Digest, Sha256};

use crate::types::{Epoch, EventHash, Frame, ValidatorId};

/// An event of the DAG.
///
/// The id covers everything except the frame, which the orderer assigns after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    id: EventHash,
    epoch: Epoch,
    seq: u32,
    creator: ValidatorId,
    lamport: u32,
    self_parent: Option<EventHash>,
    other_parents: Vec<EventHash>,
    payload: Vec<u8>,
    frame: Frame,
}

impl Event {
    pub fn new(
        epoch: Epoch,
        seq: u32,
        creator: ValidatorId,
        lamport: u32,
        self_parent: Option<EventHash>,
        other_parents: Vec<EventHash>,
        payload: Vec<u8>,
    ) -> Self {
        let id = compute_event_id(
            epoch,
            seq,
            creator,
            lamport,
            self_parent.as_ref(),
            &other_parents,
            &payload,
        );
        Self {
            id,
            epoch,
            seq,
            creator,
            lamport,
            self_parent,
            other_parents,
            payload,
            frame: 0,
        }
    }

    pub fn id(&self) -> EventHash {
        self.id
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn creator(&self) -> ValidatorId {
        self.creator
    }

    pub fn lamport(&self) -> u32 {
        self.lamport
    }

    pub fn self_parent(&self) -> Option<EventHash> {
        self.self_parent
    }

    pub fn other_parents(&self) -> &[EventHash] {
        &self.other_parents
    }

    /// Self-parent first, then the other parents.
    pub fn parents(&self) -> impl Iterator<Item = EventHash> + '_ {
        self.self_parent
            .iter()
            .copied()
            .chain(self.other_parents.iter().copied())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Assigned frame, `0` until the orderer has built the event.
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn set_frame(&mut self, frame: Frame) {
        self.frame = frame;
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frame = frame;
        self
    }
}

pub fn compute_event_id(
    epoch: Epoch,
    seq: u32,
    creator: ValidatorId,
    lamport: u32,
    self_parent: Option<&EventHash>,
    other_parents: &[EventHash],
    payload: &[u8],
) -> EventHash {
    let mut hasher = Sha256::new();
    hasher.update(epoch.to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hasher.update(creator.to_le_bytes());
    hasher.update(lamport.to_le_bytes());
    match self_parent {
        Some(parent) => {
            hasher.update([1u8]);
            hasher.update(parent.as_bytes());
        }
        None => hasher.update([0u8]),
    }
    hasher.update((other_parents.len() as u32).to_le_bytes());
    for parent in other_parents {
        hasher.update(parent.as_bytes());
    }
    hasher.update(payload);
    EventHash(hasher.finalize().into())
}

/// Access to already stored events.
pub trait EventSource: Send + Sync {
    fn has_event(&self, id: &EventHash) -> bool;
    fn get_event(&self, id: &EventHash) -> Option<Event>;
}

/// Reachability index over the DAG.
pub trait DagIndex: Send + Sync {
    /// Whether event `a` observes event `b` through a forkless-causal chain.
    fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool;

    /// Per-validator highest observed sequence numbers of everything below `id`, `id` included.
    ///
    /// Positions follow the current validator set's sorted order.
    fn merged_highest_before(&self, id: &EventHash) -> VectorClock;
}

/// Highest and lowest observed `seq` of one validator's branch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchSeq {
    pub seq: u32,
    pub min_seq: u32,
}

impl BranchSeq {
    /// Marker stored in a branch once a fork of its validator was observed.
    pub const FORK_DETECTED: BranchSeq = BranchSeq {
        seq: 0,
        min_seq: u32::MAX,
    };

    pub fn is_fork_detected(&self) -> bool {
        *self == Self::FORK_DETECTED
    }
}

/// Vector clock indexed by validator position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorClock {
    branches: Vec<BranchSeq>,
}

impl VectorClock {
    pub fn new(branches: Vec<BranchSeq>) -> Self {
        Self { branches }
    }

    /// Branch at `index`, empty if the clock doesn't cover it.
    pub fn get(&self, index: usize) -> BranchSeq {
        self.branches.get(index).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}
