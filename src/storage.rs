use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use prost::Message;

use crate::{
    dag::{Event, EventSource},
    error::OrderingError,
    protos::ordering::v1::{ConfirmedRecord, RootRecord, StoreSnapshot, ValidatorWeight},
    types::{Epoch, EventHash, FIRST_FRAME, Frame, RootAndSlot},
    validators::Validators,
};

/// Persistent state owned by the orderer.
///
/// Methods take `&self`: implementations do their own locking so that readers on other threads
/// can query while the single orderer thread writes.
pub trait Store: Send + Sync {
    /// Reset the store to the first epoch's state.
    fn apply_genesis(&self, epoch: Epoch, validators: Validators);

    fn get_epoch(&self) -> Epoch;
    fn get_validators(&self) -> Arc<Validators>;

    fn add_root(&self, root: RootAndSlot);
    fn get_frame_roots(&self, frame: Frame) -> Vec<RootAndSlot>;

    fn get_last_decided_frame(&self) -> Frame;
    fn set_last_decided_state(&self, frame: Frame);

    /// Move to `epoch` with a new validator set, dropping everything scoped to the old epoch.
    fn seal_epoch(&self, epoch: Epoch, validators: Arc<Validators>);

    fn get_event_confirmed_on(&self, id: &EventHash) -> Option<Frame>;
    fn set_event_confirmed_on(&self, id: EventHash, frame: Frame);
}

#[derive(Debug, Clone)]
struct StoreState {
    epoch: Epoch,
    last_decided_frame: Frame,
    validators: Arc<Validators>,
    roots: BTreeMap<Frame, Vec<RootAndSlot>>,
    confirmed: HashMap<EventHash, Frame>,
}

impl StoreState {
    fn genesis(epoch: Epoch, validators: Arc<Validators>) -> Self {
        Self {
            epoch,
            last_decided_frame: FIRST_FRAME - 1,
            validators,
            roots: BTreeMap::new(),
            confirmed: HashMap::new(),
        }
    }
}

/// In-memory implementation of [`Store`].
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new(epoch: Epoch, validators: Validators) -> Self {
        Self {
            state: RwLock::new(StoreState::genesis(epoch, Arc::new(validators))),
        }
    }

    /// Encode the whole store as a protobuf `StoreSnapshot`.
    pub fn snapshot(&self) -> Vec<u8> {
        let state = self.state.read();

        let mut confirmed: Vec<ConfirmedRecord> = state
            .confirmed
            .iter()
            .map(|(hash, frame)| ConfirmedRecord {
                hash: hash.as_bytes().to_vec(),
                frame: *frame,
            })
            .collect();
        confirmed.sort_by(|a, b| a.hash.cmp(&b.hash));

        StoreSnapshot {
            epoch: state.epoch,
            last_decided_frame: state.last_decided_frame,
            validators: state
                .validators
                .iter()
                .map(|(id, weight)| ValidatorWeight { id, weight })
                .collect(),
            roots: state
                .roots
                .values()
                .flatten()
                .map(|root| RootRecord {
                    hash: root.hash.as_bytes().to_vec(),
                    frame: root.slot.frame,
                    validator: root.slot.validator,
                })
                .collect(),
            confirmed,
        }
        .encode_to_vec()
    }

    /// Rebuild a store from [`InMemoryStore::snapshot`] output.
    pub fn restore(bytes: &[u8]) -> Result<Self, OrderingError> {
        let snapshot = StoreSnapshot::decode(bytes)?;

        let validators =
            Validators::from_weights(snapshot.validators.iter().map(|v| (v.id, v.weight)));
        let mut state = StoreState::genesis(snapshot.epoch, Arc::new(validators));
        state.last_decided_frame = snapshot.last_decided_frame;

        for record in snapshot.roots {
            let root = RootAndSlot::new(to_hash(&record.hash)?, record.frame, record.validator);
            state.roots.entry(root.slot.frame).or_default().push(root);
        }
        for record in snapshot.confirmed {
            state.confirmed.insert(to_hash(&record.hash)?, record.frame);
        }

        Ok(Self {
            state: RwLock::new(state),
        })
    }
}

fn to_hash(bytes: &[u8]) -> Result<EventHash, OrderingError> {
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| OrderingError::MismatchedLength {
            expect: 32,
            actual: bytes.len(),
        })?;
    Ok(EventHash(array))
}

impl Store for InMemoryStore {
    fn apply_genesis(&self, epoch: Epoch, validators: Validators) {
        *self.state.write() = StoreState::genesis(epoch, Arc::new(validators));
    }

    fn get_epoch(&self) -> Epoch {
        self.state.read().epoch
    }

    fn get_validators(&self) -> Arc<Validators> {
        Arc::clone(&self.state.read().validators)
    }

    fn add_root(&self, root: RootAndSlot) {
        let mut state = self.state.write();
        let frame_roots = state.roots.entry(root.slot.frame).or_default();
        if !frame_roots.contains(&root) {
            frame_roots.push(root);
        }
    }

    fn get_frame_roots(&self, frame: Frame) -> Vec<RootAndSlot> {
        self.state
            .read()
            .roots
            .get(&frame)
            .cloned()
            .unwrap_or_default()
    }

    fn get_last_decided_frame(&self) -> Frame {
        self.state.read().last_decided_frame
    }

    fn set_last_decided_state(&self, frame: Frame) {
        self.state.write().last_decided_frame = frame;
    }

    fn seal_epoch(&self, epoch: Epoch, validators: Arc<Validators>) {
        *self.state.write() = StoreState::genesis(epoch, validators);
    }

    fn get_event_confirmed_on(&self, id: &EventHash) -> Option<Frame> {
        self.state.read().confirmed.get(id).copied()
    }

    fn set_event_confirmed_on(&self, id: EventHash, frame: Frame) {
        self.state.write().confirmed.insert(id, frame);
    }
}

/// In-memory implementation of [`EventSource`].
#[derive(Default)]
pub struct InMemoryEventSource {
    events: RwLock<HashMap<EventHash, Event>>,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or replace the event under its id.
    pub fn insert(&self, event: Event) {
        self.events.write().insert(event.id(), event);
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl EventSource for InMemoryEventSource {
    fn has_event(&self, id: &EventHash) -> bool {
        self.events.read().contains_key(id)
    }

    fn get_event(&self, id: &EventHash) -> Option<Event> {
        self.events.read().get(id).cloned()
    }
}
