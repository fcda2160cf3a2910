#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

use hashgraph_ordering::{
    config::OrdererConfig,
    consensus::{BlockCallbacks, Consensus},
    dag::{BranchSeq, DagIndex, Event, EventSource, VectorClock},
    error::OrderingError,
    storage::InMemoryStore,
    types::{Block, Epoch, EventHash, FIRST_EPOCH, Frame, ValidatorId},
    validators::Validators,
};

struct Node {
    event: Event,
    /// The event itself and everything below it.
    ancestry: Arc<HashSet<EventHash>>,
}

/// DAG index for tests: an event forkless causes every ancestor whose creator it hasn't seen
/// forking.
pub struct TestDag {
    validators: RwLock<Validators>,
    nodes: RwLock<HashMap<EventHash, Node>>,
}

impl TestDag {
    pub fn new(validators: Validators) -> Self {
        Self {
            validators: RwLock::new(validators),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_validators(&self, validators: Validators) {
        *self.validators.write() = validators;
    }

    /// Add the event, or replace it if already known. Parents must be added first.
    pub fn insert(&self, event: Event) {
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(&event.id()) {
            node.event = event;
            return;
        }
        let mut ancestry = HashSet::from([event.id()]);
        for parent in event.parents() {
            let parent = nodes.get(&parent).expect("parents are inserted first");
            ancestry.extend(parent.ancestry.iter().copied());
        }
        nodes.insert(
            event.id(),
            Node {
                event,
                ancestry: Arc::new(ancestry),
            },
        );
    }

    /// The event and all of its ancestors.
    pub fn ancestry(&self, id: &EventHash) -> Arc<HashSet<EventHash>> {
        self.nodes
            .read()
            .get(id)
            .map(|node| Arc::clone(&node.ancestry))
            .unwrap_or_default()
    }

    /// Validators with two different events at the same seq below `id`.
    pub fn cheaters_below(&self, id: &EventHash) -> HashSet<ValidatorId> {
        let ancestry = self.ancestry(id);
        let nodes = self.nodes.read();
        let mut seen: HashMap<(ValidatorId, u32), EventHash> = HashMap::new();
        let mut cheaters = HashSet::new();
        for hash in ancestry.iter() {
            let event = &nodes[hash].event;
            let key = (event.creator(), event.seq());
            match seen.get(&key) {
                Some(other) if other != hash => {
                    cheaters.insert(event.creator());
                }
                _ => {
                    seen.insert(key, *hash);
                }
            }
        }
        cheaters
    }
}

impl EventSource for TestDag {
    fn has_event(&self, id: &EventHash) -> bool {
        self.nodes.read().contains_key(id)
    }

    fn get_event(&self, id: &EventHash) -> Option<Event> {
        self.nodes.read().get(id).map(|node| node.event.clone())
    }
}

impl DagIndex for TestDag {
    fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool {
        if !self.ancestry(a).contains(b) {
            return false;
        }
        let Some(creator) = self.get_event(b).map(|e| e.creator()) else {
            return false;
        };
        !self.cheaters_below(a).contains(&creator)
    }

    fn merged_highest_before(&self, id: &EventHash) -> VectorClock {
        let ancestry = self.ancestry(id);
        let cheaters = self.cheaters_below(id);
        let validators = self.validators.read();
        let nodes = self.nodes.read();

        let branches = validators
            .sorted_ids()
            .iter()
            .map(|validator| {
                if cheaters.contains(validator) {
                    return BranchSeq::FORK_DETECTED;
                }
                let seqs: Vec<u32> = ancestry
                    .iter()
                    .map(|hash| &nodes[hash].event)
                    .filter(|event| event.creator() == *validator)
                    .map(|event| event.seq())
                    .collect();
                BranchSeq {
                    seq: seqs.iter().copied().max().unwrap_or(0),
                    min_seq: seqs.iter().copied().min().unwrap_or(0),
                }
            })
            .collect();
        VectorClock::new(branches)
    }
}

/// New event with seq and lamport derived from its parents.
pub fn event(
    epoch: Epoch,
    creator: ValidatorId,
    self_parent: Option<&Event>,
    others: &[&Event],
    payload: &[u8],
) -> Event {
    let seq = self_parent.map(|p| p.seq() + 1).unwrap_or(1);
    let lamport = self_parent
        .into_iter()
        .chain(others.iter().copied())
        .map(|p| p.lamport())
        .max()
        .unwrap_or(0)
        + 1;
    Event::new(
        epoch,
        seq,
        creator,
        lamport,
        self_parent.map(|p| p.id()),
        others.iter().map(|p| p.id()).collect(),
        payload.to_vec(),
    )
}

/// Every step, each creator emits one event referencing the previous step's events of all
/// creators.
pub fn full_dag(epoch: Epoch, creators: &[ValidatorId], steps: usize) -> Vec<Vec<Event>> {
    let mut dag: Vec<Vec<Event>> = Vec::with_capacity(steps);
    for step in 0..steps {
        let row: Vec<Event> = creators
            .iter()
            .enumerate()
            .map(|(i, creator)| match step {
                0 => event(epoch, *creator, None, &[], b""),
                _ => {
                    let prev = &dag[step - 1];
                    let others: Vec<&Event> = prev
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, e)| e)
                        .collect();
                    event(epoch, *creator, Some(&prev[i]), &others, b"")
                }
            })
            .collect();
        dag.push(row);
    }
    dag
}

/// Every step, the creators emit one event each in random order, referencing the latest events
/// of a random half or more of the other creators.
pub fn random_dag(epoch: Epoch, creators: &[ValidatorId], steps: usize, seed: u64) -> Vec<Event> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut latest: HashMap<ValidatorId, Event> = HashMap::new();
    let mut events = Vec::with_capacity(creators.len() * steps);

    for _ in 0..steps {
        let mut order = creators.to_vec();
        order.shuffle(&mut rng);
        for creator in order {
            let mut others: Vec<&Event> = latest
                .iter()
                .filter(|(id, _)| **id != creator)
                .map(|(_, e)| e)
                .collect();
            others.sort_by_key(|e| e.creator());
            others.shuffle(&mut rng);
            let keep = if others.is_empty() {
                0
            } else {
                rng.gen_range(others.len().div_ceil(2)..=others.len())
            };
            others.truncate(keep);

            let new_event = event(epoch, creator, latest.get(&creator), &others, b"");
            events.push(new_event.clone());
            latest.insert(creator, new_event);
        }
    }
    events
}

#[derive(Debug, Default)]
pub struct Recorded {
    pub blocks: Vec<Block>,
    /// Confirmed events in application order, with the frame of their block.
    pub applied: Vec<(Frame, EventHash)>,
    pub sealed: Vec<(Epoch, Validators)>,
    rotation: Option<(Frame, Validators)>,
}

/// Block callbacks remembering everything they see.
#[derive(Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

impl Recorder {
    /// End the first epoch right after the block of `frame`.
    pub fn rotating_after(frame: Frame, validators: Validators) -> Self {
        let recorder = Self::default();
        recorder.inner.lock().rotation = Some((frame, validators));
        recorder
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.inner.lock().blocks.clone()
    }

    pub fn applied(&self) -> Vec<(Frame, EventHash)> {
        self.inner.lock().applied.clone()
    }

    pub fn sealed(&self) -> Vec<(Epoch, Validators)> {
        self.inner.lock().sealed.clone()
    }
}

impl BlockCallbacks for Recorder {
    fn begin_block(&mut self, block: &Block) {
        self.inner.lock().blocks.push(block.clone());
    }

    fn apply_event(&mut self, event: &Event) {
        let mut inner = self.inner.lock();
        let frame = inner.blocks.last().map(|b| b.frame).unwrap_or(0);
        inner.applied.push((frame, event.id()));
    }

    fn end_block(&mut self) -> Option<Validators> {
        let mut inner = self.inner.lock();
        let block = inner.blocks.last()?.clone();
        let rotate = matches!(
            &inner.rotation,
            Some((frame, _)) if block.epoch == FIRST_EPOCH && block.frame == *frame
        );
        if rotate {
            inner.rotation.take().map(|(_, validators)| validators)
        } else {
            None
        }
    }

    fn seal_epoch(&mut self, sealed: Epoch, next: &Validators) -> Result<(), OrderingError> {
        self.inner.lock().sealed.push((sealed, next.clone()));
        Ok(())
    }
}

pub type TestConsensus = Consensus<InMemoryStore, TestDag, TestDag>;

/// A bootstrapped consensus over an in-memory store and a [`TestDag`].
pub struct Harness {
    pub dag: Arc<TestDag>,
    pub store: Arc<InMemoryStore>,
    pub consensus: TestConsensus,
    pub recorder: Recorder,
}

impl Harness {
    pub fn new(validators: Validators) -> Self {
        Self::with_recorder(validators, Recorder::default())
    }

    pub fn with_recorder(validators: Validators, recorder: Recorder) -> Self {
        let dag = Arc::new(TestDag::new(validators.clone()));
        let store = Arc::new(InMemoryStore::new(FIRST_EPOCH, validators));
        Self::resume(dag, store, recorder)
    }

    /// Bootstrap over an existing DAG and store, as after a restart.
    pub fn resume(dag: Arc<TestDag>, store: Arc<InMemoryStore>, recorder: Recorder) -> Self {
        let mut consensus = Consensus::new(
            Arc::clone(&store),
            Arc::clone(&dag),
            Arc::clone(&dag),
            OrdererConfig::default(),
        );
        consensus
            .bootstrap(recorder.clone())
            .expect("bootstrap succeeds");
        Self {
            dag,
            store,
            consensus,
            recorder,
        }
    }

    /// Index, build and process a new event. Returns it with its frame.
    pub fn add(&mut self, event: &Event) -> Result<Event, OrderingError> {
        let mut event = event.clone();
        self.dag.insert(event.clone());
        self.consensus.build(&mut event)?;
        self.dag.insert(event.clone());
        self.consensus.process(&event)?;
        Ok(event)
    }

    pub fn add_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> Result<Vec<Event>, OrderingError> {
        events.into_iter().map(|e| self.add(e)).collect()
    }
}

pub fn four_validators() -> Validators {
    Validators::equal([1, 2, 3, 4])
}
