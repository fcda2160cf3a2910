//! Virtual voting among frame roots.
//!
//! An [`Election`] holds the votes of exactly one undecided frame. Once it yields a [`Res`] the
//! orderer throws it away and starts a fresh one for the next frame, so no vote can leak from one
//! frame's election into another's.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt::Write as _,
    sync::Arc,
};

use sha2::{Digest, Sha256};

use crate::{
    error::OrderingError,
    types::{EventHash, Frame, RootAndSlot, ValidatorId},
    validators::Validators,
};

const SUMMARY_LEGEND: &str = "Every line contains votes from a root, for each subject. y is yes, \
     n is no. Upper case means 'decided'. '-' means that subject was already decided when root \
     was processed.";

/// What the election needs from the outside world.
pub trait ElectionContext {
    /// Whether root `a` is forkless caused by root `b`.
    fn forkless_cause(&self, a: &EventHash, b: &EventHash) -> bool;
    /// All known roots of the frame.
    fn frame_roots(&self, frame: Frame) -> Vec<RootAndSlot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct VoteId {
    from_root: RootAndSlot,
    for_validator: ValidatorId,
}

/// A root's vote about the frame-to-decide root of one validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vote {
    pub decided: bool,
    pub yes: bool,
    /// The subject's root this vote is about, zero for "no" votes.
    pub observed_root: EventHash,
}

/// Decided frame and its Atropos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Res {
    pub frame: Frame,
    pub atropos: EventHash,
}

#[derive(Debug, Clone)]
pub struct Election {
    validators: Arc<Validators>,
    frame_to_decide: Frame,
    decided_roots: BTreeMap<ValidatorId, Vote>,
    votes: BTreeMap<VoteId, Vote>,
}

impl Election {
    pub fn new(validators: Arc<Validators>, frame_to_decide: Frame) -> Self {
        Self {
            validators,
            frame_to_decide,
            decided_roots: BTreeMap::new(),
            votes: BTreeMap::new(),
        }
    }

    pub fn frame_to_decide(&self) -> Frame {
        self.frame_to_decide
    }

    pub fn validators(&self) -> &Arc<Validators> {
        &self.validators
    }

    /// Final vote about the validator's root, if already decided.
    pub fn decided_vote(&self, validator: ValidatorId) -> Option<Vote> {
        self.decided_roots.get(&validator).copied()
    }

    pub fn decided_count(&self) -> usize {
        self.decided_roots.len()
    }

    /// Vote cast by `from_root` about `subject`, if one was recorded.
    pub fn vote(&self, from_root: &RootAndSlot, subject: ValidatorId) -> Option<Vote> {
        self.votes
            .get(&VoteId {
                from_root: *from_root,
                for_validator: subject,
            })
            .copied()
    }

    /// Calculate the votes of a new root.
    ///
    /// Returns the decided frame once this root observes that the election is over. Calling it
    /// again after a decision keeps returning that decision. Roots at or below the frame to
    /// decide are ignored.
    ///
    /// A root that can't be tallied (missing votes, too few observed roots, fork roots) leaves
    /// the election untouched.
    pub fn process_root<C>(
        &mut self,
        root: RootAndSlot,
        ctx: &C,
    ) -> Result<Option<Res>, OrderingError>
    where
        C: ElectionContext + ?Sized,
    {
        if let Some(res) = self.choose_event()? {
            return Ok(Some(res));
        }
        if root.slot.frame <= self.frame_to_decide {
            // too old root, out of interest for current election
            return Ok(None);
        }
        let round = root.slot.frame - self.frame_to_decide;
        let prev_frame = root.slot.frame - 1;
        let not_decided = self.not_decided_roots();

        let mut new_votes = Vec::with_capacity(not_decided.len());
        if round == 1 {
            // in initial round, vote "yes" if observe the subject
            let observed = observed_roots_map(ctx, &root.hash, prev_frame);
            for subject in not_decided {
                let vote = match observed.get(&subject) {
                    Some(observed_root) => Vote {
                        decided: false,
                        yes: true,
                        observed_root: observed_root.hash,
                    },
                    None => Vote::default(),
                };
                new_votes.push((subject, vote));
            }
        } else {
            let observed = observed_roots(ctx, &root.hash, prev_frame);
            for subject in not_decided {
                let vote = self.aggregate_votes(&root, subject, &observed)?;
                new_votes.push((subject, vote));
            }
        }

        for (subject, vote) in new_votes {
            if vote.decided {
                self.decided_roots.insert(subject, vote);
            }
            // save vote for next rounds
            self.votes.insert(
                VoteId {
                    from_root: root,
                    for_validator: subject,
                },
                vote,
            );
        }

        self.choose_event()
    }

    /// Vote as the weighted majority of the observed roots' votes.
    fn aggregate_votes(
        &self,
        root: &RootAndSlot,
        subject: ValidatorId,
        observed: &[RootAndSlot],
    ) -> Result<Vote, OrderingError> {
        let mut yes_votes = self.validators.new_counter();
        let mut no_votes = self.validators.new_counter();
        let mut all_votes = self.validators.new_counter();

        let mut subject_hash: Option<EventHash> = None;
        for observed_root in observed {
            let Some(vote) = self.vote(observed_root, subject) else {
                return Err(OrderingError::MissingVote {
                    frame: self.frame_to_decide,
                    subject,
                });
            };

            if vote.yes {
                if subject_hash.is_some_and(|hash| hash != vote.observed_root) {
                    return Err(OrderingError::ForkedRoots {
                        frame: self.frame_to_decide,
                        subject,
                    });
                }
                subject_hash = Some(vote.observed_root);
                yes_votes.count(observed_root.slot.validator);
            } else {
                no_votes.count(observed_root.slot.validator);
            }
            if !all_votes.count(observed_root.slot.validator) {
                // two observed roots of the same validator
                return Err(OrderingError::ForkedRoots {
                    frame: self.frame_to_decide,
                    subject,
                });
            }
        }

        if !all_votes.has_quorum() {
            return Err(OrderingError::InsufficientObservedRoots {
                frame: self.frame_to_decide,
                root: root.hash,
            });
        }

        let yes = yes_votes.sum() >= no_votes.sum();
        Ok(Vote {
            // final and consistent unless more than 1/3W are Byzantine
            decided: yes_votes.has_quorum() || no_votes.has_quorum(),
            yes,
            observed_root: match (yes, subject_hash) {
                (true, Some(hash)) => hash,
                _ => EventHash::ZERO,
            },
        })
    }

    /// Validators whose root isn't decided yet, in the set's order.
    fn not_decided_roots(&self) -> Vec<ValidatorId> {
        let not_decided: Vec<ValidatorId> = self
            .validators
            .sorted_ids()
            .iter()
            .copied()
            .filter(|v| !self.decided_roots.contains_key(v))
            .collect();
        assert_eq!(
            not_decided.len() + self.decided_roots.len(),
            self.validators.len(),
            "mismatch of roots"
        );
        not_decided
    }

    /// The first validator in sort order whose root is decided "yes" gives the Atropos.
    ///
    /// Not every root must be decided, only those preceding the first "yes".
    fn choose_event(&self) -> Result<Option<Res>, OrderingError> {
        for validator in self.validators.sorted_ids() {
            let Some(vote) = self.decided_roots.get(validator) else {
                return Ok(None);
            };
            if vote.yes {
                return Ok(Some(Res {
                    frame: self.frame_to_decide,
                    atropos: vote.observed_root,
                }));
            }
        }
        Err(OrderingError::AllRootsDecidedNo {
            frame: self.frame_to_decide,
        })
    }

    /// Digest of the whole election state, for comparing replicas in tests.
    pub fn debug_state_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.frame_to_decide.to_le_bytes());
        for (vid, vote) in &self.votes {
            hasher.update(vid.from_root.hash.as_bytes());
            hasher.update(vid.from_root.slot.frame.to_le_bytes());
            hasher.update(vid.from_root.slot.validator.to_le_bytes());
            hasher.update(vid.for_validator.to_le_bytes());
            hasher.update([vote.decided as u8, vote.yes as u8]);
            hasher.update(vote.observed_root.as_bytes());
        }
        for (validator, vote) in &self.decided_roots {
            hasher.update(validator.to_le_bytes());
            hasher.update(vote.observed_root.as_bytes());
        }
        hasher.finalize().into()
    }

    /// Human readable vote table, headed by a legend line.
    ///
    /// Prints every voting root when `voters` is `None`.
    pub fn summary(&self, voters: Option<&[RootAndSlot]>) -> String {
        let voters: Vec<RootAndSlot> = match voters {
            Some(voters) => voters.to_vec(),
            None => self
                .votes
                .keys()
                .map(|vid| vid.from_root)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        };

        let mut info = String::from(SUMMARY_LEGEND);
        info.push('\n');
        for root in voters {
            let _ = write!(info, "{}-{}: ", root.hash, root.slot.frame);
            for subject in self.validators.sorted_ids() {
                let mark = match self.vote(&root, *subject) {
                    None => '-',
                    Some(Vote {
                        yes: true,
                        decided: true,
                        ..
                    }) => 'Y',
                    Some(Vote { yes: true, .. }) => 'y',
                    Some(Vote { decided: true, .. }) => 'N',
                    Some(_) => 'n',
                };
                info.push(mark);
            }
            info.push('\n');
        }
        info
    }
}

/// Roots of `frame` which `root` is forkless caused by.
fn observed_roots<C>(ctx: &C, root: &EventHash, frame: Frame) -> Vec<RootAndSlot>
where
    C: ElectionContext + ?Sized,
{
    ctx.frame_roots(frame)
        .into_iter()
        .filter(|frame_root| ctx.forkless_cause(root, &frame_root.hash))
        .collect()
}

fn observed_roots_map<C>(
    ctx: &C,
    root: &EventHash,
    frame: Frame,
) -> HashMap<ValidatorId, RootAndSlot>
where
    C: ElectionContext + ?Sized,
{
    observed_roots(ctx, root, frame)
        .into_iter()
        .map(|frame_root| (frame_root.slot.validator, frame_root))
        .collect()
}
