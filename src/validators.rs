use std::collections::{BTreeMap, HashMap};

use crate::types::{ValidatorId, Weight};

/// Immutable per-epoch validator set.
///
/// Validators are kept in a fixed deterministic order: weight descending, then id ascending.
/// That order is the tie-break of the election and the order cheaters are reported in, so every
/// honest node must derive the same one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validators {
    ids: Vec<ValidatorId>,
    weights: Vec<Weight>,
    indices: HashMap<ValidatorId, usize>,
    /// Wide enough that no set of `u64` weights can wrap it.
    total_weight: u128,
}

impl Validators {
    /// Build a set from `(id, weight)` pairs. Zero weights are dropped, later duplicates win.
    pub fn from_weights(weights: impl IntoIterator<Item = (ValidatorId, Weight)>) -> Self {
        let mut builder = ValidatorsBuilder::new();
        for (id, weight) in weights {
            builder.set(id, weight);
        }
        builder.build()
    }

    /// Equal weight `1` for every id.
    pub fn equal(ids: impl IntoIterator<Item = ValidatorId>) -> Self {
        Self::from_weights(ids.into_iter().map(|id| (id, 1)))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Validator ids in the set's deterministic order.
    pub fn sorted_ids(&self) -> &[ValidatorId] {
        &self.ids
    }

    /// Position of the validator in [`Validators::sorted_ids`].
    pub fn index_of(&self, id: ValidatorId) -> Option<usize> {
        self.indices.get(&id).copied()
    }

    pub fn contains(&self, id: ValidatorId) -> bool {
        self.indices.contains_key(&id)
    }

    /// Weight of the validator, `0` when it's not in the set.
    pub fn weight(&self, id: ValidatorId) -> Weight {
        self.index_of(id).map(|i| self.weights[i]).unwrap_or(0)
    }

    pub fn total_weight(&self) -> u128 {
        self.total_weight
    }

    /// Smallest weight strictly greater than 2/3 of the total.
    pub fn quorum(&self) -> u128 {
        self.total_weight * 2 / 3 + 1
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValidatorId, Weight)> + '_ {
        self.ids.iter().copied().zip(self.weights.iter().copied())
    }

    /// Fresh weighted counter over this set.
    pub fn new_counter(&self) -> WeightCounter<'_> {
        WeightCounter {
            validators: self,
            counted: vec![false; self.len()],
            sum: 0,
        }
    }

    /// Derive a new set by recomputing every validator's weight.
    ///
    /// Validators mapped to a zero weight leave the set.
    pub fn map_weights<F>(&self, mut f: F) -> Validators
    where
        F: FnMut(ValidatorId, Weight) -> Weight,
    {
        Self::from_weights(self.iter().map(|(id, weight)| (id, f(id, weight))))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidatorsBuilder {
    weights: BTreeMap<ValidatorId, Weight>,
}

impl ValidatorsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the validator's weight. A zero weight removes it.
    pub fn set(&mut self, id: ValidatorId, weight: Weight) -> &mut Self {
        if weight == 0 {
            self.weights.remove(&id);
        } else {
            self.weights.insert(id, weight);
        }
        self
    }

    pub fn build(&self) -> Validators {
        let mut entries: Vec<(ValidatorId, Weight)> =
            self.weights.iter().map(|(id, w)| (*id, *w)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let ids: Vec<ValidatorId> = entries.iter().map(|(id, _)| *id).collect();
        let weights: Vec<Weight> = entries.iter().map(|(_, w)| *w).collect();
        let indices = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let total_weight = weights.iter().map(|w| u128::from(*w)).sum();

        Validators {
            ids,
            weights,
            indices,
            total_weight,
        }
    }
}

/// Accumulates validator weight, counting each validator at most once.
#[derive(Debug, Clone)]
pub struct WeightCounter<'a> {
    validators: &'a Validators,
    counted: Vec<bool>,
    sum: u128,
}

impl WeightCounter<'_> {
    /// Add the validator's weight. Returns `false` if it was already counted or is unknown.
    pub fn count(&mut self, id: ValidatorId) -> bool {
        let Some(i) = self.validators.index_of(id) else {
            return false;
        };
        if self.counted[i] {
            return false;
        }
        self.counted[i] = true;
        self.sum += u128::from(self.validators.weights[i]);
        true
    }

    pub fn sum(&self) -> u128 {
        self.sum
    }

    pub fn has_quorum(&self) -> bool {
        self.sum >= self.validators.quorum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_by_weight_then_id() {
        let validators = Validators::from_weights([(3, 5), (1, 5), (2, 10), (4, 1)]);
        assert_eq!(validators.sorted_ids(), &[2, 1, 3, 4]);
        assert_eq!(validators.index_of(3), Some(2));
        assert_eq!(validators.total_weight(), 21);
    }

    #[test]
    fn quorum_is_strictly_more_than_two_thirds() {
        assert_eq!(Validators::equal(1..=3).quorum(), 3);
        assert_eq!(Validators::equal(1..=4).quorum(), 3);
        assert_eq!(Validators::equal(1..=6).quorum(), 5);
        assert_eq!(Validators::equal(1..=100).quorum(), 67);
    }

    #[test]
    fn counter_ignores_repeats_and_strangers() {
        let validators = Validators::equal(1..=4);
        let mut counter = validators.new_counter();

        assert!(counter.count(1));
        assert!(!counter.count(1));
        assert!(!counter.count(42));
        assert!(counter.count(2));
        assert_eq!(counter.sum(), 2);
        assert!(!counter.has_quorum());

        assert!(counter.count(3));
        assert!(counter.has_quorum());
    }

    #[test]
    fn zero_weight_leaves_the_set() {
        let validators = Validators::from_weights([(1, 2), (2, 0), (3, 1)]);
        assert!(!validators.contains(2));
        assert_eq!(validators.weight(2), 0);

        let halved = validators.map_weights(|id, weight| if id == 3 { 0 } else { weight * 2 });
        assert_eq!(halved.sorted_ids(), &[1]);
        assert_eq!(halved.total_weight(), 4);
    }

    #[test]
    fn huge_weights_keep_a_strict_quorum() {
        let heavy = u64::MAX / 2 + 1;
        let validators = Validators::from_weights([(1, heavy), (2, heavy)]);
        assert_eq!(validators.total_weight(), u128::from(u64::MAX) + 1);
        assert!(validators.quorum() > u128::from(heavy));

        let mut counter = validators.new_counter();
        assert!(counter.count(1));
        assert!(!counter.has_quorum());
        assert!(counter.count(2));
        assert!(counter.has_quorum());
    }
}
