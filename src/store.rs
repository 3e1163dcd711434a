use crate::model::{CounterSample, MetricKey};
use std::collections::{BTreeSet, HashMap};

/// Baseline for one cumulative stream plus the last values it produced, so
/// a degenerate tick can repeat them.
#[derive(Clone, Debug)]
pub struct RateState {
    pub sample: CounterSample,
    pub last: Option<Vec<f64>>,
}

impl RateState {
    pub fn baseline(sample: CounterSample) -> Self {
        Self { sample, last: None }
    }
}

#[derive(Debug, Default)]
pub struct SampleStore {
    states: HashMap<MetricKey, RateState>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MetricKey) -> Option<&RateState> {
        self.states.get(key)
    }

    pub fn put(&mut self, key: MetricKey, state: RateState) {
        self.states.insert(key, state);
    }

    /// Records the values last produced for `key`, if it has a baseline.
    pub fn remember(&mut self, key: &MetricKey, values: Vec<f64>) {
        if let Some(state) = self.states.get_mut(key) {
            state.last = Some(values);
        }
    }

    pub fn evict(&mut self, key: &MetricKey) -> bool {
        self.states.remove(key).is_some()
    }

    /// Drops every entry whose key is not active. Returns the evicted keys.
    pub fn evict_all_except(&mut self, active: &BTreeSet<MetricKey>) -> Vec<MetricKey> {
        let stale: Vec<MetricKey> = self
            .states
            .keys()
            .filter(|k| !active.contains(*k))
            .cloned()
            .collect();
        for key in &stale {
            self.states.remove(key);
        }
        stale
    }

    pub fn contains(&self, key: &MetricKey) -> bool {
        self.states.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Counters, DiskTarget};
    use std::time::Instant;

    fn sample(v: u64) -> CounterSample {
        CounterSample::new(Counters::Flat(vec![v]), Instant::now())
    }

    #[test]
    fn put_get_evict() {
        let mut store = SampleStore::new();
        store.put(MetricKey::Cpu, RateState::baseline(sample(1)));
        assert!(store.contains(&MetricKey::Cpu));
        assert_eq!(
            store.get(&MetricKey::Cpu).unwrap().sample.counters,
            Counters::Flat(vec![1])
        );
        assert!(store.evict(&MetricKey::Cpu));
        assert!(!store.evict(&MetricKey::Cpu));
        assert!(store.is_empty());
    }

    #[test]
    fn evicts_inactive_keys() {
        let mut store = SampleStore::new();
        let sda = MetricKey::DiskStats(DiskTarget::Device("sda".into()));
        store.put(MetricKey::Cpu, RateState::baseline(sample(1)));
        store.put(sda.clone(), RateState::baseline(sample(2)));
        store.put(MetricKey::NetEth, RateState::baseline(sample(3)));

        let active: BTreeSet<MetricKey> = [MetricKey::Cpu, MetricKey::NetEth].into_iter().collect();
        let evicted = store.evict_all_except(&active);
        assert_eq!(evicted, vec![sda.clone()]);
        assert_eq!(store.len(), 2);
        assert!(!store.contains(&sda));
    }
}
