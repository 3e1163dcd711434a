use crate::model::{CounterSample, Counters, MetricKey};
use crate::store::{RateState, SampleStore};
use log::debug;

/// How one tick moved a cumulative stream through its baseline lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// No previous sample existed; the current one is now the baseline.
    Baselined,
    /// A counter went backwards; the current sample replaced the baseline.
    Reset,
    /// No time elapsed since the baseline. Carries the last produced values.
    Stale(Option<Vec<f64>>),
    Delta { deltas: Vec<u64>, elapsed_ms: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum RateOutcome {
    NoData,
    Fresh(Vec<f64>),
    Retained(Vec<f64>),
}

impl RateOutcome {
    pub fn values(&self) -> Option<&[f64]> {
        match self {
            RateOutcome::NoData => None,
            RateOutcome::Fresh(v) | RateOutcome::Retained(v) => Some(v),
        }
    }

    fn retained(last: Option<Vec<f64>>) -> Self {
        last.map(RateOutcome::Retained).unwrap_or(RateOutcome::NoData)
    }
}

/// Folds `sample` into the store for `key`. The store always ends up holding
/// `sample` as the baseline, whatever the outcome.
pub fn advance(store: &mut SampleStore, key: &MetricKey, sample: CounterSample) -> Step {
    let Some(prev) = store.get(key) else {
        debug!("{}: baseline established", key);
        store.put(key.clone(), RateState::baseline(sample));
        return Step::Baselined;
    };

    let last = prev.last.clone();
    let elapsed_ms = sample
        .taken_at
        .checked_duration_since(prev.sample.taken_at)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    if elapsed_ms == 0 {
        store.put(
            key.clone(),
            RateState {
                sample,
                last: last.clone(),
            },
        );
        return Step::Stale(last);
    }

    match deltas(&prev.sample.counters, &sample.counters) {
        Some(deltas) => {
            store.put(key.clone(), RateState { sample, last });
            Step::Delta { deltas, elapsed_ms }
        }
        None => {
            debug!("{}: counter reset, re-baselining", key);
            store.put(key.clone(), RateState::baseline(sample));
            Step::Reset
        }
    }
}

/// Per-field increase between two samples, or `None` when any counter
/// decreased or the shapes no longer line up.
///
/// The per-device form sums each device's own delta; devices that appeared,
/// vanished, or reset since the previous sample contribute nothing.
pub fn deltas(prev: &Counters, cur: &Counters) -> Option<Vec<u64>> {
    match (prev, cur) {
        (Counters::Flat(a), Counters::Flat(b)) => {
            if a.len() != b.len() {
                return None;
            }
            a.iter()
                .zip(b)
                .map(|(before, now)| now.checked_sub(*before))
                .collect()
        }
        (Counters::PerDevice(a), Counters::PerDevice(b)) => {
            let mut sum = [0u64; 2];
            for (name, now) in b {
                let Some(before) = a.get(name) else {
                    continue;
                };
                if let (Some(r), Some(w)) =
                    (now[0].checked_sub(before[0]), now[1].checked_sub(before[1]))
                {
                    sum[0] = sum[0].saturating_add(r);
                    sum[1] = sum[1].saturating_add(w);
                } else {
                    debug!("device {} reset inside aggregate", name);
                }
            }
            Some(sum.to_vec())
        }
        _ => None,
    }
}

/// Units-per-second for each counter field.
pub fn per_second(store: &mut SampleStore, key: &MetricKey, sample: CounterSample) -> RateOutcome {
    match advance(store, key, sample) {
        Step::Baselined | Step::Reset => RateOutcome::NoData,
        Step::Stale(last) => RateOutcome::retained(last),
        Step::Delta { deltas, elapsed_ms } => {
            let secs = elapsed_ms as f64 / 1000.0;
            let rates: Vec<f64> = deltas.iter().map(|d| *d as f64 / secs).collect();
            store.remember(key, rates.clone());
            RateOutcome::Fresh(rates)
        }
    }
}

/// Busy share of CPU time. Expects `Counters::Flat([total, idle])`.
pub fn cpu_percent(store: &mut SampleStore, key: &MetricKey, sample: CounterSample) -> RateOutcome {
    match advance(store, key, sample) {
        Step::Baselined | Step::Reset => RateOutcome::NoData,
        Step::Stale(last) => RateOutcome::retained(last),
        Step::Delta { deltas, .. } => {
            let (total, idle) = match deltas.as_slice() {
                [total, idle] => (*total, *idle),
                _ => return RateOutcome::NoData,
            };
            if total == 0 {
                return RateOutcome::retained(store.get(key).and_then(|s| s.last.clone()));
            }
            let busy = total.saturating_sub(idle);
            let pct = (100.0 * busy as f64 / total as f64).clamp(0.0, 100.0);
            store.remember(key, vec![pct]);
            RateOutcome::Fresh(vec![pct])
        }
    }
}
