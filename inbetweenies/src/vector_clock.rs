//! Causal comparator over per-device counters (§3.4, §4.2).

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Before,
    After,
    Concurrent,
}

/// Map from device identifier to a monotonically non-decreasing counter.
/// Missing keys are treated as 0.
///
/// Counters are kept as `u64` internally for the max/+1 arithmetic of §4.2,
/// but §6.2 types the wire value as an opaque string (so ordering never
/// depends on a fixed integer width). `Serialize`/`Deserialize` below
/// convert at that boundary rather than deriving, so a peer who sends
/// `"clocks": {"device": "3"}` round-trips instead of failing to parse a
/// JSON number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorClock {
    pub clocks: BTreeMap<String, u64>,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    clocks: BTreeMap<String, String>,
}

impl Serialize for VectorClock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let clocks = self.clocks.iter().map(|(id, counter)| (id.clone(), counter.to_string())).collect();
        Wire { clocks }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VectorClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = Wire::deserialize(deserializer)?;
        let mut clocks = BTreeMap::new();
        for (id, counter) in wire.clocks {
            let counter = counter
                .parse()
                .map_err(|_| D::Error::custom(format!("clock counter for {id} is not a plain integer: {counter:?}")))?;
            clocks.insert(id, counter);
        }
        Ok(VectorClock { clocks })
    }
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> u64 {
        self.clocks.get(device_id).copied().unwrap_or(0)
    }

    /// Bumps `device_id`'s counter by one, creating it at 1 if absent.
    pub fn advance(&mut self, device_id: &str) {
        let counter = self.clocks.entry(device_id.to_string()).or_insert(0);
        *counter += 1;
    }

    /// Element-wise maximum of `self` and `other`.
    pub fn merge(&self, other: &VectorClock) -> VectorClock {
        let mut merged = self.clocks.clone();
        for (device_id, counter) in &other.clocks {
            let entry = merged.entry(device_id.clone()).or_insert(0);
            *entry = (*entry).max(*counter);
        }
        VectorClock { clocks: merged }
    }

    /// Compares two clocks by the partial order over all known device ids.
    pub fn compare(&self, other: &VectorClock) -> Comparison {
        let mut self_less = false;
        let mut self_greater = false;

        let mut device_ids: Vec<&str> = self
            .clocks
            .keys()
            .chain(other.clocks.keys())
            .map(String::as_str)
            .collect();
        device_ids.sort_unstable();
        device_ids.dedup();

        for device_id in device_ids {
            match self.get(device_id).cmp(&other.get(device_id)) {
                CmpOrdering::Less => self_less = true,
                CmpOrdering::Greater => self_greater = true,
                CmpOrdering::Equal => {}
            }
        }

        match (self_less, self_greater) {
            (false, false) => Comparison::Equal,
            (true, false) => Comparison::Before,
            (false, true) => Comparison::After,
            (true, true) => Comparison::Concurrent,
        }
    }
}
