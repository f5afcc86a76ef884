use crate::domain::Domain;
use crate::monitor::Monitor;
use crate::quantity::Quantity;
use std::collections::BTreeMap;

/// Snapshot of everything the evolve loop needs to resume: the model clock,
/// the per-quantity arrays, the reporting counters, the active order and
/// the small-step counter, and the extrema blocks. Storage and transport of
/// the bytes is the caller's business; MessagePack encoding is provided.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CheckpointState {
    pub time: f64,
    pub starttime: f64,
    pub yieldtime: f64,
    pub order: u32,
    pub smallsteps: u32,
    pub number_of_steps: u64,
    pub number_of_first_order_steps: u64,
    pub recorded_min_timestep: f64,
    pub recorded_max_timestep: f64,
    pub quantities: BTreeMap<String, Quantity>,
    pub monitor: Option<Monitor>,
}

impl CheckpointState {
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl Domain {
    /// Capture the persisted-state set.
    pub fn snapshot(&self) -> CheckpointState {
        CheckpointState {
            time: self.time,
            starttime: self.starttime,
            yieldtime: self.yieldtime,
            order: self.order,
            smallsteps: self.smallsteps,
            number_of_steps: self.number_of_steps,
            number_of_first_order_steps: self.number_of_first_order_steps,
            recorded_min_timestep: self.recorded_min_timestep,
            recorded_max_timestep: self.recorded_max_timestep,
            quantities: self.quantities.clone(),
            monitor: self.monitor.clone(),
        }
    }

    /// Re-instate a snapshot taken from this domain (or an identically
    /// configured one).
    pub fn restore(&mut self, checkpoint: &CheckpointState) {
        self.time = checkpoint.time;
        self.starttime = checkpoint.starttime;
        self.yieldtime = checkpoint.yieldtime;
        self.order = checkpoint.order;
        self.smallsteps = checkpoint.smallsteps;
        self.number_of_steps = checkpoint.number_of_steps;
        self.number_of_first_order_steps = checkpoint.number_of_first_order_steps;
        self.recorded_min_timestep = checkpoint.recorded_min_timestep;
        self.recorded_max_timestep = checkpoint.recorded_max_timestep;
        self.quantities = checkpoint.quantities.clone();
        self.monitor = checkpoint.monitor.clone();
    }
}
