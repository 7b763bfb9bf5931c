// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! The 16384-entry slot table: the single source of truth for which
//! instance owns which slot, kept in sync with live `CLUSTER NODES`
//! output.
use crate::backend::{InstanceDirectory, Instance};
use crate::cluster::{parse_cluster_nodes, CLUSTER_SLOTS};
use crate::errors::CreationError;
use rand::seq::SliceRandom;
use std::rc::Rc;
use tracing::{info, warn};

pub struct RoutingTable {
    slots: Vec<Option<Rc<Instance>>>,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable { slots: vec![None; CLUSTER_SLOTS] }
    }

    pub fn get(&self, slot: u16) -> Option<Rc<Instance>> {
        self.slots[slot as usize].clone()
    }

    /// Reassigns one slot, maintaining each instance's `slots_held_count`.
    pub fn set_slot(&mut self, slot: u16, instance: Rc<Instance>) {
        if let Some(prev) = self.slots[slot as usize].take() {
            if Rc::ptr_eq(&prev, &instance) {
                self.slots[slot as usize] = Some(prev);
                return;
            }
            prev.decr_slots_held();
        }
        instance.incr_slots_held();
        self.slots[slot as usize] = Some(instance);
    }

    /// Randomly assigns every slot to one of `instances`, so the proxy
    /// can serve traffic before its first topology refresh completes.
    /// Per §9 Design Notes, incorrect initial routing self-heals via
    /// MOVED within one round trip per affected slot.
    pub fn randomize_initial(&mut self, instances: &[Rc<Instance>]) {
        if instances.is_empty() {
            return;
        }
        let mut rng = rand::thread_rng();
        for slot in 0..CLUSTER_SLOTS {
            let instance = instances.choose(&mut rng).expect("instances is non-empty").clone();
            self.set_slot(slot as u16, instance);
        }
    }

    /// Applies a `CLUSTER NODES` reply body: ensures an instance exists
    /// for every non-slave node line, assigns its listed slot ranges,
    /// and garbage-collects any instance left holding zero slots.
    /// Re-applying the same body is idempotent (assigning a slot to the
    /// instance it already points at is a no-op for slot counts).
    ///
    /// `originating` is the instance the `CLUSTER NODES` request was sent
    /// to. Per §4.D, a `myself` line's self-reported `ip:port` field is
    /// used by real cluster nodes that haven't been told their own
    /// externally-reachable address and so is unreliable (often blank or
    /// `0.0.0.0`); that line's slots are assigned to the originating
    /// instance directly rather than parsed from `addr`.
    pub fn apply_topology_refresh(
        &mut self, body: &str, directory: &InstanceDirectory, default_poolsize: usize, originating: &Rc<Instance>,
    ) -> Result<(), CreationError> {
        let lines = parse_cluster_nodes(body);
        let mut applied_nodes = 0usize;
        let mut applied_slots = 0usize;
        for line in &lines {
            if line.is_slave {
                continue;
            }
            let instance = if line.is_myself {
                originating.clone()
            } else {
                let (ip, port) = match line.addr.rsplit_once(':') {
                    Some((ip, port)) => match port.parse::<u16>() {
                        Ok(port) => (ip, port),
                        Err(_) => {
                            warn!(addr = %line.addr, "skipping cluster nodes line with unparseable port");
                            continue;
                        },
                    },
                    None => {
                        warn!(addr = %line.addr, "skipping cluster nodes line with malformed address");
                        continue;
                    },
                };
                directory.get_or_create(ip, port, default_poolsize)?
            };
            applied_nodes += 1;
            for (start, stop) in &line.slots {
                for slot in *start..=*stop {
                    self.set_slot(slot, instance.clone());
                    applied_slots += 1;
                }
            }
        }
        directory.gc_unused();
        info!(nodes = applied_nodes, slots = applied_slots, "applied topology refresh");
        Ok(())
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        RoutingTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_slot_updates_held_counts() {
        let a = Rc::new(Instance::new_for_test("a"));
        let b = Rc::new(Instance::new_for_test("b"));
        let mut table = RoutingTable::new();
        table.set_slot(5, a.clone());
        assert_eq!(a.slots_held_count(), 1);
        table.set_slot(5, b.clone());
        assert_eq!(a.slots_held_count(), 0);
        assert_eq!(b.slots_held_count(), 1);
    }

    #[test]
    fn reassigning_same_instance_is_a_noop() {
        let a = Rc::new(Instance::new_for_test("a"));
        let mut table = RoutingTable::new();
        table.set_slot(5, a.clone());
        table.set_slot(5, a.clone());
        assert_eq!(a.slots_held_count(), 1);
    }

    #[test]
    fn randomize_initial_assigns_every_slot() {
        let instances = vec![Rc::new(Instance::new_for_test("a")), Rc::new(Instance::new_for_test("b"))];
        let mut table = RoutingTable::new();
        table.randomize_initial(&instances);
        let total: usize = instances.iter().map(|i| i.slots_held_count()).sum();
        assert_eq!(total, CLUSTER_SLOTS);
        for slot in 0..CLUSTER_SLOTS {
            assert!(table.get(slot as u16).is_some());
        }
    }
}
