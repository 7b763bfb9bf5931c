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

//! The single owning struct for everything the event loop touches:
//! config, slot table, instance directory, and counters. Constructed
//! once at startup, mutated only from the current-thread runtime, torn
//! down at shutdown.
use crate::backend::InstanceDirectory;
use crate::config::{ProxyDirectives, RuntimeSettings};
use crate::errors::CreationError;
use crate::metrics::Counters;
use crate::routing::RoutingTable;
use std::{
    cell::{Cell, RefCell},
    time::{Duration, Instant},
};

pub struct ProxyState {
    pub myid: String,
    pub routing_table: RefCell<RoutingTable>,
    pub instance_directory: InstanceDirectory,
    pub counters: Counters,
    pub redirect_max: usize,
    pub pool_default_size: usize,
    pub update_slots_min_limit: Duration,
    pub reconnect_period: Duration,
    pub listen_addr: String,
    pub config_path: std::path::PathBuf,
    directives: RefCell<ProxyDirectives>,
    topology_refresh_needed: Cell<bool>,
    last_topology_refresh: Cell<Instant>,
    config_dirty: Cell<bool>,
}

impl ProxyState {
    pub fn new(
        config_path: std::path::PathBuf, directives: ProxyDirectives, settings: RuntimeSettings,
    ) -> Result<ProxyState, CreationError> {
        let myid = directives.myid();
        Ok(ProxyState {
            myid,
            routing_table: RefCell::new(RoutingTable::new()),
            instance_directory: InstanceDirectory::new(),
            counters: Counters::new(),
            redirect_max: settings.redirect_max_limit,
            pool_default_size: settings.pool_default_size,
            update_slots_min_limit: Duration::from_millis(settings.update_slots_min_limit_ms),
            reconnect_period: Duration::from_millis(settings.reconnect_period_ms),
            listen_addr: settings.listen_addr,
            config_path,
            directives: RefCell::new(directives),
            topology_refresh_needed: Cell::new(false),
            last_topology_refresh: Cell::new(Instant::now() - Duration::from_secs(3600)),
            config_dirty: Cell::new(false),
        })
    }

    pub fn flag_topology_refresh(&self) {
        self.topology_refresh_needed.set(true);
    }

    pub fn mark_config_dirty(&self) {
        self.config_dirty.set(true);
    }

    pub fn is_config_dirty(&self) -> bool {
        self.config_dirty.get()
    }

    /// True if a refresh is both flagged and outside the rate-limit
    /// window; clears the flag as a side effect, per §4.G's fixed
    /// before-sleep ordering (a later step must never re-flag an
    /// earlier one within the same tick).
    pub fn take_topology_refresh_due(&self) -> bool {
        if !self.topology_refresh_needed.get() {
            return false;
        }
        if self.last_topology_refresh.get().elapsed() < self.update_slots_min_limit {
            return false;
        }
        self.topology_refresh_needed.set(false);
        self.last_topology_refresh.set(Instant::now());
        true
    }

    pub fn directives(&self) -> std::cell::Ref<'_, ProxyDirectives> {
        self.directives.borrow()
    }

    pub fn directives_mut(&self) -> std::cell::RefMut<'_, ProxyDirectives> {
        self.directives.borrow_mut()
    }

    /// `PROXY FLUSHCONFIG`: persists the directive file and clears the
    /// dirty flag.
    pub fn flush_config(&self) -> Result<(), CreationError> {
        self.directives.borrow().persist()?;
        self.config_dirty.set(false);
        Ok(())
    }
}
