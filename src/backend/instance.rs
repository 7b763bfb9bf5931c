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

//! One backend Redis node: its name, a fixed-size pool of links, and the
//! slot count that decides whether the instance is still in service.
use crate::backend::link::BackendLink;
use crate::errors::CreationError;
use std::{
    cell::{Cell, RefCell},
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};
use tracing::info;

pub struct Instance {
    name: String,
    ip: String,
    port: u16,
    addr: SocketAddr,
    auth_pass: RefCell<Option<String>>,
    pool: RefCell<Vec<BackendLink>>,
    slots_held_count: Cell<usize>,
}

impl Instance {
    /// Resolves `ip:port` synchronously and opens `poolsize` links to it.
    /// Resolution failure and a zero poolsize are both `CreationError`s --
    /// neither is recoverable by retrying the same call.
    pub fn new(ip: String, port: u16, poolsize: usize, auth_pass: Option<String>) -> Result<Instance, CreationError> {
        let name = format!("{}:{}", ip, port);
        if poolsize == 0 {
            return Err(CreationError::InvalidResource(format!("pool size must be nonzero for {}", name)));
        }
        let addr = resolve(&ip, port)?;
        let pool = (0..poolsize).map(|_| BackendLink::connect(addr, name.clone(), auth_pass.clone())).collect();
        info!(instance = %name, poolsize, "instance created");
        Ok(Instance {
            name,
            ip,
            port,
            addr,
            auth_pass: RefCell::new(auth_pass),
            pool: RefCell::new(pool),
            slots_held_count: Cell::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn poolsize(&self) -> usize {
        self.pool.borrow().len()
    }

    /// Deterministic pool member for a given client id, so a client's
    /// pipelined commands stay ordered on one backend connection.
    pub fn link_for_client(&self, client_id: usize) -> BackendLink {
        let pool = self.pool.borrow();
        pool[client_id % pool.len()].clone()
    }

    pub fn connected_num(&self) -> usize {
        self.pool.borrow().iter().filter(|l| l.is_healthy()).count()
    }

    pub fn disconnected_num(&self) -> usize {
        self.poolsize() - self.connected_num()
    }

    pub fn pending_commands(&self) -> Vec<usize> {
        self.pool.borrow().iter().map(|l| l.pending_commands()).collect()
    }

    pub fn auth_pass(&self) -> Option<String> {
        self.auth_pass.borrow().clone()
    }

    pub fn set_auth_pass(&self, pass: Option<String>) {
        *self.auth_pass.borrow_mut() = pass;
    }

    pub fn slots_held_count(&self) -> usize {
        self.slots_held_count.get()
    }

    pub fn incr_slots_held(&self) {
        self.slots_held_count.set(self.slots_held_count.get() + 1);
    }

    pub fn decr_slots_held(&self) {
        self.slots_held_count.set(self.slots_held_count.get().saturating_sub(1));
    }

    /// Flat recovery-period reconnect policy: replace any link that has
    /// been `Errored` for at least `recovery_period`. Every link in the
    /// pool is checked on every tick, regardless of whether an earlier
    /// link in the pool was or wasn't eligible.
    pub fn run_reconnect_tick(&self, recovery_period: Duration) {
        let mut pool = self.pool.borrow_mut();
        for slot in pool.iter_mut() {
            if let Some(dur) = slot.errored_duration() {
                if dur >= recovery_period {
                    info!(instance = %self.name, "reconnecting errored backend link");
                    *slot = BackendLink::connect(self.addr, self.name.clone(), self.auth_pass.borrow().clone());
                }
            }
        }
    }
}

fn resolve(ip: &str, port: u16) -> Result<SocketAddr, CreationError> {
    (ip, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| CreationError::InvalidAddress(format!("{}:{}", ip, port)))
}

#[cfg(test)]
impl Instance {
    /// Builds an instance with no live links, for tests that only
    /// exercise slot-count bookkeeping and don't want to open sockets
    /// or need a tokio `LocalSet` in scope.
    pub fn new_for_test(name: &str) -> Instance {
        Instance {
            name: name.to_string(),
            ip: name.to_string(),
            port: 0,
            addr: "127.0.0.1:1".parse().unwrap(),
            auth_pass: RefCell::new(None),
            pool: RefCell::new(Vec::new()),
            slots_held_count: Cell::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_poolsize() {
        let err = Instance::new("127.0.0.1".to_string(), 6379, 0, None);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_unresolvable_host() {
        let err = resolve("this-host-does-not-exist.invalid", 6379);
        assert!(err.is_err());
    }

    #[test]
    fn test_instance_tracks_slot_count() {
        let inst = Instance::new_for_test("a");
        assert_eq!(inst.slots_held_count(), 0);
        inst.incr_slots_held();
        assert_eq!(inst.slots_held_count(), 1);
        inst.decr_slots_held();
        assert_eq!(inst.slots_held_count(), 0);
    }
}
