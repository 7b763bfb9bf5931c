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

//! The sole owner of every `Instance`, keyed by `ip:port`. The routing
//! table only ever holds `Rc` clones handed out by this directory; it
//! never constructs or frees an instance itself.
use crate::backend::instance::Instance;
use crate::errors::CreationError;
use fnv::FnvHashMap;
use std::{cell::RefCell, rc::Rc};
use tracing::info;

#[derive(Default)]
pub struct InstanceDirectory {
    instances: RefCell<FnvHashMap<String, Rc<Instance>>>,
}

impl InstanceDirectory {
    pub fn new() -> InstanceDirectory {
        InstanceDirectory { instances: RefCell::new(FnvHashMap::default()) }
    }

    pub fn get(&self, name: &str) -> Option<Rc<Instance>> {
        self.instances.borrow().get(name).cloned()
    }

    /// Creates a new instance at `ip:port`, returning `AlreadyExists` if
    /// one is already registered under that name (the `PROXY ROUTER`
    /// "Duplicated" error case).
    pub fn create(&self, ip: &str, port: u16, poolsize: usize, auth_pass: Option<String>) -> Result<Rc<Instance>, CreationError> {
        let name = format!("{}:{}", ip, port);
        if self.get(&name).is_some() {
            return Err(CreationError::AlreadyExists(name));
        }
        let instance = Rc::new(Instance::new(ip.to_string(), port, poolsize, auth_pass)?);
        self.instances.borrow_mut().insert(name, instance.clone());
        Ok(instance)
    }

    /// Returns the existing instance at `ip:port`, or creates one with
    /// `poolsize` links -- used by topology refresh, which doesn't care
    /// whether the node was already known.
    pub fn get_or_create(&self, ip: &str, port: u16, poolsize: usize) -> Result<Rc<Instance>, CreationError> {
        let name = format!("{}:{}", ip, port);
        if let Some(existing) = self.get(&name) {
            return Ok(existing);
        }
        let instance = Rc::new(Instance::new(ip.to_string(), port, poolsize, None)?);
        self.instances.borrow_mut().insert(name, instance.clone());
        Ok(instance)
    }

    pub fn remove(&self, name: &str) -> Option<Rc<Instance>> {
        self.instances.borrow_mut().remove(name)
    }

    pub fn len(&self) -> usize {
        self.instances.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.borrow().is_empty()
    }

    /// All registered instances, in directory iteration order -- used by
    /// `PROXY INSTANCES` and `PROXY INFO proxy`'s `masterN` lines.
    pub fn all(&self) -> Vec<Rc<Instance>> {
        self.instances.borrow().values().cloned().collect()
    }

    /// Drops every instance holding zero slots. Called after applying a
    /// topology refresh, per §4.D.
    pub fn gc_unused(&self) {
        let mut instances = self.instances.borrow_mut();
        let before = instances.len();
        instances.retain(|_, inst| inst.slots_held_count() > 0);
        let removed = before - instances.len();
        if removed > 0 {
            info!(removed, "garbage-collected instances with zero slots");
        }
    }
}
