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

//! Process-wide counters, sampled by `PROXY INFO` and useful for an
//! external statsd/hotmic sink. Kept deliberately small: this proxy is
//! single-threaded, so a handful of `Cell<u64>` counters behind one
//! `Rc` is all the bookkeeping the before-sleep hook and admin surface need.
use std::cell::Cell;

#[derive(Debug, Default)]
pub struct Counters {
    pub total_connections_received: Cell<u64>,
    pub connected_clients: Cell<u64>,
    pub total_commands_processed: Cell<u64>,
    pub redirects_handled: Cell<u64>,
    pub topology_refreshes: Cell<u64>,
}

impl Counters {
    pub fn new() -> Counters {
        Counters::default()
    }

    pub fn client_connected(&self) {
        self.total_connections_received.set(self.total_connections_received.get() + 1);
        self.connected_clients.set(self.connected_clients.get() + 1);
    }

    pub fn client_disconnected(&self) {
        self.connected_clients.set(self.connected_clients.get().saturating_sub(1));
    }

    pub fn command_processed(&self) {
        self.total_commands_processed.set(self.total_commands_processed.get() + 1);
    }

    pub fn redirect_handled(&self) {
        self.redirects_handled.set(self.redirects_handled.get() + 1);
    }

    pub fn topology_refreshed(&self) {
        self.topology_refreshes.set(self.topology_refreshes.get() + 1);
    }
}
