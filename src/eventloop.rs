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

//! Component G: the before-sleep hook and the separate periodic tick.
//! The per-link write batching described in §4.B/§4.G happens inside
//! each [`crate::backend::link`] task itself (it drains every request
//! already queued before issuing its write syscall), so what's left for
//! the process-wide tick is exactly what §4.G describes beyond that:
//! running a flagged-and-due topology refresh, flushing a dirty config,
//! and driving each instance's reconnect policy.
use crate::backend::Instance;
use crate::resp::Reply;
use crate::state::ProxyState;
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::rc::Rc;
use tracing::{error, warn};

/// Runs once per tick: applies a topology refresh if one is both
/// flagged and outside the rate-limit window, and flushes the on-disk
/// config if an admin command marked it dirty.
pub fn run_before_sleep(state: Rc<ProxyState>) {
    if state.take_topology_refresh_due() {
        trigger_topology_refresh(state.clone());
    }
    if state.is_config_dirty() {
        if let Err(e) = state.flush_config() {
            error!(error = %e, "failed to flush proxy config");
        }
    }
}

/// Runs each instance's flat recovery-period reconnect policy. Every
/// link in every pool is checked on every tick regardless of whether an
/// earlier link was or wasn't eligible, per SPEC_FULL.md's open-question
/// resolution for the original's early-return bug.
pub fn run_reconnect_tick(state: &ProxyState) {
    for instance in state.instance_directory.all() {
        instance.run_reconnect_tick(state.reconnect_period);
    }
}

/// Picks an arbitrary connected instance, sends it `CLUSTER NODES`, and
/// applies the reply to the routing table once it arrives.
fn trigger_topology_refresh(state: Rc<ProxyState>) {
    let candidates: Vec<Rc<Instance>> =
        state.instance_directory.all().into_iter().filter(|i| i.connected_num() > 0).collect();
    let instance = match candidates.choose(&mut rand::thread_rng()) {
        Some(i) => i.clone(),
        None => {
            warn!("topology refresh skipped: no connected instance available");
            return;
        },
    };
    let link = instance.link_for_client(0);
    let originating = instance.clone();
    link.enqueue_request(
        &[Bytes::from_static(b"CLUSTER"), Bytes::from_static(b"NODES")],
        Box::new(move |reply| apply_refresh_reply(state, reply, originating)),
    );
}

fn apply_refresh_reply(state: Rc<ProxyState>, reply: Reply, originating: Rc<Instance>) {
    let body = match reply {
        Reply::BulkString(Some(b)) => b,
        Reply::Error(e) => {
            warn!(error = %String::from_utf8_lossy(&e), "CLUSTER NODES refresh failed");
            return;
        },
        other => {
            warn!(reply = %other, "unexpected CLUSTER NODES reply shape");
            return;
        },
    };
    let text = String::from_utf8_lossy(&body).into_owned();
    let result = {
        let mut table = state.routing_table.borrow_mut();
        table.apply_topology_refresh(&text, &state.instance_directory, state.pool_default_size, &originating)
    };
    match result {
        Ok(()) => state.counters.topology_refreshed(),
        Err(e) => error!(error = %e, "failed to apply topology refresh"),
    }
}
