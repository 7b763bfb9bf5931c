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

//! Per-client command dispatch: routes one parsed command to one or
//! more backend links, follows MOVED/ASK redirection, coalesces
//! multi-key fan-out replies, and keeps each client's replies in strict
//! enqueue order regardless of which backend answers first.
use crate::backend::Instance;
use crate::cluster::key_hash_slot;
use crate::command::{self, Coalescer, MultiKeyShape, RouteKind};
use crate::errors::CreationError;
use crate::resp::Reply;
use crate::state::ProxyState;
use bytes::{Bytes, BytesMut};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};
use tokio::sync::mpsc;
use tracing::debug;

struct PendingReply {
    reply: RefCell<Option<Reply>>,
}

/// One connected client's identity and in-order reply queue. Cheap to
/// clone (a thin `Rc`); shared between the connection's read loop
/// (which calls [`dispatch`]) and every in-flight command's callback.
pub struct ClientState {
    pub id: usize,
    pub peer: String,
    name: RefCell<String>,
    fifo: RefCell<VecDeque<Rc<PendingReply>>>,
    write_tx: mpsc::UnboundedSender<Bytes>,
}

impl ClientState {
    pub fn new(id: usize, peer: String, write_tx: mpsc::UnboundedSender<Bytes>) -> Rc<ClientState> {
        Rc::new(ClientState { id, peer, name: RefCell::new(String::new()), fifo: RefCell::new(VecDeque::new()), write_tx })
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.borrow_mut() = name;
    }

    fn push_pending(&self) -> Rc<PendingReply> {
        let slot = Rc::new(PendingReply { reply: RefCell::new(None) });
        self.fifo.borrow_mut().push_back(slot.clone());
        slot
    }

    fn resolve(&self, slot: &Rc<PendingReply>, reply: Reply) {
        *slot.reply.borrow_mut() = Some(reply);
        self.drain();
    }

    /// Convenience for replies that are already known (local/no-route
    /// commands): enqueue and resolve in one step.
    fn push_resolved(&self, reply: Reply) {
        let slot = self.push_pending();
        self.resolve(&slot, reply);
    }

    /// Enqueues a client-facing protocol error. The connection driver
    /// calls this directly (bypassing [`dispatch`]) when the frame
    /// reader itself fails, then closes the connection once the reply
    /// has been written -- the `CLOSE_AFTER_REPLY` behavior from §7's
    /// error taxonomy.
    pub fn push_protocol_error(&self, message: impl Into<String>) {
        self.push_resolved(Reply::error(message.into()));
    }

    /// Writes every reply whose slot has resolved, in FIFO order,
    /// stopping at the first still-pending slot.
    fn drain(&self) {
        let mut out = BytesMut::new();
        {
            let mut fifo = self.fifo.borrow_mut();
            while let Some(front) = fifo.front() {
                if front.reply.borrow().is_none() {
                    break;
                }
                let slot = fifo.pop_front().expect("front just checked Some");
                let reply = slot.reply.borrow_mut().take().expect("checked is_some above");
                reply.encode(&mut out);
            }
        }
        if !out.is_empty() {
            // An unbounded send only fails if the writer task already
            // exited (client gone) -- replies are simply dropped, per
            // the client-death rule in §4.F.
            let _ = self.write_tx.send(out.freeze());
        }
    }
}

struct FanoutParent {
    coalescer: Coalescer,
    expected: usize,
    arrived: Cell<usize>,
    children: RefCell<Vec<Option<Reply>>>,
}

struct DispatchCtx {
    state: Rc<ProxyState>,
    client_id: usize,
    argv: Vec<Bytes>,
    redirects: Cell<usize>,
    ask_used: Cell<bool>,
    on_final: Box<dyn Fn(Reply)>,
}

/// Routes one client command. `argv[0]` selects a route via the static
/// command table; everything else follows from that. `inline` marks
/// requests that arrived as an inline command line rather than RESP
/// multibulk -- per §6, only no-route local commands may be sent that
/// way, since the first-key and fan-out routers assume multibulk argv.
pub fn dispatch(state: Rc<ProxyState>, client: Rc<ClientState>, argv: Vec<Bytes>, inline: bool) {
    if argv.is_empty() {
        return;
    }
    state.counters.command_processed();
    let spec = command::lookup(&argv[0]);
    if inline && spec.route != RouteKind::NoRoute {
        client.push_resolved(Reply::error("ERR Protocol error: inline commands are not supported for cluster-routed commands"));
        return;
    }
    match spec.route {
        RouteKind::NotSupported => client.push_resolved(Reply::error("ERR not supported")),
        RouteKind::NoRoute => {
            let reply = crate::admin::handle_local(&state, &client, &argv);
            client.push_resolved(reply);
        },
        RouteKind::Select => client.push_resolved(handle_select(&argv)),
        RouteKind::FirstKey => dispatch_first_key(state, client, argv),
        RouteKind::MultiKeyFanout => dispatch_fanout(state, client, argv, spec),
    }
}

fn handle_select(argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::error("ERR wrong number of arguments for 'select' command");
    }
    match argv[1].as_ref() {
        b"0" => Reply::ok(),
        _ => Reply::error("ERR SELECT is not allowed in cluster mode"),
    }
}

fn dispatch_first_key(state: Rc<ProxyState>, client: Rc<ClientState>, argv: Vec<Bytes>) {
    if argv.len() < 2 {
        client.push_resolved(Reply::error("ERR wrong number of arguments"));
        return;
    }
    let slot = key_hash_slot(&argv[1]);
    let instance = match state.routing_table.borrow().get(slot) {
        Some(i) => i,
        None => {
            client.push_resolved(Reply::error("ERR CLUSTERDOWN no instance serves this slot"));
            return;
        },
    };
    let pending = client.push_pending();
    let client_for_final = client.clone();
    let ctx = Rc::new(DispatchCtx {
        state,
        client_id: client.id,
        argv,
        redirects: Cell::new(0),
        ask_used: Cell::new(false),
        on_final: Box::new(move |reply| client_for_final.resolve(&pending, reply)),
    });
    dispatch_to_instance(ctx, instance);
}

fn dispatch_fanout(state: Rc<ProxyState>, client: Rc<ClientState>, argv: Vec<Bytes>, spec: command::CommandSpec) {
    let shape = spec.multi_shape.expect("multi-key fanout always carries a shape");
    let coalescer = spec.coalescer.expect("multi-key fanout always carries a coalescer");
    let cmd_name = argv[0].clone();
    let keys: Vec<(Bytes, Option<Bytes>)> = match shape {
        MultiKeyShape::Flat => argv[1..].iter().cloned().map(|k| (k, None)).collect(),
        MultiKeyShape::Pairs => {
            if argv.len() < 3 || (argv.len() - 1) % 2 != 0 {
                client.push_resolved(Reply::error("ERR wrong number of arguments for MSET"));
                return;
            }
            argv[1..].chunks(2).map(|pair| (pair[0].clone(), Some(pair[1].clone()))).collect()
        },
    };
    if keys.is_empty() {
        client.push_resolved(Reply::error("ERR wrong number of arguments"));
        return;
    }

    let n = keys.len();
    let parent = Rc::new(FanoutParent { coalescer, expected: n, arrived: Cell::new(0), children: RefCell::new(vec![None; n]) });
    let pending = client.push_pending();
    let client_for_children = client.clone();

    for (idx, (key, value)) in keys.into_iter().enumerate() {
        let mut child_argv = vec![cmd_name.clone(), key.clone()];
        if let Some(v) = value {
            child_argv.push(v);
        }
        let slot = key_hash_slot(&key);
        let instance = match state.routing_table.borrow().get(slot) {
            Some(i) => i,
            None => {
                record_child_reply(
                    &parent,
                    idx,
                    Reply::error("ERR CLUSTERDOWN no instance serves this slot"),
                    &client_for_children,
                    &pending,
                );
                continue;
            },
        };
        let parent_cl = parent.clone();
        let client_cl = client_for_children.clone();
        let pending_cl = pending.clone();
        let ctx = Rc::new(DispatchCtx {
            state: state.clone(),
            client_id: client.id,
            argv: child_argv,
            redirects: Cell::new(0),
            ask_used: Cell::new(false),
            on_final: Box::new(move |reply| record_child_reply(&parent_cl, idx, reply, &client_cl, &pending_cl)),
        });
        dispatch_to_instance(ctx, instance);
    }
}

fn record_child_reply(parent: &Rc<FanoutParent>, idx: usize, reply: Reply, client: &Rc<ClientState>, pending: &Rc<PendingReply>) {
    parent.children.borrow_mut()[idx] = Some(reply);
    let arrived = parent.arrived.get() + 1;
    parent.arrived.set(arrived);
    if arrived == parent.expected {
        let children: Vec<Reply> = parent.children.borrow_mut().drain(..).map(|r| r.expect("all children arrived")).collect();
        let final_reply = coalesce(parent.coalescer, children);
        client.resolve(pending, final_reply);
    }
}

fn coalesce(kind: Coalescer, children: Vec<Reply>) -> Reply {
    match kind {
        Coalescer::IntegerSum => {
            let mut sum: i64 = 0;
            for child in &children {
                match child {
                    Reply::Error(_) => return child.clone(),
                    Reply::Integer(n) => sum += n,
                    _ => return Reply::error("ERR unexpected reply type from server"),
                }
            }
            Reply::Integer(sum)
        },
        Coalescer::StatusAnd => {
            for child in &children {
                match child {
                    Reply::Error(_) => return child.clone(),
                    Reply::SimpleString(s) if s.as_ref() == b"OK" => continue,
                    _ => return Reply::error("ERR unexpected reply type from server"),
                }
            }
            Reply::ok()
        },
        Coalescer::ArrayConcat => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                match child {
                    Reply::Error(_) => return child,
                    Reply::Array(Some(mut items)) if items.len() == 1 => out.push(items.remove(0)),
                    _ => return Reply::error("ERR unexpected reply type from server"),
                }
            }
            Reply::Array(Some(out))
        },
    }
}

fn dispatch_to_instance(ctx: Rc<DispatchCtx>, instance: Rc<Instance>) {
    let link = instance.link_for_client(ctx.client_id);
    let argv = ctx.argv.clone();
    let ctx_cl = ctx.clone();
    link.enqueue_request(&argv, Box::new(move |reply| handle_backend_reply(ctx_cl, reply)));
}

fn handle_backend_reply(ctx: Rc<DispatchCtx>, reply: Reply) {
    if let Some(msg) = reply.as_error() {
        if let Some(rest) = strip_prefix(msg, b"MOVED ") {
            ctx.state.flag_topology_refresh();
            if let Some((_slot, addr)) = parse_redirect_target(rest) {
                if ctx.redirects.get() + 1 > ctx.state.redirect_max {
                    (ctx.on_final)(reply);
                    return;
                }
                match resolve_instance_for_redirect(&ctx.state, &addr) {
                    Ok(instance) => {
                        ctx.state.counters.redirect_handled();
                        ctx.redirects.set(ctx.redirects.get() + 1);
                        dispatch_to_instance(ctx, instance);
                        return;
                    },
                    Err(e) => {
                        debug!(addr = %addr, error = %e, "failed to resolve MOVED target");
                        (ctx.on_final)(reply);
                        return;
                    },
                }
            }
        } else if let Some(rest) = strip_prefix(msg, b"ASK ") {
            if ctx.ask_used.get() {
                (ctx.on_final)(reply);
                return;
            }
            if let Some((_slot, addr)) = parse_redirect_target(rest) {
                match resolve_instance_for_redirect(&ctx.state, &addr) {
                    Ok(instance) => {
                        ctx.state.counters.redirect_handled();
                        ctx.ask_used.set(true);
                        let asking_link = instance.link_for_client(ctx.client_id);
                        asking_link.enqueue_request(&[Bytes::from_static(b"ASKING")], Box::new(|_| {}));
                        dispatch_to_instance(ctx, instance);
                        return;
                    },
                    Err(e) => {
                        debug!(addr = %addr, error = %e, "failed to resolve ASK target");
                        (ctx.on_final)(reply);
                        return;
                    },
                }
            }
        }
    }
    (ctx.on_final)(reply);
}

fn strip_prefix<'a>(msg: &'a [u8], prefix: &[u8]) -> Option<&'a [u8]> {
    if msg.starts_with(prefix) {
        Some(&msg[prefix.len()..])
    } else {
        None
    }
}

fn parse_redirect_target(rest: &[u8]) -> Option<(u16, String)> {
    let s = std::str::from_utf8(rest).ok()?;
    let mut parts = s.trim().splitn(2, ' ');
    let slot_str = parts.next()?;
    let addr = parts.next()?;
    let slot = slot_str.parse::<u16>().ok()?;
    Some((slot, addr.trim().to_string()))
}

fn resolve_instance_for_redirect(state: &ProxyState, addr: &str) -> Result<Rc<Instance>, CreationError> {
    let (ip, port) =
        addr.rsplit_once(':').ok_or_else(|| CreationError::InvalidAddress(addr.to_string()))?;
    let port: u16 = port.parse().map_err(|_| CreationError::InvalidAddress(addr.to_string()))?;
    state.instance_directory.get_or_create(ip, port, state.pool_default_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_sum_propagates_first_error() {
        let children = vec![Reply::Integer(1), Reply::error("ERR boom"), Reply::Integer(2)];
        assert_eq!(coalesce(Coalescer::IntegerSum, children), Reply::error("ERR boom"));
    }

    #[test]
    fn integer_sum_adds_up_del_style_replies() {
        let children = vec![Reply::Integer(1), Reply::Integer(0), Reply::Integer(1)];
        assert_eq!(coalesce(Coalescer::IntegerSum, children), Reply::Integer(2));
    }

    #[test]
    fn status_and_requires_every_child_ok() {
        let children = vec![Reply::ok(), Reply::ok()];
        assert_eq!(coalesce(Coalescer::StatusAnd, children), Reply::ok());
        let children = vec![Reply::ok(), Reply::error("ERR no")];
        assert_eq!(coalesce(Coalescer::StatusAnd, children), Reply::error("ERR no"));
    }

    #[test]
    fn array_concat_flattens_single_element_children_in_order() {
        let children = vec![
            Reply::Array(Some(vec![Reply::bulk(Bytes::from_static(b"1"))])),
            Reply::Array(Some(vec![Reply::bulk(Bytes::from_static(b"2"))])),
            Reply::Array(Some(vec![Reply::bulk(Bytes::from_static(b"3"))])),
        ];
        let result = coalesce(Coalescer::ArrayConcat, children);
        assert_eq!(
            result,
            Reply::Array(Some(vec![
                Reply::bulk(Bytes::from_static(b"1")),
                Reply::bulk(Bytes::from_static(b"2")),
                Reply::bulk(Bytes::from_static(b"3")),
            ]))
        );
    }

    #[test]
    fn parses_moved_and_ask_redirect_targets() {
        assert_eq!(parse_redirect_target(b"12539 10.0.0.2:6379"), Some((12539, "10.0.0.2:6379".to_string())));
        assert_eq!(parse_redirect_target(b"77 10.0.0.2:6379"), Some((77, "10.0.0.2:6379".to_string())));
        assert_eq!(parse_redirect_target(b"not-a-slot 10.0.0.2:6379"), None);
    }

    #[test]
    fn strip_prefix_requires_trailing_space() {
        assert_eq!(strip_prefix(b"MOVED 1 1.2.3.4:6379", b"MOVED "), Some(&b"1 1.2.3.4:6379"[..]));
        assert_eq!(strip_prefix(b"MOVEDX 1 1.2.3.4:6379", b"MOVED "), None);
    }
}
