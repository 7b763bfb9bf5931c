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

//! One non-blocking TCP connection to one backend instance: write queue,
//! callback FIFO, and the RESP reader that drives it. A link never
//! blocks its caller -- `connect` spawns the connection attempt and
//! returns a handle immediately, and `enqueue_request` succeeds even
//! against a link that is mid-failure, by invoking the callback with a
//! cached error reply instead of rejecting the call.
use crate::resp::{encode_request, groom_buffer, Reply, RespReader};
use bytes::{Bytes, BytesMut};
use std::{
    cell::Cell,
    collections::VecDeque,
    net::SocketAddr,
    rc::Rc,
    time::Instant,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use tracing::{debug, warn};

/// A reply callback. Always invoked exactly once, with either the real
/// backend reply or a synthesized error if the link died first.
pub type Callback = Box<dyn FnOnce(Reply)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Errored,
    ClosingLazy,
}

enum LinkMsg {
    Send(Bytes, Callback),
    CloseLazy,
}

/// Handle to a backend link's background task. Cheap to clone (it's a
/// thin `Rc`), and every method is non-blocking.
#[derive(Clone)]
pub struct BackendLink {
    inner: Rc<LinkShared>,
}

struct LinkShared {
    name: String,
    tx: mpsc::UnboundedSender<LinkMsg>,
    state: Cell<LinkState>,
    connect_started_at: Cell<Instant>,
    pending_commands: Cell<usize>,
}

impl BackendLink {
    /// Begins connecting to `addr` and returns a handle immediately; the
    /// connection attempt, AUTH/SETNAME preamble, and the read/write loop
    /// all happen in a spawned local task.
    pub fn connect(addr: SocketAddr, name: String, auth_pass: Option<String>) -> BackendLink {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Rc::new(LinkShared {
            name: name.clone(),
            tx,
            state: Cell::new(LinkState::Connecting),
            connect_started_at: Cell::new(Instant::now()),
            pending_commands: Cell::new(0),
        });

        let task_shared = shared.clone();
        tokio::task::spawn_local(async move {
            run_link(addr, name, auth_pass, rx, task_shared).await;
        });

        BackendLink { inner: shared }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> LinkState {
        self.inner.state.get()
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.state.get() == LinkState::Connected
    }

    pub fn errored_duration(&self) -> Option<std::time::Duration> {
        match self.inner.state.get() {
            LinkState::Errored => Some(Instant::now().saturating_duration_since(self.inner.connect_started_at.get())),
            _ => None,
        }
    }

    pub fn pending_commands(&self) -> usize {
        self.inner.pending_commands.get()
    }

    /// Appends a request to the write queue and the callback FIFO. This
    /// never fails outright: a dead link's send just bounces straight to
    /// `callback` with a synthesized error, satisfying the FIFO contract
    /// without the caller having to special-case link health. This
    /// includes the case where the link's task has already exited (and
    /// dropped its receiver) -- the callback would otherwise be silently
    /// lost instead of firing with the link's cached error reply.
    pub fn enqueue_request(&self, args: &[Bytes], callback: Callback) {
        let mut buf = BytesMut::new();
        encode_request(&mut buf, args);
        self.inner.pending_commands.set(self.inner.pending_commands.get() + 1);
        if let Err(mpsc::error::SendError(msg)) = self.inner.tx.send(LinkMsg::Send(buf.freeze(), callback)) {
            self.inner.pending_commands.set(self.inner.pending_commands.get().saturating_sub(1));
            if let LinkMsg::Send(_, cb) = msg {
                cb(Reply::error(format!("ERR could not connect to {}", self.inner.name)));
            }
        }
    }

    /// Marks the link for release once every outstanding callback has
    /// fired; does not interrupt in-flight requests.
    pub fn close_lazy(&self) {
        self.inner.state.set(LinkState::ClosingLazy);
        let _ = self.inner.tx.send(LinkMsg::CloseLazy);
    }
}

async fn run_link(
    addr: SocketAddr, name: String, auth_pass: Option<String>, mut rx: mpsc::UnboundedReceiver<LinkMsg>,
    shared: Rc<LinkShared>,
) {
    let stream = match TcpStream::connect(addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(link = %name, error = %e, "backend connect failed");
            shared.state.set(LinkState::Errored);
            shared.connect_started_at.set(Instant::now());
            drain_pending(&mut rx, Reply::error(format!("ERR could not connect to {}", name)));
            return;
        },
    };

    shared.state.set(LinkState::Connected);
    debug!(link = %name, "backend connected");

    let (mut read_half, mut write_half) = stream.into_split();
    let mut callbacks: VecDeque<Callback> = VecDeque::new();

    // Preamble: AUTH (if configured) and CLIENT SETNAME, both with no-op
    // callbacks so they consume their reply without disturbing the FIFO
    // of real command replies that follow. Each pushes onto `callbacks`
    // outside `enqueue_request`, so `pending_commands` is bumped here too
    // -- otherwise the read loop's per-reply decrement below would run
    // ahead of anything ever incrementing it for these two replies.
    let mut preamble = BytesMut::new();
    if let Some(pass) = auth_pass {
        encode_request(&mut preamble, &[Bytes::from_static(b"AUTH"), Bytes::from(pass.into_bytes())]);
        callbacks.push_back(Box::new(|_| {}));
        shared.pending_commands.set(shared.pending_commands.get() + 1);
    }
    let setname = format!("proxy-{}", name);
    encode_request(
        &mut preamble,
        &[Bytes::from_static(b"CLIENT"), Bytes::from_static(b"SETNAME"), Bytes::from(setname.into_bytes())],
    );
    callbacks.push_back(Box::new(|_| {}));
    shared.pending_commands.set(shared.pending_commands.get() + 1);
    if let Err(e) = write_half.write_all(&preamble).await {
        warn!(link = %name, error = %e, "backend preamble write failed");
        shared.state.set(LinkState::Errored);
        shared.connect_started_at.set(Instant::now());
        drain_all(&mut rx, &mut callbacks, Reply::error("ERR backend connection lost"));
        return;
    }

    let mut read_buf = BytesMut::with_capacity(16 * 1024);
    let mut reader = RespReader::new();
    let mut closing = false;
    let mut write_buf = BytesMut::new();

    'outer: loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(LinkMsg::Send(bytes, cb)) => {
                        write_buf.extend_from_slice(&bytes);
                        callbacks.push_back(cb);
                        // Batch every request already queued before issuing
                        // the write syscall -- the same "drain before sleep"
                        // discipline the link's write path is specified to use.
                        while let Ok(next) = rx.try_recv() {
                            match next {
                                LinkMsg::Send(more, cb2) => {
                                    write_buf.extend_from_slice(&more);
                                    callbacks.push_back(cb2);
                                },
                                LinkMsg::CloseLazy => closing = true,
                            }
                        }
                        if let Err(e) = write_half.write_all(&write_buf).await {
                            warn!(link = %name, error = %e, "backend write failed");
                            shared.state.set(LinkState::Errored);
                            shared.connect_started_at.set(Instant::now());
                            break 'outer;
                        }
                        write_buf.clear();
                    },
                    Some(LinkMsg::CloseLazy) => {
                        closing = true;
                        if callbacks.is_empty() {
                            return;
                        }
                    },
                    None => break 'outer,
                }
            },
            result = read_half.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        warn!(link = %name, "backend closed connection");
                        shared.state.set(LinkState::Errored);
                        shared.connect_started_at.set(Instant::now());
                        break 'outer;
                    },
                    Ok(_n) => {
                        loop {
                            match reader.parse_one(&mut read_buf) {
                                Ok(Some(reply)) => {
                                    if let Some(cb) = callbacks.pop_front() {
                                        shared.pending_commands.set(shared.pending_commands.get().saturating_sub(1));
                                        cb(reply);
                                    }
                                    if closing && callbacks.is_empty() {
                                        return;
                                    }
                                },
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(link = %name, error = %e, "backend protocol error");
                                    shared.state.set(LinkState::Errored);
                                    shared.connect_started_at.set(Instant::now());
                                    break 'outer;
                                },
                            }
                        }
                        groom_buffer(&mut read_buf);
                    },
                    Err(e) => {
                        warn!(link = %name, error = %e, "backend read failed");
                        shared.state.set(LinkState::Errored);
                        shared.connect_started_at.set(Instant::now());
                        break 'outer;
                    },
                }
            },
        }
    }

    drain_all(&mut rx, &mut callbacks, Reply::error("ERR backend connection lost"));
}

fn drain_all(rx: &mut mpsc::UnboundedReceiver<LinkMsg>, callbacks: &mut VecDeque<Callback>, err: Reply) {
    while let Some(cb) = callbacks.pop_front() {
        cb(err.clone());
    }
    drain_pending(rx, err);
}

fn drain_pending(rx: &mut mpsc::UnboundedReceiver<LinkMsg>, err: Reply) {
    while let Ok(msg) = rx.try_recv() {
        if let LinkMsg::Send(_, cb) = msg {
            cb(err.clone());
        }
    }
}
