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

//! Process entry point. Loads the proxy-directive config file and the
//! layered runtime settings, builds the single owning [`ProxyState`],
//! then runs the client accept loop and the before-sleep/reconnect
//! ticks to completion on a single-threaded Tokio runtime -- the whole
//! proxy is designed to run on one cooperative event loop (§5), so
//! every task here is `spawn_local` against one `LocalSet`.
mod admin;
mod backend;
mod cluster;
mod command;
mod config;
mod errors;
mod eventloop;
mod metrics;
mod resp;
mod routing;
mod service;
mod state;

use bytes::{Bytes, BytesMut};
use clap::Parser;
use config::{ProxyDirectives, RuntimeSettings};
use resp::{groom_buffer, read_client_frame, RespReader};
use service::{dispatch, ClientState};
use socket2::{Domain, Protocol, Socket, Type};
use state::ProxyState;
use std::{io, net::SocketAddr, path::PathBuf, process, rc::Rc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::LocalSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "slotproxy", about = "cluster-aware RESP proxy")]
struct Cli {
    /// Path to the proxy directive file (`proxy myid`/`proxy router`/`proxy auth-pass`).
    #[arg(long, default_value = "proxy.conf")]
    config: PathBuf,

    /// Optional TOML/JSON file of process-level runtime settings.
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let settings = match RuntimeSettings::load(cli.settings.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fatal: {}", e);
            process::exit(1);
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_new(&settings.log_level).unwrap_or_default())
        .init();

    // A missing or non-writable config file is the one fatal startup
    // condition per §6/§7; everything past this point is recoverable.
    let directives = match ProxyDirectives::load(&cli.config) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to load proxy config");
            process::exit(1);
        },
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("fatal: failed to build tokio runtime: {}", e);
            process::exit(1);
        },
    };
    let local = LocalSet::new();
    let exit_code = local.block_on(&runtime, run(cli.config, directives, settings));
    process::exit(exit_code);
}

async fn run(config_path: PathBuf, directives: ProxyDirectives, settings: RuntimeSettings) -> i32 {
    let listen_addr = settings.listen_addr.clone();
    let pool_default_size = settings.pool_default_size;

    let state = match ProxyState::new(config_path, directives, settings) {
        Ok(s) => Rc::new(s),
        Err(e) => {
            error!(error = %e, "failed to build proxy state");
            return 1;
        },
    };

    let routers = state.directives().routers();
    let auth_passes = state.directives().auth_passes();
    for router in routers {
        let auth_pass =
            auth_passes.iter().find(|a| a.host == router.host && a.port == router.port).map(|a| a.password.clone());
        let poolsize = router.poolsize.unwrap_or(pool_default_size);
        if let Err(e) = state.instance_directory.create(&router.host, router.port, poolsize, auth_pass) {
            warn!(host = %router.host, port = router.port, error = %e, "failed to create configured instance");
        }
    }

    let initial = state.instance_directory.all();
    if initial.is_empty() {
        warn!("starting with no configured backend instances; routed commands reply CLUSTERDOWN until `PROXY ROUTER` adds one");
    } else {
        state.routing_table.borrow_mut().randomize_initial(&initial);
    }

    let listener = match bind_listener(&listen_addr) {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %listen_addr, error = %e, "failed to bind listener");
            return 1;
        },
    };
    info!(addr = %listen_addr, myid = %state.myid, "slotproxy listening");

    let shutdown = CancellationToken::new();
    tokio::task::spawn_local(watch_for_shutdown_signal(shutdown.clone()));
    tokio::task::spawn_local(run_ticks(state.clone(), shutdown.clone()));

    let mut next_client_id: usize = 0;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown signal received, closing listener");
                break;
            },
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "failed to accept client connection");
                        continue;
                    },
                };
                let client_id = next_client_id;
                next_client_id = next_client_id.wrapping_add(1);
                state.counters.client_connected();
                let state_for_client = state.clone();
                tokio::task::spawn_local(async move {
                    handle_client(state_for_client.clone(), socket, peer, client_id).await;
                    state_for_client.counters.client_disconnected();
                });
            },
        }
    }

    // Per §6's exit-code contract: a normal SHUTDOWN (here, a caught
    // termination signal rather than the rejected RESP `SHUTDOWN`
    // command) exits zero.
    0
}

/// Builds the front-end listener with `SO_REUSEADDR`/`SO_REUSEPORT`
/// (the latter on Unix only), matching the reuse policy the base
/// server's own listener setup uses before handing the socket to Tokio.
fn bind_listener(addr_str: &str) -> io::Result<TcpListener> {
    let addr: SocketAddr =
        addr_str.parse().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid listen address"))?;
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

async fn watch_for_shutdown_signal(shutdown: CancellationToken) {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            return;
        },
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    shutdown.cancel();
}

/// The process-wide tick that drives component G: a flagged-and-due
/// topology refresh, a dirty-config flush, and every instance's
/// reconnect policy.
async fn run_ticks(state: Rc<ProxyState>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                eventloop::run_before_sleep(state.clone());
                eventloop::run_reconnect_tick(&state);
            },
        }
    }
}

/// Drives one client connection end to end: reads frames, routes them
/// through [`dispatch`], and relays replies written to the client's FIFO
/// back out over the socket in order. A protocol error on the client
/// link replies once with the offending error and then closes the
/// connection (`CLOSE_AFTER_REPLY`, per §7).
async fn handle_client(state: Rc<ProxyState>, socket: TcpStream, peer: SocketAddr, client_id: usize) {
    let _ = socket.set_nodelay(true);
    let (mut read_half, mut write_half) = socket.into_split();
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Bytes>();
    let client = ClientState::new(client_id, peer.to_string(), write_tx);

    // Detached, not aborted: a protocol-error reply queued right before
    // the read loop exits still needs to reach the socket, and an
    // in-flight backend command may hold its own clone of `client` (and
    // so the channel's sender) past this function's return. The task
    // exits on its own once every clone is dropped and the channel closes.
    tokio::task::spawn_local(async move {
        while let Some(chunk) = write_rx.recv().await {
            if write_half.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(16 * 1024);
    let mut reader = RespReader::new();

    'outer: loop {
        loop {
            match read_client_frame(&mut reader, &mut buf) {
                Ok(Some(frame)) => {
                    if !frame.argv.is_empty() {
                        dispatch(state.clone(), client.clone(), frame.argv, frame.inline);
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    client.push_protocol_error(format!("ERR {}", e));
                    break 'outer;
                },
            }
        }
        groom_buffer(&mut buf);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(peer = %peer, error = %e, "client read failed");
                break;
            },
        }
    }

    drop(client);
}
