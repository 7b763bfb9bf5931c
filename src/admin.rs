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

//! Handlers for every no-route (locally answered) command: the small
//! Redis-compatible surface (PING/ECHO/AUTH/TIME/COMMAND/WAIT/HELLO/
//! RESET/CLIENT) plus the `PROXY` admin command family.
use crate::resp::Reply;
use crate::service::ClientState;
use crate::state::ProxyState;
use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn handle_local(state: &ProxyState, client: &ClientState, argv: &[Bytes]) -> Reply {
    let cmd = argv[0].to_ascii_uppercase();
    match cmd.as_slice() {
        b"PING" => handle_ping(argv),
        b"ECHO" => handle_echo(argv),
        b"AUTH" => Reply::error("ERR Client sent AUTH, but no password is set"),
        b"TIME" => handle_time(),
        b"COMMAND" => Reply::Array(Some(Vec::new())),
        b"WAIT" => Reply::Integer(0),
        b"HELLO" => handle_hello(state),
        b"RESET" => Reply::SimpleString(Bytes::from_static(b"RESET")),
        b"CLIENT" => handle_client(client, argv),
        b"PROXY" => handle_proxy(state, argv),
        _ => Reply::error(format!("ERR unknown command '{}'", String::from_utf8_lossy(&argv[0]))),
    }
}

fn handle_ping(argv: &[Bytes]) -> Reply {
    match argv.len() {
        1 => Reply::SimpleString(Bytes::from_static(b"PONG")),
        2 => Reply::bulk(argv[1].clone()),
        _ => Reply::error("ERR wrong number of arguments for 'ping' command"),
    }
}

fn handle_echo(argv: &[Bytes]) -> Reply {
    if argv.len() != 2 {
        return Reply::error("ERR wrong number of arguments for 'echo' command");
    }
    Reply::bulk(argv[1].clone())
}

fn handle_time() -> Reply {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    Reply::Array(Some(vec![
        Reply::bulk(Bytes::from(now.as_secs().to_string())),
        Reply::bulk(Bytes::from(now.subsec_micros().to_string())),
    ]))
}

fn handle_hello(state: &ProxyState) -> Reply {
    let fields = vec![
        Reply::bulk(Bytes::from_static(b"server")),
        Reply::bulk(Bytes::from_static(b"redis")),
        Reply::bulk(Bytes::from_static(b"version")),
        Reply::bulk(Bytes::from_static(b"6.2.0")),
        Reply::bulk(Bytes::from_static(b"proto")),
        Reply::Integer(2),
        Reply::bulk(Bytes::from_static(b"id")),
        Reply::Integer(std::process::id() as i64),
        Reply::bulk(Bytes::from_static(b"mode")),
        Reply::bulk(Bytes::from_static(b"cluster")),
        Reply::bulk(Bytes::from_static(b"role")),
        Reply::bulk(Bytes::from_static(b"master")),
        Reply::bulk(Bytes::from_static(b"modules")),
        Reply::Array(Some(Vec::new())),
    ];
    let _ = &state.myid;
    Reply::Array(Some(fields))
}

fn handle_client(client: &ClientState, argv: &[Bytes]) -> Reply {
    if argv.len() < 2 {
        return Reply::error("ERR wrong number of arguments for 'client' command");
    }
    let sub = argv[1].to_ascii_uppercase();
    match sub.as_slice() {
        b"GETNAME" => Reply::bulk(Bytes::from(client.name())),
        b"SETNAME" => {
            if argv.len() != 3 {
                return Reply::error("ERR wrong number of arguments for 'client|setname' command");
            }
            match std::str::from_utf8(&argv[2]) {
                Ok(name) if !name.contains(' ') => {
                    client.set_name(name.to_string());
                    Reply::ok()
                },
                _ => Reply::error("ERR Client names cannot contain spaces, newlines or special characters."),
            }
        },
        b"LIST" => Reply::bulk(Bytes::from(format!("id={} addr={} name={}\n", client.id, client.peer, client.name()))),
        _ => Reply::error("ERR unsupported CLIENT subcommand, or wrong number of arguments"),
    }
}

fn handle_proxy(state: &ProxyState, argv: &[Bytes]) -> Reply {
    if argv.len() < 2 {
        return Reply::error("ERR wrong number of arguments for 'proxy' command");
    }
    let sub = argv[1].to_ascii_uppercase();
    match sub.as_slice() {
        b"INSTANCES" => proxy_instances(state),
        b"INSTANCE" => proxy_instance(state, argv),
        b"ROUTER" => proxy_router(state, argv),
        b"FLUSHCONFIG" => proxy_flushconfig(state),
        b"SET" => proxy_set(state, argv),
        b"INFO" => proxy_info(state, argv.get(2)),
        _ => Reply::error("ERR unknown PROXY subcommand"),
    }
}

fn instance_struct(state: &ProxyState, instance: &crate::backend::Instance) -> Reply {
    let pending: Vec<Reply> = instance.pending_commands().into_iter().map(|n| Reply::Integer(n as i64)).collect();
    let _ = state;
    Reply::Array(Some(vec![
        Reply::bulk(Bytes::from(instance.name().to_string())),
        Reply::bulk(Bytes::from(instance.ip().to_string())),
        Reply::Integer(instance.port() as i64),
        Reply::Integer(instance.poolsize() as i64),
        Reply::Integer(instance.connected_num() as i64),
        Reply::Array(Some(pending)),
    ]))
}

fn proxy_instances(state: &ProxyState) -> Reply {
    let items = state.instance_directory.all().into_iter().map(|inst| instance_struct(state, &inst)).collect();
    Reply::Array(Some(items))
}

fn proxy_instance(state: &ProxyState, argv: &[Bytes]) -> Reply {
    if argv.len() != 4 {
        return Reply::error("ERR wrong number of arguments for 'proxy instance' command");
    }
    let (ip, port) = match parse_ip_port(&argv[2], &argv[3]) {
        Some(v) => v,
        None => return Reply::error("ERR invalid port"),
    };
    match state.instance_directory.get(&format!("{}:{}", ip, port)) {
        Some(inst) => instance_struct(state, &inst),
        None => Reply::error("ERR no such instance"),
    }
}

fn proxy_router(state: &ProxyState, argv: &[Bytes]) -> Reply {
    if argv.len() < 4 || argv.len() > 5 {
        return Reply::error("ERR wrong number of arguments for 'proxy router' command");
    }
    let (ip, port) = match parse_ip_port(&argv[2], &argv[3]) {
        Some(v) => v,
        None => return Reply::error("ERR Invalid port"),
    };
    let poolsize = if argv.len() == 5 {
        match std::str::from_utf8(&argv[4]).ok().and_then(|s| s.parse::<usize>().ok()) {
            Some(p) if p > 0 => Some(p),
            _ => return Reply::error("ERR Invalid pool size"),
        }
    } else {
        None
    };
    let effective_poolsize = poolsize.unwrap_or(state.pool_default_size);
    match state.instance_directory.create(&ip, port, effective_poolsize, None) {
        Ok(_) => {
            state.directives_mut().add_router(ip, port, poolsize);
            state.mark_config_dirty();
            Reply::ok()
        },
        Err(crate::errors::CreationError::AlreadyExists(_)) => Reply::error("ERR Duplicated"),
        Err(e) => Reply::error(format!("ERR {}", e)),
    }
}

fn proxy_flushconfig(state: &ProxyState) -> Reply {
    match state.flush_config() {
        Ok(()) => Reply::ok(),
        Err(e) => Reply::error(format!("ERR {}", e)),
    }
}

fn proxy_set(state: &ProxyState, argv: &[Bytes]) -> Reply {
    if argv.len() != 6 || argv[2].to_ascii_uppercase() != b"AUTH-PASS" {
        return Reply::error("ERR usage: PROXY SET auth-pass <ip> <port> <pass>");
    }
    let (ip, port) = match parse_ip_port(&argv[3], &argv[4]) {
        Some(v) => v,
        None => return Reply::error("ERR Invalid port"),
    };
    let password = String::from_utf8_lossy(&argv[5]).to_string();
    match state.instance_directory.get(&format!("{}:{}", ip, port)) {
        Some(inst) => {
            inst.set_auth_pass(Some(password.clone()));
            state.directives_mut().set_auth_pass(ip, port, password);
            state.mark_config_dirty();
            Reply::ok()
        },
        None => Reply::error("ERR no such instance"),
    }
}

fn proxy_info(state: &ProxyState, section: Option<&Bytes>) -> Reply {
    let wanted = section.map(|s| s.to_ascii_lowercase());
    let want = |name: &[u8]| wanted.as_deref().map_or(true, |w| w == name);

    let mut out = String::new();
    if want(b"server") {
        let port = state.listen_addr.rsplit_once(':').and_then(|(_, p)| p.parse::<u16>().ok()).unwrap_or(0);
        out.push_str("# Server\r\n");
        out.push_str(&format!("process_id:{}\r\n", std::process::id()));
        out.push_str(&format!("run_id:{}\r\n", state.myid));
        out.push_str(&format!("tcp_port:{}\r\n", port));
    }
    if want(b"clients") {
        out.push_str("# Clients\r\n");
        out.push_str(&format!("connected_clients:{}\r\n", state.counters.connected_clients.get()));
    }
    if want(b"cpu") {
        let (sys, user) = cpu_times();
        out.push_str("# Cpu\r\n");
        out.push_str(&format!("used_cpu_sys:{:.6}\r\n", sys));
        out.push_str(&format!("used_cpu_user:{:.6}\r\n", user));
    }
    if want(b"stats") {
        out.push_str("# Stats\r\n");
        out.push_str(&format!("total_connections_received:{}\r\n", state.counters.total_connections_received.get()));
        out.push_str(&format!("total_commands_processed:{}\r\n", state.counters.total_commands_processed.get()));
    }
    if want(b"proxy") {
        let instances = state.instance_directory.all();
        out.push_str("# Proxy\r\n");
        out.push_str(&format!("proxy_redis_instances:{}\r\n", instances.len()));
        for (n, inst) in instances.iter().enumerate() {
            out.push_str(&format!(
                "master{}:name={},connected={},address={}:{}\r\n",
                n,
                inst.name(),
                inst.connected_num(),
                inst.ip(),
                inst.port()
            ));
        }
    }
    Reply::bulk(Bytes::from(out))
}

fn cpu_times() -> (f64, f64) {
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) != 0 {
            return (0.0, 0.0);
        }
        let sys = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 / 1_000_000.0;
        let user = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 / 1_000_000.0;
        (sys, user)
    }
}

fn parse_ip_port(ip: &Bytes, port: &Bytes) -> Option<(String, u16)> {
    let ip = std::str::from_utf8(ip).ok()?.to_string();
    let port = std::str::from_utf8(port).ok()?.parse::<u16>().ok()?;
    Some((ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_with_no_args_replies_pong() {
        let argv = vec![Bytes::from_static(b"PING")];
        assert_eq!(handle_ping(&argv), Reply::SimpleString(Bytes::from_static(b"PONG")));
    }

    #[test]
    fn ping_with_message_echoes_it() {
        let argv = vec![Bytes::from_static(b"PING"), Bytes::from_static(b"hi")];
        assert_eq!(handle_ping(&argv), Reply::bulk(Bytes::from_static(b"hi")));
    }

    #[test]
    fn echo_requires_exactly_one_argument() {
        let argv = vec![Bytes::from_static(b"ECHO")];
        assert!(handle_echo(&argv).is_error());
    }
}
