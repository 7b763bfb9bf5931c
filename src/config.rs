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

//! Two independent configuration layers:
//!
//! - [`ProxyDirectives`]: the hand-editable, round-trip-persisted cluster
//!   topology file (`proxy myid`/`proxy router`/`proxy auth-pass`). Parsed
//!   and rewritten by a small line-oriented parser of our own, since it
//!   must preserve unrecognized lines verbatim.
//! - [`RuntimeSettings`]: process-level knobs loaded through the `config`
//!   crate (defaults, then an optional TOML/JSON file, then environment
//!   overrides) -- front-end listen address, default pool size, redirect
//!   cap, refresh/reconnect periods, log level.
use crate::errors::CreationError;
use rand::Rng;
use serde::Deserialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct RouterDirective {
    pub host: String,
    pub port: u16,
    pub poolsize: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AuthPassDirective {
    pub host: String,
    pub port: u16,
    pub password: String,
}

/// One line of the on-disk config file, parsed or preserved verbatim.
#[derive(Debug, Clone)]
enum Line {
    MyId(String),
    Router(RouterDirective),
    AuthPass(AuthPassDirective),
    Other(String),
}

/// In-memory view of the persisted proxy-directive file, including every
/// line it contained so a rewrite can preserve what it doesn't understand.
#[derive(Debug, Clone)]
pub struct ProxyDirectives {
    path: PathBuf,
    lines: Vec<Line>,
}

impl ProxyDirectives {
    /// Loads `path`, generating and persisting a fresh `myid` if the file
    /// doesn't carry one yet. A missing or non-writable config file is a
    /// fatal startup error per §6.
    pub fn load(path: &Path) -> Result<ProxyDirectives, CreationError> {
        let text = fs::read_to_string(path).map_err(|e| {
            CreationError::InvalidResource(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        let mut lines: Vec<Line> = text.lines().map(parse_line).collect();
        if !lines.iter().any(|l| matches!(l, Line::MyId(_))) {
            let myid = generate_myid();
            lines.push(Line::MyId(myid));
        }
        let directives = ProxyDirectives { path: path.to_path_buf(), lines };
        directives.persist()?;
        Ok(directives)
    }

    pub fn myid(&self) -> String {
        self.lines
            .iter()
            .find_map(|l| match l {
                Line::MyId(id) => Some(id.clone()),
                _ => None,
            })
            .expect("load() always ensures a myid line exists")
    }

    pub fn routers(&self) -> Vec<RouterDirective> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::Router(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn auth_passes(&self) -> Vec<AuthPassDirective> {
        self.lines
            .iter()
            .filter_map(|l| match l {
                Line::AuthPass(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn add_router(&mut self, host: String, port: u16, poolsize: Option<usize>) {
        self.lines.push(Line::Router(RouterDirective { host, port, poolsize }));
    }

    pub fn set_auth_pass(&mut self, host: String, port: u16, password: String) {
        self.lines.retain(|l| match l {
            Line::AuthPass(a) => !(a.host == host && a.port == port),
            _ => true,
        });
        self.lines.push(Line::AuthPass(AuthPassDirective { host, port, password }));
    }

    /// Rewrites the config file in place: recognized directives reflect
    /// current in-memory state, unrecognized lines are preserved
    /// verbatim, and the write is fsync'd before the file is closed --
    /// matching the original's `rewriteConfigProxyOption`/
    /// `proxyFlushConfig` durability guarantee.
    pub fn persist(&self) -> Result<(), CreationError> {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::MyId(id) => out.push_str(&format!("proxy myid {}\n", id)),
                Line::Router(r) => match r.poolsize {
                    Some(p) => out.push_str(&format!("proxy router {} {} {}\n", r.host, r.port, p)),
                    None => out.push_str(&format!("proxy router {} {}\n", r.host, r.port)),
                },
                Line::AuthPass(a) => out.push_str(&format!("proxy auth-pass {} {} {}\n", a.host, a.port, a.password)),
                Line::Other(raw) => {
                    out.push_str(raw);
                    out.push('\n');
                },
            }
        }
        let mut file = fs::OpenOptions::new().write(true).truncate(true).create(true).open(&self.path).map_err(|e| {
            CreationError::InvalidResource(format!("cannot write config file {}: {}", self.path.display(), e))
        })?;
        file.write_all(out.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

fn parse_line(line: &str) -> Line {
    let trimmed = line.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.as_slice() {
        ["proxy", "myid", id] => Line::MyId((*id).to_string()),
        ["proxy", "router", host, port] => match port.parse::<u16>() {
            Ok(port) => Line::Router(RouterDirective { host: (*host).to_string(), port, poolsize: None }),
            Err(_) => Line::Other(line.to_string()),
        },
        ["proxy", "router", host, port, poolsize] => match (port.parse::<u16>(), poolsize.parse::<usize>()) {
            (Ok(port), Ok(poolsize)) => {
                Line::Router(RouterDirective { host: (*host).to_string(), port, poolsize: Some(poolsize) })
            },
            _ => Line::Other(line.to_string()),
        },
        ["proxy", "auth-pass", host, port, password] => match port.parse::<u16>() {
            Ok(port) => Line::AuthPass(AuthPassDirective { host: (*host).to_string(), port, password: (*password).to_string() }),
            Err(_) => Line::Other(line.to_string()),
        },
        _ => Line::Other(line.to_string()),
    }
}

fn generate_myid() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..40).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect()
}

/// Process-level runtime settings, layered: built-in defaults, an
/// optional TOML/JSON file, then environment overrides (`SLOTPROXY_*`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub listen_addr: String,
    pub pool_default_size: usize,
    pub redirect_max_limit: usize,
    pub update_slots_min_limit_ms: u64,
    pub reconnect_period_ms: u64,
    pub log_level: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSettings {
            listen_addr: "0.0.0.0:6380".to_string(),
            pool_default_size: 1,
            redirect_max_limit: 3,
            update_slots_min_limit_ms: 1_000,
            reconnect_period_ms: 1_000,
            log_level: "info".to_string(),
        }
    }
}

impl RuntimeSettings {
    /// Loads defaults, layers an optional settings file on top, then
    /// environment variables prefixed `SLOTPROXY_` (e.g.
    /// `SLOTPROXY_POOL_DEFAULT_SIZE=4`).
    pub fn load(settings_file: Option<&Path>) -> Result<RuntimeSettings, CreationError> {
        let defaults = RuntimeSettings::default();
        let mut builder = config::Config::builder()
            .set_default("listen_addr", defaults.listen_addr.clone())
            .expect("static default key")
            .set_default("pool_default_size", defaults.pool_default_size as i64)
            .expect("static default key")
            .set_default("redirect_max_limit", defaults.redirect_max_limit as i64)
            .expect("static default key")
            .set_default("update_slots_min_limit_ms", defaults.update_slots_min_limit_ms as i64)
            .expect("static default key")
            .set_default("reconnect_period_ms", defaults.reconnect_period_ms as i64)
            .expect("static default key")
            .set_default("log_level", defaults.log_level.clone())
            .expect("static default key");

        if let Some(path) = settings_file {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("SLOTPROXY"));

        let built = builder
            .build()
            .map_err(|e| CreationError::InvalidResource(format!("runtime settings: {}", e)))?;
        built.try_deserialize().map_err(|e| CreationError::InvalidResource(format!("runtime settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_recognized_directives_and_preserves_unknown_lines() {
        let path = tempfile_with_contents(
            "round-trip",
            "# a comment preserved verbatim\nproxy myid 0123456789012345678901234567890123456789\nproxy router 10.0.0.1 6379 2\n",
        );
        let directives = ProxyDirectives::load(&path).expect("loads");
        assert_eq!(directives.myid(), "0123456789012345678901234567890123456789");
        assert_eq!(directives.routers().len(), 1);
        assert_eq!(directives.routers()[0].poolsize, Some(2));

        let reloaded = fs::read_to_string(&path).expect("re-readable");
        assert!(reloaded.contains("# a comment preserved verbatim"));
        assert!(reloaded.contains("proxy router 10.0.0.1 6379 2"));
        fs::remove_file(&path).ok();
    }

    #[test]
    fn generates_myid_when_absent() {
        let path = tempfile_with_contents("generates-myid", "proxy router 10.0.0.1 6379\n");
        let directives = ProxyDirectives::load(&path).expect("loads");
        assert_eq!(directives.myid().len(), 40);
        fs::remove_file(&path).ok();
    }

    fn tempfile_with_contents(label: &str, contents: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("slotproxy-test-config-{}-{:?}.conf", label, std::thread::current().id()));
        fs::write(&path, contents).expect("write temp config");
        path
    }
}
