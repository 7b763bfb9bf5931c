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

//! Compile-time command table: every command name maps to a route
//! category the dispatcher uses to decide how to get it to a backend
//! (or whether to answer it locally, or refuse it outright).

/// How the dispatcher handles a given command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Rejected outright with `-ERR not supported`.
    NotSupported,
    /// Answered locally -- never touches a backend link.
    NoRoute,
    /// `SELECT`: only `SELECT 0` is accepted.
    Select,
    /// Single key extracted from a fixed argv position, hashed, and
    /// forwarded verbatim to the owning instance.
    FirstKey,
    /// Split into one sub-command per key, dispatched to each key's
    /// owning instance, and merged by a coalescer.
    MultiKeyFanout,
}

/// How a multi-key fan-out command's keys are laid out in argv.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiKeyShape {
    /// Every argument after the command name is its own key (EXISTS,
    /// DEL, UNLINK, MGET).
    Flat,
    /// Arguments after the command name alternate key, value (MSET).
    Pairs,
}

/// The coalescer used to merge multi-key fan-out replies back into one
/// client reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalescer {
    IntegerSum,
    StatusAnd,
    ArrayConcat,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub route: RouteKind,
    pub multi_shape: Option<MultiKeyShape>,
    pub coalescer: Option<Coalescer>,
}

const FIRST_KEY: CommandSpec = CommandSpec { route: RouteKind::FirstKey, multi_shape: None, coalescer: None };
const NO_ROUTE: CommandSpec = CommandSpec { route: RouteKind::NoRoute, multi_shape: None, coalescer: None };
const NOT_SUPPORTED: CommandSpec = CommandSpec { route: RouteKind::NotSupported, multi_shape: None, coalescer: None };
const SELECT: CommandSpec = CommandSpec { route: RouteKind::Select, multi_shape: None, coalescer: None };
const FANOUT_SUM: CommandSpec =
    CommandSpec { route: RouteKind::MultiKeyFanout, multi_shape: Some(MultiKeyShape::Flat), coalescer: Some(Coalescer::IntegerSum) };
const FANOUT_STATUS: CommandSpec =
    CommandSpec { route: RouteKind::MultiKeyFanout, multi_shape: Some(MultiKeyShape::Pairs), coalescer: Some(Coalescer::StatusAnd) };
const FANOUT_ARRAY: CommandSpec =
    CommandSpec { route: RouteKind::MultiKeyFanout, multi_shape: Some(MultiKeyShape::Flat), coalescer: Some(Coalescer::ArrayConcat) };

static COMMAND_TABLE: phf::Map<&'static str, CommandSpec> = phf::phf_map! {
    // no-route / local
    "PING" => NO_ROUTE,
    "ECHO" => NO_ROUTE,
    "AUTH" => NO_ROUTE,
    "TIME" => NO_ROUTE,
    "COMMAND" => NO_ROUTE,
    "WAIT" => NO_ROUTE,
    "HELLO" => NO_ROUTE,
    "RESET" => NO_ROUTE,
    "CLIENT" => NO_ROUTE,
    "PROXY" => NO_ROUTE,

    "SELECT" => SELECT,

    // multi-key fan-out
    "EXISTS" => FANOUT_SUM,
    "DEL" => FANOUT_SUM,
    "UNLINK" => FANOUT_SUM,
    "MSET" => FANOUT_STATUS,
    "MGET" => FANOUT_ARRAY,

    // first-key route: strings
    "GET" => FIRST_KEY,
    "SET" => FIRST_KEY,
    "SETNX" => FIRST_KEY,
    "SETEX" => FIRST_KEY,
    "PSETEX" => FIRST_KEY,
    "GETSET" => FIRST_KEY,
    "GETEX" => FIRST_KEY,
    "GETDEL" => FIRST_KEY,
    "APPEND" => FIRST_KEY,
    "STRLEN" => FIRST_KEY,
    "GETRANGE" => FIRST_KEY,
    "SETRANGE" => FIRST_KEY,
    "INCR" => FIRST_KEY,
    "DECR" => FIRST_KEY,
    "INCRBY" => FIRST_KEY,
    "DECRBY" => FIRST_KEY,
    "INCRBYFLOAT" => FIRST_KEY,
    "GETBIT" => FIRST_KEY,
    "SETBIT" => FIRST_KEY,
    "BITCOUNT" => FIRST_KEY,
    "BITPOS" => FIRST_KEY,

    // first-key route: generic key management
    "EXPIRE" => FIRST_KEY,
    "PEXPIRE" => FIRST_KEY,
    "EXPIREAT" => FIRST_KEY,
    "PEXPIREAT" => FIRST_KEY,
    "TTL" => FIRST_KEY,
    "PTTL" => FIRST_KEY,
    "PERSIST" => FIRST_KEY,
    "TYPE" => FIRST_KEY,

    // first-key route: hashes
    "HGET" => FIRST_KEY,
    "HSET" => FIRST_KEY,
    "HSETNX" => FIRST_KEY,
    "HMSET" => FIRST_KEY,
    "HMGET" => FIRST_KEY,
    "HDEL" => FIRST_KEY,
    "HGETALL" => FIRST_KEY,
    "HKEYS" => FIRST_KEY,
    "HVALS" => FIRST_KEY,
    "HLEN" => FIRST_KEY,
    "HEXISTS" => FIRST_KEY,
    "HINCRBY" => FIRST_KEY,
    "HINCRBYFLOAT" => FIRST_KEY,
    "HSCAN" => FIRST_KEY,
    "HSTRLEN" => FIRST_KEY,

    // first-key route: lists
    "LPUSH" => FIRST_KEY,
    "RPUSH" => FIRST_KEY,
    "LPUSHX" => FIRST_KEY,
    "RPUSHX" => FIRST_KEY,
    "LPOP" => FIRST_KEY,
    "RPOP" => FIRST_KEY,
    "LLEN" => FIRST_KEY,
    "LRANGE" => FIRST_KEY,
    "LINDEX" => FIRST_KEY,
    "LSET" => FIRST_KEY,
    "LINSERT" => FIRST_KEY,
    "LREM" => FIRST_KEY,
    "LTRIM" => FIRST_KEY,

    // first-key route: sets
    "SADD" => FIRST_KEY,
    "SREM" => FIRST_KEY,
    "SMEMBERS" => FIRST_KEY,
    "SCARD" => FIRST_KEY,
    "SISMEMBER" => FIRST_KEY,
    "SMISMEMBER" => FIRST_KEY,
    "SPOP" => FIRST_KEY,
    "SRANDMEMBER" => FIRST_KEY,
    "SSCAN" => FIRST_KEY,

    // first-key route: sorted sets
    "ZADD" => FIRST_KEY,
    "ZREM" => FIRST_KEY,
    "ZSCORE" => FIRST_KEY,
    "ZMSCORE" => FIRST_KEY,
    "ZRANGE" => FIRST_KEY,
    "ZRANGEBYSCORE" => FIRST_KEY,
    "ZREVRANGE" => FIRST_KEY,
    "ZREVRANGEBYSCORE" => FIRST_KEY,
    "ZCARD" => FIRST_KEY,
    "ZCOUNT" => FIRST_KEY,
    "ZINCRBY" => FIRST_KEY,
    "ZRANK" => FIRST_KEY,
    "ZREVRANK" => FIRST_KEY,
    "ZSCAN" => FIRST_KEY,

    // not supported
    "KEYS" => NOT_SUPPORTED,
    "SCAN" => NOT_SUPPORTED,
    "MULTI" => NOT_SUPPORTED,
    "EXEC" => NOT_SUPPORTED,
    "DISCARD" => NOT_SUPPORTED,
    "WATCH" => NOT_SUPPORTED,
    "UNWATCH" => NOT_SUPPORTED,
    "SUBSCRIBE" => NOT_SUPPORTED,
    "UNSUBSCRIBE" => NOT_SUPPORTED,
    "PSUBSCRIBE" => NOT_SUPPORTED,
    "PUNSUBSCRIBE" => NOT_SUPPORTED,
    "PUBLISH" => NOT_SUPPORTED,
    "PUBSUB" => NOT_SUPPORTED,
    "BLPOP" => NOT_SUPPORTED,
    "BRPOP" => NOT_SUPPORTED,
    "BRPOPLPUSH" => NOT_SUPPORTED,
    "MONITOR" => NOT_SUPPORTED,
    "SLAVEOF" => NOT_SUPPORTED,
    "REPLICAOF" => NOT_SUPPORTED,
    "DEBUG" => NOT_SUPPORTED,
    "SHUTDOWN" => NOT_SUPPORTED,
    "SAVE" => NOT_SUPPORTED,
    "BGSAVE" => NOT_SUPPORTED,
    "BGREWRITEAOF" => NOT_SUPPORTED,
    "LASTSAVE" => NOT_SUPPORTED,
    "CONFIG" => NOT_SUPPORTED,
    "SCRIPT" => NOT_SUPPORTED,
    "EVAL" => NOT_SUPPORTED,
    "EVALSHA" => NOT_SUPPORTED,
    "SLOWLOG" => NOT_SUPPORTED,
    "LATENCY" => NOT_SUPPORTED,
    "RANDOMKEY" => NOT_SUPPORTED,
    "DUMP" => NOT_SUPPORTED,
    "RESTORE" => NOT_SUPPORTED,
    "MOVE" => NOT_SUPPORTED,
    "OBJECT" => NOT_SUPPORTED,
    "MSETNX" => NOT_SUPPORTED,
    "RENAME" => NOT_SUPPORTED,
    "RENAMENX" => NOT_SUPPORTED,
    "SORT" => NOT_SUPPORTED,
    "COPY" => NOT_SUPPORTED,
    "FLUSHDB" => NOT_SUPPORTED,
    "FLUSHALL" => NOT_SUPPORTED,
    "MIGRATE" => NOT_SUPPORTED,
    "CLUSTER" => NOT_SUPPORTED,
    "SYNC" => NOT_SUPPORTED,
    "PSYNC" => NOT_SUPPORTED,
};

/// Looks up a command by name, case-insensitively. Unknown commands are
/// treated the same as explicitly unsupported ones.
pub fn lookup(name: &[u8]) -> CommandSpec {
    let upper = name.to_ascii_uppercase();
    match std::str::from_utf8(&upper) {
        Ok(s) => COMMAND_TABLE.get(s).copied().unwrap_or(NOT_SUPPORTED),
        Err(_) => NOT_SUPPORTED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_known_commands() {
        assert_eq!(lookup(b"get").route, RouteKind::FirstKey);
        assert_eq!(lookup(b"GET").route, RouteKind::FirstKey);
        assert_eq!(lookup(b"MGET").route, RouteKind::MultiKeyFanout);
        assert_eq!(lookup(b"ping").route, RouteKind::NoRoute);
        assert_eq!(lookup(b"select").route, RouteKind::Select);
    }

    #[test]
    fn rejects_unknown_and_unsupported_commands() {
        assert_eq!(lookup(b"KEYS").route, RouteKind::NotSupported);
        assert_eq!(lookup(b"NOSUCHCOMMAND").route, RouteKind::NotSupported);
    }

    #[test]
    fn mset_uses_pairs_shape_and_status_and_coalescer() {
        let spec = lookup(b"MSET");
        assert_eq!(spec.multi_shape, Some(MultiKeyShape::Pairs));
        assert_eq!(spec.coalescer, Some(Coalescer::StatusAnd));
    }
}
