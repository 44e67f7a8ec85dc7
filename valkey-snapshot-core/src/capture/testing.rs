//! In-memory key space and a loopback RESP server for capture tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::source::KeyspaceSource;
use crate::{Result, SnapshotError};

enum Value {
    String(String),
    Hash(BTreeMap<String, String>),
    List(Vec<String>),
    Set(Vec<String>),
    ZSet(Vec<(String, f64)>),
    Raw(String),
}

/// Deterministic [`KeyspaceSource`]: keys are scanned in sorted order and the
/// cursor is the offset of the next page
#[derive(Default)]
pub struct MemorySource {
    values: BTreeMap<String, Value>,
    ttls: BTreeMap<String, i64>,
    ghosts: HashSet<String>,
    binary_keys: Vec<Vec<u8>>,
    failing_values: HashSet<String>,
    failing_ttl: bool,
    failing_scan: bool,
    pub page_requests: usize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_string(mut self, key: &str, value: &str) -> Self {
        self.values
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    pub fn with_hash(mut self, key: &str, fields: &[(&str, &str)]) -> Self {
        let map = fields
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect();
        self.values.insert(key.to_string(), Value::Hash(map));
        self
    }

    pub fn with_list(mut self, key: &str, items: &[&str]) -> Self {
        let items = items.iter().map(|s| s.to_string()).collect();
        self.values.insert(key.to_string(), Value::List(items));
        self
    }

    pub fn with_set(mut self, key: &str, members: &[&str]) -> Self {
        let members = members.iter().map(|s| s.to_string()).collect();
        self.values.insert(key.to_string(), Value::Set(members));
        self
    }

    pub fn with_zset(mut self, key: &str, members: &[(&str, f64)]) -> Self {
        let mut members: Vec<(String, f64)> =
            members.iter().map(|(m, s)| (m.to_string(), *s)).collect();
        members.sort_by(|a, b| a.1.total_cmp(&b.1));
        self.values.insert(key.to_string(), Value::ZSet(members));
        self
    }

    /// A key whose `TYPE` reply is not one the reader serializes
    pub fn with_raw_type(mut self, key: &str, raw_type: &str) -> Self {
        self.values
            .insert(key.to_string(), Value::Raw(raw_type.to_string()));
        self
    }

    pub fn with_ttl(mut self, key: &str, seconds: i64) -> Self {
        self.ttls.insert(key.to_string(), seconds);
        self
    }

    /// Listed by `SCAN` but deleted before it can be read
    pub fn with_ghost(mut self, key: &str) -> Self {
        self.ghosts.insert(key.to_string());
        self
    }

    /// Listed by `SCAN` under a name that is not UTF-8
    pub fn with_binary_key(mut self, key: &[u8]) -> Self {
        self.binary_keys.push(key.to_vec());
        self
    }

    pub fn failing_value(mut self, key: &str) -> Self {
        self.failing_values.insert(key.to_string());
        self
    }

    pub fn failing_ttl(mut self) -> Self {
        self.failing_ttl = true;
        self
    }

    pub fn failing_scan(mut self) -> Self {
        self.failing_scan = true;
        self
    }

    fn listing(&self) -> Vec<Vec<u8>> {
        let mut keys: Vec<Vec<u8>> = self
            .values
            .keys()
            .chain(self.ghosts.iter())
            .map(|k| k.as_bytes().to_vec())
            .chain(self.binary_keys.iter().cloned())
            .collect();
        keys.sort();
        keys
    }

    fn value(&self, key: &str) -> Result<&Value> {
        if self.failing_values.contains(key) {
            return Err(SnapshotError::read("connection reset"));
        }
        self.values
            .get(key)
            .ok_or_else(|| SnapshotError::read("no such key"))
    }
}

fn wrong_type() -> SnapshotError {
    SnapshotError::read("WRONGTYPE Operation against a key holding the wrong kind of value")
}

#[async_trait]
impl KeyspaceSource for MemorySource {
    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<Vec<u8>>)> {
        self.page_requests += 1;
        if self.failing_scan {
            return Err(SnapshotError::read("LOADING dataset in memory"));
        }

        let keys = self.listing();
        let start = cursor as usize;
        let end = (start + count).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, keys[start.min(end)..end].to_vec()))
    }

    async fn key_type(&mut self, key: &str) -> Result<String> {
        let raw = match self.values.get(key) {
            None => "none".to_string(),
            Some(Value::String(_)) => "string".to_string(),
            Some(Value::Hash(_)) => "hash".to_string(),
            Some(Value::List(_)) => "list".to_string(),
            Some(Value::Set(_)) => "set".to_string(),
            Some(Value::ZSet(_)) => "zset".to_string(),
            Some(Value::Raw(raw)) => raw.clone(),
        };
        Ok(raw)
    }

    async fn ttl(&mut self, key: &str) -> Result<i64> {
        if self.failing_ttl {
            return Err(SnapshotError::read("timeout"));
        }
        if !self.values.contains_key(key) {
            return Ok(-2);
        }
        Ok(self.ttls.get(key).copied().unwrap_or(-1))
    }

    async fn get(&mut self, key: &str) -> Result<String> {
        match self.value(key)? {
            Value::String(v) => Ok(v.clone()),
            _ => Err(wrong_type()),
        }
    }

    async fn hgetall(&mut self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.value(key)? {
            Value::Hash(v) => Ok(v.clone()),
            _ => Err(wrong_type()),
        }
    }

    async fn lrange_all(&mut self, key: &str) -> Result<Vec<String>> {
        match self.value(key)? {
            Value::List(v) => Ok(v.clone()),
            _ => Err(wrong_type()),
        }
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        match self.value(key)? {
            Value::Set(v) => Ok(v.clone()),
            _ => Err(wrong_type()),
        }
    }

    async fn zrange_all_with_scores(&mut self, key: &str) -> Result<Vec<(String, f64)>> {
        match self.value(key)? {
            Value::ZSet(v) => Ok(v.clone()),
            _ => Err(wrong_type()),
        }
    }
}

/// Stored value served by [`RespServer`]
#[derive(Clone)]
pub enum RespValue {
    String(Vec<u8>),
    ZSet(Vec<(String, f64)>),
}

/// Loopback server speaking enough RESP2 for a logical capture.
///
/// Keys are listed by `SCAN` in insertion order, `COUNT` at a time, with the
/// cursor being the offset of the next page. Every command name received is
/// recorded.
pub struct RespServer {
    address: String,
    commands: Arc<Mutex<Vec<String>>>,
    accept: JoinHandle<()>,
}

impl RespServer {
    pub async fn start(keys: Vec<(Vec<u8>, RespValue, i64)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let keys = Arc::new(keys);
        let commands = Arc::new(Mutex::new(Vec::new()));

        let recorded = Arc::clone(&commands);
        let accept = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, Arc::clone(&keys), Arc::clone(&recorded)));
            }
        });

        Self {
            address,
            commands,
            accept,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for RespServer {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(
    socket: TcpStream,
    keys: Arc<Vec<(Vec<u8>, RespValue, i64)>>,
    commands: Arc<Mutex<Vec<String>>>,
) {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    while let Ok(Some(args)) = read_command(&mut reader).await {
        let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        commands.lock().unwrap().push(name.clone());
        let reply = respond(&name, &args[1..], &keys);
        if writer.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn lookup<'a>(
    keys: &'a [(Vec<u8>, RespValue, i64)],
    key: &[u8],
) -> Option<&'a (Vec<u8>, RespValue, i64)> {
    keys.iter().find(|(k, _, _)| k.as_slice() == key)
}

fn number(arg: &[u8]) -> usize {
    String::from_utf8_lossy(arg).parse().unwrap_or(0)
}

fn respond(name: &str, args: &[Vec<u8>], keys: &[(Vec<u8>, RespValue, i64)]) -> Vec<u8> {
    match name {
        "SCAN" => {
            let start = number(&args[0]).min(keys.len());
            let count = args
                .iter()
                .position(|a| a.eq_ignore_ascii_case(b"COUNT"))
                .map_or(10, |i| number(&args[i + 1]));
            let end = (start + count).min(keys.len());
            let next = if end >= keys.len() { 0 } else { end };
            let page = keys[start..end].iter().map(|(k, _, _)| bulk(k)).collect();
            array(vec![bulk(next.to_string().as_bytes()), array(page)])
        }
        "TYPE" => match lookup(keys, &args[0]) {
            Some((_, RespValue::String(_), _)) => b"+string\r\n".to_vec(),
            Some((_, RespValue::ZSet(_), _)) => b"+zset\r\n".to_vec(),
            None => b"+none\r\n".to_vec(),
        },
        "TTL" => {
            let ttl = lookup(keys, &args[0]).map_or(-2, |(_, _, ttl)| *ttl);
            format!(":{ttl}\r\n").into_bytes()
        }
        "GET" => match lookup(keys, &args[0]) {
            Some((_, RespValue::String(v), _)) => bulk(v),
            Some(_) => b"-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
                .to_vec(),
            None => b"$-1\r\n".to_vec(),
        },
        "ZRANGE" => match lookup(keys, &args[0]) {
            Some((_, RespValue::ZSet(members), _)) => array(
                members
                    .iter()
                    .flat_map(|(m, s)| [bulk(m.as_bytes()), bulk(s.to_string().as_bytes())])
                    .collect(),
            ),
            _ => array(Vec::new()),
        },
        "CLIENT" | "SELECT" | "AUTH" | "PING" => b"+OK\r\n".to_vec(),
        other => format!("-ERR unknown command '{other}'\r\n").into_bytes(),
    }
}

async fn read_command<R>(reader: &mut R) -> std::io::Result<Option<Vec<Vec<u8>>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(None);
    }
    let count = header(&line, '*')?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        line.clear();
        reader.read_line(&mut line).await?;
        let len = header(&line, '$')?;
        let mut arg = vec![0u8; len + 2];
        reader.read_exact(&mut arg).await?;
        arg.truncate(len);
        args.push(arg);
    }
    Ok(Some(args))
}

fn header(line: &str, prefix: char) -> std::io::Result<usize> {
    line.trim_end()
        .strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, line.to_string()))
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend(item);
    }
    out
}
