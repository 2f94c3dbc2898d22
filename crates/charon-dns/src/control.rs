//! Runtime administration over a Unix stream socket. One line-oriented
//! command per connection: read the command, write one OK/ERR line, close.
//! Commands run inline on the engine task, so store mutations need no
//! locking.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::records::{self, Record, RecordType};
use crate::store::Store;

/// Commands are a single short line; anything longer is cut off.
const MAX_COMMAND_LEN: u64 = 512;
/// A client that neither sends a line nor closes within this window is
/// dropped so the engine can get back to serving queries.
const CLIENT_TIMEOUT: Duration = Duration::from_millis(1000);

const USAGE: &str = "ERR: unknown command. commands: flush, evict, stats, add NAME TYPE RDATA [TTL], del NAME TYPE\n";

pub struct ControlSocket {
    listener: UnixListener,
    pub path: PathBuf,
}

impl ControlSocket {
    /// Bind the control socket, unlinking a stale socket file first.
    pub fn bind(path: &str) -> Result<Self> {
        let path = PathBuf::from(path);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("failed to unlink stale socket {}", path.display()))?;
        }
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("failed to bind control socket {}", path.display()))?;
        info!("control socket listening on {}", path.display());
        Ok(Self { listener, path })
    }

    pub async fn accept(&self) -> std::io::Result<UnixStream> {
        self.listener.accept().await.map(|(stream, _)| stream)
    }
}

/// Serve one client: read one command line, execute it against the store,
/// write the single-line reply, close.
pub async fn handle_client(stream: UnixStream, store: &mut Store) {
    let mut reader = BufReader::new(stream.take(MAX_COMMAND_LEN));
    let mut line = String::new();

    match timeout(CLIENT_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!("control read error: {}", e);
            return;
        }
        Err(_) => {
            debug!("control client timed out");
            return;
        }
    }

    let reply = execute(line.trim(), store);
    let mut stream = reader.into_inner().into_inner();
    if let Err(e) = stream.write_all(reply.as_bytes()).await {
        debug!("control write error: {}", e);
    }
}

/// Interpret one command line. Bad arguments produce an ERR reply and
/// leave the store untouched.
pub fn execute(line: &str, store: &mut Store) -> String {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.first().copied() {
        Some("flush") => {
            store.flush_cache();
            "OK: cache flushed\n".to_string()
        }
        Some("evict") => {
            let evicted = store.evict_expired();
            debug!("control evict removed {} entries", evicted);
            "OK: expired entries evicted\n".to_string()
        }
        Some("stats") => format!("OK: cache entries: {}\n", store.cache_count()),
        Some("add") => cmd_add(&parts[1..], store),
        Some("del") => cmd_del(&parts[1..], store),
        _ => USAGE.to_string(),
    }
}

fn cmd_add(args: &[&str], store: &mut Store) -> String {
    if args.len() < 3 {
        return "ERR: usage: add NAME TYPE RDATA [TTL]\n".to_string();
    }
    let name = args[0];
    let Some(rtype) = RecordType::from_name(args[1]) else {
        return format!("ERR: unknown record type {}\n", args[1]);
    };
    let Some((rdata, ttl)) = records::split_rdata_ttl(rtype, &args[2..]) else {
        return format!("ERR: bad {} rdata field count\n", rtype);
    };
    if !records::valid_name(name) {
        return format!("ERR: invalid name {}\n", name);
    }
    if !records::valid_rdata(rtype, &rdata) {
        return format!("ERR: invalid {} rdata {}\n", rtype, rdata);
    }

    store.add_local(Record::new(name, rtype, &rdata, ttl.unwrap_or(records::DEFAULT_TTL)));
    "OK: record added\n".to_string()
}

fn cmd_del(args: &[&str], store: &mut Store) -> String {
    if args.len() != 2 {
        return "ERR: usage: del NAME TYPE\n".to_string();
    }
    let Some(rtype) = RecordType::from_name(args[1]) else {
        return format!("ERR: unknown record type {}\n", args[1]);
    };

    let removed = store.delete_local(args[0], rtype);
    debug!("control del removed {} records", removed);
    "OK: record deleted\n".to_string()
}
