//! Three-tier query resolution: local zone, then cache, then upstream.
//! A local-zone hit never consults the cache or the upstream; any miss on
//! the exact (name, type) key falls through to the next tier, so a name
//! that exists locally only under other types is still forwarded.

use tracing::{debug, warn};

use crate::packet::{self, DnsQuery, DnsQuestion};
use crate::records::Record;
use crate::store::Store;
use crate::upstream::UpstreamForwarder;

/// Outcome of resolution; the engine turns this into a wire response.
pub enum Resolution {
    /// Authoritative records from the local zone (AA=1).
    Local(Vec<Record>),
    /// Cache records, TTLs already rewritten to the remaining time.
    Cached(Vec<Record>),
    /// Raw upstream response bytes, returned to the client verbatim.
    Forwarded(Vec<u8>),
    /// Both upstreams failed; reply SERVFAIL.
    Failed,
}

/// The store-backed tiers (local zone, then cache). None means the query
/// must be forwarded.
pub fn lookup_stored(question: &DnsQuestion, store: &Store) -> Option<Resolution> {
    let records = store.lookup_local(&question.name, question.qtype);
    if !records.is_empty() {
        debug!(
            "resolved {} {} from local zone ({} records)",
            question.name,
            question.qtype,
            records.len()
        );
        return Some(Resolution::Local(records));
    }

    let cached = store.lookup_cache(&question.name, question.qtype);
    if !cached.is_empty() {
        debug!(
            "resolved {} {} from cache ({} records)",
            question.name,
            question.qtype,
            cached.len()
        );
        return Some(Resolution::Cached(cached));
    }

    None
}

/// Resolve a query, falling through to the upstream pair on a store miss.
/// Forwarded answers are parsed and cached per RR with their own TTLs.
pub async fn resolve(
    raw_query: &[u8],
    query: &DnsQuery,
    store: &mut Store,
    upstream: &UpstreamForwarder,
    cache_ttl: u32,
) -> Resolution {
    let question = &query.questions[0];

    if let Some(resolution) = lookup_stored(question, store) {
        return resolution;
    }

    match upstream.forward(raw_query).await {
        Ok(response) => {
            cache_upstream_answers(&response, store, cache_ttl);
            debug!("resolved {} {} via upstream", question.name, question.qtype);
            Resolution::Forwarded(response)
        }
        Err(e) => {
            warn!("upstream forward failed for {}: {}", question.name, e);
            Resolution::Failed
        }
    }
}

/// Best-effort per-RR cache population from an upstream response. RRs
/// whose type cannot be rendered in presentation form never reach the
/// cache; an RR carrying TTL 0 gets the configured default.
fn cache_upstream_answers(response: &[u8], store: &mut Store, cache_ttl: u32) {
    match packet::parse_answers(response) {
        Ok((_, records)) => {
            for mut record in records {
                if record.ttl == 0 {
                    record.ttl = cache_ttl;
                }
                store.cache_record(record);
            }
        }
        Err(e) => {
            debug!("not caching unparseable upstream response: {}", e);
        }
    }
}
