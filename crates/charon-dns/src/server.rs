//! The engine: one task owns the UDP socket, the store, and the control
//! listener, multiplexed with select. Queries are serviced in arrival
//! order and each response is sent before the next receive; control
//! commands and the cache sweep run between queries on the same task.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::control::{self, ControlSocket};
use crate::packet::{self, ResponseFlags};
use crate::resolver::{self, Resolution};
use crate::store::Store;
use crate::upstream::UpstreamForwarder;

/// How often expired cache entries are swept out under idle load; the
/// `evict` control command forces a sweep at any time.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Run the resolver until the process is killed. Startup errors (bad
/// listen address, bind failure, control socket failure) propagate;
/// nothing else escapes the loop.
pub async fn run(config: Config, mut store: Store) -> Result<()> {
    let ip: IpAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_addr))?;
    let addr = SocketAddr::new(ip, config.listen_port);
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("failed to bind UDP socket on {}", addr))?;
    info!("DNS server listening on {}", addr);

    let control = ControlSocket::bind(&config.control_socket)?;

    let (primary, secondary) = config.upstream.servers();
    let upstream = UpstreamForwarder::new(primary, secondary, config.upstream_timeout_ms);
    info!("forwarding misses to {} (fallback {})", primary, secondary);

    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    let mut buf = [0u8; 4096];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("UDP recv error: {}", e);
                        continue;
                    }
                };
                if let Some(response) = handle_datagram(&buf[..len], &mut store, &upstream, config.cache_ttl).await {
                    if let Err(e) = socket.send_to(&response, src).await {
                        debug!("failed to send response to {}: {}", src, e);
                    }
                }
            }
            conn = control.accept() => {
                match conn {
                    Ok(stream) => control::handle_client(stream, &mut store).await,
                    Err(e) => warn!("control accept error: {}", e),
                }
            }
            _ = sweep.tick() => {
                let evicted = store.evict_expired();
                if evicted > 0 {
                    debug!("evicted {} expired cache entries", evicted);
                }
            }
        }
    }
}

/// Process one datagram into a response, or None for runts (dropped
/// silently). Responses (QR=1), empty question sections, and parse
/// failures are answered SERVFAIL.
pub async fn handle_datagram(
    datagram: &[u8],
    store: &mut Store,
    upstream: &UpstreamForwarder,
    cache_ttl: u32,
) -> Option<Vec<u8>> {
    if datagram.len() < 12 {
        return None;
    }

    let query = match packet::parse_query(datagram) {
        Ok(query) => query,
        Err(e) => {
            debug!("failed to parse query: {}", e);
            return Some(packet::build_servfail_header(datagram));
        }
    };

    if query.header.is_response() || query.header.qd_count == 0 || query.questions.is_empty() {
        return Some(packet::build_response(&query, &[], ResponseFlags::servfail()));
    }

    let response = match resolver::resolve(datagram, &query, store, upstream, cache_ttl).await {
        Resolution::Local(records) => packet::build_response(&query, &records, ResponseFlags::authoritative()),
        Resolution::Cached(records) => packet::build_response(&query, &records, ResponseFlags::recursive()),
        Resolution::Forwarded(bytes) => bytes,
        Resolution::Failed => packet::build_response(&query, &[], ResponseFlags::servfail()),
    };
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        parse_answers, parse_header, write_question, DnsHeader, DnsQuestion, RCODE_NOERROR, RCODE_SERVFAIL,
    };
    use crate::records::{Record, RecordClass, RecordType};

    /// Forwarder pointed at dead loopback ports; any forward fails fast.
    fn dead_upstream() -> UpstreamForwarder {
        UpstreamForwarder::new(
            "127.0.0.1:9".parse().unwrap(),
            "127.0.0.1:10".parse().unwrap(),
            100,
        )
    }

    fn build_query(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
        let header = DnsHeader {
            id,
            flags: 0x0100,
            qd_count: 1,
            an_count: 0,
            ns_count: 0,
            ar_count: 0,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf);
        write_question(
            &DnsQuestion {
                name: name.to_string(),
                qtype,
                qclass: RecordClass::IN,
            },
            &mut buf,
        );
        buf
    }

    #[tokio::test]
    async fn test_local_answer_is_authoritative() {
        let mut store = Store::new(16);
        store.add_local(Record::new("gateway.styx.local", RecordType::A, "192.168.1.1", 300));

        let query = build_query(0x1111, "gateway.styx.local", RecordType::A);
        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();

        let header = parse_header(&response).unwrap();
        assert_eq!(header.id, 0x1111);
        assert!(header.is_response());
        assert!(header.is_authoritative());
        assert!(header.recursion_available());
        assert_eq!(header.rcode(), RCODE_NOERROR);

        let (_, records) = parse_answers(&response).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rdata, "192.168.1.1");
    }

    #[tokio::test]
    async fn test_query_case_folded_against_local_zone() {
        let mut store = Store::new(16);
        store.add_local(Record::new("gateway.styx.local", RecordType::A, "192.168.1.1", 300));

        let query = build_query(0x2222, "GATEWAY.Styx.Local", RecordType::A);
        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();

        let (header, records) = parse_answers(&response).unwrap();
        assert_eq!(header.rcode(), RCODE_NOERROR);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_answer_not_authoritative() {
        let mut store = Store::new(16);
        store.cache_record(Record::new("example.com", RecordType::A, "93.184.216.34", 60));

        let query = build_query(0x3333, "example.com", RecordType::A);
        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();

        let header = parse_header(&response).unwrap();
        assert!(header.is_response());
        assert!(!header.is_authoritative());
        assert_eq!(header.rcode(), RCODE_NOERROR);
        let (_, records) = parse_answers(&response).unwrap();
        assert_eq!(records[0].rdata, "93.184.216.34");
    }

    #[tokio::test]
    async fn test_runt_dropped_silently() {
        let mut store = Store::new(16);
        assert!(handle_datagram(&[0u8; 11], &mut store, &dead_upstream(), 300).await.is_none());
    }

    #[tokio::test]
    async fn test_response_message_answered_servfail() {
        let mut store = Store::new(16);
        let mut query = build_query(0x4444, "example.com", RecordType::A);
        query[2] |= 0x80; // QR=1

        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();
        let header = parse_header(&response).unwrap();
        assert!(header.is_response());
        assert_eq!(header.rcode(), RCODE_SERVFAIL);
    }

    #[tokio::test]
    async fn test_empty_question_answered_servfail() {
        let mut store = Store::new(16);
        let query = {
            let header = DnsHeader {
                id: 0x5555,
                flags: 0x0100,
                qd_count: 0,
                an_count: 0,
                ns_count: 0,
                ar_count: 0,
            };
            let mut buf = Vec::new();
            header.write_to(&mut buf);
            buf
        };

        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();
        let header = parse_header(&response).unwrap();
        assert_eq!(header.id, 0x5555);
        assert_eq!(header.rcode(), RCODE_SERVFAIL);
    }

    #[tokio::test]
    async fn test_unparseable_question_answered_servfail() {
        let mut store = Store::new(16);
        let mut query = build_query(0x6666, "example.com", RecordType::A);
        query.truncate(15); // cut mid-name

        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();
        let header = parse_header(&response).unwrap();
        assert_eq!(header.id, 0x6666);
        assert_eq!(header.rcode(), RCODE_SERVFAIL);
        assert_eq!(header.qd_count, 0);
    }

    #[tokio::test]
    async fn test_upstream_exhaustion_answered_servfail() {
        let mut store = Store::new(16);
        let query = build_query(0x7777, "example.com", RecordType::A);

        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();
        let header = parse_header(&response).unwrap();
        assert_eq!(header.id, 0x7777);
        assert_eq!(header.rcode(), RCODE_SERVFAIL);
        // The question section is echoed even on failure
        let query_question = &query[12..];
        assert_eq!(&response[12..12 + query_question.len()], query_question);
    }

    #[tokio::test]
    async fn test_type_miss_on_locally_owned_name_forwards() {
        let mut store = Store::new(16);
        store.add_local(Record::new("gateway.styx.local", RecordType::A, "192.168.1.1", 300));

        // AAAA for a name that only has a local A record: the miss takes
        // the cache tier, so a cached AAAA answer is served
        store.cache_record(Record::new("gateway.styx.local", RecordType::AAAA, "fd00::1", 60));
        let query = build_query(0x8888, "gateway.styx.local", RecordType::AAAA);
        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();

        let header = parse_header(&response).unwrap();
        assert!(!header.is_authoritative());
        assert_eq!(header.rcode(), RCODE_NOERROR);
        assert_eq!(header.an_count, 1);

        // Without a cache entry the miss goes upstream; the dead pair
        // turns that into SERVFAIL rather than a local empty answer
        store.flush_cache();
        let response = handle_datagram(&query, &mut store, &dead_upstream(), 300).await.unwrap();
        let header = parse_header(&response).unwrap();
        assert_eq!(header.rcode(), RCODE_SERVFAIL);
    }
}
