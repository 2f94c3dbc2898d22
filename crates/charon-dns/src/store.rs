//! The two in-memory relations: authoritative local zones (no expiry) and
//! the cache of forwarded answers (TTL-bounded from insertion time). Both
//! are keyed by (lowercased name, type); stored records keep their casing.
//!
//! The store has a single owner, the engine task; the control plane
//! mutates it inline from that task, so there is no locking.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::records::{self, Record, RecordType};

#[derive(Hash, Eq, PartialEq, Clone)]
struct StoreKey {
    name: String,
    rtype: u16,
}

impl StoreKey {
    fn new(name: &str, rtype: RecordType) -> Self {
        Self {
            name: name.to_lowercase(),
            rtype: rtype.to_u16(),
        }
    }
}

struct CacheEntry {
    record: Record,
    inserted_at: Instant,
}

impl CacheEntry {
    /// Seconds of TTL left at `now`; an entry is observable only while
    /// this is nonzero.
    fn remaining_at(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.inserted_at).as_secs();
        (self.record.ttl as u64).saturating_sub(elapsed) as u32
    }

    fn is_expired_at(&self, now: Instant) -> bool {
        self.remaining_at(now) == 0
    }
}

pub struct Store {
    local: FxHashMap<StoreKey, Vec<Record>>,
    cache: FxHashMap<StoreKey, Vec<CacheEntry>>,
}

impl Store {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            local: FxHashMap::default(),
            cache: FxHashMap::with_capacity_and_hasher(cache_capacity, Default::default()),
        }
    }

    // --- Local zone operations (mutated by the control plane) ---

    /// Append a record; RRsets with repeated rdata are allowed.
    pub fn add_local(&mut self, record: Record) {
        let key = StoreKey::new(&record.name, record.rtype);
        self.local.entry(key).or_default().push(record);
    }

    /// All records for (name, type); an empty list is a miss.
    pub fn lookup_local(&self, name: &str, rtype: RecordType) -> Vec<Record> {
        self.local
            .get(&StoreKey::new(name, rtype))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether any local record exists under this name, regardless of
    /// type. Distinguishes NODATA from a fully absent name.
    pub fn has_any_local(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.local.keys().any(|key| key.name == name)
    }

    /// Remove all records with the given key; returns how many.
    pub fn delete_local(&mut self, name: &str, rtype: RecordType) -> usize {
        self.local
            .remove(&StoreKey::new(name, rtype))
            .map(|records| records.len())
            .unwrap_or(0)
    }

    /// Load a text zone file: `NAME TYPE RDATA [TTL]` per line, `#` or `;`
    /// comments, blank lines ignored, invalid lines skipped. Returns the
    /// number of records inserted.
    pub fn load_zone_file(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read zone file {}", path.display()))?;

        let mut count = 0;
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                warn!("invalid zone line: {}", line);
                continue;
            }

            let name = parts[0];
            let Some(rtype) = RecordType::from_name(parts[1]) else {
                warn!("unknown record type in zone line: {}", line);
                continue;
            };
            let Some((rdata, ttl)) = records::split_rdata_ttl(rtype, &parts[2..]) else {
                warn!("invalid zone line: {}", line);
                continue;
            };
            if !records::valid_name(name) || !records::valid_rdata(rtype, &rdata) {
                warn!("invalid zone line: {}", line);
                continue;
            }

            self.add_local(Record::new(name, rtype, &rdata, ttl.unwrap_or(records::DEFAULT_TTL)));
            count += 1;
        }

        Ok(count)
    }

    // --- Cache operations (mutated by the engine) ---

    /// Insert a forwarded answer, stamped with the current time. Expired
    /// entries under the same key are dropped first so a refill does not
    /// stack on stale data.
    pub fn cache_record(&mut self, record: Record) {
        self.cache_record_at(record, Instant::now());
    }

    fn cache_record_at(&mut self, record: Record, now: Instant) {
        let key = StoreKey::new(&record.name, record.rtype);
        let entries = self.cache.entry(key).or_default();
        entries.retain(|entry| !entry.is_expired_at(now));
        entries.push(CacheEntry {
            record,
            inserted_at: now,
        });
    }

    /// Live entries for (name, type), with each record's TTL rewritten to
    /// the remaining time.
    pub fn lookup_cache(&self, name: &str, rtype: RecordType) -> Vec<Record> {
        self.lookup_cache_at(name, rtype, Instant::now())
    }

    fn lookup_cache_at(&self, name: &str, rtype: RecordType, now: Instant) -> Vec<Record> {
        let Some(entries) = self.cache.get(&StoreKey::new(name, rtype)) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                let remaining = entry.remaining_at(now);
                (remaining > 0).then(|| {
                    let mut record = entry.record.clone();
                    record.ttl = remaining;
                    record
                })
            })
            .collect()
    }

    pub fn flush_cache(&mut self) {
        self.cache.clear();
    }

    /// Delete entries whose TTL has run out; returns how many.
    pub fn evict_expired(&mut self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&mut self, now: Instant) -> usize {
        let before = self.cache_count();
        self.cache.retain(|_, entries| {
            entries.retain(|entry| !entry.is_expired_at(now));
            !entries.is_empty()
        });
        before - self.cache_count()
    }

    /// Number of cache entries, live and expired alike.
    pub fn cache_count(&self) -> usize {
        self.cache.values().map(|entries| entries.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_add_and_lookup_local() {
        let mut store = Store::new(16);
        store.add_local(Record::new("gateway.styx.local", RecordType::A, "192.168.1.1", 300));

        let records = store.lookup_local("gateway.styx.local", RecordType::A);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rdata, "192.168.1.1");
        assert!(store.lookup_local("gateway.styx.local", RecordType::AAAA).is_empty());
        assert!(store.lookup_local("other.styx.local", RecordType::A).is_empty());
    }

    #[test]
    fn test_lookup_local_case_insensitive() {
        let mut store = Store::new(16);
        store.add_local(Record::new("Gateway.Styx.LOCAL", RecordType::A, "192.168.1.1", 300));

        let records = store.lookup_local("gateway.styx.local", RecordType::A);
        assert_eq!(records.len(), 1);
        // Stored casing is preserved in the returned record
        assert_eq!(records[0].name, "Gateway.Styx.LOCAL");
        assert_eq!(store.lookup_local("GATEWAY.STYX.LOCAL", RecordType::A).len(), 1);
    }

    #[test]
    fn test_rrset_appends_without_dedup() {
        let mut store = Store::new(16);
        store.add_local(Record::new("web.styx.local", RecordType::A, "10.0.0.1", 300));
        store.add_local(Record::new("web.styx.local", RecordType::A, "10.0.0.2", 300));
        store.add_local(Record::new("web.styx.local", RecordType::A, "10.0.0.2", 300));

        assert_eq!(store.lookup_local("web.styx.local", RecordType::A).len(), 3);
    }

    #[test]
    fn test_delete_local_removes_whole_rrset() {
        let mut store = Store::new(16);
        store.add_local(Record::new("web.styx.local", RecordType::A, "10.0.0.1", 300));
        store.add_local(Record::new("web.styx.local", RecordType::A, "10.0.0.2", 300));
        store.add_local(Record::new("web.styx.local", RecordType::AAAA, "fd00::1", 300));

        assert_eq!(store.delete_local("WEB.styx.local", RecordType::A), 2);
        assert!(store.lookup_local("web.styx.local", RecordType::A).is_empty());
        // Other types under the same name survive
        assert_eq!(store.lookup_local("web.styx.local", RecordType::AAAA).len(), 1);
    }

    #[test]
    fn test_has_any_local() {
        let mut store = Store::new(16);
        assert!(!store.has_any_local("web.styx.local"));

        store.add_local(Record::new("web.styx.local", RecordType::AAAA, "fd00::1", 300));
        assert!(store.has_any_local("web.styx.local"));
        assert!(store.has_any_local("WEB.STYX.LOCAL"));
        assert!(!store.has_any_local("other.styx.local"));

        store.delete_local("web.styx.local", RecordType::AAAA);
        assert!(!store.has_any_local("web.styx.local"));
    }

    #[test]
    fn test_cache_remaining_ttl() {
        let mut store = Store::new(16);
        let t0 = Instant::now();
        store.cache_record_at(Record::new("example.com", RecordType::A, "93.184.216.34", 60), t0);

        let records = store.lookup_cache_at("example.com", RecordType::A, t0 + Duration::from_secs(20));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ttl, 40);

        // At exactly t0 + ttl the entry is no longer observable
        assert!(store.lookup_cache_at("example.com", RecordType::A, t0 + Duration::from_secs(60)).is_empty());
        // But it still counts until evicted
        assert_eq!(store.cache_count(), 1);
    }

    #[test]
    fn test_cache_case_insensitive() {
        let mut store = Store::new(16);
        let t0 = Instant::now();
        store.cache_record_at(Record::new("Example.COM", RecordType::A, "93.184.216.34", 60), t0);

        assert_eq!(store.lookup_cache_at("example.com", RecordType::A, t0).len(), 1);
    }

    #[test]
    fn test_evict_expired() {
        let mut store = Store::new(16);
        let t0 = Instant::now();
        store.cache_record_at(Record::new("a.example", RecordType::A, "1.1.1.1", 30), t0);
        store.cache_record_at(Record::new("b.example", RecordType::A, "2.2.2.2", 120), t0);

        assert_eq!(store.evict_expired_at(t0 + Duration::from_secs(60)), 1);
        assert_eq!(store.cache_count(), 1);
        assert!(store.lookup_cache_at("a.example", RecordType::A, t0 + Duration::from_secs(60)).is_empty());
        assert_eq!(store.lookup_cache_at("b.example", RecordType::A, t0 + Duration::from_secs(60)).len(), 1);
    }

    #[test]
    fn test_cache_refill_drops_stale_entries() {
        let mut store = Store::new(16);
        let t0 = Instant::now();
        store.cache_record_at(Record::new("example.com", RecordType::A, "1.1.1.1", 10), t0);
        // Refill after expiry; the stale entry must not stack
        store.cache_record_at(
            Record::new("example.com", RecordType::A, "1.1.1.2", 60),
            t0 + Duration::from_secs(30),
        );

        assert_eq!(store.cache_count(), 1);
        let records = store.lookup_cache_at("example.com", RecordType::A, t0 + Duration::from_secs(31));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rdata, "1.1.1.2");
    }

    #[test]
    fn test_flush_cache() {
        let mut store = Store::new(16);
        store.cache_record(Record::new("example.com", RecordType::A, "1.1.1.1", 300));
        store.cache_record(Record::new("example.org", RecordType::A, "2.2.2.2", 300));
        assert_eq!(store.cache_count(), 2);

        store.flush_cache();
        assert_eq!(store.cache_count(), 0);
        assert!(store.lookup_cache("example.com", RecordType::A).is_empty());
    }

    #[test]
    fn test_local_and_cache_are_disjoint() {
        let mut store = Store::new(16);
        store.add_local(Record::new("web.styx.local", RecordType::A, "10.0.0.1", 300));
        store.cache_record(Record::new("example.com", RecordType::A, "1.1.1.1", 300));

        store.flush_cache();
        assert_eq!(store.lookup_local("web.styx.local", RecordType::A).len(), 1);
        assert!(store.lookup_cache("web.styx.local", RecordType::A).is_empty());
    }

    #[test]
    fn test_load_zone_file_skips_invalid_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# charon zone file").unwrap();
        writeln!(file, "; alternate comment style").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "gateway.styx.local A 192.168.1.1").unwrap();
        writeln!(file, "gateway.styx.local AAAA fd00::1 600").unwrap();
        writeln!(file, "dns.styx.local CNAME gateway.styx.local.").unwrap();
        writeln!(file, "styx.local MX 10 mail.styx.local 900").unwrap();
        writeln!(file, "bad-line-only-two").unwrap();
        writeln!(file, "host.styx.local BOGUS 10.0.0.1").unwrap();
        writeln!(file, "host.styx.local A 999.0.0.1").unwrap();
        writeln!(file, "host.styx.local A 10.0.0.1 notttl extra").unwrap();

        let mut store = Store::new(16);
        let count = store.load_zone_file(file.path()).unwrap();
        assert_eq!(count, 4);

        assert_eq!(store.lookup_local("gateway.styx.local", RecordType::A).len(), 1);
        let aaaa = store.lookup_local("gateway.styx.local", RecordType::AAAA);
        assert_eq!(aaaa[0].ttl, 600);
        assert_eq!(
            store.lookup_local("styx.local", RecordType::MX)[0].rdata,
            "10 mail.styx.local"
        );
        assert!(store.lookup_local("host.styx.local", RecordType::A).is_empty());
    }

    #[test]
    fn test_load_zone_file_missing_path() {
        let mut store = Store::new(16);
        assert!(store.load_zone_file(Path::new("/nonexistent/zone.txt")).is_err());
    }
}
