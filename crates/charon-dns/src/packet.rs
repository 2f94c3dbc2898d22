//! DNS wire format parser and serializer (RFC 1035).
//! Names and rdata cross this boundary in presentation form; responses are
//! synthesized into the classic 512-octet UDP limit.

use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use crate::records::{self, Record, RecordClass, RecordType};

/// Classic DNS UDP limit; responses that would exceed it stop between RRs
/// and carry the TC bit.
pub const MAX_UDP_RESPONSE: usize = 512;

pub const FLAG_QR: u16 = 0x8000;
pub const FLAG_AA: u16 = 0x0400;
pub const FLAG_TC: u16 = 0x0200;
pub const FLAG_RD: u16 = 0x0100;
pub const FLAG_RA: u16 = 0x0080;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;

#[derive(Error, Debug)]
pub enum DnsParseError {
    #[error("packet truncated at offset {0}")]
    Truncated(usize),
    #[error("name compression loop detected")]
    CompressionLoop,
    #[error("invalid UTF-8 in name")]
    InvalidUtf8,
    #[error("packet too short: {0} bytes")]
    TooShort(usize),
    #[error("name too long (exceeds 255 octets)")]
    NameTooLong,
    #[error("label too long: {0} bytes (max 63)")]
    LabelTooLong(usize),
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("invalid address literal {0:?}")]
    InvalidAddress(String),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("TXT rdata exceeds 255 octets")]
    TxtTooLong,
    #[error("malformed {0} rdata")]
    MalformedRdata(RecordType),
    #[error("{0} records cannot be synthesized")]
    UnsupportedType(RecordType),
}

/// Parsed DNS header (12 bytes)
#[derive(Debug, Clone)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl DnsHeader {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }
    pub fn opcode(&self) -> u8 {
        ((self.flags >> 11) & 0xF) as u8
    }
    pub fn is_authoritative(&self) -> bool {
        self.flags & FLAG_AA != 0
    }
    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }
    pub fn recursion_desired(&self) -> bool {
        self.flags & FLAG_RD != 0
    }
    pub fn recursion_available(&self) -> bool {
        self.flags & FLAG_RA != 0
    }
    pub fn rcode(&self) -> u8 {
        (self.flags & 0xF) as u8
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.to_be_bytes());
        buf.extend_from_slice(&self.flags.to_be_bytes());
        buf.extend_from_slice(&self.qd_count.to_be_bytes());
        buf.extend_from_slice(&self.an_count.to_be_bytes());
        buf.extend_from_slice(&self.ns_count.to_be_bytes());
        buf.extend_from_slice(&self.ar_count.to_be_bytes());
    }
}

/// A parsed DNS question
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

/// A fully parsed DNS query (what we receive from clients)
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    /// Raw bytes of the question section, echoed verbatim into responses.
    pub raw_question_bytes: Vec<u8>,
}

/// Parse a DNS header from bytes.
pub fn parse_header(buf: &[u8]) -> Result<DnsHeader, DnsParseError> {
    if buf.len() < 12 {
        return Err(DnsParseError::TooShort(buf.len()));
    }
    Ok(DnsHeader {
        id: u16::from_be_bytes([buf[0], buf[1]]),
        flags: u16::from_be_bytes([buf[2], buf[3]]),
        qd_count: u16::from_be_bytes([buf[4], buf[5]]),
        an_count: u16::from_be_bytes([buf[6], buf[7]]),
        ns_count: u16::from_be_bytes([buf[8], buf[9]]),
        ar_count: u16::from_be_bytes([buf[10], buf[11]]),
    })
}

/// Parse a DNS name from the wire format, following compression pointers.
/// Returns the presentation-form name and the offset just past the name's
/// bytes at the start position.
pub fn parse_name(buf: &[u8], start: usize) -> Result<(String, usize), DnsParseError> {
    let mut cursor = start;
    let mut labels: Vec<&str> = Vec::new();
    // Octets the name occupies once decompressed, terminator included;
    // bounded at 255 no matter how many pointers were crossed
    let mut wire_len = 1usize;
    // Crossing a pointer moves the cursor away from the name's own bytes,
    // so the post-name offset is pinned at the first crossing
    let mut resume_at = None;
    let mut hop_budget = 8u8;

    loop {
        let &tag = buf.get(cursor).ok_or(DnsParseError::Truncated(cursor))?;
        match tag {
            0 => break,
            ptr if ptr & 0xC0 == 0xC0 => {
                let &low = buf.get(cursor + 1).ok_or(DnsParseError::Truncated(cursor + 1))?;
                if hop_budget == 0 {
                    return Err(DnsParseError::CompressionLoop);
                }
                hop_budget -= 1;
                resume_at.get_or_insert(cursor + 2);
                cursor = usize::from(ptr & 0x3F) << 8 | usize::from(low);
            }
            len => {
                // Covers the reserved 0x40/0x80 label kinds too: any tag
                // that is not a pointer must be a plain length of 1-63
                let len = usize::from(len);
                if len > 63 {
                    return Err(DnsParseError::LabelTooLong(len));
                }
                let body = cursor + 1;
                if body + len > buf.len() {
                    return Err(DnsParseError::Truncated(body));
                }
                wire_len += 1 + len;
                if wire_len > 255 {
                    return Err(DnsParseError::NameTooLong);
                }
                let label = std::str::from_utf8(&buf[body..body + len])
                    .map_err(|_| DnsParseError::InvalidUtf8)?;
                labels.push(label);
                cursor = body + len;
            }
        }
    }

    Ok((labels.join("."), resume_at.unwrap_or(cursor + 1)))
}

/// Encode a presentation-form name into wire format labels followed by a
/// zero octet. A trailing root dot is accepted; labels are clamped to 63
/// octets.
pub fn encode_name(name: &str, buf: &mut Vec<u8>) {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        buf.push(0);
        return;
    }
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        let len = label.len().min(63);
        buf.push(len as u8);
        buf.extend_from_slice(&label.as_bytes()[..len]);
    }
    buf.push(0);
}

/// Encode a question section entry: name, QTYPE, QCLASS.
pub fn write_question(question: &DnsQuestion, buf: &mut Vec<u8>) {
    encode_name(&question.name, buf);
    buf.extend_from_slice(&question.qtype.to_u16().to_be_bytes());
    buf.extend_from_slice(&question.qclass.to_u16().to_be_bytes());
}

/// Parse a DNS query packet from raw bytes. Question names are normalized
/// to lowercase; the raw question bytes are kept for the response echo.
pub fn parse_query(buf: &[u8]) -> Result<DnsQuery, DnsParseError> {
    let header = parse_header(buf)?;
    let mut offset = 12;
    let question_start = offset;
    let mut questions = Vec::with_capacity(header.qd_count as usize);

    for _ in 0..header.qd_count {
        let (name, next_offset) = parse_name(buf, offset)?;
        offset = next_offset;

        if offset + 4 > buf.len() {
            return Err(DnsParseError::Truncated(offset));
        }

        let qtype = RecordType::from_u16(u16::from_be_bytes([buf[offset], buf[offset + 1]]));
        let qclass = RecordClass::from_u16(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
        offset += 4;

        questions.push(DnsQuestion {
            name: name.to_lowercase(),
            qtype,
            qclass,
        });
    }

    Ok(DnsQuery {
        header,
        questions,
        raw_question_bytes: buf[question_start..offset].to_vec(),
    })
}

/// Parse the answer section of a response into presentation-form records.
/// Records whose type has no presentation rendering are skipped.
pub fn parse_answers(buf: &[u8]) -> Result<(DnsHeader, Vec<Record>), DnsParseError> {
    let header = parse_header(buf)?;
    let mut offset = 12;

    // Skip questions
    for _ in 0..header.qd_count {
        let (_, next_offset) = parse_name(buf, offset)?;
        offset = next_offset + 4; // skip QTYPE + QCLASS
    }

    let mut answers = Vec::with_capacity(header.an_count as usize);

    for _ in 0..header.an_count {
        if offset >= buf.len() {
            break;
        }
        let (name, next_offset) = parse_name(buf, offset)?;
        offset = next_offset;

        if offset + 10 > buf.len() {
            return Err(DnsParseError::Truncated(offset));
        }

        let rtype = RecordType::from_u16(u16::from_be_bytes([buf[offset], buf[offset + 1]]));
        let class = RecordClass::from_u16(u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]));
        let ttl = u32::from_be_bytes([buf[offset + 4], buf[offset + 5], buf[offset + 6], buf[offset + 7]]);
        let rdlength = u16::from_be_bytes([buf[offset + 8], buf[offset + 9]]) as usize;
        offset += 10;

        if offset + rdlength > buf.len() {
            return Err(DnsParseError::Truncated(offset));
        }

        if let Some(rdata) = decode_rdata(buf, offset, rdlength, rtype) {
            answers.push(Record {
                name,
                rtype,
                class,
                ttl,
                rdata,
            });
        }
        offset += rdlength;
    }

    Ok((header, answers))
}

/// Render wire rdata back into presentation form. Returns None for types
/// we do not render (including OPT pseudo-records and unknown codes).
fn decode_rdata(buf: &[u8], offset: usize, rdlength: usize, rtype: RecordType) -> Option<String> {
    match rtype {
        RecordType::A => {
            if rdlength != 4 {
                return None;
            }
            Some(Ipv4Addr::new(buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]).to_string())
        }
        RecordType::AAAA => {
            if rdlength != 16 {
                return None;
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[offset..offset + 16]);
            Some(Ipv6Addr::from(octets).to_string())
        }
        RecordType::CNAME | RecordType::NS | RecordType::PTR => {
            let (name, _) = parse_name(buf, offset).ok()?;
            Some(name)
        }
        RecordType::MX => {
            if rdlength < 3 {
                return None;
            }
            let preference = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let (exchange, _) = parse_name(buf, offset + 2).ok()?;
            Some(format!("{} {}", preference, exchange))
        }
        RecordType::TXT => {
            // One or more <length><string> pairs, concatenated
            let mut txt = String::new();
            let mut pos = offset;
            let end = offset + rdlength;
            while pos < end {
                let len = buf[pos] as usize;
                pos += 1;
                if pos + len > end {
                    break;
                }
                if let Ok(s) = std::str::from_utf8(&buf[pos..pos + len]) {
                    txt.push_str(s);
                }
                pos += len;
            }
            Some(txt)
        }
        RecordType::SOA => {
            let (mname, next_offset) = parse_name(buf, offset).ok()?;
            let (rname, next_offset) = parse_name(buf, next_offset).ok()?;
            if next_offset + 20 > buf.len() {
                return None;
            }
            let o = next_offset;
            let mut counters = [0u32; 5];
            for (i, counter) in counters.iter_mut().enumerate() {
                let at = o + i * 4;
                *counter = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            }
            Some(format!(
                "{} {} {} {} {} {} {}",
                mname, rname, counters[0], counters[1], counters[2], counters[3], counters[4]
            ))
        }
        RecordType::Unknown(_) => None,
    }
}

/// Encode a full resource record: name, TYPE, CLASS, TTL, RDLENGTH, RDATA.
/// On error the buffer contents past the starting length are unspecified;
/// callers encode into a scratch buffer and discard it.
pub fn encode_rr(record: &Record, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    if !records::valid_name(&record.name) {
        return Err(EncodeError::InvalidName(record.name.clone()));
    }
    encode_name(&record.name, buf);
    buf.extend_from_slice(&record.rtype.to_u16().to_be_bytes());
    buf.extend_from_slice(&record.class.to_u16().to_be_bytes());
    buf.extend_from_slice(&record.ttl.to_be_bytes());
    encode_rdata(record, buf)
}

/// Encode RDLENGTH + RDATA from presentation text.
fn encode_rdata(record: &Record, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    match record.rtype {
        RecordType::A => {
            let ip: Ipv4Addr = record
                .rdata
                .parse()
                .map_err(|_| EncodeError::InvalidAddress(record.rdata.clone()))?;
            buf.extend_from_slice(&4u16.to_be_bytes());
            buf.extend_from_slice(&ip.octets());
        }
        RecordType::AAAA => {
            let ip: Ipv6Addr = record
                .rdata
                .parse()
                .map_err(|_| EncodeError::InvalidAddress(record.rdata.clone()))?;
            buf.extend_from_slice(&16u16.to_be_bytes());
            buf.extend_from_slice(&ip.octets());
        }
        RecordType::CNAME | RecordType::NS | RecordType::PTR => {
            if !records::valid_name(&record.rdata) {
                return Err(EncodeError::InvalidName(record.rdata.clone()));
            }
            let mut rdata_buf = Vec::new();
            encode_name(&record.rdata, &mut rdata_buf);
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RecordType::TXT => {
            let text = record.rdata.as_bytes();
            if text.len() > 255 {
                return Err(EncodeError::TxtTooLong);
            }
            buf.extend_from_slice(&((text.len() + 1) as u16).to_be_bytes());
            buf.push(text.len() as u8);
            buf.extend_from_slice(text);
        }
        RecordType::MX => {
            let (preference, exchange) = records::parse_mx_fields(&record.rdata)
                .ok_or(EncodeError::MalformedRdata(record.rtype))?;
            let mut rdata_buf = Vec::new();
            rdata_buf.extend_from_slice(&preference.to_be_bytes());
            encode_name(&exchange, &mut rdata_buf);
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RecordType::SOA => {
            let (mname, rname, counters) = records::parse_soa_fields(&record.rdata)
                .ok_or(EncodeError::MalformedRdata(record.rtype))?;
            let mut rdata_buf = Vec::new();
            encode_name(&mname, &mut rdata_buf);
            encode_name(&rname, &mut rdata_buf);
            for counter in counters {
                rdata_buf.extend_from_slice(&counter.to_be_bytes());
            }
            buf.extend_from_slice(&(rdata_buf.len() as u16).to_be_bytes());
            buf.extend_from_slice(&rdata_buf);
        }
        RecordType::Unknown(_) => {
            return Err(EncodeError::UnsupportedType(record.rtype));
        }
    }
    Ok(())
}

/// Header flags for a synthesized response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseFlags {
    pub authoritative: bool,
    pub rcode: u8,
}

impl ResponseFlags {
    /// Local-zone answer: AA=1, NoError.
    pub fn authoritative() -> Self {
        Self { authoritative: true, rcode: RCODE_NOERROR }
    }
    /// Cache answer: AA=0, NoError.
    pub fn recursive() -> Self {
        Self { authoritative: false, rcode: RCODE_NOERROR }
    }
    pub fn servfail() -> Self {
        Self { authoritative: false, rcode: RCODE_SERVFAIL }
    }
}

/// Build a response from a query and answer records. The question section
/// is echoed verbatim; ID and RD come from the query; QR and RA are set.
/// Records that fail to encode are dropped. Emission stops between RRs
/// when the 512-octet limit would be exceeded, setting TC; ANCOUNT always
/// matches the records actually written.
pub fn build_response(query: &DnsQuery, answers: &[Record], flags: ResponseFlags) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_UDP_RESPONSE);

    let mut flag_bits: u16 = FLAG_QR | FLAG_RA | (flags.rcode as u16 & 0xF);
    if query.header.recursion_desired() {
        flag_bits |= FLAG_RD;
    }
    if flags.authoritative {
        flag_bits |= FLAG_AA;
    }

    let header = DnsHeader {
        id: query.header.id,
        flags: flag_bits,
        qd_count: query.header.qd_count,
        an_count: 0, // patched below
        ns_count: 0,
        ar_count: 0,
    };
    header.write_to(&mut buf);
    buf.extend_from_slice(&query.raw_question_bytes);

    let mut written: u16 = 0;
    let mut rr = Vec::with_capacity(128);
    for record in answers {
        rr.clear();
        if encode_rr(record, &mut rr).is_err() {
            continue;
        }
        if buf.len() + rr.len() > MAX_UDP_RESPONSE {
            buf[2] |= (FLAG_TC >> 8) as u8;
            break;
        }
        buf.extend_from_slice(&rr);
        written += 1;
    }
    buf[6..8].copy_from_slice(&written.to_be_bytes());

    buf
}

/// Header-only SERVFAIL for datagrams whose question section could not be
/// parsed. Echoes ID and RD from the raw header; all counts are zero.
pub fn build_servfail_header(datagram: &[u8]) -> Vec<u8> {
    debug_assert!(datagram.len() >= 12);
    let mut flags = FLAG_QR | FLAG_RA | RCODE_SERVFAIL as u16;
    if datagram[2] & 0x01 != 0 {
        flags |= FLAG_RD;
    }
    let header = DnsHeader {
        id: u16::from_be_bytes([datagram[0], datagram[1]]),
        flags,
        qd_count: 0,
        an_count: 0,
        ns_count: 0,
        ar_count: 0,
    };
    let mut buf = Vec::with_capacity(12);
    header.write_to(&mut buf);
    buf
}
