use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// TTL applied to zone-file lines and `add` commands that omit one.
pub const DEFAULT_TTL: u32 = 300;

/// DNS record types we recognize by name and wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    Unknown(u16),
}

impl RecordType {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            12 => Self::PTR,
            15 => Self::MX,
            16 => Self::TXT,
            28 => Self::AAAA,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::A => 1,
            Self::NS => 2,
            Self::CNAME => 5,
            Self::SOA => 6,
            Self::PTR => 12,
            Self::MX => 15,
            Self::TXT => 16,
            Self::AAAA => 28,
            Self::Unknown(v) => v,
        }
    }

    /// Parse a presentation-form type name ("A", "aaaa", ...). Unknown
    /// codes are never synthesized locally, so numeric forms are rejected.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "A" => Some(Self::A),
            "NS" => Some(Self::NS),
            "CNAME" => Some(Self::CNAME),
            "SOA" => Some(Self::SOA),
            "PTR" => Some(Self::PTR),
            "MX" => Some(Self::MX),
            "TXT" => Some(Self::TXT),
            "AAAA" => Some(Self::AAAA),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::NS => write!(f, "NS"),
            Self::CNAME => write!(f, "CNAME"),
            Self::SOA => write!(f, "SOA"),
            Self::PTR => write!(f, "PTR"),
            Self::MX => write!(f, "MX"),
            Self::TXT => write!(f, "TXT"),
            Self::AAAA => write!(f, "AAAA"),
            Self::Unknown(v) => write!(f, "TYPE{}", v),
        }
    }
}

/// DNS record class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    IN,
    Any,
    Unknown(u16),
}

impl RecordClass {
    pub fn from_u16(val: u16) -> Self {
        match val {
            1 => Self::IN,
            255 => Self::Any,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            Self::IN => 1,
            Self::Any => 255,
            Self::Unknown(v) => v,
        }
    }
}

/// A resource record with rdata held in presentation form
/// ("192.168.1.10", "fd00::1", "target.example.", a TXT string).
/// Wire encoding happens at response-synthesis time.
#[derive(Debug, Clone)]
pub struct Record {
    pub name: String,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    pub rdata: String,
}

impl Record {
    pub fn new(name: &str, rtype: RecordType, rdata: &str, ttl: u32) -> Self {
        Self {
            name: name.to_string(),
            rtype,
            class: RecordClass::IN,
            ttl,
            rdata: rdata.to_string(),
        }
    }
}

/// Presentation-form name check: 1-63 octets per label, 253 octets total
/// (255 on the wire). A single trailing dot is allowed.
pub fn valid_name(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| !label.is_empty() && label.len() <= 63)
}

/// Check that rdata text can be wire-encoded for the given type. Used by
/// the control plane and the zone loader so a bad record never enters the
/// local relation.
pub fn valid_rdata(rtype: RecordType, rdata: &str) -> bool {
    match rtype {
        RecordType::A => rdata.parse::<Ipv4Addr>().is_ok(),
        RecordType::AAAA => rdata.parse::<Ipv6Addr>().is_ok(),
        RecordType::CNAME | RecordType::NS | RecordType::PTR => valid_name(rdata),
        RecordType::TXT => rdata.len() <= 255,
        RecordType::MX => parse_mx_fields(rdata).is_some(),
        RecordType::SOA => parse_soa_fields(rdata).is_some(),
        RecordType::Unknown(_) => false,
    }
}

/// MX presentation form: "PREFERENCE EXCHANGE".
pub(crate) fn parse_mx_fields(rdata: &str) -> Option<(u16, String)> {
    let mut fields = rdata.split_whitespace();
    let preference = fields.next()?.parse::<u16>().ok()?;
    let exchange = fields.next()?;
    if fields.next().is_some() || !valid_name(exchange) {
        return None;
    }
    Some((preference, exchange.to_string()))
}

/// SOA presentation form: "MNAME RNAME SERIAL REFRESH RETRY EXPIRE MINIMUM".
pub(crate) fn parse_soa_fields(rdata: &str) -> Option<(String, String, [u32; 5])> {
    let fields: Vec<&str> = rdata.split_whitespace().collect();
    if fields.len() != 7 || !valid_name(fields[0]) || !valid_name(fields[1]) {
        return None;
    }
    let mut counters = [0u32; 5];
    for (i, field) in fields[2..].iter().enumerate() {
        counters[i] = field.parse().ok()?;
    }
    Some((fields[0].to_string(), fields[1].to_string(), counters))
}

fn rdata_field_count(rtype: RecordType) -> usize {
    match rtype {
        RecordType::SOA => 7,
        RecordType::MX => 2,
        _ => 1,
    }
}

/// Split the whitespace-separated fields after NAME and TYPE (on a zone
/// line or an `add` command) into the rdata text and an optional trailing
/// TTL. Returns None when the field count does not fit the type.
pub fn split_rdata_ttl(rtype: RecordType, fields: &[&str]) -> Option<(String, Option<u32>)> {
    let expected = rdata_field_count(rtype);
    if fields.len() == expected {
        return Some((fields.join(" "), None));
    }
    if fields.len() == expected + 1 {
        if let Ok(ttl) = fields[expected].parse::<u32>() {
            return Some((fields[..expected].join(" "), Some(ttl)));
        }
    }
    None
}
