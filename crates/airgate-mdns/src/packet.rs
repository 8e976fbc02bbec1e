use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::MdnsError;

/// mDNS runs on UDP/5353.
pub const MDNS_PORT: u16 = 5353;

/// Largest packet the responder will produce.
pub const MAX_PACKET_LEN: usize = 9 * 1024;

pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_ANY: u16 = 255;

pub const CLASS_IN: u16 = 1;

/// Top bit of the class field: unicast-response-requested on questions,
/// cache-flush on answers.
pub const CLASS_TOP_BIT: u16 = 0x8000;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;

const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_JUMPS: usize = 32;

/// A DNS domain name, stored without a trailing dot. Comparison and hashing
/// are ASCII-case-insensitive, matching DNS semantics.
#[derive(Debug, Clone, Eq)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        let mut s = name.into();
        while s.ends_with('.') {
            s.pop();
        }
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|l| !l.is_empty())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// One entry of the question section.
#[derive(Debug, Clone)]
pub struct Question {
    pub name: Name,
    pub qtype: u16,
    pub qclass: u16,
}

impl Question {
    pub fn new(name: impl Into<Name>, qtype: u16) -> Self {
        Self {
            name: name.into(),
            qtype,
            qclass: CLASS_IN,
        }
    }

    /// Did the querier set the unicast-response bit?
    pub fn unicast_requested(&self) -> bool {
        self.qclass & CLASS_TOP_BIT != 0
    }

    /// Clear the unicast-response bit, returning whether it was set.
    pub fn take_unicast_bit(&mut self) -> bool {
        let set = self.unicast_requested();
        self.qclass &= !CLASS_TOP_BIT;
        set
    }
}

/// Typed rdata for the record types the responder serves. Anything else is
/// kept raw so parsing foreign packets never fails on exotic types.
#[derive(Debug, Clone, PartialEq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ptr(Name),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    Txt(Vec<String>),
    Unknown {
        rtype: u16,
        data: Vec<u8>,
    },
}

impl RData {
    pub fn rtype(&self) -> u16 {
        match self {
            RData::A(_) => TYPE_A,
            RData::Aaaa(_) => TYPE_AAAA,
            RData::Ptr(_) => TYPE_PTR,
            RData::Srv { .. } => TYPE_SRV,
            RData::Txt(_) => TYPE_TXT,
            RData::Unknown { rtype, .. } => *rtype,
        }
    }
}

/// One resource record.
#[derive(Debug, Clone)]
pub struct Record {
    pub name: Name,
    pub ttl: u32,
    /// mDNS cache-flush bit (top bit of the class field).
    pub cache_flush: bool,
    pub rdata: RData,
}

/// A whole DNS message.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// A query with a single question.
    pub fn query(question: Question) -> Self {
        Self {
            questions: vec![question],
            ..Default::default()
        }
    }

    /// An authoritative mDNS response: QR=1, AA=1, ID=0, no questions.
    pub fn response(answers: Vec<Record>) -> Self {
        Self {
            id: 0,
            flags: FLAG_QR | FLAG_AA,
            answers,
            ..Default::default()
        }
    }

    pub fn is_query(&self) -> bool {
        self.flags & FLAG_QR == 0
    }

    /// Parse a datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, MdnsError> {
        let mut pos = 0usize;
        let id = read_u16(buf, &mut pos)?;
        let flags = read_u16(buf, &mut pos)?;
        let qd = read_u16(buf, &mut pos)? as usize;
        let an = read_u16(buf, &mut pos)? as usize;
        let ns = read_u16(buf, &mut pos)? as usize;
        let ar = read_u16(buf, &mut pos)? as usize;

        let mut questions = Vec::with_capacity(qd);
        for _ in 0..qd {
            let name = read_name(buf, &mut pos)?;
            let qtype = read_u16(buf, &mut pos)?;
            let qclass = read_u16(buf, &mut pos)?;
            questions.push(Question { name, qtype, qclass });
        }

        let read_records = |count: usize, pos: &mut usize| -> Result<Vec<Record>, MdnsError> {
            let mut records = Vec::with_capacity(count);
            for _ in 0..count {
                records.push(read_record(buf, pos)?);
            }
            Ok(records)
        };

        let answers = read_records(an, &mut pos)?;
        let authorities = read_records(ns, &mut pos)?;
        let additionals = read_records(ar, &mut pos)?;

        Ok(Self {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Serialise the message. Names are written uncompressed. The output
    /// never exceeds [`MAX_PACKET_LEN`]: records that would push it past the
    /// cap are dropped from the packet (and from the section counts), so a
    /// large answer set still yields a valid, truncated response. Only a
    /// message whose header and question section alone overflow is refused.
    pub fn encode(&self) -> Result<Vec<u8>, MdnsError> {
        let mut buf = Vec::with_capacity(512);
        write_u16(&mut buf, self.id);
        write_u16(&mut buf, self.flags);
        write_u16(&mut buf, self.questions.len() as u16);
        // Record counts are patched in once we know what fits.
        let counts_at = buf.len();
        write_u16(&mut buf, 0);
        write_u16(&mut buf, 0);
        write_u16(&mut buf, 0);

        for q in &self.questions {
            write_name(&mut buf, &q.name)?;
            write_u16(&mut buf, q.qtype);
            write_u16(&mut buf, q.qclass);
        }
        if buf.len() > MAX_PACKET_LEN {
            return Err(MdnsError::PacketTooLarge { len: buf.len() });
        }

        let sections = [&self.answers, &self.authorities, &self.additionals];
        let mut written = [0u16; 3];
        for (section, records) in sections.iter().enumerate() {
            for record in records.iter() {
                let mark = buf.len();
                write_record(&mut buf, record)?;
                if buf.len() > MAX_PACKET_LEN {
                    buf.truncate(mark);
                } else {
                    written[section] += 1;
                }
            }
        }

        for (section, count) in written.iter().enumerate() {
            let at = counts_at + section * 2;
            buf[at..at + 2].copy_from_slice(&count.to_be_bytes());
        }
        Ok(buf)
    }
}

// ── wire primitives ─────────────────────────────────────────────────────

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16, MdnsError> {
    let bytes = buf.get(*pos..*pos + 2).ok_or(MdnsError::Truncated)?;
    *pos += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32, MdnsError> {
    let bytes = buf.get(*pos..*pos + 4).ok_or(MdnsError::Truncated)?;
    *pos += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a possibly-compressed name starting at `*pos`, leaving `*pos` just
/// past the name in the original stream.
fn read_name(buf: &[u8], pos: &mut usize) -> Result<Name, MdnsError> {
    let mut labels: Vec<String> = Vec::new();
    let mut cursor = *pos;
    let mut jumped = false;
    let mut jumps = 0usize;
    let mut total_len = 0usize;

    loop {
        let len = *buf.get(cursor).ok_or(MdnsError::Truncated)? as usize;
        if len & 0xC0 == 0xC0 {
            let low = *buf.get(cursor + 1).ok_or(MdnsError::Truncated)? as usize;
            if !jumped {
                *pos = cursor + 2;
                jumped = true;
            }
            cursor = ((len & 0x3F) << 8) | low;
            jumps += 1;
            if jumps > MAX_POINTER_JUMPS {
                return Err(MdnsError::PointerLoop);
            }
        } else if len == 0 {
            if !jumped {
                *pos = cursor + 1;
            }
            break;
        } else {
            if len > MAX_LABEL_LEN {
                return Err(MdnsError::LabelTooLong);
            }
            let raw = buf
                .get(cursor + 1..cursor + 1 + len)
                .ok_or(MdnsError::Truncated)?;
            total_len += len + 1;
            if total_len > MAX_NAME_LEN {
                return Err(MdnsError::NameTooLong);
            }
            labels.push(String::from_utf8_lossy(raw).into_owned());
            cursor += 1 + len;
        }
    }

    Ok(Name::new(labels.join(".")))
}

fn write_name(buf: &mut Vec<u8>, name: &Name) -> Result<(), MdnsError> {
    let mut total = 0usize;
    for label in name.labels() {
        let bytes = label.as_bytes();
        if bytes.len() > MAX_LABEL_LEN {
            return Err(MdnsError::LabelTooLong);
        }
        total += bytes.len() + 1;
        if total > MAX_NAME_LEN {
            return Err(MdnsError::NameTooLong);
        }
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
    Ok(())
}

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn read_record(buf: &[u8], pos: &mut usize) -> Result<Record, MdnsError> {
    let name = read_name(buf, pos)?;
    let rtype = read_u16(buf, pos)?;
    let class = read_u16(buf, pos)?;
    let ttl = read_u32(buf, pos)?;
    let rdlen = read_u16(buf, pos)? as usize;
    let rdata_start = *pos;
    if buf.len() < rdata_start + rdlen {
        return Err(MdnsError::Truncated);
    }

    let rdata = match rtype {
        TYPE_A if rdlen == 4 => {
            let b = &buf[rdata_start..rdata_start + 4];
            RData::A(Ipv4Addr::new(b[0], b[1], b[2], b[3]))
        }
        TYPE_AAAA if rdlen == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[rdata_start..rdata_start + 16]);
            RData::Aaaa(Ipv6Addr::from(octets))
        }
        TYPE_PTR => {
            let mut p = rdata_start;
            RData::Ptr(read_name(buf, &mut p)?)
        }
        TYPE_SRV => {
            let mut p = rdata_start;
            let priority = read_u16(buf, &mut p)?;
            let weight = read_u16(buf, &mut p)?;
            let port = read_u16(buf, &mut p)?;
            let target = read_name(buf, &mut p)?;
            RData::Srv {
                priority,
                weight,
                port,
                target,
            }
        }
        TYPE_TXT => {
            let mut strings = Vec::new();
            let mut p = rdata_start;
            while p < rdata_start + rdlen {
                let len = buf[p] as usize;
                let raw = buf
                    .get(p + 1..p + 1 + len)
                    .ok_or(MdnsError::Truncated)?;
                strings.push(String::from_utf8_lossy(raw).into_owned());
                p += 1 + len;
            }
            RData::Txt(strings)
        }
        _ => RData::Unknown {
            rtype,
            data: buf[rdata_start..rdata_start + rdlen].to_vec(),
        },
    };

    // rdata parsing may stop short (or follow pointers); trust rdlen for
    // stream position.
    *pos = rdata_start + rdlen;

    Ok(Record {
        name,
        ttl,
        cache_flush: class & CLASS_TOP_BIT != 0,
        rdata,
    })
}

fn write_record(buf: &mut Vec<u8>, record: &Record) -> Result<(), MdnsError> {
    write_name(buf, &record.name)?;
    write_u16(buf, record.rdata.rtype());
    let class = if record.cache_flush {
        CLASS_IN | CLASS_TOP_BIT
    } else {
        CLASS_IN
    };
    write_u16(buf, class);
    write_u32(buf, record.ttl);

    let mut rdata = Vec::new();
    match &record.rdata {
        RData::A(addr) => rdata.extend_from_slice(&addr.octets()),
        RData::Aaaa(addr) => rdata.extend_from_slice(&addr.octets()),
        RData::Ptr(target) => write_name(&mut rdata, target)?,
        RData::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            write_u16(&mut rdata, *priority);
            write_u16(&mut rdata, *weight);
            write_u16(&mut rdata, *port);
            write_name(&mut rdata, target)?;
        }
        RData::Txt(strings) => {
            for s in strings {
                let bytes = s.as_bytes();
                let len = bytes.len().min(255);
                rdata.push(len as u8);
                rdata.extend_from_slice(&bytes[..len]);
            }
            if strings.is_empty() {
                rdata.push(0);
            }
        }
        RData::Unknown { data, .. } => rdata.extend_from_slice(data),
    }

    write_u16(buf, rdata.len() as u16);
    buf.extend_from_slice(&rdata);
    Ok(())
}
