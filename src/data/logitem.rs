// src/data/logitem.rs

//! The canonical parsed log record, [`LogItem`].

use crate::data::datetime::NaiveDateTime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Kind of the client address extracted by `%h`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TypeIp {
    Ipv4,
    Ipv6,
    /// hostname, garbage, or not validated
    #[default]
    Invalid,
}

/// Classification outcome of the ignore policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IgnoreLevel {
    /// the record is kept
    #[default]
    Keep,
    /// excluded entirely; never handed downstream
    Panel,
    /// counted as processed but excluded from request panels
    Req,
}

/// One parsed log record.
///
/// Populated field-by-field by the directive engine; each string attribute
/// is individually owned and may be absent. A `LogItem` handed downstream
/// always has `host`, `date`, and `req` set and `errstr` unset.
#[derive(Clone, Debug)]
pub struct LogItem {
    /// formatted per the configured numeric date format (`YYYYMMDD`)
    pub date: Option<String>,
    /// `date` as an unsigned integer; the natural sort key
    pub numdate: u32,
    /// `HH:MM:SS`
    pub time: Option<String>,
    /// broken-down datetime; starts as the log's start time, overwritten
    /// field-wise by `%d`/`%t`/`%x`
    pub dt: NaiveDateTime,
    /// client IPv4/6 literal (or hostname when IP validation is off)
    pub host: Option<String>,
    pub type_ip: TypeIp,
    pub vhost: Option<String>,
    pub userid: Option<String>,
    /// only retained for the known cache vocabulary (MISS, HIT, …)
    pub cache_status: Option<String>,
    /// canonical uppercase method
    pub method: Option<String>,
    /// canonical uppercase protocol
    pub protocol: Option<String>,
    /// URL-decoded request
    pub req: Option<String>,
    /// URL-decoded query string
    pub qstr: Option<String>,
    /// raw referer
    pub referer: Option<String>,
    /// referring site host; empty when absent or hidden
    pub site: String,
    /// search keyphrase extracted from a Google referer
    pub keyphrase: Option<String>,
    /// URL-decoded user agent; substituted with `"-"` when absent
    pub agent: Option<String>,
    /// DJB2 hash of `agent`
    pub agent_hash: u32,
    /// lowercase hex of `agent_hash`, no leading zeros
    pub agent_hex: String,
    pub browser: Option<String>,
    pub browser_type: Option<String>,
    pub os: Option<String>,
    pub os_type: Option<String>,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub asn: Option<String>,
    /// HTTP status; `-1` means unset
    pub status: i32,
    /// response size in bytes
    pub resp_size: u64,
    /// time taken to serve the request, always in microseconds
    pub serve_time: u64,
    pub tls_type: Option<String>,
    pub tls_cypher: Option<String>,
    pub tls_type_cypher: Option<String>,
    /// lowercased tokens joined by `"; "`
    pub mime_type: Option<String>,
    pub ignorelevel: IgnoreLevel,
    pub is_404: bool,
    pub is_static: bool,
    /// `"{date}|{host}|{agent_hex}"`, computed once all fields are set
    pub uniq_key: Option<String>,
    /// diagnostic message when the line failed to parse
    pub errstr: Option<String>,
}

impl LogItem {
    /// Create an empty record whose broken-down time starts at the log's
    /// start time.
    pub fn new(start_time: NaiveDateTime) -> LogItem {
        LogItem {
            date: None,
            numdate: 0,
            time: None,
            dt: start_time,
            host: None,
            type_ip: TypeIp::Invalid,
            vhost: None,
            userid: None,
            cache_status: None,
            method: None,
            protocol: None,
            req: None,
            qstr: None,
            referer: None,
            site: String::new(),
            keyphrase: None,
            agent: None,
            agent_hash: 0,
            agent_hex: String::new(),
            browser: None,
            browser_type: None,
            os: None,
            os_type: None,
            continent: None,
            country: None,
            asn: None,
            status: -1,
            resp_size: 0,
            serve_time: 0,
            tls_type: None,
            tls_cypher: None,
            tls_type_cypher: None,
            mime_type: None,
            ignorelevel: IgnoreLevel::Keep,
            is_404: false,
            is_static: false,
            uniq_key: None,
            errstr: None,
        }
    }

    /// Hash the user agent into `agent_hash`/`agent_hex`.
    pub fn set_agent_hash(&mut self) {
        let agent: &str = self.agent.as_deref().unwrap_or("");
        self.agent_hash = djb2(agent.as_bytes());
        self.agent_hex = format!("{:x}", self.agent_hash);
    }

    /// The unique visitor key `"{date}|{host}|{agent_hex}"`.
    ///
    /// Only meaningful once `date`, `host`, and the agent hash are set.
    pub fn uniq_visitor_key(&self) -> Option<String> {
        let date: &str = self.date.as_deref()?;
        let host: &str = self.host.as_deref()?;
        let mut key = String::with_capacity(date.len() + host.len() + self.agent_hex.len() + 2);
        key.push_str(date);
        key.push('|');
        key.push_str(host);
        key.push('|');
        key.push_str(&self.agent_hex);

        Some(key)
    }
}

/// The venerable DJB2 string hash.
pub fn djb2(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for b in bytes.iter() {
        // hash * 33 + c
        hash = hash
            .wrapping_shl(5)
            .wrapping_add(hash)
            .wrapping_add(*b as u32);
    }

    hash
}
