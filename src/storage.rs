// src/storage.rs

//! Trait seams for the external collaborators of the parsing core.
//!
//! The core hands every validated [`LogItem`] to a [`LogSink`], keeps its
//! resume fingerprints in a [`LastParseStore`], and consults a
//! [`Classify`] implementation for everything that needs knowledge the
//! core does not carry (crawler lists, browser/OS tables, referer policy,
//! the TLS cipher registry). Reference implementations sufficient for the
//! command-line driver and for tests live here as well.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::common::Inode;
use crate::data::logitem::LogItem;
use crate::readers::logfile::LastParse;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Downstream consumer of validated records.
///
/// The callee borrows the item; the caller destroys it right after.
pub trait LogSink: Sync {
    fn process_log(
        &self,
        logitem: &LogItem,
    );
}

/// The resume store, keyed by inode (`0` for pipes).
pub trait LastParseStore: Sync {
    /// fingerprint of the prior run, or the zero fingerprint when none
    fn last_parse(
        &self,
        inode: Inode,
    ) -> LastParse;

    fn insert_last_parse(
        &self,
        inode: Inode,
        lp: &LastParse,
    );
}

/// Record enrichment and ignore-policy lookups.
///
/// Every method has a permissive default so a bare parsing run needs no
/// tables at all.
pub trait Classify: Sync {
    /// fill `browser`/`browser_type`/`os`/`os_type` from the agent
    fn set_browser_os(
        &self,
        _logitem: &mut LogItem,
    ) {
    }

    /// is the user agent a known robot or spider?
    fn is_crawler(
        &self,
        _agent: &str,
    ) -> bool {
        false
    }

    /// should the referring site be hidden from reports?
    fn hide_referer(
        &self,
        _site: &str,
    ) -> bool {
        false
    }

    /// should lines with this referer be dropped?
    fn ignore_referer(
        &self,
        _referer: &str,
    ) -> bool {
        false
    }

    /// should lines from this client be dropped?
    fn excluded_ip(
        &self,
        _logitem: &LogItem,
    ) -> bool {
        false
    }

    /// standard name and protocol version of a decimal IANA cipher suite
    /// code, e.g. `0x1301` → `("TLS_AES_128_GCM_SHA256", "TLSv1.3")`
    fn tls_cipher(
        &self,
        _code: u16,
    ) -> Option<(String, String)> {
        None
    }
}

/// The bundle of downstream collaborators threaded through a parse run.
#[derive(Clone, Copy)]
pub struct Downstream<'a> {
    pub sink: &'a dyn LogSink,
    pub store: &'a dyn LastParseStore,
    pub classify: &'a dyn Classify,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// reference implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A sink that drops everything. Handy for dry runs.
pub struct NullSink;

impl LogSink for NullSink {
    fn process_log(
        &self,
        _logitem: &LogItem,
    ) {
    }
}

/// The all-defaults classifier.
pub struct NullClassify;

impl Classify for NullClassify {}

/// In-memory resume store.
///
/// Keeps fingerprints for the duration of the process; a persistent
/// store belongs to the storage engine, not to the parsing core.
#[derive(Default)]
pub struct MemLastParseStore {
    map: Mutex<HashMap<Inode, LastParse>>,
}

impl MemLastParseStore {
    pub fn new() -> MemLastParseStore {
        MemLastParseStore {
            map: Mutex::new(HashMap::new()),
        }
    }
}

impl LastParseStore for MemLastParseStore {
    fn last_parse(
        &self,
        inode: Inode,
    ) -> LastParse {
        self.map
            .lock()
            .unwrap()
            .get(&inode)
            .cloned()
            .unwrap_or_default()
    }

    fn insert_last_parse(
        &self,
        inode: Inode,
        lp: &LastParse,
    ) {
        self.map
            .lock()
            .unwrap()
            .insert(inode, lp.clone());
    }
}
