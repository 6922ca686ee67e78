//! Subscriber Store
//!
//! In-memory map of attached subscribers keyed by IMSI, mirrored into a
//! durable key-value store on every mutation. TMSI is a reassignable
//! secondary key and is always resolved through the IMSI record. A periodic
//! sweep expires stale entries; each removal is persisted exactly once.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use tracing::{debug, warn};

use roamlink_common::{Imsi, Msisdn, Tmsi};

/// One attached subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    /// Permanent identity, the unique key
    pub imsi: Imsi,
    /// Temporary identity assigned by the core
    pub tmsi: Option<Tmsi>,
    /// Equipment identity captured at registration
    pub imei: Option<String>,
    /// Phone number from the registration's associated URI
    pub msisdn: Option<Msisdn>,
    /// Absolute expiry, unix seconds
    pub expires: u64,
    /// Dialog correlation for the subscriber's live call, if any
    pub call_id: Option<String>,
}

impl Subscriber {
    /// Serializes the non-key fields as the persisted tuple:
    /// `tmsi,imei,msisdn,expires,call_id`.
    pub fn to_record(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.tmsi.map(|t| t.to_string()).unwrap_or_default(),
            self.imei.as_deref().unwrap_or(""),
            self.msisdn.as_ref().map(|m| m.as_str()).unwrap_or(""),
            self.expires,
            self.call_id.as_deref().unwrap_or(""),
        )
    }

    /// Parses a persisted tuple. Returns None for records that do not have
    /// the expected five fields.
    pub fn from_record(imsi: Imsi, record: &str) -> Option<Self> {
        let fields: Vec<&str> = record.split(',').collect();
        if fields.len() != 5 {
            return None;
        }
        Some(Self {
            imsi,
            tmsi: if fields[0].is_empty() {
                None
            } else {
                Tmsi::from_hex(fields[0])
            },
            imei: (!fields[1].is_empty()).then(|| fields[1].to_string()),
            msisdn: if fields[2].is_empty() {
                None
            } else {
                Msisdn::new(fields[2])
            },
            expires: fields[3].parse().ok()?,
            call_id: (!fields[4].is_empty()).then(|| fields[4].to_string()),
        })
    }

    /// Whether the subscriber is still attached at `now`.
    pub fn is_attached(&self, now: u64) -> bool {
        self.expires > now
    }
}

/// Durable IMSI -> tuple store behind the subscriber map.
pub trait SubscriberPersistence: Send {
    /// Writes or overwrites one record.
    fn store(&mut self, imsi: &Imsi, record: &str) -> io::Result<()>;
    /// Removes one record.
    fn remove(&mut self, imsi: &Imsi) -> io::Result<()>;
    /// Loads all records at startup.
    fn load_all(&mut self) -> io::Result<Vec<(String, String)>>;
}

/// The subscriber store: owned map plus its persistence backend.
pub struct SubscriberStore {
    subscribers: HashMap<Imsi, Subscriber>,
    persistence: Box<dyn SubscriberPersistence>,
}

impl SubscriberStore {
    /// Creates a store over the given backend and loads existing records.
    pub fn new(mut persistence: Box<dyn SubscriberPersistence>) -> Self {
        let mut subscribers = HashMap::new();
        match persistence.load_all() {
            Ok(records) => {
                for (imsi_str, record) in records {
                    let imsi = match Imsi::new(&imsi_str) {
                        Some(i) => i,
                        None => {
                            warn!(imsi = %imsi_str, "skipping persisted record with bad IMSI");
                            continue;
                        }
                    };
                    match Subscriber::from_record(imsi.clone(), &record) {
                        Some(sub) => {
                            subscribers.insert(imsi, sub);
                        }
                        None => warn!(%imsi, "skipping malformed persisted record"),
                    }
                }
            }
            Err(e) => warn!("failed to load subscriber store: {e}"),
        }
        debug!(count = subscribers.len(), "subscriber store loaded");
        Self {
            subscribers,
            persistence,
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// True when no subscriber is tracked.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Inserts or replaces the record for the subscriber's IMSI.
    pub fn upsert(&mut self, subscriber: Subscriber) {
        if let Err(e) = self
            .persistence
            .store(&subscriber.imsi, &subscriber.to_record())
        {
            warn!(imsi = %subscriber.imsi, "failed to persist subscriber: {e}");
        }
        self.subscribers.insert(subscriber.imsi.clone(), subscriber);
    }

    /// Looks up by IMSI.
    pub fn find_by_imsi(&self, imsi: &Imsi) -> Option<&Subscriber> {
        self.subscribers.get(imsi)
    }

    /// Resolves a TMSI to its IMSI record.
    pub fn find_by_tmsi(&self, tmsi: Tmsi) -> Option<&Subscriber> {
        self.subscribers.values().find(|s| s.tmsi == Some(tmsi))
    }

    /// Mutable lookup by IMSI. The caller must re-persist via `upsert` when
    /// done; prefer `update` for that.
    pub fn update<F: FnOnce(&mut Subscriber)>(&mut self, imsi: &Imsi, f: F) -> bool {
        match self.subscribers.get_mut(imsi) {
            Some(sub) => {
                f(sub);
                let record = sub.to_record();
                if let Err(e) = self.persistence.store(imsi, &record) {
                    warn!(%imsi, "failed to persist subscriber: {e}");
                }
                true
            }
            None => false,
        }
    }

    /// Scans for a locally-attached called party: an IMSI/TMSI token prefix
    /// match or an MSISDN digit match.
    pub fn find_called_party(&self, called: &str) -> Option<&Subscriber> {
        if let Some(rest) = called.strip_prefix("IMSI") {
            return self
                .subscribers
                .values()
                .find(|s| s.imsi.as_str().starts_with(rest) || rest.starts_with(s.imsi.as_str()));
        }
        if let Some(rest) = called.strip_prefix("TMSI") {
            let tmsi = Tmsi::from_hex(rest)?;
            return self.find_by_tmsi(tmsi);
        }
        let digits = called.strip_prefix('+').unwrap_or(called);
        self.subscribers
            .values()
            .find(|s| s.msisdn.as_ref().is_some_and(|m| m.digits() == digits))
    }

    /// Removes one subscriber immediately. Returns true when it existed.
    pub fn forget(&mut self, imsi: &Imsi) -> bool {
        if self.subscribers.remove(imsi).is_some() {
            if let Err(e) = self.persistence.remove(imsi) {
                warn!(%imsi, "failed to remove persisted subscriber: {e}");
            }
            true
        } else {
            false
        }
    }

    /// Removes every subscriber. Returns the count removed.
    pub fn forget_all(&mut self) -> usize {
        let imsis: Vec<Imsi> = self.subscribers.keys().cloned().collect();
        for imsi in &imsis {
            if let Err(e) = self.persistence.remove(imsi) {
                warn!(%imsi, "failed to remove persisted subscriber: {e}");
            }
        }
        self.subscribers.clear();
        imsis.len()
    }

    /// Expires stale entries: every record with `expires` at or before
    /// `now` is removed from the map and the persistence backend, each
    /// exactly once.
    pub fn sweep_expired(&mut self, now: u64) -> Vec<Imsi> {
        let expired: Vec<Imsi> = self
            .subscribers
            .values()
            .filter(|s| !s.is_attached(now))
            .map(|s| s.imsi.clone())
            .collect();
        for imsi in &expired {
            self.subscribers.remove(imsi);
            if let Err(e) = self.persistence.remove(imsi) {
                warn!(%imsi, "failed to remove expired subscriber: {e}");
            }
            debug!(%imsi, "subscriber expired");
        }
        expired
    }

    /// Snapshot of all records, sorted by IMSI, for the CLI.
    pub fn snapshot(&self) -> Vec<Subscriber> {
        let mut list: Vec<Subscriber> = self.subscribers.values().cloned().collect();
        list.sort_by(|a, b| a.imsi.cmp(&b.imsi));
        list
    }
}

// ============================================================================
// Persistence backends
// ============================================================================

/// File-backed persistence: one `imsi=tuple` line per subscriber, the whole
/// file rewritten on each mutation. Adequate for the per-cell record counts
/// a BTS carries.
pub struct FilePersistence {
    path: PathBuf,
    records: HashMap<String, String>,
}

impl FilePersistence {
    /// Opens (or prepares to create) the store at `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            records: HashMap::new(),
        }
    }

    fn rewrite(&self) -> io::Result<()> {
        let mut out = String::new();
        for (imsi, record) in &self.records {
            out.push_str(imsi);
            out.push('=');
            out.push_str(record);
            out.push('\n');
        }
        std::fs::write(&self.path, out)
    }
}

impl SubscriberPersistence for FilePersistence {
    fn store(&mut self, imsi: &Imsi, record: &str) -> io::Result<()> {
        self.records
            .insert(imsi.as_str().to_string(), record.to_string());
        self.rewrite()
    }

    fn remove(&mut self, imsi: &Imsi) -> io::Result<()> {
        if self.records.remove(imsi.as_str()).is_some() {
            self.rewrite()?;
        }
        Ok(())
    }

    fn load_all(&mut self) -> io::Result<Vec<(String, String)>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        for line in contents.lines() {
            if let Some((imsi, record)) = line.split_once('=') {
                self.records.insert(imsi.to_string(), record.to_string());
                records.push((imsi.to_string(), record.to_string()));
            }
        }
        Ok(records)
    }
}

/// Per-IMSI operation counts recorded by [`MemoryPersistence`].
#[derive(Debug, Default)]
pub struct OpCounters {
    /// store() calls per IMSI
    pub stores: HashMap<String, u32>,
    /// remove() calls per IMSI
    pub removes: HashMap<String, u32>,
}

/// In-memory persistence that records every operation, used by tests to
/// assert exactly-once persistence behavior. The counters live behind a
/// shared handle so they stay observable after the backend moves into a
/// store.
#[derive(Default)]
pub struct MemoryPersistence {
    records: HashMap<String, String>,
    ops: Arc<StdMutex<OpCounters>>,
}

impl MemoryPersistence {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-seeded with records.
    pub fn with_records(records: Vec<(String, String)>) -> Self {
        Self {
            records: records.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Shared handle to the operation counters.
    pub fn ops(&self) -> Arc<StdMutex<OpCounters>> {
        Arc::clone(&self.ops)
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, OpCounters> {
        self.ops
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SubscriberPersistence for MemoryPersistence {
    fn store(&mut self, imsi: &Imsi, record: &str) -> io::Result<()> {
        *self
            .counters()
            .stores
            .entry(imsi.as_str().to_string())
            .or_insert(0) += 1;
        self.records
            .insert(imsi.as_str().to_string(), record.to_string());
        Ok(())
    }

    fn remove(&mut self, imsi: &Imsi) -> io::Result<()> {
        *self
            .counters()
            .removes
            .entry(imsi.as_str().to_string())
            .or_insert(0) += 1;
        self.records.remove(imsi.as_str());
        Ok(())
    }

    fn load_all(&mut self) -> io::Result<Vec<(String, String)>> {
        Ok(self.records.clone().into_iter().collect())
    }
}
