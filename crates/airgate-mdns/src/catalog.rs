use std::collections::HashMap;
use std::sync::RwLock;

use crate::packet::{Name, Record, TYPE_ANY};

struct Entry {
    owner: String,
    record: Record,
}

/// The authoritative zone: every record the responder owns, grouped by name.
///
/// Shared-name records (the PTR sets of several service instances live under
/// the same service name) coexist; each record remembers the instance that
/// registered it so unregistration removes exactly that instance's records.
///
/// Single writer, many readers. Uses std's RwLock because every critical
/// section is a map touch and nothing is held across an await.
pub struct Catalog {
    names: RwLock<HashMap<Name, Vec<Entry>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            names: RwLock::new(HashMap::new()),
        }
    }

    /// Register `records` under `owner`, replacing anything that owner had
    /// registered before. Repeat registration is therefore idempotent.
    pub fn register(&self, owner: &str, records: Vec<Record>) {
        let mut names = self.names.write().expect("catalog lock poisoned");
        remove_owner_locked(&mut names, owner);
        for record in records {
            names
                .entry(record.name.clone())
                .or_default()
                .push(Entry {
                    owner: owner.to_string(),
                    record,
                });
        }
    }

    /// Remove every record `owner` registered, returning them (for the
    /// goodbye announcement). Unregistering twice returns an empty vec.
    pub fn remove_owner(&self, owner: &str) -> Vec<Record> {
        let mut names = self.names.write().expect("catalog lock poisoned");
        remove_owner_locked(&mut names, owner)
    }

    /// Every record matching `name` and `qtype` (or any type for ANY).
    /// One read-lock acquisition per resolution keeps the snapshot
    /// consistent across a multi-question query.
    pub fn answers(&self, name: &Name, qtype: u16) -> Vec<Record> {
        let names = self.names.read().expect("catalog lock poisoned");
        let Some(entries) = names.get(name) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|e| qtype == TYPE_ANY || e.record.rdata.rtype() == qtype)
            .map(|e| e.record.clone())
            .collect()
    }

    /// Number of records currently owned, across all names.
    pub fn len(&self) -> usize {
        let names = self.names.read().expect("catalog lock poisoned");
        names.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_owner_locked(names: &mut HashMap<Name, Vec<Entry>>, owner: &str) -> Vec<Record> {
    let mut removed = Vec::new();
    names.retain(|_, entries| {
        let mut i = 0;
        while i < entries.len() {
            if entries[i].owner == owner {
                removed.push(entries.remove(i).record);
            } else {
                i += 1;
            }
        }
        !entries.is_empty()
    });
    removed
}
