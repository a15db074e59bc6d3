use std::collections::HashMap;

use parking_lot::RwLock;

use arqueo_core::Movement;

/// In-memory mirror of drained movement windows, keyed by (company, window
/// key). An entry is reused only on an exact key match; any mutation for a
/// company drops all of its entries.
#[derive(Debug, Default)]
pub struct MovementCache {
    entries: RwLock<HashMap<(String, String), Vec<Movement>>>,
}

impl MovementCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, company: &str, key: &str) -> Option<Vec<Movement>> {
        self.entries
            .read()
            .get(&(company.to_string(), key.to_string()))
            .cloned()
    }

    pub fn put(&self, company: &str, key: &str, movements: Vec<Movement>) {
        self.entries
            .write()
            .insert((company.to_string(), key.to_string()), movements);
    }

    pub fn invalidate(&self, company: &str) {
        self.entries
            .write()
            .retain(|(entry_company, _), _| entry_company != company);
    }
}
