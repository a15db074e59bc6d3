use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use arqueo_core::{FundError, FundResult, MovementId};

/// Claim lifecycle of one movement id: held while an edit is running, then
/// cooling down for a fixed interval after it finishes.
#[derive(Clone, Copy, Debug)]
enum ClaimState {
    Held,
    Cooldown(Instant),
}

/// Serializes edits of the same movement: a second attempt while one is in
/// progress, or within the cooldown after one finished, is rejected rather
/// than merged.
#[derive(Debug)]
pub struct EditGuard {
    cooldown: Duration,
    slots: Mutex<HashMap<String, ClaimState>>,
}

impl EditGuard {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a movement for editing. The claim is held until the returned
    /// pass drops, however long the edit runs; the cooldown starts then.
    pub fn begin(&self, id: &MovementId) -> FundResult<EditPass<'_>> {
        let mut slots = self.slots.lock();
        match slots.get(id.as_str()) {
            Some(ClaimState::Held) => {
                return Err(FundError::ConcurrentEdit { id: id.to_string() });
            }
            Some(ClaimState::Cooldown(last)) if last.elapsed() < self.cooldown => {
                return Err(FundError::ConcurrentEdit { id: id.to_string() });
            }
            _ => {}
        }
        slots.insert(id.as_str().to_string(), ClaimState::Held);
        Ok(EditPass {
            guard: self,
            id: id.as_str().to_string(),
        })
    }
}

/// Active claim on one movement id.
#[derive(Debug)]
pub struct EditPass<'a> {
    guard: &'a EditGuard,
    id: String,
}

impl Drop for EditPass<'_> {
    fn drop(&mut self) {
        self.guard
            .slots
            .lock()
            .insert(self.id.clone(), ClaimState::Cooldown(Instant::now()));
    }
}
