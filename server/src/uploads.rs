//! The upload ticket ledger and the reserved/committed filename scheme.
//!
//! A ticket is a short-lived handle for an in-flight upload: `Upload`
//! reserves space and a ticket; the engine writes the artifact blob and
//! its metadata into the two files named by [`reserved_data_path`] /
//! [`reserved_info_path`]; `Commit` renames them into their permanent,
//! job-and-key-addressed home, and `Dismiss` (or a connection dropping
//! with tickets still open) just releases the reservation.

use std::path::{Path, PathBuf};

/// A single outstanding reservation.
struct Ticket {
    conn_id: u32,
    reserved_sz: u64,
}

/// Tickets are drawn from a monotonic small-id allocator and reused once
/// released, the same free-list-over-a-dense-vector shape the on-disk
/// tables use for their own records.
#[derive(Default)]
pub struct UploadLedger {
    slots: Vec<Option<Ticket>>,
    free: Vec<u32>,
}

impl UploadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserve(&mut self, conn_id: u32, reserved_sz: u64) -> u32 {
        let ticket = Ticket { conn_id, reserved_sz };
        if let Some(id) = self.free.pop() {
            self.slots[id as usize] = Some(ticket);
            id
        } else {
            self.slots.push(Some(ticket));
            (self.slots.len() - 1) as u32
        }
    }

    pub fn reserved_sz(&self, ticket: u32) -> Option<u64> {
        self.slots.get(ticket as usize)?.as_ref().map(|t| t.reserved_sz)
    }

    pub fn owner(&self, ticket: u32) -> Option<u32> {
        self.slots.get(ticket as usize)?.as_ref().map(|t| t.conn_id)
    }

    /// Frees a ticket's slot for reuse, returning the size it had
    /// reserved so the caller can release it from the store's
    /// reservation counter.
    pub fn release(&mut self, ticket: u32) -> Option<u64> {
        let slot = self.slots.get_mut(ticket as usize)?;
        let t = slot.take()?;
        self.free.push(ticket);
        Some(t.reserved_sz)
    }

    /// Every ticket still open for a connection; used to drain a
    /// disconnecting client's reservations.
    pub fn tickets_for(&self, conn_id: u32) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().filter(|t| t.conn_id == conn_id).map(|_| i as u32))
            .collect()
    }
}

pub fn reserved_dir(admin_dir: &Path) -> PathBuf {
    admin_dir.join("reserved")
}

pub fn reserved_data_path(admin_dir: &Path, ticket: u32) -> PathBuf {
    reserved_dir(admin_dir).join(format!("{ticket}-data"))
}

pub fn reserved_info_path(admin_dir: &Path, ticket: u32) -> PathBuf {
    reserved_dir(admin_dir).join(format!("{ticket}-info"))
}

fn slot_name(is_last: bool) -> &'static str {
    if is_last {
        "last"
    } else {
        "first"
    }
}

pub fn run_dir(admin_dir: &Path, job: u32) -> PathBuf {
    admin_dir.join("runs").join(format!("job-{job}"))
}

pub fn committed_data_path(admin_dir: &Path, job: u32, key: u32, is_last: bool) -> PathBuf {
    run_dir(admin_dir, job).join(format!("{key}-{}-data", slot_name(is_last)))
}

pub fn committed_info_path(admin_dir: &Path, job: u32, key: u32, is_last: bool) -> PathBuf {
    run_dir(admin_dir, job).join(format!("{key}-{}-info", slot_name(is_last)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_released_slots() {
        let mut ledger = UploadLedger::new();
        let a = ledger.reserve(1, 100);
        let b = ledger.reserve(1, 200);
        assert_ne!(a, b);
        assert_eq!(ledger.release(a), Some(100));
        let c = ledger.reserve(2, 50);
        assert_eq!(c, a);
        assert_eq!(ledger.owner(c), Some(2));
    }

    #[test]
    fn tickets_for_filters_by_connection() {
        let mut ledger = UploadLedger::new();
        let a = ledger.reserve(1, 10);
        let _b = ledger.reserve(2, 10);
        let c = ledger.reserve(1, 10);
        let mut mine = ledger.tickets_for(1);
        mine.sort();
        assert_eq!(mine, vec![a, c]);
    }
}
