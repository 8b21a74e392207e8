use super::{Session, SessionAddress};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sessions keyed by peer device, each behind its own async lock.
///
/// The map lock is only held to look up or insert a cell. Work on a session
/// holds that session's lock alone, so different peers proceed in parallel
/// while operations on one peer are serialized.
#[derive(Default)]
pub struct SessionStore {
    cells: parking_lot::Mutex<HashMap<SessionAddress, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cell for `address`, creating an empty session if there is none.
    pub fn cell(&self, address: &SessionAddress) -> Arc<Mutex<Session>> {
        let mut cells = self.cells.lock();
        Arc::clone(cells.entry(address.clone()).or_default())
    }

    pub fn get(&self, address: &SessionAddress) -> Option<Arc<Mutex<Session>>> {
        self.cells.lock().get(address).cloned()
    }

    /// Forgets the session. A caller already holding the cell keeps its copy.
    pub fn remove(&self, address: &SessionAddress) -> bool {
        self.cells.lock().remove(address).is_some()
    }

    /// Drops `cell` from the map if it holds no state and nobody else has it.
    ///
    /// Callers hand back the cell they got from [`SessionStore::cell`] once
    /// they are done with it, after releasing its lock. Returns whether the
    /// entry was removed.
    pub fn release(&self, address: &SessionAddress, cell: Arc<Mutex<Session>>) -> bool {
        let mut cells = self.cells.lock();
        let Some(current) = cells.get(address) else {
            return false;
        };
        // one reference in the map, one in `cell`; new clones need the map lock
        if !Arc::ptr_eq(current, &cell) || Arc::strong_count(&cell) > 2 {
            return false;
        }
        let empty = cell.try_lock().map(|session| session.is_empty()).unwrap_or(false);
        if empty {
            cells.remove(address);
        }
        empty
    }

    pub fn addresses(&self) -> Vec<SessionAddress> {
        let mut addresses: Vec<_> = self.cells.lock().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cell_is_shared_per_address() {
        let store = SessionStore::new();
        let alice = SessionAddress::new("alice", 1);

        let first = store.cell(&alice);
        let second = store.cell(&alice);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &store.cell(&SessionAddress::new("alice", 2))));

        let guard = first.lock().await;
        assert!(second.try_lock().is_err());
        drop(guard);

        assert_eq!(store.addresses().len(), 2);
        assert!(store.remove(&alice));
        assert!(store.get(&alice).is_none());
    }

    #[tokio::test]
    async fn test_release_drops_only_unused_empty_cells() {
        let store = SessionStore::new();
        let bob = SessionAddress::new("bob", 1);

        let cell = store.cell(&bob);
        let other = store.cell(&bob);
        assert!(!store.release(&bob, cell));
        assert_eq!(store.len(), 1);

        assert!(store.release(&bob, other));
        assert!(store.is_empty());

        let stale = store.cell(&bob);
        store.remove(&bob);
        let fresh = store.cell(&bob);
        assert!(!store.release(&bob, stale));
        assert!(store.release(&bob, fresh));
        assert!(store.is_empty());
    }
}
