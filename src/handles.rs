//! Proxy bookkeeping for script objects referenced by this side of the channel.

use crossbeam::channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::codec::ObjectResolver;
use crate::value::{ProxyCell, ScriptObjectRef};

/// Maps script object ids to the proxy currently standing in for them.
///
/// At most one live proxy per id is handed out. When the last clone of a proxy is
/// dropped its id is queued, and [`collect_dead_handles`](Self::collect_dead_handles)
/// reports it so the script side can release the object.
pub struct HandleTable {
    proxies: Mutex<HashMap<i32, Weak<ProxyCell>>>,
    released_tx: Sender<i32>,
    released_rx: Receiver<i32>,
}

impl HandleTable {
    pub fn new() -> Self {
        let (released_tx, released_rx) = unbounded();
        Self {
            proxies: Mutex::new(HashMap::new()),
            released_tx,
            released_rx,
        }
    }

    /// Return the live proxy for `ref_id`, creating one if none is reachable.
    pub fn get_or_create_proxy(&self, ref_id: i32) -> ScriptObjectRef {
        let mut proxies = self.proxies.lock();
        if let Some(cell) = proxies.get(&ref_id).and_then(Weak::upgrade) {
            return ScriptObjectRef::from_cell(cell);
        }

        let cell = Arc::new(ProxyCell::tracked(ref_id, self.released_tx.clone()));
        proxies.insert(ref_id, Arc::downgrade(&cell));
        trace!(ref_id, "created script object proxy");
        ScriptObjectRef::from_cell(cell)
    }

    /// Drain released proxies and return the ids that no live proxy refers to.
    ///
    /// A proxy may have been recreated for an id between its release and this call;
    /// such ids are skipped.
    pub fn collect_dead_handles(&self) -> HashSet<i32> {
        let mut released: HashSet<i32> = self.released_rx.try_iter().collect();
        if released.is_empty() {
            return released;
        }

        let mut proxies = self.proxies.lock();
        released.retain(|ref_id| match proxies.get(ref_id) {
            Some(weak) if weak.strong_count() > 0 => false,
            Some(_) => {
                proxies.remove(ref_id);
                true
            }
            None => true,
        });
        released
    }

    /// Whether a reachable proxy exists for `ref_id`.
    pub fn is_live(&self, ref_id: i32) -> bool {
        self.proxies
            .lock()
            .get(&ref_id)
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    pub fn live_count(&self) -> usize {
        self.proxies
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.live_count())
            .field("pending_release", &self.released_rx.len())
            .finish()
    }
}

impl ObjectResolver for HandleTable {
    fn script_object(&self, ref_id: i32) -> ScriptObjectRef {
        self.get_or_create_proxy(ref_id)
    }
}

impl<T: ObjectResolver + ?Sized> ObjectResolver for Arc<T> {
    fn script_object(&self, ref_id: i32) -> ScriptObjectRef {
        (**self).script_object(ref_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_proxy_while_reachable() {
        let table = HandleTable::new();
        let first = table.get_or_create_proxy(7);
        let second = table.get_or_create_proxy(7);

        assert!(first.ptr_eq(&second));
        assert_eq!(table.live_count(), 1);
        assert!(table.collect_dead_handles().is_empty());
    }

    #[test]
    fn test_dropped_proxy_is_collected_once() {
        let table = HandleTable::new();
        let proxy = table.get_or_create_proxy(3);
        let clone = proxy.clone();
        drop(proxy);
        assert!(table.collect_dead_handles().is_empty());

        drop(clone);
        assert!(!table.is_live(3));
        assert_eq!(table.collect_dead_handles(), HashSet::from([3]));
        assert!(table.collect_dead_handles().is_empty());
    }

    #[test]
    fn test_recreated_proxy_is_not_reported() {
        let table = HandleTable::new();
        drop(table.get_or_create_proxy(42));

        let fresh = table.get_or_create_proxy(42);
        assert!(table.collect_dead_handles().is_empty());
        assert!(table.is_live(42));

        drop(fresh);
        assert_eq!(table.collect_dead_handles(), HashSet::from([42]));
    }

    #[test]
    fn test_new_proxy_after_death_is_distinct() {
        let table = HandleTable::new();
        let old = table.get_or_create_proxy(5);
        let old_cell = Arc::downgrade(old.cell());
        drop(old);

        let new = table.get_or_create_proxy(5);
        assert!(old_cell.upgrade().is_none());
        assert_eq!(new.ref_id(), 5);
    }

    #[test]
    fn test_release_from_other_thread() {
        let table = Arc::new(HandleTable::new());
        let proxies: Vec<_> = (0..16).map(|id| table.get_or_create_proxy(id)).collect();

        std::thread::spawn(move || drop(proxies)).join().unwrap();

        assert_eq!(table.collect_dead_handles().len(), 16);
        assert_eq!(table.live_count(), 0);
    }
}
