
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::relfile::RelFileRef;
use std::sync::RwLock;
use tracing::debug;

/// Slot index into the registry arena. Stays valid until the node it names
/// is removed, regardless of which worker looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryHandle(u32);

#[derive(Debug, Clone, Copy)]
struct Node {
    rel: RelFileRef,
    xid: TransactionId,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Free { next_free: Option<u32> },
    Used(Node),
}

#[derive(Debug)]
struct RegistryInner {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    head: Option<u32>,
    count: usize,
}

/// Registry of relations created by an unresolved transaction, shared by
/// every worker. A slab of fixed-size slots holds a doubly linked list
/// (O(1) remove); one RwLock guards all mutation, exclusive for add/remove
/// and shared for snapshot. The lock is held only across the splice or the
/// copy, never across file I/O or a log flush.
pub struct SharedRegistry {
    inner: RwLock<RegistryInner>,
    capacity: usize,
}

impl SharedRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                slots: Vec::new(),
                free_head: None,
                head: None,
                count: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Link a new (relation, xid) node at the list head and return its
    /// handle. Fails only on arena exhaustion, which aborts just the
    /// triggering operation.
    pub fn add(&self, rel: RelFileRef, xid: TransactionId) -> Result<RegistryHandle> {
        let mut inner = self.inner.write().map_err(|_| Error::LockPoisoned {
            lock_name: "registry.inner".to_string(),
        })?;

        let idx = match inner.free_head {
            Some(free) => {
                inner.free_head = match inner.slots[free as usize] {
                    Slot::Free { next_free } => next_free,
                    Slot::Used(_) => unreachable!("free list points at a used slot"),
                };
                free
            }
            None => {
                if inner.slots.len() >= self.capacity {
                    return Err(Error::RegistryExhausted {
                        capacity: self.capacity,
                    });
                }
                inner.slots.push(Slot::Free { next_free: None });
                (inner.slots.len() - 1) as u32
            }
        };

        let old_head = inner.head;
        inner.slots[idx as usize] = Slot::Used(Node {
            rel,
            xid,
            prev: None,
            next: old_head,
        });
        if let Some(head) = old_head {
            match &mut inner.slots[head as usize] {
                Slot::Used(node) => node.prev = Some(idx),
                Slot::Free { .. } => unreachable!("list head is a free slot"),
            }
        }
        inner.head = Some(idx);
        inner.count += 1;

        debug!(rel = %rel, xid, handle = idx, "pending delete added to registry");
        Ok(RegistryHandle(idx))
    }

    /// Splice a node out of the list and recycle its slot. Callers must
    /// guarantee at-most-once removal per handle; removing a handle that is
    /// not live is a registry-corruption assertion.
    pub fn remove(&self, handle: RegistryHandle) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let idx = handle.0;
        assert!(
            (idx as usize) < inner.slots.len(),
            "registry handle {} out of range",
            idx
        );
        let node = match inner.slots[idx as usize] {
            Slot::Used(node) => node,
            Slot::Free { .. } => panic!("registry handle {} removed twice", idx),
        };

        if let Some(next) = node.next {
            match &mut inner.slots[next as usize] {
                Slot::Used(n) => n.prev = node.prev,
                Slot::Free { .. } => unreachable!("linked node points at a free slot"),
            }
        }
        if let Some(prev) = node.prev {
            match &mut inner.slots[prev as usize] {
                Slot::Used(n) => n.next = node.next,
                Slot::Free { .. } => unreachable!("linked node points at a free slot"),
            }
        }
        if inner.head == Some(idx) {
            inner.head = node.next;
        }

        inner.slots[idx as usize] = Slot::Free {
            next_free: inner.free_head,
        };
        inner.free_head = Some(idx);
        inner.count -= 1;

        debug!(rel = %node.rel, xid = node.xid, handle = idx, "pending delete removed from registry");
    }

    /// Copy every live node, head first. Returns None when the list is
    /// empty. The walked count must match the live-count; a mismatch means
    /// the list structure is corrupt and is not silently repaired.
    pub fn snapshot(&self) -> Option<Vec<(RelFileRef, TransactionId)>> {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut cur = inner.head?;
        let mut out = Vec::with_capacity(inner.count);
        loop {
            match inner.slots[cur as usize] {
                Slot::Used(node) => {
                    out.push((node.rel, node.xid));
                    match node.next {
                        Some(next) => cur = next,
                        None => break,
                    }
                }
                Slot::Free { .. } => panic!("registry list walks into a free slot"),
            }
        }

        assert_eq!(
            out.len(),
            inner.count,
            "registry snapshot count does not match live-count"
        );
        Some(out)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn links(&self, handle: RegistryHandle) -> (Option<u32>, Option<u32>) {
        let inner = self.inner.read().unwrap();
        match inner.slots[handle.0 as usize] {
            Slot::Used(node) => (node.prev, node.next),
            Slot::Free { .. } => panic!("handle not live"),
        }
    }

    #[cfg(test)]
    fn head_index(&self) -> Option<u32> {
        self.inner.read().unwrap().head
    }
}
