//! Fixed-capacity, reference-counted buffer pool (C3).
//!
//! Two pre-sized free lists — incoming and outgoing — hand out fixed
//! capacity buffers. A [`PooledBuf`] is a cheap `Rc` handle: cloning it
//! for fan-out bumps the strong count, and the count hitting zero is
//! exactly the moment the buffer's storage is pushed back onto its
//! origin free list. This is the explicit-handle re-architecture called
//! for in the design notes — leaks and double-frees are impossible by
//! construction because `Rc`'s own bookkeeping *is* the ref count, and
//! `Drop` on the inner cell is the only path back to a free list.
//!
//! Allocation never happens on the hot path: both free lists are filled
//! once at construction and buffers only ever move between a free list
//! and in-flight handles.

use crate::codec::{HEADER_SIZE, MAX_PAYLOAD};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

/// Capacity of a single buffer: header plus the largest possible payload.
pub const BUF_CAPACITY: usize = HEADER_SIZE + MAX_PAYLOAD;

type Storage = Box<[u8; BUF_CAPACITY]>;

fn new_storage() -> Storage {
    Box::new([0u8; BUF_CAPACITY])
}

/// Which free list a buffer was drawn from, so `release` routes it back
/// without the caller needing to remember.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Incoming,
    Outgoing,
}

struct PoolInner {
    free_incoming: Vec<Storage>,
    free_outgoing: Vec<Storage>,
    /// Bumped every time a buffer of the matching origin is returned to its
    /// free list. The coordinator compares this against its last-seen value
    /// to notice an outgoing release and "invite more packing" (§4.6) —
    /// cheaper than re-driving every reader on every pass regardless of
    /// whether capacity actually changed.
    incoming_release_gen: u64,
    outgoing_release_gen: u64,
}

/// Owns the two free lists. Cheaply cloneable (`Rc`) so every endpoint
/// that needs to acquire/release shares the same lists without a mutex —
/// IO-MUX is single-threaded by construction (§5).
#[derive(Clone)]
pub struct BufferPool {
    inner: Rc<RefCell<PoolInner>>,
}

impl BufferPool {
    /// Build pools of `n_in` incoming and `n_out` outgoing buffers.
    pub fn new(n_in: usize, n_out: usize) -> Self {
        let free_incoming = (0..n_in).map(|_| new_storage()).collect();
        let free_outgoing = (0..n_out).map(|_| new_storage()).collect();
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                free_incoming,
                free_outgoing,
                incoming_release_gen: 0,
                outgoing_release_gen: 0,
            })),
        }
    }

    /// Draw a buffer from the incoming pool, or `None` if exhausted.
    /// Exhaustion is backpressure, never an error (§4.3).
    pub fn acquire_incoming(&self) -> Option<PooledBuf> {
        self.acquire(Origin::Incoming)
    }

    /// Draw a buffer from the outgoing pool, or `None` if exhausted.
    pub fn acquire_outgoing(&self) -> Option<PooledBuf> {
        self.acquire(Origin::Outgoing)
    }

    fn acquire(&self, origin: Origin) -> Option<PooledBuf> {
        let storage = {
            let mut inner = self.inner.borrow_mut();
            let list = match origin {
                Origin::Incoming => &mut inner.free_incoming,
                Origin::Outgoing => &mut inner.free_outgoing,
            };
            list.pop()?
        };
        Some(PooledBuf {
            inner: Rc::new(RefCell::new(BufCell {
                storage: Some(storage),
                length: 0,
                origin,
                pool: Rc::downgrade(&self.inner),
            })),
        })
    }

    /// Number of buffers currently sitting idle in the incoming free list.
    pub fn free_incoming_count(&self) -> usize {
        self.inner.borrow().free_incoming.len()
    }

    /// Number of buffers currently sitting idle in the outgoing free list.
    pub fn free_outgoing_count(&self) -> usize {
        self.inner.borrow().free_outgoing.len()
    }

    /// Monotonic counter bumped on every incoming-buffer release.
    pub fn incoming_release_gen(&self) -> u64 {
        self.inner.borrow().incoming_release_gen
    }

    /// Monotonic counter bumped on every outgoing-buffer release — the
    /// coordinator polls this to know when to "invite more packing" (§4.6).
    pub fn outgoing_release_gen(&self) -> u64 {
        self.inner.borrow().outgoing_release_gen
    }
}

struct BufCell {
    storage: Option<Storage>,
    length: usize,
    origin: Origin,
    pool: Weak<RefCell<PoolInner>>,
}

impl Drop for BufCell {
    fn drop(&mut self) {
        let Some(storage) = self.storage.take() else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            let mut inner = pool.borrow_mut();
            match self.origin {
                Origin::Incoming => {
                    inner.free_incoming.push(storage);
                    inner.incoming_release_gen = inner.incoming_release_gen.wrapping_add(1);
                }
                Origin::Outgoing => {
                    inner.free_outgoing.push(storage);
                    inner.outgoing_release_gen = inner.outgoing_release_gen.wrapping_add(1);
                }
            }
        }
        // Pool already torn down (shutdown): storage is simply dropped,
        // matching the "no persistence across restarts" non-goal.
    }
}

/// A reference-counted handle to a pooled buffer. Clone to fan out to
/// multiple queues; the storage returns to its origin pool exactly when
/// the last clone is dropped.
#[derive(Clone)]
pub struct PooledBuf {
    inner: Rc<RefCell<BufCell>>,
}

impl PooledBuf {
    /// Number of live handles to this buffer — the `ref_count` of §3.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn origin(&self) -> Origin {
        self.inner.borrow().origin
    }

    /// Number of valid payload bytes currently stored.
    pub fn len(&self) -> usize {
        self.inner.borrow().length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `data` into the buffer's storage (header + payload already
    /// serialized by the caller) and record its length.
    pub fn fill(&self, data: &[u8]) {
        let mut cell = self.inner.borrow_mut();
        let storage = cell.storage.as_mut().expect("buffer storage missing");
        storage[..data.len()].copy_from_slice(data);
        cell.length = data.len();
    }

    /// Borrow the valid prefix of the buffer for writing out.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let cell = self.inner.borrow();
        let storage = cell.storage.as_ref().expect("buffer storage missing");
        f(&storage[..cell.length])
    }

    /// Explicit release, for call sites that want to name the point at
    /// which ownership transfers back rather than relying on scope exit.
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_exhausts_and_release_replenishes() {
        let pool = BufferPool::new(1, 1);
        let buf = pool.acquire_incoming().expect("first acquire succeeds");
        assert!(pool.acquire_incoming().is_none(), "pool should be exhausted");
        assert_eq!(pool.free_incoming_count(), 0);

        drop(buf);
        assert_eq!(pool.free_incoming_count(), 1);
        assert!(pool.acquire_incoming().is_some());
    }

    #[test]
    fn ref_count_tracks_clones() {
        let pool = BufferPool::new(2, 2);
        let buf = pool.acquire_outgoing().unwrap();
        assert_eq!(buf.ref_count(), 1);

        let clone1 = buf.clone();
        let clone2 = buf.clone();
        assert_eq!(buf.ref_count(), 3);

        drop(clone1);
        assert_eq!(buf.ref_count(), 2);
        assert_eq!(pool.free_outgoing_count(), 1); // still 1 live, 1 free

        drop(clone2);
        drop(buf);
        assert_eq!(pool.free_outgoing_count(), 2);
    }

    #[test]
    fn origin_routes_release_to_correct_pool() {
        let pool = BufferPool::new(1, 1);
        let incoming = pool.acquire_incoming().unwrap();
        let outgoing = pool.acquire_outgoing().unwrap();
        assert_eq!(incoming.origin(), Origin::Incoming);
        assert_eq!(outgoing.origin(), Origin::Outgoing);

        drop(incoming);
        assert_eq!(pool.free_incoming_count(), 1);
        assert_eq!(pool.free_outgoing_count(), 0);

        drop(outgoing);
        assert_eq!(pool.free_outgoing_count(), 1);
    }

    #[test]
    fn fill_and_read_back() {
        let pool = BufferPool::new(1, 1);
        let buf = pool.acquire_incoming().unwrap();
        buf.fill(b"hello");
        assert_eq!(buf.len(), 5);
        buf.with_bytes(|b| assert_eq!(b, b"hello"));
    }

    #[test]
    fn outgoing_release_gen_bumps_on_drop_only() {
        let pool = BufferPool::new(1, 1);
        let gen0 = pool.outgoing_release_gen();
        let buf = pool.acquire_outgoing().unwrap();
        assert_eq!(pool.outgoing_release_gen(), gen0); // acquiring doesn't bump it
        drop(buf);
        assert_eq!(pool.outgoing_release_gen(), gen0 + 1);
    }

    #[test]
    fn pool_drop_before_buffer_drop_does_not_panic() {
        let pool = BufferPool::new(1, 1);
        let buf = pool.acquire_incoming().unwrap();
        drop(pool);
        drop(buf); // weak upgrade fails silently
    }
}
