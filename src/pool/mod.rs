//! Ordered connection slots: slot 0 is the writer, every later slot a reader.
//!
//! A slot may be reserved before its connection exists (the connection is still
//! opening in the background). Reserved slots count towards [`ConnectionPool::size`]
//! but are never handed out by [`ConnectionPool::writer`] or [`ConnectionPool::reader`].

mod fanout;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::SqlRouterError;

pub struct ConnectionPool<C> {
    slots: RwLock<Vec<Option<Arc<C>>>>,
    cursor: AtomicUsize,
}

impl<C> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }
}

// Manual Debug implementation because connections do not have to implement `Debug`
impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.read_slots();
        f.debug_struct("ConnectionPool")
            .field("size", &slots.len())
            .field("populated", &slots.iter().filter(|s| s.is_some()).count())
            .field("cursor", &self.cursor.load(Ordering::Relaxed))
            .finish()
    }
}

impl<C> ConnectionPool<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool of `slots` empty slots, the first of them reserved for the writer.
    #[must_use]
    pub fn with_reserved(slots: usize) -> Self {
        Self {
            slots: RwLock::new(vec![None; slots]),
            cursor: AtomicUsize::new(0),
        }
    }

    fn read_slots(&self) -> RwLockReadGuard<'_, Vec<Option<Arc<C>>>> {
        match self.slots.read() {
            Ok(guard) => guard,
            // Slots are only ever replaced whole, so a poisoned guard still holds a valid vector
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_slots(&self) -> RwLockWriteGuard<'_, Vec<Option<Arc<C>>>> {
        match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Prepend `conn` as the writer. The previous writer becomes the first reader.
    pub fn add_writer(&self, conn: Arc<C>) {
        let mut slots = self.write_slots();
        slots.insert(0, Some(conn));
        tracing::debug!(size = slots.len(), "pool: writer promoted");
    }

    /// Fill the lowest empty reader slot with `conn`, or append a new slot.
    ///
    /// Returns the index the reader landed in.
    pub fn add_reader(&self, conn: Arc<C>) -> usize {
        let mut slots = self.write_slots();
        let index = match slots.iter().skip(1).position(Option::is_none) {
            Some(offset) => {
                let index = offset + 1;
                slots[index] = Some(conn);
                index
            }
            None => {
                slots.push(Some(conn));
                slots.len() - 1
            }
        };
        tracing::debug!(index, size = slots.len(), "pool: reader added");
        index
    }

    /// Append an empty slot for a reader that is still opening. Returns its index.
    pub fn reserve_reader(&self) -> usize {
        let mut slots = self.write_slots();
        if slots.is_empty() {
            // index 0 belongs to the writer
            slots.push(None);
        }
        slots.push(None);
        slots.len() - 1
    }

    /// The connection in slot 0.
    ///
    /// # Errors
    ///
    /// Returns `SqlRouterError::NoWriterAvailable` when the pool is empty or slot 0 is
    /// still reserved.
    pub fn writer(&self) -> Result<Arc<C>, SqlRouterError> {
        self.read_slots()
            .first()
            .and_then(Clone::clone)
            .ok_or(SqlRouterError::NoWriterAvailable)
    }

    /// The next populated reader in round-robin order.
    ///
    /// Every call advances the shared cursor; empty slots are skipped by advancing
    /// again. At most one full cycle over the reader slots is made.
    ///
    /// # Errors
    ///
    /// Returns `SqlRouterError::NoReaderAvailable` when there are no reader slots or
    /// none of them is populated.
    pub fn reader(&self) -> Result<Arc<C>, SqlRouterError> {
        // The writer (slot 0) is deliberately excluded from rotation.
        // The read guard is held across the cursor advance so the length cannot
        // change between computing an index and using it.
        let slots = self.read_slots();
        let readers = slots.len().saturating_sub(1);
        if readers == 0 {
            return Err(SqlRouterError::NoReaderAvailable);
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % readers;
        for step in 0..readers {
            if step > 0 {
                self.cursor.fetch_add(1, Ordering::Relaxed);
            }
            let index = 1 + (start + step) % readers;
            if let Some(conn) = &slots[index] {
                return Ok(Arc::clone(conn));
            }
        }

        Err(SqlRouterError::NoReaderAvailable)
    }

    /// Number of slots, reserved ones included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.read_slots().len()
    }

    /// True when at least one reader slot exists, populated or not.
    #[must_use]
    pub fn has_reader_slots(&self) -> bool {
        self.size() > 1
    }

    /// Snapshot of every populated slot, writer first.
    #[must_use]
    pub fn populated(&self) -> Vec<Arc<C>> {
        self.read_slots().iter().flatten().cloned().collect()
    }
}
