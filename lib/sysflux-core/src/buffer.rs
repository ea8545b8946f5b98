//! Bounded buffer of entries awaiting delivery.

use std::{
    collections::VecDeque,
    num::NonZeroUsize,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::{BufMut as _, Bytes, BytesMut};
use tracing::debug;

use crate::entry::Entry;

/// Default maximum number of buffered entries.
pub const DEFAULT_MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => unreachable!(),
};

struct SequencedEntry {
    sequence: u64,
    entry: Entry,
}

#[derive(Default)]
struct State {
    entries: VecDeque<SequencedEntry>,
    next_sequence: u64,
}

/// A bounded, ordered buffer of entries shared between the reporter and the sender.
///
/// The buffer holds at most `capacity` entries. When appending would exceed that, the oldest entries are discarded
/// first so that the most recent observations are kept regardless of how delivery is going.
///
/// Entries leave the buffer only when a [`Batch`] containing them is acknowledged. Every entry is assigned a sequence
/// number when appended, and a batch remembers the highest sequence number it covers: acknowledging it removes only
/// those entries, so anything appended while the batch was in flight stays queued for the next send.
///
/// `EntryBuffer` is a cheap handle: clones refer to the same underlying buffer. A single mutex guards all state and is
/// only ever held for the duration of an in-memory update.
#[derive(Clone)]
pub struct EntryBuffer {
    state: Arc<Mutex<State>>,
    capacity: NonZeroUsize,
}

impl EntryBuffer {
    /// Creates a new, empty `EntryBuffer` with the given capacity.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            capacity,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the maximum number of entries the buffer will hold.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Returns the number of buffered entries.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns `true` if there are no buffered entries.
    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Appends entries to the buffer, discarding the oldest entries if the capacity would be exceeded.
    ///
    /// Returns the number of entries that were discarded.
    pub fn push<I>(&self, entries: I) -> usize
    where
        I: IntoIterator<Item = Entry>,
    {
        let mut state = self.state();

        for entry in entries {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.entries.push_back(SequencedEntry { sequence, entry });
        }

        let overflow = state.entries.len().saturating_sub(self.capacity.get());
        if overflow > 0 {
            state.entries.drain(..overflow);
            debug!(dropped = overflow, "Dropped oldest entries to stay within buffer capacity.");
        }

        overflow
    }

    /// Takes a snapshot of all buffered entries as a single batch.
    ///
    /// The entries are not removed. Returns `None` if the buffer is empty.
    pub fn snapshot(&self) -> Option<Batch> {
        let state = self.state();
        let last = state.entries.back()?;

        let payload_len = state.entries.iter().map(|e| e.entry.len() + 1).sum::<usize>();
        let mut payload = BytesMut::with_capacity(payload_len);
        for (i, e) in state.entries.iter().enumerate() {
            if i > 0 {
                payload.put_u8(b'\n');
            }
            payload.put_slice(e.entry.as_str().as_bytes());
        }

        Some(Batch {
            payload: payload.freeze(),
            len: state.entries.len(),
            last_sequence: last.sequence,
        })
    }

    /// Removes the entries covered by the given batch.
    ///
    /// Entries covered by the batch that were already discarded due to overflow are simply skipped. Returns the number
    /// of entries removed.
    pub fn acknowledge(&self, batch: &Batch) -> usize {
        let mut state = self.state();

        let removed = state
            .entries
            .iter()
            .take_while(|e| e.sequence <= batch.last_sequence)
            .count();
        state.entries.drain(..removed);

        removed
    }

    /// Returns a copy of the buffered entries, oldest first.
    pub fn entries(&self) -> Vec<Entry> {
        self.state().entries.iter().map(|e| e.entry.clone()).collect()
    }
}

/// A snapshot of buffered entries, joined into a single payload.
#[derive(Clone, Debug)]
pub struct Batch {
    payload: Bytes,
    len: usize,
    last_sequence: u64,
}

impl Batch {
    /// Returns the newline-delimited payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the number of entries in the batch.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the batch contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn entry(i: usize) -> Entry {
        Entry::from(format!("mem_usage value={}.000000 {}", i, i))
    }

    fn buffer(capacity: usize) -> EntryBuffer {
        EntryBuffer::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn push_grows_until_capacity() {
        let buffer = buffer(5);

        for i in 0..3 {
            assert_eq!(buffer.push([entry(i)]), 0);
        }

        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn overflow_drops_oldest() {
        let buffer = buffer(3);

        assert_eq!(buffer.push((0..2).map(entry)), 0);
        assert_eq!(buffer.push((2..5).map(entry)), 2);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.entries(), vec![entry(2), entry(3), entry(4)]);
    }

    #[test]
    fn snapshot_joins_entries_with_newlines() {
        let buffer = buffer(10);
        assert!(buffer.snapshot().is_none());

        buffer.push((0..3).map(entry));
        let batch = buffer.snapshot().unwrap();

        assert_eq!(batch.len(), 3);
        assert_eq!(
            &batch.payload()[..],
            b"mem_usage value=0.000000 0\nmem_usage value=1.000000 1\nmem_usage value=2.000000 2"
        );

        // Taking a snapshot does not consume anything.
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn acknowledge_keeps_entries_appended_after_snapshot() {
        let buffer = buffer(10);
        buffer.push((0..3).map(entry));

        let batch = buffer.snapshot().unwrap();
        buffer.push([entry(3), entry(4)]);

        assert_eq!(buffer.acknowledge(&batch), 3);
        assert_eq!(buffer.entries(), vec![entry(3), entry(4)]);
    }

    #[test]
    fn acknowledge_after_overflow_only_removes_sent_entries() {
        let buffer = buffer(3);
        buffer.push((0..3).map(entry));

        // Entries 0 and 1 get trimmed while the batch is in flight.
        let batch = buffer.snapshot().unwrap();
        buffer.push([entry(3), entry(4)]);
        assert_eq!(buffer.entries(), vec![entry(2), entry(3), entry(4)]);

        assert_eq!(buffer.acknowledge(&batch), 1);
        assert_eq!(buffer.entries(), vec![entry(3), entry(4)]);
    }

    #[test]
    fn acknowledge_twice_is_harmless() {
        let buffer = buffer(10);
        buffer.push((0..2).map(entry));

        let batch = buffer.snapshot().unwrap();
        assert_eq!(buffer.acknowledge(&batch), 2);
        assert_eq!(buffer.acknowledge(&batch), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let buffer = buffer(10);
        let other = buffer.clone();

        buffer.push([entry(0)]);
        assert_eq!(other.len(), 1);
    }

    proptest! {
        #[test]
        fn property_test_bounded_and_keeps_most_recent(
            capacity in 1usize..64,
            pushes in proptest::collection::vec(0usize..16, 0..64)
        ) {
            let buffer = buffer(capacity);
            let mut appended = 0;

            for count in pushes {
                buffer.push((appended..appended + count).map(entry));
                appended += count;
                prop_assert!(buffer.len() <= capacity);
            }

            let expected = (appended.saturating_sub(capacity)..appended).map(entry).collect::<Vec<_>>();
            prop_assert_eq!(buffer.entries(), expected);
        }
    }
}
