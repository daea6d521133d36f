//! The identifier space of a channel: 256 identifiers per packet code.
//!
//! Identifiers are handed out round-robin, starting one past the identifier allocated most
//!  recently for the same code, and skipping identifiers that are still in use. This maximises
//!  the time before an identifier is reused, which reduces the chance of a late reply to an
//!  earlier request being mistaken for a reply to a new one.

use thiserror::Error;
use tracing::trace;
use crate::packet::code::CodeName;

pub const IDS_PER_CODE: usize = 256;

/// All identifiers of a code are in use. This is back pressure rather than an error: it goes
///  away when an outstanding request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no free identifier")]
pub struct Busy;

struct CodeIds<E> {
    slots: Vec<Option<E>>,
    last_allocated: u8,
    num_used: usize,
}

impl<E> CodeIds<E> {
    fn new(last_allocated: u8) -> CodeIds<E> {
        CodeIds {
            slots: (0..IDS_PER_CODE).map(|_| None).collect(),
            last_allocated,
            num_used: 0,
        }
    }
}

pub struct IdTable<E> {
    /// indexed by code, created on first use
    codes: Vec<Option<CodeIds<E>>>,
    randomize_start: bool,
    len: usize,
}

impl<E> IdTable<E> {
    /// If `randomize_start` is true, the first identifier allocated for each code is random.
    ///  Otherwise allocation starts at 0.
    pub fn new(randomize_start: bool) -> IdTable<E> {
        IdTable {
            codes: (0..256).map(|_| None).collect(),
            randomize_start,
            len: 0,
        }
    }

    fn code_ids(&mut self, code: u8) -> &mut CodeIds<E> {
        let randomize_start = self.randomize_start;
        self.codes[code as usize].get_or_insert_with(|| {
            let last_allocated = if randomize_start { rand::random() } else { u8::MAX };
            CodeIds::new(last_allocated)
        })
    }

    /// Picks the next free identifier for a code. This does not reserve it: the caller is expected
    ///  to [bind](IdTable::bind) it before allocating again.
    pub fn allocate(&mut self, code: u8) -> Result<u8, Busy> {
        let ids = self.code_ids(code);
        if ids.num_used == IDS_PER_CODE {
            trace!("all identifiers in use for code {:?}", CodeName(code));
            return Err(Busy);
        }

        for offset in 1..=IDS_PER_CODE {
            let candidate = ids.last_allocated.wrapping_add(offset as u8);
            if ids.slots[candidate as usize].is_none() {
                ids.last_allocated = candidate;
                return Ok(candidate);
            }
        }
        unreachable!("num_used < {} implies a free slot", IDS_PER_CODE)
    }

    /// Stores an entry in a free slot. Binding an occupied slot is a bug in the caller.
    pub fn bind(&mut self, code: u8, id: u8, entry: E) {
        let ids = self.code_ids(code);
        let slot = &mut ids.slots[id as usize];
        assert!(slot.is_none(), "binding identifier {} for code {} which is in use", id, code);

        *slot = Some(entry);
        ids.num_used += 1;
        self.len += 1;
    }

    pub fn lookup(&self, code: u8, id: u8) -> Option<&E> {
        self.codes[code as usize].as_ref()?
            .slots[id as usize].as_ref()
    }

    pub fn lookup_mut(&mut self, code: u8, id: u8) -> Option<&mut E> {
        self.codes[code as usize].as_mut()?
            .slots[id as usize].as_mut()
    }

    /// Frees an identifier, returning the entry that held it. Freeing an unused identifier is a
    ///  no-op.
    pub fn free(&mut self, code: u8, id: u8) -> Option<E> {
        let ids = self.codes[code as usize].as_mut()?;
        let entry = ids.slots[id as usize].take()?;
        ids.num_used -= 1;
        self.len -= 1;
        Some(entry)
    }

    pub fn num_used(&self, code: u8) -> usize {
        self.codes[code as usize].as_ref()
            .map(|ids| ids.num_used)
            .unwrap_or(0)
    }

    /// total number of bound entries across all codes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes all entries, returning them with their code and identifier in code / identifier
    ///  order. Allocation positions are kept.
    pub fn drain(&mut self) -> Vec<(u8, u8, E)> {
        let mut result = Vec::with_capacity(self.len);
        for (code, ids) in self.codes.iter_mut().enumerate() {
            let Some(ids) = ids else { continue };
            for (id, slot) in ids.slots.iter_mut().enumerate() {
                if let Some(entry) = slot.take() {
                    result.push((code as u8, id as u8, entry));
                }
            }
            ids.num_used = 0;
        }
        self.len = 0;
        result
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rustc_hash::FxHashSet;
    use super::*;

    #[test]
    fn test_allocate_round_robin() {
        let mut table = IdTable::<&str>::new(false);

        assert_eq!(table.allocate(1), Ok(0));
        table.bind(1, 0, "a");
        assert_eq!(table.allocate(1), Ok(1));
        table.bind(1, 1, "b");

        // freeing does not move the allocation position back
        table.free(1, 0);
        assert_eq!(table.allocate(1), Ok(2));
    }

    #[test]
    fn test_allocate_is_not_reserving() {
        let mut table = IdTable::<()>::new(false);
        assert_eq!(table.allocate(4), Ok(0));
        // not bound, so the position moves on but nothing is in use
        assert_eq!(table.allocate(4), Ok(1));
        assert_eq!(table.num_used(4), 0);
    }

    #[test]
    fn test_codes_are_independent() {
        let mut table = IdTable::<u32>::new(false);

        for code in [1u8, 4, 12] {
            let id = table.allocate(code).unwrap();
            assert_eq!(id, 0);
            table.bind(code, id, code as u32);
        }

        assert_eq!(table.lookup(1, 0), Some(&1));
        assert_eq!(table.lookup(4, 0), Some(&4));
        assert_eq!(table.lookup(12, 0), Some(&12));
        assert_eq!(table.lookup(2, 0), None);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_busy_after_256() {
        let mut table = IdTable::<usize>::new(true);

        let mut seen = FxHashSet::default();
        for i in 0..256 {
            let id = table.allocate(2).unwrap();
            assert!(seen.insert(id), "identifier {} allocated twice", id);
            table.bind(2, id, i);
        }

        assert_eq!(table.allocate(2), Err(Busy));
        assert_eq!(table.num_used(2), 256);
        // other codes are unaffected
        assert!(table.allocate(1).is_ok());

        let freed_id = 77;
        assert!(table.free(2, freed_id).is_some());
        assert_eq!(table.allocate(2), Ok(freed_id));
    }

    #[rstest]
    #[case::skip_one(vec![5], 4, 6)]
    #[case::skip_several(vec![5, 6, 7], 4, 8)]
    #[case::wrap_around(vec![], 255, 0)]
    #[case::wrap_around_skipping(vec![255, 0, 1], 254, 2)]
    fn test_skip_occupied(#[case] occupied: Vec<u8>, #[case] last_allocated: u8, #[case] expected: u8) {
        let mut table = IdTable::<()>::new(false);
        for id in occupied {
            table.bind(3, id, ());
        }
        table.code_ids(3).last_allocated = last_allocated;

        assert_eq!(table.allocate(3), Ok(expected));
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut table = IdTable::<&str>::new(false);
        table.bind(1, 9, "x");

        assert_eq!(table.free(1, 9), Some("x"));
        assert_eq!(table.free(1, 9), None);
        assert_eq!(table.free(200, 9), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_mut() {
        let mut table = IdTable::<u32>::new(false);
        table.bind(1, 3, 10);

        *table.lookup_mut(1, 3).unwrap() += 1;
        assert_eq!(table.lookup(1, 3), Some(&11));
        assert!(table.lookup_mut(1, 4).is_none());
    }

    #[test]
    fn test_drain() {
        let mut table = IdTable::<&str>::new(false);
        table.bind(4, 2, "c");
        table.bind(1, 7, "b");
        table.bind(1, 3, "a");

        assert_eq!(table.drain(), vec![(1, 3, "a"), (1, 7, "b"), (4, 2, "c")]);
        assert!(table.is_empty());
        assert_eq!(table.num_used(1), 0);
        assert!(table.lookup(1, 3).is_none());
    }

    #[test]
    #[should_panic]
    fn test_bind_twice_panics() {
        let mut table = IdTable::<()>::new(false);
        table.bind(1, 1, ());
        table.bind(1, 1, ());
    }
}
