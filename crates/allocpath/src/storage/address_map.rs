//! Primitive fixed-key-type hash map backing the thread shards.
//!
//! Open addressing with linear probing over interleaved 64-bit key/value
//! slots. Two backing strategies produce identical behavior: heap-resident
//! (a `Vec<u64>` owned by the allocator the host program uses) and
//! raw-memory-resident (pages requested directly from `std::alloc`, kept
//! out of any managed pool). Amortized O(1) get/put/remove; the table
//! grows when the load factor passes 3/4.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use crate::key::PathKey;

/// Slot key marking a never-occupied slot. Addresses are never 0.
const EMPTY: u64 = 0;
/// Slot key marking a deleted slot that probes must step over.
const TOMBSTONE: u64 = u64::MAX;

const MIN_CAPACITY: usize = 16;

/// Where an [`AddressMap`] keeps its slot array.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MapBacking {
    /// Slot array lives on the program heap.
    #[default]
    Heap,
    /// Slot array lives in raw memory obtained straight from the system
    /// allocator, bypassing any tracked/managed pool.
    Raw,
}

enum Slots {
    Heap(Vec<u64>),
    Raw { ptr: NonNull<u64>, words: usize },
}

impl Slots {
    fn zeroed(backing: MapBacking, words: usize) -> Self {
        match backing {
            MapBacking::Heap => Slots::Heap(vec![0; words]),
            MapBacking::Raw => {
                let layout =
                    Layout::array::<u64>(words).expect("slot array size overflows Layout");
                // SAFETY: `words` is nonzero, so the layout is nonzero-sized.
                let raw = unsafe { alloc_zeroed(layout) };
                let Some(ptr) = NonNull::new(raw.cast::<u64>()) else {
                    handle_alloc_error(layout);
                };
                Slots::Raw { ptr, words }
            }
        }
    }

    fn backing(&self) -> MapBacking {
        match self {
            Slots::Heap(_) => MapBacking::Heap,
            Slots::Raw { .. } => MapBacking::Raw,
        }
    }

    #[inline]
    fn as_slice(&self) -> &[u64] {
        match self {
            Slots::Heap(buf) => buf,
            // SAFETY: `ptr` points to `words` zero-initialized u64s owned
            // by this value, live until Drop.
            Slots::Raw { ptr, words } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), *words)
            },
        }
    }

    #[inline]
    fn as_mut_slice(&mut self) -> &mut [u64] {
        match self {
            Slots::Heap(buf) => buf,
            // SAFETY: as above, with exclusive access through &mut self.
            Slots::Raw { ptr, words } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr(), *words)
            },
        }
    }
}

impl Drop for Slots {
    fn drop(&mut self) {
        if let Slots::Raw { ptr, words } = self {
            let layout = Layout::array::<u64>(*words).expect("layout validated at allocation");
            // SAFETY: allocated in `zeroed` with the same layout.
            unsafe { dealloc(ptr.as_ptr().cast(), layout) };
        }
    }
}

// SAFETY: the raw buffer is uniquely owned; no interior aliasing.
unsafe impl Send for Slots {}

/// Open-addressing map from allocation address to [`PathKey`].
///
/// Addresses 0 and `u64::MAX` are reserved slot markers and must not be
/// used as keys; real allocation addresses are never either.
pub struct AddressMap {
    slots: Slots,
    capacity: usize, // slot pairs, always a power of two
    len: usize,
    tombstones: usize,
}

impl AddressMap {
    pub fn new(backing: MapBacking) -> Self {
        Self::with_capacity(backing, MIN_CAPACITY)
    }

    pub fn with_capacity(backing: MapBacking, capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        Self {
            slots: Slots::zeroed(backing, capacity * 2),
            capacity,
            len: 0,
            tombstones: 0,
        }
    }

    #[inline]
    fn bucket(&self, address: u64) -> usize {
        // Fibonacci hashing spreads consecutive allocator addresses, which
        // otherwise share low bits from size-class alignment.
        (address.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize & (self.capacity - 1)
    }

    pub fn get(&self, address: u64) -> Option<PathKey> {
        debug_assert!(address != EMPTY && address != TOMBSTONE);
        let slots = self.slots.as_slice();
        let mut index = self.bucket(address);
        for _ in 0..self.capacity {
            let slot_key = slots[index * 2];
            if slot_key == address {
                return Some(slots[index * 2 + 1]);
            }
            if slot_key == EMPTY {
                return None;
            }
            index = (index + 1) & (self.capacity - 1);
        }
        None
    }

    pub fn put(&mut self, address: u64, key: PathKey) {
        debug_assert!(address != EMPTY && address != TOMBSTONE);
        if (self.len + self.tombstones + 1) * 4 > self.capacity * 3 {
            self.resize();
        }

        let capacity = self.capacity;
        let mut index = self.bucket(address);
        let mut reusable: Option<usize> = None;
        let slots = self.slots.as_mut_slice();
        loop {
            let slot_key = slots[index * 2];
            if slot_key == address {
                slots[index * 2 + 1] = key;
                return;
            }
            if slot_key == TOMBSTONE {
                reusable.get_or_insert(index);
            } else if slot_key == EMPTY {
                let target = reusable.unwrap_or(index);
                if slots[target * 2] == TOMBSTONE {
                    self.tombstones -= 1;
                }
                slots[target * 2] = address;
                slots[target * 2 + 1] = key;
                self.len += 1;
                return;
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    pub fn remove(&mut self, address: u64) -> Option<PathKey> {
        debug_assert!(address != EMPTY && address != TOMBSTONE);
        let capacity = self.capacity;
        let mut index = self.bucket(address);
        let slots = self.slots.as_mut_slice();
        for _ in 0..capacity {
            let slot_key = slots[index * 2];
            if slot_key == address {
                slots[index * 2] = TOMBSTONE;
                self.len -= 1;
                self.tombstones += 1;
                return Some(slots[index * 2 + 1]);
            }
            if slot_key == EMPTY {
                return None;
            }
            index = (index + 1) & (capacity - 1);
        }
        None
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live (address, key) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, PathKey)> + '_ {
        let slots = self.slots.as_slice();
        (0..self.capacity).filter_map(move |index| {
            let slot_key = slots[index * 2];
            (slot_key != EMPTY && slot_key != TOMBSTONE)
                .then(|| (slot_key, slots[index * 2 + 1]))
        })
    }

    fn resize(&mut self) {
        // Grow only when live entries justify it; a rehash at the same
        // capacity just purges tombstones.
        let new_capacity = if self.len * 2 >= self.capacity {
            self.capacity * 2
        } else {
            self.capacity
        };

        let mut grown = AddressMap::with_capacity(self.slots.backing(), new_capacity);
        for (address, key) in self.iter() {
            grown.put(address, key);
        }
        *self = grown;
    }
}

impl std::fmt::Debug for AddressMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressMap")
            .field("backing", &self.slots.backing())
            .field("capacity", &self.capacity)
            .field("len", &self.len)
            .finish()
    }
}
