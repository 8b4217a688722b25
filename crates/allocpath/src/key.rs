//! Packing and unpacking of allocation path keys.
//!
//! A [`PathKey`] encodes an ordered sequence of up to [`MAX_PATH_DEPTH`]
//! call-point ids in a single `u64`, 16 bits per slot. The most recently
//! entered call (the one closest to the allocation site) lives in the low
//! bits. Pushing past the depth cap shifts the oldest call out of the high
//! bits, so a key always retains the innermost calls.

/// Compact encoding of an ordered call-point sequence.
pub type PathKey = u64;

/// Key value meaning "no path recorded".
pub const NO_PATH: PathKey = 0;

/// Bits per call-point slot in a [`PathKey`].
pub const CALL_POINT_BITS: u32 = 16;

const CALL_POINT_MASK: u64 = (1 << CALL_POINT_BITS) - 1;

/// Hard cap on the number of call points a key can hold.
pub const MAX_PATH_DEPTH: usize = 4;

const OUTERMOST_SHIFT: u32 = (MAX_PATH_DEPTH as u32 - 1) * CALL_POINT_BITS;

/// Highest call-point id the registry will ever hand out.
pub const MAX_CALL_POINTS: u16 = 0x7FFF;

/// Identifier of an interned call point. Id 0 is reserved for
/// "none/unknown" and is never assigned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallPointId(pub u16);

impl CallPointId {
    /// The reserved "no call point" id.
    pub const NONE: CallPointId = CallPointId(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Appends `id` as the new innermost call of `key`.
#[inline]
pub fn append_call(key: PathKey, id: CallPointId) -> PathKey {
    (key << CALL_POINT_BITS) | u64::from(id.0)
}

/// Removes the innermost call of `key`, verifying it is `id`.
///
/// Returns `None` when the low 16 bits do not match `id`. A mismatch means
/// the caller's push/pop nesting is corrupted; the codec itself stays pure
/// and leaves the recovery policy to the tracker.
#[inline]
pub fn remove_call(key: PathKey, id: CallPointId) -> Option<PathKey> {
    if key & CALL_POINT_MASK != u64::from(id.0) {
        return None;
    }
    Some(key >> CALL_POINT_BITS)
}

/// Id in the oldest (outermost) slot of `key`.
#[inline]
pub fn outermost_call(key: PathKey) -> CallPointId {
    CallPointId(((key >> OUTERMOST_SHIFT) & CALL_POINT_MASK) as u16)
}

/// Writes `id` into the vacant outermost slot of `key`, undoing the drop
/// a full-depth [`append_call`] performed.
#[inline]
pub fn refill_outermost(key: PathKey, id: CallPointId) -> PathKey {
    key | (u64::from(id.0) << OUTERMOST_SHIFT)
}

/// Decodes `key` into a fixed-length sequence of call-point ids, ordered
/// from the allocation site outward to the oldest captured frame.
///
/// Slots beyond the encoded depth come back as [`CallPointId::NONE`].
#[inline]
pub fn decode(key: PathKey) -> [CallPointId; MAX_PATH_DEPTH] {
    let mut ids = [CallPointId::NONE; MAX_PATH_DEPTH];
    let mut rest = key;
    for slot in &mut ids {
        *slot = CallPointId((rest & CALL_POINT_MASK) as u16);
        rest >>= CALL_POINT_BITS;
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(ids: &[u16]) -> PathKey {
        ids.iter()
            .fold(NO_PATH, |key, &id| append_call(key, CallPointId(id)))
    }

    #[test]
    fn round_trips_sequences_up_to_max_depth() {
        for seq in [
            &[7u16][..],
            &[1, 2][..],
            &[500, 3, 9][..],
            &[1, 2, 3, MAX_CALL_POINTS][..],
        ] {
            let key = encode(seq);
            let decoded = decode(key);
            // decode() yields innermost-first, encode() consumed outermost-first.
            for (i, &id) in seq.iter().rev().enumerate() {
                assert_eq!(decoded[i], CallPointId(id));
            }
            for slot in &decoded[seq.len()..] {
                assert_eq!(*slot, CallPointId::NONE);
            }
        }
    }

    #[test]
    fn remove_undoes_append() {
        let key = encode(&[10, 20]);
        let key = append_call(key, CallPointId(30));
        assert_eq!(remove_call(key, CallPointId(30)), Some(encode(&[10, 20])));
    }

    #[test]
    fn remove_rejects_mismatched_id() {
        let key = append_call(NO_PATH, CallPointId(5));
        assert_eq!(remove_call(key, CallPointId(6)), None);
    }

    #[test]
    fn overflowing_push_drops_the_oldest_call() {
        let key = encode(&[1, 2, 3, 4, 5]);
        let decoded = decode(key);
        assert_eq!(
            decoded,
            [
                CallPointId(5),
                CallPointId(4),
                CallPointId(3),
                CallPointId(2)
            ]
        );
    }

    #[test]
    fn outermost_refill_undoes_the_overflow_drop() {
        let key = encode(&[1, 2, 3, 4]);
        assert_eq!(outermost_call(key), CallPointId(1));

        let popped = remove_call(key, CallPointId(4)).unwrap();
        let refilled = refill_outermost(popped, CallPointId(0xAB));
        assert_eq!(
            decode(refilled),
            [
                CallPointId(3),
                CallPointId(2),
                CallPointId(1),
                CallPointId(0xAB)
            ]
        );
    }

    #[test]
    fn no_path_decodes_to_all_none() {
        assert!(decode(NO_PATH).iter().all(|id| id.is_none()));
    }
}
