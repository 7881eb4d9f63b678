//! Fixed-capacity voice slot allocator.
//!
//! Free slots are tracked in 64-bit groups so acquisition is a short scan
//! for the first non-zero word followed by a trailing-zeros pick. Slot
//! indices map one-to-one onto the session's pre-allocated backend voices.

pub(crate) struct VoicePool {
    /// Bit set = slot free. Trailing bits past `capacity` stay clear.
    free: Vec<u64>,
    /// Bit set = slot exists (usable), free or not.
    usable: Vec<u64>,
    capacity: usize,
}

impl VoicePool {
    pub(crate) fn new(capacity: usize) -> Self {
        let groups = capacity.div_ceil(64);
        let mut usable = vec![0u64; groups];
        let mut remaining = capacity;
        for word in usable.iter_mut() {
            if remaining >= 64 {
                *word = u64::MAX;
                remaining -= 64;
            } else {
                *word = (1u64 << remaining) - 1;
                remaining = 0;
            }
        }
        Self {
            free: usable.clone(),
            usable,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the lowest free slot index, or `None` when all slots are in
    /// use. Exhaustion is an ordinary outcome for the caller, not a fault.
    pub(crate) fn acquire(&mut self) -> Option<usize> {
        for (group, word) in self.free.iter_mut().enumerate() {
            if *word != 0 {
                let bit = word.trailing_zeros() as usize;
                *word &= !(1u64 << bit);
                return Some(group * 64 + bit);
            }
        }
        None
    }

    /// Returns a slot to the pool. Only the current owner may release a
    /// slot; releasing a free or out-of-range index is a contract violation.
    pub(crate) fn release(&mut self, slot: usize) {
        debug_assert!(slot < self.capacity, "slot {slot} out of range");
        let (group, bit) = (slot / 64, slot % 64);
        debug_assert_eq!(
            self.free[group] & (1u64 << bit),
            0,
            "slot {slot} released while free"
        );
        self.free[group] |= 1u64 << bit;
    }

    pub(crate) fn is_allocated(&self, slot: usize) -> bool {
        if slot >= self.capacity {
            return false;
        }
        let (group, bit) = (slot / 64, slot % 64);
        self.free[group] & (1u64 << bit) == 0
    }

    /// Iterates allocated slot indices in ascending order.
    pub(crate) fn allocated(&self) -> impl Iterator<Item = usize> + '_ {
        self.free
            .iter()
            .zip(self.usable.iter())
            .enumerate()
            .flat_map(|(group, (&free, &usable))| {
                let mut used = !free & usable;
                std::iter::from_fn(move || {
                    if used == 0 {
                        return None;
                    }
                    let bit = used.trailing_zeros() as usize;
                    used &= used - 1;
                    Some(group * 64 + bit)
                })
            })
    }
}
