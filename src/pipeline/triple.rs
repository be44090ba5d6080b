//! Triple-buffered hand-off between the render loop and the encode thread

/// Logical role of one physical slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Target of the next GPU readback (written by the render loop)
    Capture,
    /// Complete frame waiting to be consumed by the encoder
    Drain,
    /// Slot most recently released by the encoder
    InFlight,
}

/// Three fixed slots addressed through a role mapping.
///
/// The mapping is always a permutation of `{0, 1, 2}`; [`rotate`](Self::rotate)
/// reassigns all three roles at once so no two roles can alias a slot.
#[derive(Debug)]
pub struct TripleBuffer<T> {
    slots: [Option<T>; 3],
    /// Physical slot index for (capture, drain, in-flight)
    roles: [usize; 3],
}

impl<T> Default for TripleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TripleBuffer<T> {
    pub fn new() -> Self {
        Self {
            slots: [None, None, None],
            roles: [0, 2, 1],
        }
    }

    fn role_index(role: Role) -> usize {
        match role {
            Role::Capture => 0,
            Role::Drain => 1,
            Role::InFlight => 2,
        }
    }

    /// Physical slot currently assigned to `role`
    pub fn slot_of(&self, role: Role) -> usize {
        self.roles[Self::role_index(role)]
    }

    /// `(capture, drain, inflight) <- (inflight, capture, drain)`
    pub fn rotate(&mut self) {
        let [capture, drain, inflight] = self.roles;
        self.roles = [inflight, capture, drain];
    }

    /// Store a frame in the slot for `role`, returning whatever was there
    pub fn put(&mut self, role: Role, value: T) -> Option<T> {
        let idx = self.slot_of(role);
        self.slots[idx].replace(value)
    }

    pub fn take(&mut self, role: Role) -> Option<T> {
        let idx = self.slot_of(role);
        self.slots[idx].take()
    }

    pub fn get(&self, role: Role) -> Option<&T> {
        self.slots[self.slot_of(role)].as_ref()
    }

    /// Drop every resident buffer
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    pub fn resident(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_permutation(buf: &TripleBuffer<u8>) {
        let mut seen = [false; 3];
        for role in [Role::Capture, Role::Drain, Role::InFlight] {
            seen[buf.slot_of(role)] = true;
        }
        assert_eq!(seen, [true, true, true]);
    }

    #[test]
    fn test_initial_assignment() {
        let buf = TripleBuffer::<u8>::new();
        assert_eq!(buf.slot_of(Role::Capture), 0);
        assert_eq!(buf.slot_of(Role::Drain), 2);
        assert_eq!(buf.slot_of(Role::InFlight), 1);
    }

    #[test]
    fn test_rotation_is_a_three_cycle() {
        let mut buf = TripleBuffer::<u8>::new();
        for _ in 0..100 {
            buf.rotate();
            assert_permutation(&buf);
        }

        let start = buf.roles;
        buf.rotate();
        assert_ne!(buf.roles, start);
        buf.rotate();
        assert_ne!(buf.roles, start);
        buf.rotate();
        assert_eq!(buf.roles, start);
    }

    #[test]
    fn test_captured_frame_becomes_drain() {
        let mut buf = TripleBuffer::new();
        buf.put(Role::Capture, 7u8);
        buf.rotate();
        assert_eq!(buf.get(Role::Drain), Some(&7));
        assert!(buf.get(Role::Capture).is_none());

        // Drained frame moves on to in-flight if the encoder never took it
        buf.rotate();
        assert_eq!(buf.get(Role::InFlight), Some(&7));
        assert_eq!(buf.take(Role::InFlight), Some(7));
        assert_eq!(buf.resident(), 0);
    }
}
