use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Set of flags describing why a step or a transport stopped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(u32);

impl Event {
    pub const NONE: Event = Event(0);
    pub const LIMIT_ENERGY: Event = Event(1);
    pub const LIMIT_DISTANCE: Event = Event(1 << 1);
    pub const LIMIT_GRAMMAGE: Event = Event(1 << 2);
    pub const LIMIT_TIME: Event = Event(1 << 3);
    pub const MEDIUM: Event = Event(1 << 4);
    pub const VERTEX_BREMSSTRAHLUNG: Event = Event(1 << 5);
    pub const VERTEX_PAIR_CREATION: Event = Event(1 << 6);
    pub const VERTEX_PHOTONUCLEAR: Event = Event(1 << 7);
    pub const VERTEX_DELTA_RAY: Event = Event(1 << 8);
    pub const VERTEX_COULOMB: Event = Event(1 << 9);
    pub const VERTEX_DECAY: Event = Event(1 << 10);
    pub const WEIGHT: Event = Event(1 << 11);
    pub const START: Event = Event(1 << 12);
    pub const STOP: Event = Event(1 << 13);

    /// Any external limit.
    pub const LIMIT: Event = Event(0b1111);
    /// Any discrete energy loss vertex.
    pub const VERTEX_DEL: Event = Event(0b1111 << 5);
    /// Any interaction vertex.
    pub const VERTEX: Event = Event(0b11_1111 << 5);

    const NAMES: [(Event, &'static str); 14] = [
        (Event::LIMIT_ENERGY, "LIMIT_ENERGY"),
        (Event::LIMIT_DISTANCE, "LIMIT_DISTANCE"),
        (Event::LIMIT_GRAMMAGE, "LIMIT_GRAMMAGE"),
        (Event::LIMIT_TIME, "LIMIT_TIME"),
        (Event::MEDIUM, "MEDIUM"),
        (Event::VERTEX_BREMSSTRAHLUNG, "VERTEX_BREMSSTRAHLUNG"),
        (Event::VERTEX_PAIR_CREATION, "VERTEX_PAIR_CREATION"),
        (Event::VERTEX_PHOTONUCLEAR, "VERTEX_PHOTONUCLEAR"),
        (Event::VERTEX_DELTA_RAY, "VERTEX_DELTA_RAY"),
        (Event::VERTEX_COULOMB, "VERTEX_COULOMB"),
        (Event::VERTEX_DECAY, "VERTEX_DECAY"),
        (Event::WEIGHT, "WEIGHT"),
        (Event::START, "START"),
        (Event::STOP, "STOP"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if any flag of `other` is set.
    pub fn intersects(self, other: Event) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every flag of `other` is set.
    pub fn contains(self, other: Event) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Event {
    type Output = Event;

    fn bitor(self, rhs: Event) -> Event {
        Event(self.0 | rhs.0)
    }
}

impl BitOrAssign for Event {
    fn bitor_assign(&mut self, rhs: Event) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Event {
    type Output = Event;

    fn bitand(self, rhs: Event) -> Event {
        Event(self.0 & rhs.0)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NONE");
        }
        let names: Vec<&str> = Event::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(" | "))
    }
}
