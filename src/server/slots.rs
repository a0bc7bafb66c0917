//! Fixed-capacity generational slot table for live connections.

use crate::command::ConnectionId;

enum Slot<T> {
    Vacant { generation: u32 },
    Occupied { generation: u32, value: T },
}

/// Capacity-bounded table addressed by [`ConnectionId`].
///
/// New entries take the lowest free slot. Removing an entry bumps the slot's
/// generation, so ids issued for the previous occupant stop resolving.
pub(crate) struct Slots<T> {
    slots: Vec<Slot<T>>,
    len: usize,
}

impl<T> Slots<T> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::Vacant { generation: 0 }).collect(),
            len: 0,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Store the value built by `make` in the first free slot.
    ///
    /// `make` receives the id the entry will have. Returns `None` when full.
    pub(crate) fn insert_with<F>(&mut self, make: F) -> Option<ConnectionId>
    where
        F: FnOnce(ConnectionId) -> T,
    {
        let (index, generation) = self.slots.iter().enumerate().find_map(|(i, slot)| match slot {
            Slot::Vacant { generation } => Some((i, *generation)),
            Slot::Occupied { .. } => None,
        })?;

        let id = ConnectionId::new(u32::try_from(index).ok()?, generation);
        self.slots[index] = Slot::Occupied {
            generation,
            value: make(id),
        };
        self.len += 1;
        Some(id)
    }

    pub(crate) fn get(&self, id: ConnectionId) -> Option<&T> {
        match self.slots.get(id.index() as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut T> {
        match self.slots.get_mut(id.index() as usize)? {
            Slot::Occupied { generation, value } if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == id.generation() => {}
            _ => return None,
        }

        let next = Slot::Vacant {
            generation: id.generation().wrapping_add(1),
        };
        match std::mem::replace(slot, next) {
            Slot::Occupied { value, .. } => {
                self.len -= 1;
                Some(value)
            }
            Slot::Vacant { .. } => None,
        }
    }

    /// Ids of all occupied slots, in slot order.
    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied { generation, .. } => {
                    Some(ConnectionId::new(i as u32, *generation))
                }
                Slot::Vacant { .. } => None,
            })
            .collect()
    }
}
