//! Fixed-capacity channel storage.
//!
//! A [`ChannelPool`] owns `N` channels of one kind. [`ChannelPool::acquire`] hands out the lowest
//! free slot after resetting it, [`ChannelPool::release`] resets the slot and makes it available
//! again. Slots carry a generation counter so handles to released slots are rejected.

use core::fmt::{Debug, Formatter};
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

use crate::{Error, Result};

/// A descriptor that can be stored in a [`ChannelPool`].
///
/// [`Default`] provides the reset state: no socket, nothing initialized, not connected.
pub trait Channel: Default {
    /// Protocol name used as the prefix of diagnostics.
    const KIND: &'static str;
}

/// Typed index of an allocated slot in a [`ChannelPool`].
pub struct ChannelHandle<C> {
    index: usize,
    generation: u32,
    _kind: PhantomData<fn() -> C>,
}

impl<C> ChannelHandle<C> {
    /// Returns the slot index inside the pool.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<C> Clone for ChannelHandle<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for ChannelHandle<C> {}

impl<C> PartialEq for ChannelHandle<C> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<C> Eq for ChannelHandle<C> {}

impl<C> Hash for ChannelHandle<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<C: Channel> Debug for ChannelHandle<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("kind", &C::KIND)
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

/// One pool slot.
#[derive(Debug, Default)]
struct Slot<C> {
    channel: C,
    allocated: bool,
    generation: u32,
}

/// Fixed-capacity storage for `N` channels of type `C`.
pub struct ChannelPool<C, const N: usize> {
    slots: [Slot<C>; N],
}

impl<C: Channel, const N: usize> ChannelPool<C, N> {
    /// Creates a pool with every slot free.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::default()),
        }
    }

    /// Returns the number of slots.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Returns the number of allocated slots.
    pub fn allocated(&self) -> usize {
        self.slots.iter().filter(|slot| slot.allocated).count()
    }

    /// Allocates the lowest free slot and resets its channel.
    ///
    /// Fails with [`Error::PoolExhausted`] once all `N` slots are allocated.
    pub fn acquire(&mut self) -> Result<ChannelHandle<C>> {
        let Some((index, slot)) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.allocated)
        else {
            tracing::error!(
                capacity = N,
                "{} acquire: requested too many channels, increase the pool capacity",
                C::KIND
            );
            return Err(Error::PoolExhausted { capacity: N });
        };

        slot.channel = C::default();
        slot.allocated = true;
        tracing::debug!(index, "{} acquire: slot allocated", C::KIND);

        Ok(ChannelHandle {
            index,
            generation: slot.generation,
            _kind: PhantomData,
        })
    }

    /// Resets the channel behind `handle`, closing its socket, and frees the slot.
    pub fn release(&mut self, handle: ChannelHandle<C>) -> Result<()> {
        let slot = self.slot_mut(handle)?;
        slot.channel = C::default();
        slot.allocated = false;
        slot.generation = slot.generation.wrapping_add(1);
        tracing::debug!(index = handle.index, "{} release: slot freed", C::KIND);
        Ok(())
    }

    /// Returns the channel behind `handle`.
    pub fn get(&self, handle: ChannelHandle<C>) -> Result<&C> {
        match self.slots.get(handle.index) {
            Some(slot) if slot.allocated && slot.generation == handle.generation => {
                Ok(&slot.channel)
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Returns the channel behind `handle` mutably.
    pub fn get_mut(&mut self, handle: ChannelHandle<C>) -> Result<&mut C> {
        Ok(&mut self.slot_mut(handle)?.channel)
    }

    fn slot_mut(&mut self, handle: ChannelHandle<C>) -> Result<&mut Slot<C>> {
        match self.slots.get_mut(handle.index) {
            Some(slot) if slot.allocated && slot.generation == handle.generation => Ok(slot),
            _ => Err(Error::InvalidHandle),
        }
    }
}

impl<C: Channel, const N: usize> Default for ChannelPool<C, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Channel, const N: usize> Debug for ChannelPool<C, N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelPool")
            .field("kind", &C::KIND)
            .field("capacity", &N)
            .field("allocated", &self.allocated())
            .finish()
    }
}
