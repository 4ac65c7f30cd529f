//! Latch bookkeeping of the external chips.
//!
//! A latch copies the live accumulators of a chip into its readable registers. Every chip goes
//! through `Idle → Latching → Latched`, and back to `Idle` once the latch is released or a new
//! one starts. The controller only tracks states and epochs; driving the SYN pins and the latch
//! command writes is left to [`crate::Metrology`].

use crate::device::DeviceId;

/// Number of acknowledge polls of a software latch before giving up.
pub const LATCH_POLL_ATTEMPTS: usize = 10;

/// Interval between two acknowledge polls, in microseconds.
pub const LATCH_POLL_US: u32 = 100;

/// Minimum width of a SYN low pulse, in microseconds.
pub const SYN_PULSE_US: u32 = 4;

/// Represents the latch strategies of a chip.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LatchType {
    /// The SYN pin is pulsed low.
    SynPulse,
    /// The latch bits of `DSP_CR3` are set and polled until the chip clears them.
    Software,
    /// The chip latches by itself at a fixed rate. Only the epoch is recorded.
    Auto
}

/// Represents the latch state of a chip.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LatchState {
    #[default]
    Idle,
    Latching,
    Latched
}

/// Represents the latch errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LatchError {
    /// A latch is already outstanding on one of the chips.
    Busy,
    /// The chip did not acknowledge the latch in time.
    Timeout,
    /// The id does not designate an external chip.
    InvalidDevice
}

#[derive(Debug, Default, Copy, Clone)]
struct Slot {
    state: LatchState,
    epoch: Option<u32>
}

/// Latch states and epochs of `N` external chips.
pub struct LatchController<const N: usize> {
    slots: [Slot; N],
    next_epoch: u32
}

impl<const N: usize> Default for LatchController<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LatchController<N> {
    pub fn new() -> Self {
        Self { slots: [Slot::default(); N], next_epoch: 1 }
    }

    pub fn state(&self, id: DeviceId) -> Result<LatchState, LatchError> {
        Ok(self.slot(id)?.state)
    }

    /// Returns the epoch of the last completed latch of the chip.
    pub fn epoch(&self, id: DeviceId) -> Result<Option<u32>, LatchError> {
        Ok(self.slot(id)?.epoch)
    }

    /// Moves every chip of `ids` to `Latching` and returns the epoch the latch will be confirmed
    /// with. Nothing changes if one of the chips is already latching.
    pub fn begin(&mut self, ids: &[DeviceId]) -> Result<u32, LatchError> {
        for id in ids {
            if self.slot(*id)?.state == LatchState::Latching {
                return Err(LatchError::Busy);
            }
        }
        for id in ids {
            self.slot_mut(*id)?.state = LatchState::Latching;
        }
        let epoch = self.next_epoch;
        self.next_epoch = self.next_epoch.wrapping_add(1).max(1);
        Ok(epoch)
    }

    /// Moves every chip of `ids` from `Latching` to `Latched`, tagging them with `epoch`.
    pub fn confirm(&mut self, ids: &[DeviceId], epoch: u32) -> Result<(), LatchError> {
        for id in ids {
            let slot = self.slot_mut(*id)?;
            if slot.state == LatchState::Latching {
                slot.state = LatchState::Latched;
                slot.epoch = Some(epoch);
            }
        }
        Ok(())
    }

    /// Reverts every latching chip of `ids` to `Idle`. The epoch of the previous latch is kept.
    pub fn abort(&mut self, ids: &[DeviceId]) {
        for id in ids {
            if let Ok(slot) = self.slot_mut(*id) {
                if slot.state == LatchState::Latching {
                    slot.state = LatchState::Idle;
                }
            }
        }
    }

    /// Returns a latched chip to `Idle`.
    pub fn release(&mut self, id: DeviceId) -> Result<(), LatchError> {
        let slot = self.slot_mut(id)?;
        if slot.state == LatchState::Latched {
            slot.state = LatchState::Idle;
        }
        Ok(())
    }

    /// Returns the epoch the registers of the chip can be read under, or [`LatchError::Busy`]
    /// while a latch is outstanding.
    pub fn readable(&self, id: DeviceId) -> Result<Option<u32>, LatchError> {
        let slot = self.slot(id)?;
        match slot.state {
            LatchState::Latching => Err(LatchError::Busy),
            LatchState::Latched => Ok(slot.epoch),
            LatchState::Idle => Ok(None)
        }
    }

    /// Forgets every state and epoch.
    pub fn reset(&mut self) {
        self.slots = [Slot::default(); N];
    }

    fn slot(&self, id: DeviceId) -> Result<&Slot, LatchError> {
        match id.index() {
            0 => Err(LatchError::InvalidDevice),
            i => self.slots.get(i - 1).ok_or(LatchError::InvalidDevice)
        }
    }

    fn slot_mut(&mut self, id: DeviceId) -> Result<&mut Slot, LatchError> {
        match id.index() {
            0 => Err(LatchError::InvalidDevice),
            i => self.slots.get_mut(i - 1).ok_or(LatchError::InvalidDevice)
        }
    }
}
