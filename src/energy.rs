//! Energy accumulation past the width of the hardware counters.
//!
//! The chip accumulates energies in 32-bit counters that wrap around. Each logical channel keeps,
//! per energy kind, the last counter value read and an extension word counting the wraparounds,
//! so that `combined = primary + extension × 2^32` keeps growing.

use crate::decode::EnergyKind;
use crate::device::{Channel, Scope, CHANNELS};

/// Weight of one extension unit, the full scale of a hardware counter.
pub const FULL_SCALE: u64 = 1 << 32;

/// Represents the accumulation errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnergyError {
    /// The extension word cannot count one more wraparound.
    ExtensionOverflow
}

/// Primary counter value and extension word of one energy.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnergyValue {
    pub primary: u32,
    pub extension: u32
}

impl EnergyValue {
    pub fn combined(&self) -> u64 {
        self.primary as u64 + self.extension as u64 * FULL_SCALE
    }

    /// Returns the combined value as a signed integer, failing from an extension of `2^31` on.
    pub fn signed(&self) -> Result<i64, EnergyError> {
        i64::try_from(self.combined()).map_err(|_| EnergyError::ExtensionOverflow)
    }

    /// Returns the value following a new counter reading.
    fn next(&self, primary: u32) -> Result<Self, EnergyError> {
        let extension = if primary < self.primary {
            self.extension.checked_add(1).ok_or(EnergyError::ExtensionOverflow)?
        } else {
            self.extension
        };
        Ok(Self { primary, extension })
    }
}

/// Extended energies of every logical channel.
#[derive(Debug, Default, Clone)]
pub struct EnergyAccumulator {
    values: [[EnergyValue; 4]; CHANNELS]
}

impl EnergyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new reading of the hardware counter and returns the combined value. A reading
    /// below the previous one is a wraparound. On error nothing is updated.
    pub fn accumulate(&mut self, channel: Channel, kind: EnergyKind, primary: u32) -> Result<u64, EnergyError> {
        let value = &mut self.values[channel.index()][kind.index()];
        *value = value.next(primary)?;
        Ok(value.combined())
    }

    /// Same as [`Self::accumulate()`], returning a signed combined value. On error nothing is
    /// updated.
    pub fn accumulate_signed(&mut self, channel: Channel, kind: EnergyKind, primary: u32) -> Result<i64, EnergyError> {
        let value = &mut self.values[channel.index()][kind.index()];
        let next = value.next(primary)?;
        let combined = next.signed()?;
        *value = next;
        Ok(combined)
    }

    pub fn value(&self, channel: Channel, kind: EnergyKind) -> EnergyValue {
        self.values[channel.index()][kind.index()]
    }

    pub fn combined_value(&self, channel: Channel, kind: EnergyKind) -> u64 {
        self.value(channel, kind).combined()
    }

    /// Clears the energies of one channel, or of every channel.
    pub fn reset(&mut self, scope: Scope<Channel>) {
        match scope {
            Scope::One(channel) => self.values[channel.index()] = [EnergyValue::default(); 4],
            Scope::All => self.values = [[EnergyValue::default(); 4]; CHANNELS]
        }
    }
}
