//! Status, live event and link status decoding.
//!
//! The electrical status (`DSP_SR1`/`DSP_SR2`), the live events (`DSP_EV1`/`DSP_EV2`) and the
//! link status (`US_REG3`) are three independent bit domains. Each one is decoded into its own
//! [`FlagSet`] type so that conditions of one domain can never be queried against the word of
//! another.

use core::marker::PhantomData;

use crate::frame::FrameError;
use crate::link::LinkError;

/// A named condition occupying a single bit of a status word.
pub trait Flag: Copy + 'static {
    /// Returns the bit of the condition in its status word.
    fn mask(self) -> u32;

    /// Returns every condition of the domain.
    fn all() -> &'static [Self];
}

/// Selects either one condition or the whole domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Query<T> {
    One(T),
    All
}

/// Set of conditions of one domain, decoded from a status word.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct FlagSet<T> {
    bits: u32,
    _flag: PhantomData<T>
}

impl<T> Default for FlagSet<T> {
    fn default() -> Self {
        Self { bits: 0, _flag: PhantomData }
    }
}

impl<T: Flag + core::fmt::Debug> core::fmt::Debug for FlagSet<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: Flag> FlagSet<T> {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Decodes a raw status word. Bits not assigned to a condition are dropped.
    pub fn from_word(word: u32) -> Self {
        Self { bits: word & Self::known(), _flag: PhantomData }
    }

    /// Returns the raw bits of the set, as found in the status word.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn contains(&self, flag: T) -> bool {
        self.bits & flag.mask() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn insert(&mut self, flag: T) {
        self.bits |= flag.mask();
    }

    pub fn union(&self, other: Self) -> Self {
        Self { bits: self.bits | other.bits, _flag: PhantomData }
    }

    /// Returns the part of the set selected by `query`.
    pub fn select(&self, query: Query<T>) -> Self {
        match query {
            Query::One(flag) => Self { bits: self.bits & flag.mask(), _flag: PhantomData },
            Query::All => *self
        }
    }

    /// Iterates over the conditions of the set.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        T::all().iter().copied().filter(move |flag| self.contains(*flag))
    }

    fn known() -> u32 {
        T::all().iter().fold(0, |acc, flag| acc | flag.mask())
    }
}

/// Electrical status conditions, latched by the chip until acknowledged.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Refreshed,
    TamperDetected,
    TamperOrWrongInsertion,
    VoltageSwellDown,
    VoltageSwellUp,
    VoltageSagDown,
    VoltageSagUp,
    VoltagePeriod,
    VoltageSignalStuck,
    OverflowApparentEnergy,
    OverflowReactiveEnergy,
    OverflowFundamentalEnergy,
    OverflowActiveEnergy,
    SignApparentPower,
    SignReactivePower,
    SignFundamentalPower,
    SignActivePower,
    CurrentSwellDown,
    CurrentSwellUp,
    CurrentNah,
    CurrentSignalStuck
}

impl Status {
    pub const ALL: [Status; 21] = [
        Status::Refreshed,
        Status::TamperDetected,
        Status::TamperOrWrongInsertion,
        Status::VoltageSwellDown,
        Status::VoltageSwellUp,
        Status::VoltageSagDown,
        Status::VoltageSagUp,
        Status::VoltagePeriod,
        Status::VoltageSignalStuck,
        Status::OverflowApparentEnergy,
        Status::OverflowReactiveEnergy,
        Status::OverflowFundamentalEnergy,
        Status::OverflowActiveEnergy,
        Status::SignApparentPower,
        Status::SignReactivePower,
        Status::SignFundamentalPower,
        Status::SignActivePower,
        Status::CurrentSwellDown,
        Status::CurrentSwellUp,
        Status::CurrentNah,
        Status::CurrentSignalStuck
    ];
}

impl Flag for Status {
    fn mask(self) -> u32 {
        let bit = match self {
            Status::SignActivePower => 0,
            Status::SignFundamentalPower => 1,
            Status::SignReactivePower => 2,
            Status::SignApparentPower => 3,
            Status::OverflowActiveEnergy => 4,
            Status::OverflowFundamentalEnergy => 5,
            Status::OverflowReactiveEnergy => 6,
            Status::OverflowApparentEnergy => 7,
            Status::CurrentSwellUp => 8,
            Status::CurrentSwellDown => 9,
            Status::CurrentNah => 10,
            Status::CurrentSignalStuck => 11,
            Status::VoltageSwellUp => 12,
            Status::VoltageSwellDown => 13,
            Status::VoltageSagUp => 14,
            Status::VoltageSagDown => 15,
            Status::VoltagePeriod => 16,
            Status::VoltageSignalStuck => 17,
            Status::TamperDetected => 20,
            Status::TamperOrWrongInsertion => 21,
            Status::Refreshed => 24
        };
        1 << bit
    }

    fn all() -> &'static [Self] {
        &Status::ALL
    }
}

/// Live events, reflecting the present state of a condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LiveEvent {
    Refreshed,
    WrongInsertion,
    VoltageSag,
    VoltageSwell,
    CurrentSwell,
    VoltageZcr,
    CurrentZcr,
    VoltagePeriod,
    VoltageSignalStuck,
    CurrentSignalStuck,
    CurrentTamper,
    SignChangeApparentPower,
    SignChangeReactivePower,
    SignChangeFundamentalPower,
    SignChangeActivePower,
    OverflowApparentEnergy,
    OverflowReactiveEnergy,
    OverflowFundamentalEnergy,
    OverflowActiveEnergy,
    CurrentNah
}

impl LiveEvent {
    pub const ALL: [LiveEvent; 20] = [
        LiveEvent::Refreshed,
        LiveEvent::WrongInsertion,
        LiveEvent::VoltageSag,
        LiveEvent::VoltageSwell,
        LiveEvent::CurrentSwell,
        LiveEvent::VoltageZcr,
        LiveEvent::CurrentZcr,
        LiveEvent::VoltagePeriod,
        LiveEvent::VoltageSignalStuck,
        LiveEvent::CurrentSignalStuck,
        LiveEvent::CurrentTamper,
        LiveEvent::SignChangeApparentPower,
        LiveEvent::SignChangeReactivePower,
        LiveEvent::SignChangeFundamentalPower,
        LiveEvent::SignChangeActivePower,
        LiveEvent::OverflowApparentEnergy,
        LiveEvent::OverflowReactiveEnergy,
        LiveEvent::OverflowFundamentalEnergy,
        LiveEvent::OverflowActiveEnergy,
        LiveEvent::CurrentNah
    ];
}

impl Flag for LiveEvent {
    fn mask(self) -> u32 {
        let bit = match self {
            LiveEvent::CurrentZcr => 0,
            LiveEvent::CurrentSignalStuck => 1,
            LiveEvent::CurrentSwell => 2,
            LiveEvent::CurrentNah => 3,
            LiveEvent::CurrentTamper => 4,
            LiveEvent::VoltageZcr => 6,
            LiveEvent::VoltageSignalStuck => 7,
            LiveEvent::VoltageSag => 8,
            LiveEvent::VoltageSwell => 9,
            LiveEvent::VoltagePeriod => 10,
            LiveEvent::SignChangeActivePower => 12,
            LiveEvent::SignChangeFundamentalPower => 13,
            LiveEvent::SignChangeReactivePower => 14,
            LiveEvent::SignChangeApparentPower => 15,
            LiveEvent::OverflowActiveEnergy => 16,
            LiveEvent::OverflowFundamentalEnergy => 17,
            LiveEvent::OverflowReactiveEnergy => 18,
            LiveEvent::OverflowApparentEnergy => 19,
            LiveEvent::WrongInsertion => 22,
            LiveEvent::Refreshed => 24
        };
        1 << bit
    }

    fn all() -> &'static [Self] {
        &LiveEvent::ALL
    }
}

/// Communication health conditions of the device link.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    UartBreak,
    UartCrcError,
    UartTimeout,
    UartFrameError,
    UartNoiseError,
    UartRxOverrun,
    UartTxOverrun,
    SpiRxFull,
    SpiTxEmpty,
    ReadError,
    WriteError,
    SpiCrcError,
    SpiUnderrun,
    SpiOverrun
}

impl LinkStatus {
    pub const ALL: [LinkStatus; 14] = [
        LinkStatus::UartBreak,
        LinkStatus::UartCrcError,
        LinkStatus::UartTimeout,
        LinkStatus::UartFrameError,
        LinkStatus::UartNoiseError,
        LinkStatus::UartRxOverrun,
        LinkStatus::UartTxOverrun,
        LinkStatus::SpiRxFull,
        LinkStatus::SpiTxEmpty,
        LinkStatus::ReadError,
        LinkStatus::WriteError,
        LinkStatus::SpiCrcError,
        LinkStatus::SpiUnderrun,
        LinkStatus::SpiOverrun
    ];
}

impl Flag for LinkStatus {
    fn mask(self) -> u32 {
        let bit = match self {
            LinkStatus::UartCrcError => 16,
            LinkStatus::UartTimeout => 17,
            LinkStatus::UartFrameError => 18,
            LinkStatus::UartNoiseError => 19,
            LinkStatus::UartRxOverrun => 20,
            LinkStatus::UartTxOverrun => 21,
            LinkStatus::SpiRxFull => 22,
            LinkStatus::SpiTxEmpty => 23,
            LinkStatus::ReadError => 24,
            LinkStatus::WriteError => 25,
            LinkStatus::SpiCrcError => 26,
            LinkStatus::SpiUnderrun => 27,
            LinkStatus::SpiOverrun => 28,
            LinkStatus::UartBreak => 29
        };
        1 << bit
    }

    fn all() -> &'static [Self] {
        &LinkStatus::ALL
    }
}

impl From<LinkError> for LinkStatus {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::Break => LinkStatus::UartBreak,
            LinkError::Framing => LinkStatus::UartFrameError,
            LinkError::Noise => LinkStatus::UartNoiseError,
            LinkError::RxOverrun => LinkStatus::UartRxOverrun,
            LinkError::TxOverrun => LinkStatus::UartTxOverrun,
            LinkError::SpiRxFull => LinkStatus::SpiRxFull,
            LinkError::SpiTxEmpty => LinkStatus::SpiTxEmpty,
            LinkError::Read => LinkStatus::ReadError,
            LinkError::Write => LinkStatus::WriteError,
            LinkError::Underrun => LinkStatus::SpiUnderrun,
            LinkError::Overrun => LinkStatus::SpiOverrun,
            LinkError::Timeout => LinkStatus::UartTimeout
        }
    }
}

impl From<FrameError> for LinkStatus {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::CrcError => LinkStatus::UartCrcError,
            FrameError::Truncated | FrameError::MisalignedLength | FrameError::Oversized => LinkStatus::ReadError
        }
    }
}

/// Decoded status words of one device.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Electrical status of internal channels 1 and 2.
    pub status: [FlagSet<Status>; 2],
    /// Live events of internal channels 1 and 2.
    pub events: [FlagSet<LiveEvent>; 2],
    /// Link status, as reported by the chip merged with the faults observed by the host.
    pub link: FlagSet<LinkStatus>
}
