//! # Rust STPM3x Metrology Layer
//!
//! This is a platform-agnostic Rust metrology layer for the STPM32/STPM33/STPM34 energy metering
//! ICs, using the [`embedded-hal`](https://github.com/rust-embedded/embedded-hal) traits.
//!
//! This crate allows you to:
//!
//! - Talk to one or more STPM3x chips, each one on its own UART link, with CRC protected block
//! frames.
//! - Power up the chips and reset their configuration.
//! - Latch the registers of every chip at the same instant (SYN pulse, software command or
//! automatic latching).
//! - Map up to four logical measurement channels to the internal channels of the chips.
//! - Get raw and calibrated measurements: energies, powers, RMS voltage and current, phase, line
//! period and instantaneous samples.
//! - Extend the 32-bit energy counters of the chips past their wraparounds.
//! - Decode the electrical status, live events and link status of every chip.
//!
//! ## The devices
//!
//! The STPM3x are metering ICs with two (STPM33, STPM34) or one (STPM32) pair of voltage and
//! current channels. Their DSP computes, for every channel, active, fundamental, reactive and
//! apparent energies and powers, RMS values, phase and line period. Readings are double-buffered:
//! the live accumulators are copied into the readable registers by a latch, so that every value
//! read afterwards refers to the same instant.
//!
//! ##### Datasheets:
//!
//! - [STPM32/STPM33/STPM34](https://www.st.com/resource/en/datasheet/stpm32.pdf)
//!
//! ## Usage
//!
//! Calibration factors are fixed-point multipliers in millionths of unit per register LSB: a
//! measurement is `raw × factor / 1_000_000`, rounded half to even. A factor of `1_000_000`
//! returns the raw register value.
//!
//! ```ignore
//! use stpm3x_metro::*;
//!
//! // Initialization
//! let devices = [DeviceConfig::chip(DeviceKind::Stpm34), DeviceConfig::chip(DeviceKind::Stpm34)];
//! let ports = [Port::new(uart1, cs1, syn1, en1), Port::new(uart2, cs2, syn2, en2)];
//! let mut metro = Metrology::new(ports, devices, delay);
//! metro.init();
//! metro.power_up_device().unwrap();
//! metro.config_reset(ResetKind::SynPulse).unwrap();
//! metro.map_channel(Channel::Ch1, DeviceId::EXT1, InternalChannel::One).unwrap();
//! metro.set_hardware_factors(Channel::Ch1, Factors { voltage: 1000, ..Default::default() }).unwrap();
//!
//! // Measurement
//! // Latch every chip at once, then read
//! metro.trigger_latch(Scope::All).unwrap();
//! let (voltage, current) = metro.read_rms(Channel::Ch1, Mode::Scaled).unwrap();
//! let energy = metro.read_energy(Channel::Ch1, EnergyKind::Active).unwrap();
//! ```
//!

#![no_std]

pub use config::*;
pub use decode::{Band, EnergyKind, Mode, PowerKind, FACTOR_SCALE};
pub use device::*;
pub use energy::{EnergyAccumulator, EnergyError, EnergyValue};
pub use frame::FrameError;
pub use latch::{LatchController, LatchError, LatchState, LatchType};
pub use link::{BufferState, LinkError, Port, Transport};
pub use metrology::*;
pub use register::Register;
pub use status::*;

pub mod decode;
pub mod energy;
pub mod frame;
pub mod latch;
pub mod link;
pub mod register;
mod chip;
mod config;
mod device;
mod metrology;
mod status;

use link::TransferError;

/// Represents the possible errors.
#[derive(Debug, PartialEq, Eq)]
pub enum Error<P> {
    FrameError(FrameError),
    LinkError(LinkError),
    PinError(P),
    /// A transfer or a latch is already in flight.
    Busy,
    LatchTimeout,
    UnmappedChannel,
    InvalidDevice,
    ChannelConflict,
    RegisterContentMismatch,
    /// An energy extension word is full.
    EnergyOverflow
}

impl<P> Error<P> {
    /// Returns the link status condition matching a frame or link error.
    pub fn fault(&self) -> Option<LinkStatus> {
        match self {
            Error::FrameError(e) => Some(LinkStatus::from(*e)),
            Error::LinkError(e) => Some(LinkStatus::from(*e)),
            _ => None
        }
    }
}

impl<P> From<FrameError> for Error<P> {
    fn from(e: FrameError) -> Self {
        Error::FrameError(e)
    }
}

impl<P> From<LinkError> for Error<P> {
    fn from(e: LinkError) -> Self {
        Error::LinkError(e)
    }
}

impl<P> From<TransferError> for Error<P> {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Frame(e) => Error::FrameError(e),
            TransferError::Link(e) => Error::LinkError(e),
            TransferError::Busy => Error::Busy
        }
    }
}

impl<P> From<RegistryError> for Error<P> {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnmappedChannel => Error::UnmappedChannel,
            RegistryError::InvalidDevice => Error::InvalidDevice,
            RegistryError::ChannelConflict => Error::ChannelConflict
        }
    }
}

impl<P> From<LatchError> for Error<P> {
    fn from(e: LatchError) -> Self {
        match e {
            LatchError::Busy => Error::Busy,
            LatchError::Timeout => Error::LatchTimeout,
            LatchError::InvalidDevice => Error::InvalidDevice
        }
    }
}

impl<P> From<EnergyError> for Error<P> {
    fn from(e: EnergyError) -> Self {
        match e {
            EnergyError::ExtensionOverflow => Error::EnergyOverflow
        }
    }
}
