use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;
use log::{debug, warn};

use crate::frame::{self, Words};
use crate::link::{Link, LinkError, Port, Transport};
use crate::Error;

/// Number of polls of the link before a transfer times out.
pub const LINK_POLL_ATTEMPTS: usize = 100;

/// Interval between two polls of the link, in microseconds.
pub const LINK_POLL_US: u32 = 10;

/// Time the EN pin is held low, then high, during power-up, in microseconds.
pub const POWER_UP_US: u32 = 1000;

/// Width of the SCS pulse closing a configuration reset, in microseconds.
pub const SCS_PULSE_US: u32 = 4;

/// Internal struct representing one STPM3x chip reached through its own link. The metrology layer
/// owns one per external device.
pub(crate) struct Chip<SERIAL, PIN> {
    link: Link<SERIAL, PIN>
}

impl<SERIAL, PIN, P> Chip<SERIAL, PIN>
    where
        SERIAL: Transport,
        PIN: OutputPin<Error = P> {

    pub fn new(port: Port<SERIAL, PIN>) -> Self {
        Self { link: Link::new(port) }
    }

    pub fn link(&self) -> &Link<SERIAL, PIN> {
        &self.link
    }

    /// Powers the chip up in UART mode: SCS is held high while EN is toggled.
    /// # Arguments
    /// * `delay` - The delay source implementing the [`DelayUs`] trait.
    pub fn power_up(&mut self, delay: &mut dyn DelayUs<u32>) -> Result<(), Error<P>> {
        self.link.port.cs.set_high().map_err(Error::PinError)?;
        self.link.port.en.set_low().map_err(Error::PinError)?;
        delay.delay_us(POWER_UP_US);
        self.link.port.en.set_high().map_err(Error::PinError)?;
        delay.delay_us(POWER_UP_US);
        Ok(())
    }

    /// Drives the SYN pin. Pulses are shaped by the caller so that several chips can share them.
    pub fn set_syn(&mut self, low: bool) -> Result<(), Error<P>> {
        if low {
            self.link.port.syn.set_low().map_err(Error::PinError)
        } else {
            self.link.port.syn.set_high().map_err(Error::PinError)
        }
    }

    /// Pulses the SCS pin low.
    pub fn pulse_scs(&mut self, delay: &mut dyn DelayUs<u32>) -> Result<(), Error<P>> {
        self.link.port.cs.set_low().map_err(Error::PinError)?;
        delay.delay_us(SCS_PULSE_US);
        self.link.port.cs.set_high().map_err(Error::PinError)
    }

    /// Reads `count` rows starting at `addr`. On failure the link is left idle.
    /// # Arguments
    /// * `delay` - The delay source implementing the [`DelayUs`] trait.
    /// * `addr` - The offset address of the first row.
    /// * `count` - The number of rows.
    pub fn read_block(&mut self, delay: &mut dyn DelayUs<u32>, addr: u8, count: usize) -> Result<Words, Error<P>> {
        let result = self.try_read_block(delay, addr, count);
        if let Err(e) = &result {
            warn!("read of {} rows at {:#04x} failed: {:?}", count, addr, e.fault());
            self.link.buffer.reset();
        }
        result
    }

    /// Writes `words` to the rows starting at `addr`. On failure the link is left idle.
    /// # Arguments
    /// * `delay` - The delay source implementing the [`DelayUs`] trait.
    /// * `addr` - The offset address of the first row.
    /// * `words` - The row contents.
    pub fn write_block(&mut self, delay: &mut dyn DelayUs<u32>, addr: u8, words: &[u32]) -> Result<(), Error<P>> {
        let result = self.try_write_block(delay, addr, words);
        if let Err(e) = &result {
            warn!("write of {} rows at {:#04x} failed: {:?}", words.len(), addr, e.fault());
            self.link.buffer.reset();
        }
        result
    }

    /// Performs a checked block writing, that means that the written rows are read back to check
    /// that the data has been actually written.
    pub fn write_block_checked(&mut self,
                               delay: &mut dyn DelayUs<u32>,
                               addr: u8,
                               words: &[u32]) -> Result<(), Error<P>> {
        self.write_block(delay, addr, words)?;
        if self.read_block(delay, addr, words.len())?.as_slice() != words {
            return Err(Error::RegisterContentMismatch);
        }
        Ok(())
    }

    /// Abandons the transfer in flight, if any.
    pub fn reset_link(&mut self) {
        if !self.link.buffer.is_idle() {
            debug!("abandoning transfer in flight");
        }
        self.link.buffer.reset();
    }

    fn try_read_block(&mut self, delay: &mut dyn DelayUs<u32>, addr: u8, count: usize) -> Result<Words, Error<P>> {
        let (request, header) = frame::build_read_frame(addr, count)?;
        self.link.buffer.begin_transmit(&header, Some(request))?;
        for _ in 0..LINK_POLL_ATTEMPTS {
            self.link.service()?;
            match self.link.buffer.poll_received() {
                Ok(words) => return Ok(words),
                Err(nb::Error::WouldBlock) => delay.delay_us(LINK_POLL_US),
                Err(nb::Error::Other(e)) => return Err(e.into())
            }
        }
        Err(Error::LinkError(LinkError::Timeout))
    }

    fn try_write_block(&mut self, delay: &mut dyn DelayUs<u32>, addr: u8, words: &[u32]) -> Result<(), Error<P>> {
        let frame = frame::build_write_frame(addr, words)?;
        self.link.buffer.begin_transmit(&frame, None)?;
        for _ in 0..LINK_POLL_ATTEMPTS {
            self.link.service()?;
            if self.link.buffer.is_idle() {
                return Ok(());
            }
            delay.delay_us(LINK_POLL_US);
        }
        Err(Error::LinkError(LinkError::Timeout))
    }
}
