use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::digital::v2::OutputPin;
use heapless::Vec;
use log::{debug, warn};

use crate::chip::Chip;
use crate::config::{ChipConfig, ConfigRows, ConfigUpdate};
use crate::decode::{self, Band, EnergyKind, Mode, PowerKind};
use crate::device::{Channel, ChannelMap, DeviceConfig, DeviceId, Factors, InternalChannel, Registry, RegistryError, Scope};
use crate::energy::EnergyAccumulator;
use crate::frame::{FrameError, Words};
use crate::latch::{LatchController, LatchError, LatchType, LATCH_POLL_ATTEMPTS, LATCH_POLL_US, SYN_PULSE_US};
use crate::link::{BufferState, Port, Transport};
use crate::register::{cr3, Register, CONFIG_ROWS, DATA_ROWS, STATUS_ROWS};
use crate::status::{DeviceStatus, Flag, FlagSet, LinkStatus, LiveEvent, Query, Status};
use crate::Error;

/// Number of SYN pulses of a hardware configuration reset.
pub const RESET_SYN_PULSES: usize = 3;

/// Bits of `US_REG3` holding the link status. The lower half holds the interrupt masks.
const LINK_STATUS_MASK: u32 = 0xFFFF_0000;

/// Ids of the devices matching a query.
pub type DeviceSet<const N: usize> = Vec<DeviceId, N>;

/// Represents the ways of resetting the chip configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetKind {
    /// Three SYN pulses followed by a SCS pulse.
    SynPulse,
    /// The reset bit of `DSP_CR3`.
    Software
}

/// Represents the metrology layer of a host and of `N` external STPM3x chips, each one reached
/// through its own serial link.
pub struct Metrology<SERIAL, PIN, DELAY, const N: usize> {
    chips: [Chip<SERIAL, PIN>; N],
    delay: DELAY,
    registry: Registry<N>,
    latch: LatchController<N>,
    energy: EnergyAccumulator
}

impl<SERIAL, PIN, DELAY, P, const N: usize> Metrology<SERIAL, PIN, DELAY, N>
    where
        SERIAL: Transport,
        PIN: OutputPin<Error = P>,
        DELAY: DelayUs<u32> {

    /// Creates a new [`Metrology`] instance, given the ports of the external chips and their
    /// static configuration. No logical channel is mapped. The newly created instance must be
    /// initialized using [`Self::init()`].
    /// # Arguments
    /// * `ports` - The [`Port`] of each external chip, in chain order.
    /// * `devices` - The [`DeviceConfig`] of each external chip, in chain order.
    /// * `delay` - The delay source implementing the [`DelayUs`] trait.
    pub fn new(ports: [Port<SERIAL, PIN>; N], devices: [DeviceConfig; N], delay: DELAY) -> Self {
        Self {
            chips: ports.map(Chip::new),
            delay,
            registry: Registry::new(devices),
            latch: LatchController::new(),
            energy: EnergyAccumulator::new()
        }
    }

    /// Brings the metrology layer to its initial state: idle links, no outstanding latch, cleared
    /// energies and link faults. The registry configuration and the channel mapping are kept.
    pub fn init(&mut self) {
        for chip in self.chips.iter_mut() {
            chip.reset_link();
        }
        self.latch.reset();
        self.energy.reset(Scope::All);
        for id in self.registry.ext_ids() {
            if let Ok(device) = self.registry.device_mut(id) {
                device.clear_faults();
            }
        }
    }

    /// Powers up every external chip in UART mode.
    pub fn power_up_device(&mut self) -> Result<(), Error<P>> {
        for index in self.metering_indices() {
            self.chips[index].power_up(&mut self.delay)?;
        }
        debug!("chips powered up");
        Ok(())
    }

    /// Resets the configuration of every external chip to its default values.
    /// # Arguments
    /// * `kind` - The reset procedure as a [`ResetKind`].
    pub fn config_reset(&mut self, kind: ResetKind) -> Result<(), Error<P>> {
        let indices = self.metering_indices();
        match kind {
            ResetKind::SynPulse => {
                for _ in 0..RESET_SYN_PULSES {
                    self.pulse_syn(&indices)?;
                }
                for index in indices.iter() {
                    self.chips[*index].pulse_scs(&mut self.delay)?;
                }
            }
            ResetKind::Software => {
                for index in indices.iter() {
                    let id = DeviceId::ext(*index as u8 + 1);
                    let word = self.read_word(id, Register::DspCr3.addr())?;
                    let word = (word & !cr3::SW_LATCH) | cr3::SW_RESET;
                    self.write_words(id, Register::DspCr3.addr(), &[word])?;
                }
            }
        }
        for index in indices.iter() {
            self.latch.release(DeviceId::ext(*index as u8 + 1))?;
        }
        // The energy counters of the chips restart from zero.
        for channel in Channel::ALL {
            if let Ok((id, _)) = self.registry.resolve(channel) {
                if indices.iter().any(|index| index + 1 == id.index()) {
                    self.energy.reset(Scope::One(channel));
                }
            }
        }
        debug!("configuration reset ({:?})", kind);
        Ok(())
    }

    /// Updates the calibration factors of the device channel `channel` maps to.
    pub fn set_hardware_factors(&mut self, channel: Channel, factors: Factors) -> Result<(), Error<P>> {
        Ok(self.registry.set_factors(channel, factors)?)
    }

    /// Writes the whole configuration of a chip. The written rows are read back and compared.
    pub fn setup(&mut self, id: DeviceId, config: &ChipConfig) -> Result<(), Error<P>> {
        self.apply_config(id, &ConfigUpdate::from(*config))
    }

    /// Reads the configuration of a chip.
    pub fn get_setup(&mut self, id: DeviceId) -> Result<ChipConfig, Error<P>> {
        Ok(ChipConfig::from(&self.read_config(id)?))
    }

    /// Applies a partial configuration change to a chip, leaving the fields it does not carry as
    /// they are on the chip.
    pub fn apply_config(&mut self, id: DeviceId, update: &ConfigUpdate) -> Result<(), Error<P>> {
        self.registry.chip(id)?;
        if update.is_empty() {
            return Ok(());
        }
        let mut rows = self.read_config(id)?;
        update.apply(&mut rows);
        self.io(id, |chip, delay| chip.write_block_checked(delay, Register::DspCr1.addr(), &rows))
    }

    /// Maps the logical channels from a packed mapping word (see [`ChannelMap::from_word()`]).
    pub fn setup_channels(&mut self, word: u32) -> Result<(), Error<P>> {
        let map = ChannelMap::from_word(word)?;
        self.remap(|registry| registry.set_map(map))
    }

    /// Maps `channel` to the internal channel of the chip `id`.
    pub fn map_channel(&mut self, channel: Channel, id: DeviceId, internal: InternalChannel) -> Result<(), Error<P>> {
        self.remap(|registry| registry.map(channel, id, internal))
    }

    pub fn unmap_channel(&mut self, channel: Channel) {
        // Unmapping cannot fail.
        let _ = self.remap(|registry| {
            registry.unmap(channel);
            Ok(())
        });
    }

    /// Installs or updates the configuration of a device slot, see [`Registry::configure()`].
    pub fn configure_device(&mut self, id: DeviceId, config: DeviceConfig) -> Result<(), Error<P>> {
        self.remap(|registry| registry.configure(id, config))
    }

    /// Returns the packed mapping word of the logical channels.
    pub fn channels_word(&self) -> u32 {
        self.registry.channel_map().to_word()
    }

    /// Fetches every data row of a chip, from `DSP_SR1` to `TOT_REG4`, into its snapshot.
    pub fn get_data_device(&mut self, id: DeviceId) -> Result<(), Error<P>> {
        let epoch = self.latch.readable(id)?;
        let words = self.io(id, |chip, delay| chip.read_block(delay, Register::DspSr1.addr(), DATA_ROWS))?;
        self.commit(id, Register::DspSr1.addr(), &words, epoch)
    }

    /// Sets the latch type of a chip and programs its auto-latch bit accordingly.
    pub fn set_latch_device_type(&mut self, id: DeviceId, latch: LatchType) -> Result<(), Error<P>> {
        self.registry.set_latch_type(id, latch)?;
        let update = ConfigUpdate { auto_latch: Some(latch == LatchType::Auto), ..Default::default() };
        self.apply_config(id, &update)
    }

    /// Records the latch type of a chip without touching the chip.
    pub fn register_latch_device_config_type(&mut self, id: DeviceId, latch: LatchType) -> Result<(), Error<P>> {
        Ok(self.registry.set_latch_type(id, latch)?)
    }

    /// Latches one chip, or every chip at the same instant, and returns the epoch of the latch.
    /// Chips using SYN pulses share a single pulse. If any chip fails, every chip of the latch
    /// reverts to `Idle` and keeps the epoch of its previous latch.
    pub fn trigger_latch(&mut self, scope: Scope<DeviceId>) -> Result<u32, Error<P>> {
        let ids = self.latch_targets(scope)?;
        let epoch = self.latch.begin(&ids)?;
        match self.latch_chips(&ids) {
            Ok(()) => {
                self.latch.confirm(&ids, epoch)?;
                debug!("{} chips latched, epoch {}", ids.len(), epoch);
                Ok(epoch)
            }
            Err(e) => {
                warn!("latch of epoch {} failed", epoch);
                self.latch.abort(&ids);
                Err(e)
            }
        }
    }

    /// Reads an energy counter, extends it past its wraparounds and returns the combined value
    /// scaled by the energy factor.
    pub fn read_energy(&mut self, channel: Channel, kind: EnergyKind) -> Result<i64, Error<P>> {
        let (id, bank) = self.resolve(channel)?;
        let addr = decode::energy_addr(bank, kind);
        let (word, epoch) = self.read_measurement(id, addr)?;
        let combined = self.energy.accumulate_signed(channel, kind, decode::decode_energy(word))?;
        self.commit(id, addr, &[word], epoch)?;
        let factor = self.factors(id, bank)?.energy;
        Ok(decode::scale(combined, factor))
    }

    /// Reads a power, scaled by the power factor.
    pub fn read_power(&mut self, channel: Channel, kind: PowerKind) -> Result<i32, Error<P>> {
        let (id, bank) = self.resolve(channel)?;
        let word = self.read_row(id, decode::power_addr(bank, kind))?;
        let factor = self.factors(id, bank)?.power;
        Ok(decode::scale_i32(decode::decode_power(word) as i64, factor))
    }

    /// Reads the RMS voltage and current. In [`Mode::Scaled`] they are scaled by the voltage and
    /// current factors.
    pub fn read_rms(&mut self, channel: Channel, mode: Mode) -> Result<(i32, i32), Error<P>> {
        let (id, bank) = self.resolve(channel)?;
        let (voltage, current) = decode::decode_rms(self.read_row(id, decode::rms_addr(bank))?);
        match mode {
            Mode::Raw => Ok((voltage as i32, current as i32)),
            Mode::Scaled => {
                let factors = self.factors(id, bank)?;
                Ok((decode::scale_i32(voltage as i64, factors.voltage), decode::scale_i32(current as i64, factors.current)))
            }
        }
    }

    /// Reads the phase, as found in the register.
    pub fn read_phi(&mut self, channel: Channel) -> Result<i32, Error<P>> {
        let (id, bank) = self.resolve(channel)?;
        Ok(decode::decode_phase(self.read_row(id, decode::phase_addr(bank))?))
    }

    /// Reads the line period, in units of [`decode::PERIOD_LSB_US`] microseconds.
    pub fn read_period(&mut self, channel: Channel) -> Result<u16, Error<P>> {
        let (id, bank) = self.resolve(channel)?;
        Ok(decode::decode_period(self.read_row(id, decode::period_addr())?, bank))
    }

    /// Reads the instantaneous voltage and current samples. In [`Mode::Scaled`] they are scaled by
    /// the voltage and current factors.
    pub fn read_instantaneous(&mut self, channel: Channel, band: Band, mode: Mode) -> Result<(i32, i32), Error<P>> {
        let (id, bank) = self.resolve(channel)?;
        // The current row follows the voltage row.
        let (addr, _) = decode::instantaneous_addr(bank, band);
        let epoch = self.latch.readable(id)?;
        let words = self.io(id, |chip, delay| chip.read_block(delay, addr, 2))?;
        self.commit(id, addr, &words, epoch)?;
        let (voltage, current) = match words.as_slice() {
            [voltage, current] => (decode::decode_sample(*voltage), decode::decode_sample(*current)),
            _ => return Err(Error::FrameError(FrameError::Truncated))
        };
        match mode {
            Mode::Raw => Ok((voltage, current)),
            Mode::Scaled => {
                let factors = self.factors(id, bank)?;
                Ok((decode::scale_i32(voltage as i64, factors.voltage), decode::scale_i32(current as i64, factors.current)))
            }
        }
    }

    /// Reads `buf.len()` rows of a chip starting at `addr` into `buf`.
    pub fn read_block_from_device(&mut self, id: DeviceId, addr: u8, buf: &mut [u32]) -> Result<(), Error<P>> {
        let epoch = self.latch.readable(id)?;
        let count = buf.len();
        let words = self.io(id, |chip, delay| chip.read_block(delay, addr, count))?;
        self.commit(id, addr, &words, epoch)?;
        for (dst, src) in buf.iter_mut().zip(words.iter()) {
            *dst = *src;
        }
        Ok(())
    }

    /// Writes `words` to the rows of a chip starting at `addr`.
    pub fn write_block_to_device(&mut self, id: DeviceId, addr: u8, words: &[u32]) -> Result<(), Error<P>> {
        self.latch.readable(id)?;
        self.write_words(id, addr, words)
    }

    /// Fetches the status, live event and link status rows of a chip and returns them decoded.
    pub fn refresh_status(&mut self, id: DeviceId) -> Result<DeviceStatus, Error<P>> {
        let epoch = self.latch.readable(id)?;
        let words = self.io(id, |chip, delay| chip.read_block(delay, Register::DspSr1.addr(), STATUS_ROWS))?;
        self.commit(id, Register::DspSr1.addr(), &words, epoch)?;
        self.device_status(id)
    }

    /// Returns the last fetched status of a chip. The link status also holds the faults observed
    /// by the host on the link.
    pub fn device_status(&self, id: DeviceId) -> Result<DeviceStatus, Error<P>> {
        let device = self.registry.chip(id)?;
        let word = |reg: Register| device.snapshot().word(reg.addr()).unwrap_or(0);
        Ok(DeviceStatus {
            status: [FlagSet::from_word(word(Register::DspSr1)), FlagSet::from_word(word(Register::DspSr2))],
            events: [FlagSet::from_word(word(Register::DspEv1)), FlagSet::from_word(word(Register::DspEv2))],
            link: FlagSet::from_word(word(Register::UsReg3)).union(device.link_faults())
        })
    }

    /// Returns the electrical status conditions of an internal channel of a chip selected by
    /// `query`.
    pub fn query_status(&self, id: DeviceId, internal: InternalChannel, query: Query<Status>) -> Result<FlagSet<Status>, Error<P>> {
        let bank = internal.bank().ok_or(Error::UnmappedChannel)?;
        Ok(self.device_status(id)?.status[bank].select(query))
    }

    /// Returns the live events of an internal channel of a chip selected by `query`.
    pub fn query_live_event(&self, id: DeviceId, internal: InternalChannel, query: Query<LiveEvent>) -> Result<FlagSet<LiveEvent>, Error<P>> {
        let bank = internal.bank().ok_or(Error::UnmappedChannel)?;
        Ok(self.device_status(id)?.events[bank].select(query))
    }

    /// Returns the link status conditions of a chip selected by `query`.
    pub fn query_link_status(&self, id: DeviceId, query: Query<LinkStatus>) -> Result<FlagSet<LinkStatus>, Error<P>> {
        Ok(self.device_status(id)?.link.select(query))
    }

    /// Returns the chips whose internal channel exhibits one of the status conditions selected by
    /// `query`.
    pub fn devices_with_status(&self, internal: InternalChannel, query: Query<Status>) -> DeviceSet<N> {
        self.devices_where(|m, id| m.query_status(id, internal, query))
    }

    /// Returns the chips whose internal channel exhibits one of the live events selected by
    /// `query`.
    pub fn devices_with_live_event(&self, internal: InternalChannel, query: Query<LiveEvent>) -> DeviceSet<N> {
        self.devices_where(|m, id| m.query_live_event(id, internal, query))
    }

    /// Returns the chips exhibiting one of the link status conditions selected by `query`.
    pub fn devices_with_link_status(&self, query: Query<LinkStatus>) -> DeviceSet<N> {
        self.devices_where(|m, id| m.query_link_status(id, query))
    }

    /// Clears on the chip the electrical status conditions of the last fetched status of an
    /// internal channel. Conditions raised since then stay pending.
    pub fn acknowledge_status(&mut self, id: DeviceId, internal: InternalChannel) -> Result<(), Error<P>> {
        let addr = match internal.bank().ok_or(Error::UnmappedChannel)? {
            0 => Register::DspSr1.addr(),
            _ => Register::DspSr2.addr()
        };
        let pending = self.registry.chip(id)?.snapshot().word(addr).unwrap_or(0);
        if pending == 0 {
            return Ok(());
        }
        self.latch.readable(id)?;
        self.write_words(id, addr, &[pending])?;
        self.registry.device_mut(id)?.snapshot_mut().set_word(addr, 0);
        Ok(())
    }

    /// Clears the link status of a chip, both on the chip and the faults observed by the host.
    pub fn acknowledge_link_status(&mut self, id: DeviceId) -> Result<(), Error<P>> {
        let addr = Register::UsReg3.addr();
        let word = self.registry.chip(id)?.snapshot().word(addr).unwrap_or(0);
        if word & LINK_STATUS_MASK != 0 {
            self.latch.readable(id)?;
            self.write_words(id, addr, &[word])?;
        }
        let device = self.registry.device_mut(id)?;
        device.snapshot_mut().set_word(addr, word & !LINK_STATUS_MASK);
        device.clear_faults();
        Ok(())
    }

    /// Abandons the transfer and the latch in flight on the link of a chip. The registry and the
    /// energies are left untouched.
    pub fn reset_link(&mut self, id: DeviceId) -> Result<(), Error<P>> {
        let index = self.chip_index(id)?;
        self.chips[index].reset_link();
        self.latch.abort(&[id]);
        Ok(())
    }

    /// Clears the extended energies of one logical channel, or of all of them.
    pub fn reset_energy(&mut self, scope: Scope<Channel>) {
        self.energy.reset(scope);
    }

    /// Returns the transmit and receive states of the link of a chip.
    pub fn link_state(&self, id: DeviceId) -> Result<(BufferState, BufferState), Error<P>> {
        let buffer = &self.chips[self.chip_index(id)?].link().buffer;
        Ok((buffer.tx_state(), buffer.rx_state()))
    }

    pub fn registry(&self) -> &Registry<N> {
        &self.registry
    }

    pub fn latch(&self) -> &LatchController<N> {
        &self.latch
    }

    pub fn energy(&self) -> &EnergyAccumulator {
        &self.energy
    }

    /// Runs a change of the registry, then clears the energies of the logical channels that no
    /// longer resolve to the same device channel.
    fn remap<F>(&mut self, f: F) -> Result<(), Error<P>>
        where
            F: FnOnce(&mut Registry<N>) -> Result<(), RegistryError> {
        let previous = *self.registry.channel_map();
        let result = f(&mut self.registry);
        for channel in Channel::ALL {
            if self.registry.channel_map().get(channel) != previous.get(channel) {
                self.energy.reset(Scope::One(channel));
            }
        }
        Ok(result?)
    }

    fn chip_index(&self, id: DeviceId) -> Result<usize, Error<P>> {
        self.registry.chip(id)?;
        Ok(id.index() - 1)
    }

    fn metering_indices(&self) -> Vec<usize, N> {
        let mut indices = Vec::new();
        for id in self.registry.ext_ids() {
            if self.registry.chip(id).is_ok() {
                // At most N external chips.
                let _ = indices.push(id.index() - 1);
            }
        }
        indices
    }

    fn resolve(&self, channel: Channel) -> Result<(DeviceId, usize), Error<P>> {
        let (id, internal) = self.registry.resolve(channel)?;
        let bank = internal.bank().ok_or(Error::UnmappedChannel)?;
        Ok((id, bank))
    }

    fn factors(&self, id: DeviceId, bank: usize) -> Result<Factors, Error<P>> {
        Ok(self.registry.chip(id)?.config().factors[bank])
    }

    /// Runs a transfer on the link of a chip, recording link and frame faults in the registry.
    fn io<T, F>(&mut self, id: DeviceId, f: F) -> Result<T, Error<P>>
        where
            F: FnOnce(&mut Chip<SERIAL, PIN>, &mut dyn DelayUs<u32>) -> Result<T, Error<P>> {
        let index = self.chip_index(id)?;
        let delay: &mut dyn DelayUs<u32> = &mut self.delay;
        let result = f(&mut self.chips[index], delay);
        if let Err(e) = &result {
            if let Some(fault) = e.fault() {
                self.registry.device_mut(id)?.record_fault(fault);
            }
        }
        result
    }

    fn read_word(&mut self, id: DeviceId, addr: u8) -> Result<u32, Error<P>> {
        let words = self.io(id, |chip, delay| chip.read_block(delay, addr, 1))?;
        first(&words)
    }

    fn write_words(&mut self, id: DeviceId, addr: u8, words: &[u32]) -> Result<(), Error<P>> {
        self.io(id, |chip, delay| chip.write_block(delay, addr, words))
    }

    fn read_config(&mut self, id: DeviceId) -> Result<ConfigRows, Error<P>> {
        let words = self.io(id, |chip, delay| chip.read_block(delay, Register::DspCr1.addr(), CONFIG_ROWS))?;
        let mut rows = [0; CONFIG_ROWS];
        for (row, word) in rows.iter_mut().zip(words.iter()) {
            *row = *word;
        }
        Ok(rows)
    }

    /// Reads a measurement row of a chip that can be read under its current latch state, without
    /// touching the snapshot.
    fn read_measurement(&mut self, id: DeviceId, addr: u8) -> Result<(u32, Option<u32>), Error<P>> {
        let epoch = self.latch.readable(id)?;
        Ok((self.read_word(id, addr)?, epoch))
    }

    /// Reads a measurement row of a chip and stores it in the snapshot.
    fn read_row(&mut self, id: DeviceId, addr: u8) -> Result<u32, Error<P>> {
        let (word, epoch) = self.read_measurement(id, addr)?;
        self.commit(id, addr, &[word], epoch)?;
        Ok(word)
    }

    fn commit(&mut self, id: DeviceId, addr: u8, words: &[u32], epoch: Option<u32>) -> Result<(), Error<P>> {
        self.registry.device_mut(id)?.snapshot_mut().store(addr, words, epoch);
        Ok(())
    }

    fn devices_where<T, F>(&self, f: F) -> DeviceSet<N>
        where
            T: Flag,
            F: Fn(&Self, DeviceId) -> Result<FlagSet<T>, Error<P>> {
        let mut ids = DeviceSet::new();
        for id in self.registry.ext_ids() {
            if let Ok(flags) = f(self, id) {
                if !flags.is_empty() {
                    // At most N external chips.
                    let _ = ids.push(id);
                }
            }
        }
        ids
    }

    fn latch_targets(&self, scope: Scope<DeviceId>) -> Result<Vec<DeviceId, N>, Error<P>> {
        let mut ids = Vec::new();
        match scope {
            Scope::One(id) => {
                self.registry.chip(id)?;
                ids.push(id).map_err(|_| Error::InvalidDevice)?;
            }
            Scope::All => {
                for index in self.metering_indices() {
                    ids.push(DeviceId::ext(index as u8 + 1)).map_err(|_| Error::InvalidDevice)?;
                }
            }
        }
        Ok(ids)
    }

    fn latch_chips(&mut self, ids: &[DeviceId]) -> Result<(), Error<P>> {
        let mut syn: Vec<usize, N> = Vec::new();
        let mut software: Vec<DeviceId, N> = Vec::new();
        for id in ids {
            match self.registry.chip(*id)?.latch_type() {
                LatchType::SynPulse => syn.push(self.chip_index(*id)?).map_err(|_| Error::InvalidDevice)?,
                LatchType::Software => software.push(*id).map_err(|_| Error::InvalidDevice)?,
                LatchType::Auto => {}
            }
        }
        if !syn.is_empty() {
            self.pulse_syn(&syn)?;
        }
        for id in software.iter() {
            let word = self.read_word(*id, Register::DspCr3.addr())?;
            let word = (word & !cr3::SW_RESET) | cr3::SW_LATCH;
            self.write_words(*id, Register::DspCr3.addr(), &[word])?;
        }
        for id in software.iter() {
            self.wait_latch(*id)?;
        }
        Ok(())
    }

    /// Polls `DSP_CR3` until the chip clears its latch bits.
    fn wait_latch(&mut self, id: DeviceId) -> Result<(), Error<P>> {
        for _ in 0..LATCH_POLL_ATTEMPTS {
            if self.read_word(id, Register::DspCr3.addr())? & cr3::SW_LATCH == 0 {
                return Ok(());
            }
            self.delay.delay_us(LATCH_POLL_US);
        }
        warn!("chip {} did not acknowledge the latch", id.index());
        Err(LatchError::Timeout.into())
    }

    /// Pulses the SYN pins of the given chips low, all at once.
    fn pulse_syn(&mut self, indices: &[usize]) -> Result<(), Error<P>> {
        for index in indices {
            self.chips[*index].set_syn(true)?;
        }
        self.delay.delay_us(SYN_PULSE_US);
        for index in indices {
            self.chips[*index].set_syn(false)?;
        }
        self.delay.delay_us(SYN_PULSE_US);
        Ok(())
    }
}

fn first<P>(words: &Words) -> Result<u32, Error<P>> {
    words.first().copied().ok_or(Error::FrameError(FrameError::Truncated))
}
