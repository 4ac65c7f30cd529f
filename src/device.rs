//! Device registry and logical channel mapping.

use crate::latch::LatchType;
use crate::register::{row_of, REGISTER_ROWS};
use crate::status::{FlagSet, LinkStatus};

/// Number of logical measurement channels.
pub const CHANNELS: usize = 4;

/// Represents the registry errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// The logical channel is not mapped to any device channel.
    UnmappedChannel,
    /// The device index is out of range, or the device cannot serve the request.
    InvalidDevice,
    /// Another logical channel already maps to the same device channel.
    ChannelConflict
}

/// Typed index of a device slot. Index 0 is the host, indices from 1 are the external chips in
/// chain order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceId(u8);

impl DeviceId {
    /// The host MCU.
    pub const HOST: DeviceId = DeviceId(0);
    /// The first external chip.
    pub const EXT1: DeviceId = DeviceId(1);

    /// Returns the id of the `n`-th external chip, counting from 1.
    pub const fn ext(n: u8) -> Self {
        DeviceId(n)
    }

    /// Returns the raw slot index.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Target of an operation: a single device or channel, or all of them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Scope<T> {
    One(T),
    All
}

/// Represents the device families that can occupy a slot.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceKind {
    /// Empty slot.
    #[default]
    None,
    /// The host MCU itself. It has no metrology registers.
    Host,
    Stpm32,
    Stpm33,
    Stpm34
}

impl DeviceKind {
    /// Returns `true` for the STPM3x chips, i.e. the devices with metrology registers.
    pub fn is_metering(&self) -> bool {
        matches!(self, DeviceKind::Stpm32 | DeviceKind::Stpm33 | DeviceKind::Stpm34)
    }

    /// Returns `true` if the device has the given internal channel. The STPM32 has a single
    /// channel, the STPM33 adds a second current input usable for tamper detection and the STPM34
    /// has two full channels.
    pub fn supports(&self, channel: InternalChannel) -> bool {
        match (self, channel) {
            (_, InternalChannel::None) => false,
            (DeviceKind::None | DeviceKind::Host, _) => false,
            (DeviceKind::Stpm32, InternalChannel::One) => true,
            (DeviceKind::Stpm32, _) => false,
            (DeviceKind::Stpm33, InternalChannel::Two) => false,
            (DeviceKind::Stpm33, _) => true,
            (DeviceKind::Stpm34, _) => true
        }
    }
}

/// Represents a measurement channel inside a device.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InternalChannel {
    #[default]
    None,
    One,
    Two,
    /// Second current input used as neutral for tamper detection. It shares the registers and
    /// calibration of channel 2.
    Tamper
}

impl InternalChannel {
    /// Returns the register bank (0 or 1) holding the data of this channel.
    pub fn bank(&self) -> Option<usize> {
        match self {
            InternalChannel::None => None,
            InternalChannel::One => Some(0),
            InternalChannel::Two | InternalChannel::Tamper => Some(1)
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(InternalChannel::None),
            1 => Some(InternalChannel::One),
            2 => Some(InternalChannel::Two),
            3 => Some(InternalChannel::Tamper),
            _ => None
        }
    }

    fn code(&self) -> u8 {
        match self {
            InternalChannel::None => 0,
            InternalChannel::One => 1,
            InternalChannel::Two => 2,
            InternalChannel::Tamper => 3
        }
    }
}

/// Represents the logical measurement channels exposed to the application.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Ch1,
    Ch2,
    Ch3,
    Ch4
}

impl Channel {
    pub const ALL: [Channel; CHANNELS] = [Channel::Ch1, Channel::Ch2, Channel::Ch3, Channel::Ch4];

    /// Returns the zero based index of the channel.
    pub fn index(&self) -> usize {
        match self {
            Channel::Ch1 => 0,
            Channel::Ch2 => 1,
            Channel::Ch3 => 2,
            Channel::Ch4 => 3
        }
    }

    fn mask(&self) -> u8 {
        1 << self.index()
    }
}

/// Calibration factors of one internal channel. Each factor is a fixed-point multiplier
/// expressed in millionths of engineering unit per register LSB.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Factors {
    pub power: u32,
    pub energy: u32,
    pub voltage: u32,
    pub current: u32
}

/// Static configuration of a device slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    /// Calibration factors of internal channels 1 and 2.
    pub factors: [Factors; 2],
    pub latch: LatchType
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            kind: DeviceKind::None,
            factors: [Factors::default(); 2],
            latch: LatchType::Software
        }
    }
}

impl DeviceConfig {
    /// Returns the configuration of the host slot.
    pub fn host() -> Self {
        Self { kind: DeviceKind::Host, ..Default::default() }
    }

    /// Returns the configuration of an external chip of the given kind, with zero factors and
    /// software latching.
    pub fn chip(kind: DeviceKind) -> Self {
        Self { kind, ..Default::default() }
    }
}

/// Last register image fetched from a device, with the latch epoch it was captured under.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Snapshot {
    rows: [u32; REGISTER_ROWS],
    epoch: Option<u32>
}

impl Default for Snapshot {
    fn default() -> Self {
        Self { rows: [0; REGISTER_ROWS], epoch: None }
    }
}

impl Snapshot {
    /// Returns the cached value of the row at `addr`.
    pub fn word(&self, addr: u8) -> Option<u32> {
        row_of(addr).map(|row| self.rows[row])
    }

    /// Returns the latch epoch of the last stored block, if it was captured after a latch.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// Stores a block read from `addr`, tagging the snapshot with `epoch`.
    pub(crate) fn store(&mut self, addr: u8, words: &[u32], epoch: Option<u32>) {
        if let Some(first) = row_of(addr) {
            for (row, word) in self.rows[first..].iter_mut().zip(words) {
                *row = *word;
            }
            self.epoch = epoch;
        }
    }

    /// Overwrites the cached row at `addr`, keeping the epoch.
    pub(crate) fn set_word(&mut self, addr: u8, word: u32) {
        if let Some(row) = row_of(addr) {
            self.rows[row] = word;
        }
    }
}

/// A device slot of the registry.
#[derive(Debug, Default, Copy, Clone)]
pub struct Device {
    config: DeviceConfig,
    channel_mask: u8,
    snapshot: Snapshot,
    link_faults: FlagSet<LinkStatus>
}

impl Device {
    fn new(config: DeviceConfig) -> Self {
        Self { config, ..Default::default() }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn kind(&self) -> DeviceKind {
        self.config.kind
    }

    pub fn latch_type(&self) -> LatchType {
        self.config.latch
    }

    /// Returns the bitmask of the logical channels served by the device, bit 0 being
    /// [`Channel::Ch1`].
    pub fn channel_mask(&self) -> u8 {
        self.channel_mask
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Returns the link faults observed by the host on the device link since the last
    /// acknowledge.
    pub fn link_faults(&self) -> FlagSet<LinkStatus> {
        self.link_faults
    }

    /// Returns the calibration factors of the given internal channel.
    pub fn factors(&self, channel: InternalChannel) -> Option<&Factors> {
        channel.bank().map(|bank| &self.config.factors[bank])
    }

    pub(crate) fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    pub(crate) fn record_fault(&mut self, fault: LinkStatus) {
        self.link_faults.insert(fault);
    }

    pub(crate) fn clear_faults(&mut self) {
        self.link_faults = FlagSet::empty();
    }
}

/// Mapping of the logical channels to device channels.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelMap {
    slots: [Option<(DeviceId, InternalChannel)>; CHANNELS]
}

impl ChannelMap {
    /// Decodes a packed mapping word. Byte `i` describes logical channel `i + 1`: its low nibble
    /// is the device index and its high nibble the internal channel (0 = none, 1, 2, 3 = tamper).
    /// A byte with internal channel 0 leaves the logical channel unmapped.
    pub fn from_word(word: u32) -> Result<Self, RegistryError> {
        let mut map = Self::default();
        for (i, byte) in word.to_le_bytes().iter().enumerate() {
            let internal = InternalChannel::from_code(byte >> 4).ok_or(RegistryError::InvalidDevice)?;
            if internal != InternalChannel::None {
                map.slots[i] = Some((DeviceId(byte & 0x0F), internal));
            }
        }
        Ok(map)
    }

    /// Encodes the mapping into a packed word, see [`Self::from_word()`].
    pub fn to_word(&self) -> u32 {
        let mut bytes = [0u8; CHANNELS];
        for (byte, slot) in bytes.iter_mut().zip(self.slots.iter()) {
            if let Some((device, internal)) = slot {
                *byte = (internal.code() << 4) | (device.0 & 0x0F);
            }
        }
        u32::from_le_bytes(bytes)
    }

    /// Returns the device channel `channel` maps to, if any.
    pub fn get(&self, channel: Channel) -> Option<(DeviceId, InternalChannel)> {
        self.slots[channel.index()]
    }
}

/// Fixed-capacity registry of the host and of `N` external chips, with the logical channel
/// mapping.
pub struct Registry<const N: usize> {
    host: Device,
    ext: [Device; N],
    map: ChannelMap
}

impl<const N: usize> Registry<N> {
    /// Creates a registry from the static configuration table of the external chips. No logical
    /// channel is mapped.
    pub fn new(ext: [DeviceConfig; N]) -> Self {
        Self {
            host: Device::new(DeviceConfig::host()),
            ext: ext.map(Device::new),
            map: ChannelMap::default()
        }
    }

    /// Returns the ids of the external chips.
    pub fn ext_ids(&self) -> impl Iterator<Item = DeviceId> {
        (1..=N as u8).map(DeviceId)
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device, RegistryError> {
        match id.0 as usize {
            0 => Ok(&self.host),
            i if i <= N => Ok(&self.ext[i - 1]),
            _ => Err(RegistryError::InvalidDevice)
        }
    }

    pub(crate) fn device_mut(&mut self, id: DeviceId) -> Result<&mut Device, RegistryError> {
        match id.0 as usize {
            0 => Ok(&mut self.host),
            i if i <= N => Ok(&mut self.ext[i - 1]),
            _ => Err(RegistryError::InvalidDevice)
        }
    }

    /// Returns the device `id` if it is an external metering chip.
    pub fn chip(&self, id: DeviceId) -> Result<&Device, RegistryError> {
        let device = self.device(id)?;
        if id == DeviceId::HOST || !device.kind().is_metering() {
            return Err(RegistryError::InvalidDevice);
        }
        Ok(device)
    }

    /// Installs or updates the configuration of a device slot. Logical channels mapped to an
    /// internal channel the new kind does not have are unmapped.
    pub fn configure(&mut self, id: DeviceId, config: DeviceConfig) -> Result<(), RegistryError> {
        if id == DeviceId::HOST && config.kind != DeviceKind::Host {
            return Err(RegistryError::InvalidDevice);
        }
        self.device_mut(id)?.config = config;
        for channel in Channel::ALL {
            if let Some((device, internal)) = self.map.get(channel) {
                if device == id && !config.kind.supports(internal) {
                    self.unmap(channel);
                }
            }
        }
        Ok(())
    }

    /// Sets the latch type of a chip.
    pub fn set_latch_type(&mut self, id: DeviceId, latch: LatchType) -> Result<(), RegistryError> {
        self.chip(id)?;
        self.device_mut(id)?.config.latch = latch;
        Ok(())
    }

    /// Maps `channel` to the internal channel of the device `id`, replacing any previous mapping
    /// of `channel`.
    pub fn map(&mut self, channel: Channel, id: DeviceId, internal: InternalChannel) -> Result<(), RegistryError> {
        if !self.chip(id)?.kind().supports(internal) {
            return Err(RegistryError::InvalidDevice);
        }
        let conflict = Channel::ALL.iter()
            .filter(|other| **other != channel)
            .any(|other| self.map.get(*other) == Some((id, internal)));
        if conflict {
            return Err(RegistryError::ChannelConflict);
        }
        self.unmap(channel);
        self.map.slots[channel.index()] = Some((id, internal));
        self.device_mut(id)?.channel_mask |= channel.mask();
        Ok(())
    }

    /// Removes the mapping of `channel`.
    pub fn unmap(&mut self, channel: Channel) {
        if let Some((id, _)) = self.map.slots[channel.index()].take() {
            if let Ok(device) = self.device_mut(id) {
                device.channel_mask &= !channel.mask();
            }
        }
    }

    /// Replaces the whole channel mapping. The new mapping is validated before anything changes.
    pub fn set_map(&mut self, map: ChannelMap) -> Result<(), RegistryError> {
        let previous = self.map;
        for channel in Channel::ALL {
            self.unmap(channel);
        }
        for channel in Channel::ALL {
            if let Some((id, internal)) = map.get(channel) {
                if let Err(e) = self.map(channel, id, internal) {
                    self.restore(previous);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn restore(&mut self, map: ChannelMap) {
        for channel in Channel::ALL {
            self.unmap(channel);
        }
        for channel in Channel::ALL {
            if let Some((id, internal)) = map.get(channel) {
                // The previous mapping was valid when installed.
                let _ = self.map(channel, id, internal);
            }
        }
    }

    pub fn channel_map(&self) -> &ChannelMap {
        &self.map
    }

    /// Resolves a logical channel to its device and internal channel.
    pub fn resolve(&self, channel: Channel) -> Result<(DeviceId, InternalChannel), RegistryError> {
        self.map.get(channel).ok_or(RegistryError::UnmappedChannel)
    }

    /// Updates the calibration factors of the device channel `channel` resolves to.
    pub fn set_factors(&mut self, channel: Channel, factors: Factors) -> Result<(), RegistryError> {
        let (id, internal) = self.resolve(channel)?;
        let bank = internal.bank().ok_or(RegistryError::UnmappedChannel)?;
        self.device_mut(id)?.config.factors[bank] = factors;
        Ok(())
    }
}
