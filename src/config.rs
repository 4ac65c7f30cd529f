//! Typed configuration of a STPM3x chip.
//!
//! The configuration is spread over the rows `DSP_CR1`, `DSP_CR2`, `DSP_CR3`, `DFE_CR1` and
//! `DFE_CR2` of the configuration block. [`ChipConfig`] decodes and encodes the fields handled by
//! the metrology layer; [`ConfigUpdate`] changes only the fields it carries, leaving every other
//! bit of the rows as read from the chip.

use crate::register::{cr3, field, Register, CONFIG_ROWS};

/// Configuration block as read from `DSP_CR1` onwards.
pub type ConfigRows = [u32; CONFIG_ROWS];

const ENVREF: u32 = 1 << 5;
const LPS_LSB: u32 = 28;
const LCS_LSB: u32 = 30;
const ZCR_SEL_LSB: u32 = 14;
const ZCR_EN: u32 = 1 << 16;
const TMP_TOL_LSB: u32 = 17;
const TMP_EN: u32 = 1 << 19;
const LED_OFF1: u32 = 1 << 24;
const GAIN_LSB: u32 = 26;

/// Current channel gain.
#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CurrentGain {
    #[default]
    X2 = 0x00,
    X4 = 0x01,
    X8 = 0x02,
    X16 = 0x03
}

impl From<u32> for CurrentGain {
    fn from(x: u32) -> Self {
        match x & 0x03 {
            0x00 => CurrentGain::X2,
            0x01 => CurrentGain::X4,
            0x02 => CurrentGain::X8,
            _ => CurrentGain::X16
        }
    }
}

/// Voltage reference of a channel.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoltageReference {
    External,
    #[default]
    Internal
}

/// Signal driving the LED output of a channel.
#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedChannel {
    #[default]
    Primary = 0x00,
    Secondary = 0x01,
    Algebraic = 0x02,
    SigmaDelta = 0x03
}

impl From<u32> for LedChannel {
    fn from(x: u32) -> Self {
        match x & 0x03 {
            0x00 => LedChannel::Primary,
            0x01 => LedChannel::Secondary,
            0x02 => LedChannel::Algebraic,
            _ => LedChannel::SigmaDelta
        }
    }
}

/// Power the LED pulses are proportional to.
#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedPower {
    #[default]
    Active = 0x00,
    Fundamental = 0x01,
    Reactive = 0x02,
    ApparentRms = 0x03
}

impl From<u32> for LedPower {
    fn from(x: u32) -> Self {
        match x & 0x03 {
            0x00 => LedPower::Active,
            0x01 => LedPower::Fundamental,
            0x02 => LedPower::Reactive,
            _ => LedPower::ApparentRms
        }
    }
}

/// LED output setup of a channel.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LedConfig {
    pub enabled: bool,
    pub channel: LedChannel,
    pub power: LedPower
}

/// Tolerance of the tamper detection between the two current channels.
#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TamperTolerance {
    /// 12.5 %
    #[default]
    Percent12_5 = 0x00,
    /// 8.33 %
    Percent8_33 = 0x01,
    /// 6.25 %
    Percent6_25 = 0x02,
    /// 3.125 %
    Percent3_125 = 0x03
}

impl From<u32> for TamperTolerance {
    fn from(x: u32) -> Self {
        match x & 0x03 {
            0x00 => TamperTolerance::Percent12_5,
            0x01 => TamperTolerance::Percent8_33,
            0x02 => TamperTolerance::Percent6_25,
            _ => TamperTolerance::Percent3_125
        }
    }
}

/// Tamper detection setup.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tamper {
    #[default]
    Disabled,
    Enabled(TamperTolerance)
}

/// Source of the zero-crossing output.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ZcrSource {
    V1 = 0x00,
    C1 = 0x01,
    V2 = 0x02,
    C2 = 0x03
}

impl From<u32> for ZcrSource {
    fn from(x: u32) -> Self {
        match x & 0x03 {
            0x00 => ZcrSource::V1,
            0x01 => ZcrSource::C1,
            0x02 => ZcrSource::V2,
            _ => ZcrSource::C2
        }
    }
}

/// Clock signal of the clock output.
#[repr(u8)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockOut {
    #[default]
    KHz7 = 0x00,
    MHz4 = 0x01,
    MHz4Duty50 = 0x02,
    MHz16 = 0x03
}

impl From<u32> for ClockOut {
    fn from(x: u32) -> Self {
        match x & 0x03 {
            0x00 => ClockOut::KHz7,
            0x01 => ClockOut::MHz4,
            0x02 => ClockOut::MHz4Duty50,
            _ => ClockOut::MHz16
        }
    }
}

/// Function of the shared ZCR/CLK pin. The select field of `DSP_CR3` picks the zero-crossing
/// source when the pin outputs zero crossings, and the clock otherwise.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinOutput {
    Zcr(ZcrSource),
    Clock(ClockOut)
}

impl Default for PinOutput {
    fn default() -> Self {
        PinOutput::Clock(ClockOut::default())
    }
}

/// Configuration of one internal channel.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelConfig {
    pub gain: CurrentGain,
    pub vref: VoltageReference,
    pub led: LedConfig
}

/// Configuration of a chip.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChipConfig {
    /// Configuration of internal channels 1 and 2.
    pub channels: [ChannelConfig; 2],
    pub tamper: Tamper,
    pub pin_output: PinOutput,
    /// Lets the chip latch its registers by itself.
    pub auto_latch: bool
}

/// Partial configuration change. `None` fields are left as they are on the chip.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigUpdate {
    pub gain: [Option<CurrentGain>; 2],
    pub vref: [Option<VoltageReference>; 2],
    pub led: [Option<LedConfig>; 2],
    pub tamper: Option<Tamper>,
    pub pin_output: Option<PinOutput>,
    pub auto_latch: Option<bool>
}

fn dsp_cr(bank: usize) -> usize {
    match bank {
        0 => Register::DspCr1.row(),
        _ => Register::DspCr2.row()
    }
}

fn dfe_cr(bank: usize) -> usize {
    match bank {
        0 => Register::DfeCr1.row(),
        _ => Register::DfeCr2.row()
    }
}

fn set_field(word: &mut u32, lsb: u32, bits: u32, value: u32) {
    let mask = ((1 << bits) - 1) << lsb;
    *word = (*word & !mask) | ((value << lsb) & mask);
}

fn set_bit(word: &mut u32, bit: u32, value: bool) {
    if value {
        *word |= bit;
    } else {
        *word &= !bit;
    }
}

impl From<&ConfigRows> for ChipConfig {
    fn from(rows: &ConfigRows) -> Self {
        let cr3 = rows[Register::DspCr3.row()];
        let channel = |bank: usize| {
            let dsp = rows[dsp_cr(bank)];
            ChannelConfig {
                gain: CurrentGain::from(field(rows[dfe_cr(bank)], GAIN_LSB, 2)),
                vref: if dsp & ENVREF != 0 { VoltageReference::Internal } else { VoltageReference::External },
                led: LedConfig {
                    enabled: cr3 & (LED_OFF1 << bank) == 0,
                    channel: LedChannel::from(field(dsp, LCS_LSB, 2)),
                    power: LedPower::from(field(dsp, LPS_LSB, 2))
                }
            }
        };
        let select = field(cr3, ZCR_SEL_LSB, 2);
        Self {
            channels: [channel(0), channel(1)],
            tamper: if cr3 & TMP_EN != 0 {
                Tamper::Enabled(TamperTolerance::from(field(cr3, TMP_TOL_LSB, 2)))
            } else {
                Tamper::Disabled
            },
            pin_output: if cr3 & ZCR_EN != 0 {
                PinOutput::Zcr(ZcrSource::from(select))
            } else {
                PinOutput::Clock(ClockOut::from(select))
            },
            auto_latch: cr3 & cr3::SW_AUTO_LATCH != 0
        }
    }
}

impl From<ChipConfig> for ConfigUpdate {
    fn from(x: ChipConfig) -> Self {
        Self {
            gain: x.channels.map(|c| Some(c.gain)),
            vref: x.channels.map(|c| Some(c.vref)),
            led: x.channels.map(|c| Some(c.led)),
            tamper: Some(x.tamper),
            pin_output: Some(x.pin_output),
            auto_latch: Some(x.auto_latch)
        }
    }
}

impl ConfigUpdate {
    /// Returns `true` if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the update to the configuration block. The command bits of `DSP_CR3` (reset and
    /// latch requests) are always cleared so that writing the rows back never triggers them.
    pub fn apply(&self, rows: &mut ConfigRows) {
        for bank in 0..2 {
            if let Some(gain) = self.gain[bank] {
                set_field(&mut rows[dfe_cr(bank)], GAIN_LSB, 2, gain as u32);
            }
            if let Some(vref) = self.vref[bank] {
                set_bit(&mut rows[dsp_cr(bank)], ENVREF, vref == VoltageReference::Internal);
            }
            if let Some(led) = self.led[bank] {
                set_field(&mut rows[dsp_cr(bank)], LCS_LSB, 2, led.channel as u32);
                set_field(&mut rows[dsp_cr(bank)], LPS_LSB, 2, led.power as u32);
                set_bit(&mut rows[Register::DspCr3.row()], LED_OFF1 << bank, !led.enabled);
            }
        }
        let cr3 = &mut rows[Register::DspCr3.row()];
        match self.tamper {
            Some(Tamper::Enabled(tolerance)) => {
                set_bit(cr3, TMP_EN, true);
                set_field(cr3, TMP_TOL_LSB, 2, tolerance as u32);
            }
            Some(Tamper::Disabled) => set_bit(cr3, TMP_EN, false),
            None => {}
        }
        match self.pin_output {
            Some(PinOutput::Zcr(source)) => {
                set_bit(cr3, ZCR_EN, true);
                set_field(cr3, ZCR_SEL_LSB, 2, source as u32);
            }
            Some(PinOutput::Clock(clock)) => {
                set_bit(cr3, ZCR_EN, false);
                set_field(cr3, ZCR_SEL_LSB, 2, clock as u32);
            }
            None => {}
        }
        if let Some(auto_latch) = self.auto_latch {
            set_bit(cr3, cr3::SW_AUTO_LATCH, auto_latch);
        }
        *cr3 &= !(cr3::SW_RESET | cr3::SW_LATCH);
    }
}
