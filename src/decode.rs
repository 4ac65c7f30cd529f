//! Register field decoding and fixed-point scaling.
//!
//! Every measurement lives in its own register row. The functions of this module locate the row
//! of a measurement for a register bank (0 for internal channel 1, 1 for internal channel 2 and
//! tamper) and extract the raw field from the row word. Scaling multiplies a raw value by a
//! calibration factor expressed in millionths and rounds half to even.

use crate::register::{field, sign_extend, Register};

/// Denominator of the calibration factors: a factor of `FACTOR_SCALE` leaves raw values as is.
pub const FACTOR_SCALE: u32 = 1_000_000;

/// Duration of one LSB of the period fields, in microseconds.
pub const PERIOD_LSB_US: u32 = 8;

/// Represents the energy accumulators of a phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnergyKind {
    Active,
    FundamentalActive,
    Reactive,
    Apparent
}

impl EnergyKind {
    pub const ALL: [EnergyKind; 4] = [
        EnergyKind::Active,
        EnergyKind::FundamentalActive,
        EnergyKind::Reactive,
        EnergyKind::Apparent
    ];

    pub(crate) fn index(&self) -> usize {
        match self {
            EnergyKind::Active => 0,
            EnergyKind::FundamentalActive => 1,
            EnergyKind::Reactive => 2,
            EnergyKind::Apparent => 3
        }
    }
}

/// Represents the power measurements of a phase. Each one is computed by the chip and stored in
/// its own row.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerKind {
    Active,
    FundamentalActive,
    Reactive,
    ApparentRms,
    ApparentVector,
    MomentaryActive,
    MomentaryFundamental
}

impl PowerKind {
    pub const ALL: [PowerKind; 7] = [
        PowerKind::Active,
        PowerKind::FundamentalActive,
        PowerKind::Reactive,
        PowerKind::ApparentRms,
        PowerKind::ApparentVector,
        PowerKind::MomentaryActive,
        PowerKind::MomentaryFundamental
    ];
}

/// Selects between the wideband and the fundamental instantaneous samples.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Band {
    Wide,
    Fundamental
}

/// Selects whether a measurement is returned as read or scaled by its calibration factor.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Raw,
    #[default]
    Scaled
}

/// Returns `round_half_even(raw × factor / FACTOR_SCALE)`, saturated to the `i64` range.
pub fn scale(raw: i64, factor: u32) -> i64 {
    let scale = FACTOR_SCALE as i128;
    let product = raw as i128 * factor as i128;
    let mut quotient = product / scale;
    let remainder = product % scale;
    let twice = 2 * remainder.abs();
    if twice > scale || (twice == scale && quotient % 2 != 0) {
        quotient += product.signum();
    }
    quotient.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Same as [`scale()`], saturated to the `i32` range.
pub fn scale_i32(raw: i64, factor: u32) -> i32 {
    scale(raw, factor).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

fn phase_base(bank: usize) -> u8 {
    match bank {
        0 => Register::Ph1Reg1.addr(),
        _ => Register::Ph2Reg1.addr()
    }
}

/// Returns the row holding the energy accumulator of `kind`.
pub fn energy_addr(bank: usize, kind: EnergyKind) -> u8 {
    phase_base(bank) + 2 * kind.index() as u8
}

/// Returns the row holding the power of `kind`.
pub fn power_addr(bank: usize, kind: PowerKind) -> u8 {
    let offset = match kind {
        PowerKind::Active => 4,
        PowerKind::FundamentalActive => 5,
        PowerKind::Reactive => 6,
        PowerKind::ApparentRms => 7,
        PowerKind::ApparentVector => 8,
        PowerKind::MomentaryActive => 9,
        PowerKind::MomentaryFundamental => 10
    };
    phase_base(bank) + 2 * offset
}

/// Returns the row holding the RMS voltage and current.
pub fn rms_addr(bank: usize) -> u8 {
    match bank {
        0 => Register::DspReg14.addr(),
        _ => Register::DspReg15.addr()
    }
}

/// Returns the row holding the phase.
pub fn phase_addr(bank: usize) -> u8 {
    match bank {
        0 => Register::DspReg17.addr(),
        _ => Register::DspReg19.addr()
    }
}

/// Returns the row holding the line periods. Both banks share it.
pub fn period_addr() -> u8 {
    Register::DspReg1.addr()
}

/// Returns the rows holding the instantaneous voltage and current samples.
pub fn instantaneous_addr(bank: usize, band: Band) -> (u8, u8) {
    let voltage = match (band, bank) {
        (Band::Wide, 0) => Register::DspReg2,
        (Band::Wide, _) => Register::DspReg4,
        (Band::Fundamental, 0) => Register::DspReg6,
        (Band::Fundamental, _) => Register::DspReg8
    };
    (voltage.addr(), voltage.addr() + 2)
}

/// Energy accumulators are plain 32-bit counters.
pub fn decode_energy(word: u32) -> u32 {
    word
}

/// Powers are 29-bit signed values.
pub fn decode_power(word: u32) -> i32 {
    sign_extend(word, 29)
}

/// Splits an RMS row into its 15-bit voltage and 17-bit current fields.
pub fn decode_rms(word: u32) -> (u32, u32) {
    (field(word, 0, 15), field(word, 15, 17))
}

/// The phase is a 12-bit field in the upper half of the row.
pub fn decode_phase(word: u32) -> i32 {
    field(word, 16, 12) as i32
}

/// Extracts the 12-bit period of the bank from the shared period row.
pub fn decode_period(word: u32, bank: usize) -> u16 {
    field(word, 16 * bank.min(1) as u32, 12) as u16
}

/// Instantaneous samples are 24-bit signed values.
pub fn decode_sample(word: u32) -> i32 {
    sign_extend(word, 24)
}

/// Converts a period field into microseconds.
pub fn period_to_micros(period: u16) -> u32 {
    period as u32 * PERIOD_LSB_US
}

/// Converts a period field into a line frequency in millihertz. A null period has no frequency.
pub fn frequency_millihertz(period: u16) -> Option<u32> {
    match period_to_micros(period) {
        0 => None,
        micros => Some(((1_000_000_000u64 + micros as u64 / 2) / micros as u64) as u32)
    }
}
