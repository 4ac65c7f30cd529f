/// Number of 32-bit register rows exposed by a STPM3x device, from `DSP_CR1` (0x00) up to
/// `TOT_REG4` (0x8A). Row addresses are expressed in 16-bit units, so consecutive rows are two
/// addresses apart.
pub const REGISTER_ROWS: usize = 70;

/// Maximum number of 32-bit words that can be moved with a single block frame.
pub const MAX_BLOCK_WORDS: usize = REGISTER_ROWS;

/// Number of configuration rows, from `DSP_CR1` (0x00) to `DFE_CR2` (0x1A).
pub const CONFIG_ROWS: usize = 14;

/// Number of status rows, from `DSP_SR1` (0x20) to `DSP_EV2` (0x2C).
pub const STATUS_ROWS: usize = 7;

/// Number of data rows, from `DSP_SR1` (0x20) to `TOT_REG4` (0x8A). This is the block fetched
/// by a full data refresh.
pub const DATA_ROWS: usize = 54;

/// Represents the registers of the STPM3x used by the metrology layer.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// DSP control register of channel 1 (voltage reference, LED1 sources).
    DspCr1,
    /// DSP control register of channel 2 (voltage reference, LED2 sources).
    DspCr2,
    /// Common DSP control register (latch, reset, tamper, ZCR and clock output).
    DspCr3,
    /// Digital front end control register of channel 1 (enables, current gain).
    DfeCr1,
    /// Digital front end control register of channel 2 (enables, current gain).
    DfeCr2,
    /// Electrical status of channel 1.
    DspSr1,
    /// Electrical status of channel 2.
    DspSr2,
    /// UART/SPI control register 1.
    UsReg1,
    /// UART/SPI control register 2.
    UsReg2,
    /// UART/SPI interrupt control and link status.
    UsReg3,
    /// Live events of channel 1.
    DspEv1,
    /// Live events of channel 2.
    DspEv2,
    /// Line periods of both channels.
    DspReg1,
    /// Instantaneous wideband voltage of channel 1.
    DspReg2,
    /// Instantaneous wideband current of channel 1.
    DspReg3,
    /// Instantaneous wideband voltage of channel 2.
    DspReg4,
    /// Instantaneous wideband current of channel 2.
    DspReg5,
    /// Instantaneous fundamental voltage of channel 1.
    DspReg6,
    /// Instantaneous fundamental current of channel 1.
    DspReg7,
    /// Instantaneous fundamental voltage of channel 2.
    DspReg8,
    /// Instantaneous fundamental current of channel 2.
    DspReg9,
    /// RMS voltage and current of channel 1.
    DspReg14,
    /// RMS voltage and current of channel 2.
    DspReg15,
    /// Phase of channel 1.
    DspReg17,
    /// Phase of channel 2.
    DspReg19,
    /// First energy row of phase 1. Energy and power rows of the phase follow.
    Ph1Reg1,
    /// First energy row of phase 2. Energy and power rows of the phase follow.
    Ph2Reg1,
    /// Total active energy across both phases.
    TotReg1
}

impl Register {
    /// Returns the offset address of the register.
    pub fn addr(&self) -> u8 {
        match self {
            Register::DspCr1 => 0x00,
            Register::DspCr2 => 0x02,
            Register::DspCr3 => 0x04,
            Register::DfeCr1 => 0x18,
            Register::DfeCr2 => 0x1A,
            Register::DspSr1 => 0x20,
            Register::DspSr2 => 0x22,
            Register::UsReg1 => 0x24,
            Register::UsReg2 => 0x26,
            Register::UsReg3 => 0x28,
            Register::DspEv1 => 0x2A,
            Register::DspEv2 => 0x2C,
            Register::DspReg1 => 0x2E,
            Register::DspReg2 => 0x30,
            Register::DspReg3 => 0x32,
            Register::DspReg4 => 0x34,
            Register::DspReg5 => 0x36,
            Register::DspReg6 => 0x38,
            Register::DspReg7 => 0x3A,
            Register::DspReg8 => 0x3C,
            Register::DspReg9 => 0x3E,
            Register::DspReg14 => 0x48,
            Register::DspReg15 => 0x4A,
            Register::DspReg17 => 0x4E,
            Register::DspReg19 => 0x52,
            Register::Ph1Reg1 => 0x54,
            Register::Ph2Reg1 => 0x6C,
            Register::TotReg1 => 0x84
        }
    }

    /// Returns the index of the register in a full register image.
    pub fn row(&self) -> usize {
        (self.addr() / 2) as usize
    }
}

/// Returns the row index of the given offset address, or [`None`] if the address is odd or
/// beyond the register map.
pub fn row_of(addr: u8) -> Option<usize> {
    let row = (addr / 2) as usize;
    if addr % 2 != 0 || row >= REGISTER_ROWS {
        return None;
    }
    Some(row)
}

/// Bits of `DSP_CR3` acting as commands. They are cleared by the chip once executed.
pub(crate) mod cr3 {
    pub const SW_RESET: u32 = 1 << 20;
    pub const SW_LATCH1: u32 = 1 << 21;
    pub const SW_LATCH2: u32 = 1 << 22;
    pub const SW_AUTO_LATCH: u32 = 1 << 23;

    /// Both latch requests, one per channel.
    pub const SW_LATCH: u32 = SW_LATCH1 | SW_LATCH2;
}

/// Sign-extends the lowest `bits` bits of `word`.
pub(crate) fn sign_extend(word: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((word << shift) as i32) >> shift
}

/// Extracts an unsigned field of `bits` bits starting at bit `lsb`.
pub(crate) fn field(word: u32, lsb: u32, bits: u32) -> u32 {
    (word >> lsb) & ((1 << bits) - 1)
}
