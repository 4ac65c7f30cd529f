#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::serial;
use embedded_hal_mock::delay::MockNoop;
use embedded_hal_mock::pin::{Mock as PinMock, Transaction as PinTransaction};
use stpm3x_metro::frame::{self, ReadRequest, WRITE_FLAG};
use stpm3x_metro::register::{row_of, REGISTER_ROWS};
use stpm3x_metro::*;

pub type Metro<const N: usize> = Metrology<FakeChip, PinMock, MockNoop, N>;

const SW_RESET: u32 = 1 << 20;
const SW_LATCH: u32 = 3 << 21;

/// Register file and wire behaviour of a simulated STPM3x chip.
pub struct ChipState {
    pub rows: [u32; REGISTER_ROWS],
    /// Rows copied into `rows` when the chip latches.
    pub live: Vec<(u8, u32)>,
    /// Write frames received, with their address and words.
    pub writes: Vec<(u8, Vec<u32>)>,
    pub latches: usize,
    pub resets: usize,
    /// The latch bits of `DSP_CR3` are never cleared.
    pub latch_stuck: bool,
    /// Error returned by the next receive, losing the response in flight.
    pub fault: Option<LinkError>,
    /// Flip a bit of the next response.
    pub corrupt: bool,
    request: Vec<u8>,
    response: VecDeque<u8>
}

/// Handle on a simulated chip. Clones share the same chip.
#[derive(Clone)]
pub struct FakeChip {
    pub state: Rc<RefCell<ChipState>>
}

impl FakeChip {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ChipState {
                rows: [0; REGISTER_ROWS],
                live: Vec::new(),
                writes: Vec::new(),
                latches: 0,
                resets: 0,
                latch_stuck: false,
                fault: None,
                corrupt: false,
                request: Vec::new(),
                response: VecDeque::new()
            }))
        }
    }

    pub fn set(&self, addr: u8, word: u32) {
        self.state.borrow_mut().rows[row_of(addr).unwrap()] = word;
    }

    pub fn get(&self, addr: u8) -> u32 {
        self.state.borrow().rows[row_of(addr).unwrap()]
    }

    /// Stages a value that becomes readable at the next latch.
    pub fn stage(&self, addr: u8, word: u32) {
        self.state.borrow_mut().live.push((addr, word));
    }

    pub fn fail_next_receive(&self, e: LinkError) {
        self.state.borrow_mut().fault = Some(e);
    }

    pub fn corrupt_next_response(&self) {
        self.state.borrow_mut().corrupt = true;
    }

    pub fn writes(&self) -> Vec<(u8, Vec<u32>)> {
        self.state.borrow().writes.clone()
    }
}

impl ChipState {
    fn on_request_byte(&mut self, byte: u8) {
        self.request.push(byte);
        if self.request.len() < 2 {
            return;
        }
        let count = (self.request[1] & !WRITE_FLAG) as usize;
        if self.request[1] & WRITE_FLAG == 0 {
            let request = ReadRequest { addr: self.request[0], count: count as u8 };
            self.request.clear();
            self.respond(request);
        } else if self.request.len() == 2 + 4 * count + 1 {
            let bytes = std::mem::take(&mut self.request);
            let (addr, words) = frame::parse_frame(&bytes).unwrap();
            self.store(addr, &words);
            self.writes.push((addr, words.to_vec()));
        }
    }

    fn respond(&mut self, request: ReadRequest) {
        let first = row_of(request.addr).unwrap();
        let words = &self.rows[first..first + request.count as usize];
        let mut bytes = frame::build_response(request, words).unwrap();
        if std::mem::take(&mut self.corrupt) {
            bytes[0] ^= 0x01;
        }
        self.response.extend(bytes.iter());
    }

    fn store(&mut self, addr: u8, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            let addr = addr + 2 * i as u8;
            let row = row_of(addr).unwrap();
            match addr {
                // Status rows are cleared by writing ones.
                0x20 | 0x22 => self.rows[row] &= !word,
                0x28 => self.rows[row] = (self.rows[row] & !word & 0xFFFF_0000) | (word & 0x0000_FFFF),
                0x04 => {
                    let mut word = *word;
                    if word & SW_RESET != 0 {
                        self.resets += 1;
                        word &= !SW_RESET;
                        // Energy rows of both phases and of the totals
                        for base in [0x54u8, 0x6C, 0x84] {
                            for i in 0..4 {
                                self.rows[row_of(base + 2 * i).unwrap()] = 0;
                            }
                        }
                    }
                    if word & SW_LATCH != 0 {
                        self.latches += 1;
                        if !self.latch_stuck {
                            word &= !SW_LATCH;
                            for (addr, value) in std::mem::take(&mut self.live) {
                                self.rows[row_of(addr).unwrap()] = value;
                            }
                        }
                    }
                    self.rows[row] = word;
                }
                _ => self.rows[row] = *word
            }
        }
    }
}

impl serial::Write<u8> for FakeChip {
    type Error = LinkError;

    fn write(&mut self, word: u8) -> nb::Result<(), LinkError> {
        self.state.borrow_mut().on_request_byte(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), LinkError> {
        Ok(())
    }
}

impl serial::Read<u8> for FakeChip {
    type Error = LinkError;

    fn read(&mut self) -> nb::Result<u8, LinkError> {
        let mut state = self.state.borrow_mut();
        if let Some(e) = state.fault.take() {
            // The frame in flight is lost.
            state.response.clear();
            return Err(nb::Error::Other(e));
        }
        state.response.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

/// A pin expecting no transaction.
pub fn idle_pin() -> PinMock {
    PinMock::new(&[] as &[PinTransaction])
}

/// Builds a metrology layer over simulated chips of the given kinds, with idle pins.
pub fn metrology<const N: usize>(kinds: [DeviceKind; N]) -> (Metro<N>, [FakeChip; N]) {
    let chips: [FakeChip; N] = core::array::from_fn(|_| FakeChip::new());
    let ports = chips.clone().map(|chip| Port::new(chip, idle_pin(), idle_pin(), idle_pin()));
    let mut metro = Metrology::new(ports, kinds.map(DeviceConfig::chip), MockNoop::new());
    metro.init();
    (metro, chips)
}
