//! Byte link between the host and one STPM3x device.
//!
//! The [`DuplexBuffer`] sits between the byte level (serial interrupt handlers, or the
//! [`Link::service()`] pump) and the frame level. Each direction is a small state machine:
//!
//! - transmit: `Idle` → `Filling` (frame being staged) → `Ready` → `Draining` (bytes leaving)
//!   → `Idle`;
//! - receive: `Idle` → `Filling` (response bytes arriving) → `Ready` → `Draining` (frame being
//!   validated) → `Idle`.
//!
//! The frame level only consumes a receive buffer in `Ready`, and the byte level only pushes into
//! a receive buffer in `Filling`, so the two sides never hold the same role at once.

use embedded_hal::serial;
use heapless::spsc::Queue;

use crate::frame::{self, FrameBuf, FrameError, ReadRequest, Words, MAX_FRAME_LEN};

/// Queue storage holding a full frame. A `heapless` queue of size `N` holds `N - 1` items.
const QUEUE_LEN: usize = MAX_FRAME_LEN + 1;

/// Represents the link level errors, as reported by the serial peripheral or detected while
/// moving bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    Break,
    Framing,
    Noise,
    RxOverrun,
    TxOverrun,
    SpiRxFull,
    SpiTxEmpty,
    Read,
    Write,
    Underrun,
    Overrun,
    /// The transfer did not complete within the allowed number of polls.
    Timeout
}

/// Errors surfaced by a transfer on the link.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferError {
    Frame(FrameError),
    Link(LinkError),
    /// A transfer is already in flight on the link.
    Busy
}

impl From<FrameError> for TransferError {
    fn from(e: FrameError) -> Self {
        TransferError::Frame(e)
    }
}

impl From<LinkError> for TransferError {
    fn from(e: LinkError) -> Self {
        TransferError::Link(e)
    }
}

/// Byte level transport to a device. Any `embedded-hal` serial port whose error converts into a
/// [`LinkError`] is a transport.
pub trait Transport {
    /// Sends one byte.
    fn send(&mut self, byte: u8) -> nb::Result<(), LinkError>;

    /// Returns the next received byte.
    fn receive(&mut self) -> nb::Result<u8, LinkError>;
}

impl<T, E> Transport for T
    where
        T: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
        E: Into<LinkError> {

    fn send(&mut self, byte: u8) -> nb::Result<(), LinkError> {
        match self.write(byte) {
            Ok(()) => Ok(()),
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(e)) => Err(nb::Error::Other(e.into()))
        }
    }

    fn receive(&mut self) -> nb::Result<u8, LinkError> {
        match self.read() {
            Ok(byte) => Ok(byte),
            Err(nb::Error::WouldBlock) => Err(nb::Error::WouldBlock),
            Err(nb::Error::Other(e)) => Err(nb::Error::Other(e.into()))
        }
    }
}

/// State of one direction of a [`DuplexBuffer`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferState {
    Idle,
    Filling,
    Ready,
    Draining
}

/// Double-buffered transmit/receive structure of a link.
pub struct DuplexBuffer {
    tx: Queue<u8, QUEUE_LEN>,
    rx: Queue<u8, QUEUE_LEN>,
    tx_state: BufferState,
    rx_state: BufferState,
    pending: Option<ReadRequest>
}

impl Default for DuplexBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplexBuffer {
    pub fn new() -> Self {
        Self {
            tx: Queue::new(),
            rx: Queue::new(),
            tx_state: BufferState::Idle,
            rx_state: BufferState::Idle,
            pending: None
        }
    }

    /// Returns the state of the transmit buffer.
    pub fn tx_state(&self) -> BufferState {
        self.tx_state
    }

    /// Returns the state of the receive buffer.
    pub fn rx_state(&self) -> BufferState {
        self.rx_state
    }

    /// Returns `true` if nothing is staged, being sent or awaited.
    pub fn is_idle(&self) -> bool {
        self.tx_state == BufferState::Idle && self.rx_state == BufferState::Idle
    }

    /// Stages `bytes` for transmission. When `response` is given, the receive buffer starts
    /// collecting the answer to that request. The link is half-duplex, so a new transfer is
    /// refused with [`TransferError::Busy`] until the previous one has completed. Staging no
    /// bytes leaves the transmit buffer idle.
    pub fn begin_transmit(&mut self, bytes: &[u8], response: Option<ReadRequest>) -> Result<(), TransferError> {
        if !self.is_idle() {
            return Err(TransferError::Busy);
        }
        self.tx_state = BufferState::Filling;
        for &byte in bytes {
            if self.tx.enqueue(byte).is_err() {
                self.reset();
                return Err(TransferError::Link(LinkError::TxOverrun));
            }
        }
        self.tx_state = if self.tx.is_empty() { BufferState::Idle } else { BufferState::Ready };
        if let Some(request) = response {
            self.pending = Some(request);
            self.rx_state = BufferState::Filling;
        }
        Ok(())
    }

    /// Returns the next byte to put on the wire, if any. Called from the transmit interrupt.
    pub fn next_tx_byte(&mut self) -> Option<u8> {
        match self.tx_state {
            BufferState::Ready | BufferState::Draining => {
                self.tx_state = BufferState::Draining;
                let byte = self.tx.dequeue();
                if self.tx.is_empty() {
                    self.tx_state = BufferState::Idle;
                }
                byte
            }
            _ => None
        }
    }

    /// Stores a byte coming from the wire. Called from the receive interrupt. Bytes arriving while
    /// no response is awaited, or beyond the expected response length, are reported as an
    /// overrun.
    pub fn on_byte_received(&mut self, byte: u8) -> Result<(), LinkError> {
        let expected = match (self.rx_state, self.pending) {
            (BufferState::Filling, Some(request)) => request.response_len(),
            _ => return Err(LinkError::RxOverrun)
        };
        self.rx.enqueue(byte).map_err(|_| LinkError::RxOverrun)?;
        if self.rx.len() == expected {
            self.rx_state = BufferState::Ready;
        }
        Ok(())
    }

    /// Returns the validated words of the awaited response, or [`nb::Error::WouldBlock`] while it
    /// is still arriving. Polling a buffer that awaits nothing is a read error.
    pub fn poll_received(&mut self) -> nb::Result<Words, TransferError> {
        match self.rx_state {
            BufferState::Filling => return Err(nb::Error::WouldBlock),
            BufferState::Ready => {}
            _ => return Err(nb::Error::Other(TransferError::Link(LinkError::Read)))
        }
        let request = match self.pending.take() {
            Some(request) => request,
            None => return Err(nb::Error::Other(TransferError::Link(LinkError::Read)))
        };
        self.rx_state = BufferState::Draining;
        let mut bytes = FrameBuf::new();
        while let Some(byte) = self.rx.dequeue() {
            // The queue never holds more than a frame.
            let _ = bytes.push(byte);
        }
        self.rx_state = BufferState::Idle;
        frame::parse_response(request, &bytes).map_err(|e| nb::Error::Other(TransferError::Frame(e)))
    }

    /// Discards any staged, in-flight or received data.
    pub fn reset(&mut self) {
        while self.tx.dequeue().is_some() {}
        while self.rx.dequeue().is_some() {}
        self.tx_state = BufferState::Idle;
        self.rx_state = BufferState::Idle;
        self.pending = None;
    }
}

/// Represents the hardware binding of a device: its transport and its control pins.
pub struct Port<SERIAL, PIN> {
    /// Serial link to the device.
    pub serial: SERIAL,
    /// SCS pin. Held high selects UART mode at power-up.
    pub cs: PIN,
    /// SYN pin, pulsed low to latch the device registers.
    pub syn: PIN,
    /// EN pin, powering the device.
    pub en: PIN
}

impl<SERIAL, PIN> Port<SERIAL, PIN> {
    pub fn new(serial: SERIAL, cs: PIN, syn: PIN, en: PIN) -> Self {
        Self { serial, cs, syn, en }
    }
}

/// A device port together with its duplex buffer.
pub struct Link<SERIAL, PIN> {
    pub(crate) port: Port<SERIAL, PIN>,
    pub(crate) buffer: DuplexBuffer
}

impl<SERIAL, PIN> Link<SERIAL, PIN>
    where
        SERIAL: Transport {

    pub fn new(port: Port<SERIAL, PIN>) -> Self {
        Self { port, buffer: DuplexBuffer::new() }
    }

    /// Moves bytes between the buffer and the transport until the transport would block. This is
    /// the polled counterpart of the transmit and receive interrupts.
    pub fn service(&mut self) -> Result<(), LinkError> {
        while self.buffer.tx_state == BufferState::Ready || self.buffer.tx_state == BufferState::Draining {
            let byte = match self.buffer.tx.peek() {
                Some(&byte) => byte,
                None => break
            };
            match self.port.serial.send(byte) {
                Ok(()) => {
                    self.buffer.next_tx_byte();
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => return Err(e)
            }
        }
        if self.buffer.tx_state != BufferState::Idle {
            return Ok(());
        }
        loop {
            match self.port.serial.receive() {
                Ok(byte) => self.buffer.on_byte_received(byte)?,
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(e)
            }
        }
    }
}
