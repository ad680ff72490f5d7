//! Behavioural model of a MCP23S17 on a simulated SPI bus.
//!
//! Enabled by the `simulator` feature. The model keeps the register file of the
//! chip, decodes the bytes clocked while chip select is low and answers reads
//! the way the chip does: `GPIOx` returns the pin levels, `OLATx` the latch,
//! unknown offsets and unaddressed frames leave MISO floating (read as 0).
//!
//! Every bus, pin and delay operation is appended to an event log so tests can
//! check the exact framing. Selecting the chip while it is already selected is
//! counted as an overlap, clocking bytes while it is deselected as unframed.
//!
//! [`SimDelay`] yields to the executor once per started millisecond instead of
//! sleeping, which lets tasks joined on one executor interleave.

use std::cell::RefCell;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use embedded_hal::digital::{OutputPin, PinState};
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiBus;

use crate::bus::{BusConfig, SpiHost};
use crate::registers::{Port, RegisterAddress, IOCON};

/// What a read returns when nobody drives MISO.
pub const FLOATING: u8 = 0x00;

// Fixed upper nibble of the opcode byte
const OPCODE_PREFIX: u8 = 0x40;
const OPCODE_PREFIX_MASK: u8 = 0xF0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Configured(BusConfig),
    Select,
    Deselect,
    Write(Vec<u8>),
    Read(Vec<u8>),
    Transfer { mosi: Vec<u8>, miso: Vec<u8> },
    Delay { ns: u64 },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Deselected,
    Opcode,
    Register { read: bool, addressed: bool },
    Data { read: bool, addressed: bool },
}

struct Chip {
    registers: [u8; RegisterAddress::COUNT],
    inputs: [u8; 2],
    hardware_address: u8,
    phase: Phase,
    pointer: u8,
}

impl Chip {
    fn new() -> Self {
        let mut registers = [0u8; RegisterAddress::COUNT];
        // Power-on state: all pins inputs
        registers[RegisterAddress::IODIRA as usize] = 0xFF;
        registers[RegisterAddress::IODIRB as usize] = 0xFF;

        Chip {
            registers,
            inputs: [0; 2],
            hardware_address: 0,
            phase: Phase::Deselected,
            pointer: 0,
        }
    }

    fn iocon(&self) -> IOCON {
        IOCON::from_bits_truncate(self.registers[RegisterAddress::IOCON as usize])
    }

    fn is_addressed(&self, opcode: u8) -> bool {
        if opcode & OPCODE_PREFIX_MASK != OPCODE_PREFIX {
            return false;
        }
        if self.iocon().contains(IOCON::HAEN) {
            (opcode >> 1) & 0b111 == self.hardware_address
        } else {
            true
        }
    }

    fn clock(&mut self, mosi: u8) -> u8 {
        match self.phase {
            Phase::Deselected => FLOATING,
            Phase::Opcode => {
                self.phase = Phase::Register {
                    read: mosi & 0x01 == 0x01,
                    addressed: self.is_addressed(mosi),
                };
                FLOATING
            }
            Phase::Register { read, addressed } => {
                self.pointer = mosi;
                self.phase = Phase::Data { read, addressed };
                FLOATING
            }
            Phase::Data { addressed: false, .. } => FLOATING,
            Phase::Data { read: true, .. } => {
                let miso = self.read(self.pointer);
                self.advance();
                miso
            }
            Phase::Data { read: false, .. } => {
                self.write(self.pointer, mosi);
                self.advance();
                FLOATING
            }
        }
    }

    fn advance(&mut self) {
        if self.iocon().contains(IOCON::SEQOP) {
            return;
        }
        self.pointer = self.pointer.wrapping_add(1);
        if self.pointer as usize >= RegisterAddress::COUNT {
            self.pointer = 0;
        }
    }

    fn pins(&self, port: Port) -> u8 {
        let direction = self.registers[port.direction() as usize];
        let latch = self.registers[port.latch() as usize];
        let polarity = self.registers[port.polarity() as usize];
        let input = match port {
            Port::A => self.inputs[0],
            Port::B => self.inputs[1],
        };
        ((latch & !direction) | (input & direction)) ^ (polarity & direction)
    }

    fn read(&self, offset: u8) -> u8 {
        use RegisterAddress as R;

        match R::from_offset(offset) {
            None => FLOATING,
            Some(R::GPIOA) => self.pins(Port::A),
            Some(R::GPIOB) => self.pins(Port::B),
            Some(R::IOCON2) => self.registers[R::IOCON as usize],
            Some(register) => self.registers[register as usize],
        }
    }

    fn write(&mut self, offset: u8, value: u8) {
        use RegisterAddress as R;

        match R::from_offset(offset) {
            None | Some(R::INTFA | R::INTFB | R::INTCAPA | R::INTCAPB) => {}
            Some(R::GPIOA) => self.registers[R::OLATA as usize] = value,
            Some(R::GPIOB) => self.registers[R::OLATB as usize] = value,
            // Bit 0 of IOCON is unimplemented and reads as 0
            Some(R::IOCON | R::IOCON2) => self.registers[R::IOCON as usize] = value & !0x01,
            Some(register) => self.registers[register as usize] = value,
        }
    }
}

struct State {
    chip: Chip,
    chip_select: Option<PinState>,
    chip_select_pin: Option<u8>,
    bus_config: Option<BusConfig>,
    events: Vec<BusEvent>,
    frames: usize,
    overlaps: usize,
    unframed: usize,
}

impl State {
    fn selected(&self) -> bool {
        self.chip_select == Some(PinState::Low)
    }

    fn check_framed(&mut self) {
        if !self.selected() {
            self.unframed += 1;
        }
    }
}

/// A simulated chip together with the bus and chip select line it sits on.
///
/// Cloning gives another handle on the same simulation.
#[derive(Clone)]
pub struct Simulator {
    state: Rc<RefCell<State>>,
}

impl Default for Simulator {
    fn default() -> Self {
        Simulator::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Simulator {
            state: Rc::new(RefCell::new(State {
                chip: Chip::new(),
                chip_select: None,
                chip_select_pin: None,
                bus_config: None,
                events: Vec::new(),
                frames: 0,
                overlaps: 0,
                unframed: 0,
            })),
        }
    }

    /// The platform to pass to [`crate::Mcp23s17Device::begin`].
    pub fn host(&self) -> SimHost {
        SimHost {
            state: self.state.clone(),
            fail_bus_init: false,
        }
    }

    /// A delay whose waits show up in the event log.
    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: Some(self.state.clone()),
        }
    }

    /// A delay that is not logged, e.g. for lock timeouts or poll periods.
    pub fn timer(&self) -> SimDelay {
        SimDelay { state: None }
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// What the chip answers for `register`, read without touching the bus.
    pub fn register<R: Into<u8>>(&self, register: R) -> u8 {
        self.state.borrow().chip.read(register.into())
    }

    /// Drives the external levels seen by the input pins of `port`.
    pub fn set_input_levels(&self, port: Port, levels: u8) {
        let mut state = self.state.borrow_mut();
        match port {
            Port::A => state.chip.inputs[0] = levels,
            Port::B => state.chip.inputs[1] = levels,
        }
    }

    /// Level of the A2..A0 pins, compared against the opcode once `IOCON.HAEN` is set.
    pub fn set_hardware_address(&self, address: u8) {
        self.state.borrow_mut().chip.hardware_address = address & 0b111;
    }

    /// Level of the chip select line, `None` until it is first driven.
    pub fn chip_select(&self) -> Option<PinState> {
        self.state.borrow().chip_select
    }

    pub fn chip_select_pin(&self) -> Option<u8> {
        self.state.borrow().chip_select_pin
    }

    pub fn bus_config(&self) -> Option<BusConfig> {
        self.state.borrow().bus_config
    }

    /// Completed select/deselect cycles.
    pub fn frames(&self) -> usize {
        self.state.borrow().frames
    }

    /// Times the chip was selected while already selected.
    pub fn overlaps(&self) -> usize {
        self.state.borrow().overlaps
    }

    /// Bus operations issued while the chip was not selected.
    pub fn unframed(&self) -> usize {
        self.state.borrow().unframed
    }
}

#[derive(Debug)]
pub struct HostError;

pub struct SimHost {
    state: Rc<RefCell<State>>,
    fail_bus_init: bool,
}

impl SimHost {
    /// Makes the next bus initialisation fail.
    pub fn fail_bus_init(&mut self) {
        self.fail_bus_init = true;
    }
}

impl SpiHost for SimHost {
    type Bus = SimBus;
    type ChipSelect = SimChipSelect;
    type Error = HostError;

    fn init_bus(&mut self, config: &BusConfig) -> Result<SimBus, HostError> {
        if self.fail_bus_init {
            return Err(HostError);
        }
        let mut state = self.state.borrow_mut();
        state.bus_config = Some(*config);
        state.events.push(BusEvent::Configured(*config));

        Ok(SimBus {
            state: self.state.clone(),
        })
    }

    fn init_chip_select(&mut self, pin: u8) -> Result<SimChipSelect, HostError> {
        self.state.borrow_mut().chip_select_pin = Some(pin);

        Ok(SimChipSelect {
            state: self.state.clone(),
        })
    }
}

pub struct SimBus {
    state: Rc<RefCell<State>>,
}

impl embedded_hal_async::spi::ErrorType for SimBus {
    type Error = Infallible;
}

impl SpiBus<u8> for SimBus {
    async fn read(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        state.check_framed();
        for word in words.iter_mut() {
            *word = state.chip.clock(0x00);
        }
        state.events.push(BusEvent::Read(words.to_vec()));
        Ok(())
    }

    async fn write(&mut self, words: &[u8]) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        state.check_framed();
        for word in words {
            state.chip.clock(*word);
        }
        state.events.push(BusEvent::Write(words.to_vec()));
        Ok(())
    }

    async fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        state.check_framed();
        for i in 0..read.len().max(write.len()) {
            let miso = state.chip.clock(write.get(i).copied().unwrap_or(0x00));
            if let Some(word) = read.get_mut(i) {
                *word = miso;
            }
        }
        state.events.push(BusEvent::Transfer {
            mosi: write.to_vec(),
            miso: read.to_vec(),
        });
        Ok(())
    }

    async fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        state.check_framed();
        let mosi = words.to_vec();
        for word in words.iter_mut() {
            *word = state.chip.clock(*word);
        }
        state.events.push(BusEvent::Transfer {
            mosi,
            miso: words.to_vec(),
        });
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

pub struct SimChipSelect {
    state: Rc<RefCell<State>>,
}

impl embedded_hal::digital::ErrorType for SimChipSelect {
    type Error = Infallible;
}

impl OutputPin for SimChipSelect {
    fn set_low(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        if state.selected() {
            state.overlaps += 1;
        }
        state.chip_select = Some(PinState::Low);
        state.chip.phase = Phase::Opcode;
        state.events.push(BusEvent::Select);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        if state.selected() {
            state.frames += 1;
        }
        state.chip_select = Some(PinState::High);
        state.chip.phase = Phase::Deselected;
        state.events.push(BusEvent::Deselect);
        Ok(())
    }
}

pub struct SimDelay {
    state: Option<Rc<RefCell<State>>>,
}

impl SimDelay {
    async fn pause(&mut self, ns: u64) {
        if let Some(state) = &self.state {
            state.borrow_mut().events.push(BusEvent::Delay { ns });
        }
        let yields = (ns / 1_000_000).max(1);
        for _ in 0..yields {
            YieldNow(false).await;
        }
    }
}

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.pause(ns as u64).await
    }

    async fn delay_us(&mut self, us: u32) {
        self.pause(us as u64 * 1_000).await
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.pause(ms as u64 * 1_000_000).await
    }
}

struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            Poll::Ready(())
        } else {
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
