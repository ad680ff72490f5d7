//! Bus parameters handed to the platform when a device is bound to it.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Mode, MODE_0};
use embedded_hal_async::spi::SpiBus;

/// Baud rate used by [`crate::Mcp23s17Device::begin`].
pub const DEFAULT_BAUD_RATE_HZ: u32 = 100_000;

// Default wiring
pub const DEFAULT_SCK_PIN: u8 = 2;
pub const DEFAULT_MOSI_PIN: u8 = 3;
pub const DEFAULT_MISO_PIN: u8 = 4;

/// Which SPI peripheral of the host the chip hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiId {
    Spi0,
    Spi1,
}

impl SpiId {
    /// Maps a numeric bus selector onto a peripheral. Anything other than 1 is bus 0.
    pub fn from_index(index: u8) -> Self {
        if index == 1 {
            SpiId::Spi1
        } else {
            SpiId::Spi0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// Framing of a single SPI word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub data_bits: u8,
    pub mode: Mode,
    pub bit_order: BitOrder,
}

/// The only framing the MCP23S17 understands: 8 bit words, clock idle low,
/// sampled on the leading edge, MSB first.
pub const MCP23S17_FRAME_FORMAT: FrameFormat = FrameFormat {
    data_bits: 8,
    mode: MODE_0,
    bit_order: BitOrder::MsbFirst,
};

/// Bus selector, pin assignment and clock rate for one SPI bus.
///
/// The frame format is fixed to [`MCP23S17_FRAME_FORMAT`] and cannot be
/// changed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub bus: SpiId,
    pub sck: u8,
    pub mosi: u8,
    pub miso: u8,
    pub baud_rate_hz: u32,
    format: FrameFormat,
}

impl BusConfig {
    pub const fn new(bus: SpiId, sck: u8, mosi: u8, miso: u8, baud_rate_hz: u32) -> Self {
        BusConfig {
            bus,
            sck,
            mosi,
            miso,
            baud_rate_hz,
            format: MCP23S17_FRAME_FORMAT,
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig::new(
            SpiId::Spi0,
            DEFAULT_SCK_PIN,
            DEFAULT_MOSI_PIN,
            DEFAULT_MISO_PIN,
            DEFAULT_BAUD_RATE_HZ,
        )
    }
}

/// The platform side of [`crate::Mcp23s17Device::begin`].
///
/// Implemented by the board support code: it initializes the SPI peripheral
/// (clock rate, frame format, pin muxing) and hands out the chip select line
/// as a plain digital output.
pub trait SpiHost {
    type Bus: SpiBus<u8>;
    type ChipSelect: OutputPin;
    type Error: core::fmt::Debug;

    fn init_bus(&mut self, config: &BusConfig) -> Result<Self::Bus, Self::Error>;

    fn init_chip_select(&mut self, pin: u8) -> Result<Self::ChipSelect, Self::Error>;
}
