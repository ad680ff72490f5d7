#![cfg_attr(not(any(test, feature = "simulator")), no_std)]

//! # MCP23S17 driver
//!
//! A register level driver for the MCP23S17 16 bit I/O expander on an SPI bus.
//!
//! The driver owns the [`SpiBus`] and drives the chip select line itself, as the
//! chip wants a settle time after chip select goes low and a pause between the
//! command and data phases of a read. A device is described by an unbound
//! [`Mcp23s17Device`] and only gets register operations once it has been bound
//! to a bus with [`Mcp23s17Device::begin`].
//!
//! ```ignore
//! let mut mcp = Mcp23s17Device::default().begin(&mut host, delay)?;
//!
//! mcp.write_register(RegisterAddress::IODIRA, 0x00).await?; // port A all outputs
//! mcp.write_register(RegisterAddress::OLATA, 0xAA).await?;
//! let latch = mcp.read_register(RegisterAddress::OLATA).await?;
//! ```
//!
//! A read of an absent or unpowered chip is not detected. The bus hands back
//! whatever the floating MISO line gives and the driver returns it as the
//! register value. [`Mcp23s17::write_register_verified`] can be used where a
//! round trip check is wanted.
//!
//! To share one chip between tasks see the `shared-expander` crate.

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiBus;

mod bus;
mod device;
mod port;
mod registers;

#[cfg(any(test, feature = "simulator"))]
pub mod sim;

pub use bus::{
    BitOrder, BusConfig, FrameFormat, SpiHost, SpiId, DEFAULT_BAUD_RATE_HZ, DEFAULT_MISO_PIN,
    DEFAULT_MOSI_PIN, DEFAULT_SCK_PIN, MCP23S17_FRAME_FORMAT,
};
pub use device::{
    BeginError, Mcp23s17Device, ShadowState, DEFAULT_ADDRESS, DEFAULT_CHIP_SELECT_PIN,
};
pub use registers::{Port, RegisterAddress, IOCON};

/// Mask applied to the address byte for a write (clears the R/W bit).
pub const WRITE_CMD: u8 = 0xFE;
/// Bit set in the address byte for a read.
pub const READ_CMD: u8 = 0x01;

/// Time chip select is held low before the first clock, and high after a read.
pub const SELECT_SETTLE_US: u32 = 1;
/// Pause between the command phase and the data phase of a read.
pub const COMMAND_TO_DATA_MS: u32 = 10;
/// Bytes clocked in during the data phase of a read. Only the first one is used.
pub const READ_RESPONSE_LEN: usize = 8;

/// Register level access to an I/O expander.
///
/// Implemented by [`Mcp23s17`]. Register offsets are plain bytes here: nothing
/// checks whether the offset exists or is writable.
#[allow(async_fn_in_trait)]
pub trait RegisterAccess {
    type Error;

    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error>;

    async fn read_register(&mut self, register: u8) -> Result<u8, Self::Error>;
}

/// A MCP23S17 bound to an SPI bus.
///
/// Created by [`Mcp23s17Device::begin`] or [`Mcp23s17Device::begin_with`].
pub struct Mcp23s17<SPI, CS, D> {
    spi: SPI,
    chip_select: CS,
    delay: D,

    address: u8,
    chip_select_pin: u8,

    shadow: ShadowState,
}

impl<SPI, CS, D> Mcp23s17<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    pub(crate) fn bound(
        spi: SPI,
        chip_select: CS,
        delay: D,
        address: u8,
        chip_select_pin: u8,
        shadow: ShadowState,
    ) -> Self {
        Mcp23s17 {
            spi,
            chip_select,
            delay,
            address,
            chip_select_pin,
            shadow,
        }
    }

    /// Writes `value` to the register at `register`.
    ///
    /// One exchange of `[address & WRITE_CMD, register, value]` with chip select
    /// held low. Nothing is read back.
    pub async fn write_register<R: Into<u8>>(
        &mut self,
        register: R,
        value: u8,
    ) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        let register = register.into();
        let frame = [self.write_command(), register, value];
        log::trace!("mcp23s17 write {:#04x} <- {:#04x}", register, value);

        self.select().await?;
        let exchanged = self.write_phase(&frame).await;
        let released = self.deselect();

        exchanged?;
        released
    }

    /// Reads the register at `register`.
    ///
    /// The command phase `[address | READ_CMD, register]` is followed, after
    /// [`COMMAND_TO_DATA_MS`], by a data phase of [`READ_RESPONSE_LEN`] bytes of
    /// which the first one is returned.
    pub async fn read_register<R: Into<u8>>(
        &mut self,
        register: R,
    ) -> Result<u8, DriverError<SPI::Error, CS::Error>> {
        let register = register.into();
        let command = [self.read_command(), register];
        let mut response = [0u8; READ_RESPONSE_LEN];

        self.select().await?;
        let exchanged = self.read_phases(&command, &mut response).await;
        let released = self.deselect();
        self.delay.delay_us(SELECT_SETTLE_US).await;

        exchanged?;
        released?;

        log::trace!("mcp23s17 read {:#04x} -> {:#04x}", register, response[0]);
        Ok(response[0])
    }

    /// Writes `value` and reads the register back, failing with
    /// [`DriverError::Verify`] when the chip returns something else.
    ///
    /// Only meaningful for registers that read back what was written, e.g. the
    /// direction, pull-up or output latch registers. `GPIOx` returns the pins.
    pub async fn write_register_verified<R: Into<u8>>(
        &mut self,
        register: R,
        value: u8,
    ) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        let register = register.into();
        self.write_register(register, value).await?;

        let found = self.read_register(register).await?;
        if found == value {
            Ok(())
        } else {
            log::warn!(
                "mcp23s17 register {:#04x} reads {:#04x} after writing {:#04x}",
                register,
                found,
                value
            );
            Err(DriverError::Verify {
                register,
                expected: value,
                found,
            })
        }
    }

    /// The opcode byte of a write.
    pub fn write_command(&self) -> u8 {
        self.address & WRITE_CMD
    }

    /// The opcode byte of a read.
    pub fn read_command(&self) -> u8 {
        self.address | READ_CMD
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn chip_select_pin(&self) -> u8 {
        self.chip_select_pin
    }

    /// Configuration recorded when the device was constructed.
    ///
    /// This is a hint only. Register writes do not update it, so it drifts from
    /// the chip as soon as the configuration registers are written.
    pub fn shadow(&self) -> &ShadowState {
        &self.shadow
    }

    // Destroys the driver and releases the peripherals
    pub fn release(self) -> (SPI, CS, D) {
        (self.spi, self.chip_select, self.delay)
    }

    async fn select(&mut self) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.chip_select
            .set_low()
            .map_err(DriverError::ChipSelect)?;
        self.delay.delay_us(SELECT_SETTLE_US).await;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.chip_select
            .set_high()
            .map_err(DriverError::ChipSelect)
    }

    async fn write_phase(&mut self, frame: &[u8]) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.spi.write(frame).await.map_err(DriverError::Spi)?;
        self.spi.flush().await.map_err(DriverError::Spi)
    }

    async fn read_phases(
        &mut self,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.write_phase(command).await?;
        self.delay.delay_ms(COMMAND_TO_DATA_MS).await;
        self.spi.read(response).await.map_err(DriverError::Spi)?;
        self.spi.flush().await.map_err(DriverError::Spi)
    }
}

impl<SPI, CS, D> RegisterAccess for Mcp23s17<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    type Error = DriverError<SPI::Error, CS::Error>;

    async fn write_register(&mut self, register: u8, value: u8) -> Result<(), Self::Error> {
        Mcp23s17::write_register(self, register, value).await
    }

    async fn read_register(&mut self, register: u8) -> Result<u8, Self::Error> {
        Mcp23s17::read_register(self, register).await
    }
}

/// Failures reported by the SPI bus or the chip select pin.
///
/// A chip that does not answer is not an error, see the crate documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError<S, P> {
    Spi(S),
    ChipSelect(P),
    // Only returned by write_register_verified
    Verify {
        register: u8,
        expected: u8,
        found: u8,
    },
}

impl<S: core::fmt::Debug, P: core::fmt::Debug> core::fmt::Display for DriverError<S, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DriverError::Spi(e) => write!(f, "SPI bus error: {:?}", e),
            DriverError::ChipSelect(e) => write!(f, "chip select error: {:?}", e),
            DriverError::Verify {
                register,
                expected,
                found,
            } => write!(
                f,
                "register {:#04x} reads {:#04x}, expected {:#04x}",
                register, found, expected
            ),
        }
    }
}
