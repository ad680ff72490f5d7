use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::spi::SpiBus;

use crate::registers::{Port, RegisterAddress, IOCON};
use crate::{DriverError, Mcp23s17};

// Port wide helpers. Each one is a single register operation, so a sequence of
// them is not atomic with respect to other users of the chip.
impl<SPI, CS, D> Mcp23s17<SPI, CS, D>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    D: DelayNs,
{
    /// Sets the direction of all pins of `port`, a 1 bit makes the pin an input.
    pub async fn set_direction(
        &mut self,
        port: Port,
        inputs: u8,
    ) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.write_register(port.direction(), inputs).await
    }

    /// Inverts the logic level read from the input pins with a 1 bit.
    pub async fn set_polarity(
        &mut self,
        port: Port,
        inverted: u8,
    ) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.write_register(port.polarity(), inverted).await
    }

    /// Enables the internal 100k pull-up on the input pins with a 1 bit.
    pub async fn set_pullups(
        &mut self,
        port: Port,
        enabled: u8,
    ) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.write_register(port.pullup(), enabled).await
    }

    /// Writes the output latch. Only pins configured as outputs follow it.
    pub async fn write_latch(
        &mut self,
        port: Port,
        value: u8,
    ) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.write_register(port.latch(), value).await
    }

    /// Reads the output latch, i.e. what was last written, not the pin levels.
    pub async fn read_latch(&mut self, port: Port) -> Result<u8, DriverError<SPI::Error, CS::Error>> {
        self.read_register(port.latch()).await
    }

    /// Reads the pin levels of `port` (after polarity inversion).
    pub async fn read_port(&mut self, port: Port) -> Result<u8, DriverError<SPI::Error, CS::Error>> {
        self.read_register(port.gpio()).await
    }

    /// Writes the configuration register.
    ///
    /// The register map assumes [`IOCON::BANK`] is never set.
    pub async fn configure(&mut self, iocon: IOCON) -> Result<(), DriverError<SPI::Error, CS::Error>> {
        self.write_register(RegisterAddress::IOCON, iocon.bits())
            .await
    }
}
