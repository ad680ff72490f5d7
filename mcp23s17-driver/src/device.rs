use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;

use crate::bus::{BusConfig, SpiHost};
use crate::Mcp23s17;

/// Address byte of a chip with A2..A0 tied low (`0100 A2 A1 A0 R/W`).
pub const DEFAULT_ADDRESS: u8 = 0x40;
pub const DEFAULT_CHIP_SELECT_PIN: u8 = 5;

/// Host side copy of the pin configuration, port B in the upper byte.
///
/// Recorded when the device is constructed and never updated afterwards, the
/// chip is the only authority on its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShadowState {
    /// Direction bits, 1 = input. Defaults to all outputs.
    pub mode: u16,
    /// Output levels. Defaults to all off.
    pub output: u16,
    /// Pull-up enables. Defaults to none.
    pub pullup: u16,
    /// Input inversion. Defaults to none.
    pub invert: u16,
}

/// A MCP23S17 that is not yet bound to a bus.
///
/// Holds what is fixed for the lifetime of the chip: its address byte, the
/// pin number of its chip select line and the initial [`ShadowState`]. Call
/// [`begin`](Self::begin) or [`begin_with`](Self::begin_with) to get a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mcp23s17Device {
    address: u8,
    chip_select: u8,
    shadow: ShadowState,
}

impl Default for Mcp23s17Device {
    fn default() -> Self {
        Mcp23s17Device::new(
            DEFAULT_ADDRESS,
            DEFAULT_CHIP_SELECT_PIN,
            ShadowState::default(),
        )
    }
}

impl Mcp23s17Device {
    pub const fn new(address: u8, chip_select: u8, shadow: ShadowState) -> Self {
        Mcp23s17Device {
            address,
            chip_select,
            shadow,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn chip_select(&self) -> u8 {
        self.chip_select
    }

    pub fn shadow(&self) -> &ShadowState {
        &self.shadow
    }

    /// Binds the device to the default wiring: bus 0, SCK on pin 2, MOSI on
    /// pin 3, MISO on pin 4, clocked at 100 kHz.
    pub fn begin<H, D>(
        self,
        host: &mut H,
        delay: D,
    ) -> Result<Mcp23s17<H::Bus, H::ChipSelect, D>, BeginError<H::Error, ChipSelectError<H>>>
    where
        H: SpiHost,
        D: DelayNs,
    {
        self.begin_with(host, BusConfig::default(), delay)
    }

    /// Binds the device to the bus described by `config`.
    ///
    /// The chip select pin stays the one given at construction. Chip select is
    /// driven high before this returns, so the chip is deselected until the
    /// first register operation.
    pub fn begin_with<H, D>(
        self,
        host: &mut H,
        config: BusConfig,
        delay: D,
    ) -> Result<Mcp23s17<H::Bus, H::ChipSelect, D>, BeginError<H::Error, ChipSelectError<H>>>
    where
        H: SpiHost,
        D: DelayNs,
    {
        log::debug!(
            "mcp23s17 {:#04x}: {:?} at {} Hz, chip select on pin {}",
            self.address,
            config.bus,
            config.baud_rate_hz,
            self.chip_select
        );

        let spi = host.init_bus(&config).map_err(BeginError::Host)?;
        let mut chip_select = host
            .init_chip_select(self.chip_select)
            .map_err(BeginError::Host)?;
        chip_select.set_high().map_err(BeginError::ChipSelect)?;

        Ok(Mcp23s17::bound(
            spi,
            chip_select,
            delay,
            self.address,
            self.chip_select,
            self.shadow,
        ))
    }
}

type ChipSelectError<H> = <<H as SpiHost>::ChipSelect as embedded_hal::digital::ErrorType>::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginError<H, P> {
    // Bus or pin initialisation failed on the host
    Host(H),
    // Could not drive chip select to its idle level
    ChipSelect(P),
}

impl<H: core::fmt::Debug, P: core::fmt::Debug> core::fmt::Display for BeginError<H, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BeginError::Host(e) => write!(f, "bus initialisation failed: {:?}", e),
            BeginError::ChipSelect(e) => write!(f, "chip select error: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{BusEvent, Simulator};
    use crate::{RegisterAddress, SpiId, MCP23S17_FRAME_FORMAT};
    use embedded_hal::digital::PinState;

    #[test]
    fn begin_leaves_chip_select_idle_high() {
        let sim = Simulator::new();
        let mcp = Mcp23s17Device::default()
            .begin(&mut sim.host(), sim.delay())
            .unwrap();

        let config = sim.bus_config().unwrap();
        assert_eq!(config.baud_rate_hz, 100_000);
        assert_eq!(config.bus, SpiId::Spi0);
        assert_eq!(config.format(), MCP23S17_FRAME_FORMAT);
        assert_eq!(sim.chip_select_pin(), Some(DEFAULT_CHIP_SELECT_PIN));
        assert_eq!(sim.chip_select(), Some(PinState::High));

        // Nothing has been clocked yet
        assert!(sim
            .events()
            .iter()
            .all(|event| matches!(event, BusEvent::Configured(_) | BusEvent::Deselect)));
        assert_eq!(sim.frames(), 0);

        assert_eq!(mcp.address(), DEFAULT_ADDRESS);
        assert_eq!(mcp.chip_select_pin(), DEFAULT_CHIP_SELECT_PIN);
    }

    #[test]
    fn begin_with_keeps_the_constructed_chip_select() {
        let sim = Simulator::new();
        let config = BusConfig::new(SpiId::Spi1, 10, 11, 12, 1_000_000);
        let _mcp = Mcp23s17Device::new(0x42, 17, ShadowState::default())
            .begin_with(&mut sim.host(), config, sim.delay())
            .unwrap();

        assert_eq!(sim.bus_config(), Some(config));
        assert_eq!(sim.chip_select_pin(), Some(17));
        assert_eq!(sim.chip_select(), Some(PinState::High));
    }

    #[test]
    fn failing_host_is_reported() {
        let sim = Simulator::new();
        let mut host = sim.host();
        host.fail_bus_init();

        let result = Mcp23s17Device::default().begin(&mut host, sim.delay());
        assert!(matches!(result, Err(BeginError::Host(_))));
        assert_eq!(sim.chip_select(), None);
    }

    #[test]
    fn shadow_state_is_a_construction_time_hint() {
        let shadow = ShadowState {
            mode: 0xFF00,
            output: 0x00AA,
            pullup: 0xFF00,
            invert: 0x0F00,
        };
        let sim = Simulator::new();
        let mut mcp = Mcp23s17Device::new(DEFAULT_ADDRESS, DEFAULT_CHIP_SELECT_PIN, shadow)
            .begin(&mut sim.host(), sim.delay())
            .unwrap();

        async_std::task::block_on(mcp.write_register(RegisterAddress::IODIRB, 0x00)).unwrap();

        // Not updated by register writes
        assert_eq!(*mcp.shadow(), shadow);
        assert_eq!(sim.register(RegisterAddress::IODIRB), 0x00);
    }
}
