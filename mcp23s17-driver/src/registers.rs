use bitflags::bitflags;

/// Register offsets of the MCP23S17.
///
/// The offsets follow the interleaved layout, i.e. they are only valid while
/// [`IOCON::BANK`] is cleared (the power-on state). Port A and port B registers
/// of a pair sit next to each other.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterAddress {
    /// Direction of port A, 1 = input (default), 0 = output
    IODIRA = 0x00,
    /// Direction of port B
    IODIRB = 0x01,
    /// Input polarity of port A, 1 = a low pin reads as 1
    IPOLA = 0x02,
    /// Input polarity of port B
    IPOLB = 0x03,
    /// Interrupt-on-change enable, port A
    GPINTENA = 0x04,
    /// Interrupt-on-change enable, port B
    GPINTENB = 0x05,
    /// Default compare value for interrupt-on-change, port A
    DEFVALA = 0x06,
    /// Default compare value for interrupt-on-change, port B
    DEFVALB = 0x07,
    /// Interrupt control, port A (1 = compare against DEFVAL, 0 = previous value)
    INTCONA = 0x08,
    /// Interrupt control, port B
    INTCONB = 0x09,
    /// Configuration register
    IOCON = 0x0A,
    /// Configuration register, second address of the same register
    IOCON2 = 0x0B,
    /// 100k pull-ups on port A inputs
    GPPUA = 0x0C,
    /// 100k pull-ups on port B inputs
    GPPUB = 0x0D,
    /// Interrupt flags, port A (read only)
    INTFA = 0x0E,
    /// Interrupt flags, port B (read only)
    INTFB = 0x0F,
    /// Pin values captured at interrupt time, port A (read only)
    INTCAPA = 0x10,
    /// Pin values captured at interrupt time, port B (read only)
    INTCAPB = 0x11,
    /// Port A pins. Writing sets the output latch.
    GPIOA = 0x12,
    /// Port B pins. Writing sets the output latch.
    GPIOB = 0x13,
    /// Output latch A. Reading returns the latch, not the pins.
    OLATA = 0x14,
    /// Output latch B. Reading returns the latch, not the pins.
    OLATB = 0x15,
}

impl RegisterAddress {
    /// Number of distinct register offsets in the interleaved layout.
    pub const COUNT: usize = 22;

    /// Looks up the named register at `offset`, if there is one.
    pub fn from_offset(offset: u8) -> Option<Self> {
        use RegisterAddress as R;

        let register = match offset {
            0x00 => R::IODIRA,
            0x01 => R::IODIRB,
            0x02 => R::IPOLA,
            0x03 => R::IPOLB,
            0x04 => R::GPINTENA,
            0x05 => R::GPINTENB,
            0x06 => R::DEFVALA,
            0x07 => R::DEFVALB,
            0x08 => R::INTCONA,
            0x09 => R::INTCONB,
            0x0A => R::IOCON,
            0x0B => R::IOCON2,
            0x0C => R::GPPUA,
            0x0D => R::GPPUB,
            0x0E => R::INTFA,
            0x0F => R::INTFB,
            0x10 => R::INTCAPA,
            0x11 => R::INTCAPB,
            0x12 => R::GPIOA,
            0x13 => R::GPIOB,
            0x14 => R::OLATA,
            0x15 => R::OLATB,
            _ => return None,
        };
        Some(register)
    }
}

impl From<RegisterAddress> for u8 {
    fn from(register: RegisterAddress) -> u8 {
        register as u8
    }
}

/// One of the two 8 bit ports of the expander.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    A,
    B,
}

impl Port {
    /// Picks the register of a pair that belongs to this port.
    pub(crate) fn select(self, a: RegisterAddress, b: RegisterAddress) -> RegisterAddress {
        match self {
            Port::A => a,
            Port::B => b,
        }
    }

    pub fn direction(self) -> RegisterAddress {
        self.select(RegisterAddress::IODIRA, RegisterAddress::IODIRB)
    }

    pub fn polarity(self) -> RegisterAddress {
        self.select(RegisterAddress::IPOLA, RegisterAddress::IPOLB)
    }

    pub fn pullup(self) -> RegisterAddress {
        self.select(RegisterAddress::GPPUA, RegisterAddress::GPPUB)
    }

    pub fn gpio(self) -> RegisterAddress {
        self.select(RegisterAddress::GPIOA, RegisterAddress::GPIOB)
    }

    pub fn latch(self) -> RegisterAddress {
        self.select(RegisterAddress::OLATA, RegisterAddress::OLATB)
    }
}

bitflags! {
    /// Bits of the configuration register ([`RegisterAddress::IOCON`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IOCON: u8 {
        /// Registers of each port in separate banks. The register map of this
        /// driver assumes this bit stays cleared.
        const BANK = 0b1000_0000;
        /// INTA and INTB are internally connected.
        const MIRROR = 0b0100_0000;
        /// Sequential operation disabled, the address pointer does not increment.
        const SEQOP = 0b0010_0000;
        /// Slew rate control on SDA disabled.
        const DISSLW = 0b0001_0000;
        /// Hardware address pins A2..A0 are compared against the opcode.
        const HAEN = 0b0000_1000;
        /// INT is an open-drain output.
        const ODR = 0b0000_0100;
        /// INT is active-high.
        const INTPOL = 0b0000_0010;
    }
}
