//! Diagnostic Trouble Codes (DM1/DM2/DM3/DM11, ISO 11783-12 / J1939-73).

/// How the occurrence counter behaves: per the standard, most DTCs use the
/// newer counting method, but a legacy method is retained for compatibility
/// with older ECUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMethod {
    Legacy,
    Current,
}

/// A single active or previously-active diagnostic trouble code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtc {
    /// Suspect Parameter Number (19 bits).
    pub spn: u32,
    /// Failure Mode Identifier (5 bits).
    pub fmi: u8,
    /// Occurrence count (7 bits), saturating at 126; 127 means "not
    /// available".
    pub occurrence_count: u8,
    pub conversion_method: ConversionMethod,
}

impl Dtc {
    /// Decode a DM1/DM2-style 4-byte DTC record.
    ///
    /// Layout: `SPN[7:0] | SPN[15:8] | SPN[18:16] (bits 5..7) FMI (bits 0..4) | CM (bit 7) OC (bits 0..6)`.
    pub fn decode(bytes: [u8; 4]) -> Self {
        let spn_low = bytes[0] as u32;
        let spn_mid = bytes[1] as u32;
        let spn_high = (bytes[2] >> 5) as u32;
        let fmi = bytes[2] & 0x1F;
        let conversion_method = if bytes[3] & 0x80 != 0 {
            ConversionMethod::Current
        } else {
            ConversionMethod::Legacy
        };
        let occurrence_count = bytes[3] & 0x7F;

        Self {
            spn: spn_low | (spn_mid << 8) | (spn_high << 16),
            fmi,
            occurrence_count,
            conversion_method,
        }
    }

    /// Encode to the 4-byte wire representation used by DM1/DM2/DM3/DM11.
    pub fn encode(&self) -> [u8; 4] {
        let spn_low = (self.spn & 0xFF) as u8;
        let spn_mid = ((self.spn >> 8) & 0xFF) as u8;
        let spn_high = ((self.spn >> 16) & 0x7) as u8;
        let byte2 = (spn_high << 5) | (self.fmi & 0x1F);
        let cm_bit = matches!(self.conversion_method, ConversionMethod::Current) as u8;
        let byte3 = (cm_bit << 7) | (self.occurrence_count & 0x7F);
        [spn_low, spn_mid, byte2, byte3]
    }
}

/// The four J1939 malfunction indicator lamps, each with a 2-bit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampStatus {
    Off,
    On,
    Reserved,
    NotAvailable,
}

impl LampStatus {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Off,
            0b01 => Self::On,
            0b10 => Self::Reserved,
            _ => Self::NotAvailable,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::Off => 0b00,
            Self::On => 0b01,
            Self::Reserved => 0b10,
            Self::NotAvailable => 0b11,
        }
    }
}

/// The lamp status word that prefixes every DM1/DM2 message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticLamps {
    pub malfunction_indicator: LampStatus,
    pub red_stop: LampStatus,
    pub amber_warning: LampStatus,
    pub protect: LampStatus,
}

impl DiagnosticLamps {
    pub fn decode(bytes: [u8; 2]) -> Self {
        Self {
            malfunction_indicator: LampStatus::from_bits(bytes[0] >> 6),
            red_stop: LampStatus::from_bits(bytes[0] >> 4),
            amber_warning: LampStatus::from_bits(bytes[0] >> 2),
            protect: LampStatus::from_bits(bytes[0]),
        }
    }

    pub fn encode(&self) -> [u8; 2] {
        let byte0 = (self.malfunction_indicator.to_bits() << 6)
            | (self.red_stop.to_bits() << 4)
            | (self.amber_warning.to_bits() << 2)
            | self.protect.to_bits();
        [byte0, 0xFF]
    }
}

impl Default for DiagnosticLamps {
    fn default() -> Self {
        Self {
            malfunction_indicator: LampStatus::Off,
            red_stop: LampStatus::Off,
            amber_warning: LampStatus::Off,
            protect: LampStatus::Off,
        }
    }
}

/// Flash state for one of the four DM1/DM2 lamps, packed 2 bits wide the
/// same way as [`LampStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LampFlash {
    Solid,
    SlowFlash,
    FastFlash,
    Reserved,
}

impl LampFlash {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Solid,
            0b01 => Self::SlowFlash,
            0b10 => Self::FastFlash,
            _ => Self::Reserved,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::Solid => 0b00,
            Self::SlowFlash => 0b01,
            Self::FastFlash => 0b10,
            Self::Reserved => 0b11,
        }
    }
}

/// The flash-state word that follows [`DiagnosticLamps`] in a DM1/DM2
/// message, one 2-bit field per lamp in the same bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampFlashState {
    pub malfunction_indicator: LampFlash,
    pub red_stop: LampFlash,
    pub amber_warning: LampFlash,
    pub protect: LampFlash,
}

impl LampFlashState {
    pub fn decode(bytes: [u8; 2]) -> Self {
        Self {
            malfunction_indicator: LampFlash::from_bits(bytes[0] >> 6),
            red_stop: LampFlash::from_bits(bytes[0] >> 4),
            amber_warning: LampFlash::from_bits(bytes[0] >> 2),
            protect: LampFlash::from_bits(bytes[0]),
        }
    }

    pub fn encode(&self) -> [u8; 2] {
        let byte0 = (self.malfunction_indicator.to_bits() << 6)
            | (self.red_stop.to_bits() << 4)
            | (self.amber_warning.to_bits() << 2)
            | self.protect.to_bits();
        [byte0, 0xFF]
    }
}

impl Default for LampFlashState {
    fn default() -> Self {
        Self {
            malfunction_indicator: LampFlash::Solid,
            red_stop: LampFlash::Solid,
            amber_warning: LampFlash::Solid,
            protect: LampFlash::Solid,
        }
    }
}
