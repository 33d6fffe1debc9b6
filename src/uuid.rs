//! Short-form Bluetooth UUID helpers.
//!
//! Assigned numbers (e.g. `180D`, the heart rate service) are 16 or 32 bit
//! aliases of a UUID built on the Bluetooth base UUID. Platform APIs print and
//! accept the short form, so adapters need to go both ways.

use uuid::Uuid;

const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5f9b_34fb;
const BASE_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffff_ffff_ffff;

pub trait ShortUuid: Sized {
    fn from_u16(short: u16) -> Self;

    fn from_u32(short: u32) -> Self;

    /// The 32 bit alias, if this UUID lives on the Bluetooth base.
    fn to_u32(&self) -> Option<u32>;

    /// `180D` style for assigned numbers, the full hyphenated form otherwise.
    fn to_short_string(&self) -> String;

    /// Parses both the short (4 or 8 hex digits) and the full form.
    fn from_short_string(value: &str) -> Option<Self>;
}

impl ShortUuid for Uuid {
    fn from_u16(short: u16) -> Self {
        Self::from_u32(short as u32)
    }

    fn from_u32(short: u32) -> Self {
        Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
    }

    fn to_u32(&self) -> Option<u32> {
        let value = self.as_u128();
        if value & BASE_MASK == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }

    fn to_short_string(&self) -> String {
        match self.to_u32() {
            Some(short) if short <= u16::MAX as u32 => format!("{short:04X}"),
            Some(short) => format!("{short:08X}"),
            None => self.hyphenated().to_string().to_uppercase(),
        }
    }

    fn from_short_string(value: &str) -> Option<Self> {
        match value.len() {
            4 => u16::from_str_radix(value, 16).ok().map(Uuid::from_u16),
            8 => u32::from_str_radix(value, 16).ok().map(Uuid::from_u32),
            _ => Uuid::parse_str(value).ok(),
        }
    }
}
