//! Bot Protocol
//!
//! Service identifier, command opcodes and the status byte table of the
//! push-button bots.

use crate::domain::models::BotStatus;
use crate::infrastructure::bluetooth::adapter::WriteMode;
use uuid::Uuid;

/// Bot BLE Service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xcba20d00_224d_11e6_9fb8_0002a5d5c51b);

/// Commands understood by the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Press the button (or toggle, in switch mode)
    Press,
    /// Ask for device info; doubles as a liveness check
    GetInfo,
}

impl BotCommand {
    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Press => &[0x57, 0x01, 0x00],
            Self::GetInfo => &[0x57, 0x02, 0x00],
        }
    }

    /// GetInfo is acknowledged so a dropped peripheral fails the write
    pub fn write_mode(&self) -> WriteMode {
        match self {
            Self::Press => WriteMode::WithoutResponse,
            Self::GetInfo => WriteMode::WithResponse,
        }
    }
}

/// Map a raw status byte from a notification to its meaning.
///
/// Unknown bytes are a generic error, never success.
pub fn status_from_byte(byte: u8) -> BotStatus {
    match byte {
        0x01 => BotStatus::Ok,
        0x02 => BotStatus::Error,
        0x03 => BotStatus::Busy,
        0x04 => BotStatus::VersionIncompatible,
        0x05 => BotStatus::UnsupportedCommand,
        0x06 => BotStatus::LowBattery,
        0x07 => BotStatus::DeviceEncrypted,
        0x08 => BotStatus::DeviceUnencrypted,
        0x09 => BotStatus::PasswordError,
        0x0A => BotStatus::UnsupportedEncryption,
        0x0B => BotStatus::NoNearbyDevice,
        0x0C => BotStatus::NoNetwork,
        _ => BotStatus::Error,
    }
}

/// Status byte carried by a notification payload, if any
pub fn status_byte(payload: &[u8]) -> Option<u8> {
    payload.first().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_info_is_acknowledged() {
        assert_eq!(BotCommand::GetInfo.write_mode(), WriteMode::WithResponse);
        assert_eq!(BotCommand::Press.write_mode(), WriteMode::WithoutResponse);
    }

    #[test]
    fn test_service_uuid() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "cba20d00-224d-11e6-9fb8-0002a5d5c51b"
        );
    }

    #[test]
    fn test_command_bytes() {
        assert_eq!(BotCommand::Press.as_bytes(), &[0x57, 0x01, 0x00]);
        assert_eq!(BotCommand::GetInfo.as_bytes(), &[0x57, 0x02, 0x00]);
    }

    #[test]
    fn test_documented_status_bytes() {
        let table = [
            (0x01, BotStatus::Ok),
            (0x02, BotStatus::Error),
            (0x03, BotStatus::Busy),
            (0x04, BotStatus::VersionIncompatible),
            (0x05, BotStatus::UnsupportedCommand),
            (0x06, BotStatus::LowBattery),
            (0x07, BotStatus::DeviceEncrypted),
            (0x08, BotStatus::DeviceUnencrypted),
            (0x09, BotStatus::PasswordError),
            (0x0A, BotStatus::UnsupportedEncryption),
            (0x0B, BotStatus::NoNearbyDevice),
            (0x0C, BotStatus::NoNetwork),
        ];
        for (byte, status) in table {
            assert_eq!(status_from_byte(byte), status, "byte {byte:#04x}");
        }
    }

    #[test]
    fn test_undefined_bytes_are_errors() {
        for byte in std::iter::once(0x00).chain(0x0D..=0xFF) {
            assert_eq!(status_from_byte(byte), BotStatus::Error, "byte {byte:#04x}");
        }
    }

    #[test]
    fn test_status_byte() {
        assert_eq!(status_byte(&[0x03, 0x10]), Some(0x03));
        assert_eq!(status_byte(&[]), None);
    }
}
