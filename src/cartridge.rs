//! Cartridge image loading and hardware detection.
//!
//! Beyond the ROM bytes themselves, a cartridge determines which backup chip
//! and which GPIO peripheral (if any) are present. Both are detected from the
//! image: the backup chip from save-library version strings and the GPIO
//! peripheral from the game code in the header.

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::memory::address;
use crate::memory::backup::{self, BackupType};
use crate::memory::gpio::GpioType;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading cartridge file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("cartridge file '{path}' is empty")]
    Empty { path: String },
}

#[derive(Debug, Clone)]
pub struct Cartridge {
    rom: Vec<u8>,
    backup_type: BackupType,
    gpio_type: GpioType,
}

impl Cartridge {
    /// Wrap a ROM image, detecting the backup chip and GPIO peripheral from
    /// its contents.
    pub fn new(rom: Vec<u8>) -> Self {
        let backup_type = backup::detect_backup_type(&rom);
        let gpio_type = detect_gpio_type(&rom);
        Self { rom, backup_type, gpio_type }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let rom = std::fs::read(path).map_err(|source| LoadError::FileRead {
            path: path.display().to_string(),
            source,
        })?;

        if rom.is_empty() {
            return Err(LoadError::Empty { path: path.display().to_string() });
        }

        let cartridge = Self::new(rom);
        log::info!(
            "loaded '{}' ({} bytes), title '{}', backup {:?}, gpio {:?}",
            path.display(),
            cartridge.rom.len(),
            cartridge.title(),
            cartridge.backup_type,
            cartridge.gpio_type
        );
        Ok(cartridge)
    }

    /// Override the detected backup chip.
    pub fn with_backup_type(mut self, backup_type: BackupType) -> Self {
        self.backup_type = backup_type;
        self
    }

    /// Override the detected GPIO peripheral.
    pub fn with_gpio_type(mut self, gpio_type: GpioType) -> Self {
        self.gpio_type = gpio_type;
        self
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn backup_type(&self) -> BackupType {
        self.backup_type
    }

    pub fn gpio_type(&self) -> GpioType {
        self.gpio_type
    }

    /// Game title from the header, trimmed of NUL padding.
    pub fn title(&self) -> String {
        header_string(&self.rom, address::HEADER_TITLE_START, address::HEADER_TITLE_END)
    }

    /// Four-character game code from the header.
    pub fn game_code(&self) -> String {
        header_string(&self.rom, address::HEADER_GAME_CODE_START, address::HEADER_GAME_CODE_END)
    }

    pub(crate) fn into_rom(self) -> Vec<u8> {
        self.rom
    }
}

fn header_string(rom: &[u8], start: usize, end: usize) -> String {
    let bytes = rom.get(start..end.min(rom.len())).unwrap_or(&[]);
    bytes
        .iter()
        .copied()
        .take_while(|&b| b != 0)
        .map(|b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

/// Determine the GPIO peripheral from the game code. Only a small fixed set
/// of cartridges carried extra hardware.
fn detect_gpio_type(rom: &[u8]) -> GpioType {
    let start = address::HEADER_GAME_CODE_START;
    let Some(code) = rom.get(start..start + 4) else { return GpioType::Disabled };

    match code {
        // Boktai series (solar sensor also has an RTC, but light sensing is
        // the part games cannot run without)
        [b'U', b'3', ..] => GpioType::SolarSensor,
        // WarioWare: Twisted
        b"RZWE" | b"RZWJ" | b"RZWP" => GpioType::GyroSensor,
        // Drill Dozer
        b"V49E" | b"V49J" | b"V49P" => GpioType::Rumble,
        // Pokemon Ruby/Sapphire/Emerald
        [b'A', b'X', b'V', _] | [b'A', b'X', b'P', _] | [b'B', b'P', b'E', _] => GpioType::Rtc,
        _ => GpioType::Disabled,
    }
}
