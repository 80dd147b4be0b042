mod eeprom;
mod flash;

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub(crate) use self::eeprom::Eeprom;
pub(crate) use self::flash::FlashChip;

use crate::memory::address;

/// Save chip family of a loaded cartridge. Fixed for the lifetime of the
/// cartridge; detected by scanning the image for library version strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupType {
    None,
    Eeprom,
    Flash64,
    Flash128,
    Sram,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("error writing backup file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("error reading backup file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Active backup storage. Exactly one variant exists per cartridge; the
/// others hold no state at all, so inactive-chip state can never be consulted
/// by mistake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum BackupMedia {
    None,
    Eeprom(Eeprom),
    Flash(FlashChip),
    Sram(SramChip),
}

impl BackupMedia {
    pub(crate) fn new(backup_type: BackupType) -> Self {
        match backup_type {
            BackupType::None => Self::None,
            BackupType::Eeprom => Self::Eeprom(Eeprom::new()),
            BackupType::Flash64 => Self::Flash(FlashChip::new(false)),
            BackupType::Flash128 => Self::Flash(FlashChip::new(true)),
            BackupType::Sram => Self::Sram(SramChip::new()),
        }
    }

    pub(crate) fn backup_type(&self) -> BackupType {
        match self {
            Self::None => BackupType::None,
            Self::Eeprom(..) => BackupType::Eeprom,
            Self::Flash(flash) => {
                if flash.two_banks() {
                    BackupType::Flash128
                } else {
                    BackupType::Flash64
                }
            }
            Self::Sram(..) => BackupType::Sram,
        }
    }

    /// Reset protocol state machines to their post-load defaults, keeping the
    /// backing bytes.
    pub(crate) fn reset_protocol(&mut self) {
        match self {
            Self::None | Self::Sram(..) => {}
            Self::Eeprom(eeprom) => eeprom.reset_protocol(),
            Self::Flash(flash) => flash.reset_protocol(),
        }
    }

    fn data(&self) -> Option<Vec<u8>> {
        match self {
            Self::None => None,
            Self::Eeprom(eeprom) => Some(eeprom.data().to_vec()),
            Self::Flash(flash) => Some(flash.data()),
            Self::Sram(sram) => Some(sram.data.clone()),
        }
    }

    fn load_data(&mut self, bytes: &[u8]) {
        match self {
            Self::None => {}
            Self::Eeprom(eeprom) => eeprom.load_data(bytes),
            Self::Flash(flash) => flash.load_data(bytes),
            Self::Sram(sram) => {
                if bytes.len() == sram.data.len() {
                    sram.data.copy_from_slice(bytes);
                } else {
                    log::warn!("ignoring SRAM save data with unexpected length {}", bytes.len());
                }
            }
        }
    }

    /// Dump the active chip's backing bytes to a file. A chipless cartridge
    /// has nothing to persist.
    pub(crate) fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistenceError> {
        let Some(bytes) = self.data() else { return Ok(()) };

        std::fs::write(path.as_ref(), bytes).map_err(|source| PersistenceError::Write {
            path: path.as_ref().display().to_string(),
            source,
        })?;

        log::info!("wrote backup data to '{}'", path.as_ref().display());
        Ok(())
    }

    /// Load backing bytes from a file. A missing file is not an error: the
    /// store simply stays in its initial state.
    pub(crate) fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PersistenceError> {
        if !path.as_ref().exists() {
            log::debug!("no backup file at '{}', starting fresh", path.as_ref().display());
            return Ok(());
        }

        let bytes = std::fs::read(path.as_ref()).map_err(|source| PersistenceError::Read {
            path: path.as_ref().display().to_string(),
            source,
        })?;

        self.load_data(&bytes);
        log::info!("loaded backup data from '{}'", path.as_ref().display());
        Ok(())
    }
}

/// Battery-backed static RAM; a direct byte store with no command protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SramChip {
    pub(crate) data: Vec<u8>,
}

impl SramChip {
    fn new() -> Self {
        Self { data: vec![0; address::SRAM_SIZE] }
    }
}

/// Scan a cartridge image for the save-library version strings the official
/// SDK embeds. The first signature found wins; an image without any defaults
/// to SRAM-style direct mapping.
pub(crate) fn detect_backup_type(rom: &[u8]) -> BackupType {
    const SIGNATURES: [(&[u8], BackupType); 5] = [
        (b"EEPROM_V", BackupType::Eeprom),
        (b"SRAM_V", BackupType::Sram),
        (b"FLASH1M_V", BackupType::Flash128),
        (b"FLASH512_V", BackupType::Flash64),
        (b"FLASH_V", BackupType::Flash64),
    ];

    // The SDK aligns the version strings to word boundaries
    for start in (0..rom.len()).step_by(4) {
        for (signature, backup_type) in SIGNATURES {
            if rom[start..].starts_with(signature) {
                log::debug!(
                    "backup signature {} found at {start:06X}, using {backup_type:?}",
                    String::from_utf8_lossy(signature)
                );
                return backup_type;
            }
        }
    }

    log::debug!("no backup signature found, defaulting to SRAM");
    BackupType::Sram
}

/// Conventional location of the backup save file next to the ROM image.
pub fn determine_backup_path<P: AsRef<Path>>(rom_path: P) -> PathBuf {
    rom_path.as_ref().with_extension("sav")
}
