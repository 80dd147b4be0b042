//! Game Boy Advance memory subsystem: the full address space with hardware
//! mirroring, the four-channel DMA engine, cartridge backup storage (EEPROM,
//! Flash, SRAM), and the cartridge GPIO port.
//!
//! The [`Mmu`] is the central type. Construct one with shared handles to the
//! display, sound, and timer register blocks, load a BIOS image and a
//! [`Cartridge`], and route all CPU bus traffic through its `read_*`/`write_*`
//! methods.

mod cartridge;
mod collaborators;
mod interrupts;
mod memory;
mod serialize;

pub use crate::cartridge::{Cartridge, LoadError};
pub use crate::collaborators::{ApuData, GbaTimer, LcdData};
pub use crate::interrupts::InterruptType;
pub use crate::memory::address::MemoryRegion;
pub use crate::memory::backup::{determine_backup_path, BackupType, PersistenceError};
pub use crate::memory::gpio::GpioType;
pub use crate::memory::{AccessKind, Mmu};
pub use crate::serialize::{determine_save_state_path, load_state, save_state, SaveStateError};
