use serde::{Deserialize, Serialize};

//
// Region sizes
//

pub const BIOS_SIZE: usize = 0x4000;
pub const EWRAM_SIZE: usize = 0x4_0000;
pub const IWRAM_SIZE: usize = 0x8000;
pub const IO_SIZE: usize = 0x400;
pub const PALETTE_SIZE: usize = 0x400;
pub const VRAM_SIZE: usize = 0x1_8000;
pub const OAM_SIZE: usize = 0x400;
pub const SRAM_SIZE: usize = 0x8000;

pub const IO_START: u32 = 0x0400_0000;

//
// I/O register offsets (relative to IO_START)
//

pub const DISPSTAT: u32 = 0x004;
pub const VCOUNT: u32 = 0x006;
pub const LCD_REGISTERS_END: u32 = 0x057;

pub const SOUND_REGISTERS_START: u32 = 0x060;
pub const FIFO_A: u32 = 0x0A0;
pub const FIFO_B: u32 = 0x0A4;
pub const SOUND_REGISTERS_END: u32 = 0x0A7;

pub const DMA_REGISTERS_START: u32 = 0x0B0;
pub const DMA_REGISTERS_END: u32 = 0x0DF;
pub const DMA_CHANNEL_SPAN: u32 = 0x0C;

pub const TIMER_REGISTERS_START: u32 = 0x100;
pub const TIMER_REGISTERS_END: u32 = 0x10F;

pub const KEYINPUT: u32 = 0x130;

pub const IE: u32 = 0x200;
pub const IF: u32 = 0x202;
pub const WAITCNT: u32 = 0x204;
pub const IME: u32 = 0x208;

//
// Cartridge header fields (relative to the start of the ROM image)
//

pub const HEADER_TITLE_START: usize = 0xA0;
pub const HEADER_TITLE_END: usize = 0xAC;
pub const HEADER_GAME_CODE_START: usize = 0xAC;
pub const HEADER_GAME_CODE_END: usize = 0xB0;

//
// GPIO register offsets (relative to the start of the ROM image)
//

pub const GPIO_DATA: u32 = 0xC4;
pub const GPIO_DIRECTION: u32 = 0xC6;
pub const GPIO_CONTROL: u32 = 0xC8;
pub const GPIO_WINDOW_END: u32 = 0xCB;

/// A decoded region of the GBA address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryRegion {
    Bios,
    Ewram,
    Iwram,
    Io,
    Palette,
    Vram,
    Oam,
    Rom,
    /// Upper half of the wait-state-2 ROM image; serial EEPROM lives here when
    /// the cartridge has one, otherwise it mirrors ROM.
    EepromWindow,
    /// 0x0E00_0000+; SRAM or Flash depending on the cartridge backup chip.
    SramWindow,
    Unmapped,
}

/// Map an address to its region plus the offset into that region's backing
/// store, applying hardware mirroring.
///
/// `Rom` and `EepromWindow` offsets are both relative to the start of the ROM
/// image so the EEPROM window can fall through to plain ROM reads when no
/// EEPROM chip is present.
pub(crate) fn decode(address: u32) -> (MemoryRegion, u32) {
    match address >> 24 {
        0x00 => {
            if address < BIOS_SIZE as u32 {
                (MemoryRegion::Bios, address)
            } else {
                (MemoryRegion::Unmapped, address)
            }
        }
        0x02 => (MemoryRegion::Ewram, address & (EWRAM_SIZE as u32 - 1)),
        0x03 => (MemoryRegion::Iwram, address & (IWRAM_SIZE as u32 - 1)),
        0x04 => {
            let offset = address & 0x00FF_FFFF;
            if offset < IO_SIZE as u32 {
                (MemoryRegion::Io, offset)
            } else {
                (MemoryRegion::Unmapped, address)
            }
        }
        0x05 => (MemoryRegion::Palette, address & (PALETTE_SIZE as u32 - 1)),
        0x06 => {
            // 96K of VRAM in a 128K window; the upper 32K appears twice
            let mut offset = address & 0x1_FFFF;
            if offset >= VRAM_SIZE as u32 {
                offset -= 0x8000;
            }
            (MemoryRegion::Vram, offset)
        }
        0x07 => (MemoryRegion::Oam, address & (OAM_SIZE as u32 - 1)),
        0x08..=0x0C => (MemoryRegion::Rom, address & 0x01FF_FFFF),
        0x0D => (MemoryRegion::EepromWindow, address & 0x01FF_FFFF),
        0x0E | 0x0F => (MemoryRegion::SramWindow, address & 0xFFFF),
        _ => (MemoryRegion::Unmapped, address),
    }
}
