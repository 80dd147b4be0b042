use serde::{Deserialize, Serialize};

pub(crate) const BANK_SIZE: usize = 0x1_0000;
pub(crate) const SECTOR_SIZE: usize = 0x1000;

const COMMAND_PORT: u32 = 0x5555;
const UNLOCK_PORT: u32 = 0x2AAA;

// Manufacturer/device ID pairs reported in ID mode
const SST_64K_ID: (u8, u8) = (0xBF, 0xD4);
const MACRONIX_128K_ID: (u8, u8) = (0xC2, 0x09);

/// Progress through the two-byte unlock prefix (0xAA to 0x5555, 0x55 to
/// 0x2AAA) that guards every command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum CommandState {
    Ready,
    PrefixOne,
    PrefixTwo,
}

/// Commands that consume the write following the command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum PendingOp {
    ProgramByte,
    SelectBank,
}

/// Flash RAM chip: one or two 64K banks of byte-programmable storage with
/// sector/chip erase. Programming can only clear bits; erase sets a region
/// back to 0xFF. Bank bytes are stored contiguously on the heap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FlashChip {
    banks: Vec<u8>,
    two_banks: bool,
    active_bank: usize,
    command: CommandState,
    pending: Option<PendingOp>,
    erase_armed: bool,
    id_mode: bool,
}

impl FlashChip {
    pub(crate) fn new(two_banks: bool) -> Self {
        let bank_count = if two_banks { 2 } else { 1 };
        Self {
            banks: vec![0xFF; bank_count * BANK_SIZE],
            two_banks,
            active_bank: 0,
            command: CommandState::Ready,
            pending: None,
            erase_armed: false,
            id_mode: false,
        }
    }

    pub(crate) fn two_banks(&self) -> bool {
        self.two_banks
    }

    pub(crate) fn read_byte(&self, offset: u32) -> u8 {
        let offset = (offset as usize) & (BANK_SIZE - 1);

        if self.id_mode {
            let (manufacturer, device) = if self.two_banks { MACRONIX_128K_ID } else { SST_64K_ID };
            match offset {
                0 => return manufacturer,
                1 => return device,
                _ => {}
            }
        }

        self.banks[self.active_bank * BANK_SIZE + offset]
    }

    pub(crate) fn write_byte(&mut self, offset: u32, value: u8) {
        let offset = offset & (BANK_SIZE as u32 - 1);

        if let Some(op) = self.pending.take() {
            match op {
                PendingOp::ProgramByte => {
                    // Programming can only clear bits until the sector is erased
                    let byte = &mut self.banks[self.active_bank * BANK_SIZE + offset as usize];
                    *byte &= value;
                    log::trace!("flash byte programmed at {offset:04X}");
                }
                PendingOp::SelectBank => {
                    if offset == 0 {
                        self.active_bank = usize::from(value & 0x01);
                        log::trace!("flash bank switched to {}", self.active_bank);
                    }
                }
            }
            return;
        }

        self.command = match self.command {
            CommandState::Ready => {
                if offset == COMMAND_PORT && value == 0xAA {
                    CommandState::PrefixOne
                } else {
                    CommandState::Ready
                }
            }
            CommandState::PrefixOne => {
                if offset == UNLOCK_PORT && value == 0x55 {
                    CommandState::PrefixTwo
                } else {
                    CommandState::Ready
                }
            }
            CommandState::PrefixTwo => {
                self.dispatch_command(offset, value);
                CommandState::Ready
            }
        };
    }

    fn dispatch_command(&mut self, offset: u32, value: u8) {
        match (offset, value) {
            (COMMAND_PORT, 0x90) => self.id_mode = true,
            (COMMAND_PORT, 0xF0) => self.id_mode = false,
            (COMMAND_PORT, 0x80) => {
                self.erase_armed = true;
                return;
            }
            (COMMAND_PORT, 0x10) if self.erase_armed => self.erase_chip(),
            (_, 0x30) if self.erase_armed => self.erase_sector(offset),
            (COMMAND_PORT, 0xA0) => self.pending = Some(PendingOp::ProgramByte),
            (COMMAND_PORT, 0xB0) if self.two_banks => self.pending = Some(PendingOp::SelectBank),
            _ => {
                log::trace!("ignoring unexpected flash command {value:02X} at {offset:04X}");
            }
        }

        self.erase_armed = false;
    }

    fn erase_chip(&mut self) {
        self.banks.fill(0xFF);
        log::trace!("flash chip erased");
    }

    fn erase_sector(&mut self, offset: u32) {
        let sector_start =
            self.active_bank * BANK_SIZE + ((offset as usize) & !(SECTOR_SIZE - 1));
        self.banks[sector_start..sector_start + SECTOR_SIZE].fill(0xFF);
        log::trace!("flash sector at {sector_start:05X} erased");
    }

    /// Abort any half-issued command sequence; backing bytes are untouched.
    pub(crate) fn reset_protocol(&mut self) {
        self.command = CommandState::Ready;
        self.pending = None;
        self.erase_armed = false;
        self.id_mode = false;
        self.active_bank = 0;
    }

    pub(crate) fn data(&self) -> Vec<u8> {
        self.banks.clone()
    }

    pub(crate) fn load_data(&mut self, bytes: &[u8]) {
        if bytes.len() != self.banks.len() {
            log::warn!("ignoring flash save data with unexpected length {}", bytes.len());
            return;
        }

        self.banks.copy_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue_command(flash: &mut FlashChip, offset: u32, command: u8) {
        flash.write_byte(COMMAND_PORT, 0xAA);
        flash.write_byte(UNLOCK_PORT, 0x55);
        flash.write_byte(offset, command);
    }

    fn program_byte(flash: &mut FlashChip, offset: u32, value: u8) {
        issue_command(flash, COMMAND_PORT, 0xA0);
        flash.write_byte(offset, value);
    }

    #[test]
    fn program_can_only_clear_bits() {
        let mut flash = FlashChip::new(false);

        program_byte(&mut flash, 0x1234, 0x3C);
        assert_eq!(0x3C, flash.read_byte(0x1234));

        // Second program ANDs with the existing content
        program_byte(&mut flash, 0x1234, 0xF0);
        assert_eq!(0x30, flash.read_byte(0x1234));
    }

    #[test]
    fn sector_erase() {
        let mut flash = FlashChip::new(false);

        program_byte(&mut flash, 0x2000, 0x00);
        program_byte(&mut flash, 0x2FFF, 0x00);
        program_byte(&mut flash, 0x3000, 0x00);

        issue_command(&mut flash, COMMAND_PORT, 0x80);
        issue_command(&mut flash, 0x2000, 0x30);

        assert_eq!(0xFF, flash.read_byte(0x2000));
        assert_eq!(0xFF, flash.read_byte(0x2FFF));
        // Neighboring sector untouched
        assert_eq!(0x00, flash.read_byte(0x3000));
    }

    #[test]
    fn chip_erase() {
        let mut flash = FlashChip::new(true);

        program_byte(&mut flash, 0x0000, 0x00);
        issue_command(&mut flash, COMMAND_PORT, 0xB0);
        flash.write_byte(0x0000, 0x01);
        program_byte(&mut flash, 0x8000, 0x00);

        issue_command(&mut flash, COMMAND_PORT, 0x80);
        issue_command(&mut flash, COMMAND_PORT, 0x10);

        assert_eq!(0xFF, flash.read_byte(0x8000));
        issue_command(&mut flash, COMMAND_PORT, 0xB0);
        flash.write_byte(0x0000, 0x00);
        assert_eq!(0xFF, flash.read_byte(0x0000));
    }

    #[test]
    fn erase_requires_arming() {
        let mut flash = FlashChip::new(false);

        program_byte(&mut flash, 0x0100, 0x00);

        // 0x30 without a preceding 0x80 must be ignored
        issue_command(&mut flash, 0x0000, 0x30);

        assert_eq!(0x00, flash.read_byte(0x0100));
    }

    #[test]
    fn id_mode() {
        let mut flash = FlashChip::new(false);

        issue_command(&mut flash, COMMAND_PORT, 0x90);
        assert_eq!(0xBF, flash.read_byte(0));
        assert_eq!(0xD4, flash.read_byte(1));

        issue_command(&mut flash, COMMAND_PORT, 0xF0);
        assert_eq!(0xFF, flash.read_byte(0));

        let mut large = FlashChip::new(true);
        issue_command(&mut large, COMMAND_PORT, 0x90);
        assert_eq!(0xC2, large.read_byte(0));
        assert_eq!(0x09, large.read_byte(1));
    }

    #[test]
    fn bank_switching() {
        let mut flash = FlashChip::new(true);

        program_byte(&mut flash, 0x0042, 0x11);

        issue_command(&mut flash, COMMAND_PORT, 0xB0);
        flash.write_byte(0x0000, 0x01);
        assert_eq!(0xFF, flash.read_byte(0x0042));

        program_byte(&mut flash, 0x0042, 0x22);

        issue_command(&mut flash, COMMAND_PORT, 0xB0);
        flash.write_byte(0x0000, 0x00);
        assert_eq!(0x11, flash.read_byte(0x0042));
    }

    #[test]
    fn bank_switch_ignored_on_single_bank_chip() {
        let mut flash = FlashChip::new(false);
        program_byte(&mut flash, 0x0042, 0x33);

        issue_command(&mut flash, COMMAND_PORT, 0xB0);
        flash.write_byte(0x0000, 0x01);

        assert_eq!(0x33, flash.read_byte(0x0042));
    }

    #[test]
    fn save_data_round_trip() {
        let mut flash = FlashChip::new(true);
        program_byte(&mut flash, 0x0010, 0x5A);

        let saved = flash.data();
        assert_eq!(2 * BANK_SIZE, saved.len());

        let mut restored = FlashChip::new(true);
        restored.load_data(&saved);
        assert_eq!(0x5A, restored.read_byte(0x0010));
    }
}
