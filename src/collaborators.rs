//! Register state owned by the display, sound, and timer units but reachable
//! through the memory bus. The bus holds shared handles to these and forwards
//! the relevant I/O windows to them.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::memory::address;

const LCD_REGISTER_BYTES: usize = (address::LCD_REGISTERS_END + 1) as usize;
const SOUND_REGISTER_BYTES: usize =
    (address::SOUND_REGISTERS_END - address::SOUND_REGISTERS_START + 1) as usize;

/// Display controller registers, 0x000 through 0x057.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LcdData {
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    registers: [u8; LCD_REGISTER_BYTES],
}

impl LcdData {
    pub fn new() -> Self {
        Self { registers: [0; LCD_REGISTER_BYTES] }
    }

    pub(crate) fn read_register(&self, offset: u32) -> u8 {
        self.registers[offset as usize]
    }

    pub(crate) fn write_register(&mut self, offset: u32, value: u8) {
        match offset {
            // DISPSTAT bits 0-2 are hardware status flags
            address::DISPSTAT => {
                let read_only = self.registers[offset as usize] & 0x07;
                self.registers[offset as usize] = (value & !0x07) | read_only;
            }
            // VCOUNT is entirely read-only
            address::VCOUNT | 0x007 => {}
            _ => self.registers[offset as usize] = value,
        }
    }

    /// Set the current scanline. Display unit use only; not reachable from
    /// bus writes.
    pub fn set_vcount(&mut self, line: u8) {
        self.registers[address::VCOUNT as usize] = line;
    }

    /// Set or clear the DISPSTAT status flags (bits 0-2).
    pub fn set_status_flags(&mut self, flags: u8) {
        let byte = &mut self.registers[address::DISPSTAT as usize];
        *byte = (*byte & !0x07) | (flags & 0x07);
    }
}

impl Default for LcdData {
    fn default() -> Self {
        Self::new()
    }
}

/// Sound registers 0x060 through 0x0A7, including the two direct sound FIFOs.
/// FIFO writes are queued rather than stored; the sound unit drains them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApuData {
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    registers: [u8; SOUND_REGISTER_BYTES],
    fifo_a: VecDeque<u8>,
    fifo_b: VecDeque<u8>,
}

impl ApuData {
    pub fn new() -> Self {
        Self { registers: [0; SOUND_REGISTER_BYTES], fifo_a: VecDeque::new(), fifo_b: VecDeque::new() }
    }

    pub(crate) fn read_register(&self, offset: u32) -> u8 {
        // FIFO ports are write-only
        if (address::FIFO_A..address::FIFO_B + 4).contains(&offset) {
            return 0;
        }
        self.registers[(offset - address::SOUND_REGISTERS_START) as usize]
    }

    pub(crate) fn write_register(&mut self, offset: u32, value: u8) {
        match offset {
            address::FIFO_A..=0x0A3 => self.fifo_a.push_back(value),
            address::FIFO_B..=0x0A7 => self.fifo_b.push_back(value),
            _ => self.registers[(offset - address::SOUND_REGISTERS_START) as usize] = value,
        }
    }

    /// Pop the oldest sample byte queued for direct sound channel A.
    pub fn pop_fifo_a(&mut self) -> Option<u8> {
        self.fifo_a.pop_front()
    }

    /// Pop the oldest sample byte queued for direct sound channel B.
    pub fn pop_fifo_b(&mut self) -> Option<u8> {
        self.fifo_b.pop_front()
    }

    pub fn fifo_a_len(&self) -> usize {
        self.fifo_a.len()
    }

    pub fn fifo_b_len(&self) -> usize {
        self.fifo_b.len()
    }
}

impl Default for ApuData {
    fn default() -> Self {
        Self::new()
    }
}

/// One of the four hardware timers. The bus reads the live counter and writes
/// the reload and control registers; counting itself happens in the timer
/// unit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GbaTimer {
    pub counter: u16,
    pub reload: u16,
    pub control: u16,
}

impl GbaTimer {
    pub(crate) fn read_register_byte(&self, offset: u32) -> u8 {
        match offset {
            0 => self.counter as u8,
            1 => (self.counter >> 8) as u8,
            2 => self.control as u8,
            3 => (self.control >> 8) as u8,
            _ => 0,
        }
    }

    pub(crate) fn write_register_byte(&mut self, offset: u32, value: u8) {
        match offset {
            // Counter writes set the reload value, not the counter
            0 => self.reload = (self.reload & 0xFF00) | u16::from(value),
            1 => self.reload = (self.reload & 0x00FF) | u16::from(value) << 8,
            2 => {
                let was_enabled = self.control & 0x0080 != 0;
                self.control = (self.control & 0xFF00) | u16::from(value);
                if !was_enabled && self.control & 0x0080 != 0 {
                    self.counter = self.reload;
                }
            }
            3 => self.control = (self.control & 0x00FF) | u16::from(value) << 8,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispstat_status_bits_are_read_only() {
        let mut lcd = LcdData::new();
        lcd.set_status_flags(0x03);
        lcd.write_register(address::DISPSTAT, 0xFC);

        assert_eq!(0xFF, lcd.read_register(address::DISPSTAT));

        lcd.write_register(address::DISPSTAT, 0x00);
        assert_eq!(0x03, lcd.read_register(address::DISPSTAT));
    }

    #[test]
    fn vcount_ignores_bus_writes() {
        let mut lcd = LcdData::new();
        lcd.set_vcount(0x9F);
        lcd.write_register(address::VCOUNT, 0x12);

        assert_eq!(0x9F, lcd.read_register(address::VCOUNT));
    }

    #[test]
    fn fifo_writes_queue_in_order() {
        let mut apu = ApuData::new();
        apu.write_register(address::FIFO_A, 0x11);
        apu.write_register(address::FIFO_A + 1, 0x22);
        apu.write_register(address::FIFO_B, 0x33);

        assert_eq!(Some(0x11), apu.pop_fifo_a());
        assert_eq!(Some(0x22), apu.pop_fifo_a());
        assert_eq!(None, apu.pop_fifo_a());
        assert_eq!(Some(0x33), apu.pop_fifo_b());
    }

    #[test]
    fn fifo_ports_read_zero() {
        let mut apu = ApuData::new();
        apu.write_register(address::FIFO_A, 0x55);

        assert_eq!(0, apu.read_register(address::FIFO_A));
    }

    #[test]
    fn timer_counter_writes_set_reload() {
        let mut timer = GbaTimer::default();
        timer.write_register_byte(0, 0x34);
        timer.write_register_byte(1, 0x12);

        assert_eq!(0, timer.counter);
        assert_eq!(0x1234, timer.reload);

        // Enabling copies the reload into the counter
        timer.write_register_byte(2, 0x80);
        assert_eq!(0x1234, timer.counter);
    }
}
