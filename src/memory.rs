//! The memory bus: address decoding, backing stores for the internal RAM
//! regions, I/O register dispatch, the DMA engine, and the cartridge-side
//! hardware (backup chip and GPIO port).
//!
//! All bus traffic goes through [`Mmu`]. The CPU-facing entry points are the
//! `read_*`/`write_*` methods; the `*_fast` variants touch plain storage only
//! and never trigger side effects, for use by debuggers and video/audio
//! renderers that must not disturb hardware state.

pub(crate) mod address;
pub(crate) mod backup;
pub(crate) mod dma;
pub(crate) mod gpio;

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::cartridge::{Cartridge, LoadError};
use crate::collaborators::{ApuData, GbaTimer, LcdData};
use crate::interrupts::InterruptType;
use crate::memory::address::MemoryRegion;
use crate::memory::backup::{BackupMedia, BackupType, PersistenceError};
use crate::memory::dma::{AddressControl, DmaChannel, StartTiming, TransferWidth};
use crate::memory::gpio::{Gpio, GpioType};

/// Whether a bus access continued directly from the previous one. Wait-state
/// counting distinguishes the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKind {
    NonSequential,
    Sequential,
}

const TIMER_COUNT: usize = 4;
const TIMER_REGISTER_SPAN: u32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mmu {
    #[serde(skip)]
    bios: Vec<u8>,
    #[serde(skip)]
    rom: Vec<u8>,
    ewram: Vec<u8>,
    iwram: Vec<u8>,
    vram: Vec<u8>,
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    io: [u8; address::IO_SIZE],
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    palette: [u8; address::PALETTE_SIZE],
    #[serde(
        serialize_with = "crate::serialize::serialize_array",
        deserialize_with = "crate::serialize::deserialize_array"
    )]
    oam: [u8; address::OAM_SIZE],
    backup: BackupMedia,
    gpio: Gpio,
    dma: [DmaChannel; dma::CHANNEL_COUNT],
    interrupt_enable: u16,
    interrupt_flags: u16,
    interrupt_master_enable: bool,
    waitstate_control: u16,
    key_input: u16,
    last_access: Option<(MemoryRegion, u32)>,
    last_access_kind: AccessKind,
    #[serde(skip)]
    lcd: Rc<RefCell<LcdData>>,
    #[serde(skip)]
    apu: Rc<RefCell<ApuData>>,
    #[serde(skip)]
    timers: Rc<RefCell<[GbaTimer; TIMER_COUNT]>>,
}

impl Default for AccessKind {
    fn default() -> Self {
        Self::NonSequential
    }
}

impl Mmu {
    pub fn new(
        lcd: Rc<RefCell<LcdData>>,
        apu: Rc<RefCell<ApuData>>,
        timers: Rc<RefCell<[GbaTimer; TIMER_COUNT]>>,
    ) -> Self {
        Self {
            bios: Vec::new(),
            rom: Vec::new(),
            ewram: vec![0; address::EWRAM_SIZE],
            iwram: vec![0; address::IWRAM_SIZE],
            vram: vec![0; address::VRAM_SIZE],
            io: [0; address::IO_SIZE],
            palette: [0; address::PALETTE_SIZE],
            oam: [0; address::OAM_SIZE],
            backup: BackupMedia::None,
            gpio: Gpio::new(GpioType::Disabled),
            dma: [
                DmaChannel::default(),
                DmaChannel::default(),
                DmaChannel::default(),
                DmaChannel::default(),
            ],
            interrupt_enable: 0,
            interrupt_flags: 0,
            interrupt_master_enable: false,
            waitstate_control: 0,
            key_input: 0x03FF,
            last_access: None,
            last_access_kind: AccessKind::NonSequential,
            lcd,
            apu,
            timers,
        }
    }

    pub fn load_bios<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let path = path.as_ref();
        let mut bios = std::fs::read(path).map_err(|source| LoadError::FileRead {
            path: path.display().to_string(),
            source,
        })?;

        if bios.len() > address::BIOS_SIZE {
            log::warn!("BIOS image is {} bytes, truncating to {}", bios.len(), address::BIOS_SIZE);
            bios.truncate(address::BIOS_SIZE);
        }

        self.bios = bios;
        Ok(())
    }

    /// Install a cartridge, replacing any previous one. The backup chip and
    /// GPIO peripheral are created from the cartridge's detected (or
    /// overridden) types.
    pub fn load_cartridge(&mut self, cartridge: Cartridge) {
        self.backup = BackupMedia::new(cartridge.backup_type());
        self.gpio = Gpio::new(cartridge.gpio_type());
        self.rom = cartridge.into_rom();
    }

    pub fn load_cartridge_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let cartridge = Cartridge::from_file(path)?;
        self.load_cartridge(cartridge);
        Ok(())
    }

    /// Return the bus to its power-on state. BIOS and ROM images stay loaded
    /// and backup chip contents survive, but all RAM, registers, and protocol
    /// state machines are cleared.
    pub fn reset(&mut self) {
        self.ewram.fill(0);
        self.iwram.fill(0);
        self.vram.fill(0);
        self.io.fill(0);
        self.palette.fill(0);
        self.oam.fill(0);
        self.dma = [
            DmaChannel::default(),
            DmaChannel::default(),
            DmaChannel::default(),
            DmaChannel::default(),
        ];
        self.interrupt_enable = 0;
        self.interrupt_flags = 0;
        self.interrupt_master_enable = false;
        self.waitstate_control = 0;
        self.key_input = 0x03FF;
        self.last_access = None;
        self.last_access_kind = AccessKind::NonSequential;
        self.backup.reset_protocol();
        self.gpio = Gpio::new(self.gpio.gpio_type());
    }

    pub fn backup_type(&self) -> BackupType {
        self.backup.backup_type()
    }

    pub fn gpio_type(&self) -> GpioType {
        self.gpio.gpio_type()
    }

    pub fn read_byte(&mut self, address: u32) -> u8 {
        self.classify(address, 1);
        self.read_byte_raw(address)
    }

    pub fn read_halfword(&mut self, address: u32) -> u16 {
        self.classify(address, 2);
        self.read_halfword_inner(address)
    }

    pub fn read_word(&mut self, address: u32) -> u32 {
        self.classify(address, 4);
        let lo = self.read_halfword_inner(address);
        let hi = self.read_halfword_inner(address.wrapping_add(2));
        u32::from(lo) | u32::from(hi) << 16
    }

    pub fn write_byte(&mut self, address: u32, value: u8) {
        self.classify(address, 1);
        self.write_byte_raw(address, value);
    }

    pub fn write_halfword(&mut self, address: u32, value: u16) {
        self.classify(address, 2);
        self.write_halfword_inner(address, value);
    }

    pub fn write_word(&mut self, address: u32, value: u32) {
        self.classify(address, 4);
        self.write_halfword_inner(address, value as u16);
        self.write_halfword_inner(address.wrapping_add(2), (value >> 16) as u16);
    }

    /// Side-effect-free halfword read of plain storage. Serial backup chips
    /// and write-only registers read as zero.
    pub fn read_halfword_fast(&self, address: u32) -> u16 {
        let lo = self.read_byte_raw(address);
        let hi = self.read_byte_raw(address.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    /// Side-effect-free word read of plain storage.
    pub fn read_word_fast(&self, address: u32) -> u32 {
        u32::from(self.read_halfword_fast(address))
            | u32::from(self.read_halfword_fast(address.wrapping_add(2))) << 16
    }

    /// Poke a halfword directly into plain storage, bypassing all register
    /// and protocol handling. Regions with side effects are left untouched.
    pub fn write_halfword_fast(&mut self, address: u32, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_byte_fast(address, lo);
        self.write_byte_fast(address.wrapping_add(1), hi);
    }

    /// Poke a word directly into plain storage.
    pub fn write_word_fast(&mut self, address: u32, value: u32) {
        self.write_halfword_fast(address, value as u16);
        self.write_halfword_fast(address.wrapping_add(2), (value >> 16) as u16);
    }

    pub fn last_access_kind(&self) -> AccessKind {
        self.last_access_kind
    }

    /// Set the raw KEYINPUT value. Bits are active-low (1 = released), bits
    /// 0-9 valid.
    pub fn set_key_input(&mut self, state: u16) {
        self.key_input = state & 0x03FF;
    }

    pub fn raise_interrupt(&mut self, interrupt: InterruptType) {
        self.interrupt_flags |= interrupt.bit();
    }

    /// True when an unmasked interrupt is waiting to be serviced.
    pub fn pending_interrupt(&self) -> bool {
        self.interrupt_master_enable && self.interrupt_enable & self.interrupt_flags != 0
    }

    /// Ambient light level for a solar sensor cartridge, brightest at 0.
    pub fn set_light_level(&mut self, level: u8) {
        self.gpio.set_light_level(level);
    }

    /// Current angular rate sample for a gyro sensor cartridge.
    pub fn set_gyro_rotation(&mut self, rotation: u16) {
        self.gpio.set_gyro_rotation(rotation);
    }

    pub fn rumble_active(&self) -> bool {
        self.gpio.rumble_active()
    }

    pub fn save_backup<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistenceError> {
        self.backup.save_to_file(path)
    }

    pub fn load_backup<P: AsRef<Path>>(&mut self, path: P) -> Result<(), PersistenceError> {
        self.backup.load_from_file(path)
    }

    /// Run every enabled DMA channel that triggers on vertical blank, in
    /// priority order.
    pub fn notify_vblank(&mut self) {
        self.run_timed_channels(StartTiming::VBlank);
    }

    /// Run every enabled DMA channel that triggers on horizontal blank, in
    /// priority order.
    pub fn notify_hblank(&mut self) {
        self.run_timed_channels(StartTiming::HBlank);
    }

    /// Sound FIFO A requested more sample data.
    pub fn notify_fifo_a(&mut self) {
        self.run_fifo_channels(address::IO_START + address::FIFO_A);
    }

    /// Sound FIFO B requested more sample data.
    pub fn notify_fifo_b(&mut self) {
        self.run_fifo_channels(address::IO_START + address::FIFO_B);
    }

    /// Force every enabled channel to run immediately regardless of its
    /// configured timing. Used when skipping the BIOS intro, which leaves
    /// pending transfers that would otherwise never fire.
    pub fn start_blank_dma(&mut self) {
        for index in 0..dma::CHANNEL_COUNT {
            if self.dma[index].enabled() {
                self.run_dma_channel(index);
            }
        }
    }

    pub(crate) fn move_unserializable_fields_from(&mut self, other: Mmu) {
        self.bios = other.bios;
        self.rom = other.rom;
        self.lcd = other.lcd;
        self.apu = other.apu;
        self.timers = other.timers;
    }

    fn classify(&mut self, address: u32, byte_len: u32) {
        let (region, _) = address::decode(address);
        self.last_access_kind = match self.last_access {
            Some((last_region, end)) if last_region == region && end == address => {
                AccessKind::Sequential
            }
            _ => AccessKind::NonSequential,
        };
        self.last_access = Some((region, address.wrapping_add(byte_len)));
    }

    fn read_byte_raw(&self, address: u32) -> u8 {
        let (region, offset) = address::decode(address);
        match region {
            MemoryRegion::Bios => self.bios.get(offset as usize).copied().unwrap_or(0),
            MemoryRegion::Ewram => self.ewram[offset as usize],
            MemoryRegion::Iwram => self.iwram[offset as usize],
            MemoryRegion::Io => self.io_read_byte(offset),
            MemoryRegion::Palette => self.palette[offset as usize],
            MemoryRegion::Vram => self.vram[offset as usize],
            MemoryRegion::Oam => self.oam[offset as usize],
            MemoryRegion::Rom => self.rom_read_byte(offset),
            MemoryRegion::EepromWindow => match &self.backup {
                // Serial chip, bytes are meaningless; non-EEPROM carts show
                // the ROM through this window
                BackupMedia::Eeprom(..) => 0,
                _ => self.rom.get(offset as usize).copied().unwrap_or(0),
            },
            MemoryRegion::SramWindow => match &self.backup {
                BackupMedia::Sram(sram) => sram.data[(offset & 0x7FFF) as usize],
                BackupMedia::Flash(flash) => flash.read_byte(offset),
                _ => 0,
            },
            MemoryRegion::Unmapped => 0,
        }
    }

    fn read_halfword_inner(&mut self, address: u32) -> u16 {
        let (region, _) = address::decode(address);
        if region == MemoryRegion::EepromWindow {
            if let BackupMedia::Eeprom(eeprom) = &mut self.backup {
                return u16::from(eeprom.read_bit());
            }
        }

        let lo = self.read_byte_raw(address);
        let hi = self.read_byte_raw(address.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn write_halfword_inner(&mut self, address: u32, value: u16) {
        let (region, _) = address::decode(address);
        if region == MemoryRegion::EepromWindow {
            if let BackupMedia::Eeprom(eeprom) = &mut self.backup {
                eeprom.write_bit(value & 1 != 0);
                return;
            }
        }

        let [lo, hi] = value.to_le_bytes();
        self.write_byte_raw(address, lo);
        self.write_byte_raw(address.wrapping_add(1), hi);
    }

    fn write_byte_raw(&mut self, address: u32, value: u8) {
        let (region, offset) = address::decode(address);
        match region {
            MemoryRegion::Ewram => self.ewram[offset as usize] = value,
            MemoryRegion::Iwram => self.iwram[offset as usize] = value,
            MemoryRegion::Io => self.io_write_byte(offset, value),
            MemoryRegion::Palette => self.palette[offset as usize] = value,
            MemoryRegion::Vram => self.vram[offset as usize] = value,
            MemoryRegion::Oam => self.oam[offset as usize] = value,
            MemoryRegion::Rom => {
                if self.gpio.present()
                    && (address::GPIO_DATA..=address::GPIO_WINDOW_END).contains(&offset)
                {
                    self.gpio.write_register(offset, value);
                }
            }
            MemoryRegion::SramWindow => match &mut self.backup {
                BackupMedia::Sram(sram) => sram.data[(offset & 0x7FFF) as usize] = value,
                BackupMedia::Flash(flash) => flash.write_byte(offset, value),
                _ => {}
            },
            MemoryRegion::Bios | MemoryRegion::EepromWindow | MemoryRegion::Unmapped => {}
        }
    }

    fn write_byte_fast(&mut self, address: u32, value: u8) {
        let (region, offset) = address::decode(address);
        match region {
            MemoryRegion::Ewram => self.ewram[offset as usize] = value,
            MemoryRegion::Iwram => self.iwram[offset as usize] = value,
            MemoryRegion::Palette => self.palette[offset as usize] = value,
            MemoryRegion::Vram => self.vram[offset as usize] = value,
            MemoryRegion::Oam => self.oam[offset as usize] = value,
            MemoryRegion::SramWindow => {
                if let BackupMedia::Sram(sram) = &mut self.backup {
                    sram.data[(offset & 0x7FFF) as usize] = value;
                }
            }
            _ => {}
        }
    }

    fn rom_read_byte(&self, offset: u32) -> u8 {
        if self.gpio.present() && (address::GPIO_DATA..=address::GPIO_WINDOW_END).contains(&offset)
        {
            if let Some(value) = self.gpio.read_register(offset) {
                return value;
            }
        }

        self.rom.get(offset as usize).copied().unwrap_or(0)
    }

    fn io_read_byte(&self, offset: u32) -> u8 {
        match offset {
            0..=address::LCD_REGISTERS_END => self.lcd.borrow().read_register(offset),
            address::SOUND_REGISTERS_START..=address::SOUND_REGISTERS_END => {
                self.apu.borrow().read_register(offset)
            }
            address::DMA_REGISTERS_START..=address::DMA_REGISTERS_END => {
                let relative = offset - address::DMA_REGISTERS_START;
                let channel = (relative / address::DMA_CHANNEL_SPAN) as usize;
                self.dma[channel].read_register_byte(relative % address::DMA_CHANNEL_SPAN)
            }
            address::TIMER_REGISTERS_START..=address::TIMER_REGISTERS_END => {
                let relative = offset - address::TIMER_REGISTERS_START;
                let timer = (relative / TIMER_REGISTER_SPAN) as usize;
                self.timers.borrow()[timer].read_register_byte(relative % TIMER_REGISTER_SPAN)
            }
            address::KEYINPUT | 0x131 => halfword_byte(self.key_input, offset),
            address::IE | 0x201 => halfword_byte(self.interrupt_enable, offset),
            address::IF | 0x203 => halfword_byte(self.interrupt_flags, offset),
            address::WAITCNT | 0x205 => halfword_byte(self.waitstate_control, offset),
            address::IME => u8::from(self.interrupt_master_enable),
            0x209..=0x20B => 0,
            _ => self.io[offset as usize],
        }
    }

    fn io_write_byte(&mut self, offset: u32, value: u8) {
        match offset {
            0..=address::LCD_REGISTERS_END => {
                self.lcd.borrow_mut().write_register(offset, value);
            }
            address::SOUND_REGISTERS_START..=address::SOUND_REGISTERS_END => {
                self.apu.borrow_mut().write_register(offset, value);
            }
            address::DMA_REGISTERS_START..=address::DMA_REGISTERS_END => {
                self.dma_write_byte(offset, value);
            }
            address::TIMER_REGISTERS_START..=address::TIMER_REGISTERS_END => {
                let relative = offset - address::TIMER_REGISTERS_START;
                let timer = (relative / TIMER_REGISTER_SPAN) as usize;
                self.timers.borrow_mut()[timer]
                    .write_register_byte(relative % TIMER_REGISTER_SPAN, value);
            }
            address::KEYINPUT | 0x131 => {}
            address::IE => {
                self.interrupt_enable = (self.interrupt_enable & 0xFF00) | u16::from(value);
            }
            0x201 => {
                self.interrupt_enable =
                    (self.interrupt_enable & 0x00FF) | u16::from(value & 0x3F) << 8;
            }
            // Acknowledge by writing 1 bits
            address::IF => self.interrupt_flags &= !u16::from(value),
            0x203 => self.interrupt_flags &= !(u16::from(value) << 8),
            address::WAITCNT => {
                self.waitstate_control = (self.waitstate_control & 0xFF00) | u16::from(value);
            }
            0x205 => {
                self.waitstate_control =
                    (self.waitstate_control & 0x00FF) | u16::from(value) << 8;
            }
            address::IME => self.interrupt_master_enable = value & 1 != 0,
            0x209..=0x20B => {}
            _ => self.io[offset as usize] = value,
        }
    }

    fn dma_write_byte(&mut self, offset: u32, value: u8) {
        let relative = offset - address::DMA_REGISTERS_START;
        let index = (relative / address::DMA_CHANNEL_SPAN) as usize;
        let register_offset = relative % address::DMA_CHANNEL_SPAN;

        let was_enabled = self.dma[index].enabled();
        if !self.dma[index].write_register_byte(register_offset, value) {
            return;
        }

        // Control high byte was written: a 0-to-1 enable transition latches
        // the internal pointers and may start the transfer
        let enabled = self.dma[index].enabled();
        if enabled && !was_enabled {
            self.dma[index].latch();
            if self.dma[index].timing() == StartTiming::Immediate {
                self.run_dma_channel(index);
            }
        } else if !enabled {
            self.dma[index].running = false;
        }
    }

    fn run_timed_channels(&mut self, timing: StartTiming) {
        for index in 0..dma::CHANNEL_COUNT {
            if self.dma[index].enabled() && self.dma[index].timing() == timing {
                self.run_dma_channel(index);
            }
        }
    }

    fn run_fifo_channels(&mut self, fifo_address: u32) {
        // Only channels 1 and 2 can feed the sound FIFOs
        for index in [1, 2] {
            let channel = &self.dma[index];
            if channel.enabled()
                && channel.timing() == StartTiming::Special
                && channel.internal_destination == fifo_address
            {
                self.run_dma_channel(index);
            }
        }
    }

    fn run_dma_channel(&mut self, index: usize) {
        let mut channel = self.dma[index].clone();
        channel.running = true;
        self.dma[index].running = true;

        // FIFO transfers always move 4 words to a fixed destination
        let fifo_mode = (index == 1 || index == 2) && channel.timing() == StartTiming::Special;
        let width = if fifo_mode { TransferWidth::Word } else { channel.width() };
        let unit = width.byte_len();
        let length = if fifo_mode { 4 } else { channel.transfer_length(index) };

        log::trace!(
            "DMA{index}: {length} x {unit} bytes from {:08X} to {:08X}",
            channel.internal_source,
            channel.internal_destination
        );

        // Serial EEPROM chips size themselves from the first transfer length
        // they see on their window
        if let BackupMedia::Eeprom(eeprom) = &mut self.backup {
            let (source_region, _) = address::decode(channel.internal_source);
            let (destination_region, _) = address::decode(channel.internal_destination);
            if source_region == MemoryRegion::EepromWindow
                || destination_region == MemoryRegion::EepromWindow
            {
                eeprom.hint_transfer_length(length);
            }
        }

        let source_control = channel.source_control();
        let destination_control =
            if fifo_mode { AddressControl::Fixed } else { channel.destination_control() };

        for _ in 0..length {
            let source = channel.internal_source & !(unit - 1);
            let destination = channel.internal_destination & !(unit - 1);
            match width {
                TransferWidth::HalfWord => {
                    let value = self.read_halfword_inner(source);
                    self.write_halfword_inner(destination, value);
                }
                TransferWidth::Word => {
                    let lo = self.read_halfword_inner(source);
                    let hi = self.read_halfword_inner(source.wrapping_add(2));
                    self.write_halfword_inner(destination, lo);
                    self.write_halfword_inner(destination.wrapping_add(2), hi);
                }
            }
            channel.internal_source = source_control.advance(channel.internal_source, unit);
            channel.internal_destination =
                destination_control.advance(channel.internal_destination, unit);
        }

        channel.running = false;
        if channel.repeat() && channel.timing() != StartTiming::Immediate {
            if destination_control == AddressControl::IncrementReload {
                channel.reload_destination();
            }
        } else {
            channel.disable();
        }
        self.dma[index] = channel;

        if self.dma[index].irq_on_complete() {
            self.raise_interrupt(InterruptType::dma(index));
        }
    }
}

fn halfword_byte(value: u16, offset: u32) -> u8 {
    if offset & 1 == 0 { value as u8 } else { (value >> 8) as u8 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize;

    fn new_mmu() -> Mmu {
        Mmu::new(Rc::default(), Rc::default(), Rc::default())
    }

    fn mmu_with_cartridge(backup_type: BackupType) -> Mmu {
        let mut mmu = new_mmu();
        mmu.load_cartridge(Cartridge::new(vec![0; 0x1000]).with_backup_type(backup_type));
        mmu
    }

    fn program_dma(
        mmu: &mut Mmu,
        channel: u32,
        source: u32,
        destination: u32,
        count: u16,
        control: u16,
    ) {
        let base = address::IO_START
            + address::DMA_REGISTERS_START
            + channel * address::DMA_CHANNEL_SPAN;
        mmu.write_word(base, source);
        mmu.write_word(base + 4, destination);
        mmu.write_halfword(base + 8, count);
        mmu.write_halfword(base + 10, control);
    }

    #[test]
    fn ram_round_trips_and_mirrors() {
        let mut mmu = new_mmu();

        mmu.write_word(0x0200_0000, 0xDEAD_BEEF);
        assert_eq!(0xDEAD_BEEF, mmu.read_word(0x0200_0000));
        assert_eq!(0xBEEF, mmu.read_halfword(0x0200_0000));
        assert_eq!(0xDE, mmu.read_byte(0x0200_0003));
        assert_eq!(0xDEAD_BEEF, mmu.read_word(0x0204_0000));

        mmu.write_byte(0x0300_7FFF, 0x5A);
        assert_eq!(0x5A, mmu.read_byte(0x0300_FFFF));
    }

    #[test]
    fn unaligned_reads_compose_bytes() {
        let mut mmu = new_mmu();
        for i in 0..4 {
            mmu.write_byte(0x0200_0010 + i, 0x10 + i as u8);
        }

        assert_eq!(0x1211, mmu.read_halfword(0x0200_0011));
        assert_eq!(0x0013_1211, mmu.read_word(0x0200_0011));
    }

    #[test]
    fn vram_upper_mirror() {
        let mut mmu = new_mmu();
        mmu.write_halfword(0x0601_0000, 0xABCD);

        assert_eq!(0xABCD, mmu.read_halfword(0x0601_8000));
    }

    #[test]
    fn open_bus_reads_zero() {
        let mut mmu = new_mmu();

        assert_eq!(0, mmu.read_word(0x0100_0000));
        assert_eq!(0, mmu.read_byte(0x0000_8000));
        assert_eq!(0, mmu.read_halfword(0x0800_2000));
        assert_eq!(0, mmu.read_word(0x1000_0000));

        // Writes to nothing are swallowed
        mmu.write_word(0x0100_0000, 0xFFFF_FFFF);
        mmu.write_byte(0x0800_0000, 0xFF);
    }

    #[test]
    fn sequential_access_classification() {
        let mut mmu = new_mmu();

        mmu.read_word(0x0200_0000);
        assert_eq!(AccessKind::NonSequential, mmu.last_access_kind());

        mmu.read_word(0x0200_0004);
        assert_eq!(AccessKind::Sequential, mmu.last_access_kind());

        mmu.read_word(0x0200_0100);
        assert_eq!(AccessKind::NonSequential, mmu.last_access_kind());

        mmu.read_halfword(0x0200_0104);
        assert_eq!(AccessKind::Sequential, mmu.last_access_kind());

        // Continuing address in a different region is still non-sequential
        mmu.read_halfword(0x0300_0000);
        assert_eq!(AccessKind::NonSequential, mmu.last_access_kind());

        mmu.write_halfword(0x0300_0002, 0);
        assert_eq!(AccessKind::Sequential, mmu.last_access_kind());
    }

    #[test]
    fn lcd_registers_are_forwarded() {
        let lcd = Rc::new(RefCell::new(LcdData::new()));
        let mut mmu = Mmu::new(Rc::clone(&lcd), Rc::default(), Rc::default());

        mmu.write_halfword(address::IO_START, 0x1234);
        assert_eq!(0x1234, mmu.read_halfword(address::IO_START));
        assert_eq!(0x34, lcd.borrow().read_register(0x000));

        lcd.borrow_mut().set_vcount(0x42);
        assert_eq!(0x42, mmu.read_halfword(address::IO_START + address::VCOUNT));
    }

    #[test]
    fn timer_registers_are_forwarded() {
        let timers = Rc::new(RefCell::new([GbaTimer::default(); TIMER_COUNT]));
        let mut mmu = Mmu::new(Rc::default(), Rc::default(), Rc::clone(&timers));

        // Timer 2 reload + enable
        mmu.write_halfword(0x0400_0108, 0xBEEF);
        mmu.write_halfword(0x0400_010A, 0x0080);

        assert_eq!(0xBEEF, timers.borrow()[2].counter);
        assert_eq!(0xBEEF, mmu.read_halfword(0x0400_0108));
    }

    #[test]
    fn interrupt_flags_acknowledge_by_writing_ones() {
        let mut mmu = new_mmu();
        mmu.raise_interrupt(InterruptType::VBlank);
        mmu.raise_interrupt(InterruptType::Timer0);

        assert_eq!(0x0009, mmu.read_halfword(0x0400_0202));

        mmu.write_halfword(0x0400_0202, 0x0001);
        assert_eq!(0x0008, mmu.read_halfword(0x0400_0202));
    }

    #[test]
    fn pending_interrupt_respects_masks() {
        let mut mmu = new_mmu();
        mmu.raise_interrupt(InterruptType::HBlank);
        assert!(!mmu.pending_interrupt());

        mmu.write_halfword(0x0400_0200, 0x0002);
        assert!(!mmu.pending_interrupt());

        mmu.write_halfword(0x0400_0208, 1);
        assert!(mmu.pending_interrupt());
    }

    #[test]
    fn key_input_is_read_only() {
        let mut mmu = new_mmu();
        assert_eq!(0x03FF, mmu.read_halfword(0x0400_0130));

        mmu.set_key_input(0x03FE);
        mmu.write_halfword(0x0400_0130, 0);
        assert_eq!(0x03FE, mmu.read_halfword(0x0400_0130));
    }

    #[test]
    fn immediate_dma_copies_halfwords() {
        let mut mmu = new_mmu();
        for i in 0..4_u32 {
            mmu.write_halfword(0x0200_0000 + 2 * i, 0x1100 + i as u16);
        }

        program_dma(&mut mmu, 3, 0x0200_0000, 0x0300_0000, 4, 0x8000);

        for i in 0..4_u32 {
            assert_eq!(0x1100 + i as u16, mmu.read_halfword(0x0300_0000 + 2 * i));
        }
        assert!(!mmu.dma[3].enabled());
    }

    #[test]
    fn decrement_source_dma_copies_in_reverse() {
        let mut mmu = new_mmu();
        mmu.write_halfword(0x0200_0000, 0x00AA);
        mmu.write_halfword(0x0200_0002, 0x00BB);

        // Source decrement, destination increment
        program_dma(&mut mmu, 3, 0x0200_0002, 0x0300_0000, 2, 0x8000 | 0x0080);

        assert_eq!(0x00BB, mmu.read_halfword(0x0300_0000));
        assert_eq!(0x00AA, mmu.read_halfword(0x0300_0002));
    }

    #[test]
    fn fixed_source_word_dma() {
        let mut mmu = new_mmu();
        mmu.write_word(0x0200_0000, 0xAABB_CCDD);

        // Word width, source fixed
        program_dma(&mut mmu, 3, 0x0200_0000, 0x0300_0000, 3, 0x8000 | 0x0400 | 0x0100);

        for i in 0..3_u32 {
            assert_eq!(0xAABB_CCDD, mmu.read_word(0x0300_0000 + 4 * i));
        }
    }

    #[test]
    fn dma_completion_interrupt() {
        let mut mmu = new_mmu();
        program_dma(&mut mmu, 0, 0x0200_0000, 0x0300_0000, 1, 0x8000 | 0x4000);

        assert_eq!(InterruptType::Dma0.bit(), mmu.read_halfword(0x0400_0202));
    }

    #[test]
    fn vblank_channels_run_in_priority_order() {
        let mut mmu = new_mmu();
        mmu.write_halfword(0x0200_0000, 0x1234);

        // Channel 1 copies Y to Z, channel 0 copies X to Y; channel 0 must
        // run first for Z to observe the fresh value
        program_dma(&mut mmu, 1, 0x0200_0100, 0x0200_0200, 1, 0x8000 | 0x1000);
        program_dma(&mut mmu, 0, 0x0200_0000, 0x0200_0100, 1, 0x8000 | 0x1000);
        assert_eq!(0, mmu.read_halfword(0x0200_0200));

        mmu.notify_vblank();
        assert_eq!(0x1234, mmu.read_halfword(0x0200_0200));
    }

    #[test]
    fn hblank_timing_does_not_fire_on_vblank() {
        let mut mmu = new_mmu();
        mmu.write_halfword(0x0200_0000, 0x5678);
        program_dma(&mut mmu, 0, 0x0200_0000, 0x0200_0100, 1, 0x8000 | 0x2000);

        mmu.notify_vblank();
        assert_eq!(0, mmu.read_halfword(0x0200_0100));

        mmu.notify_hblank();
        assert_eq!(0x5678, mmu.read_halfword(0x0200_0100));
    }

    #[test]
    fn repeating_dma_keeps_its_place() {
        let mut mmu = new_mmu();
        mmu.write_halfword(0x0200_0000, 0x00AA);
        mmu.write_halfword(0x0200_0002, 0x00BB);

        // Repeat, source increment, destination reload
        program_dma(&mut mmu, 0, 0x0200_0000, 0x0200_0100, 1, 0x8000 | 0x1000 | 0x0200 | 0x0060);

        mmu.notify_vblank();
        assert_eq!(0x00AA, mmu.read_halfword(0x0200_0100));
        assert!(mmu.dma[0].enabled());

        mmu.notify_vblank();
        assert_eq!(0x00BB, mmu.read_halfword(0x0200_0100));
    }

    #[test]
    fn fifo_dma_pushes_four_words() {
        let apu = Rc::new(RefCell::new(ApuData::new()));
        let mut mmu = Mmu::new(Rc::default(), Rc::clone(&apu), Rc::default());

        for i in 0..16_u32 {
            mmu.write_byte(0x0200_0000 + i, i as u8);
        }
        // Channel 1, special timing, repeat; width/count are overridden in
        // FIFO mode
        program_dma(&mut mmu, 1, 0x0200_0000, 0x0400_00A0, 0, 0x8000 | 0x3000 | 0x0200);

        assert_eq!(0, apu.borrow().fifo_a_len());
        mmu.notify_fifo_b();
        assert_eq!(0, apu.borrow().fifo_a_len());

        mmu.notify_fifo_a();
        assert_eq!(16, apu.borrow().fifo_a_len());
        assert_eq!(Some(0), apu.borrow_mut().pop_fifo_a());
        assert!(mmu.dma[1].enabled());

        // Source advanced past the first 16 bytes
        mmu.notify_fifo_a();
        assert_eq!(31, apu.borrow().fifo_a_len());
    }

    fn eeprom_dma_bits(mmu: &mut Mmu, bits: &[u16]) {
        for (i, &bit) in bits.iter().enumerate() {
            mmu.write_halfword(0x0200_4000 + 2 * i as u32, bit);
        }
        program_dma(mmu, 3, 0x0200_4000, 0x0D00_0000, bits.len() as u16, 0x8000);
    }

    #[test]
    fn eeprom_write_and_read_through_dma() {
        let mut mmu = mmu_with_cartridge(BackupType::Eeprom);
        let data: u64 = 0x0123_4567_89AB_CDEF;
        let page: u16 = 0x2A;

        let mut write_request: Vec<u16> = vec![1, 0];
        write_request.extend((0..6).rev().map(|i| (page >> i) & 1));
        write_request.extend((0..64).rev().map(|i| ((data >> i) & 1) as u16));
        write_request.push(0);
        eeprom_dma_bits(&mut mmu, &write_request);

        let mut read_request: Vec<u16> = vec![1, 1];
        read_request.extend((0..6).rev().map(|i| (page >> i) & 1));
        read_request.push(0);
        eeprom_dma_bits(&mut mmu, &read_request);

        program_dma(&mut mmu, 3, 0x0D00_0000, 0x0200_6000, 68, 0x8000);

        let mut value = 0_u64;
        for i in 4..68_u32 {
            value = value << 1 | u64::from(mmu.read_halfword(0x0200_6000 + 2 * i) & 1);
        }
        assert_eq!(data, value);
    }

    fn flash_command(mmu: &mut Mmu, command: u8) {
        mmu.write_byte(0x0E00_5555, 0xAA);
        mmu.write_byte(0x0E00_2AAA, 0x55);
        mmu.write_byte(0x0E00_5555, command);
    }

    #[test]
    fn flash_128k_detection_and_banking() {
        let mut rom = vec![0; 0x1000];
        rom[0x400..0x409].copy_from_slice(b"FLASH1M_V");
        let mut mmu = new_mmu();
        mmu.load_cartridge(Cartridge::new(rom));
        assert_eq!(BackupType::Flash128, mmu.backup_type());

        flash_command(&mut mmu, 0x90);
        assert_eq!(0xC2, mmu.read_byte(0x0E00_0000));
        assert_eq!(0x09, mmu.read_byte(0x0E00_0001));
        flash_command(&mut mmu, 0xF0);

        flash_command(&mut mmu, 0xA0);
        mmu.write_byte(0x0E00_0123, 0x5A);
        assert_eq!(0x5A, mmu.read_byte(0x0E00_0123));

        // Bank 1 is untouched
        flash_command(&mut mmu, 0xB0);
        mmu.write_byte(0x0E00_0000, 1);
        assert_eq!(0xFF, mmu.read_byte(0x0E00_0123));

        flash_command(&mut mmu, 0xB0);
        mmu.write_byte(0x0E00_0000, 0);
        assert_eq!(0x5A, mmu.read_byte(0x0E00_0123));
    }

    #[test]
    fn sram_window_and_mirrors() {
        let mut mmu = mmu_with_cartridge(BackupType::Sram);
        mmu.write_byte(0x0E00_0123, 0x77);

        assert_eq!(0x77, mmu.read_byte(0x0E00_0123));
        assert_eq!(0x77, mmu.read_byte(0x0F00_0123));
        assert_eq!(0x77, mmu.read_byte(0x0E00_8123));
    }

    #[test]
    fn gpio_window_overlays_rom() {
        let mut rom = vec![0; 0x1000];
        rom[0xAC..0xB0].copy_from_slice(b"V49E");
        rom[0xC4] = 0x5A;
        let mut mmu = new_mmu();
        mmu.load_cartridge(Cartridge::new(rom));
        assert_eq!(GpioType::Rumble, mmu.gpio_type());

        // Port is invisible until enabled, the ROM byte shows through
        assert_eq!(0x5A, mmu.read_byte(0x0800_00C4));

        mmu.write_halfword(0x0800_00C8, 1);
        mmu.write_halfword(0x0800_00C6, 0x08);
        mmu.write_halfword(0x0800_00C4, 0x08);

        assert!(mmu.rumble_active());
        assert_eq!(0x08, mmu.read_halfword(0x0800_00C4));
    }

    #[test]
    fn fast_access_skips_side_effects() {
        let mut mmu = mmu_with_cartridge(BackupType::Eeprom);
        mmu.write_word(0x0200_0000, 0xCAFE_F00D);

        let before = mmu.last_access_kind();
        assert_eq!(0xCAFE_F00D, mmu.read_word_fast(0x0200_0000));
        assert_eq!(before, mmu.last_access_kind());

        // Serial chip is invisible to fast reads
        assert_eq!(0, mmu.read_halfword_fast(0x0D00_0000));

        mmu.write_halfword_fast(0x0600_0000, 0x1234);
        assert_eq!(0x1234, mmu.read_halfword(0x0600_0000));
    }

    #[test]
    fn start_blank_dma_runs_armed_channels() {
        let mut mmu = new_mmu();
        mmu.write_halfword(0x0200_0000, 0x4321);
        program_dma(&mut mmu, 2, 0x0200_0000, 0x0200_0100, 1, 0x8000 | 0x1000);

        mmu.start_blank_dma();
        assert_eq!(0x4321, mmu.read_halfword(0x0200_0100));
    }

    #[test]
    fn reset_clears_state_but_keeps_images() {
        let mut rom = vec![0; 0x1000];
        rom[0] = 0x99;
        let mut mmu = new_mmu();
        mmu.load_cartridge(Cartridge::new(rom).with_backup_type(BackupType::Sram));

        mmu.write_word(0x0200_0000, 0xFFFF_FFFF);
        mmu.write_byte(0x0E00_0000, 0x42);
        mmu.raise_interrupt(InterruptType::VBlank);
        mmu.reset();

        assert_eq!(0, mmu.read_word(0x0200_0000));
        assert_eq!(0, mmu.read_halfword(0x0400_0202));
        assert_eq!(0x03FF, mmu.read_halfword(0x0400_0130));
        assert_eq!(0x99, mmu.read_byte(0x0800_0000));
        // Backup contents survive a reset
        assert_eq!(0x42, mmu.read_byte(0x0E00_0000));
    }

    #[test]
    fn save_state_round_trip() {
        let mut mmu = mmu_with_cartridge(BackupType::Sram);
        mmu.write_word(0x0200_0000, 0x1234_5678);
        mmu.write_byte(0x0E00_0000, 0x42);

        let path =
            std::env::temp_dir().join(format!("agb-mmu-state-{}.ss0", rand::random::<u64>()));
        serialize::save_state(&mmu, &path).unwrap();

        mmu.write_word(0x0200_0000, 0);
        mmu.write_byte(0x0E00_0000, 0);

        let mut mmu = serialize::load_state(&path, mmu).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(0x1234_5678, mmu.read_word(0x0200_0000));
        assert_eq!(0x42, mmu.read_byte(0x0E00_0000));
    }

    #[test]
    fn save_state_round_trip_with_flash_backup() {
        let mut mmu = mmu_with_cartridge(BackupType::Flash128);
        flash_command(&mut mmu, 0xA0);
        mmu.write_byte(0x0E00_0010, 0x5A);

        let path =
            std::env::temp_dir().join(format!("agb-mmu-flash-{}.ss0", rand::random::<u64>()));
        serialize::save_state(&mmu, &path).unwrap();

        flash_command(&mut mmu, 0x80);
        flash_command(&mut mmu, 0x10);
        assert_eq!(0xFF, mmu.read_byte(0x0E00_0010));

        let mut mmu = serialize::load_state(&path, mmu).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(0x5A, mmu.read_byte(0x0E00_0010));
    }
}
