use serde::{Deserialize, Serialize};

pub(crate) const CHANNEL_COUNT: usize = 4;

const ENABLE_BIT: u16 = 1 << 15;

/// How a source/destination pointer moves after each transferred unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum AddressControl {
    Increment,
    Decrement,
    Fixed,
    /// Increments during the transfer and reloads the original destination at
    /// the start of each repeat pass. Only meaningful for the destination.
    IncrementReload,
}

impl AddressControl {
    fn from_bits(bits: u16) -> Self {
        match bits & 0x3 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            3 => Self::IncrementReload,
            _ => unreachable!("two-bit field"),
        }
    }

    pub(crate) fn advance(self, pointer: u32, unit: u32) -> u32 {
        match self {
            Self::Increment | Self::IncrementReload => pointer.wrapping_add(unit),
            Self::Decrement => pointer.wrapping_sub(unit),
            Self::Fixed => pointer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum TransferWidth {
    HalfWord,
    Word,
}

impl TransferWidth {
    pub(crate) fn byte_len(self) -> u32 {
        match self {
            Self::HalfWord => 2,
            Self::Word => 4,
        }
    }
}

/// Trigger condition that moves an armed channel to running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum StartTiming {
    Immediate,
    VBlank,
    HBlank,
    /// Audio FIFO refill for channels 1-2; unused for channels 0/3.
    Special,
}

/// One DMA channel: the raw registers as last written by the CPU plus the
/// working copies the transfer actually advances. The originals are preserved
/// so repeat mode can reload them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DmaChannel {
    pub(crate) source: u32,
    pub(crate) destination: u32,
    pub(crate) word_count: u16,
    pub(crate) control: u16,
    pub(crate) internal_source: u32,
    pub(crate) internal_destination: u32,
    pub(crate) running: bool,
}

impl DmaChannel {
    pub(crate) fn enabled(&self) -> bool {
        self.control & ENABLE_BIT != 0
    }

    pub(crate) fn repeat(&self) -> bool {
        self.control & (1 << 9) != 0
    }

    pub(crate) fn irq_on_complete(&self) -> bool {
        self.control & (1 << 14) != 0
    }

    pub(crate) fn width(&self) -> TransferWidth {
        if self.control & (1 << 10) != 0 {
            TransferWidth::Word
        } else {
            TransferWidth::HalfWord
        }
    }

    pub(crate) fn timing(&self) -> StartTiming {
        match (self.control >> 12) & 0x3 {
            0 => StartTiming::Immediate,
            1 => StartTiming::VBlank,
            2 => StartTiming::HBlank,
            3 => StartTiming::Special,
            _ => unreachable!("two-bit field"),
        }
    }

    pub(crate) fn source_control(&self) -> AddressControl {
        AddressControl::from_bits(self.control >> 7)
    }

    pub(crate) fn destination_control(&self) -> AddressControl {
        AddressControl::from_bits(self.control >> 5)
    }

    /// Number of units to copy; a zero count means the hardware maximum
    /// (0x4000 for channels 0-2, 0x10000 for channel 3).
    pub(crate) fn transfer_length(&self, channel_index: usize) -> u32 {
        match self.word_count {
            0 if channel_index == 3 => 0x1_0000,
            0 => 0x4000,
            count => u32::from(count),
        }
    }

    /// Capture the working copies from the raw registers. Called when the
    /// enable bit transitions from clear to set.
    pub(crate) fn latch(&mut self) {
        self.internal_source = self.source & 0x0FFF_FFFF;
        self.internal_destination = self.destination & 0x0FFF_FFFF;
    }

    pub(crate) fn reload_destination(&mut self) {
        self.internal_destination = self.destination & 0x0FFF_FFFF;
    }

    pub(crate) fn disable(&mut self) {
        self.control &= !ENABLE_BIT;
        self.running = false;
    }

    /// Byte-grained register write. `offset` is relative to the channel's
    /// register base. Returns true when the high byte of the control register
    /// was written, at which point the caller re-evaluates the enable bit.
    pub(crate) fn write_register_byte(&mut self, offset: u32, value: u8) -> bool {
        match offset {
            0..=3 => set_u32_byte(&mut self.source, offset, value),
            4..=7 => set_u32_byte(&mut self.destination, offset - 4, value),
            8 => self.word_count = (self.word_count & 0xFF00) | u16::from(value),
            9 => self.word_count = (self.word_count & 0x00FF) | (u16::from(value) << 8),
            10 => self.control = (self.control & 0xFF00) | u16::from(value),
            11 => {
                self.control = (self.control & 0x00FF) | (u16::from(value) << 8);
                return true;
            }
            _ => {}
        }
        false
    }

    /// Byte-grained register read. Source/destination/count are write-only on
    /// hardware and read back zero; only the control register is readable.
    pub(crate) fn read_register_byte(&self, offset: u32) -> u8 {
        match offset {
            10 => (self.control & 0x00FF) as u8,
            11 => (self.control >> 8) as u8,
            _ => 0,
        }
    }
}

fn set_u32_byte(field: &mut u32, byte_index: u32, value: u8) {
    let shift = byte_index * 8;
    *field = (*field & !(0xFF << shift)) | (u32::from(value) << shift);
}
