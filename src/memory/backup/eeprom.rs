use serde::{Deserialize, Serialize};

const PAGE_SIZE: usize = 8;

const SMALL_SIZE: usize = 512;
const LARGE_SIZE: usize = 0x2000;

const SMALL_ADDRESS_BITS: u8 = 6;
const LARGE_ADDRESS_BITS: u8 = 14;

/// Protocol position of the serial shifter. A request is framed as a start
/// bit, a mode bit (1 = read, 0 = write), the page address MSB-first, and for
/// writes 64 data bits plus a stop bit. Read data is shifted out through
/// subsequent read accesses: 4 dummy bits, then the 64 page bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ChipState {
    Idle,
    /// Start bit seen; the next bit selects read or write.
    Mode,
    AddressShift { read: bool, collected: u16, remaining: u8 },
    /// Read requests carry one terminating bit after the address.
    ReadTerminate { address: u16 },
    ReadPreamble { address: u16, remaining: u8 },
    ReadData { address: u16, remaining: u8 },
    WriteData { address: u16, data: u64, remaining: u8 },
    /// All 64 data bits received; the stop bit commits the page.
    WriteStop { address: u16, data: u64 },
}

/// Serial EEPROM chip. Data is exchanged one bit at a time, normally via
/// 16-bit DMA to/from the EEPROM window; the address width (6 or 14 bits)
/// follows the chip size and is locked in once detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Eeprom {
    data: Vec<u8>,
    address_bits: u8,
    size_locked: bool,
    state: ChipState,
}

impl Eeprom {
    pub(crate) fn new() -> Self {
        Self {
            data: vec![0; SMALL_SIZE],
            address_bits: SMALL_ADDRESS_BITS,
            size_locked: false,
            state: ChipState::Idle,
        }
    }

    /// Lock the chip size based on a DMA transfer length: real software sizes
    /// the chip through fixed-length request streams (2 framing bits + 6 or
    /// 14 address bits, plus 65 data bits for writes).
    pub(crate) fn hint_transfer_length(&mut self, word_count: u32) {
        if self.size_locked {
            return;
        }

        let address_bits = match word_count {
            9 | 73 => SMALL_ADDRESS_BITS,
            17 | 81 => LARGE_ADDRESS_BITS,
            _ => return,
        };

        self.resize(address_bits);
        self.size_locked = true;
        log::debug!("EEPROM size locked to {} bytes via DMA length {word_count}", self.data.len());
    }

    fn resize(&mut self, address_bits: u8) {
        self.address_bits = address_bits;
        let size = if address_bits == LARGE_ADDRESS_BITS { LARGE_SIZE } else { SMALL_SIZE };
        self.data = vec![0; size];
    }

    fn page_mask(&self) -> u16 {
        (self.data.len() / PAGE_SIZE - 1) as u16
    }

    fn read_page(&self, address: u16) -> u64 {
        let offset = usize::from(address & self.page_mask()) * PAGE_SIZE;
        let mut bytes = [0; PAGE_SIZE];
        bytes.copy_from_slice(&self.data[offset..offset + PAGE_SIZE]);
        u64::from_be_bytes(bytes)
    }

    fn commit_page(&mut self, address: u16, data: u64) {
        let offset = usize::from(address & self.page_mask()) * PAGE_SIZE;
        self.data[offset..offset + PAGE_SIZE].copy_from_slice(&data.to_be_bytes());
        log::trace!("EEPROM page {:03X} committed", address & self.page_mask());
    }

    /// Shift one bit into the chip (a write access to the EEPROM window).
    pub(crate) fn write_bit(&mut self, bit: bool) {
        self.state = match self.state {
            ChipState::Idle => {
                if bit {
                    ChipState::Mode
                } else {
                    ChipState::Idle
                }
            }
            ChipState::Mode => ChipState::AddressShift {
                read: bit,
                collected: 0,
                remaining: self.address_bits,
            },
            ChipState::AddressShift { read, collected, remaining } => {
                let collected = (collected << 1) | u16::from(bit);
                let remaining = remaining - 1;
                if remaining > 0 {
                    ChipState::AddressShift { read, collected, remaining }
                } else {
                    // First full address sequence fixes the chip size
                    self.size_locked = true;
                    if read {
                        ChipState::ReadTerminate { address: collected }
                    } else {
                        ChipState::WriteData { address: collected, data: 0, remaining: 64 }
                    }
                }
            }
            ChipState::ReadTerminate { address } => {
                ChipState::ReadPreamble { address, remaining: 4 }
            }
            ChipState::WriteData { address, data, remaining } => {
                let data = (data << 1) | u64::from(bit);
                let remaining = remaining - 1;
                if remaining > 0 {
                    ChipState::WriteData { address, data, remaining }
                } else {
                    ChipState::WriteStop { address, data }
                }
            }
            ChipState::WriteStop { address, data } => {
                self.commit_page(address, data);
                ChipState::Idle
            }
            // A write arriving while read data is pending abandons the read
            // and starts a new request
            ChipState::ReadPreamble { .. } | ChipState::ReadData { .. } => {
                if bit {
                    ChipState::Mode
                } else {
                    ChipState::Idle
                }
            }
        };
    }

    /// Shift one bit out of the chip (a read access to the EEPROM window).
    /// Returns 1 when no read is in progress, matching the ready line.
    pub(crate) fn read_bit(&mut self) -> bool {
        match self.state {
            ChipState::ReadPreamble { address, remaining } => {
                let remaining = remaining - 1;
                self.state = if remaining > 0 {
                    ChipState::ReadPreamble { address, remaining }
                } else {
                    ChipState::ReadData { address, remaining: 64 }
                };
                false
            }
            ChipState::ReadData { address, remaining } => {
                let bit = (self.read_page(address) >> (remaining - 1)) & 1 != 0;
                let remaining = remaining - 1;
                self.state = if remaining > 0 {
                    ChipState::ReadData { address, remaining }
                } else {
                    ChipState::Idle
                };
                bit
            }
            _ => true,
        }
    }

    /// Drop any in-progress request without touching committed pages.
    pub(crate) fn reset_protocol(&mut self) {
        self.state = ChipState::Idle;
    }

    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the backing store from a loaded save file. The file length
    /// determines (and locks) the chip size.
    pub(crate) fn load_data(&mut self, bytes: &[u8]) {
        let address_bits = match bytes.len() {
            SMALL_SIZE => SMALL_ADDRESS_BITS,
            LARGE_SIZE => LARGE_ADDRESS_BITS,
            len => {
                log::warn!("ignoring EEPROM save data with unexpected length {len}");
                return;
            }
        };

        self.resize(address_bits);
        self.data.copy_from_slice(bytes);
        self.size_locked = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift_address(eeprom: &mut Eeprom, read: bool, address: u16, address_bits: u8) {
        eeprom.write_bit(true);
        eeprom.write_bit(read);
        for i in (0..address_bits).rev() {
            eeprom.write_bit(address & (1 << i) != 0);
        }
    }

    fn write_page(eeprom: &mut Eeprom, address: u16, data: u64, address_bits: u8) {
        shift_address(eeprom, false, address, address_bits);
        for i in (0..64).rev() {
            eeprom.write_bit(data & (1 << i) != 0);
        }
        // Stop bit
        eeprom.write_bit(false);
    }

    fn read_page(eeprom: &mut Eeprom, address: u16, address_bits: u8) -> u64 {
        shift_address(eeprom, true, address, address_bits);
        eeprom.write_bit(false);

        for _ in 0..4 {
            assert!(!eeprom.read_bit());
        }
        let mut data = 0;
        for _ in 0..64 {
            data = (data << 1) | u64::from(eeprom.read_bit());
        }
        data
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut eeprom = Eeprom::new();

        write_page(&mut eeprom, 0x05, 0x0123_4567_89AB_CDEF, 6);

        assert_eq!(0x0123_4567_89AB_CDEF, read_page(&mut eeprom, 0x05, 6));
        assert_eq!(0, read_page(&mut eeprom, 0x06, 6));
    }

    #[test]
    fn large_chip_round_trip() {
        let mut eeprom = Eeprom::new();
        eeprom.hint_transfer_length(17);
        assert_eq!(LARGE_SIZE, eeprom.data().len());

        write_page(&mut eeprom, 0x3FF, 0xDEAD_BEEF_CAFE_F00D, 14);

        assert_eq!(0xDEAD_BEEF_CAFE_F00D, read_page(&mut eeprom, 0x3FF, 14));
    }

    #[test]
    fn size_hint_locks_once() {
        let mut eeprom = Eeprom::new();

        eeprom.hint_transfer_length(9);
        assert_eq!(SMALL_SIZE, eeprom.data().len());

        // Later hints must not resize the chip
        eeprom.hint_transfer_length(17);
        assert_eq!(SMALL_SIZE, eeprom.data().len());
    }

    #[test]
    fn unrelated_dma_lengths_ignored() {
        let mut eeprom = Eeprom::new();

        eeprom.hint_transfer_length(4);
        eeprom.hint_transfer_length(0x4000);

        assert!(!eeprom.size_locked);
        assert_eq!(SMALL_SIZE, eeprom.data().len());
    }

    #[test]
    fn incomplete_write_does_not_corrupt_pages() {
        let mut eeprom = Eeprom::new();

        write_page(&mut eeprom, 0x02, u64::MAX, 6);

        // Start a write to the same page but abandon it after a handful of
        // data bits, then issue a fresh read request
        shift_address(&mut eeprom, false, 0x02, 6);
        for _ in 0..10 {
            eeprom.write_bit(false);
        }
        eeprom.reset_protocol();

        assert_eq!(u64::MAX, read_page(&mut eeprom, 0x02, 6));
    }

    #[test]
    fn idle_reads_return_ready() {
        let mut eeprom = Eeprom::new();

        assert!(eeprom.read_bit());
        assert!(eeprom.read_bit());
    }

    #[test]
    fn load_data_sets_and_locks_size() {
        let mut eeprom = Eeprom::new();

        let image = vec![0xAB; LARGE_SIZE];
        eeprom.load_data(&image);

        assert_eq!(LARGE_SIZE, eeprom.data().len());
        assert!(eeprom.size_locked);
        assert_eq!(0xABAB_ABAB_ABAB_ABAB, read_page(&mut eeprom, 0x000, 14));
    }

    #[test]
    fn mismatched_save_length_ignored() {
        let mut eeprom = Eeprom::new();

        eeprom.load_data(&[0xFF; 100]);

        assert_eq!(SMALL_SIZE, eeprom.data().len());
        assert_eq!(0, eeprom.data()[0]);
    }
}
