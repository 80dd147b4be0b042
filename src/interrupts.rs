use serde::{Deserialize, Serialize};

/// Hardware interrupt sources, in IF/IE bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptType {
    VBlank,
    HBlank,
    VCounterMatch,
    Timer0,
    Timer1,
    Timer2,
    Timer3,
    Serial,
    Dma0,
    Dma1,
    Dma2,
    Dma3,
    Keypad,
    GamePak,
}

impl InterruptType {
    pub(crate) fn bit(self) -> u16 {
        let position = match self {
            Self::VBlank => 0,
            Self::HBlank => 1,
            Self::VCounterMatch => 2,
            Self::Timer0 => 3,
            Self::Timer1 => 4,
            Self::Timer2 => 5,
            Self::Timer3 => 6,
            Self::Serial => 7,
            Self::Dma0 => 8,
            Self::Dma1 => 9,
            Self::Dma2 => 10,
            Self::Dma3 => 11,
            Self::Keypad => 12,
            Self::GamePak => 13,
        };
        1 << position
    }

    pub(crate) fn dma(channel: usize) -> Self {
        match channel {
            0 => Self::Dma0,
            1 => Self::Dma1,
            2 => Self::Dma2,
            _ => Self::Dma3,
        }
    }
}
