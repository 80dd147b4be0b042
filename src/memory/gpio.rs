//! Cartridge GPIO port, used by a handful of games for an RTC, solar sensor,
//! rumble motor, or gyro sensor soldered onto the cartridge board.
//!
//! The port occupies three 16-bit registers inside the ROM address range:
//! data at 0xC4, pin direction at 0xC6, and a read-enable control at 0xC8.
//! While reads are disabled the registers are invisible and the underlying
//! ROM bytes show through.

use serde::{Deserialize, Serialize};

use crate::memory::address;

/// Peripheral wired to the cartridge GPIO pins, detected from the game code
/// in the ROM header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpioType {
    Disabled,
    Rtc,
    SolarSensor,
    Rumble,
    GyroSensor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum GpioDevice {
    Disabled,
    Rtc(RtcState),
    Solar(SolarState),
    Rumble { active: bool },
    Gyro(GyroState),
}

/// Real-time clock pin state. The serial command protocol is driven entirely
/// by game code bit-banging the data pins; only the pin levels are held here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RtcState {
    pins: u8,
}

/// Boktai-style light sensor. Games pulse pin 0 to ramp an internal counter
/// and watch pin 3 for the point where the counter crosses the ambient light
/// level; pin 1 resets the ramp.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SolarState {
    counter: u8,
    light_level: u8,
    last_pins: u8,
}

impl Default for SolarState {
    fn default() -> Self {
        Self { counter: 0, light_level: 0xE8, last_pins: 0 }
    }
}

/// Gyro sensor as used by WarioWare Twisted. Pin 0 latches a fresh sample
/// into a shift register and pin 1 clocks it out MSB-first on input pin 2.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GyroState {
    rotation: u16,
    latched: u16,
    last_pins: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Gpio {
    readable: bool,
    direction: u8,
    output: u8,
    device: GpioDevice,
}

impl Gpio {
    pub(crate) fn new(gpio_type: GpioType) -> Self {
        let device = match gpio_type {
            GpioType::Disabled => GpioDevice::Disabled,
            GpioType::Rtc => GpioDevice::Rtc(RtcState::default()),
            GpioType::SolarSensor => GpioDevice::Solar(SolarState::default()),
            GpioType::Rumble => GpioDevice::Rumble { active: false },
            GpioType::GyroSensor => GpioDevice::Gyro(GyroState::default()),
        };

        Self { readable: false, direction: 0, output: 0, device }
    }

    pub(crate) fn gpio_type(&self) -> GpioType {
        match self.device {
            GpioDevice::Disabled => GpioType::Disabled,
            GpioDevice::Rtc(..) => GpioType::Rtc,
            GpioDevice::Solar(..) => GpioType::SolarSensor,
            GpioDevice::Rumble { .. } => GpioType::Rumble,
            GpioDevice::Gyro(..) => GpioType::GyroSensor,
        }
    }

    pub(crate) fn present(&self) -> bool {
        !matches!(self.device, GpioDevice::Disabled)
    }

    /// Read one byte of the register window at the given ROM-relative offset.
    /// Returns None while reads are disabled so the caller can fall back to
    /// the ROM bytes underneath.
    pub(crate) fn read_register(&self, offset: u32) -> Option<u8> {
        if !self.readable {
            return None;
        }

        match offset {
            address::GPIO_DATA => {
                // Output pins read back their driven level, input pins read
                // whatever the device is putting on them
                let input = self.device_input();
                Some((self.output & self.direction) | (input & !self.direction))
            }
            address::GPIO_DIRECTION => Some(self.direction & 0x0F),
            address::GPIO_CONTROL => Some(1),
            // High bytes of the 16-bit registers are unused
            _ => Some(0),
        }
    }

    pub(crate) fn write_register(&mut self, offset: u32, value: u8) {
        match offset {
            address::GPIO_DATA => {
                self.output = value & 0x0F;
                let driven = self.output & self.direction;
                self.device_written(driven);
            }
            address::GPIO_DIRECTION => self.direction = value & 0x0F,
            address::GPIO_CONTROL => self.readable = value & 0x01 != 0,
            _ => {}
        }
    }

    /// Set the ambient light level seen by a solar sensor, brightest at 0.
    pub(crate) fn set_light_level(&mut self, level: u8) {
        if let GpioDevice::Solar(solar) = &mut self.device {
            solar.light_level = level;
        }
    }

    /// Set the current angular rate sample for a gyro sensor.
    pub(crate) fn set_gyro_rotation(&mut self, rotation: u16) {
        if let GpioDevice::Gyro(gyro) = &mut self.device {
            gyro.rotation = rotation;
        }
    }

    pub(crate) fn rumble_active(&self) -> bool {
        matches!(self.device, GpioDevice::Rumble { active: true })
    }

    fn device_input(&self) -> u8 {
        match &self.device {
            GpioDevice::Disabled | GpioDevice::Rumble { .. } => 0,
            GpioDevice::Rtc(rtc) => rtc.pins,
            GpioDevice::Solar(solar) => {
                if solar.counter >= solar.light_level {
                    0x08
                } else {
                    0
                }
            }
            GpioDevice::Gyro(gyro) => {
                if gyro.latched & 0x8000 != 0 {
                    0x04
                } else {
                    0
                }
            }
        }
    }

    fn device_written(&mut self, pins: u8) {
        match &mut self.device {
            GpioDevice::Disabled => {}
            GpioDevice::Rtc(rtc) => rtc.pins = pins,
            GpioDevice::Solar(solar) => {
                if pins & 0x02 != 0 {
                    solar.counter = 0;
                } else if pins & 0x01 != 0 && solar.last_pins & 0x01 == 0 {
                    solar.counter = solar.counter.wrapping_add(1);
                }
                solar.last_pins = pins;
            }
            GpioDevice::Rumble { active } => *active = pins & 0x08 != 0,
            GpioDevice::Gyro(gyro) => {
                if pins & 0x01 != 0 {
                    gyro.latched = gyro.rotation;
                }
                if pins & 0x02 != 0 && gyro.last_pins & 0x02 == 0 {
                    gyro.latched <<= 1;
                }
                gyro.last_pins = pins;
            }
        }
    }
}
