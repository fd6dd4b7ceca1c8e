//! INA219 current/voltage/power sensor over Linux i2c-dev.
//!
//! Calibrated for the 16V / 5A range the UPS HATs use. Registers are
//! 16-bit big-endian; shunt, current and power are two's complement.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;

use anyhow::{Context, Result};

/// `I2C_SLAVE` from `<linux/i2c-dev.h>`.
const I2C_SLAVE: u64 = 0x0703;

const REG_CONFIG: u8 = 0x00;
const REG_SHUNT_VOLTAGE: u8 = 0x01;
const REG_BUS_VOLTAGE: u8 = 0x02;
const REG_POWER: u8 = 0x03;
const REG_CURRENT: u8 = 0x04;
const REG_CALIBRATION: u8 = 0x05;

const RANGE_16V: u16 = 0x00;
const GAIN_DIV_2_80MV: u16 = 0x01;
const ADC_12BIT_32S: u16 = 0x0D;
const MODE_SHUNT_AND_BUS_CONTINUOUS: u16 = 0x07;

pub const CALIBRATION: u16 = 26868;
pub const CURRENT_LSB_MA: f64 = 0.1524;
pub const POWER_LSB_W: f64 = 0.003048;

pub const fn config_word() -> u16 {
    RANGE_16V << 13
        | GAIN_DIV_2_80MV << 11
        | ADC_12BIT_32S << 7
        | ADC_12BIT_32S << 3
        | MODE_SHUNT_AND_BUS_CONTINUOUS
}

/// One sample, in the units the alerts and logs use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub bus_voltage: f64,
    pub shunt_voltage: f64,
    pub current_ma: f64,
    pub power_w: f64,
    pub percent: f64,
}

// --- Conversions ---

pub fn to_signed(raw: u16) -> i16 {
    raw as i16
}

/// The low 3 bits are status flags; 4 mV per step.
pub fn bus_voltage(raw: u16) -> f64 {
    f64::from(raw >> 3) * 0.004
}

/// Volts (10 µV per step).
pub fn shunt_voltage(raw: u16) -> f64 {
    f64::from(to_signed(raw)) * 0.01 / 1000.0
}

pub fn current_ma(raw: u16) -> f64 {
    f64::from(to_signed(raw)) * CURRENT_LSB_MA
}

pub fn power_w(raw: u16) -> f64 {
    f64::from(to_signed(raw)) * POWER_LSB_W
}

/// Single Li-ion cell: 3.0 V empty, 4.2 V full.
pub fn battery_percent(bus_voltage: f64) -> f64 {
    ((bus_voltage - 3.0) / 1.2 * 100.0).clamp(0.0, 100.0)
}

// --- Bus ---

/// 16-bit register access. The real device is i2c-dev; tests use a map.
pub trait RegisterBus {
    fn read_u16(&mut self, reg: u8) -> io::Result<u16>;
    fn write_u16(&mut self, reg: u8, value: u16) -> io::Result<()>;
}

/// `/dev/i2c-<bus>` bound to one slave address.
pub struct I2cDev {
    file: File,
}

impl I2cDev {
    pub fn open(bus: u8, addr: u16) -> Result<Self> {
        let path = format!("/dev/i2c-{bus}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open {path} (is I2C enabled?)"))?;
        // SAFETY: the fd is owned by `file` and outlives the call; I2C_SLAVE
        // takes the address by value.
        let rc =
            unsafe { libc::ioctl(file.as_raw_fd(), I2C_SLAVE as _, libc::c_ulong::from(addr)) };
        if rc < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Failed to select I2C address {addr:#04x} on {path}"));
        }
        Ok(Self { file })
    }
}

impl RegisterBus for I2cDev {
    fn read_u16(&mut self, reg: u8) -> io::Result<u16> {
        self.file.write_all(&[reg])?;
        let mut buf = [0u8; 2];
        self.file.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_u16(&mut self, reg: u8, value: u16) -> io::Result<()> {
        let [hi, lo] = value.to_be_bytes();
        self.file.write_all(&[reg, hi, lo])
    }
}

// --- Sensor ---

pub struct Ina219<B: RegisterBus> {
    bus: B,
}

impl<B: RegisterBus> Ina219<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn calibrate(&mut self) -> io::Result<()> {
        self.bus.write_u16(REG_CALIBRATION, CALIBRATION)?;
        self.bus.write_u16(REG_CONFIG, config_word())
    }

    /// The calibration register is rewritten first: a brownout resets it
    /// and current/power then read as zero.
    pub fn read(&mut self) -> io::Result<Reading> {
        self.bus.write_u16(REG_CALIBRATION, CALIBRATION)?;
        let bus_v = bus_voltage(self.bus.read_u16(REG_BUS_VOLTAGE)?);
        let shunt_v = shunt_voltage(self.bus.read_u16(REG_SHUNT_VOLTAGE)?);
        let current = current_ma(self.bus.read_u16(REG_CURRENT)?);
        let power = power_w(self.bus.read_u16(REG_POWER)?);
        Ok(Reading {
            bus_voltage: bus_v,
            shunt_voltage: shunt_v,
            current_ma: current,
            power_w: power,
            percent: battery_percent(bus_v),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeBus {
        regs: HashMap<u8, u16>,
        writes: Vec<(u8, u16)>,
    }

    impl RegisterBus for FakeBus {
        fn read_u16(&mut self, reg: u8) -> io::Result<u16> {
            self.regs
                .get(&reg)
                .copied()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such register"))
        }

        fn write_u16(&mut self, reg: u8, value: u16) -> io::Result<()> {
            self.writes.push((reg, value));
            Ok(())
        }
    }

    #[test]
    fn config_register_value() {
        assert_eq!(config_word(), 0x0EEF);
    }

    #[test]
    fn twos_complement() {
        assert_eq!(to_signed(0x0000), 0);
        assert_eq!(to_signed(0x7FFF), 32767);
        assert_eq!(to_signed(0xFFFF), -1);
        assert_eq!(to_signed(0x8000), -32768);
    }

    #[test]
    fn register_scaling() {
        // 4.0 V -> 1000 steps of 4 mV, shifted past the status bits
        assert!((bus_voltage(1000 << 3 | 0b011) - 4.0).abs() < 1e-9);
        assert!((current_ma(100) - 15.24).abs() < 1e-9);
        assert!((current_ma(0xFF9C) + 15.24).abs() < 1e-9);
        assert!((power_w(1000) - 3.048).abs() < 1e-9);
        assert!((shunt_voltage(0xFFF6) + 0.0001).abs() < 1e-12);
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(battery_percent(4.5), 100.0);
        assert_eq!(battery_percent(2.5), 0.0);
        assert!((battery_percent(3.6) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn reads_a_sample() {
        let mut bus = FakeBus::default();
        bus.regs.insert(REG_BUS_VOLTAGE, 975 << 3); // 3.9 V
        bus.regs.insert(REG_SHUNT_VOLTAGE, 50);
        bus.regs.insert(REG_CURRENT, 0xFF38); // -200 steps, discharging
        bus.regs.insert(REG_POWER, 250);
        let mut sensor = Ina219::new(bus);
        sensor.calibrate().unwrap();
        let r = sensor.read().unwrap();

        assert!((r.bus_voltage - 3.9).abs() < 1e-9);
        assert!((r.current_ma + 30.48).abs() < 1e-9);
        assert!((r.power_w - 0.762).abs() < 1e-9);
        assert!((r.percent - 75.0).abs() < 1e-9);
        assert_eq!(
            sensor.bus.writes[..2],
            [(REG_CALIBRATION, CALIBRATION), (REG_CONFIG, 0x0EEF)]
        );
    }
}
