//! Register code conversions
//!
//! Pure functions between raw W83781D register codes and the physical
//! units the attribute channels report. Rounding happens on the encode side
//! only; decoding is exact integer scaling with truncation.
//!
//! # Units
//!
//! - Voltages: hundredths of a volt (330 = 3.30 V)
//! - Fans: RPM
//! - Temperatures: tenths of a degree Celsius (600 = 60.0 °C)
//! - VID: hundredths of a volt

use crate::error::{ChipmonError, Result};

/// Fixed-point scale per voltage channel. Negative scales belong to the
/// inverted negative-rail inputs.
pub const IN_SCALE: [i64; 7] = [10000, 10000, 10000, 16892, 38000, -34768, -15050];

/// Tachometer clock constant
const FAN_CLOCK: i64 = 1_350_000;

/// Encode a voltage limit for channel `nr` (0..=6)
pub(crate) fn in_to_reg(value: i64, nr: usize) -> u8 {
    debug_assert!(nr < IN_SCALE.len());
    (((value.saturating_mul(100_000) / IN_SCALE[nr] + 8) / 16) & 0xff) as u8
}

/// Decode a voltage code for channel `nr` (0..=6)
pub(crate) fn in_from_reg(code: u8, nr: usize) -> i64 {
    debug_assert!(nr < IN_SCALE.len());
    i64::from(code) * 16 * IN_SCALE[nr] / 100_000
}

/// Encode a fan low limit in RPM. Zero (or less) disables the limit.
pub fn fan_to_reg(rpm: i64) -> u8 {
    if rpm <= 0 {
        return 255;
    }
    ((FAN_CLOCK.saturating_add(rpm) / rpm.saturating_mul(2)) & 0xff) as u8
}

/// Decode a tachometer count. 0 is undefined (-1), 255 means stopped.
pub fn fan_from_reg(code: u8) -> i64 {
    match code {
        0 => -1,
        255 => 0,
        c => FAN_CLOCK / (i64::from(c) * 2),
    }
}

/// Encode a temperature in tenths of a degree, rounding half away from zero
pub fn temp_to_reg(value: i64) -> u8 {
    let rounded = if value < 0 {
        value.saturating_sub(5) / 10
    } else {
        value.saturating_add(5) / 10
    };
    (rounded & 0xff) as u8
}

/// Decode a signed temperature byte into tenths of a degree
pub fn temp_from_reg(code: u8) -> i64 {
    i64::from(code as i8) * 10
}

/// Decode the 5-bit voltage identification code
pub fn vid_from_reg(code: u8) -> i64 {
    let code = i64::from(code);
    match code {
        0x1f => 0,
        c if c >= 0x10 => 510 - c * 10,
        0x06..=0x0f => 0,
        _ => 205 - code * 5,
    }
}

/// Decode a 2-bit fan divisor code
pub fn div_from_reg(code: u8) -> i64 {
    1 << (code & 0x03)
}

/// Encode a fan divisor.
///
/// Only 1, 4 and 8 can be programmed. Divisor 2 (code 1) is the power-on
/// default and is only reachable through a chip reset.
pub fn div_to_reg(divisor: i64) -> Result<u8> {
    match divisor {
        1 => Ok(0),
        4 => Ok(2),
        8 => Ok(3),
        other => Err(ChipmonError::InvalidDivisor(other)),
    }
}

/// Combine the two alarm banks; bank 2 occupies bits 8..15
pub fn alarms_from_reg(bank1: u8, bank2: u8) -> u16 {
    u16::from(bank1) | (u16::from(bank2) << 8)
}

/// Assemble the 5-bit VID code from VID_FANDIV (bits 0..3) and CHIPID bit 0
pub fn vid_code(vid_fandiv: u8, chipid: u8) -> u8 {
    (vid_fandiv & 0x0f) | ((chipid & 0x01) << 4)
}

/// Split VID_FANDIV into the fan 1 and fan 2 divisor codes
pub fn fan_div_codes(vid_fandiv: u8) -> [u8; 2] {
    [(vid_fandiv >> 4) & 0x03, vid_fandiv >> 6]
}
