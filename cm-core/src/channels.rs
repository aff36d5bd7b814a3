//! Attribute channels
//!
//! Sixteen named channels expose the chip: seven voltages, three fans,
//! three temperatures, VID, fan divisors and the alarm mask. Each channel
//! reports fixed-point values scaled by `10^magnitude` and may accept new
//! limits.

use serde::Serialize;
use std::fmt;
use tracing::debug;

use crate::constants::reg;
use crate::convert;
use crate::data::RawSnapshot;
use crate::device::{CacheState, Device, TempLimit};
use crate::error::{ChipmonError, Result};

/// Channel identity; the index is zero-based within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelId {
    /// Voltage input 0..=6
    In(usize),
    /// Fan 0..=2 (fan1..fan3)
    Fan(usize),
    /// Temperature sensor 0..=2 (temp, temp2, temp3)
    Temp(usize),
    Vid,
    FanDiv,
    Alarms,
}

/// Static description of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelDecl {
    pub id: ChannelId,
    pub name: &'static str,
    /// Decimal places of the fixed-point values
    pub magnitude: u8,
    /// Values returned by a read
    pub values: usize,
    /// Leading values a write may set
    pub writable: usize,
}

const fn decl(id: ChannelId, name: &'static str, magnitude: u8, values: usize, writable: usize) -> ChannelDecl {
    ChannelDecl {
        id,
        name,
        magnitude,
        values,
        writable,
    }
}

pub const CHANNELS: [ChannelDecl; 16] = [
    decl(ChannelId::In(0), "in0", 2, 3, 2),
    decl(ChannelId::In(1), "in1", 2, 3, 2),
    decl(ChannelId::In(2), "in2", 2, 3, 2),
    decl(ChannelId::In(3), "in3", 2, 3, 2),
    decl(ChannelId::In(4), "in4", 2, 3, 2),
    decl(ChannelId::In(5), "in5", 2, 3, 2),
    decl(ChannelId::In(6), "in6", 2, 3, 2),
    decl(ChannelId::Fan(0), "fan1", 0, 2, 1),
    decl(ChannelId::Fan(1), "fan2", 0, 2, 1),
    decl(ChannelId::Fan(2), "fan3", 0, 2, 1),
    decl(ChannelId::Temp(0), "temp", 1, 3, 2),
    decl(ChannelId::Temp(1), "temp2", 1, 3, 2),
    decl(ChannelId::Temp(2), "temp3", 1, 3, 2),
    decl(ChannelId::Vid, "vid", 2, 1, 0),
    decl(ChannelId::FanDiv, "fan_div", 0, 3, 2),
    decl(ChannelId::Alarms, "alarms", 0, 1, 0),
];

/// Fan 3 has no programmable divisor
const FAN3_DIVISOR: i64 = 2;

impl ChannelId {
    /// Look a channel up by its attribute name
    pub fn from_name(name: &str) -> Result<Self> {
        CHANNELS
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.id)
            .ok_or_else(|| ChipmonError::InvalidChannel(name.to_string()))
    }

    /// Declaration of this channel
    pub fn decl(&self) -> Result<&'static ChannelDecl> {
        CHANNELS
            .iter()
            .find(|c| c.id == *self)
            .ok_or_else(|| ChipmonError::InvalidChannel(format!("{self:?}")))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decl() {
            Ok(decl) => f.write_str(decl.name),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

/// Decode a channel from a snapshot. `out` must hold the channel's values.
fn decode_into(id: ChannelId, data: &RawSnapshot, out: &mut [i64]) {
    match id {
        ChannelId::In(nr) => {
            out[0] = convert::in_from_reg(data.in_min[nr], nr);
            out[1] = convert::in_from_reg(data.in_max[nr], nr);
            out[2] = convert::in_from_reg(data.in_input[nr], nr);
        }
        ChannelId::Fan(nr) => {
            out[0] = convert::fan_from_reg(data.fan_min[nr]);
            out[1] = convert::fan_from_reg(data.fan[nr]);
        }
        ChannelId::Temp(nr) => {
            out[0] = convert::temp_from_reg(data.temp_over[nr]);
            out[1] = convert::temp_from_reg(data.temp_hyst[nr]);
            out[2] = convert::temp_from_reg(data.temp[nr]);
        }
        ChannelId::Vid => out[0] = convert::vid_from_reg(data.vid),
        ChannelId::FanDiv => {
            out[0] = convert::div_from_reg(data.fan_div[0]);
            out[1] = convert::div_from_reg(data.fan_div[1]);
            out[2] = FAN3_DIVISOR;
        }
        ChannelId::Alarms => out[0] = i64::from(data.alarms),
    }
}

/// Every value of a channel, taken from one snapshot
pub(crate) fn decode_values(id: ChannelId, data: &RawSnapshot) -> Result<Vec<i64>> {
    let mut out = vec![0; id.decl()?.values];
    decode_into(id, data, &mut out);
    Ok(out)
}

impl Device {
    /// Magnitude of a channel's values
    pub fn channel_info(&self, id: ChannelId) -> Result<u8> {
        Ok(id.decl()?.magnitude)
    }

    /// Read a channel into `out`, returning the number of values written
    pub fn read_channel(&self, id: ChannelId, out: &mut [i64]) -> Result<usize> {
        let decl = id.decl()?;
        if out.len() < decl.values {
            return Err(ChipmonError::BufferTooSmall {
                needed: decl.values,
                got: out.len(),
            });
        }

        let state = self.fresh_state()?;
        decode_into(id, &state.data, out);
        Ok(decl.values)
    }

    /// Convenience wrapper returning an owned vector
    pub fn read_channel_values(&self, id: ChannelId) -> Result<Vec<i64>> {
        let mut buf = vec![0; id.decl()?.values];
        let n = self.read_channel(id, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Write the first `values.len()` writable fields of a channel.
    ///
    /// Values beyond the writable count are ignored. Each field is written
    /// to the chip first and committed to the cache once the write landed.
    pub fn write_channel(&self, id: ChannelId, values: &[i64]) -> Result<()> {
        let decl = id.decl()?;
        if decl.writable == 0 {
            return Err(ChipmonError::ReadOnlyChannel(decl.name.to_string()));
        }
        let count = values.len().min(decl.writable);
        if count == 0 {
            return Ok(());
        }

        let mut state = self.cache.lock();
        match id {
            ChannelId::In(nr) => {
                if count >= 1 {
                    let code = convert::in_to_reg(values[0], nr);
                    self.write_reg(reg::in_min(nr), code)?;
                    state.data.in_min[nr] = code;
                }
                if count >= 2 {
                    let code = convert::in_to_reg(values[1], nr);
                    self.write_reg(reg::in_max(nr), code)?;
                    state.data.in_max[nr] = code;
                }
            }
            ChannelId::Fan(nr) => {
                if count >= 1 {
                    let code = convert::fan_to_reg(values[0]);
                    self.write_reg(reg::fan_min(nr + 1), code)?;
                    state.data.fan_min[nr] = code;
                }
            }
            ChannelId::Temp(nr) => {
                if count >= 1 {
                    let code = convert::temp_to_reg(values[0]);
                    self.commit_temp_limit(&mut state, nr, TempLimit::Over, code)?;
                }
                if count >= 2 {
                    let code = convert::temp_to_reg(values[1]);
                    self.commit_temp_limit(&mut state, nr, TempLimit::Hyst, code)?;
                }
            }
            ChannelId::FanDiv => {
                // Validate everything before touching the chip
                let div1 = convert::div_to_reg(values[0])?;
                let div2 = if count >= 2 {
                    Some(convert::div_to_reg(values[1])?)
                } else {
                    None
                };

                let mut reg_value = self.read_reg(reg::VID_FANDIV)?;
                reg_value = (reg_value & 0xcf) | (div1 << 4);
                if let Some(div2) = div2 {
                    reg_value = (reg_value & 0x3f) | (div2 << 6);
                }
                self.write_reg(reg::VID_FANDIV, reg_value)?;
                state.data.fan_div[0] = div1;
                if let Some(div2) = div2 {
                    state.data.fan_div[1] = div2;
                }
            }
            ChannelId::Vid | ChannelId::Alarms => {
                return Err(ChipmonError::ReadOnlyChannel(decl.name.to_string()));
            }
        }

        debug!(device = %self.name(), channel = decl.name, count, "Wrote channel");
        Ok(())
    }

    /// Write one limit of sensor `nr` (zero-based) and mirror it in the cache.
    /// A banked write that fails may have left the high byte on the chip, so
    /// the cache is invalidated instead.
    fn commit_temp_limit(
        &self,
        state: &mut CacheState,
        nr: usize,
        limit: TempLimit,
        code: u8,
    ) -> Result<()> {
        if let Err(e) = self.write_temp_limit(nr + 1, limit, code) {
            if nr > 0 {
                state.valid = false;
            }
            return Err(e);
        }
        match limit {
            TempLimit::Over => state.data.temp_over[nr] = code,
            TempLimit::Hyst => state.data.temp_hyst[nr] = code,
        }
        Ok(())
    }
}
