//! Constants for the W83781D driver
//!
//! Register addresses, probe ranges, timing defaults and the power-on limits
//! written by the init sequence. Add new magic numbers here, not inline.

/// Chip register map
pub mod reg {
    /// Current voltage reading, channel `nr` (0..=6)
    pub const fn in_input(nr: usize) -> u8 {
        0x20 + nr as u8
    }

    /// Voltage high limit, channel `nr`
    pub const fn in_max(nr: usize) -> u8 {
        0x2b + (nr as u8) * 2
    }

    /// Voltage low limit, channel `nr`
    pub const fn in_min(nr: usize) -> u8 {
        0x2c + (nr as u8) * 2
    }

    /// Fan tachometer count, fan `nr` (1..=3)
    pub const fn fan(nr: usize) -> u8 {
        0x27 + nr as u8
    }

    /// Fan low limit, fan `nr` (1..=3)
    pub const fn fan_min(nr: usize) -> u8 {
        0x3a + nr as u8
    }

    pub const TEMP: u8 = 0x27;
    pub const TEMP_OVER: u8 = 0x39;
    pub const TEMP_HYST: u8 = 0x3a;

    /// Banked registers shared by temperature sensors 2 and 3.
    /// The limit registers are 16 bits wide; the LSB lives at +1.
    pub const TEMP23: u8 = 0x50;
    pub const TEMP_OVER23: u8 = 0x55;
    pub const TEMP_HYST23: u8 = 0x53;
    pub const TEMP_CONFIG: u8 = 0x52;

    /// Bank select for the shared temperature registers
    pub const TEMP_SEL: u8 = 0x4e;

    pub const CONFIG: u8 = 0x40;
    pub const ALARM1: u8 = 0x41;
    pub const ALARM2: u8 = 0x42;
    pub const VID_FANDIV: u8 = 0x47;
    pub const CHIPID: u8 = 0x58;
}

/// Bank select values for the temperature registers
pub mod bank {
    pub const DEFAULT: u8 = 0x00;
    pub const SENSOR2: u8 = 0x02;
    pub const SENSOR3: u8 = 0x04;

    /// Bank that exposes temperature sensor `nr` (2 or 3)
    pub(crate) const fn for_sensor(nr: usize) -> u8 {
        debug_assert!(nr == 2 || nr == 3);
        1 << (nr - 1)
    }
}

/// Chip identification
pub mod chip {
    pub const NAME: &str = "w83781d";
    pub const DESCRIPTION: &str = "Winbond W83781D chip";

    /// Value of CHIPID (after masking the VID bit on ISA)
    pub const ID: u8 = 0x20;

    /// CHIPID bit 0 carries the VID high bit
    pub const ISA_ID_MASK: u8 = 0xfe;

    pub const VOLTAGES: usize = 7;
    pub const FANS: usize = 3;
    pub const TEMPS: usize = 3;

    /// CONFIG write that resets everything but watchdog and last conversion
    pub const CONFIG_RESET: u8 = 0x80;
    pub const CONFIG_START: u8 = 0x01;
    pub const CONFIG_INT_CLEAR_MASK: u8 = 0xf7;
}

/// ISA (indexed port pair) transport
pub mod isa {
    /// Length of the I/O region claimed per chip
    pub const EXTENT: u16 = 8;

    /// Address (index) register, relative to the base
    pub const ADDR_REG_OFFSET: u16 = 5;

    /// Data register, relative to the base
    pub const DATA_REG_OFFSET: u16 = 6;

    /// Offsets that read 0xff when nothing drives them
    pub const UNUSED_OFFSETS: [u16; 4] = [1, 2, 3, 7];

    /// Value floating ISA lines read back as
    pub const FLOATING: u8 = 0xff;

    pub const DEFAULT_ADDRESSES: [u16; 1] = [0x290];
}

/// SMBus transport
pub mod smbus {
    pub const FIRST_ADDRESS: u8 = 0x20;
    pub const LAST_ADDRESS: u8 = 0x2f;

    /// Highest valid 7-bit address
    pub const MAX_ADDRESS: u8 = 0x7f;
}

/// Registry and cache defaults
pub mod limits {
    /// Default number of registry slots
    pub const DEFAULT_MAX_DEVICES: usize = 4;

    /// Default cache lifetime (1.5 seconds)
    pub const DEFAULT_STALENESS_MS: u64 = 1500;

    /// Attribute registrations the in-memory table accepts by default
    pub const DEFAULT_ATTRIBUTE_ENTRIES: usize = 64;
}

/// Limits programmed by the init sequence
pub mod init {
    /// Nominal voltages in hundredths of a volt. in0/in1 follow the VID.
    pub const NOMINAL_IN: [i64; 7] = [0, 0, 330, 500, 1200, -1200, -500];

    /// Tolerance around the nominal value, percent
    pub const IN_PERCENTAGE: i64 = 10;

    /// A VID of 3.50 V means "unknown"; assume 2.80 V core instead
    pub const VID_UNKNOWN: i64 = 350;
    pub const VID_FALLBACK: i64 = 280;

    pub const FAN_MIN_RPM: i64 = 3000;

    /// Tenths of a degree Celsius
    pub const TEMP_OVER: i64 = 600;
    pub const TEMP_HYST: i64 = 500;
}

/// File system paths
pub mod paths {
    pub const CONFIG_DIR: &str = "/etc/chipmon";
    pub const CONFIG_FILE: &str = "config.json";
    pub const CONFIG_ENV: &str = "CHIPMON_CONFIG";
    pub const PORT_DEVICE: &str = "/dev/port";
    pub const PROC_IOPORTS: &str = "/proc/ioports";
}
