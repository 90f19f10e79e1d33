//! Database configuration.
//!
//! [`Config`] is fixed when the database is opened. Every [`Connection`]
//! starts from a copy of it and may then adjust the runtime knobs
//! (safety level, log toggle, flush and checkpoint thresholds).
//!
//! [`Connection`]: crate::Connection

/// Largest accepted auto-flush threshold, in KiB.
pub const MAX_AUTO_FLUSH_KB: u64 = 1024 * 1024;

/// Default auto-flush threshold, in KiB.
pub const DEFAULT_AUTO_FLUSH_KB: u64 = 1024;

/// Default auto-checkpoint threshold, in KiB.
pub const DEFAULT_AUTO_CHECKPOINT_KB: u64 = 2048;

/// Default offset region 2 must start at before the log may wrap to 0.
pub const DEFAULT_MIN_LOG_WRAP: u64 = 128;

/// Default number of attempts made to pin a read slot.
pub const DEFAULT_MAX_READ_ATTEMPTS: u32 = 10;

/// Durability level for log writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum SafetyLevel {
    /// No syncs, no sector rounding.
    Off = 0,
    /// Writes are flushed to the OS at commit.
    #[default]
    Normal = 1,
    /// Commits are rounded to the device sector and synced.
    Full = 2,
}

impl SafetyLevel {
    /// Converts a raw level, returning `None` when out of range.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Off),
            1 => Some(Self::Normal),
            2 => Some(Self::Full),
            _ => None,
        }
    }

    /// Converts a raw level, clamping out-of-range values.
    #[must_use]
    pub const fn clamped(raw: i32) -> Self {
        if raw <= 0 {
            Self::Off
        } else if raw >= 2 {
            Self::Full
        } else {
            Self::Normal
        }
    }

    /// Returns the raw numeric level.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Clamps an auto-flush threshold to `0..=MAX_AUTO_FLUSH_KB`.
#[must_use]
pub fn clamp_auto_flush_kb(kb: i64) -> u64 {
    u64::try_from(kb).unwrap_or(0).min(MAX_AUTO_FLUSH_KB)
}

/// Clamps an auto-checkpoint threshold to be non-negative.
#[must_use]
pub fn clamp_auto_checkpoint_kb(kb: i64) -> u64 {
    // Keep the byte value representable.
    u64::try_from(kb).unwrap_or(0).min(u64::MAX / 1024)
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether connections reject write transactions.
    pub read_only: bool,

    /// Durability level for the log.
    pub safety: SafetyLevel,

    /// Whether write transactions append to the log.
    pub use_log: bool,

    /// In-memory tree size, in bytes, above which a commit ages the tree.
    pub auto_flush: u64,

    /// Log size, in bytes, at which a flush also forces a checkpoint.
    pub auto_checkpoint: u64,

    /// Whether a pending flush is performed inline at commit.
    pub auto_work: bool,

    /// Offset region 2 must start at before the log wraps.
    pub min_log_wrap: u64,

    /// Attempts made to pin a read slot before reporting busy.
    pub max_read_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            safety: SafetyLevel::Normal,
            use_log: true,
            auto_flush: DEFAULT_AUTO_FLUSH_KB * 1024,
            auto_checkpoint: DEFAULT_AUTO_CHECKPOINT_KB * 1024,
            auto_work: true,
            min_log_wrap: DEFAULT_MIN_LOG_WRAP,
            max_read_attempts: DEFAULT_MAX_READ_ATTEMPTS,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Opens connections read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the safety level.
    #[must_use]
    pub const fn safety(mut self, level: SafetyLevel) -> Self {
        self.safety = level;
        self
    }

    /// Enables or disables the log.
    #[must_use]
    pub const fn use_log(mut self, value: bool) -> Self {
        self.use_log = value;
        self
    }

    /// Sets the auto-flush threshold in bytes.
    #[must_use]
    pub const fn auto_flush(mut self, bytes: u64) -> Self {
        self.auto_flush = bytes;
        self
    }

    /// Sets the auto-checkpoint threshold in bytes.
    #[must_use]
    pub const fn auto_checkpoint(mut self, bytes: u64) -> Self {
        self.auto_checkpoint = bytes;
        self
    }

    /// Sets whether pending flushes run inline.
    #[must_use]
    pub const fn auto_work(mut self, value: bool) -> Self {
        self.auto_work = value;
        self
    }

    /// Sets the minimum wrap offset.
    #[must_use]
    pub const fn min_log_wrap(mut self, bytes: u64) -> Self {
        self.min_log_wrap = bytes;
        self
    }

    /// Sets the read slot attempt limit. Zero is treated as one.
    #[must_use]
    pub const fn max_read_attempts(mut self, attempts: u32) -> Self {
        self.max_read_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.use_log);
        assert!(!config.read_only);
        assert_eq!(config.safety, SafetyLevel::Normal);
        assert_eq!(config.auto_flush, 1024 * 1024);
        assert_eq!(config.auto_checkpoint, 2048 * 1024);
        assert_eq!(config.min_log_wrap, 128);
        assert_eq!(config.max_read_attempts, 10);
    }

    #[test]
    fn builder() {
        let config = Config::new()
            .read_only(true)
            .safety(SafetyLevel::Full)
            .use_log(false)
            .auto_flush(4096)
            .min_log_wrap(8)
            .max_read_attempts(0);
        assert!(config.read_only);
        assert_eq!(config.safety, SafetyLevel::Full);
        assert!(!config.use_log);
        assert_eq!(config.auto_flush, 4096);
        assert_eq!(config.min_log_wrap, 8);
        assert_eq!(config.max_read_attempts, 1);
    }

    #[test]
    fn safety_levels() {
        assert_eq!(SafetyLevel::from_raw(2), Some(SafetyLevel::Full));
        assert_eq!(SafetyLevel::from_raw(3), None);
        assert_eq!(SafetyLevel::clamped(-4), SafetyLevel::Off);
        assert_eq!(SafetyLevel::clamped(9), SafetyLevel::Full);
        assert_eq!(SafetyLevel::Normal.as_raw(), 1);
    }

    #[test]
    fn threshold_clamping() {
        assert_eq!(clamp_auto_flush_kb(-1), 0);
        assert_eq!(clamp_auto_flush_kb(0), 0);
        assert_eq!(clamp_auto_flush_kb(512), 512);
        assert_eq!(clamp_auto_flush_kb(i64::MAX), MAX_AUTO_FLUSH_KB);
        assert_eq!(clamp_auto_checkpoint_kb(-10), 0);
        assert_eq!(clamp_auto_checkpoint_kb(1 << 40), 1 << 40);
    }
}
