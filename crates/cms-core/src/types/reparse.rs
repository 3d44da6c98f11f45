//! Coalescing reparse force-flags.
//!
//! Requests arriving before a cycle is dispatched are OR-combined into one
//! [`ReparseFlags`] value; the orchestrator never queues them separately.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A bitset of reparse force-flags.
///
/// # Examples
///
/// ```
/// use cms_core::ReparseFlags;
///
/// let mut flags = ReparseFlags::FORCE_SCAN;
/// flags |= ReparseFlags::URGENT;
/// assert!(flags.contains(ReparseFlags::URGENT));
/// assert_eq!(flags.to_string(), "URGENT|FORCE_SCAN");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReparseFlags(u8);

impl ReparseFlags {
    /// No forcing: reuse the last reply if it is still current.
    pub const DEFAULT: Self = Self(0);
    /// Dispatch without the reparse delay.
    pub const URGENT: Self = Self(1);
    /// Run the external tool even if the reply is current.
    pub const FORCE_TOOL_RUN: Self = Self(1 << 1);
    /// Pass the initial configuration arguments.
    pub const FORCE_INITIAL_CONFIG: Self = Self(1 << 2);
    /// Pass the pending configuration delta.
    pub const FORCE_EXTRA_CONFIG: Self = Self(1 << 3);
    /// Rescan the filesystem.
    pub const FORCE_SCAN: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::URGENT, "URGENT"),
        (Self::FORCE_TOOL_RUN, "FORCE_TOOL_RUN"),
        (Self::FORCE_INITIAL_CONFIG, "FORCE_INITIAL_CONFIG"),
        (Self::FORCE_EXTRA_CONFIG, "FORCE_EXTRA_CONFIG"),
        (Self::FORCE_SCAN, "FORCE_SCAN"),
    ];

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` if no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if every flag in `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the flags in `other`.
    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clears the flags in `other`.
    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Returns a copy without the flags in `other`.
    #[inline]
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Takes the current value and resets `self` to [`ReparseFlags::DEFAULT`].
    #[inline]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

impl BitOr for ReparseFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ReparseFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ReparseFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("DEFAULT");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_combines() {
        let flags = ReparseFlags::FORCE_TOOL_RUN | ReparseFlags::FORCE_INITIAL_CONFIG;
        assert!(flags.contains(ReparseFlags::FORCE_TOOL_RUN));
        assert!(flags.contains(ReparseFlags::FORCE_INITIAL_CONFIG));
        assert!(!flags.contains(ReparseFlags::URGENT));
    }

    #[test]
    fn test_take_resets() {
        let mut flags = ReparseFlags::FORCE_SCAN | ReparseFlags::URGENT;
        let taken = flags.take();
        assert!(flags.is_empty());
        assert_eq!(taken.bits(), 0b1_0001);
    }

    #[test]
    fn test_remove_and_without() {
        let mut flags = ReparseFlags::FORCE_EXTRA_CONFIG | ReparseFlags::FORCE_TOOL_RUN;
        assert_eq!(
            flags.without(ReparseFlags::FORCE_EXTRA_CONFIG),
            ReparseFlags::FORCE_TOOL_RUN
        );
        flags.remove(ReparseFlags::FORCE_TOOL_RUN);
        assert_eq!(flags, ReparseFlags::FORCE_EXTRA_CONFIG);
    }

    #[test]
    fn test_display() {
        assert_eq!(ReparseFlags::DEFAULT.to_string(), "DEFAULT");
        let flags = ReparseFlags::FORCE_TOOL_RUN | ReparseFlags::FORCE_SCAN;
        assert_eq!(flags.to_string(), "FORCE_TOOL_RUN|FORCE_SCAN");
    }

    #[test]
    fn test_display_follows_declaration_order() {
        let flags = ReparseFlags::FORCE_SCAN | ReparseFlags::URGENT;
        assert_eq!(flags.to_string(), "URGENT|FORCE_SCAN");
    }
}
