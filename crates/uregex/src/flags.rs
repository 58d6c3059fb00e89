use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use uregex_contracts as contracts;

/// Pattern compile flags. Bit values are shared with the engine program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegexFlags(u32);

impl RegexFlags {
    pub const NONE: RegexFlags = RegexFlags(contracts::FLAG_NONE);
    pub const UNIX_LINES: RegexFlags = RegexFlags(contracts::FLAG_UNIX_LINES);
    pub const CASE_INSENSITIVE: RegexFlags = RegexFlags(contracts::FLAG_CASE_INSENSITIVE);
    pub const COMMENTS: RegexFlags = RegexFlags(contracts::FLAG_COMMENTS);
    pub const MULTILINE: RegexFlags = RegexFlags(contracts::FLAG_MULTILINE);
    pub const LITERAL: RegexFlags = RegexFlags(contracts::FLAG_LITERAL);
    pub const DOT_ALL: RegexFlags = RegexFlags(contracts::FLAG_DOT_ALL);
    pub const UNICODE_WORD: RegexFlags = RegexFlags(contracts::FLAG_UNICODE_WORD);
    pub const ERROR_ON_UNKNOWN_ESCAPES: RegexFlags =
        RegexFlags(contracts::FLAG_ERROR_ON_UNKNOWN_ESCAPES);

    const NAMES: [(RegexFlags, &'static str); 8] = [
        (RegexFlags::UNIX_LINES, "unix-lines"),
        (RegexFlags::CASE_INSENSITIVE, "case-insensitive"),
        (RegexFlags::COMMENTS, "comments"),
        (RegexFlags::MULTILINE, "multiline"),
        (RegexFlags::LITERAL, "literal"),
        (RegexFlags::DOT_ALL, "dot-all"),
        (RegexFlags::UNICODE_WORD, "unicode-word"),
        (RegexFlags::ERROR_ON_UNKNOWN_ESCAPES, "error-on-unknown-escapes"),
    ];

    /// Keeps unknown bits; the engine rejects them at pattern compile time.
    pub const fn from_bits(bits: u32) -> Self {
        RegexFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: RegexFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_known(self) -> bool {
        self.0 & !contracts::FLAG_MASK == 0
    }
}

impl BitOr for RegexFlags {
    type Output = RegexFlags;

    fn bitor(self, rhs: RegexFlags) -> RegexFlags {
        RegexFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RegexFlags {
    fn bitor_assign(&mut self, rhs: RegexFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for RegexFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("none");
        }
        let mut first = true;
        let mut rest = self.0;
        for (flag, name) in RegexFlags::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
                rest &= !flag.0;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{rest:#x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_display() {
        let flags = RegexFlags::CASE_INSENSITIVE | RegexFlags::MULTILINE;
        assert_eq!(flags.bits(), 10);
        assert!(flags.contains(RegexFlags::MULTILINE));
        assert!(!flags.contains(RegexFlags::DOT_ALL));
        assert_eq!(flags.to_string(), "case-insensitive|multiline");
        assert_eq!(RegexFlags::NONE.to_string(), "none");
        assert_eq!(RegexFlags::from_bits(0x1001).to_string(), "unix-lines|0x1000");
        assert!(!RegexFlags::from_bits(0x1000).is_known());
    }
}
