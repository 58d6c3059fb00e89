use std::fmt;

/// Status code written through the `status*` out-parameter of engine calls.
///
/// Numbering follows ICU: zero is success, negative values are warnings and positive
/// values are failures. Calls are no-ops when entered with a failure already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UErrorCode(pub i32);

impl UErrorCode {
    pub const ZERO_ERROR: UErrorCode = UErrorCode(0);
    pub const STRING_NOT_TERMINATED_WARNING: UErrorCode = UErrorCode(-124);
    pub const ILLEGAL_ARGUMENT_ERROR: UErrorCode = UErrorCode(1);
    pub const MEMORY_ALLOCATION_ERROR: UErrorCode = UErrorCode(7);
    pub const INDEX_OUTOFBOUNDS_ERROR: UErrorCode = UErrorCode(8);
    pub const BUFFER_OVERFLOW_ERROR: UErrorCode = UErrorCode(15);

    pub const REGEX_INTERNAL_ERROR: UErrorCode = UErrorCode(0x10300);
    pub const REGEX_RULE_SYNTAX: UErrorCode = UErrorCode(0x10301);
    pub const REGEX_INVALID_STATE: UErrorCode = UErrorCode(0x10302);
    pub const REGEX_BAD_ESCAPE_SEQUENCE: UErrorCode = UErrorCode(0x10303);
    pub const REGEX_PROPERTY_SYNTAX: UErrorCode = UErrorCode(0x10304);
    pub const REGEX_UNIMPLEMENTED: UErrorCode = UErrorCode(0x10305);
    pub const REGEX_MISMATCHED_PAREN: UErrorCode = UErrorCode(0x10306);
    pub const REGEX_NUMBER_TOO_BIG: UErrorCode = UErrorCode(0x10307);
    pub const REGEX_BAD_INTERVAL: UErrorCode = UErrorCode(0x10308);
    pub const REGEX_MAX_LT_MIN: UErrorCode = UErrorCode(0x10309);
    pub const REGEX_INVALID_BACK_REF: UErrorCode = UErrorCode(0x1030a);
    pub const REGEX_INVALID_FLAG: UErrorCode = UErrorCode(0x1030b);
    pub const REGEX_MISSING_CLOSE_BRACKET: UErrorCode = UErrorCode(0x1030f);
    pub const REGEX_INVALID_RANGE: UErrorCode = UErrorCode(0x10310);
    pub const REGEX_STACK_OVERFLOW: UErrorCode = UErrorCode(0x10311);
    pub const REGEX_PATTERN_TOO_BIG: UErrorCode = UErrorCode(0x10314);
    pub const REGEX_INVALID_CAPTURE_GROUP_NAME: UErrorCode = UErrorCode(0x10315);

    pub fn from_raw(raw: u32) -> Self {
        UErrorCode(raw as i32)
    }

    pub fn raw(self) -> u32 {
        self.0 as u32
    }

    pub fn is_failure(self) -> bool {
        self.0 > 0
    }

    pub fn is_success(self) -> bool {
        self.0 <= 0
    }

    pub fn is_warning(self) -> bool {
        self.0 < 0
    }

    pub fn name(self) -> &'static str {
        match self {
            UErrorCode::ZERO_ERROR => "U_ZERO_ERROR",
            UErrorCode::STRING_NOT_TERMINATED_WARNING => "U_STRING_NOT_TERMINATED_WARNING",
            UErrorCode::ILLEGAL_ARGUMENT_ERROR => "U_ILLEGAL_ARGUMENT_ERROR",
            UErrorCode::MEMORY_ALLOCATION_ERROR => "U_MEMORY_ALLOCATION_ERROR",
            UErrorCode::INDEX_OUTOFBOUNDS_ERROR => "U_INDEX_OUTOFBOUNDS_ERROR",
            UErrorCode::BUFFER_OVERFLOW_ERROR => "U_BUFFER_OVERFLOW_ERROR",
            UErrorCode::REGEX_INTERNAL_ERROR => "U_REGEX_INTERNAL_ERROR",
            UErrorCode::REGEX_RULE_SYNTAX => "U_REGEX_RULE_SYNTAX",
            UErrorCode::REGEX_INVALID_STATE => "U_REGEX_INVALID_STATE",
            UErrorCode::REGEX_BAD_ESCAPE_SEQUENCE => "U_REGEX_BAD_ESCAPE_SEQUENCE",
            UErrorCode::REGEX_PROPERTY_SYNTAX => "U_REGEX_PROPERTY_SYNTAX",
            UErrorCode::REGEX_UNIMPLEMENTED => "U_REGEX_UNIMPLEMENTED",
            UErrorCode::REGEX_MISMATCHED_PAREN => "U_REGEX_MISMATCHED_PAREN",
            UErrorCode::REGEX_NUMBER_TOO_BIG => "U_REGEX_NUMBER_TOO_BIG",
            UErrorCode::REGEX_BAD_INTERVAL => "U_REGEX_BAD_INTERVAL",
            UErrorCode::REGEX_MAX_LT_MIN => "U_REGEX_MAX_LT_MIN",
            UErrorCode::REGEX_INVALID_BACK_REF => "U_REGEX_INVALID_BACK_REF",
            UErrorCode::REGEX_INVALID_FLAG => "U_REGEX_INVALID_FLAG",
            UErrorCode::REGEX_MISSING_CLOSE_BRACKET => "U_REGEX_MISSING_CLOSE_BRACKET",
            UErrorCode::REGEX_INVALID_RANGE => "U_REGEX_INVALID_RANGE",
            UErrorCode::REGEX_STACK_OVERFLOW => "U_REGEX_STACK_OVERFLOW",
            UErrorCode::REGEX_PATTERN_TOO_BIG => "U_REGEX_PATTERN_TOO_BIG",
            UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME => "U_REGEX_INVALID_CAPTURE_GROUP_NAME",
            _ => "U_UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for UErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(UErrorCode::ZERO_ERROR.is_success());
        assert!(!UErrorCode::ZERO_ERROR.is_warning());
        assert!(UErrorCode::STRING_NOT_TERMINATED_WARNING.is_success());
        assert!(UErrorCode::STRING_NOT_TERMINATED_WARNING.is_warning());
        assert!(UErrorCode::BUFFER_OVERFLOW_ERROR.is_failure());
    }

    #[test]
    fn raw_round_trips_negative_codes() {
        let w = UErrorCode::STRING_NOT_TERMINATED_WARNING;
        assert_eq!(UErrorCode::from_raw(w.raw()), w);
    }

    #[test]
    fn display_names_code() {
        assert_eq!(
            UErrorCode::BUFFER_OVERFLOW_ERROR.to_string(),
            "U_BUFFER_OVERFLOW_ERROR (15)"
        );
        assert_eq!(UErrorCode(42).name(), "U_UNKNOWN_ERROR");
    }
}
