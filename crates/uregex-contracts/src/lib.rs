//! Shared, version-pinned identifiers for the sandboxed matching program.
//!
//! These constants are the single source of truth for the function table, the stack
//! cursor global and the flag bits that cross the foreign-call boundary. Both the
//! session layer and every engine program implementation depend on them.

mod foreign;
mod status;

pub use foreign::{
    read_u32_le, write_u32_le, CompiledProgram, ForeignError, ForeignErrorKind, ForeignInstance,
    FunctionIndex, GlobalIndex, ProgramLoader, MAX_CALL_ARGS,
};
pub use status::UErrorCode;

/// Mutable global holding the callee's stack cursor. Grows downward.
pub const GLOBAL_STACK_VAR: &str = "globalStackVar";

pub const EXPORT_MALLOC: &str = "malloc";
pub const EXPORT_FREE: &str = "free";
pub const EXPORT_REPLACE: &str = "replace";
pub const EXPORT_UREGEX_OPEN: &str = "uregex_open";
pub const EXPORT_UREGEX_CLOSE: &str = "uregex_close";
pub const EXPORT_UREGEX_SET_TEXT: &str = "uregex_setText";
pub const EXPORT_UREGEX_FIND: &str = "uregex_find";
pub const EXPORT_UREGEX_FIND_NEXT: &str = "uregex_findNext";
pub const EXPORT_UREGEX_START: &str = "uregex_start";
pub const EXPORT_UREGEX_END: &str = "uregex_end";
pub const EXPORT_UREGEX_GET_TEXT: &str = "uregex_getText";
pub const EXPORT_UREGEX_APPEND_REPLACEMENT: &str = "uregex_appendReplacement";
pub const EXPORT_UREGEX_APPEND_TAIL: &str = "uregex_appendTail";

/// Exports every program must provide. `replace` is optional and listed separately.
pub const REQUIRED_EXPORTS: &[&str] = &[
    EXPORT_MALLOC,
    EXPORT_FREE,
    EXPORT_UREGEX_OPEN,
    EXPORT_UREGEX_CLOSE,
    EXPORT_UREGEX_SET_TEXT,
    EXPORT_UREGEX_FIND,
    EXPORT_UREGEX_FIND_NEXT,
    EXPORT_UREGEX_START,
    EXPORT_UREGEX_END,
    EXPORT_UREGEX_GET_TEXT,
    EXPORT_UREGEX_APPEND_REPLACEMENT,
    EXPORT_UREGEX_APPEND_TAIL,
];

/// Size of the per-call scratch block reserved below the stack cursor.
pub const SCRATCH_BYTES: u32 = 16;

/// Layout of the parse-error record written by `uregex_open`: `{ line: i32, offset: i32 }`.
pub const PARSE_ERROR_BYTES: u32 = 8;

/// Size in bytes of one UTF-16 code unit in foreign memory.
pub const UCHAR_BYTES: u32 = 2;

// Flag bits (must match the wrapped engine's numbering).
pub const FLAG_NONE: u32 = 0;
pub const FLAG_UNIX_LINES: u32 = 1;
pub const FLAG_CASE_INSENSITIVE: u32 = 2;
pub const FLAG_COMMENTS: u32 = 4;
pub const FLAG_MULTILINE: u32 = 8;
pub const FLAG_LITERAL: u32 = 16;
pub const FLAG_DOT_ALL: u32 = 32;
pub const FLAG_UNICODE_WORD: u32 = 256;
pub const FLAG_ERROR_ON_UNKNOWN_ESCAPES: u32 = 512;

pub const FLAG_MASK: u32 = FLAG_UNIX_LINES
    | FLAG_CASE_INSENSITIVE
    | FLAG_COMMENTS
    | FLAG_MULTILINE
    | FLAG_LITERAL
    | FLAG_DOT_ALL
    | FLAG_UNICODE_WORD
    | FLAG_ERROR_ON_UNKNOWN_ESCAPES;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bits_are_distinct() {
        let all = [
            FLAG_UNIX_LINES,
            FLAG_CASE_INSENSITIVE,
            FLAG_COMMENTS,
            FLAG_MULTILINE,
            FLAG_LITERAL,
            FLAG_DOT_ALL,
            FLAG_UNICODE_WORD,
            FLAG_ERROR_ON_UNKNOWN_ESCAPES,
        ];
        let mut seen = 0u32;
        for bit in all {
            assert_eq!(bit.count_ones(), 1);
            assert_eq!(seen & bit, 0);
            seen |= bit;
        }
        assert_eq!(seen, FLAG_MASK);
    }

    #[test]
    fn replace_is_not_required() {
        assert!(!REQUIRED_EXPORTS.contains(&EXPORT_REPLACE));
        assert_eq!(REQUIRED_EXPORTS.len(), 12);
    }
}
