use std::borrow::Cow;

use regex_automata::meta::{Cache, Regex};
use regex_automata::util::captures::Captures;
use regex_automata::util::syntax;
use regex_automata::{Input, MatchKind, PatternID};
use regex_syntax::ast;
use uregex_contracts::{
    UErrorCode, FLAG_CASE_INSENSITIVE, FLAG_COMMENTS, FLAG_DOT_ALL,
    FLAG_ERROR_ON_UNKNOWN_ESCAPES, FLAG_LITERAL, FLAG_MASK, FLAG_MULTILINE, FLAG_UNIX_LINES,
};

// Escapes the matcher understands natively. Any other escaped ASCII letter is taken
// literally unless FLAG_ERROR_ON_UNKNOWN_ESCAPES is set.
const KNOWN_LETTER_ESCAPES: &str = "aAbBdDfnpPrsStuUvwWxz";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileError {
    pub status: UErrorCode,
    /// Offset in UTF-16 units from the start of the pattern.
    pub offset: u32,
}

fn flag(flags: u32, bit: u32) -> bool {
    (flags & bit) != 0
}

fn syntax_config(flags: u32) -> syntax::Config {
    syntax::Config::new()
        .case_insensitive(flag(flags, FLAG_CASE_INSENSITIVE))
        .multi_line(flag(flags, FLAG_MULTILINE))
        .dot_matches_new_line(flag(flags, FLAG_DOT_ALL))
        .ignore_whitespace(flag(flags, FLAG_COMMENTS))
        .crlf(!flag(flags, FLAG_UNIX_LINES))
}

pub fn compile(pattern: &str, flags: u32) -> Result<Regex, CompileError> {
    if flags & !FLAG_MASK != 0 {
        return Err(CompileError {
            status: UErrorCode::REGEX_INVALID_FLAG,
            offset: 0,
        });
    }
    if pattern.is_empty() {
        return Err(CompileError {
            status: UErrorCode::ILLEGAL_ARGUMENT_ERROR,
            offset: 0,
        });
    }

    let source: Cow<'_, str> = if flag(flags, FLAG_LITERAL) {
        Cow::Owned(regex_syntax::escape(pattern))
    } else if flag(flags, FLAG_ERROR_ON_UNKNOWN_ESCAPES) {
        Cow::Borrowed(pattern)
    } else {
        relax_unknown_escapes(pattern)
    };

    let mut builder = Regex::builder();
    builder.configure(Regex::config().match_kind(MatchKind::LeftmostFirst));
    builder.syntax(syntax_config(flags));
    builder.build(&source).map_err(|err| match err.syntax_error() {
        Some(se) => map_syntax_error(se, &source),
        None => CompileError {
            status: UErrorCode::REGEX_PATTERN_TOO_BIG,
            offset: 0,
        },
    })
}

fn relax_unknown_escapes(pattern: &str) -> Cow<'_, str> {
    if !pattern.contains('\\') {
        return Cow::Borrowed(pattern);
    }
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(e) if e.is_ascii_alphabetic() && !KNOWN_LETTER_ESCAPES.contains(e) => out.push(e),
            Some(e) => {
                out.push('\\');
                out.push(e);
            }
            None => out.push('\\'),
        }
    }
    Cow::Owned(out)
}

fn utf16_offset(source: &str, byte_offset: usize) -> u32 {
    source
        .get(..byte_offset.min(source.len()))
        .map(|s| s.encode_utf16().count() as u32)
        .unwrap_or(0)
}

fn map_syntax_error(err: &regex_syntax::Error, source: &str) -> CompileError {
    match err {
        regex_syntax::Error::Parse(e) => CompileError {
            status: map_ast_error(e.kind()),
            offset: utf16_offset(source, e.span().start.offset),
        },
        regex_syntax::Error::Translate(e) => CompileError {
            status: UErrorCode::REGEX_PROPERTY_SYNTAX,
            offset: utf16_offset(source, e.span().start.offset),
        },
        _ => CompileError {
            status: UErrorCode::REGEX_RULE_SYNTAX,
            offset: 0,
        },
    }
}

fn map_ast_error(kind: &ast::ErrorKind) -> UErrorCode {
    match kind {
        ast::ErrorKind::GroupUnclosed | ast::ErrorKind::GroupUnopened => {
            UErrorCode::REGEX_MISMATCHED_PAREN
        }
        ast::ErrorKind::ClassUnclosed => UErrorCode::REGEX_MISSING_CLOSE_BRACKET,
        ast::ErrorKind::ClassRangeInvalid => UErrorCode::REGEX_INVALID_RANGE,
        ast::ErrorKind::EscapeUnrecognized
        | ast::ErrorKind::EscapeUnexpectedEof
        | ast::ErrorKind::EscapeHexEmpty
        | ast::ErrorKind::EscapeHexInvalid
        | ast::ErrorKind::EscapeHexInvalidDigit => UErrorCode::REGEX_BAD_ESCAPE_SEQUENCE,
        ast::ErrorKind::RepetitionCountInvalid => UErrorCode::REGEX_MAX_LT_MIN,
        ast::ErrorKind::RepetitionCountDecimalEmpty
        | ast::ErrorKind::RepetitionCountUnclosed
        | ast::ErrorKind::DecimalInvalid => UErrorCode::REGEX_BAD_INTERVAL,
        ast::ErrorKind::CaptureLimitExceeded => UErrorCode::REGEX_PATTERN_TOO_BIG,
        ast::ErrorKind::NestLimitExceeded(_) => UErrorCode::REGEX_STACK_OVERFLOW,
        ast::ErrorKind::UnsupportedBackreference | ast::ErrorKind::UnsupportedLookAround => {
            UErrorCode::REGEX_UNIMPLEMENTED
        }
        _ => UErrorCode::REGEX_RULE_SYNTAX,
    }
}

/// Subject text bound to a matcher, kept as the caller's UTF-16 units plus a UTF-8
/// copy for searching. Offsets cross between the two through the index tables.
pub struct Subject {
    pub addr: u32,
    pub units: Vec<u16>,
    utf8: String,
    // utf8 byte offset -> utf16 offset of the containing char; len = utf8.len() + 1
    to_utf16: Vec<u32>,
    // utf16 offset -> utf8 offset; a position inside a surrogate pair rounds up
    to_utf8: Vec<u32>,
}

impl Subject {
    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    pub fn new(addr: u32, units: Vec<u16>) -> Self {
        let mut utf8 = String::with_capacity(units.len());
        let mut to_utf16 = Vec::with_capacity(units.len() + 1);
        let mut to_utf8 = Vec::with_capacity(units.len() + 1);
        let mut pos16 = 0u32;
        for decoded in char::decode_utf16(units.iter().copied()) {
            let (c, width16) = match decoded {
                Ok(c) => (c, c.len_utf16() as u32),
                Err(_) => (char::REPLACEMENT_CHARACTER, 1),
            };
            let start8 = utf8.len();
            to_utf8.push(start8 as u32);
            if width16 == 2 {
                to_utf8.push((start8 + c.len_utf8()) as u32);
            }
            utf8.push(c);
            to_utf16.extend(std::iter::repeat(pos16).take(c.len_utf8()));
            pos16 += width16;
        }
        to_utf8.push(utf8.len() as u32);
        to_utf16.push(pos16);
        Self {
            addr,
            units,
            utf8,
            to_utf16,
            to_utf8,
        }
    }

    pub fn len(&self) -> u32 {
        self.units.len() as u32
    }
}

pub struct Matcher {
    regex: Regex,
    cache: Cache,
    caps: Captures,
    pub subject: Subject,
    /// Group spans of the current match in UTF-16 units; empty when there is none.
    groups: Vec<Option<(u32, u32)>>,
    next_utf8: Option<usize>,
    /// End of the previous match, or the search origin right after `find_from`.
    pub last_match_end: u32,
}

impl Matcher {
    pub fn new(regex: Regex) -> Self {
        let cache = regex.create_cache();
        let caps = regex.create_captures();
        Self {
            regex,
            cache,
            caps,
            subject: Subject::empty(),
            groups: Vec::new(),
            next_utf8: Some(0),
            last_match_end: 0,
        }
    }

    pub fn set_text(&mut self, subject: Subject) {
        self.subject = subject;
        self.groups.clear();
        self.next_utf8 = Some(0);
        self.last_match_end = 0;
    }

    pub fn group_count(&self) -> usize {
        self.regex.captures_len()
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.regex.group_info().to_index(PatternID::ZERO, name)
    }

    pub fn has_match(&self) -> bool {
        !self.groups.is_empty()
    }

    pub fn find_from(&mut self, start: i32) -> Result<bool, UErrorCode> {
        if start < 0 || start as u32 > self.subject.len() {
            return Err(UErrorCode::INDEX_OUTOFBOUNDS_ERROR);
        }
        let start = start as u32;
        self.last_match_end = start;
        self.next_utf8 = Some(self.subject.to_utf8[start as usize] as usize);
        Ok(self.search())
    }

    pub fn find_next(&mut self) -> bool {
        if let Some(&Some((_, end))) = self.groups.first() {
            self.last_match_end = end;
        }
        self.search()
    }

    fn search(&mut self) -> bool {
        self.groups.clear();
        let Some(pos) = self.next_utf8 else {
            return false;
        };
        let hay = self.subject.utf8.as_bytes();
        let input = Input::new(hay).span(pos..hay.len());
        self.regex
            .search_captures_with(&mut self.cache, &input, &mut self.caps);
        let Some(m) = self.caps.get_match() else {
            self.next_utf8 = None;
            return false;
        };

        let to_utf16 = &self.subject.to_utf16;
        self.groups = (0..self.caps.group_len())
            .map(|i| {
                self.caps
                    .get_group(i)
                    .map(|sp| (to_utf16[sp.start], to_utf16[sp.end]))
            })
            .collect();

        self.next_utf8 = if m.end() > m.start() {
            Some(m.end())
        } else {
            self.subject.utf8[m.end()..]
                .chars()
                .next()
                .map(|c| m.end() + c.len_utf8())
        };
        true
    }

    fn group(&self, group: i32) -> Result<Option<(u32, u32)>, UErrorCode> {
        if !self.has_match() {
            return Err(UErrorCode::REGEX_INVALID_STATE);
        }
        if group < 0 || group as usize >= self.groups.len() {
            return Err(UErrorCode::INDEX_OUTOFBOUNDS_ERROR);
        }
        Ok(self.groups[group as usize])
    }

    pub fn start(&self, group: i32) -> Result<i32, UErrorCode> {
        Ok(self.group(group)?.map(|(s, _)| s as i32).unwrap_or(-1))
    }

    pub fn end(&self, group: i32) -> Result<i32, UErrorCode> {
        Ok(self.group(group)?.map(|(_, e)| e as i32).unwrap_or(-1))
    }

    /// Units of the given group in the current match; empty if the group did not take part.
    pub fn group_units(&self, group: usize) -> &[u16] {
        match self.groups.get(group) {
            Some(Some((s, e))) => &self.subject.units[*s as usize..*e as usize],
            _ => &[],
        }
    }

    pub fn match_span(&self) -> Option<(u32, u32)> {
        self.groups.first().copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn matcher(pattern: &str, flags: u32, text: &str) -> Matcher {
        let mut m = Matcher::new(compile(pattern, flags).unwrap());
        m.set_text(Subject::new(0, units(text)));
        m
    }

    #[test]
    fn find_then_find_next_walks_matches() {
        let mut m = matcher("[a-z]+", 0, "abc def ghi");
        assert!(m.find_from(0).unwrap());
        assert_eq!((m.start(0).unwrap(), m.end(0).unwrap()), (0, 3));
        assert!(m.find_next());
        assert_eq!(m.last_match_end, 3);
        assert_eq!((m.start(0).unwrap(), m.end(0).unwrap()), (4, 7));
        assert!(m.find_next());
        assert!(!m.find_next());
        assert_eq!(m.last_match_end, 11);
        assert!(!m.find_next());
        assert_eq!(m.start(0), Err(UErrorCode::REGEX_INVALID_STATE));
    }

    #[test]
    fn find_from_checks_bounds_and_resets_origin() {
        let mut m = matcher("[a-z]+", 0, "abc def");
        assert_eq!(m.find_from(8), Err(UErrorCode::INDEX_OUTOFBOUNDS_ERROR));
        assert_eq!(m.find_from(-1), Err(UErrorCode::INDEX_OUTOFBOUNDS_ERROR));
        assert!(m.find_from(5).unwrap());
        assert_eq!(m.last_match_end, 5);
        assert_eq!((m.start(0).unwrap(), m.end(0).unwrap()), (5, 7));
        assert!(!m.find_from(7).unwrap());
    }

    #[test]
    fn offsets_are_utf16_units() {
        let mut m = matcher("b+", 0, "\u{1F600}a\u{e9}bb");
        assert!(m.find_from(0).unwrap());
        assert_eq!((m.start(0).unwrap(), m.end(0).unwrap()), (4, 6));
        // starting inside the surrogate pair rounds up to the next char
        assert!(m.find_from(1).unwrap());
        assert_eq!(m.start(0).unwrap(), 4);
    }

    #[test]
    fn empty_matches_advance_by_one_char() {
        let mut m = matcher("x*", 0, "a\u{1F600}");
        let mut spans = Vec::new();
        let mut found = m.find_from(0).unwrap();
        while found {
            spans.push((m.start(0).unwrap(), m.end(0).unwrap()));
            found = m.find_next();
        }
        assert_eq!(spans, vec![(0, 0), (1, 1), (3, 3)]);
    }

    #[test]
    fn groups_report_unmatched_as_minus_one() {
        let mut m = matcher("(a)|(b)", 0, "b");
        assert!(m.find_from(0).unwrap());
        assert_eq!(m.start(1).unwrap(), -1);
        assert_eq!(m.start(2).unwrap(), 0);
        assert_eq!(m.end(3), Err(UErrorCode::INDEX_OUTOFBOUNDS_ERROR));
        assert_eq!(m.group_units(2), &units("b")[..]);
        assert!(m.group_units(1).is_empty());
    }

    #[test]
    fn flags_translate_to_syntax_options() {
        let mut m = matcher("^abc$", FLAG_CASE_INSENSITIVE, "ABC");
        assert!(m.find_from(0).unwrap());

        let mut m = matcher("^b$", FLAG_MULTILINE, "a\nb\nc");
        assert!(m.find_from(0).unwrap());
        assert_eq!(m.start(0).unwrap(), 2);

        let mut m = matcher("a.b", 0, "a\nb");
        assert!(!m.find_from(0).unwrap());
        let mut m = matcher("a.b", FLAG_DOT_ALL, "a\nb");
        assert!(m.find_from(0).unwrap());

        let mut m = matcher("a+.b", FLAG_LITERAL, "aaa+.b");
        assert!(m.find_from(0).unwrap());
        assert_eq!(m.start(0).unwrap(), 2);

        let mut m = matcher("a b # comment", FLAG_COMMENTS, "xab");
        assert!(m.find_from(0).unwrap());
        assert_eq!(m.start(0).unwrap(), 1);
    }

    #[test]
    fn unknown_escapes_depend_on_flag() {
        let mut m = matcher(r"\q\d", 0, "q7");
        assert!(m.find_from(0).unwrap());
        let err = compile(r"\q\d", FLAG_ERROR_ON_UNKNOWN_ESCAPES).unwrap_err();
        assert_eq!(err.status, UErrorCode::REGEX_BAD_ESCAPE_SEQUENCE);
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn compile_errors_map_to_status_codes() {
        assert_eq!(
            compile("(abc", 0).unwrap_err().status,
            UErrorCode::REGEX_MISMATCHED_PAREN
        );
        assert_eq!(
            compile("[abc", 0).unwrap_err().status,
            UErrorCode::REGEX_MISSING_CLOSE_BRACKET
        );
        assert_eq!(
            compile("a{3,1}", 0).unwrap_err().status,
            UErrorCode::REGEX_MAX_LT_MIN
        );
        assert_eq!(
            compile("abc", 1 << 20).unwrap_err().status,
            UErrorCode::REGEX_INVALID_FLAG
        );
        assert_eq!(
            compile("", 0).unwrap_err().status,
            UErrorCode::ILLEGAL_ARGUMENT_ERROR
        );
    }
}
