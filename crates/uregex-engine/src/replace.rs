//! Replacement-string expansion and the append/replace composites built on it.

use uregex_contracts::UErrorCode;

use crate::matcher::Matcher;

const BACKSLASH: u16 = b'\\' as u16;
const DOLLAR: u16 = b'$' as u16;
const OPEN_BRACE: u16 = b'{' as u16;
const CLOSE_BRACE: u16 = b'}' as u16;

fn digit(unit: u16) -> Option<usize> {
    match unit {
        0x30..=0x39 => Some(usize::from(unit - 0x30)),
        _ => None,
    }
}

/// Expands `$n`, `${name}` and `\x` references in `repl` against the current match.
pub fn expand(matcher: &Matcher, repl: &[u16], out: &mut Vec<u16>) -> Result<(), UErrorCode> {
    let group_count = matcher.group_count();
    let mut i = 0;
    while i < repl.len() {
        let unit = repl[i];
        i += 1;
        match unit {
            BACKSLASH => match repl.get(i) {
                Some(&quoted) => {
                    out.push(quoted);
                    i += 1;
                }
                None => out.push(BACKSLASH),
            },
            DOLLAR => {
                let group = match repl.get(i).copied() {
                    Some(OPEN_BRACE) => {
                        let close = repl[i + 1..]
                            .iter()
                            .position(|&u| u == CLOSE_BRACE)
                            .ok_or(UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME)?;
                        let name = String::from_utf16(&repl[i + 1..i + 1 + close])
                            .map_err(|_| UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME)?;
                        i += close + 2;
                        matcher
                            .group_index(&name)
                            .ok_or(UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME)?
                    }
                    Some(u) => {
                        let first = digit(u).ok_or(UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME)?;
                        if first >= group_count {
                            return Err(UErrorCode::INDEX_OUTOFBOUNDS_ERROR);
                        }
                        i += 1;
                        let mut group = first;
                        // greedy while the longer number still names a group
                        while let Some(d) = repl.get(i).copied().and_then(digit) {
                            let wider = group * 10 + d;
                            if wider >= group_count {
                                break;
                            }
                            group = wider;
                            i += 1;
                        }
                        group
                    }
                    None => return Err(UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME),
                };
                out.extend_from_slice(matcher.group_units(group));
            }
            other => out.push(other),
        }
    }
    Ok(())
}

/// Text between the previous match end and the current match, followed by the expansion.
pub fn append_replacement(matcher: &Matcher, repl: &[u16]) -> Result<Vec<u16>, UErrorCode> {
    let (start, _) = matcher
        .match_span()
        .ok_or(UErrorCode::REGEX_INVALID_STATE)?;
    let from = (matcher.last_match_end.min(start)) as usize;
    let mut out = matcher.subject.units[from..start as usize].to_vec();
    expand(matcher, repl, &mut out)?;
    Ok(out)
}

/// Text after the current match, or after the last match once the search is exhausted.
pub fn append_tail(matcher: &Matcher) -> Vec<u16> {
    let from = match matcher.match_span() {
        Some((_, end)) => end,
        None => matcher.last_match_end,
    };
    let units = &matcher.subject.units;
    units[(from as usize).min(units.len())..].to_vec()
}

/// Replaces the `occurrence`-th match at or after `start`, or every match when
/// `occurrence` is 0. Returns `None` when nothing matched so the caller can hand
/// back the original text unchanged.
pub fn replace_all_or_nth(
    matcher: &mut Matcher,
    repl: &[u16],
    start: i32,
    occurrence: i32,
) -> Result<Option<Vec<u16>>, UErrorCode> {
    let mut found = matcher.find_from(start)?;
    let mut seen = 1;
    while found && seen < occurrence {
        found = matcher.find_next();
        seen += 1;
    }
    if !found {
        return Ok(None);
    }

    let head = matcher.last_match_end as usize;
    let mut out = matcher.subject.units[..head].to_vec();
    loop {
        out.extend(append_replacement(matcher, repl)?);
        if occurrence != 0 || !matcher.find_next() {
            break;
        }
    }
    out.extend(append_tail(matcher));
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{compile, Subject};

    fn units(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    fn matcher(pattern: &str, text: &str) -> Matcher {
        let mut m = Matcher::new(compile(pattern, 0).unwrap());
        m.set_text(Subject::new(0, units(text)));
        m
    }

    fn replace(pattern: &str, text: &str, repl: &str, start: i32, occurrence: i32) -> String {
        let mut m = matcher(pattern, text);
        match replace_all_or_nth(&mut m, &units(repl), start, occurrence).unwrap() {
            Some(out) => String::from_utf16(&out).unwrap(),
            None => text.to_string(),
        }
    }

    #[test]
    fn expands_group_references() {
        let mut m = matcher(r"(?P<word>\w+)-(\d+)", "x abc-42 y");
        assert!(m.find_from(0).unwrap());
        let mut out = Vec::new();
        expand(&m, &units(r"$2:${word}:\$1:$0"), &mut out).unwrap();
        assert_eq!(String::from_utf16(&out).unwrap(), "42:abc:$1:abc-42");
    }

    #[test]
    fn group_numbers_are_greedy_only_while_valid() {
        let mut m = matcher("(a)(b)", "ab");
        assert!(m.find_from(0).unwrap());
        let mut out = Vec::new();
        expand(&m, &units("$10"), &mut out).unwrap();
        assert_eq!(String::from_utf16(&out).unwrap(), "a0");

        let mut out = Vec::new();
        assert_eq!(
            expand(&m, &units("$3"), &mut out),
            Err(UErrorCode::INDEX_OUTOFBOUNDS_ERROR)
        );
        assert_eq!(
            expand(&m, &units("$x"), &mut out),
            Err(UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME)
        );
        assert_eq!(
            expand(&m, &units("${nope}"), &mut out),
            Err(UErrorCode::REGEX_INVALID_CAPTURE_GROUP_NAME)
        );
    }

    #[test]
    fn append_requires_a_match() {
        let mut m = matcher("z", "abc");
        assert!(!m.find_from(0).unwrap());
        assert_eq!(
            append_replacement(&m, &units("x")),
            Err(UErrorCode::REGEX_INVALID_STATE)
        );
        assert_eq!(append_tail(&m), units("abc"));
    }

    #[test]
    fn replace_all_and_nth() {
        assert_eq!(replace("[a-z]+", "abc def ghi", "X", 0, 0), "X X X");
        assert_eq!(replace("[a-z]+", "abc def ghi", "X", 0, 2), "abc X ghi");
        assert_eq!(replace("[a-z]+", "abc def ghi", "X", 4, 0), "abc X X");
        assert_eq!(replace("[a-z]+", "abc def ghi", "X", 0, 4), "abc def ghi");
        assert_eq!(replace("q", "abc", "X", 0, 0), "abc");
    }

    #[test]
    fn replace_keeps_text_before_start() {
        assert_eq!(replace("a", "aaaa", "b", 2, 0), "aabb");
        assert_eq!(replace("a", "aaaa", "b", 2, 1), "aaba");
    }
}
