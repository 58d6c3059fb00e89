use std::sync::Arc;

use crate::buffer::{ManagedBuffer, Span};
use crate::call::{ForeignCalls, ReplaceOutput};
use crate::codec;
use crate::diag;
use crate::error::{Error, Result};
use crate::flags::RegexFlags;
use crate::pool::{Pool, PooledContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconfigured,
    PatternReady,
    TextReady,
    Closed,
}

/// A compiled pattern plus subject text living inside one pooled execution context.
///
/// Positions in the public API are 1-indexed UTF-16 offsets. A session must be closed
/// with [`Session::close`]; dropping an open session is reported as a leak.
pub struct Session {
    ctx: Option<PooledContext>,
    regex: u32,
    pattern: ManagedBuffer,
    subject: ManagedBuffer,
    replacement: ManagedBuffer,
    output: ManagedBuffer,
    state: SessionState,
}

fn open_calls(ctx: &mut Option<PooledContext>) -> Result<&mut ForeignCalls> {
    ctx.as_deref_mut().ok_or(Error::PatternNotSet)
}

/// Converts a 1-indexed start to an engine offset. Starts below 1 are clamped; a
/// start past the end of the text yields `None`.
fn start_offset(start: i32, len: u32) -> Option<i32> {
    let from = start.max(1) - 1;
    (from as u32 <= len).then_some(from)
}

impl Session {
    /// Opens a session on the process-wide pool.
    pub fn new() -> Result<Session> {
        Session::with_pool(Pool::global())
    }

    pub fn with_pool(pool: &Arc<Pool>) -> Result<Session> {
        let ctx = pool.acquire()?;
        Ok(Session {
            ctx: Some(ctx),
            regex: 0,
            pattern: ManagedBuffer::new(),
            subject: ManagedBuffer::new(),
            replacement: ManagedBuffer::new(),
            output: ManagedBuffer::new(),
            state: SessionState::Unconfigured,
        })
    }

    /// Like [`Session::with_pool`], with pattern and subject buffers pre-sized to `units`.
    pub fn with_capacity(pool: &Arc<Pool>, units: u32) -> Result<Session> {
        let mut session = Session::with_pool(pool)?;
        if let Err(err) = session.presize(units) {
            if let Err(cleanup) = session.close() {
                diag::warn(format_args!("closing session after failed presize: {cleanup}"));
            }
            return Err(err);
        }
        Ok(session)
    }

    fn presize(&mut self, units: u32) -> Result<()> {
        let calls = open_calls(&mut self.ctx)?;
        self.pattern.reserve(calls, units)?;
        self.subject.reserve(calls, units)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Foreign memory currently held by the session's buffers.
    pub fn buffer_capacity_bytes(&self) -> u64 {
        [&self.pattern, &self.subject, &self.replacement, &self.output]
            .iter()
            .map(|b| u64::from(b.capacity_bytes()))
            .sum()
    }

    /// Compiles `pattern`, replacing any previous one. On failure the session is left
    /// without a pattern.
    pub fn set_regex_string(&mut self, pattern: &str, flags: RegexFlags) -> Result<()> {
        let calls = open_calls(&mut self.ctx)?;
        let old = std::mem::take(&mut self.regex);
        self.state = SessionState::Unconfigured;
        self.subject.clear();
        if old != 0 {
            calls.close(old)?;
        }
        self.pattern.set_text(calls, pattern)?;
        self.regex = calls.open(self.pattern.span(), flags)?;
        self.state = SessionState::PatternReady;
        Ok(())
    }

    pub fn set_match_string(&mut self, text: &str) -> Result<()> {
        if self.regex == 0 {
            return Err(Error::PatternNotSet);
        }
        let calls = open_calls(&mut self.ctx)?;
        self.state = SessionState::PatternReady;
        self.subject.set_text(calls, text)?;
        calls.set_text(self.regex, self.subject.span())?;
        self.state = SessionState::TextReady;
        Ok(())
    }

    fn require_text(&self) -> Result<()> {
        match self.state {
            SessionState::TextReady => Ok(()),
            SessionState::PatternReady => Err(Error::TextNotSet),
            SessionState::Unconfigured | SessionState::Closed => Err(Error::PatternNotSet),
        }
    }

    /// Positions the matcher on the `occurrence`-th match at or after `start`.
    fn seek(&mut self, start: i32, occurrence: i32) -> Result<bool> {
        self.require_text()?;
        if occurrence < 1 {
            return Ok(false);
        }
        let Some(from) = start_offset(start, self.subject.len()) else {
            return Ok(false);
        };
        let calls = open_calls(&mut self.ctx)?;
        let mut found = calls.find(self.regex, from)?;
        let mut seen = 1;
        while found && seen < occurrence {
            found = calls.find_next(self.regex)?;
            seen += 1;
        }
        Ok(found)
    }

    pub fn matches(&mut self, start: i32, occurrence: i32) -> Result<bool> {
        self.seek(start, occurrence)
    }

    /// 1-indexed start of the match, or the position just past it with `want_end`.
    /// Returns 0 when there is no such match.
    pub fn index_of(&mut self, start: i32, occurrence: i32, want_end: bool) -> Result<i32> {
        if !self.seek(start, occurrence)? {
            return Ok(0);
        }
        let calls = open_calls(&mut self.ctx)?;
        let pos = if want_end {
            calls.end(self.regex, 0)?
        } else {
            calls.start(self.regex, 0)?
        };
        Ok(pos + 1)
    }

    pub fn substring(&mut self, start: i32, occurrence: i32) -> Result<Option<String>> {
        if !self.seek(start, occurrence)? {
            return Ok(None);
        }
        let calls = open_calls(&mut self.ctx)?;
        let begin = calls.start(self.regex, 0)?;
        let end = calls.end(self.regex, 0)?;
        let view = self.subject.slice(begin as u32, end as u32)?;
        view.text(&self.subject, calls).map(Some)
    }

    /// Replaces the `occurrence`-th match at or after `start`, or every match from
    /// `start` on when `occurrence` is 0. Without a match the subject comes back as is.
    pub fn replace(&mut self, replacement: &str, start: i32, occurrence: i32) -> Result<String> {
        self.require_text()?;
        let calls = open_calls(&mut self.ctx)?;
        let from = match start_offset(start, self.subject.len()) {
            Some(from) if occurrence >= 0 => from,
            _ => return self.subject.text(calls),
        };
        self.replacement.set_text(calls, replacement)?;

        let replaced = if calls.has_composite_replace() {
            match calls.replace(
                self.regex,
                self.replacement.span(),
                self.subject.span(),
                from,
                occurrence,
            )? {
                ReplaceOutput::Unchanged => None,
                ReplaceOutput::Allocated(span) => {
                    let read = calls.read_units(span.addr, span.len);
                    let freed = calls.free(span.addr);
                    let units = read?;
                    freed?;
                    Some(units)
                }
            }
        } else {
            replace_with_appends(
                calls,
                self.regex,
                &self.subject,
                self.replacement.span(),
                &mut self.output,
                from,
                occurrence,
            )?
        };

        match replaced {
            Some(units) => codec::decode(&units),
            None => self.subject.text(calls),
        }
    }

    /// Releases the pattern and buffers and returns the context to its pool. Closing
    /// twice is a no-op. The first error met during cleanup is returned, but the
    /// context is returned either way.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut ctx) = self.ctx.take() else {
            return Ok(());
        };
        self.state = SessionState::Closed;
        let regex = std::mem::take(&mut self.regex);
        let results = [
            if regex != 0 { ctx.close(regex) } else { Ok(()) },
            self.pattern.free(&mut ctx),
            self.subject.free(&mut ctx),
            self.replacement.free(&mut ctx),
            self.output.free(&mut ctx),
        ];
        ctx.release();
        results.into_iter().collect()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.state = SessionState::Closed;
            let pool = Arc::clone(ctx.pool());
            ctx.reclaim_leaked();
            pool.report_leak(format_args!("Session was never closed"));
        }
    }
}

/// Replacement driven from the host through `find`/`appendReplacement`/`appendTail`,
/// for programs without the composite export.
fn replace_with_appends(
    calls: &mut ForeignCalls,
    regex: u32,
    subject: &ManagedBuffer,
    replacement: Span,
    out: &mut ManagedBuffer,
    from: i32,
    occurrence: i32,
) -> Result<Option<Vec<u16>>> {
    let mut found = calls.find(regex, from)?;
    let mut previous_end = 0;
    let mut seen = 1;
    while found && seen < occurrence {
        previous_end = calls.end(regex, 0)?;
        found = calls.find_next(regex)?;
        seen += 1;
    }
    if !found {
        return Ok(None);
    }

    let head_len = previous_end.max(from) as u32;
    let head = subject.slice(0, head_len)?.units(subject, calls)?;
    out.set_units(calls, &head)?;
    loop {
        calls.append_replacement(regex, replacement, out)?;
        if occurrence != 0 || !calls.find_next(regex)? {
            break;
        }
    }
    calls.append_tail(regex, out)?;
    out.units(calls).map(Some)
}
