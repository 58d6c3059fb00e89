//! Typed wrappers around the engine's exported functions.
//!
//! Output parameters (status codes, lengths, cursor pointers) cannot point into host
//! memory, so every call that needs them carves a [`Scratch`] block off the top of the
//! callee's own stack and restores the cursor afterwards.

use uregex_contracts::{
    read_u32_le, write_u32_le, ForeignInstance, FunctionIndex, GlobalIndex, UErrorCode,
    EXPORT_FREE, EXPORT_MALLOC, EXPORT_REPLACE, EXPORT_UREGEX_APPEND_REPLACEMENT,
    EXPORT_UREGEX_APPEND_TAIL, EXPORT_UREGEX_CLOSE, EXPORT_UREGEX_END, EXPORT_UREGEX_FIND,
    EXPORT_UREGEX_FIND_NEXT, EXPORT_UREGEX_GET_TEXT, EXPORT_UREGEX_OPEN, EXPORT_UREGEX_SET_TEXT,
    EXPORT_UREGEX_START, GLOBAL_STACK_VAR, MAX_CALL_ARGS, PARSE_ERROR_BYTES, REQUIRED_EXPORTS,
    SCRATCH_BYTES, UCHAR_BYTES,
};

use crate::buffer::{ManagedBuffer, Span};
use crate::codec;
use crate::error::{Error, Result};
use crate::flags::RegexFlags;

#[derive(Debug, Clone, Copy)]
struct FunctionTable {
    malloc: FunctionIndex,
    free: FunctionIndex,
    open: FunctionIndex,
    close: FunctionIndex,
    set_text: FunctionIndex,
    find: FunctionIndex,
    find_next: FunctionIndex,
    start: FunctionIndex,
    end: FunctionIndex,
    get_text: FunctionIndex,
    append_replacement: FunctionIndex,
    append_tail: FunctionIndex,
    replace: Option<FunctionIndex>,
}

impl FunctionTable {
    fn resolve(instance: &dyn ForeignInstance) -> Result<Self> {
        if let Some(&missing) = REQUIRED_EXPORTS
            .iter()
            .find(|&&name| instance.exported_function(name).is_none())
        {
            return Err(Error::MissingExport(missing));
        }
        let f = |name: &'static str| {
            instance
                .exported_function(name)
                .ok_or(Error::MissingExport(name))
        };
        Ok(FunctionTable {
            malloc: f(EXPORT_MALLOC)?,
            free: f(EXPORT_FREE)?,
            open: f(EXPORT_UREGEX_OPEN)?,
            close: f(EXPORT_UREGEX_CLOSE)?,
            set_text: f(EXPORT_UREGEX_SET_TEXT)?,
            find: f(EXPORT_UREGEX_FIND)?,
            find_next: f(EXPORT_UREGEX_FIND_NEXT)?,
            start: f(EXPORT_UREGEX_START)?,
            end: f(EXPORT_UREGEX_END)?,
            get_text: f(EXPORT_UREGEX_GET_TEXT)?,
            append_replacement: f(EXPORT_UREGEX_APPEND_REPLACEMENT)?,
            append_tail: f(EXPORT_UREGEX_APPEND_TAIL)?,
            replace: instance.exported_function(EXPORT_REPLACE),
        })
    }
}

/// Addresses inside the 16-byte block reserved below the saved stack cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratch {
    top: u32,
}

impl Scratch {
    /// 4-byte slot `n`, counting down from the saved cursor.
    pub fn slot(self, n: u32) -> u32 {
        self.top - 4 * (n + 1)
    }

    /// Start of the block; the parse-error record lives here.
    pub fn base(self) -> u32 {
        self.top - SCRATCH_BYTES
    }
}

/// Result of the composite `replace` export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutput {
    /// Nothing matched; the engine handed back the original text.
    Unchanged,
    /// Freshly allocated result the caller must read and then free.
    Allocated(Span),
}

pub struct ForeignCalls {
    instance: Box<dyn ForeignInstance>,
    funcs: FunctionTable,
    stack_var: GlobalIndex,
    poisoned: bool,
}

impl ForeignCalls {
    pub fn new(instance: Box<dyn ForeignInstance>) -> Result<Self> {
        let funcs = FunctionTable::resolve(instance.as_ref())?;
        let stack_var = instance
            .exported_global(GLOBAL_STACK_VAR)
            .ok_or(Error::MissingExport(GLOBAL_STACK_VAR))?;
        Ok(ForeignCalls {
            instance,
            funcs,
            stack_var,
            poisoned: false,
        })
    }

    /// Set once a trap or a memory fault means the instance can no longer be trusted.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn has_composite_replace(&self) -> bool {
        self.funcs.replace.is_some()
    }

    pub fn stack_pointer(&self) -> u64 {
        self.instance.global_get(self.stack_var)
    }

    /// Marks the context poisoned when `err` means its memory can no longer be trusted.
    fn poison(&mut self, err: Error) -> Error {
        self.poisoned |= err.poisons_context();
        err
    }

    fn marshal_err(&mut self, what: String) -> Error {
        self.poison(Error::Marshal { what })
    }

    /// Runs `f` with a scratch block reserved below the stack cursor. The cursor is
    /// restored whether or not `f` succeeds.
    pub fn with_scratch<T>(&mut self, f: impl FnOnce(&mut Self, Scratch) -> Result<T>) -> Result<T> {
        let saved = self.instance.global_get(self.stack_var);
        let top = match u32::try_from(saved) {
            Ok(top) if top >= SCRATCH_BYTES + PARSE_ERROR_BYTES => top,
            _ => return Err(self.marshal_err(format!("stack cursor {saved:#x} has no room for scratch"))),
        };
        self.instance
            .global_set(self.stack_var, u64::from(top - SCRATCH_BYTES));
        let out = f(self, Scratch { top });
        self.instance.global_set(self.stack_var, saved);
        out
    }

    fn invoke(&mut self, function: &'static str, index: FunctionIndex, args: &[u64]) -> Result<u64> {
        let mut stack = [0u64; MAX_CALL_ARGS];
        stack[..args.len()].copy_from_slice(args);
        if let Err(err) = self.instance.call(index, &mut stack) {
            return Err(self.poison(Error::Trap {
                function,
                message: err.message,
            }));
        }
        Ok(stack[0])
    }

    pub fn read_u32(&mut self, addr: u32) -> Result<u32> {
        match read_u32_le(self.instance.memory(), addr) {
            Some(v) => Ok(v),
            None => Err(self.marshal_err(format!("read of u32 at {addr:#x}"))),
        }
    }

    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<()> {
        if write_u32_le(self.instance.memory_mut(), addr, value) {
            Ok(())
        } else {
            Err(self.marshal_err(format!("write of u32 at {addr:#x}")))
        }
    }

    fn read_status(&mut self, addr: u32) -> Result<UErrorCode> {
        Ok(UErrorCode::from_raw(self.read_u32(addr)?))
    }

    pub fn read_units(&mut self, addr: u32, len: u32) -> Result<Vec<u16>> {
        let start = addr as usize;
        let end = start + (len as usize) * UCHAR_BYTES as usize;
        match self.instance.memory().get(start..end) {
            Some(raw) => Ok(codec::le_bytes_to_units(raw)),
            None => Err(self.marshal_err(format!("read of {len} units at {addr:#x}"))),
        }
    }

    pub fn write_units(&mut self, addr: u32, units: &[u16]) -> Result<()> {
        let raw = codec::units_to_le_bytes(units);
        let start = addr as usize;
        match self.instance.memory_mut().get_mut(start..start + raw.len()) {
            Some(dst) => {
                dst.copy_from_slice(&raw);
                Ok(())
            }
            None => Err(self.marshal_err(format!(
                "write of {} units at {addr:#x}",
                units.len()
            ))),
        }
    }

    fn check(function: &'static str, status: UErrorCode) -> Result<()> {
        if status.is_failure() {
            Err(Error::Engine { function, status })
        } else {
            Ok(())
        }
    }

    pub fn malloc(&mut self, bytes: u32) -> Result<u32> {
        let f = self.funcs.malloc;
        let addr = self.invoke(EXPORT_MALLOC, f, &[u64::from(bytes)])? as u32;
        if addr == 0 {
            return Err(Error::OutOfMemory { bytes });
        }
        Ok(addr)
    }

    pub fn free(&mut self, addr: u32) -> Result<()> {
        let f = self.funcs.free;
        self.invoke(EXPORT_FREE, f, &[u64::from(addr)])?;
        Ok(())
    }

    /// Compiles `pattern`, returning the opaque regex handle.
    pub fn open(&mut self, pattern: Span, flags: RegexFlags) -> Result<u32> {
        let f = self.funcs.open;
        self.with_scratch(|calls, scratch| {
            let status = scratch.slot(0);
            let parse_error = scratch.base();
            calls.write_u32(status, 0)?;
            calls.write_u32(parse_error, 0)?;
            calls.write_u32(parse_error + 4, 0)?;
            let handle = calls.invoke(
                EXPORT_UREGEX_OPEN,
                f,
                &[
                    u64::from(pattern.addr),
                    u64::from(pattern.len),
                    u64::from(flags.bits()),
                    u64::from(parse_error),
                    u64::from(status),
                ],
            )? as u32;
            let code = calls.read_status(status)?;
            if code == UErrorCode::MEMORY_ALLOCATION_ERROR {
                return Err(Error::OutOfMemory {
                    bytes: pattern.byte_len(),
                });
            }
            if code.is_failure() {
                let offset = calls.read_u32(parse_error + 4)?;
                return Err(Error::InvalidRegex {
                    status: code,
                    offset,
                });
            }
            if handle == 0 {
                return Err(Error::Engine {
                    function: EXPORT_UREGEX_OPEN,
                    status: code,
                });
            }
            Ok(handle)
        })
    }

    pub fn close(&mut self, regex: u32) -> Result<()> {
        let f = self.funcs.close;
        self.invoke(EXPORT_UREGEX_CLOSE, f, &[u64::from(regex)])?;
        Ok(())
    }

    /// Calls an export whose last argument is a status pointer and checks the status.
    fn call_with_status(
        &mut self,
        function: &'static str,
        index: FunctionIndex,
        args: &[u64],
    ) -> Result<u64> {
        self.with_scratch(|calls, scratch| {
            let status = scratch.slot(0);
            calls.write_u32(status, 0)?;
            let mut full = [0u64; MAX_CALL_ARGS];
            full[..args.len()].copy_from_slice(args);
            full[args.len()] = u64::from(status);
            let ret = calls.invoke(function, index, &full[..=args.len()])?;
            Self::check(function, calls.read_status(status)?)?;
            Ok(ret)
        })
    }

    pub fn set_text(&mut self, regex: u32, text: Span) -> Result<()> {
        let f = self.funcs.set_text;
        self.call_with_status(
            EXPORT_UREGEX_SET_TEXT,
            f,
            &[u64::from(regex), u64::from(text.addr), u64::from(text.len)],
        )?;
        Ok(())
    }

    /// Resets the matcher and searches from `start` (0-based, in units).
    pub fn find(&mut self, regex: u32, start: i32) -> Result<bool> {
        let f = self.funcs.find;
        let found = self.call_with_status(
            EXPORT_UREGEX_FIND,
            f,
            &[u64::from(regex), u64::from(start as u32)],
        )?;
        Ok(found as u32 != 0)
    }

    pub fn find_next(&mut self, regex: u32) -> Result<bool> {
        let f = self.funcs.find_next;
        let found = self.call_with_status(EXPORT_UREGEX_FIND_NEXT, f, &[u64::from(regex)])?;
        Ok(found as u32 != 0)
    }

    pub fn start(&mut self, regex: u32, group: i32) -> Result<i32> {
        let f = self.funcs.start;
        let v = self.call_with_status(
            EXPORT_UREGEX_START,
            f,
            &[u64::from(regex), u64::from(group as u32)],
        )?;
        Ok(v as u32 as i32)
    }

    pub fn end(&mut self, regex: u32, group: i32) -> Result<i32> {
        let f = self.funcs.end;
        let v = self.call_with_status(
            EXPORT_UREGEX_END,
            f,
            &[u64::from(regex), u64::from(group as u32)],
        )?;
        Ok(v as u32 as i32)
    }

    pub fn get_text(&mut self, regex: u32) -> Result<Span> {
        let f = self.funcs.get_text;
        self.with_scratch(|calls, scratch| {
            let status = scratch.slot(0);
            let len_ptr = scratch.slot(1);
            calls.write_u32(status, 0)?;
            calls.write_u32(len_ptr, 0)?;
            let addr = calls.invoke(
                EXPORT_UREGEX_GET_TEXT,
                f,
                &[u64::from(regex), u64::from(len_ptr), u64::from(status)],
            )? as u32;
            Self::check(EXPORT_UREGEX_GET_TEXT, calls.read_status(status)?)?;
            let len = calls.read_u32(len_ptr)?;
            Ok(Span { addr, len })
        })
    }

    /// Appends the text before the current match plus the expanded replacement to `dest`.
    pub fn append_replacement(
        &mut self,
        regex: u32,
        replacement: Span,
        dest: &mut ManagedBuffer,
    ) -> Result<u32> {
        let f = self.funcs.append_replacement;
        self.append_with_retry(EXPORT_UREGEX_APPEND_REPLACEMENT, dest, |calls, dest_pp, cap_ptr, status| {
            calls.invoke(
                EXPORT_UREGEX_APPEND_REPLACEMENT,
                f,
                &[
                    u64::from(regex),
                    u64::from(replacement.addr),
                    u64::from(replacement.len),
                    u64::from(dest_pp),
                    u64::from(cap_ptr),
                    u64::from(status),
                ],
            )
        })
    }

    pub fn append_tail(&mut self, regex: u32, dest: &mut ManagedBuffer) -> Result<u32> {
        let f = self.funcs.append_tail;
        self.append_with_retry(EXPORT_UREGEX_APPEND_TAIL, dest, |calls, dest_pp, cap_ptr, status| {
            calls.invoke(
                EXPORT_UREGEX_APPEND_TAIL,
                f,
                &[
                    u64::from(regex),
                    u64::from(dest_pp),
                    u64::from(cap_ptr),
                    u64::from(status),
                ],
            )
        })
    }

    /// Drives an append export against the free tail of `dest`. A buffer overflow grows
    /// `dest` to the reported size and retries once.
    fn append_with_retry(
        &mut self,
        function: &'static str,
        dest: &mut ManagedBuffer,
        mut call: impl FnMut(&mut Self, u32, u32, u32) -> Result<u64>,
    ) -> Result<u32> {
        for attempt in 0..2 {
            let write_at = dest.addr() + dest.len() * UCHAR_BYTES;
            let room = dest.capacity() - dest.len();
            let outcome = self.with_scratch(|calls, scratch| {
                let status = scratch.slot(0);
                let dest_pp = scratch.slot(1);
                let cap_ptr = scratch.slot(2);
                calls.write_u32(status, 0)?;
                calls.write_u32(dest_pp, write_at)?;
                calls.write_u32(cap_ptr, room)?;
                let n = call(calls, dest_pp, cap_ptr, status)? as u32;
                let code = calls.read_status(status)?;
                if code == UErrorCode::BUFFER_OVERFLOW_ERROR {
                    return Ok(Err(n));
                }
                Self::check(function, code)?;
                let advanced = calls.read_u32(dest_pp)?;
                if advanced != write_at + n * UCHAR_BYTES {
                    return Err(calls.marshal_err(format!(
                        "{function} moved destination to {advanced:#x}, expected {:#x}",
                        write_at + n * UCHAR_BYTES
                    )));
                }
                Ok(Ok(n))
            })?;
            match outcome {
                Ok(n) => {
                    dest.advance(n);
                    return Ok(n);
                }
                Err(required) if attempt == 0 => {
                    dest.reserve(self, dest.len().saturating_add(required).saturating_add(1))?;
                }
                Err(_) => break,
            }
        }
        Err(Error::Engine {
            function,
            status: UErrorCode::BUFFER_OVERFLOW_ERROR,
        })
    }

    /// Composite replace. `start` is 0-based; occurrence 0 replaces every match.
    pub fn replace(
        &mut self,
        regex: u32,
        replacement: Span,
        original: Span,
        start: i32,
        occurrence: i32,
    ) -> Result<ReplaceOutput> {
        let Some(f) = self.funcs.replace else {
            return Err(Error::MissingExport(EXPORT_REPLACE));
        };
        self.with_scratch(|calls, scratch| {
            let size_ptr = scratch.slot(0);
            calls.write_u32(size_ptr, 0)?;
            let ptr = calls.invoke(
                EXPORT_REPLACE,
                f,
                &[
                    u64::from(regex),
                    u64::from(replacement.addr),
                    u64::from(replacement.len),
                    u64::from(original.addr),
                    u64::from(original.len),
                    u64::from(start as u32),
                    u64::from(occurrence as u32),
                    u64::from(size_ptr),
                ],
            )? as u32;
            if ptr == 0 {
                return Err(Error::Engine {
                    function: EXPORT_REPLACE,
                    status: UErrorCode::REGEX_INTERNAL_ERROR,
                });
            }
            if ptr == original.addr {
                return Ok(ReplaceOutput::Unchanged);
            }
            let len = calls.read_u32(size_ptr)?;
            Ok(ReplaceOutput::Allocated(Span { addr: ptr, len }))
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use uregex_contracts::ProgramLoader;
    use uregex_engine::{EngineConfig, EngineLoader};

    pub(crate) fn engine_calls_with(config: EngineConfig) -> ForeignCalls {
        let program = EngineLoader::new(config).compile().expect("compile program");
        let instance = program.instantiate().expect("instantiate program");
        ForeignCalls::new(instance).expect("resolve exports")
    }

    pub(crate) fn engine_calls() -> ForeignCalls {
        engine_calls_with(EngineConfig::default())
    }

    fn put(calls: &mut ForeignCalls, buf: &mut ManagedBuffer, s: &str) -> Span {
        buf.set_text(calls, s).expect("set text");
        buf.span()
    }

    #[test]
    fn scratch_slots_count_down_from_cursor() {
        let s = Scratch { top: 0x4400 };
        assert_eq!(s.slot(0), 0x43fc);
        assert_eq!(s.slot(2), 0x43f4);
        assert_eq!(s.base(), 0x43f0);
    }

    #[test]
    fn stack_cursor_is_restored_after_calls() {
        let mut calls = engine_calls();
        let sp = calls.stack_pointer();
        let mut pat = ManagedBuffer::new();
        let span = put(&mut calls, &mut pat, "a(b");
        assert!(matches!(
            calls.open(span, RegexFlags::NONE),
            Err(Error::InvalidRegex { .. })
        ));
        assert_eq!(calls.stack_pointer(), sp);

        let nested = calls
            .with_scratch(|calls, outer| {
                let inner_sp = calls.stack_pointer();
                assert_eq!(inner_sp, u64::from(outer.base()));
                calls.with_scratch(|calls, inner| {
                    assert_eq!(inner.slot(0), outer.base() - 4);
                    Ok(calls.stack_pointer())
                })
            })
            .unwrap();
        assert_eq!(nested, sp - 32);
        assert_eq!(calls.stack_pointer(), sp);

        let err = calls
            .with_scratch(|_, _| -> Result<()> { Err(Error::TextNotSet) })
            .unwrap_err();
        assert_eq!(err, Error::TextNotSet);
        assert_eq!(calls.stack_pointer(), sp);
    }

    #[test]
    fn open_reports_offset_of_syntax_error() {
        let mut calls = engine_calls();
        let mut pat = ManagedBuffer::new();
        let span = put(&mut calls, &mut pat, "ab[c");
        match calls.open(span, RegexFlags::NONE) {
            Err(Error::InvalidRegex { status, offset }) => {
                assert_eq!(status, UErrorCode::REGEX_MISSING_CLOSE_BRACKET);
                assert_eq!(offset, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!calls.is_poisoned());
    }

    #[test]
    fn find_start_end_and_get_text() {
        let mut calls = engine_calls();
        let (mut pat, mut text) = (ManagedBuffer::new(), ManagedBuffer::new());
        let span = put(&mut calls, &mut pat, "[0-9]+");
        let re = calls.open(span, RegexFlags::NONE).unwrap();
        let subject = put(&mut calls, &mut text, "ab 123 cd 45");
        calls.set_text(re, subject).unwrap();
        assert_eq!(calls.get_text(re).unwrap(), subject);

        assert!(calls.find(re, 0).unwrap());
        assert_eq!((calls.start(re, 0).unwrap(), calls.end(re, 0).unwrap()), (3, 6));
        assert!(calls.find_next(re).unwrap());
        assert_eq!(calls.start(re, 0).unwrap(), 10);
        assert!(!calls.find_next(re).unwrap());
        assert!(matches!(
            calls.start(re, 0),
            Err(Error::Engine {
                status: UErrorCode::REGEX_INVALID_STATE,
                ..
            })
        ));
        calls.close(re).unwrap();
    }

    #[test]
    fn append_grows_destination_once() {
        let mut calls = engine_calls();
        let (mut pat, mut text, mut repl) =
            (ManagedBuffer::new(), ManagedBuffer::new(), ManagedBuffer::new());
        let span = put(&mut calls, &mut pat, "x");
        let re = calls.open(span, RegexFlags::NONE).unwrap();
        let subject = put(&mut calls, &mut text, &format!("{}x!", "a".repeat(100)));
        calls.set_text(re, subject).unwrap();
        let repl = put(&mut calls, &mut repl, "[$0]");

        let mut dest = ManagedBuffer::new();
        assert!(calls.find(re, 0).unwrap());
        assert_eq!(calls.append_replacement(re, repl, &mut dest).unwrap(), 103);
        assert_eq!(dest.capacity(), 128);
        assert!(!calls.find_next(re).unwrap());
        assert_eq!(calls.append_tail(re, &mut dest).unwrap(), 1);
        assert_eq!(
            dest.text(&mut calls).unwrap(),
            format!("{}[x]!", "a".repeat(100))
        );
    }

    #[test]
    fn composite_replace_reports_unchanged_and_allocated() {
        let mut calls = engine_calls();
        let (mut pat, mut text, mut repl) =
            (ManagedBuffer::new(), ManagedBuffer::new(), ManagedBuffer::new());
        let span = put(&mut calls, &mut pat, "o");
        let re = calls.open(span, RegexFlags::NONE).unwrap();
        let subject = put(&mut calls, &mut text, "foo");
        calls.set_text(re, subject).unwrap();
        let repl = put(&mut calls, &mut repl, "0");

        match calls.replace(re, repl, subject, 0, 0).unwrap() {
            ReplaceOutput::Allocated(span) => {
                let out = calls.read_units(span.addr, span.len).unwrap();
                assert_eq!(codec::decode(&out).unwrap(), "f00");
                calls.free(span.addr).unwrap();
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            calls.replace(re, repl, subject, 0, 3).unwrap(),
            ReplaceOutput::Unchanged
        );
    }

    #[test]
    fn missing_replace_export_is_optional() {
        let calls = engine_calls_with(EngineConfig {
            export_composite_replace: false,
            ..EngineConfig::default()
        });
        assert!(!calls.has_composite_replace());
    }

    #[test]
    fn traps_poison_the_context() {
        let mut calls = engine_calls();
        let err = calls.free(0x1234).unwrap_err();
        assert!(matches!(err, Error::Trap { function: "free", .. }), "{err}");
        assert!(calls.is_poisoned());
    }

    #[test]
    fn out_of_bounds_reads_poison_the_context() {
        let mut calls = engine_calls();
        let err = calls.read_units(u32::MAX - 8, 4).unwrap_err();
        assert!(matches!(err, Error::Marshal { .. }));
        assert!(calls.is_poisoned());
    }
}
