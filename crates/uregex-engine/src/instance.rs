use std::collections::HashMap;
use std::sync::Arc;

use uregex_contracts::{
    read_u32_le, write_u32_le, ForeignError, ForeignInstance, FunctionIndex, GlobalIndex,
    UErrorCode, EXPORT_FREE, EXPORT_MALLOC, EXPORT_REPLACE, EXPORT_UREGEX_APPEND_REPLACEMENT,
    EXPORT_UREGEX_APPEND_TAIL, EXPORT_UREGEX_CLOSE, EXPORT_UREGEX_END, EXPORT_UREGEX_FIND,
    EXPORT_UREGEX_FIND_NEXT, EXPORT_UREGEX_GET_TEXT, EXPORT_UREGEX_OPEN, EXPORT_UREGEX_SET_TEXT,
    EXPORT_UREGEX_START, GLOBAL_STACK_VAR, UCHAR_BYTES,
};

use crate::matcher::{Matcher, Subject};
use crate::memory::LinearMemory;
use crate::program::ProgramShared;
use crate::replace;

const STACK_GLOBAL: GlobalIndex = GlobalIndex(0);

// Opaque regex handles are real heap blocks so they never collide with other pointers.
const HANDLE_BYTES: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Export {
    Malloc,
    Free,
    Open,
    Close,
    SetText,
    Find,
    FindNext,
    Start,
    End,
    GetText,
    AppendReplacement,
    AppendTail,
    Replace,
}

impl Export {
    const ALL: [Export; 13] = [
        Export::Malloc,
        Export::Free,
        Export::Open,
        Export::Close,
        Export::SetText,
        Export::Find,
        Export::FindNext,
        Export::Start,
        Export::End,
        Export::GetText,
        Export::AppendReplacement,
        Export::AppendTail,
        Export::Replace,
    ];

    fn name(self) -> &'static str {
        match self {
            Export::Malloc => EXPORT_MALLOC,
            Export::Free => EXPORT_FREE,
            Export::Open => EXPORT_UREGEX_OPEN,
            Export::Close => EXPORT_UREGEX_CLOSE,
            Export::SetText => EXPORT_UREGEX_SET_TEXT,
            Export::Find => EXPORT_UREGEX_FIND,
            Export::FindNext => EXPORT_UREGEX_FIND_NEXT,
            Export::Start => EXPORT_UREGEX_START,
            Export::End => EXPORT_UREGEX_END,
            Export::GetText => EXPORT_UREGEX_GET_TEXT,
            Export::AppendReplacement => EXPORT_UREGEX_APPEND_REPLACEMENT,
            Export::AppendTail => EXPORT_UREGEX_APPEND_TAIL,
            Export::Replace => EXPORT_REPLACE,
        }
    }

    fn arity(self) -> usize {
        match self {
            Export::Malloc | Export::Free | Export::Close => 1,
            Export::FindNext => 2,
            Export::Find | Export::Start | Export::End | Export::GetText => 3,
            Export::SetText => 4,
            Export::Open | Export::AppendTail => 5,
            Export::AppendReplacement => 6,
            Export::Replace => 8,
        }
    }
}

fn arg_u32(stack: &[u64], i: usize) -> u32 {
    stack[i] as u32
}

fn arg_i32(stack: &[u64], i: usize) -> i32 {
    stack[i] as u32 as i32
}

fn oob(addr: u32) -> ForeignError {
    ForeignError::trap(format!("out of bounds memory access at {addr:#x}"))
}

/// In-process engine instance: a private linear memory, a stack cursor global and the
/// regex objects opened through it. All pointers crossing the boundary are offsets
/// into `memory`.
pub struct EngineInstance {
    memory: LinearMemory,
    stack_pointer: u64,
    regexes: HashMap<u32, Matcher>,
    shared: Arc<ProgramShared>,
}

impl EngineInstance {
    pub(crate) fn new(shared: Arc<ProgramShared>) -> Self {
        let config = &shared.config;
        let stack_top = config.stack_top();
        Self {
            memory: LinearMemory::new(config.initial_pages, config.max_pages, stack_top),
            stack_pointer: u64::from(stack_top),
            regexes: HashMap::new(),
            shared,
        }
    }

    fn exports(&self) -> impl Iterator<Item = (usize, Export)> + '_ {
        Export::ALL.into_iter().enumerate().filter(move |(_, e)| {
            *e != Export::Replace || self.shared.config.export_composite_replace
        })
    }

    fn load_status(&self, ptr: u32) -> Result<UErrorCode, ForeignError> {
        if ptr == 0 {
            return Err(ForeignError::trap("null status pointer"));
        }
        read_u32_le(self.memory.bytes(), ptr)
            .map(UErrorCode::from_raw)
            .ok_or_else(|| oob(ptr))
    }

    fn store_u32(&mut self, ptr: u32, value: u32) -> Result<(), ForeignError> {
        if write_u32_le(self.memory.bytes_mut(), ptr, value) {
            Ok(())
        } else {
            Err(oob(ptr))
        }
    }

    fn load_u32(&self, ptr: u32) -> Result<u32, ForeignError> {
        read_u32_le(self.memory.bytes(), ptr).ok_or_else(|| oob(ptr))
    }

    fn fail(&mut self, status_ptr: u32, code: UErrorCode) -> Result<(), ForeignError> {
        self.store_u32(status_ptr, code.raw())
    }

    /// Reads a string argument; a length of -1 means NUL-terminated.
    fn read_str(&self, ptr: u32, len: i32) -> Result<Option<Vec<u16>>, ForeignError> {
        if len < -1 || (ptr == 0 && len != 0) {
            return Ok(None);
        }
        let units = if len == -1 {
            self.memory.read_units_terminated(ptr)
        } else {
            self.memory.read_units(ptr, len as u32)
        };
        units.map(Some).ok_or_else(|| oob(ptr))
    }

    fn matcher(&self, handle: u32) -> Option<&Matcher> {
        self.regexes.get(&handle)
    }

    fn open(
        &mut self,
        pattern: u32,
        len: i32,
        flags: u32,
        parse_error: u32,
        status: u32,
    ) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(0);
        }
        let Some(units) = self.read_str(pattern, len)? else {
            self.fail(status, UErrorCode::ILLEGAL_ARGUMENT_ERROR)?;
            return Ok(0);
        };
        let regex = match self.shared.compile_pattern(&units, flags) {
            Ok(regex) => regex,
            Err(err) => {
                if parse_error != 0 {
                    let line = 1 + units[..(err.offset as usize).min(units.len())]
                        .iter()
                        .filter(|&&u| u == u16::from(b'\n'))
                        .count() as u32;
                    self.store_u32(parse_error, line)?;
                    self.store_u32(parse_error + 4, err.offset)?;
                }
                self.fail(status, err.status)?;
                return Ok(0);
            }
        };
        let handle = self.memory.malloc(HANDLE_BYTES);
        if handle == 0 {
            self.fail(status, UErrorCode::MEMORY_ALLOCATION_ERROR)?;
            return Ok(0);
        }
        self.regexes.insert(handle, Matcher::new(regex));
        Ok(u64::from(handle))
    }

    fn close(&mut self, handle: u32) -> Result<u64, ForeignError> {
        if handle == 0 {
            return Ok(0);
        }
        if self.regexes.remove(&handle).is_none() {
            return Err(ForeignError::trap(format!(
                "uregex_close of unknown handle {handle:#x}"
            )));
        }
        self.memory.free(handle)?;
        Ok(0)
    }

    fn set_text(&mut self, handle: u32, text: u32, len: i32, status: u32) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(0);
        }
        let units = match self.read_str(text, len)? {
            Some(units) if self.regexes.contains_key(&handle) => units,
            _ => {
                self.fail(status, UErrorCode::ILLEGAL_ARGUMENT_ERROR)?;
                return Ok(0);
            }
        };
        if let Some(m) = self.regexes.get_mut(&handle) {
            m.set_text(Subject::new(text, units));
        }
        Ok(0)
    }

    fn find(&mut self, handle: u32, start: i32, status: u32) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(0);
        }
        let found = match self.regexes.get_mut(&handle) {
            None => Err(UErrorCode::ILLEGAL_ARGUMENT_ERROR),
            Some(m) => m.find_from(start),
        };
        match found {
            Ok(found) => Ok(u64::from(found)),
            Err(code) => {
                self.fail(status, code)?;
                Ok(0)
            }
        }
    }

    fn find_next(&mut self, handle: u32, status: u32) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(0);
        }
        match self.regexes.get_mut(&handle) {
            Some(m) => Ok(u64::from(m.find_next())),
            None => {
                self.fail(status, UErrorCode::ILLEGAL_ARGUMENT_ERROR)?;
                Ok(0)
            }
        }
    }

    fn boundary(&mut self, handle: u32, group: i32, status: u32, end: bool) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(u64::from(u32::MAX));
        }
        let offset = match self.matcher(handle) {
            None => Err(UErrorCode::ILLEGAL_ARGUMENT_ERROR),
            Some(m) if end => m.end(group),
            Some(m) => m.start(group),
        };
        match offset {
            Ok(offset) => Ok(u64::from(offset as u32)),
            Err(code) => {
                self.fail(status, code)?;
                Ok(u64::from(u32::MAX))
            }
        }
    }

    fn get_text(&mut self, handle: u32, len_ptr: u32, status: u32) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(0);
        }
        let Some((addr, len)) = self.matcher(handle).map(|m| (m.subject.addr, m.subject.len())) else {
            self.fail(status, UErrorCode::ILLEGAL_ARGUMENT_ERROR)?;
            return Ok(0);
        };
        if len_ptr != 0 {
            self.store_u32(len_ptr, len)?;
        }
        Ok(u64::from(addr))
    }

    /// Writes `out` through the `(dest**, capacity*)` cursor pair. On overflow nothing is
    /// written and the required length is returned with BUFFER_OVERFLOW set.
    fn emit(&mut self, out: &[u16], dest_pp: u32, cap_ptr: u32, status: u32) -> Result<u64, ForeignError> {
        let dest = self.load_u32(dest_pp)?;
        let cap = self.load_u32(cap_ptr)? as i32;
        let len = out.len() as u32;
        if cap < 0 || (dest == 0 && cap > 0) {
            self.fail(status, UErrorCode::ILLEGAL_ARGUMENT_ERROR)?;
            return Ok(0);
        }
        let cap = cap as u32;
        if len > cap {
            self.fail(status, UErrorCode::BUFFER_OVERFLOW_ERROR)?;
            return Ok(u64::from(len));
        }
        if !self.memory.write_units(dest, out) {
            return Err(oob(dest));
        }
        let tail = dest + len * UCHAR_BYTES;
        if len < cap {
            if !self.memory.write_units(tail, &[0]) {
                return Err(oob(tail));
            }
        } else if self.load_status(status)? == UErrorCode::ZERO_ERROR {
            self.fail(status, UErrorCode::STRING_NOT_TERMINATED_WARNING)?;
        }
        self.store_u32(dest_pp, tail)?;
        self.store_u32(cap_ptr, cap - len)?;
        Ok(u64::from(len))
    }

    fn append_replacement(
        &mut self,
        handle: u32,
        repl: u32,
        repl_len: i32,
        dest_pp: u32,
        cap_ptr: u32,
        status: u32,
    ) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(0);
        }
        let repl = self.read_str(repl, repl_len)?;
        let out = match (self.matcher(handle), repl) {
            (Some(m), Some(repl)) => replace::append_replacement(m, &repl),
            _ => Err(UErrorCode::ILLEGAL_ARGUMENT_ERROR),
        };
        match out {
            Ok(out) => self.emit(&out, dest_pp, cap_ptr, status),
            Err(code) => {
                self.fail(status, code)?;
                Ok(0)
            }
        }
    }

    fn append_tail(&mut self, handle: u32, dest_pp: u32, cap_ptr: u32, status: u32) -> Result<u64, ForeignError> {
        if self.load_status(status)?.is_failure() {
            return Ok(0);
        }
        let Some(out) = self.matcher(handle).map(replace::append_tail) else {
            self.fail(status, UErrorCode::ILLEGAL_ARGUMENT_ERROR)?;
            return Ok(0);
        };
        self.emit(&out, dest_pp, cap_ptr, status)
    }

    /// Composite replace. Returns `orig` itself when nothing matched, a fresh block
    /// holding the result otherwise, or 0 on any failure.
    #[allow(clippy::too_many_arguments)]
    fn replace(
        &mut self,
        handle: u32,
        repl: u32,
        repl_len: i32,
        orig: u32,
        orig_len: i32,
        start: i32,
        occurrence: i32,
        size_ptr: u32,
    ) -> Result<u64, ForeignError> {
        self.store_u32(size_ptr, orig_len as u32)?;
        let Some(repl) = self.read_str(repl, repl_len)? else {
            return Ok(0);
        };
        let Some(m) = self.regexes.get_mut(&handle) else {
            return Err(ForeignError::trap(format!(
                "replace on unknown handle {handle:#x}"
            )));
        };
        let out = match replace::replace_all_or_nth(m, &repl, start, occurrence) {
            Ok(Some(out)) => out,
            Ok(None) => return Ok(u64::from(orig)),
            Err(_) => return Ok(0),
        };
        let len = out.len() as u32;
        let ptr = self.memory.malloc(len.max(1) * UCHAR_BYTES);
        if ptr == 0 {
            return Ok(0);
        }
        if !self.memory.write_units(ptr, &out) {
            return Err(oob(ptr));
        }
        self.store_u32(size_ptr, len)?;
        Ok(u64::from(ptr))
    }

    fn dispatch(&mut self, export: Export, s: &[u64]) -> Result<u64, ForeignError> {
        match export {
            Export::Malloc => Ok(u64::from(self.memory.malloc(arg_u32(s, 0)))),
            Export::Free => self.memory.free(arg_u32(s, 0)).map(|()| 0),
            Export::Open => self.open(
                arg_u32(s, 0),
                arg_i32(s, 1),
                arg_u32(s, 2),
                arg_u32(s, 3),
                arg_u32(s, 4),
            ),
            Export::Close => self.close(arg_u32(s, 0)),
            Export::SetText => self.set_text(arg_u32(s, 0), arg_u32(s, 1), arg_i32(s, 2), arg_u32(s, 3)),
            Export::Find => self.find(arg_u32(s, 0), arg_i32(s, 1), arg_u32(s, 2)),
            Export::FindNext => self.find_next(arg_u32(s, 0), arg_u32(s, 1)),
            Export::Start => self.boundary(arg_u32(s, 0), arg_i32(s, 1), arg_u32(s, 2), false),
            Export::End => self.boundary(arg_u32(s, 0), arg_i32(s, 1), arg_u32(s, 2), true),
            Export::GetText => self.get_text(arg_u32(s, 0), arg_u32(s, 1), arg_u32(s, 2)),
            Export::AppendReplacement => self.append_replacement(
                arg_u32(s, 0),
                arg_u32(s, 1),
                arg_i32(s, 2),
                arg_u32(s, 3),
                arg_u32(s, 4),
                arg_u32(s, 5),
            ),
            Export::AppendTail => self.append_tail(arg_u32(s, 0), arg_u32(s, 1), arg_u32(s, 2), arg_u32(s, 3)),
            Export::Replace => self.replace(
                arg_u32(s, 0),
                arg_u32(s, 1),
                arg_i32(s, 2),
                arg_u32(s, 3),
                arg_i32(s, 4),
                arg_i32(s, 5),
                arg_i32(s, 6),
                arg_u32(s, 7),
            ),
        }
    }
}

impl ForeignInstance for EngineInstance {
    fn exported_function(&self, name: &str) -> Option<FunctionIndex> {
        self.exports()
            .find(|(_, e)| e.name() == name)
            .map(|(i, _)| FunctionIndex(i as u32))
    }

    fn exported_global(&self, name: &str) -> Option<GlobalIndex> {
        (name == GLOBAL_STACK_VAR).then_some(STACK_GLOBAL)
    }

    fn global_get(&self, global: GlobalIndex) -> u64 {
        if global == STACK_GLOBAL {
            self.stack_pointer
        } else {
            0
        }
    }

    fn global_set(&mut self, global: GlobalIndex, value: u64) {
        if global == STACK_GLOBAL {
            self.stack_pointer = value;
        }
    }

    fn memory(&self) -> &[u8] {
        self.memory.bytes()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.bytes_mut()
    }

    fn call(&mut self, function: FunctionIndex, stack: &mut [u64]) -> Result<(), ForeignError> {
        let Some((_, export)) = self.exports().find(|(i, _)| *i == function.0 as usize) else {
            return Err(ForeignError::trap(format!(
                "call to unknown function index {}",
                function.0
            )));
        };
        if stack.len() < export.arity() {
            return Err(ForeignError::trap(format!(
                "{} expects {} arguments, got {}",
                export.name(),
                export.arity(),
                stack.len()
            )));
        }
        let result = self.dispatch(export, stack)?;
        stack[0] = result;
        Ok(())
    }
}

impl Drop for EngineInstance {
    fn drop(&mut self) {
        self.shared.stats.instance_dropped();
    }
}
