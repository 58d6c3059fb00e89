use std::fmt;
use std::sync::Arc;

/// Upper bound on the number of `u64` slots a single call may use for arguments.
pub const MAX_CALL_ARGS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignErrorKind {
    Compile,
    Instantiate,
    Trap,
}

impl ForeignErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ForeignErrorKind::Compile => "compile",
            ForeignErrorKind::Instantiate => "instantiate",
            ForeignErrorKind::Trap => "trap",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignError {
    pub kind: ForeignErrorKind,
    pub message: String,
}

impl ForeignError {
    pub fn compile(message: impl Into<String>) -> Self {
        Self {
            kind: ForeignErrorKind::Compile,
            message: message.into(),
        }
    }

    pub fn instantiate(message: impl Into<String>) -> Self {
        Self {
            kind: ForeignErrorKind::Instantiate,
            message: message.into(),
        }
    }

    pub fn trap(message: impl Into<String>) -> Self {
        Self {
            kind: ForeignErrorKind::Trap,
            message: message.into(),
        }
    }
}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ForeignError {}

/// One live instantiation of a program, with its own private linear memory.
///
/// Calls follow a stack convention: arguments are placed in `stack[0..n]` and the
/// single result (if any) is returned in `stack[0]`.
pub trait ForeignInstance: Send {
    fn exported_function(&self, name: &str) -> Option<FunctionIndex>;

    fn exported_global(&self, name: &str) -> Option<GlobalIndex>;

    fn global_get(&self, global: GlobalIndex) -> u64;

    fn global_set(&mut self, global: GlobalIndex, value: u64);

    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    fn call(&mut self, function: FunctionIndex, stack: &mut [u64]) -> Result<(), ForeignError>;
}

/// A program compiled once and instantiated many times. Dropping the last handle
/// releases whatever the runtime retained for it.
pub trait CompiledProgram: Send + Sync {
    fn instantiate(&self) -> Result<Box<dyn ForeignInstance>, ForeignError>;
}

/// Produces a fresh isolated environment plus its compiled program.
pub trait ProgramLoader: Send + Sync {
    fn name(&self) -> &str;

    fn compile(&self) -> Result<Arc<dyn CompiledProgram>, ForeignError>;
}

pub fn read_u32_le(mem: &[u8], addr: u32) -> Option<u32> {
    let start = addr as usize;
    let slice = mem.get(start..start.checked_add(4)?)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

pub fn write_u32_le(mem: &mut [u8], addr: u32, value: u32) -> bool {
    let start = addr as usize;
    let Some(end) = start.checked_add(4) else {
        return false;
    };
    let Some(slice) = mem.get_mut(start..end) else {
        return false;
    };
    slice.copy_from_slice(&value.to_le_bytes());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u32_helpers_respect_bounds() {
        let mut mem = vec![0u8; 8];
        assert!(write_u32_le(&mut mem, 4, 0xdead_beef));
        assert_eq!(read_u32_le(&mem, 4), Some(0xdead_beef));
        assert_eq!(&mem[4..8], &[0xef, 0xbe, 0xad, 0xde]);
        assert!(!write_u32_le(&mut mem, 5, 1));
        assert_eq!(read_u32_le(&mem, 5), None);
        assert_eq!(read_u32_le(&mem, u32::MAX), None);
    }

    #[test]
    fn error_display_names_kind() {
        let err = ForeignError::trap("out of bounds memory access");
        assert_eq!(err.to_string(), "trap: out of bounds memory access");
        assert_eq!(err.kind, ForeignErrorKind::Trap);
    }
}
