//! Things that can go wrong, and one thing that isn't really wrong.

use thiserror::Error;

use crate::instruction::Opcode;

/// Error when turning a byte buffer into a [`Program`](crate::Program).
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("bytecode ended at byte {offset} while reading {wanted}")]
    Truncated { offset: usize, wanted: &'static str },
    #[error("0x{byte:02X} at byte {offset} is not an opcode")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("bytecode version {major}.{minor} is not supported")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("{what} at byte {offset} is not valid UTF-8")]
    InvalidUtf8 { what: &'static str, offset: usize },
    #[error("instruction {index} ({opcode:?}) targets {target}, but there are only {count} instructions")]
    TargetOutOfRange {
        index: usize,
        opcode: Opcode,
        target: usize,
        count: usize,
    },
    #[error("start point {start} is past the end of {count} instructions")]
    StartOutOfRange { start: usize, count: usize },
    #[error("{what} of {value} does not fit in memory")]
    Overlarge { what: &'static str, value: u64 },
}

/// Which of the context's fixed-capacity stacks ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    Backtrack,
    Ast,
    Call,
    Symbol,
}

/// Fatal condition during a run. Not retryable.
///
/// A plain non-match is *not* one of these; see [`ParseFailure`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RunError {
    #[error("{stack:?} stack overflowed its capacity of {capacity}")]
    StackOverflow { stack: StackKind, capacity: usize },
    #[error("instruction {pc} popped the empty {stack:?} stack")]
    StackUnderflow { stack: StackKind, pc: usize },
    #[error("program counter {pc} is outside the {count} loaded instructions")]
    PcOutOfBounds { pc: usize, count: usize },
    #[error("instruction {pc} closed a node that was never opened")]
    UnbalancedNode { pc: usize },
    #[error("instruction {pc} defined a symbol with no mark before it")]
    MissingMark { pc: usize },
    #[error("instruction {pc} is bound to the {handler:?} handler")]
    HandlerMismatch { pc: usize, handler: Opcode },
    #[error("memory pool is full at {nodes} nodes")]
    PoolExhausted { nodes: usize },
    #[error("context has no start point; load a program into it first")]
    NoStartPoint,
}

/// The input did not match the grammar from the chosen start rule.
///
/// This is an expected outcome and is returned in the `Ok` side of a run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("parse error at byte {pos} (got as far as byte {furthest})")]
pub struct ParseFailure {
    /// Cursor after the last backtrack ran out of frames.
    pub pos: usize,
    /// Furthest the cursor ever got during the run.
    pub furthest: usize,
}

/// Error when serializing a program back into bytecode.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("{what} of {value} is too big to encode")]
pub struct EncodeError {
    pub what: &'static str,
    pub value: u64,
}
