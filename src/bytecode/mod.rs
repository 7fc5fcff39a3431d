//! # Bytecode
//!
//! A compiled grammar is a header followed by a flat run of instructions.
//!
//! Numbers are always written and read big-endian.
//!
//! ```text
//! version_major      u8
//! version_minor      u8
//! filename           str     (informational)
//! pool_size_hint     u32
//! rule_count         u32
//! rules              { name: str, start_index: u64 } * rule_count
//! instruction_count  u64
//! instructions       { opcode: u8, operands... } * instruction_count
//! ```
//!
//! A `str` is a `u32` byte length followed by that many bytes. Instruction operands are:
//!
//! - `target`: a `u32` absolute instruction index.
//! - `set`: 32 bytes of bitmap. Byte `b` is bit `b % 8` of byte `b / 8`.
//! - `lo hi`: two bytes, an inclusive range.
//! - `str`: as above. Labels and symbol table names must be UTF-8.
//! - `table`: a `u16` entry count, then `{ byte: u8, target }` per entry.
//!
//! See [`Opcode`](crate::Opcode) for which opcode takes what.
//!
//! Instruction 0 is reserved; when no start rule is asked for (or found), execution starts at 1.

mod load;
mod reader;
mod writer;

pub use load::{load, read_header, Loader, LoaderOptions};
pub use reader::ByteReader;
pub use writer::ProgramWriter;

/// The only version this loader was written against.
pub const VERSION: (u8, u8) = (0, 1);

/// Where execution starts when no start rule was picked.
pub const DEFAULT_START_POINT: usize = 1;

/// One entry in the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub name: String,
    pub start_index: u64,
}

/// Everything in front of the instructions.
///
/// This only lives as long as loading does; what matters of it ends up in the
/// [`ParsingContext`](crate::ParsingContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: (u8, u8),
    pub filename: String,
    pub pool_size_hint: u32,
    pub rules: Vec<RuleEntry>,
    pub instruction_count: u64,
}

impl Header {
    /// Resolve a rule name to an instruction index.
    ///
    /// Names are treated as unique; if one shows up twice, the last one wins. No name, no such
    /// rule, or a rule pointing at the reserved index 0 all mean [`DEFAULT_START_POINT`].
    pub fn start_point(&self, rule: Option<&str>) -> u64 {
        rule.and_then(|rule| {
            self.rules
                .iter()
                .rev()
                .find(|entry| entry.name == rule)
                .map(|entry| entry.start_index)
        })
        .filter(|&idx| idx != 0)
        .unwrap_or(DEFAULT_START_POINT as u64)
    }
}
