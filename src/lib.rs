//! A virtual machine for compiled PEG grammars.
//!
//! Load some bytecode, point the context it comes with at some input, and [`run`] it:
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! let bytes = std::fs::read("grammar.bin")?;
//! let (program, mut ctx) = pegvm::load(&bytes, Some("File"))?;
//! ctx.set_input("1 + 2");
//! match pegvm::run(&program, &mut ctx)? {
//!     Ok(tree) => print!("{}", tree.display(Some(&b"1 + 2"[..]))),
//!     Err(failure) => eprintln!("{}", failure),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A [`Program`] never changes after loading, so it can be shared between threads; each thread
//! brings its own [`ParsingContext`].

mod ast;
mod bytecode;
mod context;
mod dispatch;
mod display;
mod engine;
mod error;
mod instruction;
mod pool;
mod profile;

pub use ast::{AstNode, Descendants};
pub use bytecode::{
    load, read_header, ByteReader, Header, Loader, LoaderOptions, ProgramWriter, RuleEntry,
    DEFAULT_START_POINT, VERSION,
};
pub use context::{Config, ParsingContext};
pub use dispatch::{prepare, Prepared, Program};
pub use display::{BstrFmt, TreeFmt};
pub use engine::{dispatch_table, reset_for_rerun, run, run_profiled, Handler, Machine, Step};
pub use error::{EncodeError, LoadError, ParseFailure, RunError, StackKind};
pub use instruction::{CharSet, Instruction, MappedTable, Opcode, OPCODE_COUNT};
pub use pool::{MemoryPool, NodeId, PoolNode};
pub use profile::OpcodeProfile;
