use std::sync::Arc;

use itertools::Itertools;
use tracing::{debug, info, warn};

use super::{ByteReader, Header, RuleEntry, VERSION};
use crate::{
    context::{Config, ParsingContext},
    dispatch::{prepare, Program},
    error::LoadError,
    instruction::{CharSet, Instruction, MappedTable, Opcode, OPCODE_COUNT},
    pool::MemoryPool,
};

/// Knobs for [`Loader`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderOptions {
    /// Refuse bytecode whose version isn't [`VERSION`] instead of just warning about it.
    pub strict_version: bool,
    /// Config for the contexts this loader creates.
    pub config: Config,
}

#[derive(Debug, Clone, Default)]
pub struct Loader {
    options: LoaderOptions,
}

/// Load `bytes` with the default options.
///
/// The context comes back without any input; give it some with
/// [`ParsingContext::set_input`].
pub fn load(
    bytes: &[u8],
    start_rule: Option<&str>,
) -> Result<(Program, ParsingContext), LoadError> {
    Loader::default().load(bytes, start_rule)
}

impl Loader {
    pub fn new(options: LoaderOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Load a program and make a fresh context set up to run it.
    pub fn load(
        &self,
        bytes: &[u8],
        start_rule: Option<&str>,
    ) -> Result<(Program, ParsingContext), LoadError> {
        let mut ctx = ParsingContext::new(self.options.config);
        let program = self.load_into(&mut ctx, bytes, start_rule)?;
        Ok((program, ctx))
    }

    /// Load a program and point an existing context (input and all) at it.
    ///
    /// The context is only touched if loading succeeds.
    pub fn load_into(
        &self,
        ctx: &mut ParsingContext,
        bytes: &[u8],
        start_rule: Option<&str>,
    ) -> Result<Program, LoadError> {
        let mut reader = ByteReader::new(bytes);
        let header = read_header(&mut reader)?;

        if header.version != VERSION {
            let (major, minor) = header.version;
            if self.options.strict_version {
                return Err(LoadError::UnsupportedVersion { major, minor });
            }
            warn!(
                "bytecode version {}.{} is not {}.{}; loading it anyway",
                major, minor, VERSION.0, VERSION.1
            );
        }

        info!(
            version = ?header.version,
            file = %header.filename,
            instructions = header.instruction_count,
            "loaded bytecode header"
        );
        debug!(
            "rules: {}",
            header
                .rules
                .iter()
                .map(|rule| format!("{}@{}", rule.name, rule.start_index))
                .join(", ")
        );

        let count = usize::try_from(header.instruction_count).map_err(|_| LoadError::Overlarge {
            what: "instruction count",
            value: header.instruction_count,
        })?;
        let code = read_instructions(&mut reader, count)?;
        check_targets(&code)?;

        let start = header.start_point(start_rule);
        let start = usize::try_from(start)
            .ok()
            .filter(|&start| start < count)
            .ok_or(LoadError::StartOutOfRange {
                start: start as usize,
                count,
            })?;
        match start_rule {
            Some(rule) if !header.rules.iter().any(|entry| entry.name == rule) => {
                warn!("no rule named {:?}; starting at {}", rule, start)
            }
            _ => debug!("starting at {}", start),
        }

        if reader.remaining() != 0 {
            warn!(
                "ignoring {} trailing bytes after the last instruction",
                reader.remaining()
            );
        }

        ctx.start_point = start;
        ctx.instruction_count = count;
        ctx.pool_size_hint = header.pool_size_hint as usize;
        ctx.pool = MemoryPool::with_capacity(ctx.pool_size_hint);
        ctx.root = None;

        Ok(prepare(code))
    }
}

/// Read everything in front of the instructions.
pub fn read_header(reader: &mut ByteReader) -> Result<Header, LoadError> {
    let major = reader.read_u8("version")?;
    let minor = reader.read_u8("version")?;
    let filename = String::from_utf8_lossy(reader.read_str("file name")?).into_owned();
    let pool_size_hint = reader.read_u32("pool size hint")?;

    let rule_count = reader.read_u32("rule count")?;
    let mut rules = Vec::new();
    for _ in 0..rule_count {
        let name = String::from_utf8_lossy(reader.read_str("rule name")?).into_owned();
        let start_index = reader.read_u64("rule start index")?;
        rules.push(RuleEntry { name, start_index });
    }

    let instruction_count = reader.read_u64("instruction count")?;

    Ok(Header {
        version: (major, minor),
        filename,
        pool_size_hint,
        rules,
        instruction_count,
    })
}

fn read_instructions(
    reader: &mut ByteReader,
    count: usize,
) -> Result<Vec<Instruction>, LoadError> {
    // every instruction is at least one byte, so don't trust `count` further than that
    let mut code = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        let offset = reader.pos();
        let byte = reader.read_u8("opcode")?;
        let decode = match DECODERS.get(byte as usize) {
            Some((_, decode)) => decode,
            None => return Err(LoadError::UnknownOpcode { byte, offset }),
        };
        code.push(decode(reader)?);
    }
    Ok(code)
}

fn check_targets(code: &[Instruction]) -> Result<(), LoadError> {
    let count = code.len();
    for (index, inst) in code.iter().enumerate() {
        if let Some(target) = inst.targets().into_iter().find(|&t| t >= count) {
            return Err(LoadError::TargetOutOfRange {
                index,
                opcode: inst.opcode(),
                target,
                count,
            });
        }
    }
    Ok(())
}

/// Reads the operands of one opcode. The opcode byte itself is already gone.
type Decode = fn(&mut ByteReader) -> Result<Instruction, LoadError>;

/// One decoder per opcode, indexed by opcode byte.
static DECODERS: [(Opcode, Decode); OPCODE_COUNT] = [
    (Opcode::Exit, |_| Ok(Instruction::Exit)),
    (Opcode::Jump, |r| Ok(Instruction::Jump(target(r)?))),
    (Opcode::Call, |r| Ok(Instruction::Call(target(r)?))),
    (Opcode::Ret, |_| Ok(Instruction::Ret)),
    (Opcode::Choice, |r| Ok(Instruction::Choice(target(r)?))),
    (Opcode::Commit, |r| Ok(Instruction::Commit(target(r)?))),
    (Opcode::PartialCommit, |r| {
        Ok(Instruction::PartialCommit(target(r)?))
    }),
    (Opcode::BackCommit, |r| Ok(Instruction::BackCommit(target(r)?))),
    (Opcode::Fail, |_| Ok(Instruction::Fail)),
    (Opcode::FailTwice, |_| Ok(Instruction::FailTwice)),
    (Opcode::Any, |_| Ok(Instruction::Any)),
    (Opcode::CharRange, decode_char_range),
    (Opcode::CharSet, |r| Ok(Instruction::CharSet(set(r)?))),
    (Opcode::String, |r| Ok(Instruction::String(literal(r)?))),
    (Opcode::NotCharSet, |r| Ok(Instruction::NotCharSet(set(r)?))),
    (Opcode::NotString, |r| Ok(Instruction::NotString(literal(r)?))),
    (Opcode::OptionalCharSet, |r| {
        Ok(Instruction::OptionalCharSet(set(r)?))
    }),
    (Opcode::OptionalString, |r| {
        Ok(Instruction::OptionalString(literal(r)?))
    }),
    (Opcode::ZeroMoreCharSet, |r| {
        Ok(Instruction::ZeroMoreCharSet(set(r)?))
    }),
    (Opcode::MappedChoice, decode_mapped_choice),
    (Opcode::NodeOpen, |_| Ok(Instruction::NodeOpen)),
    (Opcode::NodeClose, |_| Ok(Instruction::NodeClose)),
    (Opcode::Tag, |r| Ok(Instruction::Tag(label(r, "tag")?))),
    (Opcode::Value, |r| Ok(Instruction::Value(label(r, "value")?))),
    (Opcode::Mark, |_| Ok(Instruction::Mark)),
    (Opcode::Def, |r| Ok(Instruction::Def(label(r, "symbol table")?))),
    (Opcode::Is, |r| Ok(Instruction::Is(label(r, "symbol table")?))),
    (Opcode::Isa, |r| Ok(Instruction::Isa(label(r, "symbol table")?))),
    (Opcode::ScopeBegin, |_| Ok(Instruction::ScopeBegin)),
    (Opcode::ScopeEnd, |_| Ok(Instruction::ScopeEnd)),
];

fn target(r: &mut ByteReader) -> Result<usize, LoadError> {
    let t = r.read_u32("jump target")?;
    usize::try_from(t).map_err(|_| LoadError::Overlarge {
        what: "jump target",
        value: t as u64,
    })
}

fn set(r: &mut ByteReader) -> Result<CharSet, LoadError> {
    Ok(CharSet::from_encoded(&r.read_set("character set")?))
}

fn literal(r: &mut ByteReader) -> Result<Box<[u8]>, LoadError> {
    Ok(r.read_str("string literal")?.into())
}

fn label(r: &mut ByteReader, what: &'static str) -> Result<Arc<str>, LoadError> {
    Ok(Arc::from(r.read_utf8(what)?))
}

fn decode_char_range(r: &mut ByteReader) -> Result<Instruction, LoadError> {
    let lo = r.read_u8("range start")?;
    let hi = r.read_u8("range end")?;
    Ok(Instruction::CharRange(lo, hi))
}

fn decode_mapped_choice(r: &mut ByteReader) -> Result<Instruction, LoadError> {
    let entries = r.read_u16("mapped choice size")?;
    let mut table = MappedTable::new();
    for _ in 0..entries {
        let byte = r.read_u8("mapped choice key")?;
        let target = r.read_u32("mapped choice target")?;
        table.insert(byte, target);
    }
    Ok(Instruction::MappedChoice(table))
}

#[test]
fn decoders_line_up_with_opcodes() {
    for (idx, (op, _)) in DECODERS.iter().enumerate() {
        assert_eq!(u8::from(*op) as usize, idx, "{:?} is in the wrong slot", op);
    }
}
