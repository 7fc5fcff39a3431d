use super::{RuleEntry, VERSION};
use crate::{
    error::EncodeError,
    instruction::{CharSet, Instruction},
};

/// Builds bytecode the loader will accept.
///
/// Instructions are collected first and serialized all at once by [`finish`](Self::finish), so
/// forward jumps can be patched with [`set`](Self::set) once their targets are known.
#[derive(Debug, Clone)]
pub struct ProgramWriter {
    version: (u8, u8),
    filename: String,
    pool_size_hint: u32,
    rules: Vec<RuleEntry>,
    code: Vec<Instruction>,
}

impl ProgramWriter {
    /// A new program whose index 0 is already filled with the reserved `Exit`.
    pub fn new<S: Into<String>>(filename: S) -> Self {
        Self {
            version: VERSION,
            filename: filename.into(),
            pool_size_hint: 0,
            rules: Vec::new(),
            code: vec![Instruction::Exit],
        }
    }

    pub fn version(mut self, major: u8, minor: u8) -> Self {
        self.version = (major, minor);
        self
    }

    pub fn pool_size_hint(mut self, hint: u32) -> Self {
        self.pool_size_hint = hint;
        self
    }

    /// Add a rule table entry.
    pub fn rule<S: Into<String>>(&mut self, name: S, start_index: usize) -> &mut Self {
        self.rules.push(RuleEntry {
            name: name.into(),
            start_index: start_index as u64,
        });
        self
    }

    /// Index the next pushed instruction will get.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Append an instruction and return its index.
    pub fn push(&mut self, inst: Instruction) -> usize {
        self.code.push(inst);
        self.code.len() - 1
    }

    pub fn extend<I: IntoIterator<Item = Instruction>>(&mut self, insts: I) -> &mut Self {
        self.code.extend(insts);
        self
    }

    /// Overwrite the instruction at `index`. Used to backpatch jumps.
    pub fn set(&mut self, index: usize, inst: Instruction) {
        if let Some(slot) = self.code.get_mut(index) {
            *slot = inst;
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.code
    }

    /// Serialize the whole thing.
    pub fn finish(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = vec![self.version.0, self.version.1];
        write_str(&mut out, self.filename.as_bytes(), "file name")?;
        write_u32(&mut out, self.pool_size_hint);

        write_len(&mut out, self.rules.len(), "rule count")?;
        for rule in &self.rules {
            write_str(&mut out, rule.name.as_bytes(), "rule name")?;
            out.extend_from_slice(&rule.start_index.to_be_bytes());
        }

        out.extend_from_slice(&(self.code.len() as u64).to_be_bytes());
        for inst in &self.code {
            encode_instruction(&mut out, inst)?;
        }
        Ok(out)
    }
}

/// Append one instruction, opcode byte first.
pub fn encode_instruction(out: &mut Vec<u8>, inst: &Instruction) -> Result<(), EncodeError> {
    out.push(u8::from(inst.opcode()));
    match inst {
        Instruction::Exit
        | Instruction::Ret
        | Instruction::Fail
        | Instruction::FailTwice
        | Instruction::Any
        | Instruction::NodeOpen
        | Instruction::NodeClose
        | Instruction::Mark
        | Instruction::ScopeBegin
        | Instruction::ScopeEnd => {}
        Instruction::Jump(t)
        | Instruction::Call(t)
        | Instruction::Choice(t)
        | Instruction::Commit(t)
        | Instruction::PartialCommit(t)
        | Instruction::BackCommit(t) => write_target(out, *t)?,
        Instruction::CharRange(lo, hi) => out.extend_from_slice(&[*lo, *hi]),
        Instruction::CharSet(set)
        | Instruction::NotCharSet(set)
        | Instruction::OptionalCharSet(set)
        | Instruction::ZeroMoreCharSet(set) => write_set(out, set),
        Instruction::String(s) | Instruction::NotString(s) | Instruction::OptionalString(s) => {
            write_str(out, s, "string literal")?
        }
        Instruction::MappedChoice(table) => {
            // at most 256 entries, always fits
            out.extend_from_slice(&(table.len() as u16).to_be_bytes());
            for (byte, target) in table.iter() {
                out.push(byte);
                write_target(out, target)?;
            }
        }
        Instruction::Tag(s)
        | Instruction::Value(s)
        | Instruction::Def(s)
        | Instruction::Is(s)
        | Instruction::Isa(s) => write_str(out, s.as_bytes(), "label")?,
    }
    Ok(())
}

fn write_u32(out: &mut Vec<u8>, u: u32) {
    out.extend_from_slice(&u.to_be_bytes());
}

fn write_len(out: &mut Vec<u8>, len: usize, what: &'static str) -> Result<(), EncodeError> {
    let u = u32::try_from(len).map_err(|_| EncodeError {
        what,
        value: len as u64,
    })?;
    write_u32(out, u);
    Ok(())
}

fn write_target(out: &mut Vec<u8>, target: usize) -> Result<(), EncodeError> {
    write_len(out, target, "jump target")
}

fn write_str(out: &mut Vec<u8>, s: &[u8], what: &'static str) -> Result<(), EncodeError> {
    write_len(out, s.len(), what)?;
    out.extend_from_slice(s);
    Ok(())
}

fn write_set(out: &mut Vec<u8>, set: &CharSet) {
    out.extend_from_slice(&set.encode());
}

#[test]
fn header_layout() {
    let mut w = ProgramWriter::new("g.peg").pool_size_hint(7);
    w.rule("A", 1);
    w.push(Instruction::Ret);
    let bytes = w.finish().unwrap();

    #[rustfmt::skip]
    let expected: &[u8] = &[
        0, 1,
        0, 0, 0, 5, b'g', b'.', b'p', b'e', b'g',
        0, 0, 0, 7,
        0, 0, 0, 1,
        0, 0, 0, 1, b'A', 0, 0, 0, 0, 0, 0, 0, 1,
        0, 0, 0, 0, 0, 0, 0, 2,
        0x00,
        0x03,
    ];
    assert_eq!(bytes, expected);
}

#[test]
fn operand_layout() {
    let mut out = Vec::new();
    encode_instruction(&mut out, &Instruction::Choice(0x0102)).unwrap();
    encode_instruction(&mut out, &Instruction::CharRange(b'0', b'9')).unwrap();
    encode_instruction(&mut out, &Instruction::String(b"hi".to_vec().into())).unwrap();
    assert_eq!(
        out,
        [0x04, 0, 0, 1, 2, 0x0B, b'0', b'9', 0x0D, 0, 0, 0, 2, b'h', b'i']
    );
}
