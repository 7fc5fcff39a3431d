//! # Instructions
//!
//! A loaded program is a flat array of [`Instruction`]s. Each one is tagged with exactly one
//! [`Opcode`] for its whole life and owns whatever payload its opcode needs: a bitmap, a literal,
//! a label or a jump table. Dropping the array drops the payloads; there is no separate dispose step.
//!
//! Jump targets are absolute indices into the instruction array. The loader checks them all
//! before anything runs.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Opcode bytes, as they appear in the bytecode.
///
/// The discriminant doubles as the index into the loader's decode table and the engine's
/// dispatch table, so these must stay dense and in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // === Control ===
    /// Stop and accept.
    Exit = 0,
    /// `target`
    Jump,
    /// Push the next index on the call stack and go to `target`.
    Call,
    /// Pop the call stack. If it was already empty, the start rule returned and we accept.
    Ret,

    // === Backtracking ===
    /// Push a backtrack frame that resumes at `alt`.
    Choice,
    /// Drop the top frame and go to `target`.
    Commit,
    /// Update the top frame to the current state and go to `target`. Used to close loops.
    PartialCommit,
    /// Pop the top frame, restore it, and go to `target`. This is and-predicate.
    BackCommit,
    /// Backtrack.
    Fail,
    /// Drop the top frame, then backtrack. This is not-predicate.
    FailTwice,

    // === Matching ===
    /// Any single byte.
    Any,
    /// One byte in `lo..=hi`.
    CharRange,
    /// One byte in the set.
    CharSet,
    /// This exact literal.
    String,
    /// Lookahead: fail if the next byte is in the set. Never consumes.
    NotCharSet,
    /// Lookahead: fail if the input continues with the literal. Never consumes.
    NotString,
    /// Zero or one byte in the set. Never fails.
    OptionalCharSet,
    /// The literal, if it's there. Never fails.
    OptionalString,
    /// As many bytes in the set as possible. Never fails.
    ZeroMoreCharSet,
    /// Jump through a table keyed by the next byte, without consuming it.
    MappedChoice,

    // === AST ===
    NodeOpen,
    NodeClose,
    Tag,
    Value,

    // === Symbol tables ===
    /// Remember where the next `Def` starts.
    Mark,
    Def,
    Is,
    Isa,
    ScopeBegin,
    ScopeEnd,
}

/// How many opcodes there are. Tables indexed by opcode have this length.
pub const OPCODE_COUNT: usize = Opcode::ScopeEnd as usize + 1;

impl Opcode {
    /// Every opcode, in discriminant order.
    pub fn all() -> impl Iterator<Item = Opcode> {
        (0..OPCODE_COUNT as u8).filter_map(|b| Opcode::try_from(b).ok())
    }
}

/// One instruction and the payload its opcode needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Exit,
    Jump(usize),
    Call(usize),
    Ret,

    Choice(usize),
    Commit(usize),
    PartialCommit(usize),
    BackCommit(usize),
    Fail,
    FailTwice,

    Any,
    CharRange(u8, u8),
    CharSet(CharSet),
    String(Box<[u8]>),
    NotCharSet(CharSet),
    NotString(Box<[u8]>),
    OptionalCharSet(CharSet),
    OptionalString(Box<[u8]>),
    ZeroMoreCharSet(CharSet),
    MappedChoice(MappedTable),

    NodeOpen,
    NodeClose,
    Tag(Arc<str>),
    Value(Arc<str>),

    Mark,
    /// Name of the symbol table
    Def(Arc<str>),
    Is(Arc<str>),
    Isa(Arc<str>),
    ScopeBegin,
    ScopeEnd,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Exit => Opcode::Exit,
            Self::Jump(_) => Opcode::Jump,
            Self::Call(_) => Opcode::Call,
            Self::Ret => Opcode::Ret,
            Self::Choice(_) => Opcode::Choice,
            Self::Commit(_) => Opcode::Commit,
            Self::PartialCommit(_) => Opcode::PartialCommit,
            Self::BackCommit(_) => Opcode::BackCommit,
            Self::Fail => Opcode::Fail,
            Self::FailTwice => Opcode::FailTwice,
            Self::Any => Opcode::Any,
            Self::CharRange(..) => Opcode::CharRange,
            Self::CharSet(_) => Opcode::CharSet,
            Self::String(_) => Opcode::String,
            Self::NotCharSet(_) => Opcode::NotCharSet,
            Self::NotString(_) => Opcode::NotString,
            Self::OptionalCharSet(_) => Opcode::OptionalCharSet,
            Self::OptionalString(_) => Opcode::OptionalString,
            Self::ZeroMoreCharSet(_) => Opcode::ZeroMoreCharSet,
            Self::MappedChoice(_) => Opcode::MappedChoice,
            Self::NodeOpen => Opcode::NodeOpen,
            Self::NodeClose => Opcode::NodeClose,
            Self::Tag(_) => Opcode::Tag,
            Self::Value(_) => Opcode::Value,
            Self::Mark => Opcode::Mark,
            Self::Def(_) => Opcode::Def,
            Self::Is(_) => Opcode::Is,
            Self::Isa(_) => Opcode::Isa,
            Self::ScopeBegin => Opcode::ScopeBegin,
            Self::ScopeEnd => Opcode::ScopeEnd,
        }
    }

    /// Every instruction index this one can transfer control to.
    pub fn targets(&self) -> Vec<usize> {
        match self {
            Self::Jump(t)
            | Self::Call(t)
            | Self::Choice(t)
            | Self::Commit(t)
            | Self::PartialCommit(t)
            | Self::BackCommit(t) => vec![*t],
            Self::MappedChoice(table) => table.iter().map(|(_, t)| t).collect(),
            _ => Vec::new(),
        }
    }
}

/// 256-bit set of bytes.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CharSet {
    bitmap: [u64; 4],
}

impl CharSet {
    /// Size of the set on the wire.
    pub const ENCODED_LEN: usize = 32;

    pub fn new() -> Self {
        Self::default()
    }

    /// Build from inclusive byte ranges.
    pub fn from_ranges(ranges: &[(u8, u8)]) -> Self {
        let mut set = Self::new();
        for &(lo, hi) in ranges {
            for b in lo..=hi {
                set.insert(b);
            }
        }
        set
    }

    pub fn from_bytes<B: AsRef<[u8]>>(bytes: B) -> Self {
        let mut set = Self::new();
        for &b in bytes.as_ref() {
            set.insert(b);
        }
        set
    }

    /// Byte `b` is bit `b % 8` of byte `b / 8`, low bit first.
    pub fn from_encoded(raw: &[u8; Self::ENCODED_LEN]) -> Self {
        let mut bitmap = [0u64; 4];
        for (word, chunk) in bitmap.iter_mut().zip(raw.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_le_bytes(buf);
        }
        Self { bitmap }
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        for (chunk, word) in out.chunks_exact_mut(8).zip(self.bitmap.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    #[inline]
    pub fn insert(&mut self, b: u8) {
        self.bitmap[(b / 64) as usize] |= 1u64 << (b % 64);
    }

    #[inline]
    pub fn contains(&self, b: u8) -> bool {
        self.bitmap[(b / 64) as usize] & (1u64 << (b % 64)) != 0
    }

    pub fn members(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |&b| self.contains(b))
    }

    /// Smallest list of inclusive ranges covering the set, in order.
    pub fn ranges(&self) -> Vec<[u8; 2]> {
        let set: Vec<u8> = self.members().collect();
        if set.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        // Index we're forming the current range *from*
        let mut pivot_point = 0;
        for (idx, &byte) in set.iter().enumerate() {
            let pivot = set[pivot_point];
            // Counting up one-by-one, (idx - pivot_point) has the same span as (byte - pivot).
            // When that breaks, the *last* byte closed a range.
            if Some((idx - pivot_point) as u8) != byte.checked_sub(pivot) {
                out.push([pivot, set[idx - 1]]);
                pivot_point = idx;
            }
        }
        // and cap it off
        out.push([set[pivot_point], set[set.len() - 1]]);
        out
    }
}

impl std::fmt::Debug for CharSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CharSet({})", self)
    }
}

/// Jump table for [`Instruction::MappedChoice`]: next byte to instruction index.
#[derive(Clone, PartialEq, Eq)]
pub struct MappedTable {
    targets: Box<[Option<u32>; 256]>,
}

impl MappedTable {
    pub fn new() -> Self {
        Self {
            targets: Box::new([None; 256]),
        }
    }

    pub fn insert(&mut self, byte: u8, target: u32) {
        self.targets[byte as usize] = Some(target);
    }

    #[inline]
    pub fn get(&self, byte: u8) -> Option<usize> {
        self.targets[byte as usize].map(|t| t as usize)
    }

    /// Mapped entries, in byte order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, usize)> + '_ {
        self.targets
            .iter()
            .enumerate()
            .filter_map(|(b, t)| t.map(|t| (b as u8, t as usize)))
    }

    pub fn len(&self) -> usize {
        self.targets.iter().filter(|t| t.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MappedTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MappedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[test]
fn opcode_discriminants_are_dense() {
    for (idx, op) in Opcode::all().enumerate() {
        assert_eq!(u8::from(op) as usize, idx);
    }
    assert_eq!(Opcode::all().count(), OPCODE_COUNT);
    assert!(Opcode::try_from(OPCODE_COUNT as u8).is_err());
}

#[test]
fn charset_ranges() {
    use itertools::Itertools;

    for (test, ans) in [
        (b"abcde".as_ref(), b"ae".as_ref()),
        (b"ABCDEFGabcdefg", b"AGag"),
        (b"testing 12345", b"  15eeggiinnst"),
    ] {
        let set = CharSet::from_bytes(test);
        let ans = ans.chunks_exact(2).map(|x| [x[0], x[1]]).collect_vec();
        assert_eq!(set.ranges(), ans);
    }
    assert!(CharSet::new().ranges().is_empty());
    assert_eq!(CharSet::from_ranges(&[(0, 255)]).ranges(), vec![[0, 255]]);
}

#[test]
fn charset_wire_layout() {
    let set = CharSet::from_bytes(b"\x00\x09A\xff");
    let raw = set.encode();
    assert_eq!(raw[0], 0b0000_0001);
    assert_eq!(raw[1], 0b0000_0010);
    assert_eq!(raw[b'A' as usize / 8], 1 << (b'A' % 8));
    assert_eq!(raw[31], 0b1000_0000);
    assert_eq!(CharSet::from_encoded(&raw), set);
}
