//! Print instructions, sets and trees.

use std::fmt::{self, Debug, Display, Write};

use itertools::Itertools;

use crate::{
    ast::AstNode,
    instruction::{CharSet, Instruction},
};

/// Formats a byte string, escaping anything that isn't printable ASCII.
///
/// `Display` leaves it bare; `Debug` quotes it and uses the usual short escapes.
pub struct BstrFmt<B: AsRef<[u8]>>(pub B);

impl<B: AsRef<[u8]>> Display for BstrFmt<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0.as_ref() {
            match b {
                0x20..=0x7e => f.write_char(b as char)?,
                // pad it to a length of 2 with 0s if need be
                ono => write!(f, "\\x{:02X}", ono)?,
            }
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]>> Debug for BstrFmt<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('"')?;
        for &b in self.0.as_ref() {
            match b {
                b'\t' => f.write_str("\\t")?,
                b'\r' => f.write_str("\\r")?,
                b'\n' => f.write_str("\\n")?,
                b'"' => f.write_str("\\\"")?,
                b'\\' => f.write_str("\\\\")?,
                b'\x0b' => f.write_str("\\v")?,
                b'\x0c' => f.write_str("\\f")?,
                b'\0' => f.write_str("\\0")?,
                0x20..=0x7e => f.write_char(b as char)?,
                ono => write!(f, "\\x{:02X}", ono)?,
            }
        }
        f.write_char('"')
    }
}

/// `[0-9a-f_]`, in range form.
impl Display for CharSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('[')?;
        for [lo, hi] in self.ranges() {
            if lo == hi {
                write!(f, "{}", BstrFmt([lo]))?;
            } else {
                write!(f, "{}-{}", BstrFmt([lo]), BstrFmt([hi]))?;
            }
        }
        f.write_char(']')
    }
}

/// Roughly how a disassembler would print it: opcode name, then operands.
impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        match self {
            Self::Jump(t)
            | Self::Call(t)
            | Self::Choice(t)
            | Self::Commit(t)
            | Self::PartialCommit(t)
            | Self::BackCommit(t) => write!(f, "{:?} {}", op, t),
            Self::CharRange(lo, hi) => write!(f, "{:?} {}-{}", op, BstrFmt([*lo]), BstrFmt([*hi])),
            Self::CharSet(set)
            | Self::NotCharSet(set)
            | Self::OptionalCharSet(set)
            | Self::ZeroMoreCharSet(set) => write!(f, "{:?} {}", op, set),
            Self::String(s) | Self::NotString(s) | Self::OptionalString(s) => {
                write!(f, "{:?} {:?}", op, BstrFmt(s))
            }
            Self::MappedChoice(table) => write!(
                f,
                "{:?} {{{}}}",
                op,
                table
                    .iter()
                    .map(|(b, t)| format!("{:?}: {}", BstrFmt([b]), t))
                    .join(", ")
            ),
            Self::Tag(s) => write!(f, "{:?} #{}", op, s),
            Self::Value(s) | Self::Def(s) | Self::Is(s) | Self::Isa(s) => {
                write!(f, "{:?} {}", op, s)
            }
            _ => write!(f, "{:?}", op),
        }
    }
}

/// An indented dump of a tree, one node per line.
///
/// Made by [`AstNode::display`].
pub struct TreeFmt<'a> {
    node: &'a AstNode,
    input: Option<&'a [u8]>,
}

impl AstNode {
    /// Dump this tree. With `input`, leaves also show the text they matched.
    pub fn display<'a>(&'a self, input: Option<&'a [u8]>) -> TreeFmt<'a> {
        TreeFmt { node: self, input }
    }
}

impl Display for TreeFmt<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn recur(
            f: &mut fmt::Formatter<'_>,
            node: &AstNode,
            input: Option<&[u8]>,
            depth: usize,
        ) -> fmt::Result {
            write!(f, "{:indent$}", "", indent = depth * 2)?;
            match node.tag() {
                Some(tag) => write!(f, "#{}", tag)?,
                None => f.write_char('#')?,
            }
            write!(f, " [{}, {})", node.start(), node.end())?;
            if let Some(value) = node.value() {
                write!(f, " = {}", value)?;
            }
            if node.is_leaf() {
                if let Some(text) = input.and_then(|input| node.text(input)) {
                    write!(f, " {:?}", BstrFmt(text))?;
                }
            }
            writeln!(f)?;
            for child in node.children() {
                recur(f, child, input, depth + 1)?;
            }
            Ok(())
        }

        recur(f, self.node, self.input, 0)
    }
}

#[test]
fn bstr_escapes() {
    assert_eq!(BstrFmt(b"a\x01b").to_string(), "a\\x01b");
    assert_eq!(
        format!("{:?}", BstrFmt(b"tab\there \"q\"\x0b")),
        "\"tab\\there \\\"q\\\"\\v\""
    );
}

#[test]
fn instruction_display() {
    let set = CharSet::from_ranges(&[(b'0', b'9'), (b'_', b'_')]);
    assert_eq!(set.to_string(), "[0-9_]");
    assert_eq!(Instruction::ZeroMoreCharSet(set).to_string(), "ZeroMoreCharSet [0-9_]");
    assert_eq!(Instruction::Choice(12).to_string(), "Choice 12");
    assert_eq!(
        Instruction::String(b"if\n".to_vec().into()).to_string(),
        "String \"if\\n\""
    );
    assert_eq!(Instruction::Tag("Digit".into()).to_string(), "Tag #Digit");
    assert_eq!(Instruction::NodeOpen.to_string(), "NodeOpen");

    let mut table = crate::instruction::MappedTable::new();
    table.insert(b'a', 3);
    table.insert(b'b', 7);
    assert_eq!(
        Instruction::MappedChoice(table).to_string(),
        "MappedChoice {\"a\": 3, \"b\": 7}"
    );
}

#[test]
fn tree_display() {
    let tree = AstNode::new(0, 3)
        .with_tag("Sum")
        .with_child(AstNode::new(0, 1).with_tag("Digit"))
        .with_child(AstNode::new(2, 3).with_tag("Digit").with_value("9"));
    assert_eq!(
        tree.display(Some(&b"1+9"[..])).to_string(),
        "#Sum [0, 3)\n  #Digit [0, 1) \"1\"\n  #Digit [2, 3) = 9 \"9\"\n"
    );
    assert_eq!(
        tree.display(None).to_string().lines().next(),
        Some("#Sum [0, 3)")
    );
}
