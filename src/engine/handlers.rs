//! One routine per opcode. Each is only ever given instructions of its own opcode; anything else
//! means the program was prepared wrong, and comes back as [`RunError::HandlerMismatch`].

use super::{close_node, Machine, Step};
use crate::{
    context::{AstEntry, Frame, SymbolEntry},
    error::{RunError, StackKind},
    instruction::{Instruction, Opcode},
};

/// Pull the operand out of `$inst`, or bail if it's the wrong instruction for this handler.
macro_rules! operand {
    ($m:expr, $inst:expr, $op:ident, $pat:pat => $out:expr) => {
        match $inst {
            $pat => $out,
            _ => {
                return Err(RunError::HandlerMismatch {
                    pc: $m.pc,
                    handler: Opcode::$op,
                })
            }
        }
    };
}

/// For the operand-less instructions.
macro_rules! bare {
    ($m:expr, $inst:expr, $op:ident) => {
        operand!($m, $inst, $op, Instruction::$op => ())
    };
}

type Out = Result<Step, RunError>;

// === Control ===

pub(super) fn op_exit(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, Exit);
    Ok(Step::Accept)
}

pub(super) fn op_jump(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let target = operand!(m, inst, Jump, Instruction::Jump(t) => *t);
    Ok(Step::Goto(target))
}

pub(super) fn op_call(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let target = operand!(m, inst, Call, Instruction::Call(t) => *t);
    m.ctx.calls.push(m.pc + 1)?;
    Ok(Step::Goto(target))
}

pub(super) fn op_ret(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, Ret);
    // returning out of the start rule is a match
    Ok(match m.ctx.calls.pop() {
        Some(back) => Step::Goto(back),
        None => Step::Accept,
    })
}

// === Backtracking ===

pub(super) fn op_choice(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let alt = operand!(m, inst, Choice, Instruction::Choice(t) => *t);
    let frame = m.ctx.frame(alt);
    m.ctx.backtrack.push(frame)?;
    Ok(Step::Next)
}

pub(super) fn op_commit(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let target = operand!(m, inst, Commit, Instruction::Commit(t) => *t);
    m.ctx.backtrack.pop_at(m.pc)?;
    Ok(Step::Goto(target))
}

pub(super) fn op_partial_commit(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let target = operand!(m, inst, PartialCommit, Instruction::PartialCommit(t) => *t);
    let now = m.ctx.frame(0);
    let top = m
        .ctx
        .backtrack
        .last_mut()
        .ok_or(RunError::StackUnderflow {
            stack: StackKind::Backtrack,
            pc: m.pc,
        })?;
    *top = Frame { alt: top.alt, ..now };
    Ok(Step::Goto(target))
}

pub(super) fn op_back_commit(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let target = operand!(m, inst, BackCommit, Instruction::BackCommit(t) => *t);
    let frame = m.ctx.backtrack.pop_at(m.pc)?;
    m.ctx.restore(&frame);
    Ok(Step::Goto(target))
}

pub(super) fn op_fail(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, Fail);
    Ok(Step::Fail)
}

pub(super) fn op_fail_twice(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, FailTwice);
    m.ctx.backtrack.pop_at(m.pc)?;
    Ok(Step::Fail)
}

// === Matching ===

pub(super) fn op_any(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, Any);
    if m.peek().is_none() {
        return Ok(Step::Fail);
    }
    m.advance(1);
    Ok(Step::Next)
}

pub(super) fn op_char_range(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let (lo, hi) = operand!(m, inst, CharRange, Instruction::CharRange(lo, hi) => (*lo, *hi));
    match m.peek() {
        Some(b) if (lo..=hi).contains(&b) => {
            m.advance(1);
            Ok(Step::Next)
        }
        _ => Ok(Step::Fail),
    }
}

pub(super) fn op_char_set(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let set = operand!(m, inst, CharSet, Instruction::CharSet(set) => set);
    match m.peek() {
        Some(b) if set.contains(b) => {
            m.advance(1);
            Ok(Step::Next)
        }
        _ => Ok(Step::Fail),
    }
}

pub(super) fn op_string(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let lit = operand!(m, inst, String, Instruction::String(s) => s);
    if !m.rest().starts_with(lit) {
        return Ok(Step::Fail);
    }
    m.advance(lit.len());
    Ok(Step::Next)
}

pub(super) fn op_not_char_set(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let set = operand!(m, inst, NotCharSet, Instruction::NotCharSet(set) => set);
    Ok(match m.peek() {
        Some(b) if set.contains(b) => Step::Fail,
        _ => Step::Next,
    })
}

pub(super) fn op_not_string(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let lit = operand!(m, inst, NotString, Instruction::NotString(s) => s);
    Ok(if m.rest().starts_with(lit) {
        Step::Fail
    } else {
        Step::Next
    })
}

pub(super) fn op_optional_char_set(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let set = operand!(m, inst, OptionalCharSet, Instruction::OptionalCharSet(set) => set);
    if matches!(m.peek(), Some(b) if set.contains(b)) {
        m.advance(1);
    }
    Ok(Step::Next)
}

pub(super) fn op_optional_string(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let lit = operand!(m, inst, OptionalString, Instruction::OptionalString(s) => s);
    if m.rest().starts_with(lit) {
        m.advance(lit.len());
    }
    Ok(Step::Next)
}

pub(super) fn op_zero_more_char_set(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let set = operand!(m, inst, ZeroMoreCharSet, Instruction::ZeroMoreCharSet(set) => set);
    let run = m.rest().iter().take_while(|&&b| set.contains(b)).count();
    m.advance(run);
    Ok(Step::Next)
}

pub(super) fn op_mapped_choice(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let table = operand!(m, inst, MappedChoice, Instruction::MappedChoice(table) => table);
    Ok(match m.peek().and_then(|b| table.get(b)) {
        Some(target) => Step::Goto(target),
        None => Step::Fail,
    })
}

// === AST ===

pub(super) fn op_node_open(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, NodeOpen);
    let start = m.ctx.pos;
    m.ctx.ast.open(start)?;
    Ok(Step::Next)
}

pub(super) fn op_node_close(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, NodeClose);
    close_node(m.ctx, m.pc)?;
    Ok(Step::Next)
}

pub(super) fn op_tag(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let tag = operand!(m, inst, Tag, Instruction::Tag(t) => t);
    m.ctx.ast.push(AstEntry::Tag(tag.clone()));
    Ok(Step::Next)
}

pub(super) fn op_value(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let value = operand!(m, inst, Value, Instruction::Value(v) => v);
    m.ctx.ast.push(AstEntry::Value(value.clone()));
    Ok(Step::Next)
}

// === Symbol tables ===

pub(super) fn op_mark(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, Mark);
    let pos = m.ctx.pos;
    m.ctx.marks.push(pos);
    Ok(Step::Next)
}

pub(super) fn op_def(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let table = operand!(m, inst, Def, Instruction::Def(t) => t);
    let from = m.ctx.take_mark().ok_or(RunError::MissingMark { pc: m.pc })?;
    let text = m.ctx.input.get(from..m.ctx.pos).unwrap_or(&[]).into();
    m.ctx.symbols.push(SymbolEntry::Binding {
        table: table.clone(),
        text,
    })?;
    Ok(Step::Next)
}

/// Bindings in `table`, most recent first.
fn bindings<'m>(m: &'m Machine<'_>, table: &'m str) -> impl Iterator<Item = &'m [u8]> + 'm {
    m.ctx.symbols.as_slice().iter().rev().filter_map(move |e| match e {
        SymbolEntry::Binding { table: t, text } if &**t == table => Some(&**text),
        _ => None,
    })
}

pub(super) fn op_is(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let table = operand!(m, inst, Is, Instruction::Is(t) => t);
    let hit = bindings(m, table)
        .next()
        .filter(|text| m.rest().starts_with(text))
        .map(<[u8]>::len);
    Ok(match hit {
        Some(len) => {
            m.advance(len);
            Step::Next
        }
        None => Step::Fail,
    })
}

pub(super) fn op_isa(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    let table = operand!(m, inst, Isa, Instruction::Isa(t) => t);
    let hit = bindings(m, table)
        .find(|text| m.rest().starts_with(text))
        .map(<[u8]>::len);
    Ok(match hit {
        Some(len) => {
            m.advance(len);
            Step::Next
        }
        None => Step::Fail,
    })
}

pub(super) fn op_scope_begin(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, ScopeBegin);
    m.ctx.symbols.push(SymbolEntry::Scope)?;
    Ok(Step::Next)
}

pub(super) fn op_scope_end(m: &mut Machine<'_>, inst: &Instruction) -> Out {
    bare!(m, inst, ScopeEnd);
    let scope = m
        .ctx
        .symbols
        .as_slice()
        .iter()
        .rposition(|e| matches!(e, SymbolEntry::Scope))
        .ok_or(RunError::StackUnderflow {
            stack: StackKind::Symbol,
            pc: m.pc,
        })?;
    m.ctx.symbols.truncate(scope);
    Ok(Step::Next)
}
