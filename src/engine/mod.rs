//! # The engine
//!
//! One loop, three stacks. Each prepared instruction knows its own handler; the loop calls it and
//! does what the returned [`Step`] says. On [`Step::Fail`] the loop pops a backtrack frame and
//! puts the cursor, the AST stack, the call stack and the symbol table back the way they were
//! when the frame was pushed. Running out of frames is a plain parse failure.

mod handlers;

use tracing::{debug, trace};

use crate::{
    ast::AstNode,
    context::{AstEntry, ParsingContext},
    dispatch::Program,
    error::{ParseFailure, RunError},
    instruction::{Instruction, Opcode, OPCODE_COUNT},
    profile::OpcodeProfile,
};

/// What a handler wants the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Go to the next instruction.
    Next,
    Goto(usize),
    /// Backtrack.
    Fail,
    /// Stop and accept.
    Accept,
}

/// Executes one instruction. Only ever handed instructions of the opcode it's registered under.
pub type Handler = fn(&mut Machine<'_>, &Instruction) -> Result<Step, RunError>;

/// One handler per opcode, indexed by opcode byte.
static DISPATCH: [(Opcode, Handler); OPCODE_COUNT] = [
    (Opcode::Exit, handlers::op_exit),
    (Opcode::Jump, handlers::op_jump),
    (Opcode::Call, handlers::op_call),
    (Opcode::Ret, handlers::op_ret),
    (Opcode::Choice, handlers::op_choice),
    (Opcode::Commit, handlers::op_commit),
    (Opcode::PartialCommit, handlers::op_partial_commit),
    (Opcode::BackCommit, handlers::op_back_commit),
    (Opcode::Fail, handlers::op_fail),
    (Opcode::FailTwice, handlers::op_fail_twice),
    (Opcode::Any, handlers::op_any),
    (Opcode::CharRange, handlers::op_char_range),
    (Opcode::CharSet, handlers::op_char_set),
    (Opcode::String, handlers::op_string),
    (Opcode::NotCharSet, handlers::op_not_char_set),
    (Opcode::NotString, handlers::op_not_string),
    (Opcode::OptionalCharSet, handlers::op_optional_char_set),
    (Opcode::OptionalString, handlers::op_optional_string),
    (Opcode::ZeroMoreCharSet, handlers::op_zero_more_char_set),
    (Opcode::MappedChoice, handlers::op_mapped_choice),
    (Opcode::NodeOpen, handlers::op_node_open),
    (Opcode::NodeClose, handlers::op_node_close),
    (Opcode::Tag, handlers::op_tag),
    (Opcode::Value, handlers::op_value),
    (Opcode::Mark, handlers::op_mark),
    (Opcode::Def, handlers::op_def),
    (Opcode::Is, handlers::op_is),
    (Opcode::Isa, handlers::op_isa),
    (Opcode::ScopeBegin, handlers::op_scope_begin),
    (Opcode::ScopeEnd, handlers::op_scope_end),
];

/// The engine's opcode to handler table, in opcode order.
pub fn dispatch_table() -> &'static [(Opcode, Handler); OPCODE_COUNT] {
    &DISPATCH
}

/// The running state of one [`run`]: a program, a context, and where we are in the program.
pub struct Machine<'a> {
    program: &'a Program,
    ctx: &'a mut ParsingContext,
    pc: usize,
    furthest: usize,
}

impl<'a> Machine<'a> {
    fn new(program: &'a Program, ctx: &'a mut ParsingContext) -> Self {
        let pc = ctx.start_point;
        let furthest = ctx.pos;
        Self {
            program,
            ctx,
            pc,
            furthest,
        }
    }

    /// Cursor into the input.
    pub fn pos(&self) -> usize {
        self.ctx.pos
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.ctx.input.get(self.ctx.pos).copied()
    }

    #[inline]
    fn rest(&self) -> &[u8] {
        self.ctx.input.get(self.ctx.pos..).unwrap_or(&[])
    }

    #[inline]
    fn advance(&mut self, by: usize) {
        self.ctx.pos += by;
    }

    /// Run until we accept or run out of backtrack frames.
    fn execute(&mut self, mut profile: Option<&mut OpcodeProfile>) -> Result<bool, RunError> {
        loop {
            if let Some(matched) = self.step(profile.as_deref_mut())? {
                return Ok(matched);
            }
        }
    }

    /// Execute one instruction. `Some` once the run is over, with whether it matched.
    fn step(&mut self, profile: Option<&mut OpcodeProfile>) -> Result<Option<bool>, RunError> {
        let program = self.program;
        let cell = program.get(self.pc).ok_or(RunError::PcOutOfBounds {
            pc: self.pc,
            count: program.len(),
        })?;
        if let Some(profile) = profile {
            profile.record(cell.opcode());
        }
        trace!(pc = self.pc, pos = self.ctx.pos, "{}", cell.inst);

        let step = (cell.handler)(self, &cell.inst)?;
        self.furthest = self.furthest.max(self.ctx.pos);
        Ok(match step {
            Step::Next => {
                self.pc += 1;
                None
            }
            Step::Goto(target) => {
                self.pc = target;
                None
            }
            Step::Accept => Some(true),
            Step::Fail if self.backtrack() => None,
            Step::Fail => Some(false),
        })
    }

    /// Pop a frame and put everything back. `false` if there was nothing to pop.
    fn backtrack(&mut self) -> bool {
        match self.ctx.backtrack.pop() {
            Some(frame) => {
                trace!(
                    from = self.ctx.pos,
                    to = frame.pos,
                    alt = frame.alt,
                    "backtrack"
                );
                self.ctx.restore(&frame);
                self.pc = frame.alt;
                true
            }
            None => false,
        }
    }
}

/// Run `program` over the context's input, starting at its start point and current cursor.
///
/// The outer `Result` is for things that stop the run dead (a stack overflowing, broken
/// bytecode). The inner one is whether the input matched. On a match the tree is also kept in
/// the context; see [`ParsingContext::take_root`].
pub fn run<'c>(
    program: &Program,
    ctx: &'c mut ParsingContext,
) -> Result<Result<&'c AstNode, ParseFailure>, RunError> {
    run_inner(program, ctx, None)
}

/// [`run`], counting every instruction executed into `profile`.
pub fn run_profiled<'c>(
    program: &Program,
    ctx: &'c mut ParsingContext,
    profile: &mut OpcodeProfile,
) -> Result<Result<&'c AstNode, ParseFailure>, RunError> {
    let out = run_inner(program, ctx, Some(&mut *profile));
    profile.end_run();
    out
}

/// Drop the last result, reset the pool, rewind the cursor. The program stays loaded.
pub fn reset_for_rerun(ctx: &mut ParsingContext) {
    ctx.reset_for_rerun();
}

fn run_inner<'c>(
    program: &Program,
    ctx: &'c mut ParsingContext,
    profile: Option<&mut OpcodeProfile>,
) -> Result<Result<&'c AstNode, ParseFailure>, RunError> {
    if ctx.start_point == 0 {
        return Err(RunError::NoStartPoint);
    }
    ctx.clear_stacks();
    ctx.root = None;
    ctx.pos = ctx.pos.min(ctx.input.len());
    let start = ctx.pos;

    let mut machine = Machine::new(program, &mut *ctx);
    let matched = machine.execute(profile);
    let furthest = machine.furthest;
    let pc = machine.pc;

    let matched = match matched {
        Ok(matched) => matched,
        Err(ono) => {
            debug!("run died at {}: {}", pc, ono);
            ctx.clear_stacks();
            return Err(ono);
        }
    };
    if !matched {
        debug!("no match; furthest was {}", furthest);
        ctx.clear_stacks();
        return Ok(Err(ParseFailure {
            pos: ctx.pos,
            furthest,
        }));
    }

    let root = finish_tree(ctx, start, pc)?;
    ctx.clear_stacks();
    debug!(
        "matched {}..{} with {} pooled nodes",
        start,
        ctx.pos,
        ctx.pool.len()
    );
    Ok(Ok(&*ctx.root.insert(root)))
}

/// Fold everything above the innermost `Open` into one pooled node ending at the cursor.
fn close_node(ctx: &mut ParsingContext, pc: usize) -> Result<(), RunError> {
    let open = ctx
        .ast
        .innermost_open()
        .ok_or(RunError::UnbalancedNode { pc })?;
    let entries = ctx.ast.as_slice();
    let start = match entries.get(open) {
        Some(AstEntry::Open { start }) => *start,
        _ => return Err(RunError::UnbalancedNode { pc }),
    };

    let mut tag = None;
    let mut value = None;
    for entry in &entries[open + 1..] {
        match entry {
            AstEntry::Tag(t) => tag = Some(t.clone()),
            AstEntry::Value(v) => value = Some(v.clone()),
            AstEntry::Open { .. } | AstEntry::Node(_) => {}
        }
    }
    let children = entries[open + 1..].iter().filter_map(|entry| match entry {
        AstEntry::Node(id) => Some(*id),
        _ => None,
    });
    let id = ctx.pool.acquire(start, ctx.pos, tag, value, children)?;

    ctx.ast.truncate(open);
    ctx.ast.push(AstEntry::Node(id));
    Ok(())
}

/// Turn whatever's left on the AST stack after a match into the result tree.
///
/// Nodes still open get closed here. A single top-level node is the root; anything else gets
/// wrapped in an untagged root covering everything this run consumed.
fn finish_tree(ctx: &mut ParsingContext, start: usize, pc: usize) -> Result<AstNode, RunError> {
    while ctx.ast.depth() > 0 {
        close_node(ctx, pc)?;
    }

    let entries = ctx.ast.as_slice();
    let mut tag = None;
    let mut value = None;
    let mut top = Vec::new();
    for entry in entries {
        match entry {
            AstEntry::Node(id) => top.push(*id),
            AstEntry::Tag(t) => tag = Some(t.clone()),
            AstEntry::Value(v) => value = Some(v.clone()),
            AstEntry::Open { .. } => {}
        }
    }

    let root = match top.as_slice() {
        [only] if tag.is_none() && value.is_none() => *only,
        _ => ctx.pool.acquire(start, ctx.pos, tag, value, top)?,
    };
    // everything on the stack came out of this pool during this run
    ctx.pool
        .finalize(root)
        .ok_or(RunError::UnbalancedNode { pc })
}
