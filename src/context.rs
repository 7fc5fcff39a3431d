//! Mutable state for running a program: the input, the cursor, the stacks and the pool.

use std::sync::Arc;

use crate::{
    ast::AstNode,
    error::{RunError, StackKind},
    pool::{MemoryPool, NodeId},
};

/// Tunables for a [`ParsingContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the backtrack and call stacks, and how deeply nodes may nest.
    pub max_stack_length: usize,
    /// Capacity of the stacked symbol table, scope markers included.
    pub max_symbols: usize,
}

impl Config {
    pub const DEFAULT_MAX_STACK_LENGTH: usize = 1024;
    pub const DEFAULT_MAX_SYMBOLS: usize = 256;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_stack_length: Self::DEFAULT_MAX_STACK_LENGTH,
            max_symbols: Self::DEFAULT_MAX_SYMBOLS,
        }
    }
}

/// A stack that refuses to grow past a fixed capacity.
#[derive(Debug, Clone)]
pub struct BoundedStack<T> {
    items: Vec<T>,
    capacity: usize,
    kind: StackKind,
}

impl<T> BoundedStack<T> {
    pub fn new(kind: StackKind, capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity,
            kind,
        }
    }

    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), RunError> {
        if self.items.len() >= self.capacity {
            return Err(RunError::StackOverflow {
                stack: self.kind,
                capacity: self.capacity,
            });
        }
        self.items.push(item);
        Ok(())
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// Pop, treating an empty stack as broken bytecode at `pc`.
    #[inline]
    pub fn pop_at(&mut self, pc: usize) -> Result<T, RunError> {
        self.items.pop().ok_or(RunError::StackUnderflow {
            stack: self.kind,
            pc,
        })
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.items.last_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn truncate(&mut self, len: usize) {
        self.items.truncate(len);
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

/// Everything a backtrack has to put back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Where to resume.
    pub alt: usize,
    pub pos: usize,
    /// Length of the AST log, not its nesting depth.
    pub ast_len: usize,
    pub call_depth: usize,
    pub symbol_depth: usize,
    pub mark_depth: usize,
}

/// An entry in the AST log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstEntry {
    Open { start: usize },
    Tag(Arc<str>),
    Value(Arc<str>),
    Node(NodeId),
}

/// What the current attempt has built so far.
///
/// Backtracking just truncates the log, and `NodeClose` folds everything above the innermost
/// `Open` into a single `Node`. Only open nodes count against the capacity: a node can have as
/// many finished children as the input gives it.
#[derive(Debug, Clone)]
pub struct AstLog {
    entries: Vec<AstEntry>,
    /// Indices of the `Open` entries, innermost last.
    opens: BoundedStack<usize>,
}

impl AstLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            opens: BoundedStack::new(StackKind::Ast, capacity),
        }
    }

    /// Start a node at `start`. This is the only push that can overflow.
    pub fn open(&mut self, start: usize) -> Result<(), RunError> {
        self.opens.push(self.entries.len())?;
        self.entries.push(AstEntry::Open { start });
        Ok(())
    }

    /// Append a tag, a value or a finished node to the innermost open node.
    pub fn push(&mut self, entry: AstEntry) {
        debug_assert!(!matches!(entry, AstEntry::Open { .. }));
        self.entries.push(entry);
    }

    /// Index of the innermost `Open`.
    pub fn innermost_open(&self) -> Option<usize> {
        self.opens.last().copied()
    }

    /// Number of nodes still open.
    pub fn depth(&self) -> usize {
        self.opens.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
        while matches!(self.opens.last(), Some(&open) if open >= len) {
            self.opens.pop();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.opens.clear();
    }

    pub fn as_slice(&self) -> &[AstEntry] {
        &self.entries
    }
}

/// An entry in the stacked symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolEntry {
    Binding { table: Arc<str>, text: Box<[u8]> },
    Scope,
}

/// The whole execution-time state of one parser.
///
/// One context runs one program at a time, on one thread. Cloning a freshly loaded context is
/// the cheap way to get another one for the same program.
#[derive(Debug, Clone)]
pub struct ParsingContext {
    pub(crate) input: Vec<u8>,
    pub(crate) pos: usize,
    pub(crate) start_point: usize,

    pub(crate) backtrack: BoundedStack<Frame>,
    pub(crate) ast: AstLog,
    pub(crate) calls: BoundedStack<usize>,
    pub(crate) symbols: BoundedStack<SymbolEntry>,
    /// Starts of the text pending `Def`s will bind.
    pub(crate) marks: Vec<usize>,

    pub(crate) root: Option<AstNode>,
    pub(crate) pool: MemoryPool,

    pub(crate) instruction_count: usize,
    pub(crate) pool_size_hint: usize,
    pub(crate) config: Config,
}

impl ParsingContext {
    /// An empty context with no input and no program yet.
    pub fn new(config: Config) -> Self {
        Self {
            input: Vec::new(),
            pos: 0,
            start_point: 0,
            backtrack: BoundedStack::new(StackKind::Backtrack, config.max_stack_length),
            ast: AstLog::new(config.max_stack_length),
            calls: BoundedStack::new(StackKind::Call, config.max_stack_length),
            symbols: BoundedStack::new(StackKind::Symbol, config.max_symbols),
            marks: Vec::new(),
            root: None,
            pool: MemoryPool::new(),
            instruction_count: 0,
            pool_size_hint: 0,
            config,
        }
    }

    /// Replace the input. The cursor goes back to 0 and any previous result is dropped.
    pub fn set_input<B: Into<Vec<u8>>>(&mut self, input: B) {
        self.input = input.into();
        self.pos = 0;
        self.root = None;
    }

    pub fn input(&self) -> &[u8] {
        &self.input
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Move the cursor. Clamped to the input length.
    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos.min(self.input.len());
    }

    /// Instruction index runs begin at.
    pub fn start_point(&self) -> usize {
        self.start_point
    }

    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }

    pub fn pool_size_hint(&self) -> usize {
        self.pool_size_hint
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }

    /// Result of the last successful run.
    pub fn root(&self) -> Option<&AstNode> {
        self.root.as_ref()
    }

    /// Take ownership of the last result.
    pub fn take_root(&mut self) -> Option<AstNode> {
        self.root.take()
    }

    pub fn backtrack_depth(&self) -> usize {
        self.backtrack.len()
    }

    /// Number of nodes still open.
    pub fn ast_depth(&self) -> usize {
        self.ast.depth()
    }

    pub fn call_depth(&self) -> usize {
        self.calls.len()
    }

    pub fn symbol_depth(&self) -> usize {
        self.symbols.len()
    }

    /// Get ready to run the same program again over the same input: drop the old result,
    /// reset the pool, rewind the cursor and empty the stacks.
    pub fn reset_for_rerun(&mut self) {
        self.root = None;
        self.pool.reset();
        self.pos = 0;
        self.clear_stacks();
    }

    pub(crate) fn clear_stacks(&mut self) {
        self.backtrack.clear();
        self.ast.clear();
        self.calls.clear();
        self.symbols.clear();
        self.marks.clear();
    }

    /// Snapshot of everything a backtrack to here has to restore.
    pub(crate) fn frame(&self, alt: usize) -> Frame {
        Frame {
            alt,
            pos: self.pos,
            ast_len: self.ast.len(),
            call_depth: self.calls.len(),
            symbol_depth: self.symbols.len(),
            mark_depth: self.marks.len(),
        }
    }

    pub(crate) fn restore(&mut self, frame: &Frame) {
        self.pos = frame.pos;
        self.ast.truncate(frame.ast_len);
        self.calls.truncate(frame.call_depth);
        self.symbols.truncate(frame.symbol_depth);
        self.marks.truncate(frame.mark_depth);
    }

    /// The most recent mark. It's popped unless a live backtrack frame could still need it.
    pub(crate) fn take_mark(&mut self) -> Option<usize> {
        let pinned = self.backtrack.last().map_or(0, |frame| frame.mark_depth);
        let at = *self.marks.last()?;
        if self.marks.len() > pinned {
            self.marks.pop();
        }
        Some(at)
    }
}

impl Default for ParsingContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[test]
fn stacks_are_bounded() {
    let mut stack = BoundedStack::new(StackKind::Call, 2);
    assert!(stack.push(1).is_ok());
    assert!(stack.push(2).is_ok());
    assert_eq!(
        stack.push(3),
        Err(RunError::StackOverflow {
            stack: StackKind::Call,
            capacity: 2
        })
    );
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.pop_at(7), Ok(2));
    assert_eq!(stack.pop_at(7), Ok(1));
    assert_eq!(
        stack.pop_at(7),
        Err(RunError::StackUnderflow {
            stack: StackKind::Call,
            pc: 7
        })
    );
}

#[test]
fn restore_puts_everything_back() {
    let mut ctx = ParsingContext::default();
    ctx.set_input("abc");
    ctx.ast.open(0).unwrap();
    ctx.calls.push(4).unwrap();
    let frame = ctx.frame(9);

    ctx.pos = 3;
    ctx.ast.open(1).unwrap();
    ctx.ast.push(AstEntry::Tag("T".into()));
    ctx.calls.push(12).unwrap();
    ctx.symbols.push(SymbolEntry::Scope).unwrap();
    ctx.marks.push(2);
    assert_eq!(ctx.ast_depth(), 2);
    ctx.restore(&frame);

    assert_eq!(ctx.pos(), 0);
    assert_eq!(ctx.ast_depth(), 1);
    assert_eq!(ctx.ast.len(), 1);
    assert_eq!(ctx.call_depth(), 1);
    assert_eq!(ctx.symbol_depth(), 0);
    assert!(ctx.marks.is_empty());
    assert_eq!(frame.alt, 9);
}

#[test]
fn only_open_nodes_fill_the_ast_log() {
    let mut log = AstLog::new(2);
    log.open(0).unwrap();
    for _ in 0..10 {
        log.push(AstEntry::Value("v".into()));
    }
    log.open(3).unwrap();
    assert_eq!(
        log.open(4),
        Err(RunError::StackOverflow {
            stack: StackKind::Ast,
            capacity: 2
        })
    );
    assert_eq!(log.depth(), 2);
    assert_eq!(log.innermost_open(), Some(11));

    log.truncate(11);
    assert_eq!(log.depth(), 1);
    assert_eq!(log.innermost_open(), Some(0));
    assert!(log.open(5).is_ok());
}

#[test]
fn marks_a_frame_can_see_survive_def() {
    let mut ctx = ParsingContext::default();
    ctx.marks.push(0);
    let frame = ctx.frame(1);
    ctx.backtrack.push(frame).unwrap();

    // pushed before the choice, so the frame still needs it
    assert_eq!(ctx.take_mark(), Some(0));
    assert_eq!(ctx.marks, [0]);

    ctx.marks.push(5);
    assert_eq!(ctx.take_mark(), Some(5));
    assert_eq!(ctx.marks, [0]);

    ctx.backtrack.clear();
    assert_eq!(ctx.take_mark(), Some(0));
    assert_eq!(ctx.take_mark(), None);
}
