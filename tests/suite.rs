use std::{sync::Arc, thread};

use pegvm::{
    load, reset_for_rerun, run, run_profiled, AstNode, CharSet, Config, Instruction, Loader,
    LoaderOptions, MappedTable, Opcode, OpcodeProfile, ParseFailure, ParsingContext, Program,
    ProgramWriter, RunError, StackKind,
};

fn string(s: &str) -> Instruction {
    Instruction::String(s.as_bytes().into())
}

fn tag(s: &str) -> Instruction {
    Instruction::Tag(s.into())
}

fn lower() -> CharSet {
    CharSet::from_ranges(&[(b'a', b'z')])
}

fn build(code: Vec<Instruction>) -> Vec<u8> {
    let mut w = ProgramWriter::new("suite.peg");
    w.extend(code);
    w.finish().unwrap()
}

fn load_with(code: Vec<Instruction>, config: Config) -> (Program, ParsingContext) {
    Loader::new(LoaderOptions {
        strict_version: true,
        config,
    })
    .load(&build(code), None)
    .unwrap()
}

fn parse(
    program: &Program,
    ctx: &mut ParsingContext,
    input: &str,
) -> Result<AstNode, ParseFailure> {
    ctx.set_input(input);
    run(program, ctx).unwrap().map(AstNode::clone)
}

/// `Digit <- [0-9]`, tagged.
fn digit() -> Vec<Instruction> {
    vec![
        Instruction::NodeOpen,
        Instruction::CharRange(b'0', b'9'),
        tag("Digit"),
        Instruction::NodeClose,
        Instruction::Ret,
    ]
}

#[test]
fn digit_end_to_end() {
    let (program, mut ctx) = load(&build(digit()), None).unwrap();

    let tree = parse(&program, &mut ctx, "7").unwrap();
    assert_eq!(tree.tag(), Some("Digit"));
    assert_eq!(tree.span(), 0..1);
    assert!(tree.is_leaf());

    assert_eq!(
        parse(&program, &mut ctx, "x"),
        Err(ParseFailure { pos: 0, furthest: 0 })
    );
    assert!(ctx.root().is_none());
}

#[test]
fn loaded_program_matches_what_was_written() {
    let mut table = MappedTable::new();
    table.insert(b'q', 3);
    let mut w = ProgramWriter::new("round.peg").pool_size_hint(64);
    w.rule("Start", 1);
    w.extend(vec![
        Instruction::Choice(4),
        Instruction::ZeroMoreCharSet(lower()),
        Instruction::MappedChoice(table),
        Instruction::Commit(5),
        Instruction::Def("T".into()),
        Instruction::Value("v".into()),
        Instruction::Ret,
    ]);
    let bytes = w.finish().unwrap();

    let (program, ctx) = load(&bytes, Some("Start")).unwrap();
    assert_eq!(program.len(), w.instructions().len());
    assert!(program.handler_matches_table());
    for (prepared, written) in program.iter().zip(w.instructions()) {
        assert_eq!(prepared.instruction(), written);
        assert_eq!(prepared.opcode(), written.opcode());
    }
    assert_eq!(ctx.instruction_count(), 8);
    assert_eq!(ctx.pool_size_hint(), 64);
    assert_eq!(ctx.start_point(), 1);
}

#[test]
fn start_rule_lookup() {
    let mut w = ProgramWriter::new("rules.peg");
    w.rule("Expr", 5).rule("Term", 12).rule("Zero", 0);
    w.extend(std::iter::repeat(Instruction::Ret).take(13));
    let bytes = w.finish().unwrap();

    let start = |rule| load(&bytes, rule).unwrap().1.start_point();
    assert_eq!(start(Some("Term")), 12);
    assert_eq!(start(Some("Expr")), 5);
    assert_eq!(start(None), 1);
    assert_eq!(start(Some("Factor")), 1);
    assert_eq!(start(Some("Zero")), 1);

    // a repeated name resolves to its last entry
    w.rule("Expr", 7);
    let bytes = w.finish().unwrap();
    assert_eq!(load(&bytes, Some("Expr")).unwrap().1.start_point(), 7);
}

/// `First <- . "b"` / `Second <- !is(T) "ac"`, where the first alternative defines `T` before
/// it fails.
fn two_alternatives() -> Vec<Instruction> {
    vec![
        Instruction::Choice(10),
        Instruction::NodeOpen,
        tag("First"),
        Instruction::Mark,
        Instruction::Any,
        Instruction::Def("T".into()),
        string("b"),
        Instruction::NodeClose,
        Instruction::Commit(18),
        // 10
        Instruction::Choice(13),
        Instruction::Is("T".into()),
        Instruction::FailTwice,
        // 13
        Instruction::NodeOpen,
        string("ac"),
        tag("Second"),
        Instruction::NodeClose,
        Instruction::Ret,
        // 18
        Instruction::Ret,
    ]
}

#[test]
fn backtracking_forgets_the_failed_alternative() {
    let (program, mut ctx) = load(&build(two_alternatives()), None).unwrap();

    let tree = parse(&program, &mut ctx, "ac").unwrap();
    assert_eq!(tree.tag(), Some("Second"));
    assert_eq!(tree.span(), 0..2);
    assert_eq!(tree.node_count(), 1);
    assert!(tree.find_tag("First").is_none());

    let tree = parse(&program, &mut ctx, "ab").unwrap();
    assert_eq!(tree.tag(), Some("First"));
    assert_eq!(tree.span(), 0..2);

    assert_eq!(ctx.backtrack_depth(), 0);
    assert_eq!(ctx.ast_depth(), 0);
    assert_eq!(ctx.call_depth(), 0);
    assert_eq!(ctx.symbol_depth(), 0);
}

#[test]
fn failure_reports_the_furthest_position() {
    let (program, mut ctx) = load(
        &build(vec![
            Instruction::Choice(5),
            string("ab"),
            string("c"),
            Instruction::Commit(6),
            // 5
            string("x"),
            Instruction::Ret,
        ]),
        None,
    )
    .unwrap();

    assert_eq!(
        parse(&program, &mut ctx, "abd"),
        Err(ParseFailure { pos: 0, furthest: 2 })
    );
    assert_eq!(parse(&program, &mut ctx, "abc").map(|t| t.span()), Ok(0..3));
}

#[test]
fn rerun_gives_the_same_tree() {
    let (program, mut ctx) = load(&build(two_alternatives()), None).unwrap();
    ctx.set_input("ac");

    let first = run(&program, &mut ctx).unwrap().unwrap().clone();
    assert!(!ctx.pool().is_empty());

    reset_for_rerun(&mut ctx);
    assert!(ctx.pool().is_empty());
    assert!(ctx.root().is_none());
    assert_eq!(ctx.pos(), 0);

    let second = run(&program, &mut ctx).unwrap().unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(ctx.take_root(), Some(second));
}

#[test]
fn zero_more_is_an_unrolled_loop() {
    let (fast, mut fast_ctx) = load(
        &build(vec![Instruction::ZeroMoreCharSet(lower()), Instruction::Ret]),
        None,
    )
    .unwrap();
    let (slow, mut slow_ctx) = load(
        &build(vec![
            Instruction::Choice(4),
            Instruction::CharSet(lower()),
            Instruction::PartialCommit(2),
            Instruction::Ret,
        ]),
        None,
    )
    .unwrap();

    for input in ["", "abc", "abc1de", "9", "zzzzzzzzzzzzzzzzz"] {
        let looped = parse(&fast, &mut fast_ctx, input).unwrap();
        let unrolled = parse(&slow, &mut slow_ctx, input).unwrap();
        assert_eq!(looped.span(), unrolled.span(), "{:?}", input);
        assert_eq!(fast_ctx.pos(), slow_ctx.pos());
    }
}

#[test]
fn mapped_choice_dispatches_on_the_next_byte() {
    // each alternative builds a node before it matches anything
    let alternative = |name: &str, lit: &str| {
        vec![
            Instruction::NodeOpen,
            tag(name),
            Instruction::NodeClose,
            string(lit),
            Instruction::Ret,
        ]
    };
    let mut table = MappedTable::new();
    table.insert(b'a', 2);
    table.insert(b'b', 7);
    table.insert(b'c', 2);
    let mut code = vec![Instruction::MappedChoice(table)];
    code.extend(alternative("A", "a"));
    code.extend(alternative("B", "b"));
    let (program, mut ctx) = load(&build(code), None).unwrap();

    for (input, want) in [("a", "A"), ("b", "B")] {
        let before = ctx.pool().len();
        let tree = parse(&program, &mut ctx, input).unwrap();
        assert_eq!(tree.tag(), Some(want));
        assert_eq!(ctx.pos(), 1);
        assert_eq!(ctx.pool().len(), before + 1);
    }

    // 'c' goes to the first alternative, which builds its node and then fails
    let before = ctx.pool().len();
    assert!(parse(&program, &mut ctx, "c").is_err());
    assert_eq!(ctx.pool().len(), before + 1);

    for input in ["d", ""] {
        let before = ctx.pool().len();
        assert_eq!(
            parse(&program, &mut ctx, input),
            Err(ParseFailure { pos: 0, furthest: 0 })
        );
        assert_eq!(ctx.pool().len(), before);
    }
}

/// `List <- ([a-z] #Item)*`, one node per letter.
fn list() -> Vec<Instruction> {
    vec![
        Instruction::NodeOpen,
        Instruction::Choice(7),
        Instruction::NodeOpen,
        Instruction::CharSet(lower()),
        Instruction::NodeClose,
        Instruction::PartialCommit(3),
        // 7
        tag("List"),
        Instruction::NodeClose,
        Instruction::Ret,
    ]
}

#[test]
fn wide_trees_fit_in_a_shallow_stack() {
    let input = "a".repeat(2000);
    let (program, mut ctx) = load(&build(list()), None).unwrap();
    let tree = parse(&program, &mut ctx, &input).unwrap();
    assert_eq!(tree.tag(), Some("List"));
    assert_eq!(tree.child_count(), 2000);
    assert_eq!(tree.children()[1999].span(), 1999..2000);

    let tight = Config {
        max_stack_length: 2,
        ..Config::default()
    };
    let (program, mut ctx) = load_with(list(), tight);
    let tree = parse(&program, &mut ctx, &input).unwrap();
    assert_eq!(tree.child_count(), 2000);
}

#[test]
fn marks_and_tags_in_a_loop_do_not_pile_up() {
    // (ScopeBegin Mark [a-z] Def(W) ScopeEnd #Word)*
    let code = vec![
        Instruction::NodeOpen,
        Instruction::Choice(10),
        Instruction::ScopeBegin,
        Instruction::Mark,
        Instruction::CharSet(lower()),
        Instruction::Def("W".into()),
        Instruction::ScopeEnd,
        tag("Word"),
        Instruction::PartialCommit(3),
        // 10
        Instruction::NodeClose,
        Instruction::Ret,
    ];
    let config = Config {
        max_stack_length: 2,
        max_symbols: 2,
    };
    let (program, mut ctx) = load_with(code, config);
    let input = "z".repeat(1500);
    let tree = parse(&program, &mut ctx, &input).unwrap();
    assert_eq!(tree.tag(), Some("Word"));
    assert_eq!(tree.span(), 0..1500);
    assert!(tree.is_leaf());
}

#[test]
fn deep_nesting_still_overflows() {
    let config = Config {
        max_stack_length: 3,
        ..Config::default()
    };
    let (program, mut ctx) = load_with(
        vec![
            Instruction::NodeOpen,
            Instruction::NodeOpen,
            Instruction::NodeOpen,
            Instruction::NodeOpen,
            Instruction::Ret,
        ],
        config,
    );
    ctx.set_input("");
    assert_eq!(
        run(&program, &mut ctx),
        Err(RunError::StackOverflow {
            stack: StackKind::Ast,
            capacity: 3
        })
    );
}

#[test]
fn siblings_get_an_untagged_root() {
    let (program, mut ctx) = load(
        &build(vec![
            Instruction::NodeOpen,
            Instruction::Any,
            tag("A"),
            Instruction::NodeClose,
            Instruction::NodeOpen,
            Instruction::Any,
            tag("B"),
            Instruction::NodeClose,
            Instruction::Ret,
        ]),
        None,
    )
    .unwrap();

    let tree = parse(&program, &mut ctx, "xyz").unwrap();
    assert_eq!(tree.tag(), None);
    assert_eq!(tree.span(), 0..2);
    let tags: Vec<_> = tree.children().iter().filter_map(AstNode::tag).collect();
    assert_eq!(tags, ["A", "B"]);
}

#[test]
fn open_nodes_are_closed_on_accept() {
    let (program, mut ctx) = load(
        &build(vec![
            Instruction::NodeOpen,
            Instruction::Any,
            tag("Outer"),
            Instruction::NodeOpen,
            Instruction::Any,
            Instruction::Value("inner".into()),
            Instruction::Exit,
        ]),
        None,
    )
    .unwrap();

    let tree = parse(&program, &mut ctx, "ab").unwrap();
    assert_eq!(tree.tag(), Some("Outer"));
    assert_eq!(tree.span(), 0..2);
    assert_eq!(tree.child_count(), 1);
    assert_eq!(tree.children()[0].value(), Some("inner"));
    assert_eq!(tree.children()[0].span(), 1..2);
}

#[test]
fn calls_and_returns() {
    // Pair <- Letter Letter; Letter <- [a-z]
    let (program, mut ctx) = load(
        &build(vec![
            Instruction::NodeOpen,
            Instruction::Call(7),
            Instruction::Call(7),
            tag("Pair"),
            Instruction::NodeClose,
            Instruction::Ret,
            // 7
            Instruction::NodeOpen,
            Instruction::CharSet(lower()),
            tag("Letter"),
            Instruction::NodeClose,
            Instruction::Ret,
        ]),
        None,
    )
    .unwrap();

    let tree = parse(&program, &mut ctx, "ok").unwrap();
    assert_eq!(tree.tag(), Some("Pair"));
    assert_eq!(tree.child_count(), 2);
    assert_eq!(tree.children()[1].span(), 1..2);
    assert_eq!(
        parse(&program, &mut ctx, "o1"),
        Err(ParseFailure { pos: 1, furthest: 1 })
    );
}

#[test]
fn symbol_tables() {
    // Mark [a-z] Def(N) "=" Is(N)
    let (program, mut ctx) = load(
        &build(vec![
            Instruction::Mark,
            Instruction::CharSet(lower()),
            Instruction::Def("N".into()),
            string("="),
            Instruction::Is("N".into()),
            Instruction::Ret,
        ]),
        None,
    )
    .unwrap();
    assert_eq!(parse(&program, &mut ctx, "a=a").map(|t| t.span()), Ok(0..3));
    assert_eq!(
        parse(&program, &mut ctx, "a=b"),
        Err(ParseFailure { pos: 2, furthest: 2 })
    );

    // two bindings, then Isa matches either of them
    let def = || {
        vec![
            Instruction::Mark,
            Instruction::Any,
            Instruction::Def("N".into()),
        ]
    };
    let mut code = def();
    code.extend(def());
    code.extend(vec![Instruction::Isa("N".into()), Instruction::Ret]);
    let (program, mut ctx) = load(&build(code), None).unwrap();
    assert!(parse(&program, &mut ctx, "abb").is_ok());
    assert!(parse(&program, &mut ctx, "aba").is_ok());
    assert!(parse(&program, &mut ctx, "abc").is_err());
}

#[test]
fn scopes_hide_inner_bindings() {
    // ScopeBegin Mark . Def(N) ScopeEnd Is(N)
    let (program, mut ctx) = load(
        &build(vec![
            Instruction::ScopeBegin,
            Instruction::Mark,
            Instruction::Any,
            Instruction::Def("N".into()),
            Instruction::ScopeEnd,
            Instruction::Is("N".into()),
            Instruction::Ret,
        ]),
        None,
    )
    .unwrap();
    assert_eq!(
        parse(&program, &mut ctx, "aa"),
        Err(ParseFailure { pos: 1, furthest: 1 })
    );
}

#[test]
fn stack_overflow_is_fatal() {
    let config = Config {
        max_stack_length: 4,
        ..Config::default()
    };
    let (program, mut ctx) = load_with(vec![Instruction::Call(1)], config);
    ctx.set_input("");
    assert_eq!(
        run(&program, &mut ctx),
        Err(RunError::StackOverflow {
            stack: StackKind::Call,
            capacity: 4
        })
    );

    // same capacity, but the recursion is bounded
    let (program, mut ctx) = load_with(
        vec![
            Instruction::Call(3),
            Instruction::Ret,
            Instruction::Call(4),
            Instruction::Ret,
        ],
        config,
    );
    ctx.set_input("");
    assert!(run(&program, &mut ctx).unwrap().is_ok());
}

#[test]
fn running_off_the_end_is_fatal() {
    let (program, mut ctx) = load(&build(vec![Instruction::Any]), None).unwrap();
    ctx.set_input("a");
    assert_eq!(
        run(&program, &mut ctx),
        Err(RunError::PcOutOfBounds { pc: 2, count: 2 })
    );
}

#[test]
fn unloaded_context_has_nowhere_to_start() {
    let program = pegvm::prepare(vec![Instruction::Exit, Instruction::Ret]);
    let mut ctx = ParsingContext::default();
    assert_eq!(run(&program, &mut ctx), Err(RunError::NoStartPoint));
}

#[test]
fn profile_counts_executed_opcodes() {
    let (program, mut ctx) = load(&build(digit()), None).unwrap();
    let mut profile = OpcodeProfile::new();

    ctx.set_input("7");
    assert!(run_profiled(&program, &mut ctx, &mut profile).unwrap().is_ok());
    assert_eq!(profile.total(), 5);
    assert_eq!(profile.count(Opcode::Ret), 1);
    assert_eq!(profile.pair(Opcode::NodeOpen, Opcode::CharRange), 1);

    ctx.set_input("x");
    assert!(run_profiled(&program, &mut ctx, &mut profile).unwrap().is_err());
    assert_eq!(profile.total(), 7);
    assert_eq!(profile.count(Opcode::NodeOpen), 2);
    assert_eq!(profile.pair(Opcode::Ret, Opcode::NodeOpen), 0);
}

#[test]
fn one_program_many_threads() {
    let (program, template) = load(&build(two_alternatives()), None).unwrap();
    let program = Arc::new(program);

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let program = Arc::clone(&program);
            let mut ctx = template.clone();
            thread::spawn(move || {
                let input = if i % 2 == 0 { "ab" } else { "ac" };
                (0..50)
                    .map(|_| {
                        reset_for_rerun(&mut ctx);
                        parse(&program, &mut ctx, input)
                            .ok()
                            .and_then(|tree| tree.tag().map(str::to_owned))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let want = if i % 2 == 0 { "First" } else { "Second" };
        let tags = handle.join().unwrap();
        assert_eq!(tags.len(), 50);
        assert!(tags.iter().all(|tag| tag.as_deref() == Some(want)));
    }
}
