use pegvm::{
    load, read_header, ByteReader, Instruction, LoadError, Loader, LoaderOptions, MappedTable,
    Opcode, ProgramWriter,
};

fn tiny() -> ProgramWriter {
    let mut w = ProgramWriter::new("tiny.peg");
    w.push(Instruction::Any);
    w.push(Instruction::Ret);
    w
}

#[test]
fn header_comes_back_as_written() {
    let mut w = tiny().pool_size_hint(3);
    w.rule("A", 1).rule("B", 2);
    let bytes = w.finish().unwrap();

    let header = read_header(&mut ByteReader::new(&bytes)).unwrap();
    assert_eq!(header.version, pegvm::VERSION);
    assert_eq!(header.filename, "tiny.peg");
    assert_eq!(header.pool_size_hint, 3);
    assert_eq!(header.instruction_count, 3);
    let names: Vec<_> = header.rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["A", "B"]);
    assert_eq!(header.start_point(Some("B")), 2);
}

#[test]
fn truncated_bytecode() {
    let bytes = tiny().finish().unwrap();
    for cut in [0, 1, 5, bytes.len() - 1] {
        assert!(
            matches!(
                load(&bytes[..cut], None),
                Err(LoadError::Truncated { offset, .. }) if offset == cut
            ),
            "cut at {}",
            cut
        );
    }
    assert!(load(&bytes, None).is_ok());
}

#[test]
fn trailing_bytes_are_ignored() {
    let mut bytes = tiny().finish().unwrap();
    bytes.extend_from_slice(b"junk");
    let (program, _) = load(&bytes, None).unwrap();
    assert_eq!(program.len(), 3);
}

#[test]
fn unknown_opcode() {
    let mut bytes = tiny().finish().unwrap();
    let last = bytes.len() - 1;
    bytes[last] = 0xFF;
    assert!(matches!(
        load(&bytes, None),
        Err(LoadError::UnknownOpcode { byte: 0xFF, offset }) if offset == last
    ));
}

#[test]
fn jump_targets_are_checked() {
    let mut w = tiny();
    w.push(Instruction::Jump(50));
    assert!(matches!(
        load(&w.finish().unwrap(), None),
        Err(LoadError::TargetOutOfRange {
            index: 3,
            opcode: Opcode::Jump,
            target: 50,
            count: 4,
        })
    ));

    let mut table = MappedTable::new();
    table.insert(b'x', 1);
    table.insert(b'y', 9);
    let mut w = tiny();
    w.push(Instruction::MappedChoice(table));
    assert!(matches!(
        load(&w.finish().unwrap(), None),
        Err(LoadError::TargetOutOfRange {
            opcode: Opcode::MappedChoice,
            target: 9,
            ..
        })
    ));
}

#[test]
fn start_rule_must_be_in_range() {
    let mut w = tiny();
    w.rule("Far", 9);
    let bytes = w.finish().unwrap();
    assert!(matches!(
        load(&bytes, Some("Far")),
        Err(LoadError::StartOutOfRange { start: 9, count: 3 })
    ));
    // only the rule that was asked for matters
    assert!(load(&bytes, None).is_ok());
}

#[test]
fn version_mismatch() {
    let bytes = tiny().version(0, 2).finish().unwrap();
    assert!(load(&bytes, None).is_ok());

    let strict = Loader::new(LoaderOptions {
        strict_version: true,
        ..LoaderOptions::default()
    });
    assert!(matches!(
        strict.load(&bytes, None),
        Err(LoadError::UnsupportedVersion { major: 0, minor: 2 })
    ));
    assert!(strict.load(&tiny().finish().unwrap(), None).is_ok());
}

#[test]
fn labels_must_be_utf8() {
    #[rustfmt::skip]
    let bytes: &[u8] = &[
        0, 1,
        0, 0, 0, 0,
        0, 0, 0, 0,
        0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 2,
        0x00,
        0x16, 0, 0, 0, 1, 0xFF,
    ];
    assert!(matches!(
        load(bytes, None),
        Err(LoadError::InvalidUtf8 { what: "tag", offset: 24 })
    ));
}

#[test]
fn load_into_keeps_the_input() {
    let bytes = tiny().finish().unwrap();
    let (_, mut ctx) = load(&bytes, None).unwrap();
    ctx.set_input("z");

    let program = Loader::default().load_into(&mut ctx, &bytes, None).unwrap();
    assert_eq!(ctx.input(), b"z");
    assert!(pegvm::run(&program, &mut ctx).unwrap().is_ok());
    assert_eq!(ctx.pos(), 1);

    // a failed load leaves the context alone
    assert!(Loader::default().load_into(&mut ctx, &bytes[..4], None).is_err());
    assert_eq!(ctx.start_point(), 1);
}
