//! Binding each loaded instruction to the engine routine that runs it.
//!
//! After [`prepare`], every instruction carries its own handler, so the engine's loop never has
//! to switch on an opcode: it just calls whatever the current instruction points at.

use tracing::debug;

use crate::{
    engine::{dispatch_table, Handler},
    instruction::{Instruction, Opcode},
};

/// An instruction together with the handler that executes it.
#[derive(Clone)]
pub struct Prepared {
    pub(crate) handler: Handler,
    pub(crate) inst: Instruction,
}

impl Prepared {
    pub fn handler(&self) -> Handler {
        self.handler
    }

    pub fn instruction(&self) -> &Instruction {
        &self.inst
    }

    pub fn opcode(&self) -> Opcode {
        self.inst.opcode()
    }
}

impl std::fmt::Debug for Prepared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prepared")
            .field("handler", &(self.handler as usize as *const ()))
            .field("inst", &self.inst)
            .finish()
    }
}

/// A loaded, prepared instruction array.
///
/// Immutable once built; one program can be shared by any number of contexts, on any number of
/// threads.
#[derive(Debug, Clone)]
pub struct Program {
    code: Vec<Prepared>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    #[inline]
    pub fn get(&self, pc: usize) -> Option<&Prepared> {
        self.code.get(pc)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prepared> {
        self.code.iter()
    }

    /// Does every instruction point at the table entry for its own opcode?
    pub fn handler_matches_table(&self) -> bool {
        let table = dispatch_table();
        self.code
            .iter()
            .all(|p| p.handler as usize == table[p.opcode() as usize].1 as usize)
    }
}

/// Bind every instruction to its handler. Call once per loaded array.
pub fn prepare(code: Vec<Instruction>) -> Program {
    let table = dispatch_table();
    let code: Vec<Prepared> = code
        .into_iter()
        .map(|inst| Prepared {
            handler: table[inst.opcode() as usize].1,
            inst,
        })
        .collect();
    debug!("prepared {} instructions", code.len());
    Program { code }
}

#[test]
fn prepared_handlers_follow_opcodes() {
    let program = prepare(vec![
        Instruction::Exit,
        Instruction::Any,
        Instruction::Choice(0),
        Instruction::Tag("x".into()),
        Instruction::Ret,
    ]);
    assert_eq!(program.len(), 5);
    assert!(program.handler_matches_table());

    let table = dispatch_table();
    for p in program.iter() {
        assert_eq!(table[p.opcode() as usize].0, p.opcode());
    }
    // two different opcodes never share a handler
    assert_ne!(
        program.get(0).unwrap().handler() as usize,
        program.get(1).unwrap().handler() as usize
    );
}
