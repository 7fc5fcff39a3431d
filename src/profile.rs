//! Opcode execution counts, for finding out what a grammar spends its time on.

use std::{fmt, io};

use itertools::Itertools;

use crate::instruction::{Opcode, OPCODE_COUNT};

/// How often each opcode ran, and how often each opcode ran right after each other one.
///
/// Pass one to [`run_profiled`](crate::run_profiled). Counts accumulate across runs; pairs never
/// straddle two runs.
#[derive(Debug, Clone, Default)]
pub struct OpcodeProfile {
    counts: [u64; OPCODE_COUNT],
    /// `pairs[prev][next]`
    pairs: Box<[[u64; OPCODE_COUNT]; OPCODE_COUNT]>,
    last: Option<Opcode>,
}

impl OpcodeProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, op: Opcode) {
        self.counts[op as usize] += 1;
        if let Some(prev) = self.last {
            self.pairs[prev as usize][op as usize] += 1;
        }
        self.last = Some(op);
    }

    /// Forget the previous opcode, so the next run's first one isn't paired with it.
    pub fn end_run(&mut self) {
        self.last = None;
    }

    pub fn count(&self, op: Opcode) -> u64 {
        self.counts[op as usize]
    }

    /// Times `next` ran immediately after `prev`.
    pub fn pair(&self, prev: Opcode, next: Opcode) -> u64 {
        self.pairs[prev as usize][next as usize]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Opcodes that ran at least once, most frequent first.
    pub fn hottest(&self) -> Vec<(Opcode, u64)> {
        Opcode::all()
            .map(|op| (op, self.count(op)))
            .filter(|&(_, n)| n > 0)
            .sorted_by(|a, b| b.1.cmp(&a.1).then((a.0 as u8).cmp(&(b.0 as u8))))
            .collect()
    }

    /// The pair matrix as CSV: a header row of opcode names, then one row per previous opcode.
    pub fn write_pairs_csv<W: io::Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, ",{}", Opcode::all().map(|op| format!("{:?}", op)).join(","))?;
        for prev in Opcode::all() {
            writeln!(
                out,
                "{:?},{}",
                prev,
                self.pairs[prev as usize].iter().join(",")
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for OpcodeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total();
        writeln!(f, "{} instructions executed", total)?;
        for (op, n) in self.hottest() {
            let pct = n as f64 * 100.0 / total as f64;
            writeln!(f, "{:>16}: {} ({:.2}%)", format!("{:?}", op), n, pct)?;
        }
        Ok(())
    }
}

#[test]
fn counts_and_pairs() {
    let mut profile = OpcodeProfile::new();
    for op in [Opcode::Choice, Opcode::Any, Opcode::Any, Opcode::Commit] {
        profile.record(op);
    }
    profile.end_run();
    profile.record(Opcode::Choice);

    assert_eq!(profile.total(), 5);
    assert_eq!(profile.count(Opcode::Any), 2);
    assert_eq!(profile.pair(Opcode::Any, Opcode::Any), 1);
    assert_eq!(profile.pair(Opcode::Any, Opcode::Commit), 1);
    // the second run's Choice isn't paired with the first run's Commit
    assert_eq!(profile.pair(Opcode::Commit, Opcode::Choice), 0);
    assert_eq!(
        profile.hottest(),
        vec![
            (Opcode::Choice, 2),
            (Opcode::Any, 2),
            (Opcode::Commit, 1)
        ]
    );

    let shown = profile.to_string();
    assert!(shown.starts_with("5 instructions executed\n"));
    assert!(shown.contains("Any: 2 (40.00%)"));

    let mut csv = Vec::new();
    profile.write_pairs_csv(&mut csv).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().count(), OPCODE_COUNT + 1);
    assert!(csv.starts_with(",Exit,Jump,"));
}
