use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::Context;
use ariadne::{CharSet, Label, Report, ReportKind};
use pegvm::{Config, Loader, LoaderOptions, OpcodeProfile, ParseFailure};
use tracing::Level;

const HELP: &str = "\
pegvm: run compiled PEG bytecode over an input file

USAGE:
  pegvm -p <BYTECODE> [OPTIONS] <INPUT>

OPTIONS:
  -p, --program <PATH>     compiled grammar to load
  -s, --start <RULE>       rule to start from (default: instruction 1)
  --match                  only say whether the input matched
  --profile                print opcode counts after the run
  --profile-csv <PATH>     write the opcode pair matrix as CSV
  --strict-version         refuse bytecode with an unknown version
  --stack <N>              backtrack/AST/call stack capacity
  --symbols <N>            symbol table capacity
  -v                       log loading and matching
  --trace                  log every instruction executed
  -h, --help               print this
";

struct Args {
    program: PathBuf,
    start: Option<String>,
    only_match: bool,
    profile: bool,
    profile_csv: Option<PathBuf>,
    strict_version: bool,
    stack: Option<usize>,
    symbols: Option<usize>,
    level: Level,
    input: PathBuf,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{}", HELP);
        return Ok(None);
    }

    let level = if args.contains("--trace") {
        Level::TRACE
    } else if args.contains("-v") {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let out = Args {
        program: args.value_from_str(["-p", "--program"])?,
        start: args.opt_value_from_str(["-s", "--start"])?,
        only_match: args.contains("--match"),
        profile: args.contains("--profile"),
        profile_csv: args.opt_value_from_str("--profile-csv")?,
        strict_version: args.contains("--strict-version"),
        stack: args.opt_value_from_str("--stack")?,
        symbols: args.opt_value_from_str("--symbols")?,
        level,
        input: args.free_from_str()?,
    };

    let rest = args.finish();
    if !rest.is_empty() {
        anyhow::bail!("unexpected arguments: {:?}", rest);
    }
    Ok(Some(out))
}

fn main() -> anyhow::Result<ExitCode> {
    let args = match parse_args()? {
        Some(args) => args,
        None => return Ok(ExitCode::SUCCESS),
    };

    tracing_subscriber::fmt()
        .with_max_level(args.level)
        .with_writer(std::io::stderr)
        .init();

    let bytes = fs::read(&args.program)
        .with_context(|| format!("couldn't read {}", args.program.display()))?;
    let input = fs::read(&args.input)
        .with_context(|| format!("couldn't read {}", args.input.display()))?;

    let defaults = Config::default();
    let loader = Loader::new(LoaderOptions {
        strict_version: args.strict_version,
        config: Config {
            max_stack_length: args.stack.unwrap_or(defaults.max_stack_length),
            max_symbols: args.symbols.unwrap_or(defaults.max_symbols),
        },
    });
    let (program, mut ctx) = loader
        .load(&bytes, args.start.as_deref())
        .with_context(|| format!("couldn't load {}", args.program.display()))?;
    ctx.set_input(input.clone());

    let mut profile = OpcodeProfile::new();
    let outcome = if args.profile || args.profile_csv.is_some() {
        pegvm::run_profiled(&program, &mut ctx, &mut profile)
    } else {
        pegvm::run(&program, &mut ctx)
    }
    .context("the machine stopped")?;

    let code = match outcome {
        Ok(tree) => {
            if args.only_match {
                println!("match: {} of {} bytes", tree.end(), input.len());
            } else {
                print!("{}", tree.display(Some(&input[..])));
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            let name = args.input.to_string_lossy().into_owned();
            report_failure(&name, &input, failure)?;
            ExitCode::FAILURE
        }
    };

    if args.profile {
        eprint!("{}", profile);
    }
    if let Some(path) = &args.profile_csv {
        let file =
            fs::File::create(path).with_context(|| format!("couldn't create {}", path.display()))?;
        profile.write_pairs_csv(std::io::BufWriter::new(file))?;
    }

    Ok(code)
}

/// Point at where the parse gave up, and how far it got before that.
fn report_failure(name: &str, input: &[u8], failure: ParseFailure) -> anyhow::Result<()> {
    let source = String::from_utf8_lossy(input).into_owned();
    let len = source.chars().count();
    // ariadne counts chars, not bytes
    let to_char = |byte: usize| {
        String::from_utf8_lossy(&input[..byte.min(input.len())])
            .chars()
            .count()
    };
    let span = |at: usize| (name.to_owned(), at.min(len)..(at + 1).min(len));
    let pos = to_char(failure.pos);
    let furthest = to_char(failure.furthest);

    let mut report = Report::build(ReportKind::Error, name.to_owned(), pos)
        .with_config(ariadne::Config::default().with_char_set(CharSet::Ascii))
        .with_message(failure.to_string())
        .with_label(Label::new(span(pos)).with_message("no alternative matched here"));
    if furthest > pos {
        report = report.with_label(
            Label::new(span(furthest)).with_message("but some alternative got this far"),
        );
    }
    report
        .finish()
        .eprint(ariadne::sources(std::iter::once((name.to_owned(), source))))?;
    Ok(())
}
