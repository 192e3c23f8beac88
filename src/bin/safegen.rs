use std::{fs::File, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use safegen::*;
use typed_arena::Arena;

#[derive(Subcommand, Debug)]
enum Command {
    /// `int *p = 0; *p;`
    NullDeref,
    /// `f() + g()` with calls writing disjoint globals
    UnorderedCalls {
        /// Make both calls write the same global
        #[arg(long)]
        same_global: bool,
    },
    /// Loop whose pointer facts need several visits to stabilize
    Loop,
    /// Reads of union fields after writes of other fields
    Union,
}

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    log: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,

    /// Percentage of possibly null dereferences to allow
    #[arg(long, default_value_t = 0)]
    null_deref_prob: u32,
    /// Percentage of possibly dangling dereferences to allow
    #[arg(long, default_value_t = 0)]
    dead_deref_prob: u32,
    #[arg(long)]
    strict_volatile: bool,
    /// Allow reading a union field other than the last written one when its
    /// bits are known to be valid
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    union_type_sensitive: bool,

    #[command(subcommand)]
    command: Command,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(log) = args.log {
        let log_file = match File::create(&log) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("cannot create {}: {}", log.display(), e);
                return ExitCode::FAILURE;
            }
        };
        let level = if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(log_file)
            .init();
    }

    let opts = options::Options {
        null_pointer_dereference_prob: args.null_deref_prob.min(100),
        dead_pointer_dereference_prob: args.dead_deref_prob.min(100),
        strict_volatile_rule: args.strict_volatile,
        union_read_type_sensitive: args.union_type_sensitive,
        ..options::Options::default()
    };
    let prog = match args.command {
        Command::NullDeref => scenarios::null_deref(),
        Command::UnorderedCalls { same_global } => scenarios::unordered_calls(same_global),
        Command::Loop => scenarios::loop_program(),
        Command::Union => scenarios::union_program(),
    };

    let arena = Arena::new();
    let mut analyzer = analysis::Analyzer::new(&prog, &arena, &opts);
    match analyzer.analyze_program() {
        Ok(report) => {
            print!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
