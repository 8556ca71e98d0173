mod script;

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use iltrace_emit::{BufferedFileLog, MemorySink, TraceConfig};
use iltrace_isa::{ClauseKind, MethodBody, opcodes};

use script::{Runner, Script, ScriptError};

#[derive(Parser)]
#[command(name = "iltrace", about = "Traced CIL emission driven by YAML scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble an emission script and print its disassembly trace
    Run {
        /// Path to the .yaml script
        script: PathBuf,
        /// Do not trace, only print the summary
        #[arg(short, long)]
        quiet: bool,
        /// Append the trace to this file instead of stdout
        #[arg(short, long)]
        log_file: Option<PathBuf>,
    },
    /// List the opcode table
    Opcodes,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            quiet,
            log_file,
        } => cmd_run(&script, quiet, log_file.as_deref()),
        Commands::Opcodes => cmd_opcodes(),
    }
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("Error: {e}");
    std::process::exit(1);
}

fn cmd_run(path: &Path, quiet: bool, log_file: Option<&Path>) {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => fail(format!("cannot read {}: {e}", path.display())),
    };
    let script = Script::parse(&text).unwrap_or_else(|e| fail(e));
    log::info!(
        "running {} ({} steps)",
        script.name.as_deref().unwrap_or("<unnamed>"),
        script.steps.len()
    );

    let result = match (log_file, quiet) {
        (Some(file), _) => {
            // Dropping the log flushes whatever was traced, failed or not.
            let (result, _log) =
                Runner::new(TraceConfig::new(!quiet, BufferedFileLog::new(file))).run(&script);
            result
        }
        (None, true) => Runner::new(TraceConfig::disabled()).run(&script).0,
        (None, false) => {
            let (result, sink) = Runner::new(TraceConfig::enabled(MemorySink::new())).run(&script);
            print!("{}", sink.text());
            println!();
            result
        }
    };

    let body = result.unwrap_or_else(|e: ScriptError| fail(e));
    print_summary(script.name.as_deref(), &body);
}

fn print_summary(name: Option<&str>, body: &MethodBody) {
    if let Some(name) = name {
        println!("=== {name} ===");
    }
    println!("Code size:        {} bytes", body.code.len());
    println!("Locals:           {}", body.locals.len());
    for local in &body.locals {
        let pinned = if local.is_pinned() { " (pinned)" } else { "" };
        println!("  [{}] {}{pinned}", local.index(), local.local_type());
    }
    println!("Exception clauses: {}", body.clauses.len());
    for clause in &body.clauses {
        let kind = match &clause.kind {
            ClauseKind::Catch(ty) => format!("catch {ty}"),
            ClauseKind::Filter { filter_offset } => format!("filter @{filter_offset:#06x}"),
            ClauseKind::Fault => "fault".to_owned(),
            ClauseKind::Finally => "finally".to_owned(),
        };
        println!(
            "  try {:#06x}+{} handler {:#06x}+{} {kind}",
            clause.try_offset, clause.try_length, clause.handler_offset, clause.handler_length
        );
    }
    println!("Tokens:           {}", body.tokens.len());
    for token in &body.tokens {
        println!("  {:#010x} {}", token.value, token.text);
    }
    println!();
    for (row, chunk) in body.code.chunks(16).enumerate() {
        let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        println!("{:04x}: {}", row * 16, bytes.join(" "));
    }
}

fn cmd_opcodes() {
    for op in opcodes::ALL {
        let kind = op.operand_kind();
        let operand = match kind.size() {
            Some(n) => n.to_string(),
            None => "var".to_owned(),
        };
        let branch = if kind.is_branch() { "  branch" } else { "" };
        println!(
            "{:#06x}  {:<16} {:<20} {operand:>3}{branch}",
            op.value(),
            op.name(),
            format!("{kind:?}"),
        );
    }
}
