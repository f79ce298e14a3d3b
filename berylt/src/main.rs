//! Beryl CLI - run scripts, compile binary images, or talk to a REPL.

mod error;
mod repl;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bvm::State;
use error::{BeryltError, Result};

/// Beryl - an embeddable scripting language
#[derive(Parser, Debug)]
#[command(name = "berylt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run, compile and explore Beryl programs", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, env = "BERYLT_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a source file
    Run(RunCommand),

    /// Compile a source file to a binary image
    Compile(CompileCommand),

    /// Execute a compiled binary image
    Exec(ExecCommand),

    /// Start an interactive session (the default)
    Repl,
}

#[derive(Parser, Debug)]
struct RunCommand {
    /// Source file to execute
    file: PathBuf,

    /// Disassemble instead of executing
    #[arg(long)]
    dump: bool,
}

#[derive(Parser, Debug)]
struct CompileCommand {
    /// Source file to compile
    file: PathBuf,

    /// Output image path (default: source path with .brb)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Strip line tables and filenames
    #[arg(long)]
    strip: bool,
}

#[derive(Parser, Debug)]
struct ExecCommand {
    /// Binary image to execute
    file: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("berylt: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose)?;
    match cli.command {
        Some(Commands::Run(args)) => run_file(args),
        Some(Commands::Compile(args)) => compile_file(args),
        Some(Commands::Exec(args)) => exec_image(args),
        Some(Commands::Repl) | None => repl::run_repl(),
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let subscriber = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .map_err(|e| BeryltError::Setup(format!("failed to initialize logging: {e}")))?;
    Ok(())
}

fn read_source(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| BeryltError::Io(format!("cannot read {}: {e}", path.display())))
}

fn file_label(path: &PathBuf) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn run_file(args: RunCommand) -> Result<()> {
    let source = read_source(&args.file)?;
    let name = file_label(&args.file);
    let mut state = State::new();
    if args.dump {
        let irep = state.compile(&source, &name)?;
        print!("{}", berylc_bc::disasm::fmt_irep(&irep, &state.symbols));
        return Ok(());
    }
    state.load_string(&source, &name)?;
    Ok(())
}

fn compile_file(args: CompileCommand) -> Result<()> {
    let source = read_source(&args.file)?;
    let name = file_label(&args.file);
    let mut state = State::new();
    let image = state.compile_to_image(&source, &name, !args.strip)?;
    let output = args
        .output
        .unwrap_or_else(|| args.file.with_extension("brb"));
    std::fs::write(&output, &image)
        .map_err(|e| BeryltError::Io(format!("cannot write {}: {e}", output.display())))?;
    tracing::info!("wrote {} ({} bytes)", output.display(), image.len());
    Ok(())
}

fn exec_image(args: ExecCommand) -> Result<()> {
    let bytes = std::fs::read(&args.file)
        .map_err(|e| BeryltError::Io(format!("cannot read {}: {e}", args.file.display())))?;
    let mut state = State::new();
    state.load_image(&bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["berylt", "run", "script.brl"]);
        assert!(matches!(cli.command, Some(Commands::Run(_))));
    }

    #[test]
    fn test_cli_parse_run_dump() {
        let cli = Cli::parse_from(["berylt", "run", "script.brl", "--dump"]);
        if let Some(Commands::Run(args)) = cli.command {
            assert!(args.dump);
        } else {
            panic!("expected run command");
        }
    }

    #[test]
    fn test_cli_parse_compile_output() {
        let cli = Cli::parse_from(["berylt", "compile", "a.brl", "-o", "out.brb"]);
        if let Some(Commands::Compile(args)) = cli.command {
            assert_eq!(args.output, Some(PathBuf::from("out.brb")));
            assert!(!args.strip);
        } else {
            panic!("expected compile command");
        }
    }

    #[test]
    fn test_cli_defaults_to_repl() {
        let cli = Cli::parse_from(["berylt"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::parse_from(["berylt", "--verbose", "repl"]);
        assert!(cli.verbose);
    }
}
