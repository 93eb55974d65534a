//! GLAD CLI
//!
//! Reads a lattice file, resolves its includes, writes the syntax tree as
//! JSON and prints the evaluated definitions.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use colored::Colorize;
use glad_core::diagnostics::{DiagnosticSeverity, Diagnostics, DiagnosticsOutput};
use glad_core::error::GladError;
use glad_core::resolver::{self, ResolveOptions, Resolver};
use glad_core::{Evaluator, Program};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "glad")]
#[command(author, version, about = "Parse and evaluate GLAD accelerator lattices", long_about = None)]
struct Cli {
    /// Path to the lattice file
    file: PathBuf,

    /// Where to write the JSON syntax tree
    #[arg(long, default_value = "ast.debug")]
    dump: PathBuf,

    /// Diagnostics format
    #[arg(short, long, value_enum, default_value_t = Format::Human)]
    format: Format,

    /// Stop after include resolution and print the resolved program
    #[arg(long)]
    parse_only: bool,

    /// Include expansions allowed before giving up
    #[arg(long, default_value_t = resolver::DEFAULT_MAX_EXPANSIONS)]
    max_includes: usize,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Human,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    ExitCode::from(run(&cli))
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "error" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Process one lattice file. Returns 0 on success, 1 when the program has
/// errors and 2 when a file cannot be read or written.
fn run(cli: &Cli) -> u8 {
    let file = cli.file.display().to_string();
    let source = match resolver::read_source(&cli.file) {
        Ok(source) => source,
        Err(err) => return fatal(err, 2),
    };

    let resolver = Resolver::new(ResolveOptions {
        max_expansions: cli.max_includes,
    });
    let (program, mut diagnostics) = resolver.resolve_source(&source, &file);
    let Some(program) = program.filter(|_| !diagnostics.has_errors()) else {
        report(&diagnostics, cli.format, &file);
        return 1;
    };

    if let Err(err) = write_dump(&program, &cli.dump) {
        report(&diagnostics, cli.format, &file);
        return fatal(err, 2);
    }
    debug!(path = %cli.dump.display(), "syntax tree written");

    if cli.parse_only {
        print!("{}", program);
        report(&diagnostics, cli.format, &file);
        return 0;
    }

    let mut evaluator = Evaluator::new();
    let outcome = evaluator.run(&program);
    diagnostics.extend(evaluator.take_diagnostics());

    for definition in evaluator.definitions() {
        println!("{}", definition);
    }
    report(&diagnostics, cli.format, &file);

    match outcome {
        Ok(()) => 0,
        Err(err) => fatal(GladError::from(err), 1),
    }
}

fn write_dump(program: &Program, path: &Path) -> Result<(), GladError> {
    let json = serde_json::to_string_pretty(program)?;
    fs::write(path, json).map_err(|source| GladError::Write {
        path: path.display().to_string(),
        source,
    })
}

fn fatal(err: GladError, code: u8) -> u8 {
    eprintln!("{:?}", miette::Report::new(err));
    code
}

/// Diagnostics go to stderr so stdout carries only the program.
fn report(diagnostics: &Diagnostics, format: Format, file: &str) {
    match format {
        Format::Json => {
            let output = DiagnosticsOutput::from_diagnostics(diagnostics);
            match serde_json::to_string_pretty(&output) {
                Ok(json) => eprintln!("{}", json),
                Err(err) => eprintln!("{} {}", "error:".red().bold(), err),
            }
        }
        Format::Human => report_human(diagnostics, file),
    }
}

fn report_human(diagnostics: &Diagnostics, file: &str) {
    for diag in diagnostics.iter() {
        let severity_str = match diag.severity {
            DiagnosticSeverity::Error => "error".red().bold(),
            DiagnosticSeverity::Warning => "warning".yellow().bold(),
        };

        eprintln!(
            "{}{} {} {}",
            severity_str,
            format!("[{}]", diag.code).dimmed(),
            ":".bold(),
            diag.message
        );

        if !diag.file.is_empty() {
            eprintln!(
                "  {} {}:{}:{}",
                "-->".blue().bold(),
                diag.file,
                diag.span.start.line,
                diag.span.start.column
            );
        }

        if let Some(ref context) = diag.context {
            eprintln!("   {}", "|".blue().bold());
            eprintln!(
                "{:>3} {} {}",
                diag.span.start.line.to_string().blue().bold(),
                "|".blue().bold(),
                context
            );
            eprintln!("   {}", "|".blue().bold());
        }

        if let Some(ref help) = diag.help {
            eprintln!("   {} {}: {}", "=".blue().bold(), "help".bold(), help);
        }

        eprintln!();
    }

    let error_count = diagnostics.errors().count();
    let warning_count = diagnostics.warnings().count();
    if error_count > 0 {
        eprintln!(
            "{}: could not process `{}` due to {} previous error{}{}",
            "error".red().bold(),
            file,
            error_count,
            plural(error_count),
            if warning_count > 0 {
                format!("; {} warning{} emitted", warning_count, plural(warning_count))
            } else {
                String::new()
            }
        );
    } else if warning_count > 0 {
        eprintln!(
            "{} `{}` with {} warning{}",
            "Finished".green().bold(),
            file,
            warning_count,
            plural(warning_count)
        );
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_for(file: &Path, dump: &Path) -> Cli {
        Cli {
            file: file.to_path_buf(),
            dump: dump.to_path_buf(),
            format: Format::Json,
            parse_only: false,
            max_includes: resolver::DEFAULT_MAX_EXPANSIONS,
            verbose: false,
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["glad", "ring.lat"]).unwrap();
        assert_eq!(cli.file, PathBuf::from("ring.lat"));
        assert_eq!(cli.dump, PathBuf::from("ast.debug"));
        assert!(cli.format == Format::Human);
        assert_eq!(cli.max_includes, 5);
        assert!(!cli.parse_only);
    }

    #[test]
    fn test_cli_requires_file() {
        assert!(Cli::try_parse_from(["glad"]).is_err());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "glad",
            "ring.lat",
            "--dump",
            "out.json",
            "--format",
            "json",
            "--parse-only",
            "-v",
        ])
        .unwrap();
        assert_eq!(cli.dump, PathBuf::from("out.json"));
        assert!(cli.format == Format::Json);
        assert!(cli.parse_only && cli.verbose);
    }

    #[test]
    fn test_run_good_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ring.lat");
        let dump = dir.path().join("ast.json");
        fs::write(&file, "k = 0.5;\nQ1: QUADRUPOLE, L = 0.2, K1 = k;\nRING: line = 2*Q1;\n").unwrap();

        assert_eq!(run(&cli_for(&file, &dump)), 0);
        let json = fs::read_to_string(&dump).unwrap();
        assert!(json.contains("statements"));
    }

    #[test]
    fn test_run_parse_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ring.lat");
        let dump = dir.path().join("ast.json");
        fs::write(&file, "x = 1;\n").unwrap();

        let mut cli = cli_for(&file, &dump);
        cli.parse_only = true;
        assert_eq!(run(&cli), 0);
        assert!(dump.exists());
    }

    #[test]
    fn test_run_syntax_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.lat");
        let dump = dir.path().join("ast.json");
        fs::write(&file, "x = ;\n").unwrap();

        assert_eq!(run(&cli_for(&file, &dump)), 1);
        assert!(!dump.exists());
    }

    #[test]
    fn test_run_missing_include() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.lat");
        let dump = dir.path().join("ast.json");
        fs::write(&file, "include \"absent.lat\";\n").unwrap();

        assert_eq!(run(&cli_for(&file, &dump)), 1);
    }

    #[test]
    fn test_run_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nowhere.lat");
        let dump = dir.path().join("ast.json");

        assert_eq!(run(&cli_for(&file, &dump)), 2);
        assert!(!dump.exists());
    }

    #[test]
    fn test_run_unwritable_dump() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ring.lat");
        let dump = dir.path().join("no/such/dir/ast.json");
        fs::write(&file, "x = 1;\n").unwrap();

        assert_eq!(run(&cli_for(&file, &dump)), 2);
    }
}
