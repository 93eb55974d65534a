//! Include resolution.
//!
//! Parses an entry file, then repeatedly replaces the first top-level
//! `include "file";` with the statements of that file until none remain.
//! Includes inside `{ ... }` blocks are left for the evaluator to report.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ast::{IncludeStatement, Program, Statement};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{GladError, Result};
use crate::parser::Parser;

pub const DEFAULT_MAX_EXPANSIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// How many include directives may be expanded in one resolve.
    pub max_expansions: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }
}

/// Read a whole source file.
pub fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| GladError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Resolve `entry` with default options.
pub fn resolve(entry: impl AsRef<Path>) -> (Option<Program>, Diagnostics) {
    Resolver::default().resolve(entry.as_ref())
}

/// Resolve in-memory entry text with default options. Relative includes are
/// looked up next to `file`.
pub fn resolve_source(source: &str, file: &str) -> (Option<Program>, Diagnostics) {
    Resolver::default().resolve_source(source, file)
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    options: ResolveOptions,
}

impl Resolver {
    pub fn new(options: ResolveOptions) -> Self {
        Self { options }
    }

    pub fn resolve(&self, entry: &Path) -> (Option<Program>, Diagnostics) {
        let file = entry.display().to_string();
        match read_source(entry) {
            Ok(source) => self.resolve_source(&source, &file),
            Err(err) => {
                let mut diagnostics = Diagnostics::new();
                diagnostics.push(
                    Diagnostic::error("E100", format!("{}: {}", err, io_reason(&err)))
                        .with_file(file)
                        .build(),
                );
                (None, diagnostics)
            }
        }
    }

    pub fn resolve_source(&self, source: &str, file: &str) -> (Option<Program>, Diagnostics) {
        let (program, mut diagnostics) = Parser::new(source, file).parse();
        let Some(mut program) = program else {
            return (None, diagnostics);
        };

        let mut expansions = 0;
        while let Some((index, include)) = first_include(&program.statements) {
            if expansions == self.options.max_expansions {
                diagnostics.push(
                    Diagnostic::error(
                        "E103",
                        format!(
                            "include \"{}\" not expanded: limit of {} expansions reached",
                            include.filename.value, self.options.max_expansions
                        ),
                    )
                    .with_file(include.origin.clone())
                    .with_span(include.span)
                    .with_help("check for files that include each other")
                    .build(),
                );
                return (None, diagnostics);
            }
            expansions += 1;

            let path = include_path(&include);
            let text = match read_source(&path) {
                Ok(text) => text,
                Err(err) => {
                    diagnostics.push(
                        Diagnostic::error("E101", format!("{}: {}", err, io_reason(&err)))
                            .with_file(include.origin.clone())
                            .with_span(include.span)
                            .build(),
                    );
                    return (None, diagnostics);
                }
            };

            // One position table for the whole resolve keeps ids unique.
            let positions = std::mem::take(&mut program.positions);
            let included_file = path.display().to_string();
            let (included, parse_diagnostics) =
                Parser::with_positions(&text, included_file.as_str(), positions).parse();
            diagnostics.extend(parse_diagnostics);

            let Some(included) = included else {
                diagnostics.push(
                    Diagnostic::error(
                        "E102",
                        format!("included file '{}' has syntax errors", included_file),
                    )
                    .with_file(include.origin.clone())
                    .with_span(include.span)
                    .build(),
                );
                return (None, diagnostics);
            };

            debug!(
                file = %included_file,
                statements = included.statements.len(),
                expansion = expansions,
                "include expanded"
            );
            program.positions = included.positions;
            program
                .statements
                .splice(index..=index, included.statements);
        }

        (Some(program), diagnostics)
    }
}

fn first_include(statements: &[Statement]) -> Option<(usize, IncludeStatement)> {
    statements
        .iter()
        .enumerate()
        .find_map(|(index, statement)| match statement {
            Statement::Include(include) => Some((index, include.clone())),
            _ => None,
        })
}

/// Absolute paths are used as written; relative ones are taken from the
/// directory of the file containing the directive.
fn include_path(include: &IncludeStatement) -> PathBuf {
    let target = Path::new(&include.filename.value);
    if target.is_absolute() {
        return target.to_path_buf();
    }
    match Path::new(&include.origin).parent() {
        Some(dir) => dir.join(target),
        None => target.to_path_buf(),
    }
}

fn io_reason(err: &GladError) -> String {
    match err {
        GladError::Read { source, .. } | GladError::Write { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}
