//! Binary entry point for the typedb CLI.
//!
//! ## Usage
//!
//! ```bash
//! # List the modules in a database
//! typedb --db ~/.local/share/typedb/CompletionDB/1 modules
//!
//! # Show one module, or one member of it
//! typedb --db ./db show os
//! typedb --db ./db show os.path join
//!
//! # Load everything and report corrupt files and unresolved references
//! typedb --db ./db --strict check
//!
//! # Decode a single database file
//! typedb dump ./db/os.idb
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use typedb::commands::{open_database, run_check, run_dump, run_modules, run_show, ShowResponse};
use typedb::output::{emit_response, ErrorResponse};
use typedb_core::error::{OutputErrorCode, TypeDbError};
use typedb_core::fs::OsFs;
use typedb_core::version::LanguageVersion;
use typedb_python::{DatabaseConfig, DatabaseOptions};

// ============================================================================
// CLI Structure
// ============================================================================

/// Inspect a precomputed Python type database.
///
/// All output is JSON on stdout; logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "typedb", version, about = "Inspect a precomputed Python type database")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Database directory (default: the per-user completion database).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Python language version the database describes.
    #[arg(long, global = true, default_value = "3.8", value_parser = parse_version)]
    python: LanguageVersion,

    /// Extra directory searched for modules not in the database.
    ///
    /// Can be specified multiple times.
    #[arg(long, global = true)]
    search_path: Vec<PathBuf>,

    /// Log references that never resolve at warn level.
    #[arg(long, global = true)]
    strict: bool,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
}

fn parse_version(s: &str) -> Result<LanguageVersion, String> {
    s.parse::<LanguageVersion>()
        .map_err(|_| format!("invalid Python version '{}', expected MAJOR.MINOR (e.g., '3.8')", s))
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List the modules in the database.
    Modules,
    /// Show a module's members, or the detail of one member.
    Show {
        /// Module name (dotted).
        module: String,
        /// Member path inside the module (dotted through types).
        member: Option<String>,
    },
    /// Load every module and report corruption and unresolved references.
    Check,
    /// Decode one database file and print its raw value.
    Dump {
        /// Path to a module file.
        file: PathBuf,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level, cli.global.log_json);

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();
            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the database configuration from the global arguments.
///
/// Without `--db` the per-user database is used, with its module aliases.
fn database_config(global: &GlobalArgs) -> DatabaseConfig {
    let options = DatabaseOptions::default()
        .with_preload(false)
        .with_report_unresolved(global.strict)
        .with_default_database(global.db.is_none());
    let mut config = DatabaseConfig::new(global.python).with_options(options);
    config = match &global.db {
        Some(path) => config.with_path(path),
        None => config.with_default_path(),
    };
    for path in &global.search_path {
        config = config.with_search_path(path);
    }
    config
}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<ExitCode, TypeDbError> {
    let config = database_config(&cli.global);
    match cli.command {
        Command::Modules => {
            let db = open_database(&config)?;
            emit(&run_modules(&db))?;
        }
        Command::Show { module, member } => {
            let db = open_database(&config)?;
            match run_show(&db, &module, member.as_deref())? {
                ShowResponse::Module(response) => emit(&response)?,
                ShowResponse::Member(response) => emit(&response)?,
            }
        }
        Command::Check => {
            let response = run_check(&config)?;
            emit(&response)?;
            if !response.is_clean() {
                return Ok(ExitCode::from(OutputErrorCode::CorruptDatabase.code()));
            }
        }
        Command::Dump { file } => {
            let response = run_dump(&OsFs, &file)?;
            emit(&response)?;
            if !response.complete {
                return Ok(ExitCode::from(OutputErrorCode::CorruptDatabase.code()));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn emit<T: Serialize>(response: &T) -> Result<(), TypeDbError> {
    emit_response(response, &mut io::stdout())?;
    let _ = io::stdout().flush();
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use typedb_python::TypeDatabaseFactory;

    #[test]
    fn test_show_with_member() {
        let args = ["typedb", "--db", "/tmp/db", "show", "os.path", "join"];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Command::Show { module, member } => {
                assert_eq!(module, "os.path");
                assert_eq!(member.as_deref(), Some("join"));
            }
            other => panic!("expected show, got {:?}", other),
        }
    }

    #[test]
    fn test_python_version_flag() {
        let cli = Cli::try_parse_from(["typedb", "modules", "--python", "2.7"]).unwrap();
        assert_eq!(cli.global.python, LanguageVersion::V2_7);

        let result = Cli::try_parse_from(["typedb", "modules", "--python", "three"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_strict_sets_report_unresolved() {
        let cli = Cli::try_parse_from(["typedb", "--db", "/tmp/db", "--strict", "check"]).unwrap();
        let config = database_config(&cli.global);
        assert!(config.options().report_unresolved);
        assert!(!config.options().preload);
        assert!(!config.options().default_database);
        assert_eq!(config.database_path(), Some(PathBuf::from("/tmp/db")));
    }

    #[test]
    fn test_search_paths_repeat() {
        let args = ["typedb", "--search-path", "/a", "--search-path", "/b", "modules"];
        let cli = Cli::try_parse_from(args).unwrap();
        let config = database_config(&cli.global);
        assert_eq!(config.search_paths(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }
}
