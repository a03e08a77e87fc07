//! Database maintenance CLI.
//!
//! # Responsibility
//! - Expose migration status/migrate/rollback/reset and store
//!   stats/info/pending/clear as one-shot subcommands.
//! - Keep output plain and deterministic for scripting.
//!
//! Usage:
//! - `demo_parser_cli --config <config.json> <command> [version]`
//! - `demo_parser_cli <db_path> <command> [version]` (default config with `db_path`)

use demo_parser_core::{Database, ItemStore, MigrationRunner, PipelineConfig};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "usage: demo_parser_cli (--config <path> | <db_path>) \
<status|migrate [version]|rollback [version]|reset|stats|info|pending|clear>";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config, rest) = match args.as_slice() {
        [flag, path, rest @ ..] if flag == "--config" => (PipelineConfig::load(path), rest),
        [db_path, rest @ ..] => {
            let config = PipelineConfig {
                db_path: PathBuf::from(db_path),
                ..PipelineConfig::default()
            };
            (config.validate().map(|()| config), rest)
        }
        [] => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };
    let (command, argument) = match rest {
        [command] => (command.as_str(), None),
        [command, argument] => (command.as_str(), Some(argument.as_str())),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };
    if let Err(err) = config.init_logging() {
        eprintln!("warning: {err}");
    }
    info!(
        "event=cli_command module=cli status=start command={} location={}",
        command,
        config.db_location().describe()
    );

    let result = match command {
        "status" | "migrate" | "rollback" | "reset" => {
            run_migration_command(&config, command, argument)
        }
        "stats" | "info" | "pending" | "clear" => run_store_command(&config, command),
        _ => {
            eprintln!("unknown command `{command}`\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run_migration_command(
    config: &PipelineConfig,
    command: &str,
    argument: Option<&str>,
) -> Result<bool, String> {
    let mut db = Database::connect(config.db_location()).map_err(|err| err.to_string())?;
    let mut runner = MigrationRunner::new(&mut db);

    let ok = match command {
        "migrate" => runner.migrate(argument),
        "rollback" => runner.rollback(argument),
        "reset" => runner.reset(),
        _ => true,
    };

    let ledger = runner.try_ledger().map_err(|err| err.to_string())?;
    println!("applied={} total={}", ledger.len(), runner.migrations().len());
    for migration in runner.migrations() {
        let state = match ledger
            .iter()
            .find(|entry| entry.version == migration.version)
        {
            Some(entry) => format!("applied_at={}", entry.applied_at),
            None => "pending".to_string(),
        };
        println!("{} {} {}", migration.version, state, migration.description);
    }

    if !ok {
        eprintln!("{command} failed; see log for details");
    }
    Ok(ok)
}

fn run_store_command(config: &PipelineConfig, command: &str) -> Result<bool, String> {
    let mut db = config.open_database().map_err(|err| err.to_string())?;
    let mut store = ItemStore::sqlite(&mut db).map_err(|err| err.to_string())?;

    match command {
        "stats" => {
            let stats = store.get_statistics();
            println!("total={}", stats.total);
            println!(
                "new={} processed={} failed={}",
                stats.by_status.new, stats.by_status.processed, stats.by_status.failed
            );
            println!("success_rate={:.2}", stats.success_rate);
            for brand in &stats.top_brands {
                println!("brand {} {}", brand.brand, brand.count);
            }
            Ok(true)
        }
        "info" => match store.get_store_info() {
            Some(info) => {
                println!("backend={}", info.backend_kind);
                println!("location={}", info.location);
                println!("size_bytes={} size_mb={:.2}", info.size_bytes, info.size_mb());
                println!("tables={}", info.tables.join(","));
                Ok(true)
            }
            None => Ok(false),
        },
        "pending" => {
            let details = store.get_items_for_details(config.max_items_for_details);
            let html = store.get_items_for_html(config.max_items_for_html);
            println!(
                "details={} limit={}",
                details.len(),
                config.max_items_for_details
            );
            for item in &details {
                println!("detail {}", item.item_id);
            }
            println!("html={} limit={}", html.len(), config.max_items_for_html);
            for item in &html {
                println!("html {}", item.item_id);
            }
            Ok(true)
        }
        _ => {
            let removed = store.clear_all();
            println!("removed={removed}");
            Ok(true)
        }
    }
}
