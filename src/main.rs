//! colibri-data - command line entry point.
//!
//! Loads a configuration file and runs one command against its access
//! points: `migrate`, `query`, `tables`, `describe` or `ping`.

use clap::Parser;
use colibri_data::config::{Commands, Config, FileConfig};
use colibri_data::db::{DataAccessPoints, QueryOutcome};
use colibri_data::error::{DbError, DbResult};
use colibri_data::format::{self, OutputFormat};
use colibri_data::models::{Params, QueryOptions, QueryParam, Row};
use colibri_data::storage::{MigrateOptions, Migrator, Storages};
use serde_json::json;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Results go to stdout; logs stay on stderr.
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        config = %config.config.display(),
        "Starting colibri-data v{}",
        env!("CARGO_PKG_VERSION")
    );

    let file = match FileConfig::load(&config.config) {
        Ok(file) => file,
        Err(e) => {
            error!(error = %e, "Cannot load configuration");
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let points = DataAccessPoints::new(file);
    let result = run(&config, &points).await;
    points.close_all().await;

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {}", suggestion);
            }
            ExitCode::FAILURE
        }
    }
}

/// Run the selected command; `Ok(false)` means it ran but reported a failure.
async fn run(config: &Config, points: &DataAccessPoints) -> DbResult<bool> {
    let out = config.format;
    match &config.command {
        Commands::Migrate {
            dev,
            dry_run,
            storages,
        } => {
            let file = points.config();
            let declared = Storages::from_config(&file.storages, &file.modules)?;
            let options = MigrateOptions {
                dev: *dev,
                dry_run: *dry_run,
                only: storages.clone(),
            };
            let reports = Migrator::new(points, &declared).run(&options).await?;
            print!("{}", format::render_reports(out, &reports));
            Ok(reports.iter().all(|r| r.failures().next().is_none()))
        }

        Commands::Query {
            point,
            sql,
            params,
            page,
            pagesize,
            query_type,
        } => {
            let ap = points.get(point).await?;
            let mut options = QueryOptions::default()
                .with_type(*query_type)
                .with_page(*page, *pagesize);
            if !params.is_empty() {
                let params: Params = params
                    .iter()
                    .map(|(name, value)| (name.clone(), QueryParam::parse_loose(value)))
                    .collect();
                options = options.with_params(params);
            }

            let started = Instant::now();
            match ap.query(sql, options).await? {
                QueryOutcome::Reader(mut reader) => {
                    let rows = reader.read_all();
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    print!("{}", format::render_rows(out, &rows, reader.affected(), elapsed_ms));
                    Ok(true)
                }
                QueryOutcome::Info(info) => {
                    print!("{}", format::render_info(out, &info));
                    Ok(info.is_ok())
                }
            }
        }

        Commands::Tables { point, like } => {
            let ap = points.get(point).await?;
            let started = Instant::now();
            let rows: Vec<Row> = ap
                .tables(like.as_deref())
                .await?
                .into_iter()
                .map(|table| row(json!({ "table": table })))
                .collect();
            let elapsed_ms = started.elapsed().as_millis() as u64;
            print!("{}", format::render_rows(out, &rows, None, elapsed_ms));
            Ok(true)
        }

        Commands::Describe { point, table } => {
            let ap = points.get(point).await?;
            match ap.describe_table(table).await? {
                Some(schema) => {
                    print!("{}", format::render_schema(out, &schema));
                    Ok(true)
                }
                None => Err(DbError::invalid_input(format!(
                    "table '{}' does not exist on '{}'",
                    table, point
                ))),
            }
        }

        Commands::Ping { points: names } => {
            let names = if names.is_empty() {
                points.names()
            } else {
                names.clone()
            };
            let mut all_ok = true;
            let mut rows = Vec::with_capacity(names.len());
            for name in &names {
                let (driver, status) = ping(points, name).await;
                all_ok &= status == "ok";
                rows.push(row(json!({ "point": name, "driver": driver, "status": status })));
            }
            print!("{}", render_ping(out, &rows));
            Ok(all_ok)
        }
    }
}

/// Open the point if needed, then ping it.
async fn ping(points: &DataAccessPoints, name: &str) -> (String, String) {
    match points.point(name).await {
        Ok(point) => {
            let driver = point.driver().id().to_string();
            let status = if point.ping().await {
                "ok".to_string()
            } else {
                "unreachable".to_string()
            };
            (driver, status)
        }
        Err(e) => (String::new(), format!("error: {}", e.message())),
    }
}

fn render_ping(out: OutputFormat, rows: &[Row]) -> String {
    match out {
        OutputFormat::Table => format::format_as_table(&format::columns_of(rows), rows),
        OutputFormat::Markdown => format::format_as_markdown(&format::columns_of(rows), rows),
        OutputFormat::Json => format::render_rows(out, rows, None, 0),
    }
}

fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}
