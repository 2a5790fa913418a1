mod cli;
mod error_fmt;
mod rt;
mod run;

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

use cli::{Cli, Commands, FILE_GUARD};
use error_fmt::{exit_code_for_error, format_error_json, humanize};
use run::{RunOpts, run_session, self_check};

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(e) = color_eyre::install() {
        eprintln!("failed to install error reporting: {e}");
    }

    let cfg = match load_config(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => return fail(&args, &e),
    };
    init_logging(&args.log_level, args.json, &cfg.logging);

    match dispatch(&args, &cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&args, &e),
    }
}

fn fail(args: &Cli, err: &eyre::Report) -> ExitCode {
    if args.json {
        eprintln!("{}", format_error_json(err));
    } else {
        eprintln!("{}", humanize(err));
    }
    ExitCode::from(exit_code_for_error(err).clamp(0, 255) as u8)
}

fn dispatch(args: &Cli, cfg: &sorter_config::Config) -> eyre::Result<()> {
    match &args.cmd {
        Commands::Run {
            duration_s,
            parcels,
            ring_len,
            rt,
            rt_prio,
            rt_lock,
        } => {
            let opts = RunOpts {
                duration_s: *duration_s,
                parcels: *parcels,
                ring_len: *ring_len,
                rt: *rt,
                rt_prio: *rt_prio,
                rt_lock: *rt_lock,
            };
            let (report, line) = run_session(cfg, &opts)?;
            let windows = line.opened_windows();
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({
                        "ring_len": report.ring_len,
                        "created": report.parcels_created,
                        "sorted": report.sorted,
                        "force_ejected": report.force_ejected,
                        "failed": report.failed,
                        "pending": report.pending,
                        "final_speed_mmps": report.final_speed_mmps,
                        "speed_stable": report.speed_stable,
                        "chute_windows": windows.len(),
                    })
                );
            } else {
                println!(
                    "session finished: ring={} created={} sorted={} force_ejected={} failed={} pending={} windows={}",
                    report
                        .ring_len
                        .map_or_else(|| "undiscovered".to_string(), |l| l.to_string()),
                    report.parcels_created,
                    report.sorted,
                    report.force_ejected,
                    report.failed,
                    report.pending,
                    windows.len(),
                );
            }
            Ok(())
        }
        Commands::SelfCheck => {
            self_check()?;
            if args.json {
                println!("{}", serde_json::json!({ "status": "ok" }));
            } else {
                println!("self-check ok");
            }
            Ok(())
        }
        Commands::Health => {
            // Flat status for monitoring probes; extend when a real line
            // backend lands.
            if args.json {
                println!(
                    "{}",
                    serde_json::json!({ "status": "ok", "backend": "simulated" })
                );
            } else {
                println!("ok (simulated backend)");
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> eyre::Result<sorter_config::Config> {
    if !path.exists() {
        // Defaults are a complete, valid configuration for the simulator.
        return Ok(sorter_config::Config::default());
    }
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
    let cfg = sorter_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("invalid configuration: {e}"))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn init_logging(log_level: &str, json: bool, logging: &sorter_config::Logging) {
    // RUST_LOG wins, then the --log-level flag, then the config file.
    let level = if log_level == "info" {
        logging.level.as_deref().unwrap_or(log_level)
    } else {
        log_level
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout is reserved for machine-readable summaries.
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if json {
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .boxed(),
        );
    } else {
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .boxed(),
        );
    }
    if let Some(file) = logging.file.as_ref()
        && let Some(layer) = file_layer(file, logging.rotation.as_deref())
    {
        layers.push(layer);
    }

    tracing_subscriber::registry().with(filter).with(layers).init();
}

type BoxedLayer = Box<
    dyn Layer<tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>>
        + Send
        + Sync,
>;

/// JSON-lines file sink with the configured rotation.
fn file_layer(file: &str, rotation: Option<&str>) -> Option<BoxedLayer> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};

    let path = Path::new(file);
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name()?;
    let rotation = match rotation {
        Some("daily") => Rotation::DAILY,
        Some("hourly") => Rotation::HOURLY,
        _ => Rotation::NEVER,
    };
    let appender = RollingFileAppender::new(rotation, dir, name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    Some(
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    )
}
