extern crate clap;

mod cli;
mod render;

use crate::cli::Cli;
use clap::Parser;
use colored::Colorize;
use log::{info, warn};
use proxy_speedtest::app::App;
use proxy_speedtest::config::EngineSettings;
use proxy_speedtest::errors::{
    exit_codes, format_error_for_display, Result, SpeedTestError,
};
use proxy_speedtest::progress::ProgressEvent;
use proxy_speedtest::proxy::source;
use proxy_speedtest::results::RunOutcome;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format_error_for_display(&e).red());
            e.exit_code()
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}

async fn run(cli: Cli) -> Result<i32> {
    let mut app = App::new(EngineSettings::default());
    if !cli.json {
        app = app.with_progress(Arc::new(|event: ProgressEvent| {
            if let Some(line) = render::progress_line(&event) {
                eprintln!("{}", line.dimmed());
            }
        }));
    }
    let app = Arc::new(app);

    let stopper = app.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping");
            stopper.stop();
        }
    });

    let info = app
        .load_config(cli.config_path(), &cli.filter, &cli.block)
        .await?;
    if !cli.json {
        render::print_config(&info);
    }

    if cli.monitor {
        monitor(&cli, &app).await
    } else {
        speed_test(&cli, &app, info.proxy_count).await
    }
}

async fn speed_test(cli: &Cli, app: &App, routes: usize) -> Result<i32> {
    let result = app.run_test(cli.test_config(routes)).await?;
    show(cli, &result, render::print_test_result)?;

    if let Some(ref path) = cli.output {
        let passing = result.passing_endpoints();
        source::save(path, &passing).await?;
        if !cli.json {
            render::print_saved(path, passing.len());
        }
    }

    Ok(match result.outcome {
        RunOutcome::Cancelled => exit_codes::CANCELLED,
        _ if result.incomplete || !result.passed => exit_codes::PARTIAL_FAILURE,
        _ => exit_codes::SUCCESS,
    })
}

async fn monitor(cli: &Cli, app: &App) -> Result<i32> {
    let mut handle = app.start_monitor(cli.monitor_config())?;

    while let Some(status) = handle.updates().recv().await {
        if !cli.json {
            render::print_status(&status);
        }
    }

    let report = handle.join().await?;
    show(cli, &report, render::print_monitor_report)?;

    if let Some(ref path) = cli.output {
        tokio::fs::write(path, to_json(&report)?).await.map_err(|e| {
            SpeedTestError::io(format!("cannot write {}", path.display()), e)
        })?;
        info!("Monitor report written to {}", path.display());
    }

    Ok(if report.completed {
        exit_codes::SUCCESS
    } else {
        exit_codes::CANCELLED
    })
}

/// Print `report`, as JSON with `--json`.
fn show<T: Serialize>(cli: &Cli, report: &T, print: fn(&T)) -> Result<()> {
    if cli.json {
        println!("{}", to_json(report)?);
    } else {
        print(report);
    }
    Ok(())
}

fn to_json<T: Serialize>(report: &T) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(|e| {
        SpeedTestError::internal(format!("cannot render report: {}", e))
    })
}
