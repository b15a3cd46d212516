//! Human-readable terminal output.

use colored::{ColoredString, Colorize};
use std::path::Path;
use proxy_speedtest::config::ConfigInfo;
use proxy_speedtest::progress::{ProgressEvent, TestPhase};
use proxy_speedtest::results::{
    MonitorReport, MonitorStatus, RunOutcome, TestResult,
};

/// Bytes per second as megabits per second.
pub fn mbps(bytes_per_sec: f64) -> String {
    format!("{:.2} Mbps", bytes_per_sec * 8.0 / 1_000_000.0)
}

fn verdict(passed: bool) -> ColoredString {
    if passed {
        "PASS".bold().green()
    } else {
        "FAIL".bold().red()
    }
}

/// One line per phase change, nothing for the rest.
pub fn progress_line(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::PhaseChange(TestPhase::Selecting) => {
            Some("Selecting proxies...".to_string())
        }
        ProgressEvent::PhaseChange(TestPhase::Running(kind)) => {
            Some(format!("Measuring {}...", kind))
        }
        ProgressEvent::PhaseChange(TestPhase::Aggregating) => {
            Some("Aggregating results...".to_string())
        }
        _ => None,
    }
}

pub fn print_config(info: &ConfigInfo) {
    if info.config_path.is_empty() {
        return;
    }
    println!(
        "{} {} {}",
        "Proxy list:".bold().white(),
        info.config_path.bright_blue(),
        format!("({} admitted)", info.proxy_count).bright_blue()
    );
}

pub fn print_test_result(result: &TestResult) {
    if result.direct_fallback {
        println!("{}", "No proxy admitted, tested directly".yellow());
    }

    for proxy in &result.proxies {
        println!();
        println!(
            "{} {} {}",
            proxy.proxy_name.bold().white(),
            format!("({})", proxy.proxy_type).bright_blue(),
            verdict(proxy.passed)
        );
        println!("  {} {:.0} ms", "Latency:".bold().white(), proxy.latency);
        println!("  {} {:.0} ms", "Jitter:".bold().white(), proxy.jitter);
        println!(
            "  {} {:.1}%",
            "Packet loss:".bold().white(),
            proxy.packet_loss
        );
        if result.config.download_size > 0 {
            println!(
                "  {} {}",
                "Download speed:".bold().white(),
                mbps(proxy.download_speed).bright_cyan()
            );
        }
        if result.config.upload_size > 0 {
            println!(
                "  {} {}",
                "Upload speed:".bold().white(),
                mbps(proxy.upload_speed).bright_cyan()
            );
        }
    }

    println!();
    match result.outcome {
        RunOutcome::Completed => {}
        RunOutcome::TimedOut => {
            println!("{}", "Timed out before every probe ran".yellow())
        }
        RunOutcome::Cancelled => println!("{}", "Cancelled".yellow()),
    }
    println!(
        "{} {} in {:.1}s",
        "Result:".bold().white(),
        verdict(result.passed),
        result.elapsed_secs()
    );
}

pub fn print_status(status: &MonitorStatus) {
    let state = if status.is_alive {
        format!("{:.0} {}", status.sample.value, status.sample.kind.unit())
            .green()
    } else {
        let error = status
            .sample
            .error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or("down");
        error.red()
    };
    println!(
        "{} {} {} {}",
        format!("[{}]", status.last_update.format("%H:%M:%S")).dimmed(),
        status.proxy_name.bold().white(),
        format!("#{}", status.tick).bright_blue(),
        state
    );
}

pub fn print_monitor_report(report: &MonitorReport) {
    if report.direct_fallback {
        println!("{}", "No proxy admitted, monitored directly".yellow());
    }

    for session in &report.sessions {
        println!();
        println!("{}", session.proxy_name.bold().white());
        println!(
            "  {} {:.1}%",
            "Stability:".bold().white(),
            session.stability_rate
        );
        println!(
            "  {} {:.0}s of {:.0}s",
            "Online:".bold().white(),
            session.online_duration,
            session.total_duration
        );
        println!(
            "  {} {}",
            "Disconnects:".bold().white(),
            session.disconnect_count
        );
        println!(
            "  {} {:.0}s",
            "Longest online:".bold().white(),
            session.max_online_time
        );
        if let Some(median) = session.summary.median {
            println!("  {} {:.1}", "Median:".bold().white(), median);
        }
    }

    if !report.completed {
        println!();
        println!("{}", "Stopped early".yellow());
    }
}

pub fn print_saved(path: &Path, count: usize) {
    println!();
    println!(
        "{} {} passing proxies to {}",
        "Saved".bold().white(),
        count,
        path.display().to_string().bright_blue()
    );
}
