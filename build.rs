fn main() {
    set_rerun_triggers();
    set_git_revision_hash();
    set_build_time();
}

/// Rerun on source changes and on new commits, so the stamped revision
/// and build time follow the checkout.
fn set_rerun_triggers() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    for path in [".git/HEAD", ".git/refs/heads", ".git/packed-refs"] {
        if std::path::Path::new(path).exists() {
            println!("cargo:rerun-if-changed={}", path);
        }
    }
}

/// Make the current git hash available to the build as the environment
/// variable `PROXY_SPEEDTEST_BUILD_GIT_HASH`.
fn set_git_revision_hash() {
    use std::process::Command;

    let args = &["rev-parse", "--short=10", "HEAD"];
    let Ok(output) = Command::new("git").args(args).output() else { return };
    let rev = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if rev.is_empty() {
        return;
    }
    println!("cargo:rustc-env=PROXY_SPEEDTEST_BUILD_GIT_HASH={}", rev);
}

/// Stamp the build with `PROXY_SPEEDTEST_BUILD_TIME` (RFC 3339, UTC).
///
/// `SOURCE_DATE_EPOCH` wins when set, so reproducible builds stay
/// reproducible.
fn set_build_time() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    let stamp = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|epoch| epoch.trim().parse::<i64>().ok())
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(chrono::Utc::now);

    println!(
        "cargo:rustc-env=PROXY_SPEEDTEST_BUILD_TIME={}",
        stamp.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );
}
