//! Process-wide build and platform information.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// What this binary is and where it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    /// `os/arch`, e.g. `linux/x86_64`.
    pub platform: String,
    pub version: String,
    /// RFC 3339 build timestamp.
    pub build_time: String,
    /// Short git revision, when built from a checkout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
}

static INFO: OnceLock<SystemInfo> = OnceLock::new();
static LONG_VERSION: OnceLock<String> = OnceLock::new();

impl SystemInfo {
    /// The information for this process, computed once.
    pub fn get() -> &'static SystemInfo {
        INFO.get_or_init(|| SystemInfo {
            platform: format!(
                "{}/{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_time: env!("PROXY_SPEEDTEST_BUILD_TIME").to_string(),
            git_hash: option_env!("PROXY_SPEEDTEST_BUILD_GIT_HASH")
                .map(str::to_string),
        })
    }

    /// Version string for `--version`, with the git hash when known and
    /// the build time.
    pub fn long_version() -> &'static str {
        LONG_VERSION.get_or_init(|| {
            let info = Self::get();
            match info.git_hash {
                Some(ref rev) => format!(
                    "{} (rev {}, built {})",
                    info.version, rev, info.build_time
                ),
                None => format!("{} (built {})", info.version, info.build_time),
            }
        })
    }
}
