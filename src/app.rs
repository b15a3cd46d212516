//! The application facade.
//!
//! [`App`] holds the loaded proxy list and a process-level cancellation
//! token, and exposes the entry points a front end needs: load a
//! configuration, run a test, start a monitor, stop everything and report
//! system information.

use crate::config::{
    ConfigInfo, EngineSettings, MonitorConfig, TestConfig,
};
use crate::engine::{plan_routes, Monitor, MonitorHandle, TestOrchestrator};
use crate::errors::Result;
use crate::probe::{HttpProber, Prober};
use crate::progress::{NoProgress, ProgressCallback};
use crate::proxy::{source, ProxyEndpoint, ProxySelector};
use crate::results::TestResult;
use crate::system::SystemInfo;
use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// The proxy list most recently loaded.
#[derive(Debug, Clone, Default)]
struct Loaded {
    info: ConfigInfo,
    candidates: Vec<ProxyEndpoint>,
    admitted: Vec<ProxyEndpoint>,
}

pub struct App {
    prober: Arc<dyn Prober>,
    settings: EngineSettings,
    progress: Arc<dyn ProgressCallback>,
    loaded: Mutex<Loaded>,
    cancel: Mutex<CancellationToken>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl App {
    /// An app probing the real network.
    pub fn new(settings: EngineSettings) -> Self {
        let prober = HttpProber::with_setup_grace(settings.setup_grace);
        Self::with_prober(Arc::new(prober), settings)
    }

    pub fn with_prober(prober: Arc<dyn Prober>, settings: EngineSettings) -> Self {
        Self {
            prober,
            settings,
            progress: Arc::new(NoProgress),
            loaded: Mutex::new(Loaded::default()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Report test progress to `progress`.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Load a proxy list and select from it.
    ///
    /// On error the previously loaded list is kept.
    ///
    /// # Arguments
    /// * `path` - File path or `http(s)://` URL of the list, empty for none
    /// * `filter` - Names must match this pattern (empty admits all)
    /// * `block` - Names matching this pattern are rejected (empty for none)
    ///
    /// # Returns
    /// How many proxies were admitted and the rules used
    pub async fn load_config(
        &self,
        path: &str,
        filter: &str,
        block: &str,
    ) -> Result<ConfigInfo> {
        let selector = ProxySelector::new(filter, block)?;
        let candidates = source::load(path, &self.settings.retry).await?;
        let admitted = selector.select(&candidates);

        let info = ConfigInfo {
            proxy_count: admitted.len(),
            config_path: path.to_string(),
            filter: filter.to_string(),
            block: block.to_string(),
        };
        info!(
            "Admitted {} of {} proxies from {:?}",
            admitted.len(),
            candidates.len(),
            path
        );

        *lock(&self.loaded) = Loaded { info: info.clone(), candidates, admitted };

        Ok(info)
    }

    /// The configuration loaded last, if any.
    pub fn config_info(&self) -> Option<ConfigInfo> {
        let loaded = lock(&self.loaded);
        if loaded.info.config_path.is_empty() && loaded.candidates.is_empty() {
            None
        } else {
            Some(loaded.info.clone())
        }
    }

    /// Run a speed test.
    ///
    /// Candidates come from `config.configPath` when it names a list other
    /// than the loaded one, otherwise from the loaded list. `stop()` ends
    /// the run early with partial results.
    pub async fn run_test(&self, config: TestConfig) -> Result<TestResult> {
        let candidates = self.candidates_for(&config.config_path).await?;
        let cancel = self.run_token();

        TestOrchestrator::new(self.prober.clone(), self.settings.clone())
            .with_progress(self.progress.clone())
            .run(&config, &candidates, cancel)
            .await
    }

    async fn candidates_for(&self, path: &str) -> Result<Vec<ProxyEndpoint>> {
        {
            let loaded = lock(&self.loaded);
            if path.is_empty() || path == loaded.info.config_path {
                return Ok(loaded.candidates.clone());
            }
        }
        debug!("Loading proxies from {} for this run", path);
        source::load(path, &self.settings.retry).await
    }

    /// Start monitoring every admitted proxy, or the direct route when
    /// none was admitted and the policy allows it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_monitor(&self, config: MonitorConfig) -> Result<MonitorHandle> {
        config.validate()?;
        let (admitted, candidates) = {
            let loaded = lock(&self.loaded);
            (loaded.admitted.clone(), loaded.candidates.len())
        };
        let (routes, direct_fallback) =
            plan_routes(admitted, candidates, self.settings.no_proxy_policy)?;

        Monitor::new(self.prober.clone(), self.settings.clone()).start(
            &config,
            routes,
            direct_fallback,
            self.run_token(),
        )
    }

    /// Cancel every running test and monitor.
    ///
    /// Later runs are unaffected.
    pub fn stop(&self) {
        let mut cancel = lock(&self.cancel);
        info!("Stopping all runs");
        cancel.cancel();
        *cancel = CancellationToken::new();
    }

    pub fn get_system_info(&self) -> &'static SystemInfo {
        SystemInfo::get()
    }

    fn run_token(&self) -> CancellationToken {
        lock(&self.cancel).child_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorType, NoProxyPolicy};
    use crate::engine::testing::SimulatedProber;
    use crate::errors::ErrorKind;
    use crate::proxy::{source, ProxyKind};
    use crate::results::{RunOutcome, DIRECT};
    use crate::retry::RetryConfig;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const LIST: &str = r#"{"proxies":[
        {"name":"hk-01","type":"http","server":"10.0.0.1","port":8080},
        {"name":"hk-02","type":"socks5","server":"10.0.0.2","port":1080},
        {"name":"us-01","type":"https","server":"10.0.0.3","port":443}
    ]}"#;

    fn list_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(LIST.as_bytes()).unwrap();
        file
    }

    fn app() -> App {
        let prober = SimulatedProber::new(50, 2_000_000.0, 1_000_000.0);
        App::with_prober(Arc::new(prober), EngineSettings::default())
    }

    fn test_config() -> TestConfig {
        TestConfig {
            download_size: 1_000_000,
            upload_size: 500_000,
            timeout: 30,
            concurrent: 4,
            max_latency: 200,
            min_download_speed: 1_000_000.0,
            min_upload_speed: 500_000.0,
            ..TestConfig::default()
        }
    }

    #[tokio::test]
    async fn test_load_config_counts_admitted() {
        let file = list_file();
        let path = file.path().to_str().unwrap();
        let app = app();

        let info = app.load_config(path, "^hk", "02$").await.unwrap();

        assert_eq!(info.proxy_count, 1);
        assert_eq!(info.config_path, path);
        assert_eq!(info.filter, "^hk");
        assert_eq!(info.block, "02$");
        assert_eq!(app.config_info(), Some(info));
    }

    #[tokio::test]
    async fn test_load_config_rejects_bad_pattern_and_keeps_state() {
        let file = list_file();
        let path = file.path().to_str().unwrap();
        let app = app();
        app.load_config(path, "", "").await.unwrap();

        let error = app.load_config(path, "(", "").await.unwrap_err();

        assert_eq!(error.kind, ErrorKind::InvalidPattern);
        assert_eq!(app.config_info().unwrap().proxy_count, 3);
    }

    #[tokio::test]
    async fn test_load_config_missing_file() {
        let error = app()
            .load_config("/nonexistent/proxies.json", "", "")
            .await
            .unwrap_err();
        assert!(error.kind.is_configuration());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_test_uses_loaded_list() {
        let file = list_file();
        let app = app();
        app.load_config(file.path().to_str().unwrap(), "", "").await.unwrap();

        let config = TestConfig {
            config_path: file.path().to_str().unwrap().to_string(),
            filter_regex: "^hk".to_string(),
            ..test_config()
        };
        let result = app.run_test(config).await.unwrap();

        assert!(result.passed);
        assert!(!result.direct_fallback);
        assert_eq!(result.proxies.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passing_proxies_saved_as_list() {
        let file = list_file();
        let path = file.path().to_str().unwrap();
        let mut prober = SimulatedProber::new(50, 2_000_000.0, 1_000_000.0);
        prober.unreachable.insert("hk-02".to_string());
        let app = App::with_prober(Arc::new(prober), EngineSettings::default());
        app.load_config(path, "", "").await.unwrap();

        let config = TestConfig {
            config_path: path.to_string(),
            ..test_config()
        };
        let result = app.run_test(config).await.unwrap();
        let failed: Vec<_> = result
            .proxies
            .iter()
            .filter(|p| !p.passed)
            .map(|p| p.proxy_name.as_str())
            .collect();
        assert_eq!(failed, ["hk-02"]);

        let dir = tempfile::tempdir().unwrap();
        let saved = dir.path().join("passing.json");
        source::save(&saved, &result.passing_endpoints()).await.unwrap();

        let reloaded = source::load(saved.to_str().unwrap(), &RetryConfig::default())
            .await
            .unwrap();
        let names: Vec<_> = reloaded.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["hk-01", "us-01"]);
        assert_eq!(reloaded[1].kind, ProxyKind::Https);
        assert_eq!(reloaded[1].port, 443);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_test_without_list_goes_direct() {
        let result = app().run_test(test_config()).await.unwrap();

        assert!(result.direct_fallback);
        assert_eq!(result.proxies[0].proxy_name, DIRECT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_running_test_only() {
        let app = Arc::new(app());

        let stopper = app.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            stopper.stop();
        });

        let config = TestConfig { concurrent: 1, ..test_config() };
        let result = app.run_test(config.clone()).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert!(result.incomplete);

        let result = app.run_test(config).await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_monitor_direct_and_stop() {
        let app = app();
        let config = MonitorConfig {
            duration: 60,
            interval: 5,
            target_url: "http://target.test/".to_string(),
            kind: MonitorType::Latency,
        };

        let mut handle = app.start_monitor(config).unwrap();
        let first = handle.updates().recv().await.unwrap();
        assert_eq!(first.proxy_name, DIRECT);
        assert!(first.is_alive);

        app.stop();
        let report = handle.join().await.unwrap();
        assert!(!report.completed);
        assert!(report.direct_fallback);
    }

    #[tokio::test]
    async fn test_start_monitor_fail_policy() {
        let settings = EngineSettings {
            no_proxy_policy: NoProxyPolicy::Fail,
            ..EngineSettings::default()
        };
        let prober = SimulatedProber::new(1, 1e6, 1e6);
        let app = App::with_prober(Arc::new(prober), settings);

        let error = app.start_monitor(MonitorConfig::default()).unwrap_err();
        assert_eq!(error.kind, ErrorKind::NoProxyAvailable);
    }

    #[test]
    fn test_system_info_from_app() {
        let info = app().get_system_info();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
