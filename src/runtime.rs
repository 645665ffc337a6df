//! Composition root for the cache subsystem
//!
//! [`CacheRuntime`] wires the partitions, the upstream checker, the version
//! manager, the provider and the `cache_health` tool together, runs the
//! startup version check and spawns the background tasks. Nothing in the
//! crate is a global: every component reachable from the runtime was
//! constructed here.

use crate::cache::{start_auto_cleanup, CacheConfig, CacheSet, SharedClock, SystemClock};
use crate::error::Result;
use crate::http::{HttpClient, HttpConfig};
use crate::providers::ComponentSourceProvider;
use crate::tools::CacheHealthTool;
use crate::upstream::{FingerprintChecker, GitHubRevisionSource, RevisionSource};
use crate::version::{spawn_version_watch, CacheVersionManager, VersionCheck};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Running cache subsystem
///
/// Dropping the runtime stops the background tasks.
pub struct CacheRuntime {
    config: CacheConfig,
    caches: CacheSet,
    manager: Arc<CacheVersionManager>,
    provider: Arc<ComponentSourceProvider>,
    tool: CacheHealthTool,
    startup_check: VersionCheck,
    tasks: Vec<JoinHandle<()>>,
}

impl CacheRuntime {
    /// Start with production collaborators: system clock, GitHub API
    pub async fn bootstrap(config: CacheConfig, http_config: HttpConfig) -> Result<Self> {
        Self::builder(config).http_config(http_config).start().await
    }

    /// Configuration from the environment, then [`bootstrap`](Self::bootstrap)
    pub async fn from_env() -> Result<Self> {
        Self::bootstrap(CacheConfig::from_env()?, HttpConfig::from_env()?).await
    }

    pub fn builder(config: CacheConfig) -> CacheRuntimeBuilder {
        CacheRuntimeBuilder {
            config,
            http_config: HttpConfig::default(),
            clock: None,
            revision_source: None,
            raw_base: None,
            background_tasks: true,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn caches(&self) -> &CacheSet {
        &self.caches
    }

    pub fn version_manager(&self) -> &Arc<CacheVersionManager> {
        &self.manager
    }

    pub fn provider(&self) -> &Arc<ComponentSourceProvider> {
        &self.provider
    }

    pub fn cache_health_tool(&self) -> &CacheHealthTool {
        &self.tool
    }

    /// Outcome of the version check run during startup
    pub fn startup_check(&self) -> &VersionCheck {
        &self.startup_check
    }

    /// Number of background tasks still running
    pub fn running_tasks(&self) -> usize {
        self.tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Stop the background tasks
    pub fn shutdown(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Cache runtime background tasks stopped");
    }
}

impl Drop for CacheRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`CacheRuntime`] with replaceable collaborators
pub struct CacheRuntimeBuilder {
    config: CacheConfig,
    http_config: HttpConfig,
    clock: Option<SharedClock>,
    revision_source: Option<Arc<dyn RevisionSource>>,
    raw_base: Option<String>,
    background_tasks: bool,
}

impl CacheRuntimeBuilder {
    pub fn http_config(mut self, http_config: HttpConfig) -> Self {
        self.http_config = http_config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the GitHub commit lookup
    pub fn revision_source(mut self, source: Arc<dyn RevisionSource>) -> Self {
        self.revision_source = Some(source);
        self
    }

    /// Raw-content host used by the component provider
    pub fn raw_base(mut self, raw_base: impl Into<String>) -> Self {
        self.raw_base = Some(raw_base.into());
        self
    }

    /// Whether to spawn the version watch and the expiry sweep
    pub fn background_tasks(mut self, enabled: bool) -> Self {
        self.background_tasks = enabled;
        self
    }

    /// Build every component, run the startup check and spawn the tasks
    pub async fn start(self) -> Result<CacheRuntime> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let http = HttpClient::new(self.http_config)?;

        let caches = CacheSet::open(&self.config, clock.clone());

        let source: Arc<dyn RevisionSource> = match self.revision_source {
            Some(source) => source,
            None => Arc::new(GitHubRevisionSource::from_env(http.clone())),
        };
        let manager = Arc::new(
            CacheVersionManager::new(caches.clone(), FingerprintChecker::new(source), clock)
                .with_check_interval(self.config.check_interval),
        );

        let components = caches.components().clone();
        let provider = Arc::new(match self.raw_base {
            Some(base) => ComponentSourceProvider::with_raw_base(http, components, base),
            None => ComponentSourceProvider::from_env(http, components),
        });

        let tool = CacheHealthTool::new(manager.clone());

        let startup_check = manager.check().await;
        info!(
            "Cache runtime started in {} (startup check: {:?})",
            self.config.cache_dir.display(),
            startup_check
        );

        let mut tasks = Vec::new();
        if self.background_tasks {
            tasks.push(spawn_version_watch(
                manager.clone(),
                self.config.check_interval,
            ));
            tasks.push(tokio::spawn(start_auto_cleanup(
                caches.clone(),
                self.config.cleanup_interval,
            )));
        }

        Ok(CacheRuntime {
            config: self.config,
            caches,
            manager,
            provider,
            tool,
            startup_check,
            tasks,
        })
    }
}
