//! Process-wide service state.
//!
//! Built once at startup from [`IntelConfig`], shared with request handlers
//! through an `Arc`, and closed with [`AppContext::shutdown`] at exit.

use std::sync::Arc;

use tracing::{info, warn};
use unified_search::tools::{HttpTool, LocalFilesTool};
use unified_search::{SearchOrchestrator, SourceKind};

use crate::builder::IntelligenceBuilder;
use crate::config::IntelConfig;
use crate::error::{IntelError, Result};
use crate::storage::{
    ContentStore, GraphSearchTool, GraphStore, InMemoryContentStore, InMemoryGraphStore,
    IntelligenceStorageManager, SqliteContentStore, SqliteGraphStore, StoreSearchTool,
};
use crate::versioning::VersionHistoryManager;

pub struct AppContext {
    config: IntelConfig,
    orchestrator: SearchOrchestrator,
    storage: Arc<IntelligenceStorageManager>,
    versions: Arc<VersionHistoryManager>,
    builder: Arc<IntelligenceBuilder>,
}

impl AppContext {
    /// Open the stores, wire local backends and remote tools into the
    /// orchestrator and start the storage worker.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`IntelError::Config`] for an invalid configuration or tool
    /// endpoint, and storage errors if a database cannot be opened.
    pub fn build(config: IntelConfig) -> Result<Self> {
        config.validate()?;

        let (content, graph): (Arc<dyn ContentStore>, Arc<dyn GraphStore>) =
            if config.storage.in_memory {
                (
                    Arc::new(InMemoryContentStore::new()),
                    Arc::new(InMemoryGraphStore::new()),
                )
            } else {
                let path = config.storage.database_path();
                info!(path = %path.display(), "opening intelligence store");
                (
                    Arc::new(SqliteContentStore::open(&path)?),
                    Arc::new(SqliteGraphStore::open(&path)?),
                )
            };

        let versions = if config.versioning.in_memory {
            VersionHistoryManager::open_in_memory(&config.versioning)?
        } else {
            VersionHistoryManager::open(&config.versioning.database_path(), &config.versioning)?
        };
        match versions.cleanup_old_versions(config.versioning.retention_days) {
            Ok(n) if n > 0 => info!(archived = n, "archived versions past retention"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "version retention sweep failed"),
        }

        let storage = Arc::new(IntelligenceStorageManager::new(
            Arc::clone(&content),
            Arc::clone(&graph),
            &config.storage,
        ));

        let orchestrator = SearchOrchestrator::new(config.search.clone())?
            .with_sink(Arc::clone(&storage) as Arc<dyn unified_search::ResultSink>);

        if config.local.search_stored {
            orchestrator.local().add_backend(Arc::new(StoreSearchTool::new(
                "stored-intelligence",
                Arc::clone(&content),
            )));
            orchestrator.local().add_backend(Arc::new(GraphSearchTool::new(
                "entity-graph",
                Arc::clone(&graph),
            )));
        }
        if let Some(dir) = &config.local.files_dir {
            orchestrator
                .local()
                .add_backend(Arc::new(LocalFilesTool::new("local-files", dir.clone())));
        }

        for (index, tool) in config.tools.iter().enumerate() {
            let kind = tool.source_kind.unwrap_or_else(|| {
                SourceKind::RemoteTool(u16::try_from(index).unwrap_or(u16::MAX))
            });
            let mut http = HttpTool::new(
                tool.name.clone(),
                &tool.endpoint,
                kind,
                config.search.tool_timeout(),
            )
            .map_err(|e| IntelError::Config(e.to_string()))?;
            if let Some(reliability) = tool.reliability {
                http = http.with_reliability(reliability);
            }
            orchestrator.registry().register(Arc::new(http));
        }

        info!(
            local = ?orchestrator.local().backend_names(),
            remote = ?orchestrator.registry().tool_names(),
            "search backends configured"
        );

        let builder = Arc::new(IntelligenceBuilder::new(
            content,
            graph,
            config.builder.clone(),
        ));

        Ok(Self {
            config,
            orchestrator,
            storage,
            versions: Arc::new(versions),
            builder,
        })
    }

    pub fn config(&self) -> &IntelConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &SearchOrchestrator {
        &self.orchestrator
    }

    pub fn storage(&self) -> &Arc<IntelligenceStorageManager> {
        &self.storage
    }

    pub fn versions(&self) -> &Arc<VersionHistoryManager> {
        &self.versions
    }

    pub fn builder(&self) -> &Arc<IntelligenceBuilder> {
        &self.builder
    }

    /// Drain the storage queue.
    pub async fn shutdown(&self) {
        self.storage.shutdown().await;
        info!("context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolConfig;

    fn memory_config() -> IntelConfig {
        let mut config = IntelConfig::default();
        config.storage.in_memory = true;
        config.versioning.in_memory = true;
        config
    }

    #[tokio::test]
    async fn builds_with_stored_backends() {
        let ctx = AppContext::build(memory_config()).expect("build");
        assert_eq!(
            ctx.orchestrator().local().backend_names(),
            vec!["stored-intelligence".to_string(), "entity-graph".to_string()]
        );
        assert!(ctx.orchestrator().registry().tool_names().is_empty());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn registers_remote_tools_with_default_kinds() {
        let mut config = memory_config();
        config.local.search_stored = false;
        config.tools.push(ToolConfig {
            name: "gov".into(),
            endpoint: "http://127.0.0.1:9/gov".into(),
            source_kind: None,
            reliability: Some(0.9),
        });
        let ctx = AppContext::build(config).expect("build");
        assert!(ctx.orchestrator().local().is_empty());
        assert_eq!(ctx.orchestrator().registry().tool_names(), vec!["gov".to_string()]);
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn bad_endpoint_is_config_error() {
        let mut config = memory_config();
        config.tools.push(ToolConfig {
            name: "broken".into(),
            endpoint: "not a url".into(),
            source_kind: None,
            reliability: None,
        });
        assert!(matches!(
            AppContext::build(config),
            Err(IntelError::Config(_))
        ));
    }

    #[tokio::test]
    async fn sqlite_stores_open_under_tempdir() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let mut config = IntelConfig::default();
        config.storage.database_path = Some(dir.path().join("intel.db"));
        config.versioning.database_path = Some(dir.path().join("versions.db"));
        let ctx = AppContext::build(config).expect("build");
        assert!(dir.path().join("intel.db").exists());
        assert!(dir.path().join("versions.db").exists());
        ctx.shutdown().await;
    }
}
