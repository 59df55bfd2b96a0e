//! Shared state for CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::cli::Cli;
use crate::config::Config;
use crate::error::Result;
use crate::search::{OrchestratorSettings, SearchOrchestrator};
use crate::storage::{CollectionResolver, CollectionScope, FsCollectionResolver};

pub struct AppContext {
    pub config: Config,
    /// Explicit config file, if one was given
    pub config_path: Option<PathBuf>,
    pub resolver: Arc<FsCollectionResolver>,
    pub orchestrator: SearchOrchestrator,
    pub robot_mode: bool,
    pub user: String,
    pub org: String,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config = Config::load(cli.config.as_deref(), cli.root.as_deref())?;
        let mut ctx = Self::from_config(config, cli.robot_mode())?;
        ctx.config_path.clone_from(&cli.config);
        ctx.user.clone_from(&cli.user);
        ctx.org.clone_from(&cli.org);
        Ok(ctx)
    }

    pub fn from_config(config: Config, robot_mode: bool) -> Result<Self> {
        config.validate()?;
        let resolver = Arc::new(FsCollectionResolver::new(
            &config.storage.root,
            config.storage.keyword_backend,
            config.storage.cache_size(),
            &config.metadata.docid_field,
            &config.metadata.langid_field,
        ));
        let shared: Arc<dyn CollectionResolver> = resolver.clone();
        let orchestrator = SearchOrchestrator::new(shared, OrchestratorSettings::from_config(&config));

        debug!(
            root = %config.storage.root.display(),
            backend = %config.storage.keyword_backend,
            "application context ready"
        );

        Ok(Self {
            config,
            config_path: None,
            resolver,
            orchestrator,
            robot_mode,
            user: "default".to_string(),
            org: "default".to_string(),
        })
    }

    /// Scope of `collection` for the current user and organization.
    pub fn scope(&self, collection: &str) -> CollectionScope {
        CollectionScope::new(&self.user, &self.org, collection)
    }
}
