//! Application context providing dependency injection root.

use std::sync::Arc;

use crate::config::Config;
use crate::di::Context as ContextDerive;
use crate::embedding::{EmbeddingProvider, HttpEmbedder};
use crate::error::AppError;
use crate::store::{open_store, GraphStore};
use crate::FromRef;

/// The graph store selected by configuration.
pub type AppStore = Arc<dyn GraphStore>;

/// The embedding service client.
pub type AppEmbedder = Arc<dyn EmbeddingProvider>;

/// Root application context for dependency injection.
///
/// `#[derive(Context)]` generates a `FromRef` implementation for each field,
/// so services declare what they need and are built with [`Context::resolve`].
#[derive(ContextDerive, Clone)]
pub struct Context {
    pub store: AppStore,
    pub config: Arc<Config>,
    pub embedder: AppEmbedder,
}

impl Context {
    pub fn new(store: AppStore, config: Config, embedder: AppEmbedder) -> Self {
        Self {
            store,
            config: Arc::new(config),
            embedder,
        }
    }

    /// Validates `config`, opens the configured store and builds the embedder.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let store = open_store(&config).await?;
        let embedder: AppEmbedder = Arc::new(HttpEmbedder::new(&config.embedding)?);
        tracing::info!(backend = store.backend_name(), "Store ready");
        Ok(Self::new(store, config, embedder))
    }

    /// Builds a component from this context.
    pub fn resolve<T: FromRef<Self>>(&self) -> T {
        T::from_ref(self)
    }

    /// Releases the store. Call once at the end of every command.
    pub async fn close(&self) -> Result<(), AppError> {
        self.store.close().await
    }
}
