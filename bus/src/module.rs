//! Module trait and process runner

use crate::bus::MessageBus;
use crate::context::Context;
use crate::MessageBounds;
use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use std::sync::Arc;
use tracing::info;

/// A unit of behavior wired onto the bus at process startup
#[async_trait]
pub trait Module<M: MessageBounds>: Send + Sync {
    /// Module name, also the config section the module reads
    fn name(&self) -> &'static str;

    /// One-line description for startup logs
    fn description(&self) -> &'static str;

    /// Wire subscriptions, handlers and background tasks
    async fn init(&self, context: Arc<Context<M>>, config: Arc<Config>) -> Result<()>;
}

/// Extract a module's config section as a standalone Config
/// Missing sections yield an empty config so every key falls back to its
/// DEFAULT_* constant
pub fn module_config(config: &Config, name: &str) -> Arc<Config> {
    let mut builder = Config::builder();
    if let Ok(table) = config.get_table(name) {
        for (key, value) in table {
            if let Ok(updated) = builder.clone().set_default(&key, value) {
                builder = updated;
            }
        }
    }
    Arc::new(builder.build().unwrap_or_default())
}

/// A process: a bus plus the modules registered on it
pub struct Process<M: MessageBounds> {
    context: Arc<Context<M>>,
    config: Arc<Config>,
    modules: Vec<Arc<dyn Module<M>>>,
}

impl<M: MessageBounds> Process<M> {
    pub fn create(config: Arc<Config>) -> Self {
        Self {
            context: Context::new(Arc::new(MessageBus::new())),
            config,
            modules: Vec::new(),
        }
    }

    /// Register a module; initialisation happens in registration order
    pub fn register(&mut self, module: Arc<dyn Module<M>>) {
        self.modules.push(module);
    }

    /// The shared context, for callers embedding extra behavior
    pub fn context(&self) -> Arc<Context<M>> {
        self.context.clone()
    }

    /// Initialise every module, then run until interrupted
    pub async fn run(&mut self) -> Result<()> {
        for module in &self.modules {
            info!("Initialising module '{}': {}", module.name(), module.description());
            let section = module_config(&self.config, module.name());
            module.init(self.context.clone(), section).await?;
        }

        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
