use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::CompanionConfig;
use crate::database::ProfileDatabase;
use crate::llm_client::LlmClient;
use crate::oracle::CompletionOracle;
use crate::profile::ProfileStore;
use crate::sentiment::SentimentScorer;
use crate::session::SessionController;

pub struct BackendRuntime {
    pub config: CompanionConfig,
    pub store: Arc<dyn ProfileStore>,
    pub controller: Arc<SessionController>,
}

/// Wires the store, oracle and scorer into a [`SessionController`].
///
/// Anything not supplied explicitly is built from the config: SQLite at
/// `database_path`, the chat-completions client, and the configured
/// sentiment scorer (VADER unless overridden).
pub struct BackendRuntimeBuilder {
    config: CompanionConfig,
    store: Option<Arc<dyn ProfileStore>>,
    oracle: Option<Arc<dyn CompletionOracle>>,
    scorer: Option<Arc<dyn SentimentScorer>>,
}

impl BackendRuntimeBuilder {
    pub fn new(config: CompanionConfig) -> Self {
        Self {
            config,
            store: None,
            oracle: None,
            scorer: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn CompletionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn SentimentScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn build(self) -> Result<BackendRuntime> {
        let config = self.config;

        let store: Arc<dyn ProfileStore> = match self.store {
            Some(store) => store,
            None => {
                let db = ProfileDatabase::new(&config.database_path).with_context(|| {
                    format!("Failed to open profile database at {}", config.database_path)
                })?;
                tracing::info!(
                    "Profile database ready at {} ({} profile(s))",
                    config.database_path,
                    db.count_profiles().unwrap_or(0)
                );
                Arc::new(db)
            }
        };

        let oracle: Arc<dyn CompletionOracle> = match self.oracle {
            Some(oracle) => oracle,
            None => Arc::new(build_llm_client(&config)?),
        };

        let scorer: Arc<dyn SentimentScorer> = match self.scorer {
            Some(scorer) => scorer,
            None => {
                tracing::info!("Classifying messages with the {:?} scorer", config.sentiment_scorer);
                config.sentiment_scorer.build()
            }
        };

        let controller = Arc::new(SessionController::new(
            &config,
            store.clone(),
            oracle,
            scorer,
        ));

        Ok(BackendRuntime {
            config,
            store,
            controller,
        })
    }
}

impl BackendRuntime {
    pub fn bootstrap(config: CompanionConfig) -> Result<Self> {
        BackendRuntimeBuilder::new(config).build()
    }
}

fn build_llm_client(config: &CompanionConfig) -> Result<LlmClient> {
    let api_key = config.llm_api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("No LLM API key configured; requests to {} are unauthenticated", config.llm_api_url);
    }

    let client = LlmClient::with_timeout(
        config.llm_api_url.clone(),
        api_key,
        config.llm_model.clone(),
        config.llm_timeout(),
    )
    .context("Failed to build LLM client")?;

    tracing::info!(
        "Using model '{}' at {} (timeout {:?})",
        client.model(),
        config.llm_api_url,
        config.llm_timeout()
    );
    Ok(client)
}
