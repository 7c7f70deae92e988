use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{Result, TelefeedError};
use crate::config::Config;
use crate::fetcher::{HttpFetcher, PageFetcher};
use crate::notifier::{Notifier, TelegramNotifier};
use crate::scheduler::Ticker;
use crate::store::SqliteStore;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub notifier: Arc<dyn Notifier>,
    pub ticker: Arc<Ticker>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let db_path = match config.database.clone() {
            Some(p) => p,
            None => Self::default_db_path()?,
        };
        let store = Arc::new(SqliteStore::new(&db_path)?);
        Self::assemble(config, store)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::assemble(config, store)
    }

    fn assemble(config: Config, store: Arc<SqliteStore>) -> Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new());
        let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(&config.bot_token));
        let ticker = Arc::new(Ticker::new(
            store.clone(),
            fetcher,
            notifier.clone(),
            config.archive_posts,
        ));

        Ok(Self {
            config,
            store,
            notifier,
            ticker,
        })
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| TelefeedError::Config("Could not find data directory".into()))?;
        let telefeed_dir = data_dir.join("telefeed");
        std::fs::create_dir_all(&telefeed_dir)?;
        Ok(telefeed_dir.join("telefeed.db"))
    }
}
