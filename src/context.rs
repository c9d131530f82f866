use spin_sdk::key_value::Store;

use crate::config::Config;
use crate::core::db::{DocumentStore, MemoryStore, SnapshotStore};
use crate::media::{MediaHost, StoreMediaHost};

/// Everything a handler may touch. Built once per process (native) or per
/// request (Spin component) and passed down explicitly.
pub struct AppContext<S, M> {
    pub store: S,
    pub media: M,
    pub config: Config,
}

impl<S: DocumentStore, M: MediaHost> AppContext<S, M> {
    pub fn new(store: S, media: M, config: Config) -> Self {
        Self {
            store,
            media,
            config,
        }
    }
}

pub type SpinStore = SnapshotStore<Store>;
pub type SpinContext = AppContext<SpinStore, StoreMediaHost<SpinStore>>;
pub type MemoryContext = AppContext<MemoryStore, StoreMediaHost<MemoryStore>>;

impl SpinContext {
    pub fn open_default(config: Config) -> anyhow::Result<Self> {
        let store = SnapshotStore::new(Store::open_default()?);
        let media = StoreMediaHost::new(store.clone(), config.media_base_url.clone());
        Ok(Self::new(store, media, config))
    }
}

impl MemoryContext {
    pub fn in_memory(config: Config) -> Self {
        let store = MemoryStore::new();
        let media = StoreMediaHost::new(store.clone(), config.media_base_url.clone());
        Self::new(store, media, config)
    }
}
