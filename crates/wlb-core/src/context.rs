use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono_tz::Tz;
use tracing::{debug, info};

use crate::collection::Collection;
use crate::config::Config;
use crate::datetime::resolve_timezone;
use crate::identity::{IdentityProvider, LocalIdentity, SessionIdentity};
use crate::render::Renderer;
use crate::store::{Backend, LocalStore, MemoryStore, RemoteStore, SharedStore};
use crate::theme::{Theme, ThemePreference};

/// Everything a command needs, built once at startup and torn down with
/// [`AppContext::shutdown`].
pub struct AppContext {
    pub config: Config,
    pub data_dir: PathBuf,
    pub tz: Tz,
    pub theme: Theme,
    pub theme_pref: ThemePreference,
    pub identity: Arc<dyn IdentityProvider>,
    pub collection: Arc<Collection>,
    pub renderer: Renderer,
}

impl AppContext {
    #[tracing::instrument(skip(config, data_dir))]
    pub fn init(config: Config, data_dir: PathBuf) -> anyhow::Result<Self> {
        let tz = resolve_timezone(config.get("timezone").as_deref());
        let theme_pref = ThemePreference::new(&data_dir);
        let theme = theme_pref.load();
        let backend = config.backend()?;

        let (store, identity): (SharedStore, Arc<dyn IdentityProvider>) = match backend {
            Backend::Local => {
                let store = LocalStore::open(&data_dir)
                    .with_context(|| format!("failed to open local store in {}", data_dir.display()))?;
                (Arc::new(store), Arc::new(LocalIdentity::new()))
            }
            Backend::Memory => (Arc::new(MemoryStore::new()), Arc::new(LocalIdentity::new())),
            Backend::Remote => {
                let remote = config.remote()?;
                let session = SessionIdentity::open(&data_dir, remote.clone())
                    .context("failed to open session")?;
                (Arc::new(RemoteStore::new(remote)?), Arc::new(session))
            }
        };

        let renderer = Renderer::new(&config, tz, theme)?;
        let collection = Arc::new(Collection::new(store, Arc::clone(&identity)));

        info!(
            backend = ?backend,
            timezone = %tz,
            theme = %theme,
            data_dir = %data_dir.display(),
            "initialized application context"
        );

        Ok(Self {
            config,
            data_dir,
            tz,
            theme,
            theme_pref,
            identity,
            collection,
            renderer,
        })
    }

    pub fn set_theme(&mut self, theme: Theme) -> anyhow::Result<()> {
        self.theme_pref.save(theme)?;
        self.theme = theme;
        self.renderer = Renderer::new(&self.config, self.tz, theme)?;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.collection.close();
        debug!("application context shut down");
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.collection.close();
    }
}
