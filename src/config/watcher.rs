//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;
use crate::routing::{self, ResolveError, SharedTable};

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ProxyConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ProxyConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(new_config) => {
                            let _ = tx.send(new_config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current forwarders");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Resolve `config` and swap the result into `table`.
///
/// On error the current table is left in place.
pub fn reload(table: &SharedTable, config: &ProxyConfig) -> Result<usize, ResolveError> {
    let resolved = routing::resolve(&config.forwarders)?;
    let count = resolved.len();
    table.store(resolved.into());
    Ok(count)
}

/// Apply configurations from `updates` until the sender side is dropped.
pub async fn apply_updates(mut updates: mpsc::UnboundedReceiver<ProxyConfig>, table: SharedTable) {
    while let Some(config) = updates.recv().await {
        match reload(&table, &config) {
            Ok(forwarders) => tracing::info!(forwarders, "Forwarders reloaded"),
            Err(e) => tracing::error!(error = %e, "Failed to resolve reloaded config, keeping current forwarders"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_config;

    fn config(extra: &str) -> ProxyConfig {
        parse_config(
            &format!(
                r#"
                [forwarders.base]
                host = "backend.local"

                {extra}
                "#
            ),
            false,
        )
        .unwrap()
    }

    #[test]
    fn reload_swaps_table() {
        let table = routing::shared(routing::resolve(&config("[forwarders.api]").forwarders).unwrap());
        assert!(table.load().get("web").is_none());

        let count = reload(&table, &config("[forwarders.api]\n[forwarders.web]\nport = 8080")).unwrap();
        assert_eq!(count, 2);
        assert_eq!(table.load().get("web").unwrap().port, 8080);
    }

    #[test]
    fn failed_reload_keeps_current_table() {
        let table = routing::shared(routing::resolve(&config("[forwarders.api]").forwarders).unwrap());

        let broken = config("[forwarders.web]\nuse_expression = \"request.path ===\"");
        assert!(reload(&table, &broken).is_err());
        assert!(table.load().get("api").is_some());
        assert!(table.load().get("web").is_none());
    }

    #[tokio::test]
    async fn apply_updates_consumes_channel() {
        let table = routing::shared(routing::resolve(&config("[forwarders.api]").forwarders).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(config("[forwarders.web]")).unwrap();
        drop(tx);

        apply_updates(rx, table.clone()).await;
        assert!(table.load().get("web").is_some());
        assert!(table.load().get("api").is_none());
    }
}
