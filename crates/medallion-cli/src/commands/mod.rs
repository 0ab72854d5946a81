pub mod check;
pub mod compare;
pub mod init;
pub mod ledger;
pub mod load;

use std::path::PathBuf;

use anyhow::{Context, Result};
use medallion_engine::config::load_config;
use medallion_engine::config::types::StateBackendKind;
use medallion_engine::PipelineConfig;
use medallion_types::{Amount, AmountStats};

/// Global flags shared by every command.
pub struct Settings {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub database_url: Option<String>,
}

impl Settings {
    /// Build the pipeline configuration: file (or environment defaults),
    /// then global flag overrides, then `adjust` for command flags.
    /// Validation runs last so overrides are checked too.
    pub fn resolve(&self, adjust: impl FnOnce(&mut PipelineConfig)) -> Result<PipelineConfig> {
        load_config(self.config.as_deref(), |config| {
            if let Some(url) = &self.database_url {
                config.state.backend = StateBackendKind::Postgres;
                config.state.connection = Some(url.clone());
            } else if let Some(db) = &self.db {
                config.state.backend = StateBackendKind::Sqlite;
                config.state.path = Some(db.clone());
            }
            adjust(config);
        })
        .with_context(|| match &self.config {
            Some(path) => format!("Failed to load config: {}", path.display()),
            None => "Invalid configuration".to_string(),
        })
    }
}

pub(crate) fn amount_or_na(amount: Option<&Amount>) -> String {
    amount.map_or_else(|| "n/a".to_string(), ToString::to_string)
}

pub(crate) fn print_stats(indent: &str, stats: &AmountStats) {
    println!("{indent}count: {}", stats.count);
    println!("{indent}avg:   {}", amount_or_na(stats.average().as_ref()));
    println!("{indent}min:   {}", amount_or_na(stats.min.as_ref()));
    println!("{indent}max:   {}", amount_or_na(stats.max.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use medallion_engine::ChunkSize;

    fn settings(config: Option<PathBuf>) -> Settings {
        Settings {
            config,
            db: None,
            database_url: None,
        }
    }

    #[test]
    fn db_flag_selects_sqlite_path() {
        let mut s = settings(None);
        s.db = Some(PathBuf::from("/tmp/layers.db"));
        let config = s.resolve(|_| {}).unwrap();
        assert_eq!(config.state.backend, StateBackendKind::Sqlite);
        assert_eq!(config.state.sqlite_path(), PathBuf::from("/tmp/layers.db"));
    }

    #[test]
    fn database_url_flag_wins_over_db() {
        let mut s = settings(None);
        s.db = Some(PathBuf::from("/tmp/layers.db"));
        s.database_url = Some("host=localhost user=medallion".into());
        let config = s.resolve(|_| {}).unwrap();
        assert_eq!(config.state.backend, StateBackendKind::Postgres);
        assert_eq!(
            config.state.connection.as_deref(),
            Some("host=localhost user=medallion")
        );
    }

    #[test]
    fn config_file_is_loaded_then_adjusted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.yaml");
        std::fs::write(&path, "chunk_size: 3\nsource:\n  data_dir: feeds\n").unwrap();

        let config = settings(Some(path))
            .resolve(|c| c.source.exclude.push("validation.csv".into()))
            .unwrap();
        assert_eq!(config.chunk_size, ChunkSize::Fixed(3));
        assert_eq!(config.source.data_dir, PathBuf::from("feeds"));
        assert_eq!(config.source.exclude, ["validation.csv"]);
    }

    #[test]
    fn adjusted_config_is_validated() {
        let err = settings(None)
            .resolve(|c| c.source.exclude.push("  ".into()))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid configuration");
        assert!(format!("{err:#}").contains("validation failed"));
    }

    #[test]
    fn absent_amounts_render_as_na() {
        assert_eq!(amount_or_na(None), "n/a");
        let amount: Amount = "2.50".parse().unwrap();
        assert_eq!(amount_or_na(Some(&amount)), "2.50");
    }
}
