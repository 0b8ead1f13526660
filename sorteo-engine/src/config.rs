use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisConfig;
use crate::learning::LearningConfig;
use crate::tickets::PrizeConfig;
use crate::validation::ValidationConfig;

pub const DEFAULT_CONFIG_FILE: &str = "sorteo.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analysis: AnalysisConfig,
    pub validation: ValidationConfig,
    pub learning: LearningConfig,
    pub prizes: PrizeConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Lecture de la configuration {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&json)
            .with_context(|| format!("Configuration invalide : {}", path.display()))?;
        Ok(config)
    }

    /// Fichier absent = configuration par défaut.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("{} absent, configuration par défaut", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Écriture de {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::CutStrategy;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "learning": { "cut": "sequential", "pace_ms": 250 } }"#).unwrap();
        assert_eq!(config.learning.cut, CutStrategy::Sequential);
        assert_eq!(config.learning.pace_ms, 250);
        assert_eq!(config.learning.voter_batch, 10);
        assert_eq!(config.validation.trials, 500);
        assert_eq!(config.analysis.entropy_window, 50);
        assert_eq!(config.prizes.tickets, 15);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("sorteo_config_{}.json", std::process::id()));
        let mut config = EngineConfig::default();
        config.validation.seed = 20240611;
        config.save(&path).unwrap();
        let loaded = EngineConfig::load_or_default(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.validation.seed, 20240611);
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = EngineConfig::load_or_default(Path::new("/nonexistent/sorteo.json")).unwrap();
        assert_eq!(config.learning.max_past, 500);
    }
}
