//! Engine configuration.
//!
//! Tunables for the repair and randomizer loops plus the attribute names the
//! note grammar may adjust. Every field has a default, so a TOML file only
//! needs the values it changes.

use crate::error::RuleError;
use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// # Examples
///
/// ```rust
/// use rulegraph::EngineConfig;
///
/// let config = EngineConfig::from_toml_str("repair_passes = 4").unwrap();
/// assert_eq!(config.repair_passes, 4);
/// assert_eq!(config.random_retries, 20);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of repair passes.
    pub repair_passes: usize,
    /// Maximum random picks tried per randomizer step.
    pub random_retries: usize,
    /// Probability that level allocation picks a second class.
    pub multiclass_chance: f64,
    /// Upper bound for a randomly chosen character level.
    pub max_random_level: u32,
    /// Ability scores are never boosted past this value.
    pub ability_max: f64,
    /// Targets the numeric-adjustment grammar may write to even when no
    /// other rule targets them yet.
    pub adjustable_attributes: Vec<String>,
    pub genders: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            repair_passes: 8,
            random_retries: 20,
            multiclass_chance: 0.1,
            max_random_level: 20,
            ability_max: 20.0,
            adjustable_attributes: [
                "armorClass",
                "charisma",
                "constitution",
                "dexterity",
                "hitPoints",
                "initiative",
                "intelligence",
                "speed",
                "strength",
                "wisdom",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            genders: vec!["Female".to_string(), "Male".to_string()],
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `RuleError::Config` for malformed TOML or out-of-range
    /// values such as `repair_passes = 0`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use rulegraph::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml_str("multiclass_chance = 0.5").unwrap();
    /// assert_eq!(config.multiclass_chance, 0.5);
    /// assert_eq!(config.max_random_level, 20);
    /// assert!(EngineConfig::from_toml_str("max_random_level = 0").is_err());
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, RuleError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, RuleError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RuleError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), RuleError> {
        if !(0.0..=1.0).contains(&self.multiclass_chance) {
            return Err(RuleError::Config(format!(
                "multiclass_chance must be within 0..=1, got {}",
                self.multiclass_chance
            )));
        }
        if self.max_random_level == 0 {
            return Err(RuleError::Config("max_random_level must be at least 1".into()));
        }
        Ok(())
    }
}
