//! Content modules.
//!
//! A rule set (a core rulebook, a supplement) is a [`RulesModule`]: a set of
//! choice tables plus an optional hook for rules the attribute strings
//! cannot express. [`ModuleLoader`] loads modules into a [`RuleEngine`] in
//! dependency order and hands each module the tables its dependencies
//! exported.

use crate::choice::ChoiceType;
use crate::engine::RuleEngine;
use crate::error::RuleError;
use crate::rule::ChoiceId;
use crate::table::ChoiceTable;
use std::collections::BTreeMap;

/// Merged tables of one module, by choice type.
pub type Tables = BTreeMap<ChoiceType, ChoiceTable>;

/// Order in which choice types are registered: combat equipment, magic,
/// identity, then talents. Goodies work on everything else and go last.
pub const LOAD_ORDER: [ChoiceType; 16] = [
    ChoiceType::Armor,
    ChoiceType::Shield,
    ChoiceType::Weapon,
    ChoiceType::School,
    ChoiceType::Spell,
    ChoiceType::Background,
    ChoiceType::Class,
    ChoiceType::Deity,
    ChoiceType::Path,
    ChoiceType::Race,
    ChoiceType::Feat,
    ChoiceType::Feature,
    ChoiceType::Language,
    ChoiceType::Skill,
    ChoiceType::Tool,
    ChoiceType::Goody,
];

/// A loadable rule set.
pub trait RulesModule {
    fn name(&self) -> &str;

    /// Modules that must be loaded first.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// This module's tables. `exports` holds the merged tables of every
    /// module loaded so far, keyed by module name, so a supplement can
    /// layer patches over its base.
    fn tables(&self, exports: &BTreeMap<String, Tables>) -> Tables;

    /// Rules installed before any table, such as ability and combat rules.
    fn install_core(&self, _engine: &mut RuleEngine) {}

    /// Bespoke rules for one choice, called right after it is registered.
    /// Rules added here are retracted with the choice.
    fn rules_extra(
        &self,
        _engine: &mut RuleEngine,
        _kind: ChoiceType,
        _name: &str,
    ) -> Result<(), RuleError> {
        Ok(())
    }
}

/// Loads modules and remembers what each exported.
#[derive(Debug, Default)]
pub struct ModuleLoader {
    loaded: Vec<String>,
    exports: BTreeMap<String, Tables>,
}

impl ModuleLoader {
    /// Create a loader with nothing loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one module.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine receiving the module's choices and rules
    /// * `module` - Module to load; its `requires` must already be loaded
    ///
    /// # Returns
    ///
    /// The number of choices registered. Returns the number of choices registered.
    ///
    /// Fails without touching the engine if a required module has not been
    /// loaded. A failing `rules_extra` is logged and loading continues.
    pub fn load(&mut self, engine: &mut RuleEngine, module: &dyn RulesModule) -> Result<usize, RuleError> {
        for required in module.requires() {
            if !self.loaded.contains(&required) {
                return Err(RuleError::MissingModule {
                    module: module.name().to_string(),
                    requires: required,
                });
            }
        }
        let tables = module.tables(&self.exports);
        tracing::debug!(module = module.name(), "loading rules");
        module.install_core(engine);

        let mut count = 0;
        for kind in LOAD_ORDER {
            let Some(table) = tables.get(&kind) else {
                continue;
            };
            for (name, attrs) in table.iter() {
                engine.choice_rules(kind, name, attrs);
                let origin = ChoiceId::new(kind.as_str(), name);
                let extra = engine.with_origin(origin, |e| module.rules_extra(e, kind, name));
                if let Err(err) = extra {
                    tracing::warn!(module = module.name(), kind = %kind, name, error = %err, "extra rules failed");
                }
                count += 1;
            }
        }
        self.loaded.push(module.name().to_string());
        self.exports.insert(module.name().to_string(), tables);
        Ok(count)
    }

    /// Check if a module of this name has been loaded.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.iter().any(|n| n == name)
    }

    pub fn loaded(&self) -> &[String] {
        &self.loaded
    }

    /// The merged tables a loaded module exported to its dependents.
    pub fn exports(&self, name: &str) -> Option<&Tables> {
        self.exports.get(name)
    }
}
