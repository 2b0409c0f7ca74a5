//! # rulegraph - Deterministic Rule-Graph Engine for Character Builders
//!
//! A rules engine for tabletop RPG character sheets that provides:
//! - **Declarative** rules (`target op= source` edges with optional formulas)
//! - **Deterministic** evaluation (same rules and input → same sheet)
//! - **String-driven** content (`"1:Skill Proficiency (Choose 2 from any)"`)
//! - **Constraint repair** and randomization bounded by fixed budgets
//!
//! ## Core Concepts
//!
//! ### Evaluation Pipeline
//!
//! ```text
//! [Attributes] → [RuleEngine::apply_rules] → [Attributes snapshot]
//!                      ↑                             ↓
//!             [choice_rules]             [validationNotes.* / sanityNotes.*]
//!                                                    ↓
//!                                  [make_valid / randomize_one_attribute]
//! ```
//!
//! 1. **Content** registers choices; each choice compiles to rules
//! 2. **Evaluation** walks the rule graph in dependency order
//! 3. **Validation** results are ordinary derived attributes
//! 4. **Repair** and the **randomizer** edit inputs and evaluate again
//!
//! ### Key Features
//!
//! - **Dependency Graph**: strongly connected components in topological order
//! - **Cycle Tolerance**: cyclic rules read last-known values and are logged
//! - **Reversibility**: every rule remembers the choice that added it
//! - **Layered Tables**: supplements patch their base rule set's tables
//! - **Debug-Friendly**: [`RuleEngine::explain`] lists every contribution
//!
//! ## Example
//!
//! ```rust
//! use rulegraph::{core_rules, Attributes, ChoiceType, RuleEngine};
//!
//! let mut engine = RuleEngine::new();
//! core_rules(&mut engine);
//! engine.choice_rules(ChoiceType::Feat, "Tough", "");
//! engine.choice_rules(
//!     ChoiceType::Feature,
//!     "Tough",
//!     r#"Section=combat Note="+%V Hit Points""#,
//! );
//! engine
//!     .define_rule("combatNotes.tough", "level", "=", Some("2 * source"))
//!     .unwrap();
//!
//! let mut character = Attributes::new();
//! character.set("feats.Tough", 1);
//! character.set("level", 5);
//! let sheet = engine.apply_rules(&character);
//! assert_eq!(sheet.number("combatNotes.tough"), Some(10.0));
//! ```
//!
//! ## Modules
//!
//! - [`attr_key`] - Attribute names
//! - [`value`] / [`attributes`] - Attribute values and the attribute store
//! - [`formula`] / [`formula_parser`] - Rule formulas
//! - [`rule`] / [`graph`] / [`engine`] - Rules, the rule graph and evaluation
//! - [`attr_table`] / [`note_grammar`] / [`feature_list`] - Content string parsing
//! - [`requirement`] / [`constraint`] - Prerequisites and allocation budgets
//! - [`choice`] - Choice registration
//! - [`core_rules`] - Ability, combat and allocation rules
//! - [`table`] / [`ruleset`] - Content tables and modules
//! - [`repair`] / [`randomizer`] - Constraint repair and random generation
//! - [`config`] - Engine configuration
//! - [`error`] - Error types

pub mod attr_key;
pub mod attr_table;
pub mod attributes;
pub mod choice;
pub mod config;
pub mod constraint;
pub mod core_rules;
pub mod engine;
pub mod error;
pub mod feature_list;
pub mod formula;
pub mod formula_parser;
pub mod graph;
pub mod note_grammar;
pub mod randomizer;
pub mod repair;
pub mod requirement;
pub mod resolved;
pub mod rule;
pub mod ruleset;
pub mod table;
pub mod value;

// Re-export main types for convenience
pub use attr_key::AttrKey;
pub use attributes::Attributes;
pub use choice::{Choice, ChoiceType};
pub use config::EngineConfig;
pub use core_rules::core_rules;
pub use engine::RuleEngine;
pub use error::RuleError;
pub use formula::Formula;
pub use resolved::Breakdown;
pub use rule::{ChoiceId, Operator, Rule};
pub use value::Value;

// Re-export repair and randomization
pub use randomizer::{randomize_one_attribute, RandomAttr};
pub use repair::{make_valid, Fix, RepairReport};

// Re-export content loading
pub use ruleset::{ModuleLoader, RulesModule};
pub use table::{ChoiceTable, LayeredTable, Patch};
