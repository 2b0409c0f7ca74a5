use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rulegraph::table::{LayeredTable, Patch};
use rulegraph::*;
use std::collections::BTreeMap;

/// A small but complete rule set: core rules, one class, one background,
/// a handful of feats and skills.
fn srd_engine() -> RuleEngine {
    let mut engine = RuleEngine::new();
    core_rules(&mut engine);
    for (skill, ability) in [
        ("Arcana", "intelligence"),
        ("History", "intelligence"),
        ("Insight", "wisdom"),
        ("Religion", "intelligence"),
    ] {
        engine.choice_rules(ChoiceType::Skill, skill, &format!("Ability={}", ability));
    }
    for language in ["Common", "Dwarvish", "Elvish"] {
        engine.choice_rules(ChoiceType::Language, language, "");
    }
    engine.choice_rules(
        ChoiceType::Background,
        "Acolyte",
        r#"Features="1:Skill Proficiency (Insight/Religion)","1:Shelter Of The Faithful" Languages=any,any"#,
    );
    engine.choice_rules(
        ChoiceType::Class,
        "Wizard",
        r#"HitDie=d6 Features="1:Skill Proficiency (Choose 2 from Arcana, History, Insight, Religion)","1:Arcane Recovery""#,
    );
    engine.choice_rules(ChoiceType::Feat, "Tough", "");
    engine.choice_rules(ChoiceType::Feature, "Tough", r#"Section=combat Note="+%V Hit Points""#);
    engine
        .define_rule("combatNotes.tough", "level", "=", Some("2 * source"))
        .unwrap();
    engine.choice_rules(
        ChoiceType::Feat,
        "Defensive Duelist",
        r#"Require="dexterity >= 13""#,
    );
    engine
}

fn level_five_wizard() -> Attributes {
    let mut c = Attributes::new();
    c.set("background", "Acolyte");
    c.set("levels.Wizard", 5);
    c.set("constitution", 12);
    c.set("dexterity", 14);
    c.set("intelligence", 16);
    c.set("wisdom", 12);
    c
}

/// Feat grants a feature whose note value feeds hit points.
#[test]
fn test_tough_feat() {
    let engine = srd_engine();
    let mut c = level_five_wizard();
    c.set("feats.Tough", 1);
    let sheet = engine.apply_rules(&c);

    assert_eq!(sheet.number("level"), Some(5.0));
    assert_eq!(sheet.number("features.Tough"), Some(1.0));
    assert_eq!(sheet.number("combatNotes.tough"), Some(10.0));
    // +1 Con modifier per level, plus Tough
    assert_eq!(sheet.number("hitPoints"), Some(15.0));

    c.remove("feats.Tough");
    let sheet = engine.apply_rules(&c);
    assert!(sheet.get("combatNotes.tough").is_none());
    assert_eq!(sheet.number("hitPoints"), Some(5.0));
}

/// A "Choose" grant raises the budget without granting anything itself.
#[test]
fn test_choose_grant_only_raises_budget() {
    let engine = srd_engine();
    let sheet = engine.apply_rules(&level_five_wizard());

    assert_eq!(sheet.number("skillChoiceCount"), Some(2.0));
    assert!(sheet.get("skillProficiency.Arcana").is_none());
    assert_eq!(sheet.number("validationNotes.skillChoiceAllocation"), Some(-2.0));
}

/// Fixed grants set the proficiency directly.
#[test]
fn test_direct_grant() {
    let engine = srd_engine();
    let sheet = engine.apply_rules(&level_five_wizard());

    assert_eq!(sheet.number("skillProficiency.Insight"), Some(1.0));
    assert_eq!(sheet.number("skillProficiency.Religion"), Some(1.0));
    // wisdom 12 (+1) plus proficiency bonus 3
    assert_eq!(sheet.number("skillModifier.Insight"), Some(4.0));
    assert_eq!(sheet.number("features.Shelter Of The Faithful"), Some(1.0));
    assert_eq!(sheet.number("languageChoiceCount"), Some(2.0));
}

#[test]
fn test_choosing_skills_grants_them() {
    let engine = srd_engine();
    let mut c = level_five_wizard();
    c.set("skillsChosen.Arcana", 1);
    c.set("skillsChosen.History", 1);
    let sheet = engine.apply_rules(&c);

    assert_eq!(sheet.number("skillProficiency.Arcana"), Some(1.0));
    assert_eq!(sheet.number("skillModifier.Arcana"), Some(6.0));
    assert_eq!(sheet.number("validationNotes.skillChoiceAllocation"), Some(0.0));
}

/// Removing a choice leaves the engine as if it had never been registered.
#[test]
fn test_remove_choice_restores_sheet() {
    let mut engine = srd_engine();
    let c = {
        let mut c = level_five_wizard();
        c.set("feats.Grappler", 1);
        c.set("strength", 15);
        c
    };
    let before = engine.apply_rules(&c);
    let rule_count = engine.rules().len();

    engine.choice_rules(ChoiceType::Feat, "Grappler", r#"Require="strength >= 13""#);
    engine.choice_rules(ChoiceType::Feature, "Grappler", r#"Section=combat Note="+1 Armor Class""#);
    let with = engine.apply_rules(&c);
    assert_eq!(with.number("validationNotes.grapplerFeat"), Some(0.0));
    assert_eq!(with.number("armorClass"), Some(before.number("armorClass").unwrap() + 1.0));

    assert!(engine.remove_choice(ChoiceType::Feature, "Grappler"));
    assert!(engine.remove_choice(ChoiceType::Feat, "Grappler"));
    assert!(!engine.remove_choice(ChoiceType::Feat, "Grappler"));
    assert_eq!(engine.rules().len(), rule_count);
    assert_eq!(engine.apply_rules(&c), before);
}

/// Registering the same choice twice is the same as registering it once.
#[test]
fn test_reregistration_is_idempotent() {
    let mut engine = srd_engine();
    let rule_count = engine.rules().len();
    let mut c = level_five_wizard();
    c.set("feats.Tough", 1);
    let before = engine.apply_rules(&c);

    engine.choice_rules(ChoiceType::Feat, "Tough", "");
    engine.choice_rules(ChoiceType::Feature, "Tough", r#"Section=combat Note="+%V Hit Points""#);
    assert_eq!(engine.rules().len(), rule_count);
    assert_eq!(engine.apply_rules(&c), before);
}

/// Removing the only feat of a new type drops that type's allocation.
#[test]
fn test_remove_feat_of_new_type() {
    let fresh = srd_engine();
    let mut engine = srd_engine();
    let mut c = level_five_wizard();
    c.set("featCount.Fancy", 1);

    engine.choice_rules(ChoiceType::Feat, "Shiny", "Type=Fancy");
    let with = engine.apply_rules(&c);
    assert_eq!(with.number("validationNotes.fancyFeatAllocation"), Some(-1.0));

    assert!(engine.remove_choice(ChoiceType::Feat, "Shiny"));
    let after = engine.apply_rules(&c);
    assert!(after.get("validationNotes.fancyFeatAllocation").is_none());
    assert_eq!(after, fresh.apply_rules(&c));
    assert_eq!(engine.rules().len(), fresh.rules().len());
    assert!(repair::violations(&after)
        .iter()
        .all(|note| note.as_str() != "validationNotes.fancyFeatAllocation"));
}

/// A pool option named by two choices survives the removal of either one.
#[test]
fn test_remove_choice_keeps_shared_pool_member() {
    let scholar = r#"Section=skill Note="Skill Proficiency (Choose 1 from Arcana)""#;
    let mut c = Attributes::new();
    c.set("skillsChosen.Arcana", 1);
    c.set("skillChoiceCount", 1);

    let mut fresh = RuleEngine::new();
    core_rules(&mut fresh);
    fresh.choice_rules(ChoiceType::Skill, "Arcana", "Ability=intelligence");

    let mut engine = RuleEngine::new();
    core_rules(&mut engine);
    engine.choice_rules(ChoiceType::Feature, "Scholar", scholar);
    engine.choice_rules(ChoiceType::Skill, "Arcana", "Ability=intelligence");
    assert!(engine.remove_choice(ChoiceType::Feature, "Scholar"));

    let sheet = engine.apply_rules(&c);
    assert_eq!(sheet.number("skillProficiency.Arcana"), Some(1.0));
    assert_eq!(sheet.number("validationNotes.skillChoiceAllocation"), Some(0.0));
    assert_eq!(sheet, fresh.apply_rules(&c));
}

/// Repair either raises dexterity or gives up the feat.
#[test]
fn test_repair_defensive_duelist() {
    let engine = srd_engine();
    for seed in 0..10 {
        let mut c = level_five_wizard();
        c.set("dexterity", 10);
        c.set("feats.Defensive Duelist", 1);
        c.set("featCount.General", 1);
        c.set("skillsChosen.Arcana", 1);
        c.set("skillsChosen.History", 1);

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let report = make_valid(&engine, &mut c, &mut rng);
        let sheet = engine.apply_rules(&c);
        let raised = c.number("dexterity").unwrap_or(0.0) >= 13.0;
        let dropped = !c.truthy("feats.Defensive Duelist");
        assert!(raised || dropped);
        assert!(sheet.get("validationNotes.defensiveDuelistFeat").map_or(true, |v| v.as_number() == Some(0.0)));
        // the two open language slots are filled along the way
        assert!(report.is_valid());
        assert_eq!(c.sum_prefix("languagesChosen"), 2.0);
        assert!(report.passes <= engine.config().repair_passes);
    }
}

/// The note value is the number of unmet clauses.
#[test]
fn test_requirement_note_counts_unmet_clauses() {
    let mut engine = RuleEngine::new();
    engine.choice_rules(
        ChoiceType::Feat,
        "Heavy Armor Master",
        r#"Require="strength >= 13","armorProficiency.Heavy""#,
    );
    let mut c = Attributes::new();
    c.set("feats.Heavy Armor Master", 1);
    c.set("strength", 10);
    assert_eq!(engine.apply_rules(&c).number("validationNotes.heavyArmorMasterFeat"), Some(2.0));
    c.set("strength", 13);
    assert_eq!(engine.apply_rules(&c).number("validationNotes.heavyArmorMasterFeat"), Some(1.0));
    c.set("armorProficiency.Heavy", 1);
    assert_eq!(engine.apply_rules(&c).number("validationNotes.heavyArmorMasterFeat"), Some(0.0));
}

#[test]
fn test_explain_lists_contributions() {
    let engine = srd_engine();
    let mut c = level_five_wizard();
    c.set("feats.Tough", 1);
    let breakdown = engine.explain(&c, &AttrKey::new("hitPoints"));
    assert_eq!(breakdown.value, Some(Value::from(15.0)));
    assert_eq!(breakdown.contributions.len(), 2);
    assert!(breakdown.to_string().contains("hitPoints"));
}

#[test]
fn test_cycles_terminate() {
    let mut engine = RuleEngine::new();
    engine.define_rule("a", "b", "+", Some("source + 1")).unwrap();
    engine.define_rule("b", "a", "+", Some("source + 1")).unwrap();
    assert_eq!(engine.graph().cycles().len(), 1);

    let mut c = Attributes::new();
    c.set("a", 1);
    let first = engine.apply_rules(&c);
    assert_eq!(first, engine.apply_rules(&c));
}

struct Core;

impl RulesModule for Core {
    fn name(&self) -> &str {
        "Core"
    }

    fn tables(&self, _exports: &BTreeMap<String, rulegraph::ruleset::Tables>) -> rulegraph::ruleset::Tables {
        let mut tables = rulegraph::ruleset::Tables::new();
        tables.insert(
            ChoiceType::Race,
            [
                ("Hill Dwarf", r#"Features="1:Dwarven Toughness""#),
                ("High Elf", r#"Features="1:Elf Weapon Training""#),
            ]
            .into_iter()
            .collect(),
        );
        tables.insert(
            ChoiceType::Feature,
            [("Dwarven Toughness", r#"Section=combat Note="+%V Hit Points""#)]
                .into_iter()
                .collect(),
        );
        tables
    }

    fn install_core(&self, engine: &mut RuleEngine) {
        core_rules(engine);
    }

    fn rules_extra(&self, engine: &mut RuleEngine, kind: ChoiceType, name: &str) -> Result<(), RuleError> {
        if kind == ChoiceType::Feature && name == "Dwarven Toughness" {
            engine.define_rule("combatNotes.dwarvenToughness", "level", "=", None)?;
        }
        Ok(())
    }
}

struct Expansion;

impl RulesModule for Expansion {
    fn name(&self) -> &str {
        "Expansion"
    }

    fn requires(&self) -> Vec<String> {
        vec!["Core".to_string()]
    }

    fn tables(&self, exports: &BTreeMap<String, rulegraph::ruleset::Tables>) -> rulegraph::ruleset::Tables {
        let races = exports
            .get("Core")
            .and_then(|t| t.get(&ChoiceType::Race))
            .cloned()
            .unwrap_or_default();
        let mut layered = LayeredTable::new([("Wood Elf", r#"Features="1:Mask Of The Wild""#)].into_iter().collect());
        layered
            .patch(Patch::AppendToList {
                name: "Hill Dwarf".into(),
                key: "Features".into(),
                items: vec!["1:Stonecunning".into()],
            })
            .patch(Patch::Remove { name: "High Elf".into() });
        let mut tables = rulegraph::ruleset::Tables::new();
        tables.insert(ChoiceType::Race, layered.on_top_of(&races));
        tables
    }
}

#[test]
fn test_modules_layer_tables() {
    let mut engine = RuleEngine::new();
    let mut loader = ModuleLoader::new();
    loader.load(&mut engine, &Core).unwrap();
    loader.load(&mut engine, &Expansion).unwrap();

    assert_eq!(
        engine.choice_names(ChoiceType::Race),
        vec!["High Elf".to_string(), "Hill Dwarf".to_string(), "Wood Elf".to_string()]
    );
    let mut c = Attributes::new();
    c.set("race", "Hill Dwarf");
    c.set("level", 3);
    let sheet = engine.apply_rules(&c);
    assert_eq!(sheet.number("features.Stonecunning"), Some(1.0));
    assert_eq!(sheet.number("combatNotes.dwarvenToughness"), Some(3.0));
    assert_eq!(sheet.number("hitPoints"), Some(3.0));

    // the expansion's table no longer lists High Elf
    let exported = loader.exports("Expansion").unwrap();
    assert!(!exported[&ChoiceType::Race].contains("High Elf"));
}

#[test]
fn test_config_from_toml() {
    let config = EngineConfig::from_toml_str("repair_passes = 1\n").unwrap();
    let mut engine = RuleEngine::with_config(config);
    engine.choice_rules(ChoiceType::Feat, "Alert", "");
    let mut c = Attributes::new();
    c.set("featCount.General", 3);
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let report = make_valid(&engine, &mut c, &mut rng);
    assert_eq!(report.passes, 1);
    // only one feat exists, so two slots stay open
    assert!(!report.is_valid());
}

#[test]
fn test_attributes_json() {
    let mut c = level_five_wizard();
    c.set("feats.Tough", 1);
    let json = c.to_json().unwrap();
    assert_eq!(Attributes::from_json(&json).unwrap(), c);
}

fn arb_character() -> impl Strategy<Value = Attributes> {
    (
        3u32..=20,
        3u32..=20,
        1u32..=20,
        proptest::bool::ANY,
        proptest::bool::ANY,
        proptest::option::of(prop_oneof![Just("Arcana"), Just("History"), Just("Insight")]),
    )
        .prop_map(|(dex, con, level, tough, duelist, skill)| {
            let mut c = Attributes::new();
            c.set("dexterity", dex);
            c.set("constitution", con);
            c.set("levels.Wizard", level);
            c.set("background", "Acolyte");
            if tough {
                c.set("feats.Tough", 1);
            }
            if duelist {
                c.set("feats.Defensive Duelist", 1);
            }
            if let Some(skill) = skill {
                c.set(AttrKey::scoped("skillsChosen", skill), 1);
            }
            c
        })
}

/// Choices whose rules overlap through shared budgets and pool options.
const OVERLAPPING: [(ChoiceType, &str, &str); 8] = [
    (ChoiceType::Skill, "Arcana", "Ability=intelligence"),
    (ChoiceType::Skill, "History", "Ability=intelligence"),
    (
        ChoiceType::Feature,
        "Scholar",
        r#"Section=skill Note="Skill Proficiency (Choose 1 from Arcana, History)""#,
    ),
    (ChoiceType::Feat, "Shiny", "Type=Fancy"),
    (ChoiceType::Feat, "Glossy", "Type=Fancy"),
    (ChoiceType::Feat, "Keen Mind", r#"Type=General Require="intelligence >= 13""#),
    (ChoiceType::Language, "Elvish", ""),
    (
        ChoiceType::Background,
        "Sage",
        r#"Features="1:Skill Proficiency (Choose 2 from Arcana, History)" Languages=any"#,
    ),
];

fn overlapping_character() -> Attributes {
    let mut c = Attributes::new();
    c.set("background", "Sage");
    c.set("level", 1);
    c.set("intelligence", 14);
    c.set("features.Scholar", 1);
    c.set("featCount.Fancy", 1);
    c.set("featCount.General", 1);
    c.set("feats.Shiny", 1);
    c.set("feats.Keen Mind", 1);
    c.set("skillsChosen.Arcana", 1);
    c.set("skillsChosen.History", 1);
    c.set("languagesChosen.Elvish", 1);
    c
}

proptest! {
    #[test]
    fn prop_evaluation_is_deterministic(c in arb_character()) {
        let engine = srd_engine();
        let first = engine.apply_rules(&c);
        prop_assert_eq!(&first, &engine.apply_rules(&c));
        prop_assert_eq!(&first, &srd_engine().apply_rules(&c));
        prop_assert_eq!(first.number("level"), c.number("levels.Wizard"));
    }

    #[test]
    fn prop_repair_is_reproducible(c in arb_character(), seed in 0u64..1000) {
        let engine = srd_engine();
        let mut a = c.clone();
        let mut b = c;
        let ra = make_valid(&engine, &mut a, &mut ChaCha8Rng::seed_from_u64(seed));
        let rb = make_valid(&engine, &mut b, &mut ChaCha8Rng::seed_from_u64(seed));
        prop_assert_eq!(a, b);
        prop_assert_eq!(ra, rb);
    }

    #[test]
    fn prop_register_then_remove_matches_never_registered(
        registered in proptest::collection::vec(any::<bool>(), OVERLAPPING.len()),
        removed in proptest::collection::vec(any::<bool>(), OVERLAPPING.len()),
    ) {
        let mut engine = RuleEngine::new();
        core_rules(&mut engine);
        let mut fresh = RuleEngine::new();
        core_rules(&mut fresh);
        for (i, (kind, name, attrs)) in OVERLAPPING.iter().enumerate() {
            if registered[i] {
                engine.choice_rules(*kind, name, attrs);
                if !removed[i] {
                    fresh.choice_rules(*kind, name, attrs);
                }
            }
        }
        for (i, (kind, name, _)) in OVERLAPPING.iter().enumerate() {
            if registered[i] && removed[i] {
                prop_assert!(engine.remove_choice(*kind, name));
            }
        }
        let c = overlapping_character();
        prop_assert_eq!(engine.rules().len(), fresh.rules().len());
        prop_assert_eq!(engine.apply_rules(&c), fresh.apply_rules(&c));
    }
}
