// Terrain catalog: default terrain properties, modifier templates, and the
// environment rules that feed affordance and cost derivation.
//
// The catalog is an explicit, immutable value. The grid owns one (through
// `GridConfig`) and passes `&TerrainCatalog` down to every tile computation,
// so tests and mods can swap in their own tables without shared globals.
// `TerrainCatalog::standard()` is the built-in table; `Default` delegates
// to it.
//
// Impassable terrain reports an infinite movement cost. The catalog stores
// only the finite `base_cost` and derives the infinite sentinel in
// `TerrainProperties::movement_cost()`, so the catalog stays JSON-safe
// (serde_json cannot represent infinity).
//
// Modifiers are validated on construction *and* on deserialization (via
// `#[serde(try_from)]`): intensity and stability reduction must lie in
// [0, 1] and the cost multiplier must be finite and positive. Intensity
// scales the effect: the effective cost factor is
// `1 + (multiplier - 1) * intensity` and the effective stability reduction
// is `stability_reduction * intensity`.
//
// See also: `tile.rs` which consumes all of this, `config.rs` which carries
// the catalog into the grid.

use crate::error::TerrainError;
use crate::types::{Affordances, TerrainType, affordance_set};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Terrain properties
// ---------------------------------------------------------------------------

/// Default physical properties of a terrain type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainProperties {
    pub passable: bool,
    pub opaque: bool,
    /// Traversal cost when passable. Ignored for impassable terrain.
    pub base_cost: f32,
    pub affordances: Affordances,
}

impl TerrainProperties {
    pub fn new(passable: bool, opaque: bool, base_cost: f32, affordances: &[&str]) -> Self {
        Self {
            passable,
            opaque,
            base_cost,
            affordances: affordance_set(affordances.iter().copied()),
        }
    }

    /// Movement cost, or `f32::INFINITY` for impassable terrain.
    pub fn movement_cost(&self) -> f32 {
        if self.passable {
            self.base_cost
        } else {
            f32::INFINITY
        }
    }
}

/// Returned for terrain missing from a custom catalog: a solid, featureless
/// block.
static MISSING_TERRAIN: TerrainProperties = TerrainProperties {
    passable: false,
    opaque: true,
    base_cost: 1.0,
    affordances: BTreeSet::new(),
};

// ---------------------------------------------------------------------------
// Modifiers
// ---------------------------------------------------------------------------

/// The type of a terrain modifier. A tile carries at most one modifier per
/// kind. Serializes as its lowercase name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModifierKind {
    Wet,
    Frozen,
    Cracked,
    Overgrown,
    Scorched,
    Rusty,
    Mossy,
    Collapsed,
    /// A modifier defined by content rather than the built-in set.
    Custom(String),
}

impl ModifierKind {
    /// Resolve a name (case-insensitive) to a kind. Names that are not
    /// built in become `Custom`.
    pub fn from_name(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "wet" => Self::Wet,
            "frozen" => Self::Frozen,
            "cracked" => Self::Cracked,
            "overgrown" => Self::Overgrown,
            "scorched" => Self::Scorched,
            "rusty" => Self::Rusty,
            "mossy" => Self::Mossy,
            "collapsed" => Self::Collapsed,
            _ => Self::Custom(name),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Wet => "wet",
            Self::Frozen => "frozen",
            Self::Cracked => "cracked",
            Self::Overgrown => "overgrown",
            Self::Scorched => "scorched",
            Self::Rusty => "rusty",
            Self::Mossy => "mossy",
            Self::Collapsed => "collapsed",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for ModifierKind {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ModifierKind> for String {
    fn from(kind: ModifierKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for ModifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named modifier definition, before an intensity is chosen.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModifierTemplate {
    pub kind: ModifierKind,
    pub adds: Affordances,
    pub removes: Affordances,
    pub cost_multiplier: f32,
    pub stability_reduction: f32,
    /// Makes an otherwise impassable tile traversable (ice over water).
    pub forces_passable: bool,
}

impl ModifierTemplate {
    fn new(
        kind: ModifierKind,
        adds: &[&str],
        removes: &[&str],
        cost_multiplier: f32,
        stability_reduction: f32,
        forces_passable: bool,
    ) -> Self {
        Self {
            kind,
            adds: affordance_set(adds.iter().copied()),
            removes: affordance_set(removes.iter().copied()),
            cost_multiplier,
            stability_reduction,
            forces_passable,
        }
    }
}

/// Per-field overrides merged onto a template by
/// `TerrainCatalog::create_modifier`. `None` keeps the template value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModifierOverrides {
    pub intensity: Option<f32>,
    pub adds: Option<Affordances>,
    pub removes: Option<Affordances>,
    pub cost_multiplier: Option<f32>,
    pub stability_reduction: Option<f32>,
    pub forces_passable: Option<bool>,
}

impl ModifierOverrides {
    pub fn with_intensity(intensity: f32) -> Self {
        Self {
            intensity: Some(intensity),
            ..Self::default()
        }
    }
}

/// A modifier instance applied to a tile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ModifierRecord", into = "ModifierRecord")]
pub struct TerrainModifier {
    kind: ModifierKind,
    intensity: f32,
    adds: Affordances,
    removes: Affordances,
    cost_multiplier: f32,
    stability_reduction: f32,
    forces_passable: bool,
}

impl TerrainModifier {
    /// Build a modifier from a template at the given intensity.
    pub fn from_template(
        template: &ModifierTemplate,
        intensity: f32,
    ) -> Result<Self, TerrainError> {
        Self::from_record(ModifierRecord {
            kind: template.kind.clone(),
            intensity,
            adds: template.adds.clone(),
            removes: template.removes.clone(),
            cost_multiplier: template.cost_multiplier,
            stability_reduction: template.stability_reduction,
            forces_passable: template.forces_passable,
        })
    }

    fn from_record(record: ModifierRecord) -> Result<Self, TerrainError> {
        if !(0.0..=1.0).contains(&record.intensity) {
            return Err(TerrainError::IntensityOutOfRange(record.intensity));
        }
        if !record.cost_multiplier.is_finite() || record.cost_multiplier <= 0.0 {
            return Err(TerrainError::InvalidCostMultiplier(record.cost_multiplier));
        }
        if !(0.0..=1.0).contains(&record.stability_reduction) {
            return Err(TerrainError::StabilityReductionOutOfRange(
                record.stability_reduction,
            ));
        }
        Ok(Self {
            kind: record.kind,
            intensity: record.intensity,
            adds: record.adds,
            removes: record.removes,
            cost_multiplier: record.cost_multiplier,
            stability_reduction: record.stability_reduction,
            forces_passable: record.forces_passable,
        })
    }

    pub fn kind(&self) -> &ModifierKind {
        &self.kind
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn adds(&self) -> &Affordances {
        &self.adds
    }

    pub fn removes(&self) -> &Affordances {
        &self.removes
    }

    pub fn cost_multiplier(&self) -> f32 {
        self.cost_multiplier
    }

    pub fn forces_passable(&self) -> bool {
        self.forces_passable
    }

    /// Cost factor after intensity scaling.
    pub fn effective_cost_multiplier(&self) -> f32 {
        1.0 + (self.cost_multiplier - 1.0) * self.intensity
    }

    /// Stability lost when this modifier is applied, after intensity scaling.
    pub fn effective_stability_reduction(&self) -> f32 {
        self.stability_reduction * self.intensity
    }
}

/// Unvalidated serialized form of `TerrainModifier`.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ModifierRecord {
    kind: ModifierKind,
    intensity: f32,
    #[serde(default)]
    adds: Affordances,
    #[serde(default)]
    removes: Affordances,
    cost_multiplier: f32,
    #[serde(default)]
    stability_reduction: f32,
    #[serde(default)]
    forces_passable: bool,
}

impl TryFrom<ModifierRecord> for TerrainModifier {
    type Error = TerrainError;
    fn try_from(record: ModifierRecord) -> Result<Self, Self::Error> {
        Self::from_record(record)
    }
}

impl From<TerrainModifier> for ModifierRecord {
    fn from(m: TerrainModifier) -> Self {
        Self {
            kind: m.kind,
            intensity: m.intensity,
            adds: m.adds,
            removes: m.removes,
            cost_multiplier: m.cost_multiplier,
            stability_reduction: m.stability_reduction,
            forces_passable: m.forces_passable,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment rules
// ---------------------------------------------------------------------------

/// Thresholds and multipliers applied by tile affordance and cost derivation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRules {
    /// Moisture above this makes a tile slippery, non-flammable and slower.
    pub wet_moisture_threshold: f32,
    pub wet_cost_multiplier: f32,
    /// Light below this slows movement.
    pub dim_light_threshold: f32,
    pub dim_cost_multiplier: f32,
    /// Light below this adds "dark" and "hideable".
    pub dark_light_threshold: f32,
    /// Temperature below this adds "freezing".
    pub freezing_temperature: f32,
    /// Added cost per unit of height difference between two tiles.
    pub height_cost_factor: f32,
    /// Base cost used when a modifier forces passage over terrain that has
    /// no finite cost of its own.
    pub forced_passage_cost: f32,
}

impl Default for EnvironmentRules {
    fn default() -> Self {
        Self {
            wet_moisture_threshold: 0.7,
            wet_cost_multiplier: 1.5,
            dim_light_threshold: 0.2,
            dim_cost_multiplier: 1.2,
            dark_light_threshold: 0.1,
            freezing_temperature: -20.0,
            height_cost_factor: 0.5,
            forced_passage_cost: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Immutable lookup of terrain defaults and modifier templates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TerrainCatalog {
    terrain: BTreeMap<TerrainType, TerrainProperties>,
    /// Keyed by modifier name (`ModifierKind::name()`).
    modifiers: BTreeMap<String, ModifierTemplate>,
    #[serde(default)]
    rules: EnvironmentRules,
}

impl Default for TerrainCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl TerrainCatalog {
    /// The built-in terrain table and modifier templates.
    pub fn standard() -> Self {
        use TerrainType::*;

        let terrain = BTreeMap::from([
            (Rock, TerrainProperties::new(false, true, 1.0, &["climbable", "solid", "breakable"])),
            (
                Soil,
                TerrainProperties::new(true, false, 1.0, &["diggable", "plantable", "walkable"]),
            ),
            (Sand, TerrainProperties::new(true, false, 1.5, &["diggable", "walkable"])),
            (
                Grass,
                TerrainProperties::new(true, false, 1.0, &["plantable", "flammable", "walkable"]),
            ),
            (
                Water,
                TerrainProperties::new(true, false, 2.0, &["swimmable", "drinkable", "fishable"]),
            ),
            (Ice, TerrainProperties::new(true, false, 1.5, &["slippery", "walkable", "breakable"])),
            (
                Wood,
                TerrainProperties::new(true, false, 1.0, &["flammable", "breakable", "walkable"]),
            ),
            (Metal, TerrainProperties::new(false, true, 1.0, &["conductive", "magnetic", "solid"])),
            (Glass, TerrainProperties::new(false, false, 1.0, &["transparent", "breakable"])),
            (Floor, TerrainProperties::new(true, false, 1.0, &["walkable"])),
            (Void, TerrainProperties::new(false, false, 1.0, &[])),
        ]);

        let templates = [
            ModifierTemplate::new(
                ModifierKind::Wet,
                &["slippery"],
                &["flammable"],
                1.2,
                0.0,
                false,
            ),
            ModifierTemplate::new(
                ModifierKind::Frozen,
                &["slippery", "walkable"],
                &["swimmable", "diggable"],
                1.3,
                0.0,
                true,
            ),
            ModifierTemplate::new(
                ModifierKind::Cracked,
                &["unstable", "breakable"],
                &[],
                1.1,
                0.3,
                false,
            ),
            ModifierTemplate::new(
                ModifierKind::Overgrown,
                &["hideable", "flammable", "climbable"],
                &[],
                1.5,
                0.0,
                false,
            ),
            ModifierTemplate::new(
                ModifierKind::Scorched,
                &["charred"],
                &["flammable", "plantable"],
                1.0,
                0.1,
                false,
            ),
            ModifierTemplate::new(
                ModifierKind::Rusty,
                &["corroded"],
                &["magnetic"],
                1.0,
                0.2,
                false,
            ),
            ModifierTemplate::new(ModifierKind::Mossy, &["slippery", "soft"], &[], 1.1, 0.0, false),
            ModifierTemplate::new(
                ModifierKind::Collapsed,
                &["unstable", "climbable"],
                &["walkable"],
                2.0,
                0.5,
                false,
            ),
        ];
        let modifiers = templates
            .into_iter()
            .map(|t| (t.kind.name().to_string(), t))
            .collect();

        Self {
            terrain,
            modifiers,
            rules: EnvironmentRules::default(),
        }
    }

    /// Replace (or add) the default properties of one terrain type.
    #[must_use]
    pub fn with_terrain(mut self, terrain: TerrainType, properties: TerrainProperties) -> Self {
        self.terrain.insert(terrain, properties);
        self
    }

    /// Register (or replace) a modifier template under its kind's name.
    #[must_use]
    pub fn with_modifier_template(mut self, template: ModifierTemplate) -> Self {
        self.modifiers.insert(template.kind.name().to_string(), template);
        self
    }

    #[must_use]
    pub fn with_rules(mut self, rules: EnvironmentRules) -> Self {
        self.rules = rules;
        self
    }

    /// Default properties for a terrain type. Terrain missing from a custom
    /// catalog is treated as solid rock with no affordances.
    pub fn default_properties(&self, terrain: TerrainType) -> &TerrainProperties {
        self.terrain.get(&terrain).unwrap_or(&MISSING_TERRAIN)
    }

    /// Look up a modifier template by name (case-insensitive).
    pub fn predefined_modifier(&self, name: &str) -> Option<&ModifierTemplate> {
        self.modifiers.get(ModifierKind::from_name(name).name())
    }

    pub fn rules(&self) -> &EnvironmentRules {
        &self.rules
    }

    /// Build a modifier from a named template merged with `overrides`.
    ///
    /// Unknown names are rejected unless the overrides carry an explicit
    /// `adds` or `removes` list, in which case a `Custom` modifier is built
    /// with neutral defaults for every field not overridden.
    pub fn create_modifier(
        &self,
        name: &str,
        overrides: ModifierOverrides,
    ) -> Result<TerrainModifier, TerrainError> {
        let kind = ModifierKind::from_name(name);
        let intensity = overrides.intensity.unwrap_or(1.0);

        let record = match self.modifiers.get(kind.name()) {
            Some(template) => ModifierRecord {
                kind,
                intensity,
                adds: overrides.adds.unwrap_or_else(|| template.adds.clone()),
                removes: overrides.removes.unwrap_or_else(|| template.removes.clone()),
                cost_multiplier: overrides.cost_multiplier.unwrap_or(template.cost_multiplier),
                stability_reduction: overrides
                    .stability_reduction
                    .unwrap_or(template.stability_reduction),
                forces_passable: overrides.forces_passable.unwrap_or(template.forces_passable),
            },
            None => {
                if overrides.adds.is_none() && overrides.removes.is_none() {
                    return Err(TerrainError::UnknownModifier(name.to_string()));
                }
                ModifierRecord {
                    kind,
                    intensity,
                    adds: overrides.adds.unwrap_or_default(),
                    removes: overrides.removes.unwrap_or_default(),
                    cost_multiplier: overrides.cost_multiplier.unwrap_or(1.0),
                    stability_reduction: overrides.stability_reduction.unwrap_or(0.0),
                    forces_passable: overrides.forces_passable.unwrap_or(false),
                }
            }
        };

        TerrainModifier::from_record(record)
    }

    /// Shorthand for a named template at the given intensity.
    pub fn modifier(&self, name: &str, intensity: f32) -> Result<TerrainModifier, TerrainError> {
        self.create_modifier(name, ModifierOverrides::with_intensity(intensity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impassable_terrain_has_infinite_cost() {
        let catalog = TerrainCatalog::standard();
        for terrain in TerrainType::ALL {
            let props = catalog.default_properties(terrain);
            if props.passable {
                assert!(props.movement_cost().is_finite(), "{terrain:?}");
            } else {
                assert_eq!(props.movement_cost(), f32::INFINITY, "{terrain:?}");
            }
        }
    }

    #[test]
    fn glass_is_impassable_but_clear_in_the_table() {
        let catalog = TerrainCatalog::standard();
        let glass = catalog.default_properties(TerrainType::Glass);
        assert!(!glass.passable);
        assert!(!glass.opaque);
    }

    #[test]
    fn predefined_lookup_is_case_insensitive() {
        let catalog = TerrainCatalog::standard();
        assert!(catalog.predefined_modifier("WET").is_some());
        assert!(catalog.predefined_modifier(" Frozen ").is_some());
        assert!(catalog.predefined_modifier("glowing").is_none());
    }

    #[test]
    fn create_modifier_merges_overrides() {
        let catalog = TerrainCatalog::standard();
        let m = catalog
            .create_modifier(
                "cracked",
                ModifierOverrides {
                    intensity: Some(0.5),
                    cost_multiplier: Some(3.0),
                    ..ModifierOverrides::default()
                },
            )
            .unwrap();
        assert_eq!(m.kind(), &ModifierKind::Cracked);
        assert_eq!(m.intensity(), 0.5);
        assert_eq!(m.cost_multiplier(), 3.0);
        assert!(m.adds().contains("unstable"));
        assert!((m.effective_cost_multiplier() - 2.0).abs() < 1e-6);
        assert!((m.effective_stability_reduction() - 0.15).abs() < 1e-6);
    }

    #[test]
    fn create_modifier_rejects_unknown_without_affordances() {
        let catalog = TerrainCatalog::standard();
        let err = catalog
            .create_modifier("glowing", ModifierOverrides::default())
            .unwrap_err();
        assert_eq!(err, TerrainError::UnknownModifier("glowing".into()));
    }

    #[test]
    fn create_modifier_builds_custom_with_affordances() {
        let catalog = TerrainCatalog::standard();
        let m = catalog
            .create_modifier(
                "Glowing",
                ModifierOverrides {
                    adds: Some(affordance_set(["lit"])),
                    ..ModifierOverrides::default()
                },
            )
            .unwrap();
        assert_eq!(m.kind(), &ModifierKind::Custom("glowing".into()));
        assert!(m.adds().contains("lit"));
        assert_eq!(m.effective_cost_multiplier(), 1.0);
    }

    #[test]
    fn intensity_out_of_range_fails() {
        let catalog = TerrainCatalog::standard();
        assert_eq!(
            catalog.modifier("wet", 1.5).unwrap_err(),
            TerrainError::IntensityOutOfRange(1.5)
        );
        assert!(catalog.modifier("wet", -0.1).is_err());
        assert!(catalog.modifier("wet", f32::NAN).is_err());
    }

    #[test]
    fn zero_intensity_is_neutral_for_cost() {
        let catalog = TerrainCatalog::standard();
        let m = catalog.modifier("collapsed", 0.0).unwrap();
        assert_eq!(m.effective_cost_multiplier(), 1.0);
        assert_eq!(m.effective_stability_reduction(), 0.0);
    }

    #[test]
    fn modifier_deserialization_validates() {
        let ok = r#"{"kind":"wet","intensity":0.4,"cost_multiplier":1.2}"#;
        let m: TerrainModifier = serde_json::from_str(ok).unwrap();
        assert_eq!(m.kind(), &ModifierKind::Wet);

        let bad = r#"{"kind":"wet","intensity":2.0,"cost_multiplier":1.2}"#;
        assert!(serde_json::from_str::<TerrainModifier>(bad).is_err());
    }

    #[test]
    fn catalog_json_roundtrip() {
        let catalog = TerrainCatalog::standard();
        let json = serde_json::to_string(&catalog).unwrap();
        let restored: TerrainCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(catalog, restored);
    }

    #[test]
    fn custom_catalog_overrides_terrain() {
        let catalog = TerrainCatalog::standard()
            .with_terrain(TerrainType::Water, TerrainProperties::new(false, false, 4.0, &["deep"]));
        let water = catalog.default_properties(TerrainType::Water);
        assert!(!water.passable);
        assert!(water.affordances.contains("deep"));
    }
}
