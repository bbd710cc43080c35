//! Versioned rule tables for the normalizer.
//!
//! A `RuleSet` is immutable once built. Callers share it through an `Arc` and
//! every canonical label can be traced back to `RuleSet::version`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::constants::BUILTIN_RULES_VERSION;
use crate::domain::{Category, UnitKind};
use crate::error::ConfigError;

/// How one unit suffix converts into a base unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRule {
    pub kind: UnitKind,
    /// Multiplier from the suffix's quantity to base units of `kind`.
    #[serde(with = "rust_decimal::serde::str")]
    pub factor: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: Category,
    /// Whole-word keywords matched against the folded item name.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Catalog section headers (folded) that imply this category.
    #[serde(default)]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    pub version: String,
    /// Token-level abbreviation expansions, applied to names and unit suffixes.
    #[serde(default)]
    pub synonyms: BTreeMap<String, String>,
    /// Keyed by the folded unit suffix (`oz`, `floz`, `pk`, `x` for dimensions).
    #[serde(default)]
    pub units: BTreeMap<String, UnitRule>,
    /// Evaluated in order; the first rule whose keywords match wins.
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
    #[serde(default)]
    pub essential_keywords: Vec<String>,
    /// Checked before `essential_keywords`.
    #[serde(default)]
    pub non_essential_keywords: Vec<String>,
    /// Section headers whose items default to essential.
    #[serde(default)]
    pub essential_sections: Vec<String>,
    /// Reference index series each category is compared against.
    #[serde(default)]
    pub reference_categories: BTreeMap<Category, String>,
    #[serde(default = "default_reference_series")]
    pub default_reference_series: String,
}

fn default_reference_series() -> String {
    "CPI-U".to_string()
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn unit(kind: UnitKind, factor: &str) -> UnitRule {
    UnitRule { kind, factor: factor.parse().unwrap_or(Decimal::ONE) }
}

impl RuleSet {
    /// The rule tables shipped with this crate.
    pub fn builtin() -> Self {
        let synonyms = [
            ("pkg", "pack"),
            ("pk", "pack"),
            ("pks", "pack"),
            ("ea", "each"),
            ("lbs", "lb"),
            ("count", "ct"),
            ("pc", "piece"),
            ("pcs", "piece"),
            ("sht", "sheet"),
            ("tablet", "tab"),
            ("tablets", "tab"),
            ("pr", "pair"),
            ("asst", "assorted"),
            ("assrt", "assorted"),
            ("choc", "chocolate"),
            ("chkn", "chicken"),
            ("crm", "cream"),
            ("deod", "deodorant"),
            ("shmp", "shampoo"),
            ("tp", "toothpaste"),
            ("lg", "large"),
            ("med", "medium"),
            ("sm", "small"),
            ("w", "with"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let units = [
            ("oz", unit(UnitKind::Oz, "1")),
            ("floz", unit(UnitKind::Oz, "1")),
            ("lb", unit(UnitKind::Oz, "16")),
            ("g", unit(UnitKind::Oz, "0.035274")),
            ("kg", unit(UnitKind::Oz, "35.274")),
            ("ct", unit(UnitKind::Ct, "1")),
            ("tab", unit(UnitKind::Ct, "1")),
            ("tabs", unit(UnitKind::Ct, "1")),
            ("sheet", unit(UnitKind::Ct, "1")),
            ("sheets", unit(UnitKind::Ct, "1")),
            ("bag", unit(UnitKind::Ct, "1")),
            ("bags", unit(UnitKind::Ct, "1")),
            ("piece", unit(UnitKind::Ct, "1")),
            ("pieces", unit(UnitKind::Ct, "1")),
            ("roll", unit(UnitKind::Ct, "1")),
            ("rolls", unit(UnitKind::Ct, "1")),
            ("pack", unit(UnitKind::Pack, "1")),
            ("pair", unit(UnitKind::Pack, "1")),
            ("each", unit(UnitKind::Each, "1")),
            ("x", unit(UnitKind::Each, "1")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let categories = vec![
            CategoryRule {
                category: Category::Hygiene,
                keywords: words(&[
                    "soap", "toothpaste", "toothbrush", "tooth brush", "shampoo", "conditioner", "deodorant",
                    "antiperspirant", "lotion", "razor", "shave", "toilet tissue", "toilet paper", "pads",
                    "tampon", "pantiliners", "comb", "floss", "mouthwash", "dental",
                ]),
                sections: words(&["hygiene", "male only", "female only"]),
            },
            CategoryRule {
                category: Category::Food,
                keywords: words(&[
                    "ramen", "noodles", "soup", "rice", "beans", "chicken", "tuna", "salmon", "mackerel",
                    "cereal", "pasta", "coffee", "tea", "juice", "water", "candy", "chips", "cookies", "crackers",
                    "peanut butter", "jelly", "cheese", "sausage", "beef", "chili", "oatmeal", "soda", "drink",
                    "ice cream", "chocolate", "honey", "sugar", "creamer", "tortilla", "tortillas",
                ]),
                sections: words(&[
                    "instant foods", "kosher items", "packaged meat", "snacks", "ice cream", "condiments",
                    "instant drink mix", "instant drink mixes", "beverages", "candy", "juices water tea",
                    "other food items", "sodas",
                ]),
            },
            CategoryRule {
                category: Category::Stationery,
                keywords: words(&[
                    "stamp", "stamps", "envelope", "envelopes", "pen", "pens", "pencil", "pencils", "paper",
                    "writing tablet", "notebook", "eraser", "folder", "sharpener", "greeting card",
                ]),
                sections: words(&["correspondence", "art supplies"]),
            },
            CategoryRule {
                category: Category::Clothing,
                keywords: words(&[
                    "socks", "underwear", "briefs", "boxer", "boxers", "t shirt", "tshirt", "shirt", "pants",
                    "shorts", "bra", "shoes", "sneakers", "thermal", "cap", "gloves",
                ]),
                sections: words(&["clothing", "shoes"]),
            },
        ];

        let reference_categories = [
            (Category::Food, "Food at home"),
            (Category::Hygiene, "Personal care"),
            (Category::Clothing, "Apparel"),
            (Category::Stationery, "Recreation"),
        ]
        .into_iter()
        .map(|(c, s)| (c, s.to_string()))
        .collect();

        Self {
            version: BUILTIN_RULES_VERSION.to_string(),
            synonyms,
            units,
            categories,
            essential_keywords: words(&[
                "soap", "toothpaste", "toothbrush", "tooth brush", "shampoo", "deodorant", "antiperspirant",
                "toilet tissue", "toilet paper", "tissue", "razor", "shave", "pads", "pantiliners", "tampon",
                "socks", "underwear", "briefs", "boxer", "t shirt", "tshirt", "shirt", "pants", "shorts", "bra",
                "ramen", "noodles", "rice", "beans", "chicken", "tuna", "salmon", "mackerel", "cereal", "pasta",
                "coffee", "tea", "stamp", "stamps", "envelope", "envelopes", "pen", "pencil", "paper",
                "writing tablet", "aspirin", "ibuprofen", "antacid", "vitamin", "water", "juice", "milk",
            ]),
            non_essential_keywords: words(&[
                "candy", "chips", "pork skins", "almonds", "sunflower", "coloring book", "colored pencil",
                "watercolor", "paint", "drawing pad", "chess", "game", "radio", "headphone", "headphones",
                "earbud", "earbuds", "fan", "clock", "typewriter", "lipstick", "mascara", "eyeliner", "makeup",
                "nail polish", "cologne", "perfume", "greeting card", "dictionary", "soda", "ice cream",
            ]),
            essential_sections: words(&[
                "hygiene", "male only", "female only", "clothing", "shoes", "instant foods", "packaged meat",
                "condiments", "kosher items", "juices water tea", "instant drink mix", "instant drink mixes",
            ]),
            reference_categories,
            default_reference_series: default_reference_series(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let rules: RuleSet = toml::from_str(content)?;
        if rules.version.trim().is_empty() {
            return Err(ConfigError::Invalid("rule set version must not be empty".to_string()));
        }
        Ok(rules)
    }

    /// Reference series key for a category's sub-index.
    pub fn reference_series_for(&self, category: Category) -> &str {
        self.reference_categories
            .get(&category)
            .map(String::as_str)
            .unwrap_or(&self.default_reference_series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_is_versioned() {
        let rules = RuleSet::builtin();
        assert_eq!(rules.version, "rules-v1");
        assert_eq!(rules.units["lb"].factor, Decimal::from(16));
        assert_eq!(rules.units["g"].factor, "0.035274".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_reference_series_mapping() {
        let rules = RuleSet::builtin();
        assert_eq!(rules.reference_series_for(Category::Food), "Food at home");
        assert_eq!(rules.reference_series_for(Category::Hygiene), "Personal care");
        assert_eq!(rules.reference_series_for(Category::Other), "CPI-U");
    }

    #[test]
    fn test_load_from_toml() {
        let rules = RuleSet::from_toml_str(
            r#"
            version = "rules-test"

            [synonyms]
            pkg = "pack"

            [units.oz]
            kind = "oz"
            factor = "1"

            [units.lb]
            kind = "oz"
            factor = "16"

            [[categories]]
            category = "hygiene"
            keywords = ["soap"]

            [reference_categories]
            hygiene = "Personal care"
            "#,
        )
        .unwrap();
        assert_eq!(rules.version, "rules-test");
        assert_eq!(rules.units["lb"].kind, UnitKind::Oz);
        assert_eq!(rules.categories[0].keywords, vec!["soap"]);
        assert_eq!(rules.reference_series_for(Category::Hygiene), "Personal care");
        assert_eq!(rules.default_reference_series, "CPI-U");
    }

    #[test]
    fn test_empty_version_rejected() {
        assert!(RuleSet::from_toml_str("version = \"\"").is_err());
    }
}
