use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tradeable resource kinds.
///
/// Anything that does not parse to one of the four catalog kinds becomes
/// `Unknown`, which is worth nothing and never appears in an inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Item {
    Unknown,
    Water,
    Food,
    Medication,
    Ammunition,
}

impl Item {
    /// Every kind a survivor can hold, in catalog order.
    pub const CATALOG: [Item; 4] = [Item::Water, Item::Food, Item::Medication, Item::Ammunition];

    pub fn points(self) -> u32 {
        match self {
            Item::Water => 4,
            Item::Food => 3,
            Item::Medication => 2,
            Item::Ammunition => 1,
            Item::Unknown => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Item::Water => "Water",
            Item::Food => "Food",
            Item::Medication => "Medication",
            Item::Ammunition => "Ammunition",
            Item::Unknown => "unknown",
        }
    }

    /// Case-insensitive, whitespace-tolerant lookup. Never fails.
    pub fn parse(text: &str) -> Item {
        let text = text.trim();
        Item::CATALOG
            .into_iter()
            .find(|item| item.as_str().eq_ignore_ascii_case(text))
            .unwrap_or(Item::Unknown)
    }

    pub fn is_known(self) -> bool {
        self != Item::Unknown
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Item {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Item::parse(s))
    }
}

impl From<String> for Item {
    fn from(value: String) -> Self {
        Item::parse(&value)
    }
}

impl From<Item> for &'static str {
    fn from(item: Item) -> Self {
        item.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_table() {
        assert_eq!(Item::Water.points(), 4);
        assert_eq!(Item::Food.points(), 3);
        assert_eq!(Item::Medication.points(), 2);
        assert_eq!(Item::Ammunition.points(), 1);
        assert_eq!(Item::Unknown.points(), 0);
    }

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!(Item::parse("water"), Item::Water);
        assert_eq!(Item::parse("  AMMUNITION "), Item::Ammunition);
        assert_eq!(Item::parse("Medication"), Item::Medication);
        assert_eq!(Item::parse("fuel"), Item::Unknown);
        assert_eq!(Item::parse(""), Item::Unknown);
        assert_eq!("food".parse::<Item>().unwrap(), Item::Food);
    }

    #[test]
    fn test_catalog_excludes_unknown() {
        assert!(Item::CATALOG.iter().all(|i| i.is_known()));
        assert_eq!(Item::CATALOG.len(), 4);
    }

    #[test]
    fn test_serde_by_name() {
        let json = serde_json::to_string(&Item::Medication).unwrap();
        assert_eq!(json, "\"Medication\"");
        let back: Item = serde_json::from_str("\"medication\"").unwrap();
        assert_eq!(back, Item::Medication);
        let unknown: Item = serde_json::from_str("\"batteries\"").unwrap();
        assert_eq!(unknown, Item::Unknown);
    }
}
