//! Map locations and unit ranks

use crate::error::PerilError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a unit, unique per player
pub type UnitId = u32;

/// Territories on the map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Americas,
    Europe,
    Africa,
    Asia,
    Antarctica,
    Australia,
}

impl Location {
    pub const ALL: [Location; 6] = [
        Location::Americas,
        Location::Europe,
        Location::Africa,
        Location::Asia,
        Location::Antarctica,
        Location::Australia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Location::Americas => "americas",
            Location::Europe => "europe",
            Location::Africa => "africa",
            Location::Asia => "asia",
            Location::Antarctica => "antarctica",
            Location::Australia => "australia",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = PerilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Location::ALL
            .into_iter()
            .find(|location| location.as_str() == lowered)
            .ok_or_else(|| PerilError::validation(format!("unknown location: {}", s)))
    }
}

/// Kinds of units a player can spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

impl UnitRank {
    pub const ALL: [UnitRank; 3] = [UnitRank::Infantry, UnitRank::Cavalry, UnitRank::Artillery];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitRank::Infantry => "infantry",
            UnitRank::Cavalry => "cavalry",
            UnitRank::Artillery => "artillery",
        }
    }
}

impl fmt::Display for UnitRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitRank {
    type Err = PerilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        UnitRank::ALL
            .into_iter()
            .find(|rank| rank.as_str() == lowered)
            .ok_or_else(|| PerilError::validation(format!("unknown unit type: {}", s)))
    }
}

/// A single unit on the map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub rank: UnitRank,
    pub location: Location,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parsing_is_case_insensitive() {
        assert_eq!("Asia".parse::<Location>().unwrap(), Location::Asia);
        assert_eq!(" europe ".parse::<Location>().unwrap(), Location::Europe);
        assert!("atlantis".parse::<Location>().is_err());
    }

    #[test]
    fn test_rank_parsing() {
        assert_eq!("cavalry".parse::<UnitRank>().unwrap(), UnitRank::Cavalry);
        let err = "dragon".parse::<UnitRank>().unwrap_err();
        assert!(matches!(err, PerilError::Validation { .. }));
    }

    #[test]
    fn test_location_serializes_lowercase() {
        let json = serde_json::to_string(&Location::Antarctica).unwrap();
        assert_eq!(json, "\"antarctica\"");
    }
}
