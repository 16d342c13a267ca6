//! Road anomaly classes
//!
//! The class set is fixed by the trained checkpoint: the index order below is the
//! order of the classifier's output logits.

use serde::{Deserialize, Serialize};

/// Number of road anomaly classes
pub const NUM_CLASSES: usize = 5;

/// Class names, indexed by logit position
pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "Drain Hole",
    "Pothole",
    "Sewer Cover",
    "Unpaved Road",
    "Wet Surface",
];

/// A road-surface defect category.
///
/// Ordering follows the class index, so ordered maps keyed by `RoadClass`
/// iterate in logit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoadClass {
    #[serde(rename = "Drain Hole")]
    DrainHole,
    #[serde(rename = "Pothole")]
    Pothole,
    #[serde(rename = "Sewer Cover")]
    SewerCover,
    #[serde(rename = "Unpaved Road")]
    UnpavedRoad,
    #[serde(rename = "Wet Surface")]
    WetSurface,
}

impl RoadClass {
    /// All classes in index order
    pub const ALL: [RoadClass; NUM_CLASSES] = [
        RoadClass::DrainHole,
        RoadClass::Pothole,
        RoadClass::SewerCover,
        RoadClass::UnpavedRoad,
        RoadClass::WetSurface,
    ];

    /// Logit index of the class
    pub fn index(self) -> usize {
        self as usize
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        CLASS_NAMES[self.index()]
    }
}

impl std::fmt::Display for RoadClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_indices_match_names() {
        for (i, class) in RoadClass::ALL.iter().enumerate() {
            assert_eq!(class.index(), i);
            assert_eq!(class.label(), CLASS_NAMES[i]);
            assert_eq!(RoadClass::ALL[class.index()], *class);
        }
        assert_eq!(RoadClass::Pothole.to_string(), "Pothole");
    }

    #[test]
    fn test_serializes_as_label() {
        let json = serde_json::to_string(&RoadClass::UnpavedRoad).unwrap();
        assert_eq!(json, "\"Unpaved Road\"");
    }
}
