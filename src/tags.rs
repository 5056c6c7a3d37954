use clap::ValueEnum;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Violation labels an officer can assign to a record or to a single vehicle
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationTag {
    NoHelmet,
    TripleRiding,
    WrongSide,
    RedLightJump,
    DefectiveNumberPlate,
    UseOfMobile,
    Overspeeding,
    NoPuc,
    FalseInsurance,
    IllegalParking,
}

impl ViolationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationTag::NoHelmet => "NO_HELMET",
            ViolationTag::TripleRiding => "TRIPLE_RIDING",
            ViolationTag::WrongSide => "WRONG_SIDE",
            ViolationTag::RedLightJump => "RED_LIGHT_JUMP",
            ViolationTag::DefectiveNumberPlate => "DEFECTIVE_NUMBER_PLATE",
            ViolationTag::UseOfMobile => "USE_OF_MOBILE",
            ViolationTag::Overspeeding => "OVERSPEEDING",
            ViolationTag::NoPuc => "NO_PUC",
            ViolationTag::FalseInsurance => "FALSE_INSURANCE",
            ViolationTag::IllegalParking => "ILLEGAL_PARKING",
        }
    }
}

impl fmt::Display for ViolationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels contributed by the system rather than the officer: vehicle classes
/// reported by the detector, plus a marker for records rebuilt from orphaned files
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemTag {
    Car,
    Motorcycle,
    Scooter,
    Bus,
    Truck,
    AutoRickshaw,
    Bicycle,
    Recovered,
}

impl SystemTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemTag::Car => "CAR",
            SystemTag::Motorcycle => "MOTORCYCLE",
            SystemTag::Scooter => "SCOOTER",
            SystemTag::Bus => "BUS",
            SystemTag::Truck => "TRUCK",
            SystemTag::AutoRickshaw => "AUTO_RICKSHAW",
            SystemTag::Bicycle => "BICYCLE",
            SystemTag::Recovered => "RECOVERED",
        }
    }

    /// Map a detector class label onto a vehicle class.
    ///
    /// Returns `None` for anything that is not a vehicle (pedestrians, animals,
    /// traffic lights, ...), which keeps non-vehicle detections out of the store.
    pub fn from_detector_label(label: &str) -> Option<SystemTag> {
        match label.trim().to_ascii_lowercase().as_str() {
            "car" | "sedan" | "suv" | "taxi" | "van" => Some(SystemTag::Car),
            "motorcycle" | "motorbike" | "bike" => Some(SystemTag::Motorcycle),
            "scooter" => Some(SystemTag::Scooter),
            "bus" => Some(SystemTag::Bus),
            "truck" | "lorry" => Some(SystemTag::Truck),
            "auto" | "autorickshaw" | "auto_rickshaw" | "rickshaw" | "three_wheeler" => {
                Some(SystemTag::AutoRickshaw)
            }
            "bicycle" | "cycle" => Some(SystemTag::Bicycle),
            _ => None,
        }
    }
}

impl fmt::Display for SystemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a tag set as a JSON array of tag names for storage
pub fn encode_tags<T: Serialize + Ord>(tags: &BTreeSet<T>) -> Result<String, serde_json::Error> {
    serde_json::to_string(tags)
}

/// Decode a stored JSON array of tag names. Unknown names are an error.
pub fn decode_tags<T: DeserializeOwned + Ord>(raw: &str) -> Result<BTreeSet<T>, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    serde_json::from_str(raw)
}

/// Comma-join tag names in their canonical order
pub fn join_tags(tags: &BTreeSet<ViolationTag>) -> String {
    tags.iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
