//! Structured print settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use printforge_core::{DomainError, DomainResult, ValueObject};

/// Filament or resin a job is printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    Pla,
    Petg,
    Abs,
    Tpu,
    Asa,
    Nylon,
    Resin,
}

impl Material {
    pub const ALL: [Material; 7] = [
        Material::Pla,
        Material::Petg,
        Material::Abs,
        Material::Tpu,
        Material::Asa,
        Material::Nylon,
        Material::Resin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Material::Pla => "pla",
            Material::Petg => "petg",
            Material::Abs => "abs",
            Material::Tpu => "tpu",
            Material::Asa => "asa",
            Material::Nylon => "nylon",
            Material::Resin => "resin",
        }
    }
}

impl core::fmt::Display for Material {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Material {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Material::ALL
            .into_iter()
            .find(|m| m.as_str() == needle)
            .ok_or_else(|| DomainError::validation(format!("unknown material '{s}'")))
    }
}

/// Print settings chosen for a line item.
///
/// Every field is optional: unset means "printer/operator default". `scale`
/// is a multiplier applied to the model dimensions. Keys this version does
/// not understand are preserved verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infill: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<Material>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ValueObject for PrintSettings {}

impl PrintSettings {
    /// Validate ranges of the structured fields.
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(scale) = self.scale {
            if !(scale.is_finite() && scale > 0.0 && scale <= 10.0) {
                return Err(DomainError::validation("scale must be in (0, 10]"));
            }
        }
        if let Some(h) = self.layer_height {
            if !(h.is_finite() && h > 0.0 && h <= 1.0) {
                return Err(DomainError::validation("layer_height must be in (0, 1] mm"));
            }
        }
        if let Some(infill) = self.infill {
            if infill > 100 {
                return Err(DomainError::validation("infill must be between 0 and 100"));
            }
        }
        if let Some(hours) = self.estimated_hours {
            if !(hours.is_finite() && hours >= 0.0) {
                return Err(DomainError::validation("estimated_hours must not be negative"));
            }
        }
        if let Some(color) = &self.color {
            if color.trim().is_empty() || color.len() > 50 {
                return Err(DomainError::validation("color must be 1-50 characters"));
            }
        }
        Ok(())
    }

    /// Build settings from a loosely typed key/value map.
    pub fn from_loose(map: BTreeMap<String, String>) -> DomainResult<Self> {
        let mut settings = PrintSettings::default();

        for (key, value) in map {
            match key.as_str() {
                "scale" => settings.scale = Some(parse_num(&key, &value)?),
                "layer_height" => settings.layer_height = Some(parse_num(&key, &value)?),
                "infill" => settings.infill = Some(parse_num(&key, &value)?),
                "supports" => settings.supports = Some(parse_bool(&key, &value)?),
                "material" => settings.material = Some(value.parse()?),
                "color" => settings.color = Some(value),
                "estimated_hours" => settings.estimated_hours = Some(parse_num(&key, &value)?),
                _ => {
                    settings.extra.insert(key, value);
                }
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn scale_factor(&self) -> f64 {
        self.scale.unwrap_or(1.0)
    }
}

fn parse_num<T: core::str::FromStr>(key: &str, value: &str) -> DomainResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DomainError::validation(format!("{key}: '{value}' is not a number")))
}

fn parse_bool(key: &str, value: &str) -> DomainResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(DomainError::validation(format!("{key}: '{value}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loose(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn loose_map_fills_known_fields_and_keeps_extras() {
        let s = PrintSettings::from_loose(loose(&[
            ("material", "PETG"),
            ("infill", "20"),
            ("supports", "yes"),
            ("nozzle", "0.6"),
        ]))
        .unwrap();

        assert_eq!(s.material, Some(Material::Petg));
        assert_eq!(s.infill, Some(20));
        assert_eq!(s.supports, Some(true));
        assert_eq!(s.extra.get("nozzle").map(String::as_str), Some("0.6"));
    }

    #[test]
    fn unknown_material_is_a_validation_error() {
        let err = PrintSettings::from_loose(loose(&[("material", "wood")])).unwrap_err();
        match err {
            DomainError::Validation(msg) if msg.contains("wood") => {}
            _ => panic!("Expected Validation naming the material"),
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let s = PrintSettings {
            infill: Some(120),
            ..Default::default()
        };
        assert!(s.validate().is_err());

        let s = PrintSettings {
            scale: Some(0.0),
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }
}
