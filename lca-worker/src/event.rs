use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::EventError;

pub const DEFAULT_INGREDIENT_CATEGORY: &str = "OTHER";
pub const DEFAULT_PACKAGING_MATERIAL: &str = "OTHER";
pub const DEFAULT_TRANSPORT_MODE: &str = "TRUCK";

/// A product event as published by the ingredient normalization stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub product_id: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ingredients: Vec<IngredientLine>,
    #[serde(default)]
    pub packaging: Option<PackagingInput>,
    #[serde(default)]
    pub transport: Option<TransportInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientLine {
    pub name: String,
    #[serde(default = "default_category", deserialize_with = "category_or_default")]
    pub category: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quantity_g: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackagingInput {
    #[serde(default = "default_material", deserialize_with = "material_or_default")]
    pub material: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weight_g: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportInput {
    #[serde(default = "default_mode", deserialize_with = "mode_or_default")]
    pub mode: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub distance_km: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub weight_g: f64,
}

impl NormalizedEvent {
    /// Decode and validate a raw message body. Any failure here means the message can
    /// never be processed and should be dead-lettered as-is.
    pub fn from_slice(payload: &[u8]) -> Result<Self, EventError> {
        let event: NormalizedEvent = serde_json::from_slice(payload)?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), EventError> {
        if self.product_id.trim().is_empty() {
            return Err(EventError::MissingProductId);
        }

        for (index, line) in self.ingredients.iter().enumerate() {
            if line.name.trim().is_empty() {
                return Err(EventError::EmptyIngredientName { index });
            }
            check_quantity(&format!("ingredients[{index}].quantity_g"), line.quantity_g)?;
            if let Some(confidence) = line.confidence {
                check_quantity(&format!("ingredients[{index}].confidence"), confidence)?;
            }
        }

        if let Some(packaging) = &self.packaging {
            check_quantity("packaging.weight_g", packaging.weight_g)?;
        }

        if let Some(transport) = &self.transport {
            check_quantity("transport.distance_km", transport.distance_km)?;
            check_quantity("transport.weight_g", transport.weight_g)?;
        }

        Ok(())
    }
}

fn check_quantity(field: &str, value: f64) -> Result<(), EventError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(EventError::NegativeQuantity {
            field: field.to_string(),
            value,
        })
    }
}

fn default_category() -> String {
    DEFAULT_INGREDIENT_CATEGORY.to_string()
}

fn default_material() -> String {
    DEFAULT_PACKAGING_MATERIAL.to_string()
}

fn default_mode() -> String {
    DEFAULT_TRANSPORT_MODE.to_string()
}

// Producers send explicit nulls for fields they could not fill in, treat those the
// same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn category_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_category))
}

fn material_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_material))
}

fn mode_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_else(default_mode))
}
