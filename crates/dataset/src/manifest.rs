use std::path::Path;

use mipstore_array::{DType, Layout};
use mipstore_geom::{Bitmask, BoxN};
use serde::{Deserialize, Serialize};

use crate::{errors::DatasetError, Field, Timesteps};

/// The on-disk dataset manifest (`dataset.json`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub bitmask: Bitmask,
    /// Sampled region; defaults to the whole pow-2 box.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_box: Option<BoxN>,
    #[serde(default = "default_bits_per_block")]
    pub bits_per_block: i32,
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub timesteps: Timesteps,
    /// Access configuration used when the caller does not pass one.
    /// Left opaque here; the access layer parses it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_access: Option<serde_json::Value>,
}

fn default_bits_per_block() -> i32 {
    16
}

impl DatasetConfig {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| DatasetError::Manifest(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| DatasetError::Manifest(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// One field entry of the manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    pub dtype: DType,
    #[serde(default)]
    pub default_value: f64,
    #[serde(default = "default_layout")]
    pub layout: Layout,
    #[serde(default = "default_codec")]
    pub codec: String,
}

fn default_layout() -> Layout {
    Layout::Hz
}

fn default_codec() -> String {
    "raw".to_owned()
}

impl FieldConfig {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            default_value: 0.0,
            layout: default_layout(),
            codec: default_codec(),
        }
    }
}

impl From<FieldConfig> for Field {
    fn from(config: FieldConfig) -> Field {
        Field::new(config.name, config.dtype)
            .with_default_value(config.default_value)
            .with_layout(config.layout)
            .with_codec(config.codec)
    }
}

impl From<&Field> for FieldConfig {
    fn from(field: &Field) -> FieldConfig {
        FieldConfig {
            name: field.name.clone(),
            dtype: field.dtype,
            default_value: field.default_value,
            layout: field.default_layout,
            codec: field.default_codec.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use mipstore_array::DTypeAtom;

    use super::*;

    #[test]
    fn test_manifest_roundtrip() {
        let config = DatasetConfig {
            name: "volume".into(),
            bitmask: "V010101".parse().unwrap(),
            logic_box: None,
            bits_per_block: 4,
            fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U16))],
            timesteps: Timesteps::range(0.0, 2.0, 1.0),
            default_access: Some(serde_json::json!({"type": "ram"})),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.json");
        config.save(&path).unwrap();
        let loaded = DatasetConfig::load(&path).unwrap();

        assert_eq!(loaded.name, "volume");
        assert_eq!(loaded.bitmask.to_string(), "V010101");
        assert_eq!(loaded.fields[0].dtype, DType::scalar(DTypeAtom::U16));
        assert_eq!(loaded.timesteps, Timesteps::range(0.0, 2.0, 1.0));
        assert!(loaded.default_access.is_some());
    }

    #[test]
    fn test_field_defaults() {
        let json = r#"{"name": "v", "dtype": "float32"}"#;
        let field: FieldConfig = serde_json::from_str(json).unwrap();
        assert_eq!(field.layout, Layout::Hz);
        assert_eq!(field.codec, "raw");
        assert_eq!(field.default_value, 0.0);
    }
}
