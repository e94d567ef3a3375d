use std::{path::PathBuf, sync::Arc};

use mipstore_dataset::Dataset;
use mipstore_query::{AccessError, AccessResult, BlockAccess};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Codec, DiskAccess, FilterAccess, IdentityFilter, MultiplexAccess, NetworkAccess, RamAccess};

const DEFAULT_CHMOD: &str = "rw";

fn default_chmod() -> String {
    DEFAULT_CHMOD.to_owned()
}

fn default_ram_bytes() -> u64 {
    128 * 1024 * 1024
}

fn default_nconnections() -> usize {
    8
}

fn default_kernel() -> String {
    "identity".to_owned()
}

/// Tagged access configuration, the shape `create_access` consumes:
///
/// ```json
/// {"type": "multiplex",
///  "children": [{"type": "ram", "available": "64mb"},
///               {"type": "disk", "path": "/data/volume"}]}
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccessConfig {
    Disk {
        path: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path_template: Option<String>,
        #[serde(default = "default_chmod")]
        chmod: String,
    },
    Ram {
        #[serde(default = "default_ram_bytes", deserialize_with = "deserialize_bytes")]
        available: u64,
        #[serde(default = "default_chmod")]
        chmod: String,
    },
    Network {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dataset: Option<String>,
        #[serde(default = "default_nconnections")]
        nconnections: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compression: Option<Codec>,
    },
    Multiplex {
        children: Vec<AccessConfig>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sink: Option<usize>,
    },
    Filter {
        inner: Box<AccessConfig>,
        #[serde(default = "default_kernel")]
        kernel: String,
    },
}

/// Byte budgets may be numbers or strings like `"128mb"`.
fn deserialize_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => parse_byte_size(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_byte_size(text: &str) -> Result<u64, String> {
    let text = text.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(d) = text.strip_suffix("gb") {
        (d, 1u64 << 30)
    } else if let Some(d) = text.strip_suffix("mb") {
        (d, 1u64 << 20)
    } else if let Some(d) = text.strip_suffix("kb") {
        (d, 1u64 << 10)
    } else if let Some(d) = text.strip_suffix('b') {
        (d, 1)
    } else {
        (text.as_str(), 1)
    };
    digits
        .trim()
        .parse::<u64>()
        .map(|n| n * multiplier)
        .map_err(|_| format!("bad byte size {text:?}"))
}

/// Builds a backend stack from its configuration.
pub fn create_access(
    dataset: &Arc<Dataset>,
    config: &AccessConfig,
) -> AccessResult<Arc<dyn BlockAccess>> {
    match config {
        AccessConfig::Disk {
            path,
            path_template,
            chmod,
        } => Ok(Arc::new(DiskAccess::new(
            dataset,
            path.clone(),
            path_template.clone(),
            chmod,
        ))),

        AccessConfig::Ram { available, chmod } => Ok(Arc::new(RamAccess::new(
            dataset,
            *available as usize,
            chmod,
        ))),

        AccessConfig::Network {
            url,
            dataset: dataset_name,
            nconnections,
            compression,
        } => Ok(Arc::new(NetworkAccess::new(
            dataset,
            url,
            dataset_name.clone(),
            *nconnections,
            compression.map(|c| c.tag().to_owned()),
        )?)),

        AccessConfig::Multiplex { children, sink } => {
            let children = children
                .iter()
                .map(|child| create_access(dataset, child))
                .collect::<AccessResult<Vec<_>>>()?;
            Ok(Arc::new(MultiplexAccess::new(children, *sink)?))
        }

        AccessConfig::Filter { inner, kernel } => {
            let inner = create_access(dataset, inner)?;
            let filter: Arc<dyn crate::BlockFilter> = match kernel.as_str() {
                "identity" => Arc::new(IdentityFilter),
                other => {
                    return Err(AccessError::Backend(format!("unknown filter kernel {other:?}")))
                }
            };
            Ok(Arc::new(FilterAccess::new(inner, filter)))
        }
    }
}

/// Same as [`create_access`] but from a raw JSON tree (e.g. the dataset
/// manifest's `default_access`).
pub fn create_access_from_value(
    dataset: &Arc<Dataset>,
    value: &serde_json::Value,
) -> AccessResult<Arc<dyn BlockAccess>> {
    let config: AccessConfig = serde_json::from_value(value.clone())
        .map_err(|e| AccessError::Backend(format!("access config: {e}")))?;
    create_access(dataset, &config)
}

#[cfg(test)]
mod tests {
    use mipstore_array::{DType, DTypeAtom};
    use mipstore_dataset::{DatasetConfig, FieldConfig, Timesteps};

    use super::*;

    fn dataset() -> Arc<Dataset> {
        Dataset::open(DatasetConfig {
            name: "cfg".into(),
            bitmask: "V0101".parse().unwrap(),
            logic_box: None,
            bits_per_block: 2,
            fields: vec![FieldConfig::new("v", DType::scalar(DTypeAtom::U8))],
            timesteps: Timesteps::default(),
            default_access: None,
        })
        .unwrap()
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("128mb").unwrap(), 128 << 20);
        assert_eq!(parse_byte_size("2GB").unwrap(), 2 << 30);
        assert_eq!(parse_byte_size("512").unwrap(), 512);
        assert_eq!(parse_byte_size("64 kb").unwrap(), 64 << 10);
        assert!(parse_byte_size("lots").is_err());
    }

    #[test]
    fn test_config_tree_roundtrip() {
        let json = serde_json::json!({
            "type": "multiplex",
            "children": [
                {"type": "ram", "available": "1mb"},
                {"type": "disk", "path": "/tmp/blocks"},
            ],
        });
        let config: AccessConfig = serde_json::from_value(json).unwrap();
        let ds = dataset();
        let access = create_access(&ds, &config).unwrap();
        assert_eq!(access.name(), "multiplex");
        assert!(access.can_read());
        assert!(access.can_write());
    }

    #[test]
    fn test_filter_wraps_inner() {
        let ds = dataset();
        let config: AccessConfig = serde_json::from_value(serde_json::json!({
            "type": "filter",
            "inner": {"type": "ram"},
        }))
        .unwrap();
        let access = create_access(&ds, &config).unwrap();
        assert_eq!(access.name(), "filter");
        assert_eq!(access.bits_per_block(), ds.bits_per_block());
    }

    #[test]
    fn test_unknown_kernel_is_rejected() {
        let ds = dataset();
        let config = AccessConfig::Filter {
            inner: Box::new(AccessConfig::Ram {
                available: 1024,
                chmod: "rw".into(),
            }),
            kernel: "haar".into(),
        };
        assert!(create_access(&ds, &config).is_err());
    }
}
