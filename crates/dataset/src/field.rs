use std::collections::BTreeMap;

use mipstore_array::{DType, Layout};

/// One named quantity stored by a dataset.
///
/// The stored `name` never carries query parameters; a lookup such as
/// `dataset.field("temperature?time=30")` resolves the base field and hands
/// back a copy with `params` populated, so a query can honor per-field
/// overrides without the caller unpacking them.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: String,
    pub dtype: DType,
    /// Scalar fill value for samples no block provided.
    pub default_value: f64,
    /// Layout of this field's block buffers on disk and on the wire.
    pub default_layout: Layout,
    /// Codec tag for this field's block payloads (`raw`, `zip`, `lz4`, ...).
    pub default_codec: String,
    /// Per-query overrides parsed from a `name?key=value` lookup.
    pub params: BTreeMap<String, String>,
}

impl Field {
    pub fn new(name: impl Into<String>, dtype: DType) -> Self {
        Self {
            name: name.into(),
            dtype,
            default_value: 0.0,
            default_layout: Layout::Hz,
            default_codec: "raw".to_owned(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_default_value(mut self, value: f64) -> Self {
        self.default_value = value;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.default_layout = layout;
        self
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.default_codec = codec.into();
        self
    }

    pub fn valid(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// The time this field pins via `?time=...`, if any.
    pub fn time_override(&self) -> Option<f64> {
        self.param("time").and_then(|v| v.parse().ok())
    }
}

/// Splits `"name?k1=v1&k2=v2"` into the bare name and its parameters.
pub(crate) fn split_params(name: &str) -> (&str, BTreeMap<String, String>) {
    match name.split_once('?') {
        None => (name, BTreeMap::new()),
        Some((bare, query)) => {
            let params = query
                .split('&')
                .filter(|kv| !kv.is_empty())
                .map(|kv| match kv.split_once('=') {
                    Some((k, v)) => (k.to_owned(), v.to_owned()),
                    None => (kv.to_owned(), String::new()),
                })
                .collect();
            (bare, params)
        }
    }
}
