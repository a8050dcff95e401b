use serde::{Deserialize, Serialize};

/// MsgConversion rewrites the property tree of a message crossing one graph
/// edge. Rules apply in declared order; `keep_original` chooses whether they
/// apply over a copy of the original tree or over an empty one. An optional
/// `result` block is applied symmetrically to the matching CmdResult on the
/// way back.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MsgConversion {
    #[serde(rename = "type")]
    pub conversion_type: ConversionType,
    pub rules: Vec<PerPropertyRule>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keep_original: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<MsgConversion>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversionType {
    PerProperty,
}

/// One property rewrite: set `path` either to a fixed value or to whatever
/// the original message carried at `original_path`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PerPropertyRule {
    pub path: String,
    pub conversion_mode: ConversionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMode {
    FixedValue,
    FromOriginal,
}
