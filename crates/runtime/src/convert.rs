//! Application of per-edge message conversion rules (§graph `msg_conversion`
//! blocks): each rule either copies a property from the original tree or
//! sets a fixed value, over either a copy of the original properties or an
//! empty tree.

use crate::{Error, ErrorCode, Result};
use message::Message;
use models::{ConversionMode, MsgConversion, PerPropertyRule};
use value::{Path, Value};

/// Rewrite `message`'s property tree in place per `conversion`. The caller
/// owns the message exclusively (conversions run on forward copies, before
/// a message is ever shared).
pub(crate) fn apply(conversion: &MsgConversion, message: &mut Message) -> Result<()> {
    let original = message.properties();

    let mut next = if conversion.keep_original {
        original.clone()
    } else {
        Value::object()
    };

    for rule in &conversion.rules {
        apply_rule(rule, original, &mut next)?;
    }

    message.set_properties(next)?;
    Ok(())
}

fn apply_rule(rule: &PerPropertyRule, original: &Value, next: &mut Value) -> Result<()> {
    let path: Path = rule
        .path
        .parse()
        .map_err(|_| bad_rule(format!("bad rule path '{}'", rule.path)))?;

    match rule.conversion_mode {
        ConversionMode::FixedValue => {
            let fixed = rule
                .value
                .as_ref()
                .ok_or_else(|| bad_rule(format!("rule '{}' carries no value", rule.path)))?;
            path.upsert(next, value::from_json(fixed)?)?;
        }
        ConversionMode::FromOriginal => {
            let from = rule
                .original_path
                .as_ref()
                .ok_or_else(|| bad_rule(format!("rule '{}' names no original_path", rule.path)))?;
            let from: Path = from
                .parse()
                .map_err(|_| bad_rule(format!("bad original_path '{from}'")))?;

            // A missing source property is not an error; the rule simply
            // contributes nothing, mirroring an absent optional field.
            if let Some(found) = from.query(original) {
                path.upsert(next, found.clone())?;
            }
        }
    }
    Ok(())
}

fn bad_rule(message: String) -> Error {
    Error::new(ErrorCode::InvalidArgument, message)
}
