use super::{Error, Result, Value};
use indexmap::IndexMap;

// Byte strings have no JSON type of their own. They round-trip through an
// object carrying a single, reserved "$binary" property holding base64.
const BINARY_PROP: &str = "$binary";

/// Map a serde_json document into a Value tree. JSON numbers carry no width,
/// so integers become Int64 (Uint64 where only u64 can hold them) and all
/// other numbers become Float64.
pub fn from_json(doc: &serde_json::Value) -> Result<Value> {
    Ok(match doc {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(n) = n.as_i64() {
                Value::Int64(n)
            } else if let Some(n) = n.as_u64() {
                Value::Uint64(n)
            } else {
                Value::Float64(n.as_f64().expect("JSON number is i64, u64, or f64"))
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::Array(
            items.iter().map(from_json).collect::<Result<Vec<_>>>()?,
        ),
        serde_json::Value::Object(fields) => {
            if fields.len() == 1 {
                if let Some(serde_json::Value::String(b)) = fields.get(BINARY_PROP) {
                    let decoded = base64::decode(b)
                        .map_err(|_| Error::InvalidWire("bad base64 in $binary"))?;
                    return Ok(Value::Bytes(decoded.into()));
                }
            }
            let mut object = IndexMap::with_capacity(fields.len());
            for (name, field) in fields {
                object.insert(name.clone(), from_json(field)?);
            }
            Value::Object(object)
        }
    })
}

/// Project a Value tree into serde_json. Fails on opaque pointers and on
/// non-finite floats, neither of which JSON can express.
pub fn to_json(value: &Value) -> Result<serde_json::Value> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int8(n) => (*n).into(),
        Value::Int16(n) => (*n).into(),
        Value::Int32(n) => (*n).into(),
        Value::Int64(n) => (*n).into(),
        Value::Uint8(n) => (*n).into(),
        Value::Uint16(n) => (*n).into(),
        Value::Uint32(n) => (*n).into(),
        Value::Uint64(n) => (*n).into(),
        Value::Float32(f) => float_to_json(*f as f64)?,
        Value::Float64(f) => float_to_json(*f)?,
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::json!({ BINARY_PROP: base64::encode(b) }),
        Value::Array(items) => serde_json::Value::Array(
            items.iter().map(to_json).collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(fields) => {
            let mut object = serde_json::Map::with_capacity(fields.len());
            for (name, field) in fields {
                object.insert(name.clone(), to_json(field)?);
            }
            serde_json::Value::Object(object)
        }
        Value::Ptr(_) => return Err(Error::UnserializableProperty),
    })
}

fn float_to_json(f: f64) -> Result<serde_json::Value> {
    match serde_json::Number::from_f64(f) {
        Some(n) => Ok(serde_json::Value::Number(n)),
        None => Err(Error::NonFiniteNumber(f)),
    }
}

/// Parse a JSON text into a Value tree.
pub fn from_str(text: &str) -> Result<Value> {
    from_json(&serde_json::from_str(text)?)
}

/// Render a Value tree as JSON text.
pub fn to_string(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&to_json(value)?)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Opaque;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let doc = json!({
            "null": null,
            "t": true,
            "pos": 42,
            "neg": -42,
            "big": u64::MAX,
            "pi": 3.5,
            "s": "hello",
            "arr": [1, [2, {"three": 3}]],
        });

        let value = from_json(&doc).unwrap();
        assert_eq!(to_json(&value).unwrap(), doc);

        // Widths collapse per the JSON mapping.
        assert_eq!(value.get(&"pos".parse().unwrap()).unwrap(), &Value::Int64(42));
        assert_eq!(
            value.get(&"big".parse().unwrap()).unwrap(),
            &Value::Uint64(u64::MAX)
        );
        assert_eq!(
            value.get(&"pi".parse().unwrap()).unwrap(),
            &Value::Float64(3.5)
        );
    }

    #[test]
    fn test_narrow_widths_widen() {
        let value = Value::Array(vec![
            Value::Int8(-7),
            Value::Uint16(300),
            Value::Float32(0.5),
        ]);
        let doc = to_json(&value).unwrap();
        assert_eq!(doc, json!([-7, 300, 0.5]));
        assert_eq!(
            from_json(&doc).unwrap(),
            Value::Array(vec![
                Value::Int64(-7),
                Value::Int64(300),
                Value::Float64(0.5)
            ])
        );
    }

    #[test]
    fn test_bytes_round_trip() {
        let value = Value::Bytes(bytes::Bytes::from_static(b"\x00\x01\xff"));
        let doc = to_json(&value).unwrap();
        assert_eq!(from_json(&doc).unwrap(), value);
    }

    #[test]
    fn test_unserializable() {
        assert!(matches!(
            to_json(&Value::Ptr(Opaque::new(1u32))),
            Err(Error::UnserializableProperty)
        ));
        assert!(matches!(
            to_json(&Value::Float64(f64::INFINITY)),
            Err(Error::NonFiniteNumber(_))
        ));
    }

    #[test]
    fn test_property_order_is_preserved() {
        let text = r#"{"z": 1, "a": 2, "m": 3}"#;
        assert_eq!(to_string(&from_str(text).unwrap()).unwrap(), text.replace(" ", ""));
    }
}
