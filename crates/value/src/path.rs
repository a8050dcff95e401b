use super::{Error, Result, Value};
use std::fmt::Display;
use std::str::FromStr;

/// Path is a parsed dotted property path, as in `a.b[2].c`:
/// property names separated by dots, with `[n]` array subscripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path(Vec<Token>);

/// Token is one step of a Path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Object property name.
    Prop(String),
    /// Array subscript.
    Index(usize),
}

impl Path {
    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.0.iter()
    }

    /// Query the Value addressed by this Path, or None if the location
    /// doesn't exist.
    pub fn query<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        let mut node = root;

        for token in &self.0 {
            node = match (token, node) {
                (Token::Prop(name), Value::Object(fields)) => fields.get(name)?,
                (Token::Index(ind), Value::Array(items)) => items.get(*ind)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Set `value` at this Path, creating intermediate objects and arrays
    /// as needed. A subscript may address an existing item or the one
    /// position past the current extent (an append).
    pub fn upsert(&self, root: &mut Value, value: Value) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::InvalidPath(String::new()));
        }
        let mut node = root;

        for (ind, token) in self.0.iter().enumerate() {
            let last = ind + 1 == self.0.len();

            // A Null node takes the shape the token requires of it.
            if node.is_null() {
                *node = match token {
                    Token::Prop(_) => Value::object(),
                    Token::Index(_) => Value::Array(Vec::new()),
                };
            }

            match token {
                Token::Prop(name) => match node {
                    Value::Object(fields) => {
                        if last {
                            fields.insert(name.clone(), value);
                            return Ok(());
                        }
                        node = fields.entry(name.clone()).or_insert(Value::Null);
                    }
                    other => {
                        return Err(Error::TypeMismatch {
                            expected: crate::Type::Object,
                            actual: other.value_type(),
                        })
                    }
                },
                Token::Index(sub) => match node {
                    Value::Array(items) => {
                        if *sub > items.len() {
                            return Err(Error::PathNotFound(self.to_string()));
                        }
                        if *sub == items.len() {
                            items.push(Value::Null);
                        }
                        if last {
                            items[*sub] = value;
                            return Ok(());
                        }
                        node = &mut items[*sub];
                    }
                    other => {
                        return Err(Error::TypeMismatch {
                            expected: crate::Type::Array,
                            actual: other.value_type(),
                        })
                    }
                },
            }
        }
        unreachable!("loop returns at the final token")
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPath(s.to_string());

        if s.is_empty() {
            return Err(invalid());
        }
        let mut tokens = Vec::new();

        for segment in s.split('.') {
            // Each dotted segment is a property name followed by zero or
            // more [n] subscripts.
            let (name, mut rest) = match segment.find('[') {
                Some(pos) => segment.split_at(pos),
                None => (segment, ""),
            };
            if name.is_empty() || name.contains(']') {
                return Err(invalid());
            }
            tokens.push(Token::Prop(name.to_string()));

            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(invalid)?;
                let sub: usize = stripped[..close].parse().map_err(|_| invalid())?;
                tokens.push(Token::Index(sub));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(invalid());
            }
        }
        Ok(Path(tokens))
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (ind, token) in self.0.iter().enumerate() {
            match token {
                Token::Prop(name) => {
                    if ind != 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                Token::Index(sub) => write!(f, "[{sub}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::json::from_json;
    use serde_json::json;

    #[test]
    fn test_path_parsing() {
        use Token::*;

        let path: Path = "a.b[2].c".parse().unwrap();
        assert_eq!(
            path.0,
            vec![
                Prop("a".to_string()),
                Prop("b".to_string()),
                Index(2),
                Prop("c".to_string())
            ]
        );
        assert_eq!(path.to_string(), "a.b[2].c");

        let path: Path = "arr[0][1]".parse().unwrap();
        assert_eq!(
            path.0,
            vec![Prop("arr".to_string()), Index(0), Index(1)]
        );

        for bad in ["", ".", "a.", ".a", "a[", "a[x]", "a[1", "[0]", "a]b"] {
            assert!(bad.parse::<Path>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_path_query() {
        let doc = from_json(&json!({
            "a": {"b": [null, {"c": 42}]},
            "empty": {},
            "s": "hello",
        }))
        .unwrap();

        for (path, expect) in [
            ("a.b[1].c", Some(Value::Int64(42))),
            ("a.b[0]", Some(Value::Null)),
            ("s", Some(Value::String("hello".to_string()))),
            ("a.b[2]", None),
            ("a.missing", None),
            ("s.nested", None),
            ("a.b.c", None), // Subscript required for an array.
        ] {
            let path: Path = path.parse().unwrap();
            assert_eq!(path.query(&doc).cloned(), expect);
        }
    }

    #[test]
    fn test_path_upsert() {
        let mut doc = Value::object();

        for (path, value) in [
            ("a", Value::Int64(1)),
            ("b.c", Value::from("x")),
            ("arr[0]", Value::Bool(true)),
            ("arr[1]", Value::Int64(7)),
            ("b.d[0].e", Value::Null),
        ] {
            let path: Path = path.parse().unwrap();
            path.upsert(&mut doc, value).unwrap();
        }

        let expect = from_json(&json!({
            "a": 1,
            "b": {"c": "x", "d": [{"e": null}]},
            "arr": [true, 7],
        }))
        .unwrap();
        assert_eq!(doc, expect);

        // Replacement of an existing location.
        let path: Path = "a".parse().unwrap();
        path.upsert(&mut doc, Value::Int64(2)).unwrap();
        assert_eq!(path.query(&doc), Some(&Value::Int64(2)));

        // An index more than one past the extent is refused.
        let path: Path = "arr[9]".parse().unwrap();
        assert!(path.upsert(&mut doc, Value::Null).is_err());

        // As is descending through a scalar.
        let path: Path = "a.b".parse().unwrap();
        assert!(path.upsert(&mut doc, Value::Null).is_err());
    }
}
