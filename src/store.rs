use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Writable internal state of a component node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store {
    values: Map<String, Value>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Looks `key` up, following dots into nested objects (`user.name`).
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.values.get(key) {
            return Some(value);
        }
        let mut parts = key.split('.');
        let mut current = self.values.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn set_multiple<I, K>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in values {
            self.values.insert(key.into(), value);
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

/// Inbound values a node received from its parent's markup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Props(Store);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.set(key, value);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn to_value(&self) -> Value {
        self.0.to_value()
    }
}

/// Text form of a value as it lands in markup. Strings are unquoted and
/// null renders empty.
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Script-style truthiness: missing, null, false, zero and empty string are falsy.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_dotted_lookup() {
        let mut store = Store::new();
        store.set("user", json!({ "name": "Ada", "tags": ["a", "b"] }));
        assert_eq!(store.get("user.name"), Some(&json!("Ada")));
        assert_eq!(store.get("user.tags.1"), Some(&json!("b")));
        assert_eq!(store.get("user.missing"), None);
        assert_eq!(store.get("nope.name"), None);
    }

    #[test]
    fn test_literal_dotted_key_wins() {
        let mut store = Store::new();
        store.set("a.b", 1);
        store.set("a", json!({ "b": 2 }));
        assert_eq!(store.get("a.b"), Some(&json!(1)));
    }

    #[test]
    fn test_set_multiple_and_clear() {
        let mut store = Store::new();
        store.set_multiple(vec![("count", json!(0)), ("label", json!("x"))]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.to_value(), json!({ "count": 0, "label": "x" }));
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_props_delegate() {
        let mut props = Props::new();
        props.set("label", "Click");
        assert_eq!(props.get("label"), Some(&json!("Click")));
        assert_eq!(serde_json::to_value(&props).unwrap(), json!({ "label": "Click" }));
    }

    #[rstest]
    #[case(None, "")]
    #[case(Some(json!(null)), "")]
    #[case(Some(json!("hi")), "hi")]
    #[case(Some(json!(0)), "0")]
    #[case(Some(json!(5)), "5")]
    #[case(Some(json!(true)), "true")]
    #[case(Some(json!([1, 2])), "[1,2]")]
    fn test_render_value(#[case] value: Option<Value>, #[case] expected: &str) {
        assert_eq!(render_value(value.as_ref()), expected);
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(json!(false)), false)]
    #[case(Some(json!(0)), false)]
    #[case(Some(json!("")), false)]
    #[case(Some(json!(1)), true)]
    #[case(Some(json!("no")), true)]
    #[case(Some(json!({})), true)]
    fn test_is_truthy(#[case] value: Option<Value>, #[case] expected: bool) {
        assert_eq!(is_truthy(value.as_ref()), expected);
    }
}
