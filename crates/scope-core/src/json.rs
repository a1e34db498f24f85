#![forbid(unsafe_code)]

//! Conversion between [`Value`] and `serde_json::Value`.
//!
//! JSON has no `undefined`, NaN, or infinities: `Undefined` and non-finite
//! numbers become `null`. JSON numbers outside `f64` precision are rounded.

use serde_json::Value as Json;

use crate::value::{List, Map, Value};

impl From<Json> for Value {
    fn from(json: Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
            Json::String(s) => Value::from(s),
            Json::Array(items) => {
                Value::List(List::from_vec(items.into_iter().map(Value::from).collect()))
            }
            Json::Object(entries) => Value::Map(Map::from_entries(
                entries.into_iter().map(|(k, v)| (k, Value::from(v))),
            )),
        }
    }
}

impl Value {
    /// Render this value as JSON.
    ///
    /// Cyclic containers are cut at the point of recursion and rendered as
    /// `null`.
    #[must_use]
    pub fn to_json(&self) -> Json {
        to_json_guarded(self, &mut Vec::new())
    }
}

fn to_json_guarded(value: &Value, path: &mut Vec<usize>) -> Json {
    match value {
        Value::Undefined | Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Number(n) => serde_json::Number::from_f64(*n).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(list) => {
            if path.contains(&list.addr()) {
                return Json::Null;
            }
            path.push(list.addr());
            let items = list
                .to_vec()
                .iter()
                .map(|item| to_json_guarded(item, path))
                .collect();
            path.pop();
            Json::Array(items)
        }
        Value::Map(map) => {
            if path.contains(&map.addr()) {
                return Json::Null;
            }
            path.push(map.addr());
            let entries = map
                .to_btree_map()
                .iter()
                .map(|(k, v)| (k.clone(), to_json_guarded(v, path)))
                .collect();
            path.pop();
            Json::Object(entries)
        }
    }
}
