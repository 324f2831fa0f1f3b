//! NBT <-> JSON conversion for dumping and importing chunks.
//!
//! Typed arrays become single-key objects (`{"__long_array": [...]}`) so
//! they come back as arrays rather than lists. Other numeric widths are
//! not preserved: integers return as Int (or Long past the i32 range) and
//! floats as Double.

use std::collections::HashMap;

use fastnbt::{ByteArray, IntArray, LongArray, Value};
use serde_json::{Map, Number, Value as JsonValue};

const BYTE_ARRAY_KEY: &str = "__byte_array";
const INT_ARRAY_KEY: &str = "__int_array";
const LONG_ARRAY_KEY: &str = "__long_array";

pub fn nbt_to_json(nbt: &Value) -> JsonValue {
    match nbt {
        Value::Compound(c) => JsonValue::Object(
            c.iter().map(|(k, v)| (k.clone(), nbt_to_json(v))).collect::<Map<_, _>>(),
        ),
        Value::List(l) => JsonValue::Array(l.iter().map(nbt_to_json).collect()),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Byte(b) => JsonValue::Number((*b).into()),
        Value::Short(s) => JsonValue::Number((*s).into()),
        Value::Int(i) => JsonValue::Number((*i).into()),
        Value::Long(l) => JsonValue::Number((*l).into()),
        Value::Float(f) => float_to_json(*f as f64),
        Value::Double(d) => float_to_json(*d),
        Value::ByteArray(ba) => tagged_array(BYTE_ARRAY_KEY, ba.iter().map(|&b| b as i64)),
        Value::IntArray(ia) => tagged_array(INT_ARRAY_KEY, ia.iter().map(|&i| i as i64)),
        Value::LongArray(la) => tagged_array(LONG_ARRAY_KEY, la.iter().copied()),
    }
}

pub fn json_to_nbt(json: &JsonValue) -> Value {
    match json {
        JsonValue::Object(map) => {
            if let Some(array) = tagged_array_from_json(map) {
                return array;
            }
            let compound: HashMap<String, Value> = map.iter().map(|(k, v)| (k.clone(), json_to_nbt(v))).collect();
            Value::Compound(compound)
        }
        JsonValue::Array(arr) => Value::List(arr.iter().map(json_to_nbt).collect()),
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Number(num) => {
            if let Some(i) = num.as_i64() {
                match i32::try_from(i) {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::Long(i),
                }
            } else {
                Value::Double(num.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::Bool(b) => Value::Byte(*b as i8),
        JsonValue::Null => Value::Byte(0),
    }
}

fn float_to_json(f: f64) -> JsonValue {
    // NaN and infinities have no JSON form.
    JsonValue::Number(Number::from_f64(f).unwrap_or_else(|| Number::from(0)))
}

fn tagged_array(key: &str, values: impl Iterator<Item = i64>) -> JsonValue {
    let mut map = Map::new();
    map.insert(key.to_string(), JsonValue::Array(values.map(|v| JsonValue::Number(v.into())).collect()));
    JsonValue::Object(map)
}

fn tagged_array_from_json(map: &Map<String, JsonValue>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (key, JsonValue::Array(items)) = map.iter().next()? else {
        return None;
    };
    let longs = items.iter().filter_map(JsonValue::as_i64);
    match key.as_str() {
        BYTE_ARRAY_KEY => Some(Value::ByteArray(ByteArray::new(longs.map(|v| v as i8).collect()))),
        INT_ARRAY_KEY => Some(Value::IntArray(IntArray::new(longs.map(|v| v as i32).collect()))),
        LONG_ARRAY_KEY => Some(Value::LongArray(LongArray::new(longs.collect()))),
        _ => None,
    }
}
