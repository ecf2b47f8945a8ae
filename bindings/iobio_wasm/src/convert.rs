use iobio_core::Value;
use js_sys::{Array, Object, Reflect};
use wasm_bindgen::JsValue;

/// Converts a mirrored value into plain JS objects, arrays and primitives.
pub(crate) fn value_to_js(value: &Value) -> Result<JsValue, JsValue> {
    Ok(match value {
        Value::Null => JsValue::NULL,
        Value::Bool(b) => JsValue::from_bool(*b),
        // JS numbers are doubles; integers beyond 2^53 lose precision.
        Value::Integer(n) => JsValue::from_f64(*n as f64),
        Value::Float(n) => JsValue::from_f64(*n),
        Value::Text(s) => JsValue::from_str(s),
        Value::Array(items) => {
            let array = Array::new();
            for item in items {
                array.push(&value_to_js(item)?);
            }
            array.into()
        }
        Value::Map(entries) => {
            let object = Object::new();
            for (key, item) in entries {
                Reflect::set(&object, &JsValue::from_str(key), &value_to_js(item)?)?;
            }
            object.into()
        }
    })
}
