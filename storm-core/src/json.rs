///
/// JSON rendering of records.
///
/// Produces one object per record with a member per column, in column order.
/// Integers and floats become JSON numbers (a non-finite float becomes
/// `null`), text and timestamps become strings.
///

use serde_json::{Map, Number, Value as Json};

use crate::errors::Result;
use crate::record::Retrievable;
use crate::value::FieldKind;

pub fn to_json(record: &dyn Retrievable) -> Result<Json> {
    let mut object = Map::new();

    for value in record.get_values()? {
        let member = match value.kind {
            Some(FieldKind::Integer) => Json::from(value.as_integer().unwrap_or_default()),
            Some(FieldKind::Float) => value
                .as_float()
                .and_then(Number::from_f64)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Some(FieldKind::Text | FieldKind::Timestamp) => Json::String(value.to_string()),
            None => Json::Null,
        };
        object.insert(value.name.clone(), member);
    }

    Ok(Json::Object(object))
}

pub fn to_json_string(record: &dyn Retrievable) -> Result<String> {
    Ok(to_json(record)?.to_string())
}
