use super::{
    Mapped, active, custom_attributes, discard, id, id_list, key_part, key_text, nested,
    or_default, or_null, text,
};
use crate::types::{CanonicalRecord, InputRecord, NaturalKey};
use serde_json::{Map, Value};

const ADDRESS_TEXT_FIELDS: [&str; 6] = ["street", "city", "state", "zip", "country", "full_address"];

pub(super) fn map(record: &InputRecord) -> Mapped {
    let mut payload = CanonicalRecord::new();
    payload.insert("code".into(), or_null(key_text(record, "code")));
    for name in ["name", "legal_name", "email", "tax_id"] {
        payload.insert(name.into(), or_null(text(record, name)));
    }
    for name in ["billing_address", "shipping_address"] {
        payload.insert(name.into(), address(record, name));
    }
    payload.insert("active".into(), active(record));
    payload.insert(
        "default_price_list_id".into(),
        or_null(id(record, "default_price_list_id")),
    );
    payload.insert(
        "salesperson_ids".into(),
        or_default(id_list(record, "salesperson_ids"), Value::Array(Vec::new())),
    );
    payload.insert(
        "custom_attributes".into(),
        custom_attributes(record, "custom_attributes"),
    );

    let key = NaturalKey::single(key_part(&payload["code"]));
    Mapped { payload, key }
}

/// An address with every field present; a malformed address reads as an empty one.
fn address(record: &InputRecord, name: &str) -> Value {
    let empty = Map::new();
    let source = match nested(record, name) {
        Ok(source) => source.unwrap_or(&empty),
        Err(err) => {
            discard(&err);
            &empty
        }
    };

    let mut address = Map::new();
    for sub in ADDRESS_TEXT_FIELDS {
        let value = or_null(text(source, sub).map_err(|e| e.within(name)));
        address.insert(sub.into(), value);
    }
    address.insert(
        "custom_attributes".into(),
        custom_attributes(source, "custom_attributes"),
    );

    Value::Object(address)
}
