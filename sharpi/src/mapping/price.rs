use super::{
    Mapped, active, custom_attributes, decimal, id, key_part, key_text, or_default, or_null,
    text_or,
};
use crate::types::{CanonicalRecord, InputRecord, NaturalKey};
use serde_json::Value;

const DEFAULT_DISCOUNT_TYPE: &str = "percentage";

pub(super) fn map(record: &InputRecord) -> Mapped {
    let mut payload = CanonicalRecord::new();
    payload.insert("price_table_id".into(), or_null(id(record, "price_table_id")));
    payload.insert("product_code".into(), or_null(key_text(record, "product_code")));
    payload.insert("product_unit_id".into(), or_null(id(record, "product_unit_id")));
    payload.insert("price".into(), or_null(decimal(record, "price")));
    payload.insert(
        "max_allowed_discount".into(),
        or_null(decimal(record, "max_allowed_discount")),
    );
    payload.insert(
        "discount_type".into(),
        or_default(
            text_or(record, "discount_type", DEFAULT_DISCOUNT_TYPE),
            Value::String(DEFAULT_DISCOUNT_TYPE.into()),
        ),
    );
    payload.insert("active".into(), active(record));
    payload.insert(
        "custom_attributes".into(),
        custom_attributes(record, "custom_attributes"),
    );

    let mut parts = vec![
        key_part(&payload["price_table_id"]),
        key_part(&payload["product_code"]),
    ];
    // The unit is the only optional key component: a price without one is addressed by
    // table and product alone.
    if let Some(unit) = key_part(&payload["product_unit_id"]) {
        parts.push(Some(unit));
    }

    Mapped {
        payload,
        key: NaturalKey::new(parts),
    }
}

#[cfg(test)]
mod tests {
    use crate::types::EntityKind;
    use serde_json::{Value, json};

    fn map(value: Value) -> super::Mapped {
        let Value::Object(record) = value else {
            panic!("test record must be a mapping");
        };
        EntityKind::Price.map(&record)
    }

    #[test]
    fn full_field_set_with_defaults() {
        let mapped = map(json!({"price_table_id": 4, "product_code": "P-1", "price": 19.9}));
        assert_eq!(
            Value::Object(mapped.payload),
            json!({
                "price_table_id": 4,
                "product_code": "P-1",
                "product_unit_id": null,
                "price": "19.9",
                "max_allowed_discount": null,
                "discount_type": "percentage",
                "active": true,
                "custom_attributes": {}
            })
        );
        assert_eq!(mapped.key.segments(), Some(vec!["4", "P-1"]));
    }

    #[test]
    fn null_price_stays_null() {
        let mapped = map(json!({
            "price_table_id": "T1",
            "product_code": "P-1",
            "price": null,
            "max_allowed_discount": 5
        }));
        assert_eq!(mapped.payload["price"], Value::Null);
        assert_eq!(mapped.payload["max_allowed_discount"], json!("5"));
    }

    #[test]
    fn unit_id_extends_the_key() {
        let mapped = map(json!({
            "price_table_id": 4,
            "product_code": "P-1",
            "product_unit_id": 2,
            "price": "10.00",
            "discount_type": "amount"
        }));
        assert_eq!(mapped.payload["price"], json!("10.00"));
        assert_eq!(mapped.payload["discount_type"], json!("amount"));
        assert_eq!(mapped.key.segments(), Some(vec!["4", "P-1", "2"]));
    }

    #[test]
    fn malformed_values_keep_the_record() {
        let mapped = map(json!({
            "price_table_id": [4],
            "product_code": " P-1 ",
            "price": "grátis",
            "max_allowed_discount": "2.5",
            "discount_type": {"kind": "amount"}
        }));
        assert_eq!(mapped.payload["price_table_id"], Value::Null);
        assert_eq!(mapped.payload["product_code"], json!("P-1"));
        assert_eq!(mapped.payload["price"], Value::Null);
        assert_eq!(mapped.payload["max_allowed_discount"], json!("2.5"));
        assert_eq!(mapped.payload["discount_type"], json!("percentage"));
        assert_eq!(mapped.payload.len(), 8);
        assert_eq!(mapped.key.segments(), None);
    }
}
