use super::{Mapped, active, custom_attributes, key_part, key_text, or_null, text};
use crate::types::{CanonicalRecord, InputRecord, NaturalKey};

const TEXT_FIELDS: [&str; 8] = [
    "name",
    "maker",
    "sku",
    "barcode",
    "ncm",
    "description",
    "observation",
    "line",
];

pub(super) fn map(record: &InputRecord) -> Mapped {
    let mut payload = CanonicalRecord::new();
    payload.insert("code".into(), or_null(key_text(record, "code")));
    for name in TEXT_FIELDS {
        payload.insert(name.into(), or_null(text(record, name)));
    }
    payload.insert("active".into(), active(record));
    payload.insert(
        "custom_attributes".into(),
        custom_attributes(record, "custom_attributes"),
    );

    let key = NaturalKey::single(key_part(&payload["code"]));
    Mapped { payload, key }
}
