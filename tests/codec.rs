use std::io::Cursor;

use asterix::record::{decode_message, encode_message, read_records, Record, Value};
use asterix::uap::{CategoryRegistry, CategorySpec, FieldKind, FieldSpec};
use asterix::{Error, Result};

/// A CAT048-flavored profile exercising every wire shape.
fn cat048() -> CategorySpec {
    CategorySpec::new(
        48,
        vec![
            FieldSpec::new("010", FieldKind::Fixed { len: 2 }),
            FieldSpec::new("140", FieldKind::Fixed { len: 3 }),
            FieldSpec::new("020", FieldKind::Extended { group_len: 1 }),
            FieldSpec::new(
                "130",
                FieldKind::Compound {
                    parts: vec![
                        FieldSpec::new("SRL", FieldKind::Fixed { len: 1 }),
                        FieldSpec::new("SRR", FieldKind::Fixed { len: 1 }),
                        FieldSpec::new("SAM", FieldKind::Fixed { len: 1 }),
                    ],
                },
            ),
            FieldSpec::new("220", FieldKind::Fixed { len: 3 }),
            FieldSpec::new(
                "250",
                FieldKind::Repetitive {
                    item: Box::new(FieldSpec::new("250/mb", FieldKind::Fixed { len: 8 })),
                },
            ),
            FieldSpec::new("RE", FieldKind::Explicit { inner: None }),
            FieldSpec::new("SP", FieldKind::Explicit { inner: None }),
        ],
    )
}

fn cat034() -> CategorySpec {
    CategorySpec::new(
        34,
        vec![
            FieldSpec::new("000", FieldKind::Fixed { len: 1 }),
            FieldSpec::new("010", FieldKind::Fixed { len: 2 }),
            FieldSpec::new("030", FieldKind::Fixed { len: 3 }),
        ],
    )
}

fn registry() -> CategoryRegistry {
    let registry = CategoryRegistry::from_specs([cat048(), cat034()]);
    for cat in registry.categories() {
        registry.get(cat).unwrap().validate().unwrap();
    }
    registry
}

/// One CAT048 data block with I048/010, 140, 020 and 250 present.
fn golden_block() -> Vec<u8> {
    hex::decode("30001ce419293a85304100020123456789abcdeffedcba9876543210")
        .expect("bad fixture hex")
}

#[test]
fn golden_block_decodes_field_by_field() {
    let message = decode_message(&registry(), &golden_block());
    assert!(message.error.is_none(), "unexpected error: {:?}", message.error);
    assert_eq!(message.consumed, golden_block().len());
    assert_eq!(message.records.len(), 1);

    let record = &message.records[0];
    assert_eq!(record.category, 48);
    assert_eq!(record.get("010"), Some(&Value::Bytes(vec![0x19, 0x29])));
    assert_eq!(record.get("140"), Some(&Value::Bytes(vec![0x3a, 0x85, 0x30])));
    assert_eq!(record.get("020"), Some(&Value::Bytes(vec![0x41, 0x00])));
    assert_eq!(
        record.get("250"),
        Some(&Value::Items(vec![
            Value::Bytes(hex::decode("0123456789abcdef").unwrap()),
            Value::Bytes(hex::decode("fedcba9876543210").unwrap()),
        ]))
    );
    assert!(record.get("130").is_none());
    assert!(record.get("RE").is_none());
}

#[test]
fn golden_block_round_trips_byte_exact() {
    let registry = registry();
    let message = decode_message(&registry, &golden_block());
    let encoded = encode_message(&registry, &message.records).unwrap();
    assert_eq!(
        hex::encode(encoded),
        hex::encode(golden_block()),
        "re-encoded block differs from fixture"
    );
}

#[test]
fn mixed_category_message_round_trips() {
    let registry = registry();
    let records = vec![
        Record::new(34)
            .with_field("000", Value::Bytes(vec![0x01]))
            .with_field("010", Value::Bytes(vec![0x19, 0x29])),
        Record::new(48)
            .with_field("010", Value::Bytes(vec![0x19, 0x29]))
            .with_field(
                "130",
                Value::Group(vec![
                    ("SRL".into(), Value::Bytes(vec![0x07])),
                    ("SAM".into(), Value::Bytes(vec![0xc8])),
                ]),
            )
            .with_field("RE", Value::Bytes(vec![0xde, 0xad])),
        Record::new(48).with_field("SP", Value::Bytes(vec![])),
    ];

    let encoded = encode_message(&registry, &records).unwrap();
    let message = decode_message(&registry, &encoded);
    assert!(message.error.is_none(), "unexpected error: {:?}", message.error);
    assert_eq!(message.consumed, encoded.len());
    assert_eq!(message.records, records);
}

#[test]
fn records_before_a_bad_block_survive() {
    let registry = registry();
    let mut dat = golden_block();
    // category 99 has no UAP
    dat.extend([0x63, 0x00, 0x04, 0x00]);
    dat.extend(golden_block());

    let message = decode_message(&registry, &dat);
    assert_eq!(message.records.len(), 1);
    assert_eq!(message.consumed, golden_block().len());
    assert!(matches!(message.error, Some(Error::UnknownCategory(99))));
}

#[test]
fn truncated_tail_reports_unconsumed_bytes() {
    let registry = registry();
    let mut dat = golden_block();
    let tail = golden_block();
    dat.extend(&tail[..tail.len() - 5]);

    let message = decode_message(&registry, &dat);
    assert_eq!(message.records.len(), 1);
    assert_eq!(message.consumed, golden_block().len());
    assert!(matches!(message.error, Some(Error::TruncatedField { .. })));
}

#[test]
fn streaming_reader_yields_each_block() {
    let registry = registry();
    let records = vec![
        Record::new(34)
            .with_field("000", Value::Bytes(vec![0x02]))
            .with_field("030", Value::Bytes(vec![0x3a, 0x85, 0x30])),
        Record::new(48).with_field("010", Value::Bytes(vec![0x19, 0x29])),
        Record::new(48).with_field(
            "250",
            Value::Items(vec![Value::Bytes(hex::decode("0123456789abcdef").unwrap())]),
        ),
    ];
    let encoded = encode_message(&registry, &records).unwrap();

    let decoded: Vec<Record> = read_records(&registry, Cursor::new(encoded))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(decoded, records);
}

#[test]
fn streaming_reader_flags_mid_block_eof() {
    let registry = registry();
    let dat = golden_block();
    let results: Vec<_> = read_records(&registry, &dat[..dat.len() - 3]).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(Error::Io(_))));
}

#[test]
fn records_serialize_to_json_and_back() {
    let registry = registry();
    let message = decode_message(&registry, &golden_block());
    let json = serde_json::to_string(&message.records[0]).unwrap();
    let back: Record = serde_json::from_str(&json).unwrap();
    assert_eq!(back, message.records[0]);
}

#[test]
fn profiles_load_from_external_json() {
    // the shape an external profile loader hands over
    let spec: CategorySpec = serde_json::from_str(
        r#"{
            "category": 21,
            "fields": [
                {"id": "010", "kind": {"Fixed": {"len": 2}}},
                {"id": "040", "kind": {"Extended": {"group_len": 1}}},
                {"id": "REP", "kind": {"Repetitive": {"item":
                    {"id": "REP/i", "kind": {"Fixed": {"len": 4}}}}}}
            ]
        }"#,
    )
    .unwrap();
    spec.validate().unwrap();

    let registry = CategoryRegistry::from_specs([spec]);
    let record = Record::new(21)
        .with_field("010", Value::Bytes(vec![0x10, 0x01]))
        .with_field(
            "REP",
            Value::Items(vec![Value::Bytes(vec![1, 2, 3, 4])]),
        );
    let encoded = encode_message(&registry, &[record.clone()]).unwrap();
    let message = decode_message(&registry, &encoded);
    assert!(message.error.is_none());
    assert_eq!(message.records, vec![record]);
}
