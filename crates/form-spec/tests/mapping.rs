use std::collections::BTreeMap;

use serde_json::{Value, json};

use form_spec::spec::mapping::{TransformationConfig, TransformationType};
use form_spec::spec::webhook::PayloadMapping;
use form_spec::{
    DataMappingConfig, DataMappingRule, Expression, FieldTransformation, MappingOperation,
    MappingOperationKind, apply_mapping, apply_transformations, extract_paths, map_payload,
};

fn transformation(field: &str, kind: TransformationType, config: TransformationConfig) -> FieldTransformation {
    FieldTransformation {
        field: field.into(),
        kind,
        config,
    }
}

#[test]
fn extract_paths_lists_parents_before_children() {
    assert_eq!(extract_paths(&json!({ "a": { "b": 1, "c": 2 } })), vec!["a", "a.b", "a.c"]);
}

#[test]
fn extract_paths_keeps_document_order_and_treats_arrays_as_leaves() {
    let doc = json!({ "z": 1, "items": [{ "id": 1 }], "meta": { "page": { "next": null } } });
    assert_eq!(
        extract_paths(&doc),
        vec!["z", "items", "meta", "meta.page", "meta.page.next"]
    );
    assert!(extract_paths(&json!([1, 2])).is_empty());
}

#[test]
fn sample_paths_parse_the_sample_payload() {
    let config = DataMappingConfig {
        sample_payload: Some(r#"{"user":{"id":7}}"#.into()),
        ..DataMappingConfig::default()
    };
    assert_eq!(config.sample_paths(), vec!["user", "user.id"]);

    let broken = DataMappingConfig {
        sample_payload: Some("{not json".into()),
        ..DataMappingConfig::default()
    };
    assert!(broken.sample_paths().is_empty());
}

#[test]
fn apply_mapping_sets_raw_values() {
    let operations = apply_mapping(
        &json!({ "user": { "age": "30" } }),
        &[DataMappingRule::new("user.age", "age")],
    );
    assert_eq!(
        operations,
        vec![MappingOperation {
            field: "age".into(),
            operation: MappingOperationKind::Set,
            value: json!("30"),
        }]
    );
    assert_eq!(
        serde_json::to_value(&operations[0]).unwrap(),
        json!({ "field": "age", "operation": "set", "value": "30" })
    );
}

#[test]
fn apply_mapping_transforms_and_skips_missing_sources() {
    let rules = vec![
        DataMappingRule::new("user.age", "age").with_transform(Expression::formula("number(value) + 1")),
        DataMappingRule::new("user.missing", "other"),
        DataMappingRule::new("user.name", "name").with_transform(Expression::formula("value.nope.deeper")),
    ];
    let operations = apply_mapping(&json!({ "user": { "age": "30", "name": "Ana" } }), &rules);

    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0].operation, MappingOperationKind::Transform);
    assert_eq!(operations[0].value, json!(31));
    assert_eq!(operations[1].field, "name");
    assert_eq!(operations[1].value, json!("Ana"));
}

#[test]
fn transformation_pipeline() {
    let mut values: BTreeMap<String, Value> = BTreeMap::from([
        ("born".to_string(), json!("1990-04-07")),
        ("price".to_string(), json!("12.5")),
        ("total".to_string(), json!(10)),
        ("tags".to_string(), json!(["a", "b", null])),
        ("csv".to_string(), json!(" x, y ,z")),
        ("name".to_string(), json!("ana")),
    ]);

    apply_transformations(
        &mut values,
        &[
            transformation("born", TransformationType::Format, TransformationConfig {
                format: Some("DD/MM/YYYY".into()),
                ..Default::default()
            }),
            transformation("price", TransformationType::Format, TransformationConfig {
                format: Some("#.##".into()),
                ..Default::default()
            }),
            transformation("total", TransformationType::Calculate, TransformationConfig {
                formula: Some(Expression::formula("x * 1.1")),
                ..Default::default()
            }),
            transformation("tags", TransformationType::Concat, TransformationConfig::default()),
            transformation("csv", TransformationType::Split, TransformationConfig::default()),
            transformation("name", TransformationType::Custom, TransformationConfig {
                custom_fn: Some(Expression::formula("upper(value)")),
                ..Default::default()
            }),
            transformation("absent", TransformationType::Custom, TransformationConfig {
                custom_fn: Some(Expression::formula("'created'")),
                ..Default::default()
            }),
        ],
    );

    assert_eq!(values["born"], json!("07/04/1990"));
    assert_eq!(values["price"], json!("12.50"));
    assert_eq!(values["total"], json!(11.000000000000002));
    assert_eq!(values["tags"], json!("a b "));
    assert_eq!(values["csv"], json!(["x", "y", "z"]));
    assert_eq!(values["name"], json!("ANA"));
    assert!(!values.contains_key("absent"));
}

#[test]
fn failing_transformations_keep_the_value() {
    let mut values = BTreeMap::from([
        ("n".to_string(), json!(5)),
        ("d".to_string(), json!("not a date")),
    ]);
    apply_transformations(
        &mut values,
        &[
            transformation("n", TransformationType::Calculate, TransformationConfig {
                formula: Some(Expression::formula("x / 0")),
                ..Default::default()
            }),
            transformation("d", TransformationType::Format, TransformationConfig {
                format: Some("YYYY".into()),
                ..Default::default()
            }),
        ],
    );
    assert_eq!(values["n"], json!(5));
    assert_eq!(values["d"], json!("not a date"));
}

#[test]
fn oversized_decimal_formats_keep_the_value() {
    let long_fraction = format!("#.{}", "#".repeat(70_000));
    let mut values = BTreeMap::from([
        ("price".to_string(), json!(12.5)),
        ("ratio".to_string(), json!(0.5)),
    ]);
    apply_transformations(
        &mut values,
        &[
            transformation("price", TransformationType::Format, TransformationConfig {
                format: Some(long_fraction),
                ..Default::default()
            }),
            transformation("ratio", TransformationType::Format, TransformationConfig {
                format: Some(format!("#.{}", "#".repeat(100))),
                ..Default::default()
            }),
        ],
    );
    assert_eq!(values["price"], json!(12.5));
    assert_eq!(values["ratio"].as_str().map(str::len), Some(102));
}

#[test]
fn concat_and_split_take_custom_separators() {
    let mut values = BTreeMap::from([
        ("a".to_string(), json!(["x", "y"])),
        ("b".to_string(), json!("1;2")),
    ]);
    apply_transformations(
        &mut values,
        &[
            transformation("a", TransformationType::Concat, TransformationConfig {
                separator: Some(", ".into()),
                ..Default::default()
            }),
            transformation("b", TransformationType::Split, TransformationConfig {
                separator: Some(";".into()),
                ..Default::default()
            }),
        ],
    );
    assert_eq!(values["a"], json!("x, y"));
    assert_eq!(values["b"], json!(["1", "2"]));
}

#[test]
fn payload_mapping_writes_nested_targets() {
    let step = BTreeMap::from([("cpf".to_string(), json!("529.982.247-25"))]);
    let previous = BTreeMap::from([("name".to_string(), json!("Ana"))]);
    let mappings = vec![
        PayloadMapping {
            source: "stepData.cpf".into(),
            target: "customer.document".into(),
            transform: Some(Expression::formula("digits(value)")),
        },
        PayloadMapping {
            source: "previousSteps.name".into(),
            target: "customer.name".into(),
            transform: None,
        },
        PayloadMapping {
            source: "previousSteps.email".into(),
            target: "customer.email".into(),
            transform: None,
        },
    ];

    let body = map_payload(&step, &previous, &mappings);
    assert_eq!(
        Value::Object(body),
        json!({ "customer": { "document": "52998224725", "name": "Ana" } })
    );
}
