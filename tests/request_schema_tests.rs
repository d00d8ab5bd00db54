use jsonschema::JSONSchema;
use postback_relay::error::RelayError;
use postback_relay::relay::submitter::parse_request_body;
use serde_json::json;

fn compiled_schema() -> JSONSchema {
    let schema = include_str!("../schemas/task_request.v1.json");
    let schema_json: serde_json::Value = serde_json::from_str(schema).unwrap();
    let schema_static: &'static serde_json::Value = Box::leak(Box::new(schema_json));
    JSONSchema::options().compile(schema_static).unwrap()
}

fn example_item() -> serde_json::Value {
    let body: serde_json::Value =
        serde_json::from_str(include_str!("resources/task_request.json")).unwrap();
    body[0].clone()
}

#[test]
fn example_request_is_valid() {
    let compiled = compiled_schema();
    assert!(compiled.is_valid(&example_item()));
}

#[test]
fn string_location_code_is_valid() {
    let compiled = compiled_schema();
    let mut item = example_item();
    item["location_code"] = json!("2840");
    assert!(compiled.is_valid(&item));
}

#[test]
fn unknown_fields_are_allowed() {
    let compiled = compiled_schema();
    let mut item = example_item();
    item["device"] = json!("mobile");
    assert!(compiled.is_valid(&item));

    let request = parse_request_body(&json!([item])).unwrap();
    assert_eq!(request.passthrough.get("device"), Some(&json!("mobile")));
}

#[test]
fn other_postback_modes_are_rejected() {
    let compiled = compiled_schema();
    let mut item = example_item();
    item["postback_data"] = json!("regular");
    assert!(!compiled.is_valid(&item));
}

#[test]
fn each_required_field_is_enforced() {
    let compiled = compiled_schema();
    for field in ["language_code", "location_code", "keyword", "depth", "postback_data"] {
        let mut item = example_item();
        item.as_object_mut().unwrap().remove(field);
        assert!(!compiled.is_valid(&item), "{field} should be required");
    }
}

#[test]
fn wrong_types_are_rejected() {
    let compiled = compiled_schema();
    let mut item = example_item();
    item["depth"] = json!("100");
    assert!(!compiled.is_valid(&item));

    let mut item = example_item();
    item["webhook"] = json!(42);
    assert!(!compiled.is_valid(&item));
}

#[test]
fn body_must_hold_exactly_one_item() {
    let item = example_item();
    for body in [json!([]), json!([item.clone(), item.clone()]), item.clone(), json!(null)] {
        let err = parse_request_body(&body).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)), "{body}");
    }
    assert!(parse_request_body(&json!([item])).is_ok());
}
