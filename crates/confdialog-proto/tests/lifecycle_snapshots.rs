//! Snapshot tests for lifecycle JSON.
//!
//! These pin the exact plaintext the peer parses. Any change here is a wire
//! format change.

use confdialog_proto::{
    ConfigurePayload, Lifecycle, MessageTree, Property, PropertyType, Schema,
};
use serde_json::{Map, json};

fn encode(message: &Lifecycle) -> String {
    String::from_utf8(message.to_json_bytes().unwrap()).unwrap()
}

#[test]
fn snapshot_close() {
    insta::assert_snapshot!(encode(&Lifecycle::Close), @r#"{"lifecycle":"Close"}"#);
}

#[test]
fn snapshot_configure() {
    let mut props = Schema::new();
    props.insert("name".to_string(), Property::new(PropertyType::Text, "Name"));
    props.insert(
        "tags".to_string(),
        Property::new(PropertyType::ListText, "Tags").with_default(json!([])),
    );

    let message = Lifecycle::Configure(ConfigurePayload {
        props,
        values: json!({ "name": "a", "tags": [] }),
        title: "Configure".to_string(),
        dlg_size: None,
    });

    insta::assert_snapshot!(
        encode(&message),
        @r#"{"lifecycle":"Configure","props":{"name":{"type":"text","label":"Name"},"tags":{"type":"list_text","label":"Tags","default":[]}},"values":{"name":"a","tags":[]},"title":"Configure"}"#
    );
}

#[test]
fn snapshot_update_value() {
    let message = Lifecycle::UpdateValue {
        property_name: "name".to_string(),
        property_value: json!("b"),
    };

    insta::assert_snapshot!(
        encode(&message),
        @r#"{"lifecycle":"UpdateValue","propertyName":"name","propertyValue":"b"}"#
    );
}

#[test]
fn snapshot_update_values() {
    let mut values = Map::new();
    values.insert("name".to_string(), json!("c"));

    insta::assert_snapshot!(
        encode(&Lifecycle::UpdateValues { values }),
        @r#"{"lifecycle":"UpdateValues","values":{"name":"c"}}"#
    );
}

#[test]
fn snapshot_save_failure_with_tree() {
    let validations = MessageTree::new().with_child(
        "tags",
        MessageTree::new()
            .with_validity(false)
            .with_child("0", MessageTree::leaf(false, vec!["empty".to_string()])),
    );

    insta::assert_snapshot!(
        encode(&Lifecycle::SaveFailure { validations: Some(validations) }),
        @r#"{"lifecycle":"SaveFailure","validations":{"tags":{"__isValid":false,"0":{"__isValid":false,"__messages":["empty"]}}}}"#
    );
}

#[test]
fn snapshot_save_failure_without_tree() {
    insta::assert_snapshot!(
        encode(&Lifecycle::SaveFailure { validations: None }),
        @r#"{"lifecycle":"SaveFailure"}"#
    );
}

#[test]
fn snapshot_save_success_empty() {
    insta::assert_snapshot!(
        encode(&Lifecycle::SaveSuccess { validations: MessageTree::new() }),
        @r#"{"lifecycle":"SaveSuccess","validations":{}}"#
    );
}
