use domain::{
    Address, DomainError, ProtocolConfig, ProtocolMode, ServerDescriptor, TagKey, TagSpec,
};

fn enip_server() -> ServerDescriptor {
    ServerDescriptor::new(
        "localhost:44818".parse().expect("address"),
        vec![
            TagSpec::with_instance("SENSOR1", 1, "INT"),
            TagSpec::with_instance("SENSOR1", 2, "INT"),
            TagSpec::new("ACTUATOR1", "INT"),
        ],
    )
    .expect("descriptor")
}

#[test]
fn client_mode_rejects_server() {
    let err = ProtocolConfig::new("enip", ProtocolMode::Client, Some(enip_server()))
        .expect_err("client with server");
    assert!(matches!(err, DomainError::Config(_)));

    let json = r#"{
        "name": "enip",
        "mode": 0,
        "server": {"address": "localhost:44818", "tags": [["ACTUATOR1", "INT"]]}
    }"#;
    assert!(matches!(
        ProtocolConfig::from_json(json),
        Err(DomainError::Config(_))
    ));
}

#[test]
fn client_server_mode_requires_server() {
    let err = ProtocolConfig::new("modbus", ProtocolMode::ClientAndServer, None)
        .expect_err("missing server");
    assert!(matches!(err, DomainError::Config(_)));

    let json = r#"{"name": "modbus", "mode": 1, "server": ""}"#;
    assert!(ProtocolConfig::from_json(json).is_err());
}

#[test]
fn client_server_mode_rejects_malformed_descriptor() {
    let empty_tags = r#"{
        "name": "enip",
        "mode": 1,
        "server": {"address": "localhost:44818", "tags": []}
    }"#;
    assert!(ProtocolConfig::from_json(empty_tags).is_err());

    let bad_address = r#"{
        "name": "enip",
        "mode": 1,
        "server": {"address": "localhost", "tags": [["ACTUATOR1", "INT"]]}
    }"#;
    assert!(ProtocolConfig::from_json(bad_address).is_err());

    let address: Address = "localhost:502".parse().expect("address");
    assert!(ServerDescriptor::new(address, Vec::new()).is_err());
}

#[test]
fn descriptor_keeps_declaration_order() {
    let config = ProtocolConfig::client_and_server("ENIP", enip_server()).expect("config");
    assert_eq!(config.name(), "enip");
    let names: Vec<String> = config
        .server()
        .expect("server")
        .tags()
        .iter()
        .map(|tag| format!("{}:{:?}", tag.name(), tag.instance()))
        .collect();
    assert_eq!(
        names,
        vec!["SENSOR1:Some(1)", "SENSOR1:Some(2)", "ACTUATOR1:None"]
    );
}

#[test]
fn multikey_resolution_through_descriptor() {
    let server = enip_server();
    let first = server
        .resolve(&TagKey::with_instance("SENSOR1", 1))
        .expect("first");
    let second = server
        .resolve(&TagKey::with_instance("SENSOR1", 2))
        .expect("second");
    assert_ne!(first, second);
    assert!(matches!(
        server.resolve(&TagKey::new("SENSOR1")),
        Err(DomainError::AmbiguousTag(_, 2))
    ));
}

#[test]
fn malformed_tag_tuple_reports_its_own_error() {
    let json = r#"{
        "name": "enip",
        "mode": 1,
        "server": {"address": "localhost:44818", "tags": [["", "INT"]]}
    }"#;
    let err = ProtocolConfig::from_json(json).expect_err("empty tag name");
    assert!(matches!(err, DomainError::Config(_)));
    assert!(err.to_string().contains("tag name must not be empty"), "{}", err);

    let json = r#"{"name": "enip", "mode": 1, "server": {"address": "localhost:44818"}}"#;
    let err = ProtocolConfig::from_json(json).expect_err("missing tags");
    assert!(err.to_string().contains("tags"), "{}", err);

    let json = r#"{"name": "enip", "mode": 1, "server": 5}"#;
    let err = ProtocolConfig::from_json(json).expect_err("scalar server");
    assert!(err.to_string().contains("server must be an object"), "{}", err);
}
