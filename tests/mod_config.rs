use orionlite::config::BrokerConfig;

#[test]
fn defaults_cover_catalog_and_routing() {
    let cfg = BrokerConfig::default();
    assert_eq!(cfg.default_type, "Thing");
    assert_eq!(cfg.entities_collection, "Entities");
    assert_eq!(cfg.collection_for_type("Location"), Some("Locations"));
    assert!(!cfg.messages.descriptor("404").description.is_empty());
    assert!(cfg.content_types.iter().any(|c| c == "application/json"));
}

#[test]
fn toml_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broker.toml");
    std::fs::write(
        &path,
        r#"
default_type = "Asset"

[collections]
Asset = "Assets"

[messages.400]
Description = "custom bad request"

[messages.404]
Description = "custom not found"
"#,
    )
    .unwrap();

    let cfg = BrokerConfig::from_file(&path).unwrap();
    assert_eq!(cfg.default_type, "Asset");
    assert_eq!(cfg.collection_for_type("Asset"), Some("Assets"));
    assert_eq!(cfg.messages.descriptor("400").description, "custom bad request");
    // fields absent from the file keep their defaults
    assert_eq!(cfg.entities_collection, "Entities");
}

#[test]
fn missing_file_is_an_error() {
    assert!(BrokerConfig::from_file("/nonexistent/broker.toml").is_err());
}
