//! Behavior-driven tests for building clients through the factory.

use std::collections::BTreeMap;
use std::sync::Arc;

use fedetl_core::{
    ClientConfig, Credentials, DataSource, DataSourceFactory, ErrorKind, ManualClock,
    ScriptedHttpClient, SourceId,
};
use serde_json::{json, Value};

const EXPLICIT_KEY: &str = "explicitkeyexplicitkeyexplicit01";
const CONFIG_KEY: &str = "configkeyconfigkeyconfigkeycon02";
const ENV_KEY: &str = "environmentkeyenvironmentkeyen03";

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + Send + Sync + 'static {
    let vars = pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect::<BTreeMap<_, _>>();
    move |key: &str| vars.get(key).cloned()
}

fn offline_factory() -> (DataSourceFactory, Arc<ScriptedHttpClient>) {
    let transport = Arc::new(
        ScriptedHttpClient::new()
            .on_json("/series", 200, json!({"seriess": [{"id": "FEDFUNDS"}]}))
            .on_json("/databases", 200, json!({"databases": []})),
    );
    let factory = DataSourceFactory::new()
        .with_env(|_| None)
        .with_transport(transport.clone())
        .with_clock(Arc::new(ManualClock::new()));
    (factory, transport)
}

/// Connects `source` and reports the API key the probe carried.
fn probed_key(mut source: Box<dyn DataSource>, transport: &ScriptedHttpClient) -> String {
    source.connect().expect("connects");
    transport
        .requests()
        .last()
        .and_then(|request| request.query_value("api_key").map(str::to_owned))
        .expect("probe carries the key")
}

#[test]
fn source_identifiers_are_case_insensitive() {
    let (factory, _) = offline_factory();
    let credentials = Credentials::basic("analyst", "s3cret-pass");

    for identifier in ["haver", "HAVER", " Haver "] {
        let source = factory
            .create_data_source(identifier, &ClientConfig::default(), &credentials)
            .unwrap_or_else(|error| panic!("'{identifier}' rejected: {error}"));
        assert_eq!(source.source_name(), "Haver");
    }

    let fred = factory
        .create_data_source("FRED", &ClientConfig::default(), &Credentials::api_key(EXPLICIT_KEY))
        .expect("fred");
    assert_eq!(fred.source_name(), "FRED");
}

#[test]
fn unknown_sources_list_the_supported_ones() {
    let (factory, _) = offline_factory();

    let error = factory
        .create_data_source("bloomberg", &ClientConfig::default(), &Credentials::default())
        .err()
        .expect("unsupported");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert_eq!(
        error.message(),
        "Unsupported data source: 'bloomberg'. Available sources: ['fred', 'haver']"
    );

    let error = factory
        .create_data_source("  ", &ClientConfig::default(), &Credentials::default())
        .err()
        .expect("blank");
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn available_sources_map_identifiers_to_clients() {
    let sources = DataSourceFactory::available_sources();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources.get("fred"), Some(&"FredClient"));
    assert_eq!(sources.get("haver"), Some(&"HaverClient"));
}

#[test]
fn credentials_resolve_explicit_then_config_then_environment() {
    let (factory, transport) = offline_factory();
    let factory = factory.with_env(env_from(&[("FRED_API_KEY", ENV_KEY)]));
    let configured = ClientConfig::default().with_api_key(CONFIG_KEY);

    let source = factory
        .create(SourceId::Fred, &configured, &Credentials::api_key(EXPLICIT_KEY))
        .expect("explicit");
    assert_eq!(probed_key(source, &transport), EXPLICIT_KEY);

    let source = factory
        .create(SourceId::Fred, &configured, &Credentials::default())
        .expect("configured");
    assert_eq!(probed_key(source, &transport), CONFIG_KEY);

    let source = factory
        .create(SourceId::Fred, &ClientConfig::default(), &Credentials::default())
        .expect("environment");
    assert_eq!(probed_key(source, &transport), ENV_KEY);

    // Blank values count as absent
    let source = factory
        .create(SourceId::Fred, &ClientConfig::default(), &Credentials::api_key("   "))
        .expect("blank explicit falls through");
    assert_eq!(probed_key(source, &transport), ENV_KEY);
}

#[test]
fn missing_credentials_name_the_environment_variable() {
    let (factory, _) = offline_factory();

    let error = factory
        .create(SourceId::Fred, &ClientConfig::default(), &Credentials::default())
        .err()
        .expect("no key");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(error.message().contains("FRED_API_KEY environment variable"));
    assert_eq!(error.context_value("config_key"), Some(&json!("api_key")));

    let error = factory
        .create(
            SourceId::Haver,
            &ClientConfig::default(),
            &Credentials {
                username: Some(String::from("analyst")),
                ..Credentials::default()
            },
        )
        .err()
        .expect("no password");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(error.message().contains("HAVER_PASSWORD"));
    assert_eq!(error.context_value("config_key"), Some(&json!("password")));
}

#[test]
fn construction_failures_are_wrapped_with_their_cause() {
    let (factory, _) = offline_factory();

    let error = factory
        .create_data_source("HAVER", &ClientConfig::default(), &Credentials::basic("u", "p"))
        .err()
        .expect("credentials too short");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(error.message().starts_with("Failed to create data source 'haver':"));
    assert_eq!(
        error.context_value("config_key"),
        Some(&json!("source_instantiation"))
    );
    let cause = std::error::Error::source(&error).expect("cause kept");
    assert!(cause.to_string().contains("at least 3 characters"));

    let error = factory
        .create(
            SourceId::Fred,
            &ClientConfig::default(),
            &Credentials::api_key("a".repeat(31)),
        )
        .err()
        .expect("short key");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(error.message().contains("32 character alphanumeric"));
}

#[test]
fn invalid_config_values_fail_construction() {
    let (factory, _) = offline_factory();
    let config = ClientConfig::default().with_rate_limit(0);

    let error = factory
        .create(SourceId::Fred, &config, &Credentials::api_key(EXPLICIT_KEY))
        .err()
        .expect("zero rate limit");
    assert_eq!(error.kind(), ErrorKind::Configuration);
    assert!(error.message().contains("rate_limit must be at least 1"));
}

#[test]
fn validate_source_config_reports_the_first_problem() {
    let (factory, _) = offline_factory();

    factory
        .validate_source_config(
            SourceId::Haver,
            &ClientConfig::default(),
            &Credentials::basic("analyst", "s3cret-pass"),
        )
        .expect("valid");

    let error = factory
        .validate_source_config(
            SourceId::Haver,
            &ClientConfig::default(),
            &Credentials::basic("analyst", "short"),
        )
        .expect_err("short password");
    assert_eq!(error.kind(), ErrorKind::Validation);

    let error = factory
        .validate_source_config(
            SourceId::Fred,
            &ClientConfig::default().with_timeout_secs(0),
            &Credentials::api_key(EXPLICIT_KEY),
        )
        .expect_err("zero timeout");
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn credential_status_lists_missing_and_malformed_entries() {
    let (factory, _) = offline_factory();
    let factory = factory.with_env(env_from(&[("HAVER_USERNAME", "analyst")]));

    let fred = factory.credential_status(
        SourceId::Fred,
        &ClientConfig::default(),
        &Credentials::default(),
    );
    assert!(!fred.ready);
    assert_eq!(fred.missing, vec!["FRED_API_KEY"]);

    let haver = factory.credential_status(
        SourceId::Haver,
        &ClientConfig::default(),
        &Credentials {
            password: Some(String::from("12345")),
            ..Credentials::default()
        },
    );
    assert!(!haver.ready);
    assert_eq!(haver.missing, vec!["HAVER_PASSWORD (invalid format)"]);

    let json = serde_json::to_value(&haver).expect("serializes");
    assert_eq!(json["source"], "haver");
    assert_eq!(json["ready"], Value::Bool(false));
}

#[test]
fn instances_are_independent() {
    let (factory, _) = offline_factory();
    let credentials = Credentials::api_key(EXPLICIT_KEY);

    let mut first = factory
        .create(SourceId::Fred, &ClientConfig::default(), &credentials)
        .expect("first");
    let second = factory
        .create(SourceId::Fred, &ClientConfig::default(), &credentials)
        .expect("second");

    first.connect().expect("connects");
    assert!(first.is_connected());
    assert!(!second.is_connected());
    assert_eq!(second.rate_limit_status().used, 0);
}
