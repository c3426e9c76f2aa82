//! Contract tests every data source must satisfy.
//!
//! Each case is built through the factory against one scripted transport that
//! answers both the FRED and the Haver routes, so the same assertions run
//! unchanged against either client.

use std::sync::Arc;

use fedetl_core::{
    ClientConfig, Credentials, DataSource, DataSourceFactory, ErrorKind, FetchOptions,
    ManualClock, ScriptedHttpClient, SourceId,
};
use serde_json::json;
use time::macros::date;

const FRED_KEY: &str = "abcdefghijklmnopqrstuvwxyz012345";

struct ClientCase {
    id: SourceId,
    source_name: &'static str,
    source: Box<dyn DataSource>,
}

fn scripted_upstreams() -> Arc<ScriptedHttpClient> {
    Arc::new(
        ScriptedHttpClient::new()
            .on_json(
                "/series",
                200,
                json!({"seriess": [{
                    "id": "GDP",
                    "title": "Gross Domestic Product",
                    "units": "Billions of Dollars",
                    "frequency": "Quarterly"
                }]}),
            )
            .on_json(
                "/series/observations",
                200,
                json!({"observations": [
                    {"date": "2023-01-01", "value": "26813.6"},
                    {"date": "2023-04-01", "value": "27063.0"}
                ]}),
            )
            .on_json("/databases", 200, json!({"databases": ["USECON"]}))
            .on_json(
                "/data/USECON/GDP",
                200,
                json!({"data": [
                    {"date": "2023-01-01", "value": 26813.6},
                    {"period": "2023-04", "value": 27063.0}
                ]}),
            )
            .on_json(
                "/metadata/GDP",
                200,
                json!({"metadata": {
                    "name": "Gross Domestic Product",
                    "units": "Billions of Dollars",
                    "frequency": "Quarterly"
                }}),
            ),
    )
}

fn client_cases() -> Vec<ClientCase> {
    let factory = DataSourceFactory::new()
        .with_env(|_| None)
        .with_transport(scripted_upstreams())
        .with_clock(Arc::new(ManualClock::new()));
    let config = ClientConfig::default();

    vec![
        ClientCase {
            id: SourceId::Fred,
            source_name: "FRED",
            source: factory
                .create(SourceId::Fred, &config, &Credentials::api_key(FRED_KEY))
                .expect("fred client"),
        },
        ClientCase {
            id: SourceId::Haver,
            source_name: "Haver",
            source: factory
                .create(
                    SourceId::Haver,
                    &config,
                    &Credentials::basic("analyst", "s3cret-pass"),
                )
                .expect("haver client"),
        },
    ]
}

#[test]
fn new_clients_start_disconnected() {
    for case in client_cases() {
        assert_eq!(case.source.source_name(), case.source_name, "source '{}'", case.id);
        assert!(!case.source.is_connected(), "source '{}'", case.id);
        assert_eq!(
            case.source.to_string(),
            format!("{} (Disconnected)", case.source_name)
        );
    }
}

#[test]
fn operations_require_a_connection() {
    for mut case in client_cases() {
        let error = case
            .source
            .get_data(
                "GDP".into(),
                "2023-01-01".into(),
                "2023-06-30".into(),
                &FetchOptions::default(),
            )
            .expect_err("not connected");
        assert_eq!(error.kind(), ErrorKind::Connection, "source '{}'", case.id);
        assert!(
            error.message().contains("Not connected"),
            "source '{}': {}",
            case.id,
            error.message()
        );

        let error = case
            .source
            .get_metadata("GDP".into())
            .expect_err("not connected");
        assert_eq!(error.kind(), ErrorKind::Connection, "source '{}'", case.id);
    }
}

#[test]
fn connect_then_disconnect_is_idempotent() {
    for mut case in client_cases() {
        assert!(case.source.connect().expect("connects"), "source '{}'", case.id);
        assert!(case.source.is_connected());
        assert_eq!(
            case.source.to_string(),
            format!("{} (Connected)", case.source_name)
        );

        case.source.disconnect();
        case.source.disconnect();
        assert!(!case.source.is_connected(), "source '{}'", case.id);
    }
}

#[test]
fn every_source_returns_the_same_table_shape() {
    for mut case in client_cases() {
        case.source.connect().expect("connects");
        let table = case
            .source
            .get_data(
                vec!["gdp"].into(),
                "2023-01-01".into(),
                "2023-06-30".into(),
                &FetchOptions::default(),
            )
            .unwrap_or_else(|error| panic!("source '{}' get_data failed: {error}", case.id));

        let columns = table.columns().iter().map(|code| code.as_str()).collect::<Vec<_>>();
        assert_eq!(columns, vec!["GDP"], "source '{}': columns", case.id);
        assert_eq!(table.len(), 2, "source '{}': rows", case.id);
        assert_eq!(
            table.dates().collect::<Vec<_>>(),
            vec![date!(2023 - 01 - 01), date!(2023 - 04 - 01)],
            "source '{}': dates are sorted and normalized",
            case.id
        );
        assert_eq!(table.value(date!(2023 - 04 - 01), "GDP"), Some(27063.0));
    }
}

#[test]
fn metadata_records_share_one_shape() {
    for mut case in client_cases() {
        case.source.connect().expect("connects");
        let metadata = case
            .source
            .get_variable_metadata("gdp")
            .unwrap_or_else(|error| panic!("source '{}' metadata failed: {error}", case.id));

        assert_eq!(metadata.code.as_str(), "GDP");
        assert_eq!(metadata.name, "Gross Domestic Product", "source '{}'", case.id);
        assert_eq!(metadata.units, "Billions of Dollars", "source '{}'", case.id);
        assert_eq!(metadata.source, case.source_name);
    }
}

#[test]
fn test_connection_reports_without_raising() {
    for mut case in client_cases() {
        assert!(case.source.test_connection(), "source '{}'", case.id);
        assert!(!case.source.is_connected(), "test_connection disconnects afterwards");
    }

    let mut rejected = DataSourceFactory::new()
        .with_env(|_| None)
        .with_transport(Arc::new(ScriptedHttpClient::new().on_json(
            "/databases",
            401,
            json!({}),
        )))
        .with_clock(Arc::new(ManualClock::new()))
        .create(
            SourceId::Haver,
            &ClientConfig::default(),
            &Credentials::basic("analyst", "s3cret-pass"),
        )
        .expect("haver client");
    assert!(!rejected.test_connection());
}

#[test]
fn variable_listing_is_empty_for_every_source() {
    for mut case in client_cases() {
        let variables = case
            .source
            .get_available_variables()
            .expect("listing never fails");
        assert!(variables.is_empty(), "source '{}'", case.id);
    }
}
