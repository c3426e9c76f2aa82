//! Behavior-driven tests for data retrieval through a connected source.
//!
//! These tests describe what a caller observes: partial results, scoped
//! connections, per-instance throttling and the metadata lookup rules.

use std::sync::Arc;
use std::time::Duration;

use fedetl_core::{
    with_connection, ClientConfig, Connection, DataSource, ErrorKind, FetchOptions, FredClient,
    HaverClient, HttpResponse, ManualClock, ScriptedHttpClient,
};
use serde_json::{json, Value};
use time::macros::date;

const FRED_KEY: &str = "abcdefghijklmnopqrstuvwxyz012345";

fn fred_probe() -> Value {
    json!({"seriess": [{"id": "FEDFUNDS"}]})
}

fn fed_funds_observations() -> Value {
    json!({"observations": [
        {"date": "2023-01-01", "value": "4.33"},
        {"date": "2023-02-01", "value": "4.57"},
        {"date": "2023-03-01", "value": "4.65"}
    ]})
}

fn fred(transport: Arc<ScriptedHttpClient>, config: &ClientConfig) -> (FredClient, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let client = FredClient::new(FRED_KEY, config)
        .expect("valid key")
        .with_transport(transport)
        .with_clock(clock.clone());
    (client, clock)
}

fn haver(transport: Arc<ScriptedHttpClient>) -> HaverClient {
    HaverClient::new("analyst", "s3cret-pass", &ClientConfig::default())
        .expect("valid credentials")
        .with_transport(transport)
        .with_clock(Arc::new(ManualClock::new()))
}

fn haver_upstream() -> ScriptedHttpClient {
    ScriptedHttpClient::new()
        .on_json("/databases", 200, json!({"databases": ["USECON"]}))
        .on_json(
            "/data/USECON/GDP",
            200,
            json!({"data": [
                {"date": "2023-01-01", "value": 26813.6},
                {"date": "2023-04-01", "value": 27063.0}
            ]}),
        )
        .on_json(
            "/metadata/GDP",
            200,
            json!({"metadata": {"name": "Gross Domestic Product", "category": "National Accounts"}}),
        )
}

// =============================================================================
// Partial success
// =============================================================================

#[test]
fn when_one_variable_fails_the_others_are_still_returned() {
    // Given: Haver serves GDP but has no route for BOGUS
    let transport = Arc::new(haver_upstream());
    let mut client = haver(transport.clone());
    client.connect().expect("connects");

    // When: both are requested together
    let table = client
        .get_data(
            vec!["GDP", "BOGUS"].into(),
            "2023-01-01".into(),
            "2023-12-31".into(),
            &FetchOptions::default(),
        )
        .expect("partial success");

    // Then: the failed variable is simply absent
    assert!(table.has_column("GDP"));
    assert!(!table.has_column("BOGUS"));
    assert_eq!(table.len(), 2);
    assert_eq!(transport.request_count("/data/USECON/BOGUS"), 1);
}

#[test]
fn when_a_later_fred_series_errors_earlier_series_survive() {
    let transport = Arc::new(
        ScriptedHttpClient::new()
            .on_json("/series", 200, fred_probe())
            .on_sequence(
                "/series/observations",
                vec![
                    Ok(HttpResponse::ok_json(fed_funds_observations().to_string())),
                    Ok(HttpResponse::new(
                        400,
                        json!({"error_message": "Bad Request. The series does not exist."})
                            .to_string(),
                    )),
                ],
            ),
    );
    let (mut client, _) = fred(transport, &ClientConfig::default());
    client.connect().expect("connects");

    let table = client
        .get_data(
            vec!["FEDFUNDS", "NOSUCHSERIES"].into(),
            "2023-01-01".into(),
            "2023-03-31".into(),
            &FetchOptions::default(),
        )
        .expect("partial success");

    let columns = table.columns().iter().map(|code| code.as_str()).collect::<Vec<_>>();
    assert_eq!(columns, vec!["FEDFUNDS"]);
    assert_eq!(table.value(date!(2023 - 02 - 01), "FEDFUNDS"), Some(4.57));
}

#[test]
fn when_every_variable_fails_a_retrieval_error_names_them_all() {
    let transport = Arc::new(haver_upstream());
    let mut client = haver(transport);
    client.connect().expect("connects");

    let error = client
        .get_data(
            vec!["MISSING1", "MISSING2"].into(),
            "2023-01-01".into(),
            "2023-12-31".into(),
            &FetchOptions::default(),
        )
        .expect_err("nothing retrieved");

    assert_eq!(error.kind(), ErrorKind::DataRetrieval);
    assert_eq!(error.message(), "No data retrieved for any requested variables");
    assert_eq!(
        error.context_value("variables"),
        Some(&json!(["MISSING1", "MISSING2"]))
    );
    assert_eq!(
        error.context_value("date_range"),
        Some(&json!(["2023-01-01", "2023-12-31"]))
    );
}

#[test]
fn empty_series_count_as_failures() {
    let transport = Arc::new(
        ScriptedHttpClient::new()
            .on_json("/series", 200, fred_probe())
            .on_json(
                "/series/observations",
                200,
                json!({"observations": [{"date": "2023-01-01", "value": "."}]}),
            ),
    );
    let (mut client, _) = fred(transport, &ClientConfig::default());
    client.connect().expect("connects");

    let error = client
        .get_data(
            "FEDFUNDS".into(),
            "2023-01-01".into(),
            "2023-01-31".into(),
            &FetchOptions::default(),
        )
        .expect_err("only missing values");
    assert_eq!(error.kind(), ErrorKind::DataRetrieval);
}

#[test]
fn repeated_codes_are_fetched_once() {
    // Given: the same series spelled two ways
    let transport = Arc::new(
        ScriptedHttpClient::new()
            .on_json("/series", 200, fred_probe())
            .on_json("/series/observations", 200, fed_funds_observations()),
    );
    let (mut client, _) = fred(transport.clone(), &ClientConfig::default());
    client.connect().expect("connects");

    // When: both spellings are requested
    let table = client
        .get_data(
            vec!["FEDFUNDS", "fedfunds"].into(),
            "2023-01-01".into(),
            "2023-03-31".into(),
            &FetchOptions::default(),
        )
        .expect("fetches");

    // Then: one request, one column
    let columns = table.columns().iter().map(|code| code.as_str()).collect::<Vec<_>>();
    assert_eq!(columns, vec!["FEDFUNDS"]);
    assert_eq!(table.len(), 3);
    assert_eq!(transport.request_count("/series/observations"), 1);
}

#[test]
fn invalid_inputs_are_rejected_before_any_fetch() {
    let transport = Arc::new(
        ScriptedHttpClient::new()
            .on_json("/series", 200, fred_probe())
            .on_json("/series/observations", 200, fed_funds_observations()),
    );
    let (mut client, _) = fred(transport.clone(), &ClientConfig::default());
    client.connect().expect("connects");

    let error = client
        .get_data(
            "FEDFUNDS".into(),
            "2023-06-01".into(),
            "2023-01-01".into(),
            &FetchOptions::default(),
        )
        .expect_err("reversed range");
    assert_eq!(error.kind(), ErrorKind::Validation);

    let error = client
        .get_data(
            vec!["FEDFUNDS", "BAD CODE"].into(),
            "2023-01-01".into(),
            "2023-06-01".into(),
            &FetchOptions::default(),
        )
        .expect_err("invalid code");
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert_eq!(transport.request_count("/series/observations"), 0);
}

// =============================================================================
// Scoped connections
// =============================================================================

#[test]
fn scoped_connection_disconnects_after_success() {
    let transport = Arc::new(
        ScriptedHttpClient::new()
            .on_json("/series", 200, fred_probe())
            .on_json("/series/observations", 200, fed_funds_observations()),
    );
    let (mut client, _) = fred(transport, &ClientConfig::default());

    let table = with_connection(&mut client, |source| {
        assert!(source.is_connected());
        source.get_data(
            "FEDFUNDS".into(),
            "2023-01-01".into(),
            "2023-03-31".into(),
            &FetchOptions::default(),
        )
    })
    .expect("data");

    assert_eq!(table.len(), 3);
    assert!(!client.is_connected());
}

#[test]
fn scoped_connection_disconnects_when_the_work_fails() {
    let transport = Arc::new(haver_upstream());
    let mut client = haver(transport);

    let error = with_connection(&mut client, |source| {
        source.get_data(
            "MISSING".into(),
            "2023-01-01".into(),
            "2023-12-31".into(),
            &FetchOptions::default(),
        )
    })
    .expect_err("no data");

    assert_eq!(error.kind(), ErrorKind::DataRetrieval);
    assert!(!client.is_connected(), "disconnect runs on the error path");
}

#[test]
fn connection_guard_disconnects_on_drop() {
    let transport = Arc::new(haver_upstream());
    let mut client = haver(transport);

    {
        let mut connection = Connection::open(&mut client).expect("opens");
        assert!(connection.is_connected());
        let metadata = connection.get_metadata("GDP".into()).expect("metadata");
        assert_eq!(metadata.len(), 1);
    }

    assert!(!client.is_connected());
}

#[test]
fn failed_open_leaves_the_source_disconnected() {
    let transport = Arc::new(ScriptedHttpClient::new().on_json("/databases", 403, json!({})));
    let mut client = haver(transport);

    let error = Connection::open(&mut client).err().expect("access denied");
    assert_eq!(error.kind(), ErrorKind::Authentication);
    assert_eq!(
        error.message(),
        "Haver Analytics access denied - check subscription status"
    );
    assert!(!client.is_connected());
}

// =============================================================================
// Metadata lookups
// =============================================================================

#[test]
fn bulk_metadata_omits_missing_variables_but_single_lookup_fails() {
    let transport = Arc::new(haver_upstream());
    let mut client = haver(transport);
    client.connect().expect("connects");

    // Bulk lookup: NOPE is silently dropped
    let found = client
        .get_metadata(vec!["GDP", "NOPE"].into())
        .expect("bulk lookup never fails on misses");
    let codes = found.keys().map(|code| code.as_str()).collect::<Vec<_>>();
    assert_eq!(codes, vec!["GDP"]);
    assert_eq!(found.values().next().map(|m| m.category.as_str()), Some("National Accounts"));

    // Single lookup: the same miss is an error
    let error = client.get_variable_metadata("nope").expect_err("absent");
    assert_eq!(error.kind(), ErrorKind::DataRetrieval);
    assert_eq!(error.message(), "No metadata found for variable NOPE");
}

// =============================================================================
// Independent instances and throttling
// =============================================================================

#[test]
fn independent_instances_return_identical_tables() {
    let fetch = || {
        let transport = Arc::new(
            ScriptedHttpClient::new()
                .on_json("/series", 200, fred_probe())
                .on_json("/series/observations", 200, fed_funds_observations()),
        );
        let (mut client, _) = fred(transport, &ClientConfig::default());
        with_connection(&mut client, |source| {
            source.get_data(
                "FEDFUNDS".into(),
                "2023-01-01".into(),
                "2023-03-31".into(),
                &FetchOptions::default(),
            )
        })
        .expect("data")
    };

    assert_eq!(fetch(), fetch());
}

#[test]
fn minute_window_rejects_the_request_after_the_limit_then_recovers() {
    let transport = Arc::new(ScriptedHttpClient::new().on_json("/series", 200, fred_probe()));
    let config = ClientConfig::default().with_rate_limit(2);
    let (mut client, clock) = fred(transport, &config);

    // The probe counts as the first request in the window
    client.connect().expect("connects");
    client.enforce_rate_limit().expect("second request fits");

    let error = client.enforce_rate_limit().expect_err("third exceeds the limit");
    assert_eq!(error.kind(), ErrorKind::RateLimit);
    assert!(error.kind().is_data_retrieval());
    assert!(error.message().contains("rate limit exceeded"), "{}", error.message());
    assert_eq!(error.context_value("limit"), Some(&json!(2)));
    let retry_after = error.retry_after().expect("wait hint");
    assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(61));

    clock.advance(Duration::from_secs(60));
    client.enforce_rate_limit().expect("window has reset");
    assert_eq!(client.rate_limit_status().used, 1);
}

#[test]
fn minute_window_spaces_consecutive_requests() {
    let transport = Arc::new(ScriptedHttpClient::new().on_json("/series", 200, fred_probe()));
    let (mut client, clock) = fred(transport, &ClientConfig::default());
    client.connect().expect("connects");

    client.enforce_rate_limit().expect("allowed");
    assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
}

#[test]
fn rate_limited_variables_are_excluded_not_fatal() {
    let transport = Arc::new(
        ScriptedHttpClient::new()
            .on_json("/series", 200, fred_probe())
            .on_json("/series/observations", 200, fed_funds_observations()),
    );
    let config = ClientConfig::default().with_rate_limit(2);
    let (mut client, _) = fred(transport.clone(), &config);
    client.connect().expect("connects");

    let table = client
        .get_data(
            vec!["FEDFUNDS", "DGS10"].into(),
            "2023-01-01".into(),
            "2023-03-31".into(),
            &FetchOptions::default(),
        )
        .expect("first variable fits in the window");

    let columns = table.columns().iter().map(|code| code.as_str()).collect::<Vec<_>>();
    assert_eq!(columns, vec!["FEDFUNDS"]);
    assert_eq!(transport.request_count("/series/observations"), 1);
}

#[test]
fn limiter_state_is_not_shared_between_instances() {
    let config = ClientConfig::default().with_rate_limit(1);
    let (mut first, _) = fred(
        Arc::new(ScriptedHttpClient::new().on_json("/series", 200, fred_probe())),
        &config,
    );
    let (mut second, _) = fred(
        Arc::new(ScriptedHttpClient::new().on_json("/series", 200, fred_probe())),
        &config,
    );

    first.connect().expect("connects");
    assert_eq!(
        first.enforce_rate_limit().expect_err("exhausted").kind(),
        ErrorKind::RateLimit
    );

    assert_eq!(second.rate_limit_status().used, 0);
    second.enforce_rate_limit().expect("fresh window");
}

#[test]
fn rate_limit_status_reports_policy_and_usage() {
    let transport = Arc::new(ScriptedHttpClient::new().on_json("/series", 200, fred_probe()));
    let (mut fred_client, _) = fred(transport, &ClientConfig::default());
    fred_client.connect().expect("connects");

    let status = fred_client.rate_limit_status();
    assert_eq!(status.policy, "minute_window");
    assert_eq!(status.period, "minute");
    assert_eq!(status.limit, 120);
    assert_eq!(status.used, 1);
    assert_eq!(status.remaining, 119);
    assert!(status.resets_in_secs > 0.0 && status.resets_in_secs <= 60.0);

    let haver_client = haver(Arc::new(haver_upstream()));
    let status = haver_client.rate_limit_status();
    assert_eq!(status.policy, "fixed_interval");
    assert_eq!(status.period, "second");
    assert_eq!(status.limit, 10);
    assert_eq!(status.used, 0);
}
