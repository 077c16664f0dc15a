//! Installing the global subscriber. Kept in its own test binary because the
//! subscriber is process-wide.

use dq_guard::core::{RuleSpec, RunSettings, Severity};
use dq_guard::logging::setup::{init_logging, LoggingConfig};
use dq_guard::sources::DataFusionSource;
use dq_guard::GuardError;
use std::sync::Arc;

#[tokio::test]
async fn test_subscriber_installs_once() {
    init_logging(LoggingConfig::development().with_json_format(true)).unwrap();

    let err = init_logging(LoggingConfig::production()).unwrap_err();
    assert!(matches!(err, GuardError::Configuration(_)), "{err:?}");
    assert!(err.is_fatal_configuration());
    assert!(err.to_string().contains("logging already initialized"));

    // runs still log through the first subscriber
    let rule = RuleSpec::new("nothing", "custom_sql", Severity::Low).query("SELECT 1 AS one");
    let source = Arc::new(DataFusionSource::new("logged"));
    let report = dq_guard::run(vec![rule], source, RunSettings::default())
        .await
        .unwrap();
    assert_eq!(report.total(), 1);
}
