use std::{
    io::{BufRead, BufReader},
    net::TcpListener,
    path::Path,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use logship::{
    config::{PipelineConfig, ACTIVITY_CHANNEL, APPLICATION_CHANNEL, ERROR_CHANNEL},
    logging::{ConfigError, ExceptionInfo, Record, Registry, Severity, SourceLocation},
};
use serde_json::Value;

fn config_for(log_dir: &Path, port: u16) -> PipelineConfig {
    let mut config = PipelineConfig {
        machine_id: "test-box".to_string(),
        log_dir: log_dir.to_path_buf(),
        ..PipelineConfig::default()
    };
    config.collector.host = "127.0.0.1".to_string();
    config.collector.port = port;
    config.collector.retry_delay = Duration::from_millis(50);
    config
}

fn create_dirs(config: &PipelineConfig) {
    for path in config.file_paths().unwrap() {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    }
}

#[test]
fn records_reach_files_and_collector() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let collector = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        BufReader::new(stream)
            .lines()
            .map_while(Result::ok)
            .collect::<Vec<String>>()
    });

    let config = config_for(dir.path(), port);
    create_dirs(&config);
    let registry = Registry::from_config(&config).unwrap();

    registry
        .log(
            ACTIVITY_CHANNEL,
            Record::builder(Severity::Info, "Logging activity every 5 seconds"),
        )
        .unwrap();
    let dropped = registry
        .log(ERROR_CHANNEL, Record::builder(Severity::Info, "not an error"))
        .unwrap();
    assert!(dropped.is_dropped());
    registry
        .log(
            ERROR_CHANNEL,
            Record::builder(Severity::Error, "disk full")
                .source(SourceLocation::new("src/store.rs", 88, "store::flush"))
                .exception(ExceptionInfo::new("IOError", "no space", "  at store::flush\n")),
        )
        .unwrap();
    registry
        .log(
            APPLICATION_CHANNEL,
            Record::builder(Severity::Info, "Root endpoint accessed"),
        )
        .unwrap();

    registry.shutdown();

    let received = collector.join().unwrap();
    let events: Vec<Value> = received
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let messages: Vec<&str> = events
        .iter()
        .map(|e| e["message"].as_str().unwrap())
        .collect();
    assert_eq!(
        messages,
        vec![
            "Logging activity every 5 seconds",
            "disk full",
            "Root endpoint accessed"
        ]
    );
    assert_eq!(events[1]["level"], "ERROR");
    assert_eq!(events[1]["exception"]["type"], "IOError");
    assert_eq!(events[1]["machine_id"], "test-box");
    assert!(events[0].get("exception").is_none());

    let activity =
        std::fs::read_to_string(dir.path().join("activity_log/activity.log")).unwrap();
    assert_eq!(activity.lines().count(), 1);
    assert!(activity.ends_with("::Logging activity every 5 seconds\n"));

    let errors = std::fs::read_to_string(dir.path().join("error_log/errors.log")).unwrap();
    assert!(errors.contains("::test-box::ERROR\n*****\n"));
    assert!(errors.contains("Exception Type: IOError\n"));
    assert!(errors.contains("Location: store.rs:88 store::flush\n"));
    assert!(!errors.contains("not an error"));
    assert!(errors.ends_with("______\n\n"));

    let application =
        std::fs::read_to_string(dir.path().join("application_log/application.log")).unwrap();
    assert!(application.contains("::test-box::INFO::Root endpoint accessed"));
}

#[test]
fn collector_outage_does_not_block_local_files() {
    let dir = tempfile::tempdir().unwrap();
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut config = config_for(dir.path(), port);
    config.collector.drain_timeout = Duration::from_millis(100);
    create_dirs(&config);
    let registry = Registry::from_config(&config).unwrap();

    let dispatch = registry
        .log(
            APPLICATION_CHANNEL,
            Record::builder(Severity::Warning, "collector is down"),
        )
        .unwrap();
    assert_eq!(dispatch.delivered, 2);

    let application =
        std::fs::read_to_string(dir.path().join("application_log/application.log")).unwrap();
    assert!(application.contains("::WARNING::collector is down"));

    registry.shutdown();
    let after = registry
        .log(APPLICATION_CHANNEL, Record::builder(Severity::Info, "late"))
        .unwrap();
    assert_eq!(after.delivered, 0);
    assert!(after.failures.iter().all(|f| f.is_closed()));
}

#[test]
fn missing_log_directory_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir.path().join("nowhere"), 5000);

    assert!(matches!(
        Registry::from_config(&config),
        Err(ConfigError::Sink { .. })
    ));
}

#[test]
fn enabling_only_some_channels() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path(), 5000);
    config.enabled = Some(vec![ERROR_CHANNEL.to_string()]);
    create_dirs(&config);

    let registry = Registry::from_config(&config).unwrap();
    assert!(registry.get(ERROR_CHANNEL).is_ok());
    assert!(matches!(
        registry.get(ACTIVITY_CHANNEL),
        Err(ConfigError::UnknownChannel(_))
    ));
    registry.shutdown();
}

fn finishes_within<F>(bound: Duration, work: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    let (finished, done) = mpsc::channel();
    thread::spawn(move || {
        work();
        let _ = finished.send(());
    });
    done.recv_timeout(bound).is_ok()
}

// The only test in this binary that installs the `log` facade.
#[test]
fn flush_and_shutdown_return_while_reconnecting() {
    let dir = tempfile::tempdir().unwrap();
    let port = {
        let probe = TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut config = config_for(dir.path(), port);
    config.collector.retry_delay = Duration::from_secs(30);
    config.collector.drain_timeout = Duration::from_millis(100);
    create_dirs(&config);
    let registry = Arc::new(Registry::from_config(&config).unwrap());
    Registry::install(Arc::clone(&registry)).unwrap();

    log::warn!(target: APPLICATION_CHANNEL, "collector is down");
    // Let the delivery worker pick the payload up and start backing off.
    thread::sleep(Duration::from_millis(200));

    assert!(finishes_within(Duration::from_secs(5), || log::logger().flush()));

    let shutting_down = Arc::clone(&registry);
    assert!(finishes_within(Duration::from_secs(5), move || {
        shutting_down.shutdown()
    }));
    assert!(registry.is_shut_down());

    let application =
        std::fs::read_to_string(dir.path().join("application_log/application.log")).unwrap();
    assert!(application.contains("::WARNING::collector is down"));
}
