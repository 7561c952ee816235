//! 配置与能力描述的加载测试。
//!
//! 只经由公开 API 验证 TOML 解析、默认值与校验错误，不触达任何后端。

use std::io::Write;

use spark_transport_sctp::{
    Capabilities, ConfigError, DEFAULT_RECEIVE_BUFFER, DEFAULT_UDP_ENCAPSULATION_PORT, EventMask,
    SctpConfig, SctpError, TruncationPolicy,
};

#[test]
fn empty_document_yields_defaults() {
    let config = SctpConfig::from_toml_str("").expect("defaults");
    assert_eq!(config.receive.buffer_size, DEFAULT_RECEIVE_BUFFER);
    assert_eq!(config.receive.truncation, TruncationPolicy::Report);
    assert_eq!(config.max_addresses, 8);
    assert_eq!(config.max_backlog, None);
    assert_eq!(
        config.usrsctp.udp_encapsulation_port,
        DEFAULT_UDP_ENCAPSULATION_PORT
    );
    assert_eq!(config.usrsctp.remote_udp_encapsulation_port, 0);
    assert!(config.default_subscriptions().is_empty());
}

#[test]
fn full_document_is_parsed() {
    let config = SctpConfig::from_toml_str(
        r#"
        max_addresses = 4
        max_backlog = 32
        notification_data_cap = 256
        default_subscriptions = ["data_io", "Association", "shutdown"]

        [receive]
        buffer_size = 65536
        truncation = "error"

        [usrsctp]
        udp_encapsulation_port = 0
        remote_udp_encapsulation_port = 9899
        "#,
    )
    .expect("parse");
    assert_eq!(config.receive.buffer_size, 65536);
    assert_eq!(config.receive.truncation, TruncationPolicy::Error);
    assert_eq!(config.max_addresses, 4);
    assert_eq!(config.max_backlog, Some(32));
    assert_eq!(config.notification_data_cap, 256);
    assert_eq!(config.usrsctp.udp_encapsulation_port, 0);
    assert_eq!(config.usrsctp.remote_udp_encapsulation_port, 9899);
    assert_eq!(
        config.default_subscriptions(),
        EventMask::DATA_IO | EventMask::ASSOCIATION | EventMask::SHUTDOWN
    );
}

#[test]
fn zero_receive_buffer_is_invalid() {
    let err = SctpConfig::from_toml_str("[receive]\nbuffer_size = 0\n").expect_err("invalid");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "receive.buffer_size",
            ..
        }
    ));
}

#[test]
fn unknown_event_name_is_invalid() {
    let err = SctpConfig::from_toml_str("default_subscriptions = [\"heartbeat\"]\n")
        .expect_err("invalid");
    assert!(matches!(
        err,
        ConfigError::Invalid {
            field: "default_subscriptions",
            ..
        }
    ));
}

#[test]
fn unknown_keys_are_rejected() {
    let err = SctpConfig::from_toml_str("receive_buffer = 10\n").expect_err("unknown key");
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn config_errors_convert_into_sctp_errors() {
    let err: SctpError = SctpConfig::from_toml_str("max_addresses = 0\n")
        .expect_err("invalid")
        .into();
    assert_eq!(err.code(), "spark.transport.sctp.config");
}

#[test]
fn config_is_loaded_from_path() {
    let path = std::env::temp_dir().join(format!(
        "spark-transport-sctp-config-{}.toml",
        std::process::id()
    ));
    {
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "[receive]\nbuffer_size = 2048").expect("write");
    }
    let loaded = SctpConfig::from_path(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded.expect("load").receive.buffer_size, 2048);
}

#[test]
fn missing_file_reports_path() {
    let err = SctpConfig::from_path("/nonexistent/spark-sctp.toml").expect_err("missing");
    assert!(matches!(err, ConfigError::Read { ref path, .. } if path.contains("spark-sctp.toml")));
}

#[test]
fn capabilities_are_read_from_toml() {
    let caps = Capabilities::from_toml_str(
        r#"
        send_failure_event_event = true
        sender_dry_event = false
        max_backlog = 64
        "#,
    )
    .expect("capabilities");
    assert!(caps.send_failure_event_event);
    assert!(!caps.sender_dry_event);
    assert!(caps.stream_reset_event);
    assert_eq!(caps.max_backlog, 64);
}
