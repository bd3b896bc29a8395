use cps_config::{AppConfig, ConfigError, ProbeConfig};
use std::sync::Mutex;

// 环境变量是进程级状态，同一文件内的测试串行执行
static ENV_LOCK: Mutex<()> = Mutex::new(());

const KEYS: &[&str] = &[
    "CPS_PROTOCOL_CONFIG",
    "CPS_ENIP_SERVER",
    "CPS_MODBUS_SERVER",
    "CPS_REQUEST_TIMEOUT_MS",
    "CPS_STOP_GRACE_MS",
    "CPS_STARTUP_DELAY_MS",
    "CPS_MODBUS_UNIT_ID",
    "CPS_PROBE_TAG",
    "CPS_PROBE_INSTANCE",
    "CPS_PROBE_VALUE",
    "CPS_PROBE_ADDRESS",
];

fn reset_env() {
    // Rust 2024 中 set_var/remove_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn load_config_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();
    unsafe {
        std::env::set_var("CPS_PROTOCOL_CONFIG", "configs/enip.json");
        std::env::set_var("CPS_ENIP_SERVER", "python3 -m cpppo.server.enip -v");
        std::env::set_var("CPS_REQUEST_TIMEOUT_MS", "500");
        std::env::set_var("CPS_MODBUS_UNIT_ID", "3");
        std::env::set_var("CPS_PROBE_TAG", "SENSOR1");
        std::env::set_var("CPS_PROBE_INSTANCE", "1");
        std::env::set_var("CPS_PROBE_VALUE", "7");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.protocol_config_path, "configs/enip.json");
    assert_eq!(config.request_timeout_ms, 500);
    assert_eq!(config.stop_grace_ms, 2000);
    assert_eq!(config.startup_delay_ms, 1000);
    assert_eq!(config.modbus_unit_id, Some(3));
    assert_eq!(
        config.server_override("enip"),
        Some("python3 -m cpppo.server.enip -v")
    );
    assert_eq!(config.server_override("modbus"), None);
    assert_eq!(
        config.probe,
        Some(ProbeConfig {
            tag: "SENSOR1".to_string(),
            instance: Some(1),
            value: Some("7".to_string()),
            address: None,
        })
    );
}

#[test]
fn protocol_config_path_is_required() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();

    assert!(matches!(
        AppConfig::from_env(),
        Err(ConfigError::Missing(key)) if key == "CPS_PROTOCOL_CONFIG"
    ));
}

#[test]
fn malformed_numbers_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    reset_env();
    unsafe {
        std::env::set_var("CPS_PROTOCOL_CONFIG", "configs/modbus.json");
        std::env::set_var("CPS_MODBUS_UNIT_ID", "300");
    }

    assert!(matches!(
        AppConfig::from_env(),
        Err(ConfigError::Invalid(key, _)) if key == "CPS_MODBUS_UNIT_ID"
    ));

    unsafe {
        std::env::remove_var("CPS_MODBUS_UNIT_ID");
        std::env::set_var("CPS_REQUEST_TIMEOUT_MS", "0");
    }
    assert!(matches!(
        AppConfig::from_env(),
        Err(ConfigError::Invalid(key, _)) if key == "CPS_REQUEST_TIMEOUT_MS"
    ));
}
