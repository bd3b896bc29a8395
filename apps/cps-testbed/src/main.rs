//! 工控协议测试床：按配置启动模拟服务端，做一次探测读写后退出。

use cps_config::{AppConfig, ProbeConfig};
use cps_protocol::{
    Address, Protocol, ProtocolError, ProtocolMode, ProtocolOptions, ServerProgram, TagKey,
    TagValue, build_protocol, load_config,
};
use cps_telemetry::{init_tracing, metrics};
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let protocol_config = load_config(&config.protocol_config_path)?;
    let options = protocol_options(&config, protocol_config.name());
    let mut protocol = build_protocol(protocol_config, options)?;
    info!(
        target: "cps.testbed",
        protocol = %protocol.name(),
        mode = ?protocol.mode(),
        "protocol ready"
    );

    if protocol.mode() == ProtocolMode::ClientAndServer {
        protocol.start_server()?;
        // 等待模拟服务端开始监听
        tokio::time::sleep(Duration::from_millis(config.startup_delay_ms)).await;
    }

    let outcome = match &config.probe {
        Some(probe) => run_probe(protocol.as_ref(), probe).await,
        None => Ok(()),
    };

    protocol.stop_server().await;

    let snapshot = metrics().snapshot();
    info!(
        target: "cps.testbed",
        sends = snapshot.sends,
        send_failures = snapshot.send_failures,
        receives = snapshot.receives,
        receive_failures = snapshot.receive_failures,
        servers_started = snapshot.servers_started,
        servers_stopped = snapshot.servers_stopped,
        stop_failures = snapshot.stop_failures,
        "telemetry snapshot"
    );

    Ok(outcome?)
}

/// 把环境配置映射为协议运行参数。
fn protocol_options(config: &AppConfig, protocol: &str) -> ProtocolOptions {
    ProtocolOptions {
        request_timeout_ms: config.request_timeout_ms,
        stop_grace_ms: config.stop_grace_ms,
        server_program: config.server_override(protocol).and_then(ServerProgram::parse),
        unit_id: config.modbus_unit_id,
    }
}

async fn run_probe(protocol: &dyn Protocol, probe: &ProbeConfig) -> Result<(), ProtocolError> {
    let address = probe_address(protocol, probe)?;
    let key = match probe.instance {
        Some(instance) => TagKey::with_instance(probe.tag.as_str(), instance),
        None => TagKey::new(probe.tag.as_str()),
    };

    if let Some(raw) = &probe.value {
        let value = parse_value(raw)?;
        protocol.send(&key, value, &address).await?;
        info!(target: "cps.testbed", %address, %key, %value, "probe write ok");
    }

    match protocol.receive(&key, &address).await {
        Ok(value) => {
            info!(target: "cps.testbed", %address, %key, %value, "probe read ok");
            Ok(())
        }
        Err(e) => {
            warn!(target: "cps.testbed", %address, %key, error = %e, "probe read failed");
            Err(e)
        }
    }
}

/// 显式地址优先，否则探测内嵌服务端。
fn probe_address(protocol: &dyn Protocol, probe: &ProbeConfig) -> Result<Address, ProtocolError> {
    match (&probe.address, protocol.server_descriptor()) {
        (Some(address), _) => Ok(address.parse::<Address>()?),
        (None, Some(server)) => Ok(server.address().clone()),
        (None, None) => Err(ProtocolError::Config(
            "CPS_PROBE_ADDRESS is required in client mode".to_string(),
        )),
    }
}

fn parse_value(raw: &str) -> Result<TagValue, ProtocolError> {
    serde_json::from_str::<TagValue>(raw)
        .map_err(|e| ProtocolError::InvalidValue(format!("{:?}: {}", raw, e)))
}
