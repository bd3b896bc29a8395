//! 外部模拟服务端进程管理
//!
//! 模拟控制器是一个独立的操作系统进程（例如 cpppo 的 EtherNet/IP 服务端）。
//! 启动命令由监听地址和标签表确定性生成；启动后不等待就绪。
//! 停止时先请求优雅退出，超过宽限期后强制结束。
//!
//! 停止路径上的任何失败只记录日志，不向上传播：`stop` 经常在错误处理路径中
//! 调用，不能覆盖触发清理的原始错误。

use crate::error::ProtocolError;
use crate::types::ServerProgram;
use cps_telemetry::{record_server_started, record_server_stopped, record_stop_failure};
use domain::{Address, TagSpec};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid, Signal, System};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// 标签在命令行中的书写形式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStyle {
    /// `name[:instance]:KIND`
    Colon,
    /// `name[:instance]=KIND`（cpppo 的标签语法）
    ///
    /// 有意偏离通用的 `Colon` 形式：cpppo 用 `=` 分隔标签名与类型，
    /// `:` 已被多键标签名的实例号占用。
    Assign,
}

impl TagStyle {
    pub fn token(&self, tag: &TagSpec) -> String {
        let mut token = tag.name().to_string();
        if let Some(instance) = tag.instance() {
            token.push(':');
            token.push_str(&instance.to_string());
        }
        token.push(match self {
            Self::Colon => ':',
            Self::Assign => '=',
        });
        token.push_str(tag.kind());
        token
    }
}

/// 模拟服务端启动命令。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    program: String,
    args: Vec<String>,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 生成启动命令。
    ///
    /// 布局：程序前缀，`--address host:port`，协议相关参数，然后按声明顺序
    /// 每个标签一个参数。相同输入总是得到相同输出。
    pub fn build(
        program: &ServerProgram,
        address: &Address,
        flags: &[String],
        tags: &[TagSpec],
        style: TagStyle,
    ) -> Self {
        let mut args = program.args.clone();
        args.push("--address".to_string());
        args.push(address.to_string());
        args.extend(flags.iter().cloned());
        args.extend(tags.iter().map(|tag| style.token(tag)));
        Self::new(program.program.clone(), args)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// 正在运行（或已退出）的模拟服务端进程句柄。
///
/// 句柄被丢弃时子进程会被强制结束，因此即使调用方在提前返回或出错时
/// 没有调用 [`ServerProcess::stop`]，进程也不会遗留。
pub struct ServerProcess {
    child: Option<Child>,
    pid: Option<u32>,
    label: String,
    grace: Duration,
}

impl ServerProcess {
    /// 启动进程。必须在 tokio 运行时内调用。
    pub fn start(command: &ServerCommand, grace: Duration) -> Result<Self, ProtocolError> {
        let child = Command::new(command.program())
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProtocolError::Spawn(format!("{}: {}", command.program(), e)))?;

        let pid = child.id();
        info!(
            target: "cps.server",
            pid = ?pid,
            command = %command,
            "started simulated server"
        );
        record_server_started();

        Ok(Self {
            child: Some(child),
            pid,
            label: command.program().to_string(),
            grace,
        })
    }

    /// 启动时记录的进程 ID。
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// 进程是否仍在运行（会回收已退出的子进程）。
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// 停止进程。可重复调用，从不返回错误。
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            debug!(target: "cps.server", server = %self.label, "server already stopped");
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                info!(
                    target: "cps.server",
                    server = %self.label,
                    pid = ?self.pid,
                    %status,
                    "server had already exited"
                );
                record_server_stopped();
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    target: "cps.server",
                    server = %self.label,
                    error = %e,
                    "failed to poll server status"
                );
            }
        }

        if request_terminate(self.pid) {
            match tokio::time::timeout(self.grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(
                        target: "cps.server",
                        server = %self.label,
                        pid = ?self.pid,
                        %status,
                        "server stopped"
                    );
                    record_server_stopped();
                    return;
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "cps.server",
                        server = %self.label,
                        error = %e,
                        "failed to wait for server, killing"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "cps.server",
                        server = %self.label,
                        grace_ms = self.grace.as_millis() as u64,
                        "server ignored terminate request, killing"
                    );
                }
            }
        }

        match child.kill().await {
            Ok(()) => {
                info!(target: "cps.server", server = %self.label, pid = ?self.pid, "server killed");
                record_server_stopped();
            }
            Err(e) => {
                warn!(
                    target: "cps.server",
                    server = %self.label,
                    error = %e,
                    "failed to kill server"
                );
                record_stop_failure();
            }
        }
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(target: "cps.server", server = %self.label, "server handle dropped, killing");
            let _ = child.start_kill();
        }
    }
}

impl fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerProcess")
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("stopped", &self.child.is_none())
            .finish()
    }
}

/// 发送 SIGTERM（或平台等价信号）。平台不支持或进程不存在时返回 false。
fn request_terminate(pid: Option<u32>) -> bool {
    let Some(pid) = pid else {
        return false;
    };
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    if !system.refresh_process(pid) {
        return false;
    }
    system
        .process(pid)
        .and_then(|process| process.kill_with(Signal::Term))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_tokens() {
        let multi = TagSpec::with_instance("SENSOR1", 1, "INT");
        let single = TagSpec::new("ACTUATOR1", "INT");
        assert_eq!(TagStyle::Colon.token(&multi), "SENSOR1:1:INT");
        assert_eq!(TagStyle::Colon.token(&single), "ACTUATOR1:INT");
        assert_eq!(TagStyle::Assign.token(&multi), "SENSOR1:1=INT");
    }

    #[test]
    fn test_build_puts_address_first() {
        let program = ServerProgram::new("server", vec!["-v".to_string()]);
        let address: Address = "localhost:502".parse().unwrap();
        let tags = vec![
            TagSpec::with_instance("B", 2, "HR"),
            TagSpec::with_instance("A", 1, "HR"),
        ];
        let command = ServerCommand::build(
            &program,
            &address,
            &["--hr".to_string(), "2".to_string()],
            &tags,
            TagStyle::Colon,
        );
        assert_eq!(command.program(), "server");
        assert_eq!(
            command.args(),
            &["-v", "--address", "localhost:502", "--hr", "2", "B:2:HR", "A:1:HR"]
        );
        assert_eq!(
            command.to_string(),
            "server -v --address localhost:502 --hr 2 B:2:HR A:1:HR"
        );
    }
}
