//! 沙箱执行环境
//!
//! 每次分析器调用在一个隔离容器中运行：挂载解压后的工作区、
//! 注入环境变量、限制资源。具体隔离技术藏在 [`Sandbox`] trait
//! 后面，执行编排只通过 create/start/stream_logs/wait/inspect/
//! kill 这组窄接口访问它。
//!
//! 标准输出与标准错误分流捕获到各自的有界缓冲区（超限截断
//! 最旧部分）。超时强制终止并记 TIMEOUT；容器被 OOM 杀死时
//! OOM 优先于非零退出码。

#![allow(deprecated)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bollard::{
    container::{LogOutput, StartContainerOptions},
    models::{ContainerCreateBody as ContainerConfig, HostConfig},
    query_parameters::{
        CreateContainerOptions, CreateImageOptions, InspectContainerOptions, LogsOptions,
        RemoveContainerOptions, StopContainerOptions, WaitContainerOptions,
    },
    Docker,
};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use common::messages::AnalyzerInvocationRecord;
use common::model::AnalyzerOutcome;

use crate::config::SandboxConfig;

/// 有界尾部缓冲区：超出上限时丢弃最旧的字节
#[derive(Debug)]
pub struct TailBuffer {
    max_bytes: usize,
    buf: VecDeque<u8>,
    truncated: bool,
}

impl TailBuffer {
    /// 创建缓冲区
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            buf: VecDeque::new(),
            truncated: false,
        }
    }

    /// 创建共享缓冲区
    pub fn shared(max_bytes: usize) -> SharedTail {
        Arc::new(Mutex::new(Self::new(max_bytes)))
    }

    /// 追加字节，超限时从头部截断
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
        if self.buf.len() > self.max_bytes {
            let excess = self.buf.len() - self.max_bytes;
            self.buf.drain(..excess);
            self.truncated = true;
        }
    }

    /// 是否发生过截断
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// 取出内容（UTF-8 有损转换）
    pub fn contents(&self) -> String {
        let bytes: Vec<u8> = self.buf.iter().copied().collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// 可跨任务共享的尾部缓冲区
pub type SharedTail = Arc<Mutex<TailBuffer>>;

/// 沙箱创建规格
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// 容器名称（唯一）
    pub name: String,

    /// 分析器镜像引用
    pub image: String,

    /// 环境变量（KEY=VALUE）
    pub env: Vec<String>,

    /// 要挂载到 /workspace 的工作区目录
    pub workspace_dir: PathBuf,
}

/// 沙箱终止后的状态
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxState {
    /// 退出码
    pub exit_code: Option<i64>,

    /// 是否被 OOM 杀死
    pub oom_killed: bool,
}

/// 沙箱能力接口
///
/// 执行编排只依赖这组操作；具体隔离技术（容器运行时）是
/// 实现细节。
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// 创建沙箱，返回句柄
    async fn create(&self, spec: &SandboxSpec) -> Result<String>;

    /// 启动沙箱
    async fn start(&self, id: &str) -> Result<()>;

    /// 跟随沙箱输出流，把 stdout/stderr 分流写入各自缓冲区
    ///
    /// 沙箱退出后流自然结束。
    async fn stream_logs(&self, id: &str, stdout: SharedTail, stderr: SharedTail) -> Result<()>;

    /// 等待沙箱自然终止，返回退出码
    async fn wait(&self, id: &str) -> Result<i64>;

    /// 检查沙箱终止状态（OOM 检测）
    async fn inspect(&self, id: &str) -> Result<SandboxState>;

    /// 强制终止沙箱
    async fn kill(&self, id: &str) -> Result<()>;

    /// 移除沙箱及其资源
    async fn remove(&self, id: &str);
}

/// 运行一次分析器调用
///
/// 任何沙箱层面的错误都折叠为 outcome = ERROR 的调用记录，
/// 不向上传播：单个分析器失败不中止作业。
pub async fn run_analyzer(
    sandbox: Arc<dyn Sandbox>,
    spec: SandboxSpec,
    analyzer_key: &str,
    timeout: Duration,
    max_log_bytes: usize,
) -> AnalyzerInvocationRecord {
    let start = Instant::now();

    match run_analyzer_inner(sandbox, &spec, timeout, max_log_bytes).await {
        Ok((outcome, exit_code, oom_killed, stdout_tail, stderr_tail)) => {
            AnalyzerInvocationRecord {
                analyzer_key: analyzer_key.to_string(),
                outcome,
                exit_code,
                duration_ms: start.elapsed().as_millis() as u64,
                oom_killed,
                stdout_tail,
                stderr_tail,
            }
        }
        Err(e) => {
            warn!(analyzer = analyzer_key, error = %e, "Sandbox execution failed");
            AnalyzerInvocationRecord {
                analyzer_key: analyzer_key.to_string(),
                outcome: AnalyzerOutcome::Error,
                exit_code: None,
                duration_ms: start.elapsed().as_millis() as u64,
                oom_killed: false,
                stdout_tail: String::new(),
                stderr_tail: format!("sandbox error: {:#}", e),
            }
        }
    }
}

async fn run_analyzer_inner(
    sandbox: Arc<dyn Sandbox>,
    spec: &SandboxSpec,
    timeout: Duration,
    max_log_bytes: usize,
) -> Result<(AnalyzerOutcome, Option<i32>, bool, String, String)> {
    let id = sandbox.create(spec).await?;

    let result = drive_sandbox(sandbox.clone(), &id, timeout, max_log_bytes).await;

    // 无论成败都移除沙箱
    sandbox.remove(&id).await;

    result
}

/// 启动沙箱并等待其结束，产出 (结果, 退出码, OOM, stdout, stderr)
async fn drive_sandbox(
    sandbox: Arc<dyn Sandbox>,
    id: &str,
    timeout: Duration,
    max_log_bytes: usize,
) -> Result<(AnalyzerOutcome, Option<i32>, bool, String, String)> {
    sandbox.start(id).await?;

    let stdout = TailBuffer::shared(max_log_bytes);
    let stderr = TailBuffer::shared(max_log_bytes);

    // 与 wait 并行分流日志
    let log_task = {
        let sandbox = sandbox.clone();
        let id = id.to_string();
        let stdout = stdout.clone();
        let stderr = stderr.clone();
        tokio::spawn(async move {
            if let Err(e) = sandbox.stream_logs(&id, stdout, stderr).await {
                warn!(sandbox = %id, "Log streaming ended with error: {}", e);
            }
        })
    };

    let wait_result = tokio::time::timeout(timeout, sandbox.wait(id)).await;

    let (outcome, exit_code, oom_killed) = match wait_result {
        Ok(Ok(code)) => {
            let state = sandbox.inspect(id).await.unwrap_or_default();
            if state.oom_killed {
                // OOM 优先于非零退出码
                (AnalyzerOutcome::Oom, Some(code as i32), true)
            } else if code == 0 {
                (AnalyzerOutcome::Ok, Some(0), false)
            } else {
                (AnalyzerOutcome::Error, Some(code as i32), false)
            }
        }
        Ok(Err(e)) => return Err(e).context("waiting for sandbox"),
        Err(_elapsed) => {
            if let Err(e) = sandbox.kill(id).await {
                warn!(sandbox = %id, "Failed to kill timed-out sandbox: {}", e);
            }
            (AnalyzerOutcome::Timeout, None, false)
        }
    };

    // 给日志流一点时间收尾，然后放弃
    let _ = tokio::time::timeout(Duration::from_secs(2), log_task).await;

    let stdout_tail = stdout.lock().unwrap().contents();
    let stderr_tail = stderr.lock().unwrap().contents();

    Ok((outcome, exit_code, oom_killed, stdout_tail, stderr_tail))
}

/// Docker 沙箱实现
pub struct DockerSandbox {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerSandbox {
    /// 连接 Docker daemon 并验证可用
    pub async fn connect(config: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        let _version = docker
            .version()
            .await
            .context("Failed to get Docker version")?;

        info!("Docker sandbox initialized successfully");

        Ok(Self { docker, config })
    }

    /// 拉取分析器镜像
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling analyzer image: {}", image);

        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(next) = stream.next().await {
            match next {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!("Pull progress: {}", status);
                    }
                }
                Err(e) => {
                    return Err(anyhow!("Failed to pull image: {}", e));
                }
            }
        }

        info!("Successfully pulled image: {}", image);
        Ok(())
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    async fn create(&self, spec: &SandboxSpec) -> Result<String> {
        // 确保镜像存在
        self.pull_image(&spec.image).await?;

        let host_config = HostConfig {
            binds: Some(vec![format!("{}:/workspace:rw", spec.workspace_dir.display())]),
            // 资源限制
            memory: self.config.memory_limit_gb.map(|m| m * 1024 * 1024 * 1024),
            cpu_shares: self.config.cpu_shares,
            pids_limit: self.config.pids_limit,
            network_mode: Some(
                self.config
                    .network_mode
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
            ),
            // 安全选项
            cap_drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        };

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(false),
            tty: Some(false),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            ..Default::default()
        };

        info!("Creating sandbox: {}", spec.name);

        self.docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create sandbox container")?;

        Ok(spec.name.clone())
    }

    async fn start(&self, id: &str) -> Result<()> {
        info!("Starting sandbox: {}", id);

        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start sandbox container")?;

        Ok(())
    }

    async fn stream_logs(&self, id: &str, stdout: SharedTail, stderr: SharedTail) -> Result<()> {
        let options = Some(LogsOptions {
            stdout: true,
            stderr: true,
            follow: true,
            tail: "all".to_string(),
            ..Default::default()
        });

        let stream = self.docker.logs(id, options);
        let mut stream = Box::pin(stream);

        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) => {
                    stdout.lock().unwrap().push(&message);
                }
                Ok(LogOutput::StdErr { message }) => {
                    stderr.lock().unwrap().push(&message);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Error reading sandbox log: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let options = Some(WaitContainerOptions {
            condition: "not-running".to_string(),
        });

        let mut stream = self.docker.wait_container(id, options);

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(e)) => {
                // 非零退出时 bollard 也可能返回错误响应，退而查询 inspect
                debug!(sandbox = %id, "wait_container error: {}, falling back to inspect", e);
                let state = self.inspect(id).await?;
                Ok(state.exit_code.unwrap_or(-1))
            }
            None => Ok(-1),
        }
    }

    async fn inspect(&self, id: &str) -> Result<SandboxState> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .context("Failed to inspect sandbox container")?;

        let state = response.state.unwrap_or_default();

        Ok(SandboxState {
            exit_code: state.exit_code,
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }

    async fn kill(&self, id: &str) -> Result<()> {
        warn!("Killing sandbox: {}", id);

        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: Some(5),
                    signal: None,
                }),
            )
            .await
            .context("Failed to stop sandbox container")?;

        Ok(())
    }

    async fn remove(&self, id: &str) {
        let options = Some(RemoveContainerOptions {
            force: true,
            v: true, // 移除关联的卷
            link: false,
        });

        match self.docker.remove_container(id, options).await {
            Ok(_) => debug!("Removed sandbox: {}", id),
            Err(e) => warn!("Failed to remove sandbox {}: {}", id, e),
        }
    }
}
