//! Code execution for agent replies
//!
//! Pulls fenced code blocks out of a message, writes each to a file inside the
//! work directory and runs it. Natively by default, or inside a throwaway
//! Docker container.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

static CODE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(\w*)\n(.*?)\n```").unwrap());

const FILENAME_MARKER: &str = "# filename:";

/// Where and how generated code is run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeExecutionConfig {
    /// Directory files are written to and run from
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Run inside Docker instead of on the host
    #[serde(default)]
    pub use_docker: bool,
    #[serde(default = "default_docker_image")]
    pub docker_image: String,
    /// Per-block timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// How many trailing messages to scan for code
    #[serde(default = "default_last_n_messages")]
    pub last_n_messages: usize,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("extensions")
}

fn default_docker_image() -> String {
    "python:3-slim".to_string()
}

fn default_timeout() -> u64 {
    600
}

fn default_last_n_messages() -> usize {
    1
}

impl Default for CodeExecutionConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            use_docker: false,
            docker_image: default_docker_image(),
            timeout_secs: default_timeout(),
            last_n_messages: default_last_n_messages(),
        }
    }
}

impl CodeExecutionConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_docker(mut self, use_docker: bool) -> Self {
        self.use_docker = use_docker;
        self
    }
}

/// A fenced code block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Language tag; empty when the fence had none
    pub lang: String,
    pub code: String,
}

/// Extract every fenced code block from `text`
pub fn extract_code(text: &str) -> Vec<CodeBlock> {
    CODE_BLOCK
        .captures_iter(text)
        .map(|cap| CodeBlock {
            lang: cap[1].to_string(),
            code: cap[2].to_string(),
        })
        .collect()
}

/// Guess a language for an untagged block
pub fn infer_lang(code: &str) -> &'static str {
    if code.starts_with("python ") || code.starts_with("python3 ") || code.starts_with("pip") {
        "sh"
    } else {
        "python"
    }
}

/// Result of running one or more blocks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub logs: String,
}

impl ExecutionOutcome {
    fn failed(logs: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            logs: logs.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Reply text sent back to the agent that wrote the code
    pub fn to_reply(&self) -> String {
        let status = if self.succeeded() {
            "execution succeeded"
        } else {
            "execution failed"
        };
        format!("exitcode: {} ({})\nCode output: {}", self.exit_code, status, self.logs)
    }
}

/// Execution backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecBackend {
    Native,
    Docker,
}

impl ExecBackend {
    /// Docker when requested and installed, otherwise native
    pub fn detect(use_docker: bool) -> Self {
        if use_docker {
            if which::which("docker").is_ok() {
                debug!("Code execution backend: docker");
                return Self::Docker;
            }
            warn!("use_docker is set but docker is not on PATH, running natively");
        }
        Self::Native
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Docker => "docker",
        }
    }
}

/// Runs code blocks inside one work directory
#[derive(Debug, Clone)]
pub struct CodeExecutor {
    config: CodeExecutionConfig,
    backend: ExecBackend,
}

impl CodeExecutor {
    pub fn new(config: CodeExecutionConfig) -> Self {
        let backend = ExecBackend::detect(config.use_docker);
        Self { config, backend }
    }

    pub fn config(&self) -> &CodeExecutionConfig {
        &self.config
    }

    /// Run blocks in order, stopping at the first failure
    pub async fn execute_blocks(&self, blocks: &[CodeBlock]) -> Result<ExecutionOutcome> {
        let mut logs_all = String::new();
        let mut exit_code = 0;

        for (i, block) in blocks.iter().enumerate() {
            let lang = if block.lang.is_empty() {
                infer_lang(&block.code)
            } else {
                block.lang.as_str()
            };
            info!(block = i, lang, backend = self.backend.name(), "Executing code block");

            let outcome = match lang {
                "python" | "py" | "python3" => self.execute_code(&block.code, "python3", "py").await?,
                "sh" | "bash" | "shell" => self.execute_code(&block.code, "sh", "sh").await?,
                other => ExecutionOutcome::failed(format!("unknown language {}", other)),
            };

            logs_all.push('\n');
            logs_all.push_str(&outcome.logs);
            exit_code = outcome.exit_code;
            if exit_code != 0 {
                break;
            }
        }

        Ok(ExecutionOutcome {
            exit_code,
            logs: logs_all,
        })
    }

    async fn execute_code(&self, code: &str, interpreter: &str, ext: &str) -> Result<ExecutionOutcome> {
        let filename = match requested_filename(code) {
            Some(name) => match sanitize_filename(&name) {
                Some(path) => path,
                None => return Ok(ExecutionOutcome::failed(format!("Invalid filename: {}", name))),
            },
            None => PathBuf::from(format!("tmp_code_{}.{}", short_hash(code), ext)),
        };

        let work_dir = &self.config.work_dir;
        let file_path = work_dir.join(&filename);
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&file_path, code)
            .await
            .with_context(|| format!("Failed to write {}", file_path.display()))?;
        debug!(file = %file_path.display(), "Saved code block");

        let (mut cmd, container) = self.build_command(interpreter, &filename).await?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        let result = timeout(Duration::from_secs(self.config.timeout_secs), cmd.output()).await;

        match result {
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(1);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);
                let logs = if exit_code == 0 || stderr.is_empty() {
                    stdout.into_owned()
                } else {
                    stderr.into_owned()
                };
                debug!(exit_code, "Code block finished");
                Ok(ExecutionOutcome { exit_code, logs })
            }
            Ok(Err(e)) => Ok(ExecutionOutcome::failed(format!("Failed to execute {}: {}", interpreter, e))),
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "Code execution timed out");
                if let Some(name) = container {
                    kill_container(&name).await;
                }
                Ok(ExecutionOutcome::failed("Timeout"))
            }
        }
    }

    /// Command for the backend, plus the container name when one is started
    async fn build_command(&self, interpreter: &str, filename: &Path) -> Result<(Command, Option<String>)> {
        let work_dir = &self.config.work_dir;
        match self.backend {
            ExecBackend::Native => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(filename).current_dir(work_dir);
                Ok((cmd, None))
            }
            ExecBackend::Docker => {
                let abs = tokio::fs::canonicalize(work_dir)
                    .await
                    .with_context(|| format!("Failed to resolve {}", work_dir.display()))?;
                let name = container_name();
                let mut cmd = Command::new("docker");
                cmd.args(docker_run_args(&name, &abs, &self.config.docker_image, interpreter))
                    .arg(filename);
                Ok((cmd, Some(name)))
            }
        }
    }
}

fn container_name() -> String {
    format!("agentchat-exec-{}", uuid::Uuid::new_v4().simple())
}

fn docker_run_args(name: &str, work_dir: &Path, image: &str, interpreter: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
        "-v".to_string(),
        format!("{}:/workspace:rw", work_dir.display()),
        "-w".to_string(),
        "/workspace".to_string(),
        image.to_string(),
        interpreter.to_string(),
    ]
}

/// Dropping the `docker run` client leaves the container running
async fn kill_container(name: &str) {
    match Command::new("docker")
        .args(["kill", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) if status.success() => debug!(container = name, "Killed timed out container"),
        Ok(status) => warn!(container = name, %status, "docker kill failed"),
        Err(e) => warn!(container = name, error = %e, "Failed to run docker kill"),
    }
}

/// `# filename: <name>` on the first line
fn requested_filename(code: &str) -> Option<String> {
    let first = code.lines().next()?.trim();
    let name = first.strip_prefix(FILENAME_MARKER)?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Relative path that stays inside the work directory
fn sanitize_filename(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    if path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        Some(path.to_path_buf())
    } else {
        None
    }
}

fn short_hash(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> CodeExecutor {
        CodeExecutor::new(CodeExecutionConfig::new(dir.path()).with_timeout(5))
    }

    #[test]
    fn test_extract_code_blocks() {
        let text = "Here you go:\n```python\n# filename: count.py\nfor i in range(1, 101):\n    print(i)\n```\nthen\n```sh\npython count.py\n```";
        let blocks = extract_code(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lang, "python");
        assert!(blocks[0].code.starts_with("# filename: count.py"));
        assert_eq!(blocks[1].lang, "sh");
        assert_eq!(blocks[1].code, "python count.py");
    }

    #[test]
    fn test_no_code() {
        assert!(extract_code("CONTINUE, more work needed").is_empty());
        assert!(extract_code("").is_empty());
    }

    #[test]
    fn test_infer_lang() {
        assert_eq!(infer_lang("python3 script.py"), "sh");
        assert_eq!(infer_lang("pip install numpy"), "sh");
        assert_eq!(infer_lang("print('hi')"), "python");
    }

    #[test]
    fn test_requested_filename() {
        assert_eq!(requested_filename("# filename: a.py\nx = 1"), Some("a.py".to_string()));
        assert_eq!(requested_filename("x = 1"), None);
        assert_eq!(requested_filename("# filename:   \nx"), None);
    }

    #[test]
    fn test_sanitize_filename() {
        assert!(sanitize_filename("numbers.py").is_some());
        assert!(sanitize_filename("sub/numbers.py").is_some());
        assert!(sanitize_filename("../escape.py").is_none());
        assert!(sanitize_filename("/etc/passwd").is_none());
    }

    #[test]
    fn test_docker_flag() {
        let config = CodeExecutionConfig::new("work").with_docker(true);
        assert!(config.use_docker);
        assert_eq!(config.docker_image, "python:3-slim");

        let native = CodeExecutor::new(CodeExecutionConfig::new("work").with_docker(false));
        assert_eq!(native.backend, ExecBackend::Native);
    }

    #[test]
    fn test_docker_run_names_container() {
        let name = container_name();
        assert!(name.starts_with("agentchat-exec-"));
        assert_ne!(name, container_name());

        let args = docker_run_args(&name, Path::new("/tmp/work"), "python:3-slim", "python3");
        let at = args.iter().position(|a| a == "--name").unwrap();
        assert_eq!(args[at + 1], name);
        assert!(args.contains(&"/tmp/work:/workspace:rw".to_string()));
        assert_eq!(&args[args.len() - 2..], ["python:3-slim", "python3"]);
    }

    #[test]
    fn test_reply_format() {
        let ok = ExecutionOutcome {
            exit_code: 0,
            logs: "\n1\n2\n".to_string(),
        };
        assert_eq!(ok.to_reply(), "exitcode: 0 (execution succeeded)\nCode output: \n1\n2\n");
        assert!(ExecutionOutcome::failed("Timeout").to_reply().starts_with("exitcode: 1 (execution failed)"));
    }

    #[tokio::test]
    async fn test_shell_block_writes_named_file() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let blocks = vec![CodeBlock {
            lang: "sh".to_string(),
            code: "# filename: hello.sh\necho hello".to_string(),
        }];

        let outcome = exec.execute_blocks(&blocks).await.unwrap();
        assert!(outcome.succeeded());
        assert!(outcome.logs.contains("hello"));
        assert!(dir.path().join("hello.sh").exists());
    }

    #[tokio::test]
    async fn test_failure_stops_execution() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let blocks = vec![
            CodeBlock {
                lang: "bash".to_string(),
                code: "echo oops >&2; exit 3".to_string(),
            },
            CodeBlock {
                lang: "sh".to_string(),
                code: "# filename: never.sh\necho never".to_string(),
            },
        ];

        let outcome = exec.execute_blocks(&blocks).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.logs.contains("oops"));
        assert!(!dir.path().join("never.sh").exists());
    }

    #[tokio::test]
    async fn test_unknown_language() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let blocks = vec![CodeBlock {
            lang: "cobol".to_string(),
            code: "DISPLAY 'HI'.".to_string(),
        }];

        let outcome = exec.execute_blocks(&blocks).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.logs.contains("unknown language cobol"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = TempDir::new().unwrap();
        let exec = CodeExecutor::new(CodeExecutionConfig::new(dir.path()).with_timeout(1));
        let blocks = vec![CodeBlock {
            lang: "sh".to_string(),
            code: "sleep 10".to_string(),
        }];

        let outcome = exec.execute_blocks(&blocks).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.logs.contains("Timeout"));
    }

    #[tokio::test]
    async fn test_escaping_filename_rejected() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        let blocks = vec![CodeBlock {
            lang: "sh".to_string(),
            code: "# filename: ../evil.sh\necho evil".to_string(),
        }];

        let outcome = exec.execute_blocks(&blocks).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.logs.contains("Invalid filename"));
    }
}
