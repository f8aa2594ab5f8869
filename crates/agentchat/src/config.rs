//! Configuration for the agentchat CLI
//!
//! Configuration file: `agentchat.toml`, searched in the current directory
//! and its parents. Every section is optional.

use anyhow::{Context, Result};
use llm_core::LlmConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::human::HumanInputMode;
use crate::retrieve::RetrieveConfig;

pub const CONFIG_FILE: &str = "agentchat.toml";

/// How many parent directories are searched for the config file
const SEARCH_DEPTH: usize = 10;

pub const ASSISTANT_SYSTEM_MESSAGE: &str = "You are a coder specializing in python";

pub const CHAOS_SYSTEM_MESSAGE: &str =
    "You are an agent of chaos, a joker, and a company jester specializing in everything except python";

pub const USER_PROXY_SYSTEM_MESSAGE: &str = "Reply TERMINATE if the task has been solved at full satisfaction.
Otherwise, reply CONTINUE, or the reason why the task is not solved yet.";

pub const TASK_WRITE_NUMBERS: &str = "
Write python code to output numbers 1 to 100, and then store the code in a file
";

pub const TASK_CHANGE_NUMBERS: &str = "
Change the code in the file you just created to instead output numbers 1 to 200
";

/// Everything `agentchat.toml` can hold
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub retrieve: RetrieveConfig,
}

/// Agents and tasks of the `run` command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory code blocks are written to and run in
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Automatic replies the proxy sends before giving up
    #[serde(default = "default_max_auto_reply")]
    pub max_consecutive_auto_reply: usize,

    #[serde(default = "default_human_input_mode")]
    pub human_input_mode: HumanInputMode,

    /// Run code in a container instead of on the host
    #[serde(default)]
    pub use_docker: bool,

    #[serde(default = "default_assistant_system_message")]
    pub assistant_system_message: String,

    #[serde(default = "default_chaos_system_message")]
    pub chaos_system_message: String,

    #[serde(default = "default_user_proxy_system_message")]
    pub user_proxy_system_message: String,

    /// Run in order; each starts after the previous chat ends
    #[serde(default = "default_tasks")]
    pub tasks: Vec<TaskConfig>,
}

/// One chat of the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub message: String,

    /// Agent the proxy talks to
    #[serde(default = "default_recipient")]
    pub recipient: String,
}

impl TaskConfig {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            recipient: default_recipient(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("web")
}

fn default_max_auto_reply() -> usize {
    10
}

fn default_human_input_mode() -> HumanInputMode {
    HumanInputMode::Never
}

fn default_assistant_system_message() -> String {
    ASSISTANT_SYSTEM_MESSAGE.to_string()
}

fn default_chaos_system_message() -> String {
    CHAOS_SYSTEM_MESSAGE.to_string()
}

fn default_user_proxy_system_message() -> String {
    USER_PROXY_SYSTEM_MESSAGE.to_string()
}

fn default_recipient() -> String {
    "assistant".to_string()
}

fn default_tasks() -> Vec<TaskConfig> {
    vec![TaskConfig::new(TASK_WRITE_NUMBERS), TaskConfig::new(TASK_CHANGE_NUMBERS)]
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            max_consecutive_auto_reply: default_max_auto_reply(),
            human_input_mode: default_human_input_mode(),
            use_docker: false,
            assistant_system_message: default_assistant_system_message(),
            chaos_system_message: default_chaos_system_message(),
            user_proxy_system_message: default_user_proxy_system_message(),
            tasks: default_tasks(),
        }
    }
}

impl AppConfig {
    /// Load `path`, or the nearest `agentchat.toml`, or the built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::find_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Nearest `agentchat.toml` in the current directory or its parents
    pub fn find_config_path() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;

        for _ in 0..SEARCH_DEPTH {
            let candidate = current.join(CONFIG_FILE);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        None
    }

    /// Write a commented default configuration into `dir`
    pub fn create_default(dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE);

        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        fs::create_dir_all(dir)?;

        let default_config = r#"# agentchat configuration

[llm]
# Seconds before a model request is abandoned ("timeout" is accepted too)
request_timeout = 1200

# Responses are cached per seed under cache_root; remove the line to disable
seed = 42

temperature = 0.0
cache_root = ".cache"

# Endpoints are tried in order until one answers
[[llm.config_list]]
api_type = "openai"
api_base = "http://localhost:7860"
api_key = "NULL"
# model = "gpt-4"

[session]
work_dir = "web"
max_consecutive_auto_reply = 10

# ALWAYS, TERMINATE or NEVER
human_input_mode = "NEVER"

# Run code blocks in docker when it is installed
use_docker = false

[[session.tasks]]
message = "Write python code to output numbers 1 to 100, and then store the code in a file"

[[session.tasks]]
message = "Change the code in the file you just created to instead output numbers 1 to 200"
# recipient = "assistant"

[retrieve]
# docs_path = "./website/docs"
collection_name = "autogen-docs"
chunk_token_size = 2000
db_path = "/tmp/chromadb"
get_or_create = true
n_results = 20
"#;

        fs::write(&path, default_config).with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }
}
