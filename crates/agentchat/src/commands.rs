//! CLI commands implementation

use anyhow::{Context, Result};
use llm_core::{config_list_from_json, OpenAiClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::{AgentConfig, StopReason};
use crate::chat::{ChatOptions, ChatResult};
use crate::code_exec::CodeExecutionConfig;
use crate::config::{AppConfig, TaskConfig};
use crate::human::HumanInputMode;
use crate::retrieve::{
    default_embedding_function, RetrieveAssistantAgent, RetrieveConfig, RetrieveUserProxyAgent, Retriever,
};
use crate::session::Session;
use crate::transcript::Transcript;

// ANSI color codes
const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const BLUE: &str = "\x1b[94m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Command-line values that take precedence over `[session]`
#[derive(Debug, Default)]
pub struct RunOverrides {
    pub tasks: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub max_auto_reply: Option<usize>,
    pub human_input_mode: Option<HumanInputMode>,
    pub use_docker: bool,
}

/// Command-line values that take precedence over `[retrieve]`
#[derive(Debug, Default)]
pub struct RetrieveOverrides {
    pub docs_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub collection: Option<String>,
    pub chunk_token_size: Option<usize>,
}

impl RetrieveOverrides {
    fn apply(self, config: &mut RetrieveConfig) {
        if let Some(path) = self.docs_path {
            config.docs_path = Some(path);
        }
        if let Some(path) = self.db_path {
            config.db_path = path;
        }
        if let Some(name) = self.collection {
            config.collection_name = name;
        }
        if let Some(size) = self.chunk_token_size {
            config.chunk_token_size = size;
        }
    }
}

/// Where to read the endpoint list from, if not from `[llm]`
#[derive(Debug, Default)]
pub struct EndpointSource {
    pub config_list: Option<String>,
    pub config_dir: PathBuf,
    pub filter_models: Vec<String>,
}

fn print_status(ok: bool, msg: &str) {
    let icon = if ok {
        format!("{}✓{}", GREEN, RESET)
    } else {
        format!("{}✗{}", RED, RESET)
    };
    println!("  {} {}", icon, msg);
}

fn print_summary(index: usize, result: &ChatResult) {
    let ok = result.reason == StopReason::Terminated;
    print_status(
        ok,
        &format!(
            "Task {} ({} -> {}): {} after {} replies",
            index + 1,
            result.sender,
            result.recipient,
            result.reason,
            result.replies
        ),
    );
}

/// Run the configured session
pub async fn run(
    config_path: Option<&Path>,
    overrides: RunOverrides,
    transcript: Option<Option<PathBuf>>,
    silent: bool,
) -> Result<()> {
    let mut config = AppConfig::load(config_path)?;

    if let Some(dir) = overrides.work_dir {
        config.session.work_dir = dir;
    }
    if let Some(max) = overrides.max_auto_reply {
        config.session.max_consecutive_auto_reply = max;
    }
    if let Some(mode) = overrides.human_input_mode {
        config.session.human_input_mode = mode;
    }
    if overrides.use_docker {
        config.session.use_docker = true;
    }
    if !overrides.tasks.is_empty() {
        config.session.tasks = overrides.tasks.into_iter().map(TaskConfig::new).collect();
    }

    let model = config.llm.primary_model().to_string();
    let mut session = Session::from_config(config.llm, &config.session)?.with_options(ChatOptions {
        silent,
        ..Default::default()
    });

    let results = session.run().await?;

    println!("\n{}Session{}", BOLD, RESET);
    for (i, result) in results.iter().enumerate() {
        print_summary(i, result);
    }

    if let Some(path) = transcript {
        let mut record = Transcript::new(model);
        for result in results {
            record.add_chat(result);
        }
        let path = path.unwrap_or_else(|| record.default_path());
        record.save(&path)?;
        println!("\nTranscript saved to {}{}{}", BLUE, path.display(), RESET);
    }

    Ok(())
}

/// Answer `problem` with a retrieval chat
#[allow(clippy::too_many_arguments)]
pub async fn retrieve(
    config_path: Option<&Path>,
    problem: &str,
    search_string: Option<&str>,
    overrides: RetrieveOverrides,
    endpoints: EndpointSource,
    max_auto_reply: usize,
    code_execution: CodeExecutionConfig,
    silent: bool,
) -> Result<()> {
    let config = AppConfig::load(config_path)?;

    let mut llm = config.llm;
    if let Some(name) = &endpoints.config_list {
        let filter: Vec<&str> = endpoints.filter_models.iter().map(String::as_str).collect();
        llm.config_list = config_list_from_json(name, &endpoints.config_dir, &filter)?;
        if llm.config_list.is_empty() {
            anyhow::bail!("No endpoints left in {} after filtering", name);
        }
    }

    let mut retrieve = config.retrieve;
    overrides.apply(&mut retrieve);
    retrieve.model = llm.primary_model().to_string();
    let collection = retrieve.collection_name.clone();

    let llm = Arc::new(llm);
    let client = Arc::new(OpenAiClient::new(llm)?);
    let mut assistant = RetrieveAssistantAgent::new(RetrieveAssistantAgent::default_config("assistant"), client);

    let mut ragproxy = RetrieveUserProxyAgent::new(
        AgentConfig::new("ragproxyagent")
            .with_human_input_mode(HumanInputMode::Never)
            .with_max_consecutive_auto_reply(max_auto_reply)
            .with_code_execution(Some(code_execution)),
        retrieve,
        default_embedding_function(),
    );

    let chunks = ragproxy
        .index()
        .with_context(|| format!("Failed to load collection `{}`", collection))?;
    if !silent {
        print_status(true, &format!("Collection `{}` has {} chunks", collection, chunks));
    }

    let result = ragproxy
        .initiate_chat(
            &mut assistant,
            problem,
            search_string,
            &ChatOptions {
                silent,
                ..Default::default()
            },
        )
        .await?;

    println!("\n{}Retrieval chat{}", BOLD, RESET);
    print_summary(0, &result);
    if silent {
        if let Some(last) = result.last_message() {
            println!("\n{}", last.text());
        }
    }

    Ok(())
}

/// Build or refresh a collection without chatting
pub fn index(config_path: Option<&Path>, overrides: RetrieveOverrides) -> Result<()> {
    let config = AppConfig::load(config_path)?;

    let mut retrieve = config.retrieve;
    overrides.apply(&mut retrieve);
    retrieve.get_or_create = true;
    retrieve.model = config.llm.primary_model().to_string();

    let collection = retrieve.collection_name.clone();
    let db_path = retrieve.db_path.clone();

    let mut retriever = Retriever::new(retrieve, default_embedding_function());
    let chunks = retriever
        .index()
        .with_context(|| format!("Failed to index collection `{}`", collection))?;

    print_status(
        true,
        &format!("Collection `{}` has {} chunks ({})", collection, chunks, db_path.display()),
    );
    Ok(())
}

/// Write a commented default config
pub fn init(dir: &Path) -> Result<()> {
    let path = AppConfig::create_default(dir)?;
    print_status(true, &format!("Created {}", path.display()));
    println!("\n  Edit it, then run: {}agentchat run{}", BLUE, RESET);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_retrieve_overrides() {
        let mut config = RetrieveConfig::default();
        RetrieveOverrides {
            docs_path: Some(PathBuf::from("docs")),
            db_path: None,
            collection: Some("flaml".to_string()),
            chunk_token_size: Some(500),
        }
        .apply(&mut config);

        assert_eq!(config.docs_path, Some(PathBuf::from("docs")));
        assert_eq!(config.db_path, PathBuf::from("/tmp/chromadb"));
        assert_eq!(config.collection_name, "flaml");
        assert_eq!(config.chunk_token_size, 500);
    }

    #[test]
    fn test_index_and_init() {
        let dir = TempDir::new().unwrap();
        let docs = dir.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("guide.md"), "# Guide\nuse_spark=True").unwrap();

        init(dir.path()).unwrap();
        let config_path = dir.path().join(crate::config::CONFIG_FILE);

        index(
            Some(&config_path),
            RetrieveOverrides {
                docs_path: Some(docs),
                db_path: Some(dir.path().join("db")),
                collection: Some("guide".to_string()),
                chunk_token_size: None,
            },
        )
        .unwrap();
        assert!(dir.path().join("db").join("guide.bin").exists());
    }
}
