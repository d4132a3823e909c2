use std::sync::{Arc, Mutex};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error,
    knowledge::RetrievalResult,
    memory::MemoryEntry,
    search::RetrievalOrchestrator,
};

const DEFAULT_MEMORY_LIMIT: usize = 5;

#[derive(Clone)]
pub struct ExamragMcpServer {
    orchestrator: Arc<Mutex<RetrievalOrchestrator>>,
    tool_router: ToolRouter<Self>,
}

impl ExamragMcpServer {
    pub fn new(orchestrator: RetrievalOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            tool_router: Self::tool_router(),
        }
    }

    /// Run `f` against the orchestrator on the blocking pool. Embedding and
    /// the language model call are synchronous.
    async fn with_orchestrator<T, F>(&self, f: F) -> Result<T, rmcp::ErrorData>
    where
        T: Send + 'static,
        F: FnOnce(&mut RetrievalOrchestrator) -> error::Result<T>
            + Send
            + 'static,
    {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::task::spawn_blocking(move || {
            let mut guard = orchestrator.lock().map_err(|_| {
                rmcp::ErrorData::internal_error(
                    "orchestrator lock poisoned",
                    None,
                )
            })?;
            f(&mut *guard).map_err(|e| mcp_error("request failed", e))
        })
        .await
        .map_err(|e| mcp_error("worker task failed", e))?
    }
}

#[tool_router(router = tool_router)]
impl ExamragMcpServer {
    /// Answer a question from the indexed documents.
    #[tool(
        name = "examrag_ask",
        description = "Answer a question using the indexed exam papers and notes, with citations. Queries mentioning questions, marks, MCQs or previous-year papers favor past papers."
    )]
    pub async fn examrag_ask(
        &self,
        params: Parameters<AskParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let answer = self
            .with_orchestrator(move |o| {
                let top_k = params.top_k.unwrap_or(o.settings().top_k);
                let memory_top_k =
                    params.memory_top_k.unwrap_or(o.settings().memory_top_k);
                o.ask(&params.query, top_k, memory_top_k)
            })
            .await?;

        let structured = serde_json::to_value(&answer)
            .map_err(|e| mcp_error("failed to serialize answer", e))?;

        let mut result =
            CallToolResult::success(vec![Content::text(answer.answer)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Search past question/answer turns.
    #[tool(
        name = "examrag_memory_search",
        description = "Find earlier questions and answers similar to a query."
    )]
    pub async fn examrag_memory_search(
        &self,
        params: Parameters<MemorySearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();
        let limit = params.limit.unwrap_or(DEFAULT_MEMORY_LIMIT);
        let results = self
            .with_orchestrator(move |o| o.memory_search(&params.query, limit))
            .await?;

        let summary = format_memory_summary(&results, &query);
        let structured = serde_json::to_value(MemorySearchResponse {
            query,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize memory results", e))?;

        let mut result =
            CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Report index and memory statistics.
    #[tool(
        name = "examrag_status",
        description = "Show how many chunks are indexed, the share from past papers, and the number of remembered turns."
    )]
    pub async fn examrag_status(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let status = self.with_orchestrator(|o| Ok(o.status())).await?;
        let summary = format!(
            "{} chunks indexed ({} from past papers, ratio {:.2}); {} remembered turns",
            status.stats.total_chunks,
            status.stats.boosted_category_chunks,
            status.stats.boosted_category_ratio,
            status.memory_entries
        );
        let structured = serde_json::to_value(&status)
            .map_err(|e| mcp_error("failed to serialize status", e))?;

        let mut result =
            CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ExamragMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("examrag", env!("CARGO_PKG_VERSION"))
                    .with_title("examrag MCP"),
            )
            .with_instructions(
                "Use examrag_ask to answer questions from the user's exam archive. Use examrag_memory_search to recall earlier answers.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskParams {
    /// The question to answer.
    pub query: String,
    /// Number of document chunks used as context.
    pub top_k: Option<usize>,
    /// Number of past turns used as context.
    pub memory_top_k: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemorySearchParams {
    /// Text to compare against past turns.
    pub query: String,
    /// Maximum number of results (default: 5).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemorySearchResponse {
    query: String,
    result_count: usize,
    results: Vec<RetrievalResult<MemoryEntry>>,
}

fn format_memory_summary(
    results: &[RetrievalResult<MemoryEntry>],
    query: &str,
) -> String {
    if results.is_empty() {
        return format!("No earlier turns match \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} earlier turn{} for \"{query}\":",
        results.len(),
        suffix
    ));
    for r in results {
        lines.push(format!(
            "{} {:.3} {}",
            r.metadata.timestamp_utc, r.distance, r.metadata.question
        ));
    }
    lines.join("\n")
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(orchestrator: RetrievalOrchestrator) -> error::Result<()> {
    let server = ExamragMcpServer::new(orchestrator);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::{
        data_dir::DataDir,
        llm::LanguageModel,
        search::NO_RELEVANT_DOCUMENTS,
        settings::{EmbedderKind, Settings},
    };

    struct CannedModel;

    impl LanguageModel for CannedModel {
        fn invoke(&self, _prompt: &str) -> error::Result<String> {
            Ok("1. Define a DFA. (toc.txt, NA)".to_string())
        }
    }

    fn server(root: &Path, files: &[(&str, &str)]) -> ExamragMcpServer {
        let source = root.join("data");
        std::fs::create_dir_all(&source).unwrap();
        for (name, content) in files {
            std::fs::write(source.join(name), content).unwrap();
        }
        let settings = Settings {
            source_dir: source,
            embedder: EmbedderKind::Hashing,
            ..Settings::default()
        };
        let data_dir = DataDir::resolve(Some(&root.join("state"))).unwrap();
        let orchestrator = RetrievalOrchestrator::open_with_model(
            settings,
            &data_dir,
            Box::new(CannedModel),
            false,
        )
        .unwrap();
        ExamragMcpServer::new(orchestrator)
    }

    fn text(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn ask_then_memory_search() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path(), &[("toc.txt", "A DFA is a finite automaton.")]);

        let result = server
            .examrag_ask(Parameters(AskParams {
                query: "give me a question on DFA".to_string(),
                top_k: Some(3),
                memory_top_k: None,
            }))
            .await
            .unwrap();
        assert!(text(&result).contains("Define a DFA"));
        let structured = result.structured_content.expect("structured");
        assert_eq!(structured["model_invoked"], true);
        assert_eq!(structured["sources"][0]["metadata"]["source"], "toc.txt");

        let result = server
            .examrag_memory_search(Parameters(MemorySearchParams {
                query: "DFA".to_string(),
                limit: Some(2),
            }))
            .await
            .unwrap();
        assert!(text(&result).contains("Found 1 earlier turn"));
        let structured = result.structured_content.expect("structured");
        assert_eq!(structured["resultCount"], 1);
        assert_eq!(
            structured["results"][0]["metadata"]["question"],
            "give me a question on DFA"
        );
    }

    #[tokio::test]
    async fn ask_on_empty_corpus() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path(), &[]);

        let result = server
            .examrag_ask(Parameters(AskParams {
                query: "anything".to_string(),
                top_k: None,
                memory_top_k: None,
            }))
            .await
            .unwrap();
        assert_eq!(text(&result), NO_RELEVANT_DOCUMENTS);
    }

    #[tokio::test]
    async fn status_reports_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server(tmp.path(), &[("a.txt", "alpha"), ("b.txt", "beta")]);

        let result = server.examrag_status().await.unwrap();
        assert!(text(&result).starts_with("2 chunks indexed"));
        let structured = result.structured_content.expect("structured");
        assert_eq!(structured["stats"]["total_chunks"], 2);
        assert_eq!(structured["memory_entries"], 0);
    }
}
