use std::path::{Path, PathBuf};

use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_fixture(root: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let source = root.join("papers");
    std::fs::create_dir_all(source.join("pyq"))?;
    std::fs::write(
        source.join("pyq").join("2022-toc.txt"),
        "Q1. Construct a DFA for strings ending in 01. (5 marks)\n",
    )?;
    std::fs::write(
        source.join("notes.md"),
        "# Pumping lemma\nUsed to prove a language is not regular.\n",
    )?;
    Ok(source)
}

#[tokio::test]
async fn mcp_stdio_status_and_memory_roundtrip()
-> Result<(), Box<dyn std::error::Error>> {
    let tempdir = tempfile::tempdir()?;
    let source = setup_fixture(tempdir.path())?;
    let data_dir = tempdir.path().join("state");

    let bin = examrag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .arg("-q")
                .env("EXAMRAG_DATA_DIR", &data_dir)
                .env("EXAMRAG_SOURCE_DIR", &source)
                .env("EXAMRAG_EMBEDDER", "hashing")
                .env("GROQ_API_KEY", "test-key");
        }),
    )?;

    let client = ().serve(transport).await?;

    let status = client
        .peer()
        .call_tool(CallToolRequestParams::new("examrag_status"))
        .await?;
    let structured = status.structured_content.expect("structured content");
    assert_eq!(
        structured["stats"]["total_chunks"].as_u64(),
        Some(2),
        "{structured}"
    );
    assert_eq!(structured["stats"]["boosted_category_chunks"].as_u64(), Some(1));
    assert_eq!(structured["memory_entries"].as_u64(), Some(0));
    assert_eq!(
        structured["last_sync"]["strategy"]["kind"].as_str(),
        Some("full_rebuild")
    );

    let args = json!({ "query": "DFA", "limit": 3 });
    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("examrag_memory_search")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;
    let structured = result.structured_content.expect("structured content");
    assert_eq!(structured["resultCount"].as_u64(), Some(0));

    client.cancel().await?;
    Ok(())
}

fn examrag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_examrag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("examrag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
