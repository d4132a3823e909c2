use clap::Parser;
use examrag::{
    DataDir,
    RetrievalOrchestrator,
    Settings,
    error,
    incremental::SyncStrategy,
    mcp,
    search::Answer,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{AskArgs, Cli, Command, MemoryAction};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("EXAMRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let mut settings = Settings::load(&data_dir.settings())?;
    if let Some(source_dir) = &cli.source_dir {
        settings.source_dir = source_dir.clone();
    }
    if let Some(model) = &cli.model {
        settings.model_id = model.clone();
    }

    match cli.command {
        Command::Sync(args) => {
            let rag =
                RetrievalOrchestrator::open(settings, &data_dir, args.rebuild)?;
            cmd_sync(&rag);
        }
        Command::Ask(args) => {
            let mut rag =
                RetrievalOrchestrator::open(settings, &data_dir, args.rebuild)?;
            cmd_ask(&mut rag, &args)?;
        }
        Command::Memory { action } => {
            let rag = RetrievalOrchestrator::open_read_only(settings, &data_dir)?;
            match action {
                MemoryAction::Search { query, count, json } => {
                    memory_search(&rag, &query, count, json)?;
                }
                MemoryAction::List { json } => {
                    memory_list(&rag, json)?;
                }
            }
        }
        Command::Status(args) => {
            let rag = RetrievalOrchestrator::open_read_only(settings, &data_dir)?;
            cmd_status(&rag, args.json)?;
        }
        Command::Mcp => {
            let rag = RetrievalOrchestrator::open(settings, &data_dir, false)?;
            mcp::run_mcp(rag)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_sync(rag: &RetrievalOrchestrator) {
    let Some(report) = rag.last_sync() else {
        return;
    };
    match report.strategy {
        SyncStrategy::FullRebuild(reason) => eprintln!(
            "Rebuilt index ({reason}): {} documents, {} chunks",
            report.documents_loaded, report.chunks_indexed
        ),
        SyncStrategy::Incremental if report.manifest_saved => eprintln!(
            "Added {} documents ({} chunks)",
            report.documents_loaded, report.chunks_indexed
        ),
        SyncStrategy::Incremental => {
            eprintln!("New files produced no content; they will be retried")
        }
        SyncStrategy::NoOp => eprintln!("Index is up to date."),
    }
    eprintln!("Indexed chunks: {}", rag.stats().total_chunks);
}

fn cmd_ask(
    rag: &mut RetrievalOrchestrator,
    args: &AskArgs,
) -> error::Result<()> {
    let top_k = args.top_k.unwrap_or(rag.settings().top_k);
    let memory_top_k = args.memory_k.unwrap_or(rag.settings().memory_top_k);
    let answer = rag.ask(&args.query, top_k, memory_top_k)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    if !answer.model_invoked || answer.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for source in &answer.sources {
        let page = source
            .metadata
            .page
            .map(|p| format!(", page {p}"))
            .unwrap_or_default();
        println!("  {}{page}", source.metadata.source);
    }
}

fn memory_search(
    rag: &RetrievalOrchestrator,
    query: &str,
    count: usize,
    json: bool,
) -> error::Result<()> {
    let results = rag.memory_search(query, count)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        eprintln!("No earlier turns found.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{:>3}. [{}] (distance: {:.3})",
            i + 1,
            r.metadata.timestamp_utc,
            r.distance
        );
        println!("     Q: {}", r.metadata.question);
        println!("     A: {}", first_line(&r.metadata.answer));
    }
    Ok(())
}

fn memory_list(rag: &RetrievalOrchestrator, json: bool) -> error::Result<()> {
    let entries = rag.memory().entries();

    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        eprintln!("No turns recorded.");
        return Ok(());
    }
    for entry in entries {
        println!("[{}] {}", entry.timestamp_utc, entry.question);
    }
    Ok(())
}

fn cmd_status(rag: &RetrievalOrchestrator, json: bool) -> error::Result<()> {
    let status = rag.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Data directory: {}", status.data_dir.display());
        println!("Source directory: {}", status.source_dir.display());
        println!("Embedder: {:?}", status.embedder);
        println!("Language model: {}", status.llm_model);
        println!("Chunks: {}", status.stats.total_chunks);
        println!(
            "Past-paper chunks: {} ({:.1}%)",
            status.stats.boosted_category_chunks,
            status.stats.boosted_category_ratio * 100.0
        );
        println!("Remembered turns: {}", status.memory_entries);
        if status.index_stale {
            println!(
                "Index was built with other settings; run `examrag sync`."
            );
        }
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

