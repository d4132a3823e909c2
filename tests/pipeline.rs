use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use examrag::{
    DataDir,
    NO_RELEVANT_DOCUMENTS,
    RetrievalOrchestrator,
    Settings,
    SyncStrategy,
    error::Result,
    incremental::RebuildReason,
    llm::LanguageModel,
    settings::EmbedderKind,
};

#[derive(Clone, Default)]
struct CountingModel {
    calls: Arc<AtomicUsize>,
}

impl LanguageModel for CountingModel {
    fn invoke(&self, _prompt: &str) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("answer {n}"))
    }
}

fn settings(source: &Path) -> Settings {
    Settings {
        source_dir: source.to_path_buf(),
        embedder: EmbedderKind::Hashing,
        ..Settings::default()
    }
}

fn open(
    source: &Path,
    data_dir: &DataDir,
    model: &CountingModel,
) -> RetrievalOrchestrator {
    RetrievalOrchestrator::open_with_model(
        settings(source),
        data_dir,
        Box::new(model.clone()),
        false,
    )
    .unwrap()
}

#[test]
fn empty_directory_then_added_file() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("data");
    std::fs::create_dir_all(&source).unwrap();
    let data_dir = DataDir::resolve(Some(&tmp.path().join("state"))).unwrap();
    let model = CountingModel::default();

    // First run: nothing to index, and no model call for an empty context.
    {
        let mut rag = open(&source, &data_dir, &model);
        assert_eq!(
            rag.last_sync().unwrap().strategy,
            SyncStrategy::FullRebuild(RebuildReason::MissingIndex)
        );
        assert_eq!(rag.last_sync().unwrap().documents_loaded, 0);

        let answer = rag.search_and_summarize("what is a DFA", 5, 3).unwrap();
        assert_eq!(answer, NO_RELEVANT_DOCUMENTS);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    // Second run: the empty manifest forces another rebuild that picks up
    // the new file.
    std::fs::write(source.join("toc.txt"), "A DFA accepts regular languages.")
        .unwrap();
    {
        let mut rag = open(&source, &data_dir, &model);
        assert_eq!(
            rag.last_sync().unwrap().strategy,
            SyncStrategy::FullRebuild(RebuildReason::EmptyManifest)
        );
        assert_eq!(rag.stats().total_chunks, 1);

        let answer = rag.search_and_summarize("what is a DFA", 5, 3).unwrap();
        assert_eq!(answer, "answer 1");
        assert_eq!(rag.memory().len(), 1);
    }

    // Third run: one more file is appended without a rebuild.
    std::fs::write(source.join("os.md"), "Paging divides memory into frames.")
        .unwrap();
    {
        let rag = open(&source, &data_dir, &model);
        let report = rag.last_sync().unwrap();
        assert_eq!(report.strategy, SyncStrategy::Incremental);
        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(rag.stats().total_chunks, 2);

        // Memory from the previous process is still there.
        let hits = rag.memory_search("what is a DFA", 3).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.answer, "answer 1");
    }

    // Fourth run: nothing changed.
    let manifest_before = std::fs::read(data_dir.manifest()).unwrap();
    {
        let rag = open(&source, &data_dir, &model);
        assert_eq!(rag.last_sync().unwrap().strategy, SyncStrategy::NoOp);
        assert_eq!(rag.stats().total_chunks, 2);
    }
    assert_eq!(std::fs::read(data_dir.manifest()).unwrap(), manifest_before);
}

#[test]
fn removed_file_triggers_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("data");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::write(source.join("a.txt"), "alpha").unwrap();
    std::fs::write(source.join("b.txt"), "beta").unwrap();
    let data_dir = DataDir::resolve(Some(&tmp.path().join("state"))).unwrap();
    let model = CountingModel::default();

    assert_eq!(open(&source, &data_dir, &model).stats().total_chunks, 2);

    std::fs::remove_file(source.join("b.txt")).unwrap();
    let rag = open(&source, &data_dir, &model);
    assert_eq!(
        rag.last_sync().unwrap().strategy,
        SyncStrategy::FullRebuild(RebuildReason::SourcesChanged)
    );
    assert_eq!(rag.stats().total_chunks, 1);
    assert_eq!(rag.index().len(), 1);
}

#[test]
fn past_papers_are_tagged_and_counted() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("data");
    std::fs::create_dir_all(source.join("PYQ")).unwrap();
    std::fs::write(source.join("PYQ").join("2023.txt"), "Q1. Define CFG.")
        .unwrap();
    for i in 0..3 {
        std::fs::write(source.join(format!("notes{i}.txt")), "grammar notes")
            .unwrap();
    }
    let data_dir = DataDir::resolve(Some(&tmp.path().join("state"))).unwrap();

    let rag = open(&source, &data_dir, &CountingModel::default());
    let stats = rag.stats();
    assert_eq!(stats.total_chunks, 4);
    assert_eq!(stats.boosted_category_chunks, 1);
    assert!((stats.boosted_category_ratio - 0.25).abs() < 1e-6);
}
