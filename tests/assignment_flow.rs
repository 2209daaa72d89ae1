use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use git2::{Repository, Signature};
use mergeplan::cache::{CacheManager, GlobalIndex};
use mergeplan::config::AnalysisConfig;
use mergeplan::history::{GitCliHistory, HistoryProvider};
use mergeplan::orchestrator::run_batch;
use mergeplan::types::WorkUnit;
use mergeplan::ReasonCode;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn commit_files(repo: &Repository, author: &str, files: &[(&str, &str)], message: &str) {
    let root = repo.workdir().unwrap().to_path_buf();
    for (file_name, content) in files {
        let file_path = root.join(file_name);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&file_path, content).unwrap();
    }

    let signature =
        Signature::now(author, &format!("{}@example.com", author.to_lowercase())).unwrap();
    let mut index = repo.index().unwrap();
    for (file_name, _) in files {
        index.add_path(Path::new(file_name)).unwrap();
    }
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();

    let parent = repo
        .head()
        .ok()
        .and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    let tree = repo.find_tree(tree_id).unwrap();
    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap();
}

fn setup_test_repo() -> (TempDir, Repository) {
    let _ = env_logger::builder().is_test(true).try_init();
    let temp_dir = TempDir::new().unwrap();
    let repo = Repository::init(temp_dir.path()).unwrap();

    commit_files(
        &repo,
        "Alice",
        &[("src/parser.rs", "fn parse() {}\nfn lex() {}\n")],
        "Add parser",
    );
    commit_files(
        &repo,
        "Alice",
        &[(
            "src/parser.rs",
            "fn parse() {}\nfn lex() {}\nfn peek() {}\n",
        )],
        "Extend parser",
    );
    commit_files(
        &repo,
        "Bob",
        &[("src/render.rs", "fn render() {}\n")],
        "Add renderer",
    );
    commit_files(
        &repo,
        "Bob",
        &[("docs/guide.md", "# Guide\n")],
        "Start docs",
    );

    (temp_dir, repo)
}

#[test]
fn provider_reads_contributors_from_a_real_repository() -> anyhow::Result<()> {
    let (temp_dir, _repo) = setup_test_repo();
    let provider = GitCliHistory::open(temp_dir.path())?;

    let contributors = provider.all_contributors("src/parser.rs")?;
    assert_eq!(contributors.len(), 1);
    assert_eq!(contributors["Alice"].commits, 2);

    let active = provider.active_contributors(3)?;
    assert!(active.contains("Alice"));
    assert!(active.contains("Bob"));

    let fingerprint = provider.last_commit_touching("src/parser.rs")?;
    assert!(fingerprint.is_some());
    let missing = provider.last_commit_touching("no/such/file.rs")?;
    assert!(missing.is_none());
    Ok(())
}

#[test]
fn opening_a_non_repository_fails() {
    let temp_dir = TempDir::new().unwrap();
    assert!(GitCliHistory::open(temp_dir.path()).is_err());
}

#[test]
fn global_index_covers_the_whole_repository() {
    let (temp_dir, _repo) = setup_test_repo();
    let provider = GitCliHistory::open(temp_dir.path()).unwrap();
    let config = AnalysisConfig::default();

    let index = GlobalIndex::build(&provider, &config).unwrap();
    assert_eq!(index.file_count(), 3);
    assert!(index.contains("src/parser.rs"));
    assert_eq!(index.author_activity()["Alice"], 2);
    assert_eq!(index.author_activity()["Bob"], 2);
}

#[tokio::test]
async fn full_batch_flow_assigns_and_persists() {
    let (temp_dir, _repo) = setup_test_repo();
    let cache_dir = TempDir::new().unwrap();
    let store_path = cache_dir.path().join("contributors.json");

    let config = Arc::new(AnalysisConfig {
        parallel_workers: Some(2),
        ..AnalysisConfig::default()
    });
    let provider = Arc::new(GitCliHistory::open(temp_dir.path()).unwrap());
    let cache = Arc::new(CacheManager::open(&config, &store_path));
    let index = Arc::new(GlobalIndex::build(provider.as_ref(), &config).unwrap());

    let units = vec![
        WorkUnit::single("src/parser.rs"),
        WorkUnit::single("src/render.rs"),
        // Never committed: resolved through directory inference.
        WorkUnit::single("src/brand_new.rs"),
    ];

    let result = run_batch(
        provider,
        cache.clone(),
        Some(index),
        units,
        config,
        HashSet::new(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.report.total_units, 3);
    assert_eq!(result.report.assigned_units, 3);
    assert!(result.report.failed_units.is_empty());

    let by_unit = |id: &str| result.decisions.iter().find(|d| d.unit_id == id).unwrap();
    assert_eq!(by_unit("src/parser.rs").primary.as_deref(), Some("Alice"));
    assert_eq!(by_unit("src/parser.rs").reason, ReasonCode::Direct);
    assert_eq!(by_unit("src/render.rs").primary.as_deref(), Some("Bob"));
    assert!(by_unit("src/brand_new.rs").reason.is_fallback());

    cache.flush();
    assert!(store_path.exists());

    // A fresh session reuses the persisted rankings.
    let config = Arc::new(AnalysisConfig {
        parallel_workers: Some(2),
        ..AnalysisConfig::default()
    });
    let provider = Arc::new(GitCliHistory::open(temp_dir.path()).unwrap());
    let reopened = Arc::new(CacheManager::open(&config, &store_path));
    let rerun = run_batch(
        provider,
        reopened,
        None,
        vec![WorkUnit::single("src/parser.rs")],
        config,
        HashSet::new(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert!(rerun.report.cache.hits >= 1);
    assert_eq!(rerun.decisions[0].primary.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn excluded_contributor_is_never_assigned() {
    let (temp_dir, _repo) = setup_test_repo();
    let config = Arc::new(AnalysisConfig::default());
    let provider = Arc::new(GitCliHistory::open(temp_dir.path()).unwrap());
    let cache = Arc::new(CacheManager::in_memory(&config));

    let excluded: HashSet<String> = ["Alice".to_string()].into();
    let result = run_batch(
        provider,
        cache,
        None,
        vec![WorkUnit::single("src/parser.rs")],
        config,
        excluded,
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.decisions[0].primary, None);
    assert_eq!(result.decisions[0].reason, ReasonCode::ExcludedManual);
}
