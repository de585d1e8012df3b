mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use seqrun_core::outcome::ExitCode;
use seqrun_core::store::{MemoryTaskStore, StoreError, TaskStore};
use seqrun_core::task::{params, NewTask, TaskStatus, TaskType};
use seqrun_core::template::RunnerKind;
use tokio_util::sync::CancellationToken;

use common::{router, search, FakeExecutor, DB_EXIT_3, DB_IO_ERROR};

#[tokio::test]
async fn test_search_runs_rendered_argv() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let executor = FakeExecutor::new();
    let router = router(store.clone(), executor.clone(), RunnerKind::Local, dir.path());

    let task = store
        .create(
            search("nt")
                .with_param(params::PROGRAM, "blastp")
                .with_param(params::TAX_IDS, "4, 5,90")
                .with_param(params::EVALUE, "0.001"),
        )
        .await
        .unwrap();

    let report = router
        .run_task(&task, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, TaskStatus::Running);
    assert_eq!(report.result.exit_code, 0);
    assert_eq!(report.result.reason, "ok\n");

    let stored = store.find_by_id(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Running);

    let calls = executor.calls();
    assert_eq!(calls.len(), 1);
    let argv = &calls[0];
    let root = dir.path().display().to_string();
    assert_eq!(argv[0], "blastp");
    let pos = |flag: &str| argv.iter().position(|a| a == flag).unwrap();
    assert_eq!(argv[pos("-db") + 1], format!("{root}/db/nt"));
    assert_eq!(argv[pos("-query") + 1], format!("{root}/staging/q.fasta"));
    assert_eq!(argv[pos("-out") + 1], format!("{root}/results/{}.out", task.id));
    assert_eq!(argv[pos("-taxids") + 1], "4,5,90");
    assert_eq!(argv[pos("-evalue") + 1], "0.001");
    assert!(argv[pos("-outfmt") + 1].starts_with("6 qaccver saccver pident"));
    assert!(!argv.iter().any(|a| a == "-negative_taxids"));
}

#[tokio::test]
async fn test_staged_query_removed_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let router = router(store.clone(), FakeExecutor::new(), RunnerKind::Local, dir.path());
    let staged = dir.path().join("staging").join("q.fasta");
    std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
    std::fs::write(&staged, ">q\nACGT\n").unwrap();

    let task = store.create(search("nt")).await.unwrap();
    router
        .run_task(&task, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!staged.exists());
}

#[tokio::test]
async fn test_nonzero_exit_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let router = router(store.clone(), FakeExecutor::new(), RunnerKind::Local, dir.path());

    let task = store.create(search(DB_EXIT_3)).await.unwrap();
    let report = router
        .run_task(&task, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.result.exit_code, 3);
    assert_eq!(report.result.terminal_status(), TaskStatus::Failed);
}

#[tokio::test]
async fn test_spawn_failure_is_io_exception() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let router = router(store.clone(), FakeExecutor::new(), RunnerKind::Local, dir.path());

    let task = store.create(search(DB_IO_ERROR)).await.unwrap();
    let report = router
        .run_task(&task, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.result.exit_code, ExitCode::IoException.code());
    assert!(report.result.reason.starts_with("IO_EXCEPTION"));
}

#[tokio::test]
async fn test_missing_field_fails_before_spawn() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let executor = FakeExecutor::new();
    let router = router(store.clone(), executor.clone(), RunnerKind::Local, dir.path());

    let task = store
        .create(NewTask::new(TaskType::DbInfo))
        .await
        .unwrap();
    let report = router
        .run_task(&task, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.result.exit_code, ExitCode::OtherException.code());
    assert!(report.result.reason.contains("database"));
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_untyped_task_claimed_but_never_spawned() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let executor = FakeExecutor::new();
    let router = router(store.clone(), executor.clone(), RunnerKind::Local, dir.path());

    let untyped = store.create(NewTask::default()).await.unwrap();
    let report = router
        .run_task(&untyped, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.result.exit_code, ExitCode::NullCommandType.code());
    assert_eq!(report.status, TaskStatus::Running);

    let unknown = store
        .create(NewTask {
            task_type: Some("psiblast".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let report = router
        .run_task(&unknown, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.result.exit_code, ExitCode::UnrecognizedCommandType.code());
    assert_eq!(report.result.reason, "UNRECOGNIZED_COMMAND_TYPE: 'psiblast'");
    assert_eq!(report.status, TaskStatus::Running);

    assert_eq!(executor.call_count(), 0);
    assert!(store.find_by_status(TaskStatus::Created).await.unwrap().is_empty());
    let running = store.find_by_status(TaskStatus::Running).await.unwrap();
    assert_eq!(running.len(), 2);
}

#[tokio::test]
async fn test_claim_lost_to_another_worker() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let executor = FakeExecutor::new();
    let router = router(store.clone(), executor.clone(), RunnerKind::Local, dir.path());

    let task = store.create(search("nt")).await.unwrap();
    store
        .transition(task.id, TaskStatus::Created, TaskStatus::Running)
        .await
        .unwrap();

    let result = router.run_task(&task, &CancellationToken::new()).await;
    assert_matches!(result, Err(StoreError::StaleStatus { .. }));
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_makedb_uses_fallback_version() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let executor = FakeExecutor::new();
    let router = router(store.clone(), executor.clone(), RunnerKind::Docker, dir.path());

    let task = store
        .create(
            NewTask::new(TaskType::MakeDb)
                .with_param(params::INPUT_FILE, "genomes.fa")
                .with_param(params::DATABASE, "genomes")
                .with_param(params::DB_VERSION, "879"),
        )
        .await
        .unwrap();
    router
        .run_task(&task, &CancellationToken::new())
        .await
        .unwrap();

    let argv = &executor.calls()[0];
    assert_eq!(&argv[..2], ["docker", "run"]);
    let pos = argv.iter().position(|a| a == "-blastdb_version").unwrap();
    assert_eq!(argv[pos + 1], "5");
    assert!(argv.contains(&format!("seqrun-task-{}", task.id)));
}

#[tokio::test]
async fn test_cancel_is_noop_for_local_runner() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let executor = FakeExecutor::new();
    let router = router(store, executor.clone(), RunnerKind::Local, dir.path());

    let result = router.cancel_task(12).await;
    assert!(result.is_success());
    assert_eq!(executor.call_count(), 0);
}

#[tokio::test]
async fn test_cancel_kills_docker_container() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryTaskStore::new());
    let executor = FakeExecutor::new();
    let router = router(store, executor.clone(), RunnerKind::Docker, dir.path());

    let result = router.cancel_task(12).await;
    assert!(result.is_success());
    assert_eq!(
        executor.calls(),
        vec![vec![
            "docker".to_string(),
            "kill".to_string(),
            "seqrun-task-12".to_string()
        ]]
    );
}
