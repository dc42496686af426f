use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use billflow::{Document, DocumentFormat, WorkflowOutcome};

use super::emit;
use crate::AppContext;

#[derive(Serialize)]
struct OutcomeLine {
    event: &'static str,
    path: String,
    workflow_id: String,
    #[serde(flatten)]
    outcome: WorkflowOutcome,
    message: String,
}

/// Expands directories into the supported files inside them. Explicit file
/// arguments are kept even with an unknown extension so intake can report
/// why they were refused.
pub fn collect_documents(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut documents = Vec::new();

    for path in paths {
        if !path.is_dir() {
            documents.push(path.clone());
            continue;
        }

        for entry in WalkDir::new(path)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let entry_path = entry.path();
            if entry_path.is_dir() {
                continue;
            }
            let supported = entry_path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(DocumentFormat::from_extension)
                .is_some();
            if supported {
                documents.push(entry_path.to_path_buf());
            }
        }
    }

    documents
}

async fn process_one(context: Arc<Shared>, path: PathBuf) -> OutcomeLine {
    let workflow_id = uuid::Uuid::new_v4().to_string();
    let max_bytes = context.max_document_bytes;

    let read_path = path.clone();
    let document = tokio::task::spawn_blocking(move || Document::from_path(&read_path, max_bytes))
        .await;

    let outcome = match document {
        Ok(Ok(document)) => context.pipeline.process(&document, &workflow_id).await,
        Ok(Err(e)) => {
            tracing::warn!(code = e.code(), error = %e, "Document refused at intake");
            WorkflowOutcome::Failed {
                error: e.user_message(),
            }
        }
        Err(e) => WorkflowOutcome::Failed {
            error: format!("reader task failed: {}", e),
        },
    };

    OutcomeLine {
        event: "outcome",
        path: path.display().to_string(),
        workflow_id,
        message: outcome.user_message(),
        outcome,
    }
}

/// What each document task needs from the context.
struct Shared {
    pipeline: billflow::Pipeline,
    max_document_bytes: u64,
}

/// Processes every document under `paths`, at most `worker_count` at a
/// time. Returns 1 when any document failed outright.
pub async fn run(context: &AppContext, paths: &[PathBuf]) -> i32 {
    let documents = collect_documents(paths);
    if documents.is_empty() {
        tracing::warn!("No supported documents found");
        return 0;
    }

    let workers = context.config.worker_count.max(1);
    tracing::info!(documents = documents.len(), workers, "Processing documents");

    let handle = Arc::new(Shared {
        pipeline: context.pipeline.clone(),
        max_document_bytes: context.config.extraction.max_document_bytes,
    });
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    for path in documents {
        let handle = handle.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            process_one(handle, path).await
        });
    }

    let mut failed = 0usize;
    let mut total = 0usize;
    while let Some(joined) = tasks.join_next().await {
        total += 1;
        match joined {
            Ok(line) => {
                if matches!(line.outcome, WorkflowOutcome::Failed { .. }) {
                    failed += 1;
                }
                emit(&line);
            }
            Err(e) => {
                failed += 1;
                tracing::error!(error = %e, "Document task panicked");
            }
        }
    }

    tracing::info!(total, failed, "Processing finished");
    if failed > 0 {
        1
    } else {
        0
    }
}
