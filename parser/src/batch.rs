//! Concurrent parsing of many files through one shared registry.
//!
//! Each file is parsed on tokio's blocking pool since parsing is CPU-bound. A deadline
//! only stops waiting for a file: the worker thread runs to completion and its result is
//! discarded.

use crate::{Fragment, ParserRegistry};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Parsed,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub fragments: Vec<Fragment>,
    pub status: BatchStatus,
}

impl FileOutcome {
    fn empty(path: PathBuf, status: BatchStatus) -> Self {
        Self {
            path,
            fragments: Vec::new(),
            status,
        }
    }
}

/// Parses every path concurrently, returning one outcome per path in input order.
pub async fn parse_files(
    registry: Arc<ParserRegistry>,
    paths: Vec<PathBuf>,
    deadline: Option<Duration>,
) -> Vec<FileOutcome> {
    info!("Parsing {} files", paths.len());

    let tasks: Vec<(PathBuf, JoinHandle<FileOutcome>)> = paths
        .into_iter()
        .map(|path| {
            let task = tokio::spawn(parse_one(Arc::clone(&registry), path.clone(), deadline));
            (path, task)
        })
        .collect();

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (path, task) in tasks {
        let outcome = task.await.unwrap_or_else(|e| {
            error!("Batch task for {} failed: {}", path.display(), e);
            FileOutcome::empty(path, BatchStatus::Failed)
        });
        outcomes.push(outcome);
    }

    let parsed = outcomes
        .iter()
        .filter(|o| o.status == BatchStatus::Parsed)
        .count();
    info!("Batch complete: {}/{} files parsed", parsed, outcomes.len());
    outcomes
}

async fn parse_one(
    registry: Arc<ParserRegistry>,
    path: PathBuf,
    deadline: Option<Duration>,
) -> FileOutcome {
    let worker = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || registry.parse(&path))
    };

    let joined = match deadline {
        Some(limit) => match tokio::time::timeout(limit, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Parsing {} timed out after {:?}", path.display(), limit);
                return FileOutcome::empty(path, BatchStatus::TimedOut);
            }
        },
        None => worker.await,
    };

    match joined {
        Ok(fragments) => FileOutcome {
            path,
            fragments,
            status: BatchStatus::Parsed,
        },
        Err(e) => {
            error!("Parser worker for {} failed: {}", path.display(), e);
            FileOutcome::empty(path, BatchStatus::Failed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParserConfig;

    const ANR_TRACE: &str = r#"----- pid 77 at 2024-03-05 08:15:00 -----
Cmd line: com.example.music
Build fingerprint: 'google/sdk/generic:13/TQ3A/1:userdebug/dev-keys'

DALVIK THREADS (2):
"main" prio=5 tid=1 Blocked
  | state=S schedstat=( 0 0 0 ) utm=10 stm=5 core=0 HZ=100
  at com.example.music.Player.play(Player.java:42)
  - waiting to lock <0x0a1b2c3d> (a java.lang.Object) held by thread 2

"Signal Catcher" daemon prio=10 tid=2 Runnable
  | state=R schedstat=( 0 0 0 ) utm=0 stm=0 core=1 HZ=100
"#;

    const APP_LOG: &str = "2024-03-05 08:15:00 INFO service started\n\
2024-03-05 08:15:01 WARN cache cold\n\
2024-03-05 08:15:02 INFO request served\n";

    fn registry() -> Arc<ParserRegistry> {
        Arc::new(ParserRegistry::new(ParserConfig::default()).unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_parses_keep_metadata_apart() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for i in 0..12 {
            let (name, content) = if i % 2 == 0 {
                (format!("traces_{i}.txt"), ANR_TRACE)
            } else {
                (format!("app_{i}.log"), APP_LOG)
            };
            let path = dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            paths.push(path);
        }

        let outcomes = parse_files(registry(), paths.clone(), None).await;

        assert_eq!(outcomes.len(), paths.len());
        for (i, (outcome, path)) in outcomes.iter().zip(&paths).enumerate() {
            assert_eq!(&outcome.path, path);
            assert_eq!(outcome.status, BatchStatus::Parsed);
            assert!(!outcome.fragments.is_empty());

            let expected = if i % 2 == 0 { "android_anr" } else { "general" };
            let source = path.display().to_string();
            for fragment in &outcome.fragments {
                assert_eq!(fragment.get_str("log_type"), Some(expected));
                assert_eq!(fragment.get_str("source"), Some(source.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn test_deadline_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("app.log");
        std::fs::write(&present, APP_LOG).unwrap();
        let missing = dir.path().join("gone.log");

        let outcomes = parse_files(
            registry(),
            vec![present, missing],
            Some(Duration::from_secs(30)),
        )
        .await;

        assert_eq!(outcomes[0].status, BatchStatus::Parsed);
        assert!(!outcomes[0].fragments.is_empty());
        assert_eq!(outcomes[1].status, BatchStatus::Parsed);
        assert!(outcomes[1].fragments.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        assert!(parse_files(registry(), Vec::new(), None).await.is_empty());
    }
}
