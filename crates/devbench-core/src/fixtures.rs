//! On-disk fixtures: starter code, extra context, and test suites.
//!
//! Layout under the fixtures root:
//!
//! ```text
//! <language>/<task_id>/fixture.js | Fixture.java | Fixture.cs
//! <language>/<task_id>/context.txt      (optional)
//! <language>/<task_id>/tests/           (test-execution tasks)
//! ```

use crate::task::TaskInput;
use devbench_proto::Language;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONTEXT_FILE: &str = "context.txt";
const TESTS_DIR: &str = "tests";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureStore {
    root: PathBuf,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn task_dir(&self, language: Language, task_id: &str) -> PathBuf {
        self.root.join(language.as_str()).join(task_id)
    }

    /// Default test-suite directory for a task.
    pub fn tests_dir(&self, language: Language, task_id: &str) -> PathBuf {
        self.task_dir(language, task_id).join(TESTS_DIR)
    }

    /// Resolves a path relative to the fixtures root; absolute paths pass through.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Builds a fresh [`TaskInput`]. A missing fixture yields empty starter code.
    pub async fn load(&self, task_id: &str, language: Language) -> std::io::Result<TaskInput> {
        let dir = self.task_dir(language, task_id);
        let fixture_code = read_optional(&dir.join(language.fixture_file()))
            .await?
            .unwrap_or_default();
        let additional_context = read_optional(&dir.join(CONTEXT_FILE)).await?;
        debug!(
            task_id,
            %language,
            fixture_chars = fixture_code.len(),
            has_context = additional_context.is_some(),
            "Loaded fixture"
        );
        Ok(TaskInput {
            language,
            fixture_code,
            additional_context,
        })
    }
}

/// Recursively copies `src` into `dst`, creating `dst` if needed.
///
/// Symlinks are followed. Blocking; run it off the async runtime for large trees.
pub fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if path.is_dir() {
            copy_tree(&path, &target)?;
        } else {
            std::fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

async fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
