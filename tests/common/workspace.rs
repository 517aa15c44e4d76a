//! Temporary workspace for running the `codag` binary

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Add a file with the given content
    pub fn add_file(&self, relative_path: &str, content: &str) -> &Self {
        let full_path = self.dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        self
    }

    pub fn remove_file(&self, relative_path: &str) -> &Self {
        fs::remove_file(self.dir.path().join(relative_path)).expect("Failed to remove file");
        self
    }

    /// Run `codag --workspace <dir> <args..>`
    pub fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_codag"))
            .arg("--workspace")
            .arg(self.path())
            .args(args)
            .env_remove("CODAG_CACHE_DIR")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to run codag")
    }

    /// Run and expect success; returns stdout parsed as JSON
    pub fn run_json(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "codag {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&stdout)
            .unwrap_or_else(|e| panic!("Expected JSON from codag {:?}: {}\n{}", args, e, stdout))
    }
}
