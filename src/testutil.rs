//! Shared helpers for unit tests that drive a real git binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

use crate::baseline::record_baseline;
use crate::git::Git;
use crate::sandbox::{DirMeta, SandboxContext, SandboxLayout, SandboxMeta, Sandboxes, WorkMode};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Writes a file, creating parent directories.
pub(crate) fn write(dir: &Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    std::fs::write(path, content).expect("failed to write file");
}

/// Initialises a repository with the given files committed, returning HEAD.
pub(crate) fn init_repo(dir: &Path, files: &[(&str, &str)]) -> String {
    git(dir, &["init", "--quiet"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    for (rel, content) in files {
        write(dir, rel, content);
    }
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "--allow-empty", "-m", "initial"]);
    git(dir, &["rev-parse", "HEAD"])
}

/// Stages everything and commits it, returning the new HEAD.
pub(crate) fn commit_all(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(
        dir,
        &[
            "-c",
            "user.name=Agent",
            "-c",
            "user.email=agent@example.com",
            "commit",
            "--quiet",
            "-m",
            message,
        ],
    );
    git(dir, &["rev-parse", "HEAD"])
}

/// Context treating `dir` as an isolated copy with the given baseline.
pub(crate) fn copy_context(dir: &Path, baseline: &str) -> SandboxContext {
    SandboxContext {
        name: "test".to_string(),
        host_path: dir.to_path_buf(),
        work_dir: dir.to_path_buf(),
        baseline_ref: baseline.to_string(),
        mode: WorkMode::IsolatedCopy,
    }
}

/// Context treating `dir` as a live-mounted directory.
pub(crate) fn live_context(dir: &Path) -> SandboxContext {
    SandboxContext {
        name: "test".to_string(),
        host_path: dir.to_path_buf(),
        work_dir: dir.to_path_buf(),
        baseline_ref: "HEAD".to_string(),
        mode: WorkMode::LiveMounted,
    }
}

/// A sandbox with one copy-mode directory whose host is a git repository.
pub(crate) struct SandboxFixture {
    pub(crate) sandboxes: Sandboxes,
    pub(crate) name: String,
    host: TempDir,
    _root: TempDir,
}

impl SandboxFixture {
    pub(crate) fn host(&self) -> &Path {
        self.host.path()
    }

    pub(crate) fn context(&self) -> SandboxContext {
        self.sandboxes.context(&self.name).expect("fixture context")
    }

    /// Replaces the primary directory with a live mount of the host.
    pub(crate) fn add_live_primary(&self) {
        let mut meta = self.sandboxes.load_meta(&self.name).unwrap();
        meta.workdir = DirMeta::live(self.host());
        self.sandboxes.save_meta(&meta).unwrap();
    }

    /// Adds a second copy-mode directory and returns its host path.
    pub(crate) fn add_copy_dir(&self, host: &Path) -> PathBuf {
        let work = self.sandboxes.layout().work_copy_path(&self.name, host);
        copy_tree(host, &work);
        let baseline = record_baseline(self.sandboxes.git(), &work).unwrap();
        let mut meta = self.sandboxes.load_meta(&self.name).unwrap();
        meta.directories.push(DirMeta::copy(host, baseline));
        self.sandboxes.save_meta(&meta).unwrap();
        work
    }
}

/// Copies every file except `.git` from `from` into `to`.
pub(crate) fn copy_tree(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        if entry.file_name() == ".git" {
            continue;
        }
        let dest = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &dest);
        } else {
            std::fs::copy(entry.path(), dest).unwrap();
        }
    }
}

/// Creates a sandbox named `name` whose work copy mirrors a fresh host repo.
pub(crate) fn sandbox_fixture(name: &str) -> SandboxFixture {
    let root = TempDir::new().expect("failed to create sandboxes root");
    let host = TempDir::new().expect("failed to create host dir");
    init_repo(host.path(), &[("README.md", "# Test\n")]);

    let sandboxes = Sandboxes::new(SandboxLayout::new(root.path()), Git::default());
    std::fs::create_dir_all(sandboxes.layout().sandbox_dir(name)).unwrap();
    let work = sandboxes.layout().work_copy_path(name, host.path());
    copy_tree(host.path(), &work);
    let baseline = record_baseline(sandboxes.git(), &work).unwrap();

    let meta = SandboxMeta::new(name, DirMeta::copy(host.path(), baseline));
    sandboxes.save_meta(&meta).unwrap();

    SandboxFixture {
        sandboxes,
        name: name.to_string(),
        host,
        _root: root,
    }
}
