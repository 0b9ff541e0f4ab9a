//! Sandbox metadata, layout and context resolution.
//!
//! [`Sandboxes`] is the entry point for every operation addressed by
//! sandbox name. It pairs the on-disk [`SandboxLayout`] with the [`Git`]
//! capability; the diff, history, patch and baseline modules extend it.

mod context;
mod layout;
mod meta;

pub use context::{
    all_contexts, dir_context, workdir_context, SandboxContext, WorkMode, LIVE_BASELINE,
};
pub use layout::{decode_path, encode_path, SandboxLayout, META_FILE, WORK_DIR};
pub use meta::{load_meta, save_meta, DirMeta, SandboxMeta, MODE_COPY, MODE_LIVE};

use crate::config::Config;
use crate::error::Result;
use crate::git::Git;

/// Access to all sandboxes under one root.
#[derive(Debug, Clone)]
pub struct Sandboxes {
    layout: SandboxLayout,
    git: Git,
}

impl Sandboxes {
    /// Creates an accessor from an explicit layout and git runner.
    pub fn new(layout: SandboxLayout, git: Git) -> Self {
        Self { layout, git }
    }

    /// Creates an accessor from the process configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SandboxLayout::new(config.sandboxes_dir.clone()),
            Git::from_config(config),
        )
    }

    /// Returns the on-disk layout.
    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    /// Returns the git runner.
    pub fn git(&self) -> &Git {
        &self.git
    }

    /// Loads the metadata record of a sandbox.
    pub fn load_meta(&self, name: &str) -> Result<SandboxMeta> {
        load_meta(&self.layout, name)
    }

    /// Persists the metadata record of a sandbox.
    pub fn save_meta(&self, meta: &SandboxMeta) -> Result<()> {
        save_meta(&self.layout, meta)
    }

    /// Resolves the primary working directory of a sandbox.
    pub fn context(&self, name: &str) -> Result<SandboxContext> {
        let meta = self.load_meta(name)?;
        workdir_context(&self.layout, &meta)
    }

    /// Resolves every directory of a sandbox, primary first.
    pub fn contexts(&self, name: &str) -> Result<Vec<SandboxContext>> {
        let meta = self.load_meta(name)?;
        all_contexts(&self.layout, &meta)
    }
}
