//! Scratch workspaces for build tool integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use buildrig_core::{list_files, InvocationBuilder};
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::context::RigContext;
use crate::error::{DriverError, Result};

/// Marker file created at the root of every new workspace.
pub const WORKSPACE_FILE: &str = "WORKSPACE";

/// One workspace under the run's scratch root, plus the selected tool.
#[derive(Debug)]
pub struct WorkspaceDriver {
    context: Arc<RigContext>,
    tool: Option<PathBuf>,
    workspace: PathBuf,
}

impl WorkspaceDriver {
    /// Create a driver with a fresh workspace, selecting the configured
    /// default tool version if there is one.
    pub async fn new(context: Arc<RigContext>) -> Result<Self> {
        let workspace = create_workspace(context.scratch_root())?;
        let mut driver = WorkspaceDriver {
            context,
            tool: None,
            workspace,
        };
        if let Some(version) = driver.context.config().tool_version.clone() {
            driver.select_version(&version).await?;
        }
        Ok(driver)
    }

    pub fn context(&self) -> &Arc<RigContext> {
        &self.context
    }

    /// Root of the current workspace.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Binary of the selected tool version.
    pub fn tool(&self) -> Option<&Path> {
        self.tool.as_deref()
    }

    /// Switch to a fresh workspace. Earlier workspaces stay on disk.
    pub fn new_workspace(&mut self) -> Result<&Path> {
        self.workspace = create_workspace(self.context.scratch_root())?;
        Ok(&self.workspace)
    }

    /// Select the tool version used by [`command`](Self::command),
    /// provisioning it if this is its first use in the run.
    pub async fn select_version(&mut self, version: &str) -> Result<()> {
        self.tool = Some(self.context.provision(version).await?);
        Ok(())
    }

    /// Write `lines`, joined by `\n`, to `path` in the workspace.
    pub fn scratch_file<I, S>(&self, path: &str, lines: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        write_lines(&self.workspace.join(path), lines)
    }

    /// Like [`scratch_file`](Self::scratch_file), and make the file
    /// executable by everyone.
    pub fn scratch_executable_file<I, S>(&self, path: &str, lines: I) -> Result<PathBuf>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let dest = self.scratch_file(path, lines)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&dest)?.permissions();
            perms.set_mode(perms.mode() | 0o111);
            fs::set_permissions(&dest, perms)?;
        }
        Ok(dest)
    }

    /// Create a directory, and its parents, in the workspace.
    pub fn scratch_dir(&self, path: &str) -> Result<PathBuf> {
        let dest = self.workspace.join(path);
        fs::create_dir_all(&dest)?;
        Ok(dest)
    }

    /// Copy runfile `path` to `dest` in the workspace.
    pub fn copy_from_runfiles(&self, path: &str, dest: &str) -> Result<PathBuf> {
        let origin = self.context.runfile(path)?;
        let dest = self.workspace.join(dest);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&origin, &dest)?;
        debug!("Copied {:?} to {:?}", origin, dest);
        Ok(dest)
    }

    /// Copy every regular file under runfile directory `directory` into the
    /// workspace, removing `strip_prefix` from the destination paths.
    ///
    /// `strip_prefix` must be a leading component prefix of `directory`.
    pub fn copy_directory_from_runfiles(&self, directory: &str, strip_prefix: &str) -> Result<()> {
        let start = self.context.runfile(directory)?;
        if !start.is_dir() {
            return Err(DriverError::NotADirectory(start));
        }
        if !Path::new(directory).starts_with(strip_prefix) {
            return Err(DriverError::StripPrefix {
                directory: directory.to_string(),
                prefix: strip_prefix.to_string(),
            });
        }

        let runfiles = self
            .context
            .runfiles_dir()
            .ok_or(DriverError::RunfilesUnset(buildrig_core::config::ENV_RUNFILES_DIR))?;
        for entry in WalkDir::new(&start).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(runfiles) else {
                continue;
            };
            let Ok(dest) = relative.strip_prefix(strip_prefix) else {
                continue;
            };
            let dest = self.workspace.join(dest);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
        Ok(())
    }

    /// Files in the workspace, relative to its root.
    pub fn contents(&self) -> Result<Vec<PathBuf>> {
        Ok(list_files(&self.workspace)?)
    }

    /// Invocation of the selected tool in this workspace, wired to the
    /// run's output root and repository cache.
    pub fn command<I, S>(&self, args: I) -> Result<InvocationBuilder>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tool = self.tool.as_ref().ok_or(DriverError::NoVersionSelected)?;
        Ok(InvocationBuilder::new(
            tool,
            &self.workspace,
            self.context.output_user_root(),
            args.into_iter().map(Into::into).collect(),
        )
        .with_cache(self.context.cache())
        .with_max_idle_secs(self.context.config().max_idle_secs))
    }
}

fn create_workspace(scratch_root: &Path) -> Result<PathBuf> {
    let workspace = scratch_root.join(format!("workspace{}", Uuid::new_v4().simple()));
    fs::create_dir_all(&workspace)?;
    write_lines(&workspace.join(WORKSPACE_FILE), std::iter::empty::<&str>())?;
    debug!("Created workspace {:?}", workspace);
    Ok(workspace)
}

fn write_lines<I, S>(dest: &Path, lines: I) -> Result<PathBuf>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = lines
        .into_iter()
        .map(|l| l.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(dest, content)?;
    Ok(dest.to_path_buf())
}
