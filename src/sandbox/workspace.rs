use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::ExecError;
use super::toolchain::ToolchainDescriptor;

// Workspace directory permissions
const WORKSPACE_DIR_PERMISSIONS: u32 = 0o700;

// Hyphens never appear in a derived class name, and the id is unguessable,
// so no source stem can land on the input file
fn input_file_name(id: Uuid) -> String {
    format!("stdin-{id}")
}

/// The ephemeral files backing exactly one execution request
///
/// Everything lives in a directory named after a random v4 UUID under the sandbox
/// root. The directory is removed by `release`, or by `Drop` if the owner panics
/// or its future is cancelled before reaching it.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: PathBuf,
    stem: String,
    source: PathBuf,
    artifact: Option<PathBuf>,
    input: Option<PathBuf>,
    released: bool,
}

impl Workspace {
    /// Creates a fresh workspace and stages the source (and input, if any)
    pub fn acquire(
        root: &Path,
        descriptor: &ToolchainDescriptor,
        source: &str,
        input: Option<&str>,
    ) -> Result<Self, ExecError> {
        let id = Uuid::new_v4();
        let dir = root.join(id.to_string());

        // `create` (not `create_all`) fails on an existing directory, so a
        // workspace can never adopt somebody else's files.
        fs::DirBuilder::new()
            .mode(WORKSPACE_DIR_PERMISSIONS)
            .create(&dir)?;

        let stem = descriptor.naming.stem(source);
        let workspace = Self {
            id,
            source: dir.join(format!("{stem}.{}", descriptor.extension)),
            artifact: descriptor.requires_compilation().then(|| dir.join(&stem)),
            input: input.map(|_| dir.join(input_file_name(id))),
            stem,
            dir,
            released: false,
        };

        // From here on a failed write drops `workspace`, which removes the directory
        fs::write(&workspace.source, source)?;
        if let (Some(path), Some(text)) = (&workspace.input, input) {
            fs::write(path, text)?;
        }

        log::debug!("Workspace {id} staged at {}", workspace.dir.display());
        Ok(workspace)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// Reads back the staged standard input, if the request carried one
    pub fn read_input(&self) -> Result<Option<Vec<u8>>, ExecError> {
        match &self.input {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        }
    }

    /// Placeholder values for rendering this workspace's command templates
    pub fn substitutions(&self) -> HashMap<&'static str, String> {
        let mut mapping = HashMap::new();
        mapping.insert("%INPUT%", self.source.to_string_lossy().into_owned());
        mapping.insert("%DIR%", self.dir.to_string_lossy().into_owned());
        mapping.insert("%NAME%", self.stem.clone());
        if let Some(artifact) = &self.artifact {
            mapping.insert("%OUTPUT%", artifact.to_string_lossy().into_owned());
        }
        mapping
    }

    /// Removes every file the workspace holds, compiler side files included.
    ///
    /// Idempotent; failures are logged, never returned.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => log::debug!("Workspace {} released", self.id),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "Unable to remove workspace {} at {}: {e}",
                self.id,
                self.dir.display()
            ),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released {
            log::debug!("Workspace {} released on drop", self.id);
        }
        self.release();
    }
}

/// Creates the sandbox root and purges workspaces left behind by a previous process
///
/// Only call this before any request is accepted.
pub fn prepare_root(root: &Path) -> io::Result<usize> {
    fs::create_dir_all(root)?;
    fs::set_permissions(root, fs::Permissions::from_mode(WORKSPACE_DIR_PERMISSIONS))?;

    let mut purged = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let is_workspace = entry
            .file_name()
            .to_str()
            .is_some_and(|name| Uuid::parse_str(name).is_ok());
        if !is_workspace || !entry.file_type()?.is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => purged += 1,
            Err(e) => log::warn!("Unable to purge stale workspace {:?}: {e}", entry.path()),
        }
    }

    if purged > 0 {
        log::info!("Purged {purged} stale workspaces under {}", root.display());
    }
    Ok(purged)
}
