// Shader module loading and hot reload
//
// Vulkan consumes SPIR-V bytecode. Shaders are compiled outside the engine
// (see build.rs) and read from disk at pipeline creation time, which is what
// lets the pipeline be rebuilt when a .spv file changes.

use anyhow::{Context, Result};
use ash::vk;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};

use super::VulkanDevice;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into words, rejecting anything that is obviously not a
/// SPIR-V module
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() {
        anyhow::bail!("SPIR-V module is empty");
    }

    // read_spv copes with unaligned input and byte-swapped modules
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).context("Malformed SPIR-V module")?;

    if words.first() != Some(&SPIRV_MAGIC) {
        anyhow::bail!("SPIR-V module has a bad magic number");
    }

    Ok(words)
}

/// Create a shader module from SPIR-V bytes
pub fn create_shader_module(device: &VulkanDevice, bytes: &[u8]) -> Result<vk::ShaderModule> {
    let code = parse_spirv(bytes)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}

/// Read a SPIR-V file and create a shader module from it
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to open shader file: {}", path.display()))?;

    create_shader_module(device, &bytes)
        .with_context(|| format!("Failed to load shader: {}", path.display()))
}

/// Watches shader files and reports when any of them changed on disk.
///
/// The directories holding the files are watched rather than the files
/// themselves: compilers often replace a file instead of writing in place,
/// which would silently end a per-file watch.
pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<notify::Event>>,
    files: Vec<PathBuf>,
}

impl ShaderWatcher {
    pub fn new(files: &[&Path]) -> Result<Self> {
        let (tx, events) = channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            // Receiver gone means the watcher is being dropped
            let _ = tx.send(event);
        })
        .context("Failed to create shader file watcher")?;

        let files: Vec<PathBuf> = files.iter().map(|f| normalize(f)).collect();

        let mut dirs: Vec<PathBuf> = files
            .iter()
            .map(|f| f.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(".")))
            .collect();
        dirs.sort();
        dirs.dedup();

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
            log::info!("Watching {} for shader changes", dir.display());
        }

        Ok(Self {
            _watcher: watcher,
            events,
            files,
        })
    }

    /// Drain pending events; true if a watched shader was created or modified
    pub fn take_changed(&self) -> bool {
        let mut changed = false;

        for event in self.events.try_iter() {
            match event {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                        && event.paths.iter().any(|p| self.is_watched(p))
                    {
                        changed = true;
                    }
                }
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        }

        changed
    }

    fn is_watched(&self, path: &Path) -> bool {
        let path = normalize(path);
        self.files.iter().any(|f| *f == path)
    }
}

/// Best-effort absolute path so watcher events compare equal to config paths
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    // The file may not exist yet; canonicalize its directory instead
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            parent
                .canonicalize()
                .map(|dir| dir.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn parses_valid_header() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_empty_module() {
        assert!(parse_spirv(&[]).is_err());
    }

    #[test]
    fn rejects_truncated_word() {
        let mut bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000]);
        bytes.pop();
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn rejects_wrong_magic() {
        let bytes = module_bytes(&[0xdead_beef, 0x0001_0000]);
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn normalize_handles_missing_files() {
        let path = Path::new("shaders_that_do_not_exist/missing.spv");
        assert_eq!(normalize(path), path.to_path_buf());

        let here = normalize(Path::new("not_yet_compiled.spv"));
        assert!(here.is_absolute());
        assert!(here.ends_with("not_yet_compiled.spv"));
    }
}
