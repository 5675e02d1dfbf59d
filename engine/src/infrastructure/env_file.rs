//! Environment injection files
//! One `data/<name>.env` per managed process, written before first launch
//! and loaded fresh by every spawn.

use crate::domain::error::{DomainError, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn env_file_path(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("{name}.env"))
}

/// Load KEY=VALUE pairs. Blank lines and `#` comments are skipped; lines
/// without `=` are reported and ignored. A missing file is a hard error.
pub fn load(path: &Path) -> Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_| DomainError::EnvFileMissing(path.display().to_string()))?;

    let mut vars = HashMap::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            vars.insert(key.trim().to_string(), value.trim().to_string());
        } else {
            warn!(
                file = %path.display(),
                line = line_num + 1,
                content = line,
                "invalid line in environment file (expected KEY=VALUE)"
            );
        }
    }
    debug!(file = %path.display(), count = vars.len(), "loaded environment file");
    Ok(vars)
}

/// Materialize the environment file for a process from its configured env
/// map plus process metadata. Keys are written sorted so regeneration is
/// deterministic.
pub fn generate(
    path: &Path,
    process_name: &str,
    configured_env: &HashMap<String, String>,
    port_hint: u16,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DomainError::Internal(format!("create {}: {e}", parent.display())))?;
    }

    let mut vars: HashMap<String, String> = configured_env.clone();
    vars.insert("PROCESS_NAME".to_string(), process_name.to_string());
    vars.insert("PROCESS_PORT".to_string(), port_hint.to_string());

    let mut keys: Vec<&String> = vars.keys().collect();
    keys.sort();

    let mut file = std::fs::File::create(path)
        .map_err(|e| DomainError::Internal(format!("create {}: {e}", path.display())))?;
    for key in keys {
        writeln!(file, "{}={}", key, vars[key])
            .map_err(|e| DomainError::Internal(format!("write {}: {e}", path.display())))?;
    }
    debug!(file = %path.display(), process = %process_name, "generated environment file");
    Ok(())
}
