/*!
 * Pre-flight checks for custom scripts
 *
 * A script only runs when its path is absolute, it exists as a regular
 * file, its extension is an allowed shell type and the path string
 * carries no traversal or shell-substitution sequence.
 */

use std::path::Path;

use crate::error::{Result, TetherError};

/// Extensions a custom script may have
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["sh", "bash", "zsh", "command"];

/// Substrings refused anywhere in the path
pub const DENIED_PATTERNS: [&str; 5] = ["../", "~", "${", "$(", "`"];

/// Validate `path` for execution
///
/// Returns [`TetherError::ScriptValidationFailed`] naming the first
/// violated rule.
pub fn validate_script(path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();

    if raw.is_empty() {
        return Err(reject("no script path configured"));
    }

    if let Some(pattern) = DENIED_PATTERNS.iter().find(|p| raw.contains(*p)) {
        return Err(reject(format!("path contains forbidden sequence '{}'", pattern)));
    }

    if !path.is_absolute() {
        return Err(reject(format!("{} is not an absolute path", raw)));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext) => {}
        Some(ext) => {
            return Err(reject(format!(
                "extension '.{}' is not one of {}",
                ext,
                ALLOWED_EXTENSIONS.join(", ")
            )))
        }
        None => return Err(reject(format!("{} has no extension", raw))),
    }

    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(reject(format!("{} is not a regular file", raw))),
        Err(_) => Err(reject(format!("{} does not exist", raw))),
    }
}

/// Interpreter for a validated script, chosen by extension
pub fn interpreter_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("bash") => "bash",
        Some("zsh") => "zsh",
        _ => "sh",
    }
}

fn reject(reason: impl Into<String>) -> TetherError {
    TetherError::ScriptValidationFailed(reason.into())
}
