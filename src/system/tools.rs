// src/system/tools.rs

use std::path::PathBuf;
use thiserror::Error;

/// Problems with the machine the build runs on.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Required tool '{tool}' was not found in PATH (needed for {purpose})")]
    Missing { tool: String, purpose: String },
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

/// Locates an executable in `PATH`.
pub fn find_tool(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Locates an executable in `PATH`, failing with an error that names it.
pub fn require_tool(name: &str, purpose: &str) -> Result<PathBuf, ToolError> {
    let path = find_tool(name).ok_or_else(|| ToolError::Missing {
        tool: name.to_string(),
        purpose: purpose.to_string(),
    })?;
    log::debug!("Found {} at {}", name, path.display());
    Ok(path)
}

/// Symlinks and executable bits are only managed on Unix-like systems.
pub fn require_unix() -> Result<(), ToolError> {
    if cfg!(unix) {
        Ok(())
    } else {
        Err(ToolError::UnsupportedPlatform(std::env::consts::OS.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_require_tool_finds_sh_and_names_missing_tools() {
        assert!(require_tool("sh", "tests").is_ok());
        let err = require_tool("no-such-tool-for-fassembler", "tests").unwrap_err();
        assert!(err.to_string().contains("no-such-tool-for-fassembler"));
    }
}
