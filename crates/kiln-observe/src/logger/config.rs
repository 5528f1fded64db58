use std::io::IsTerminal;

use serde::{Deserialize, Serialize};

use crate::logger::{error::LoggerError, format::LoggerFormat};

/// Environment variable overriding [`LoggerConfig::level`].
pub const ENV_LEVEL: &str = "KILN_LOG";
/// Environment variable overriding [`LoggerConfig::format`].
pub const ENV_FORMAT: &str = "KILN_LOG_FORMAT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `kiln.exec=debug,info`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color: cfg!(test) || std::io::stdout().is_terminal(),
        }
    }
}

impl LoggerConfig {
    /// Apply `KILN_LOG` / `KILN_LOG_FORMAT` on top of `self`.
    pub fn with_env(self) -> Result<Self, LoggerError> {
        self.with_lookup(|name| std::env::var(name).ok())
    }

    fn with_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LoggerError> {
        if let Some(level) = lookup(ENV_LEVEL).filter(|v| !v.trim().is_empty()) {
            self.level = level.trim().to_string();
        }
        if let Some(format) = lookup(ENV_FORMAT).filter(|v| !v.trim().is_empty()) {
            self.format = format.parse()?;
            if self.format != LoggerFormat::Text {
                self.use_color = false;
            }
        }
        Ok(self)
    }
}
