// src/language.rs

//! Languages a cell can be written in, and the host platform.
//!
//! Both feed interpreter discovery: candidate commands differ per
//! language and per platform (the `py` launcher only exists on Windows).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Julia,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::Julia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Julia => "julia",
        }
    }

    /// File name of the script materialised inside a run workspace.
    pub fn script_name(&self) -> &'static str {
        match self {
            Language::Python => "cell.py",
            Language::Julia => "cell.jl",
        }
    }

    /// Guess the language from a source file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "py" => Some(Language::Python),
            "jl" => Some(Language::Julia),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "julia" | "jl" => Ok(Language::Julia),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

/// Host platform, as far as interpreter discovery cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_extensions() {
        assert_eq!("Python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("jl".parse::<Language>().unwrap(), Language::Julia);
        assert!("ruby".parse::<Language>().is_err());

        assert_eq!(Language::from_path(Path::new("a/b.PY")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("model.jl")), Some(Language::Julia));
        assert_eq!(Language::from_path(Path::new("notes.txt")), None);
    }

    #[test]
    fn serialises_lowercase() {
        let v = serde_json::to_value(Language::Julia).unwrap();
        assert_eq!(v, serde_json::json!("julia"));
    }
}
