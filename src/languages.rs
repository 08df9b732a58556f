//! Language table for compilation and execution
//!
//! Maps the language identifiers used by the judge API to the commands needed to
//! build and run a program. Commands and sandbox paths may reference `{dir}`
//! (the program's work directory), `{source}` and `{exe}`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;

use crate::error::ApiError;

/// Name of the compiled executable inside a program's work directory
const EXECUTABLE_NAME: &str = "main";

/// Configuration for a supported programming language
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageConfig {
    /// Identifier used by the judge API (e.g., "cxx")
    pub name: String,
    /// Name of the source file (e.g., "source.cpp")
    pub source_file: String,
    /// Compile command template (None for interpreted languages)
    pub compile_command: Option<Vec<String>>,
    /// Run command template
    pub run_command: Vec<String>,
    /// Files the sandbox lets the program open
    pub allowed_files: Vec<String>,
    /// Path prefixes the sandbox lets the program open
    pub allowed_prefixes: Vec<String>,
}

impl LanguageConfig {
    /// Path of the source file inside `dir`
    pub fn source_path(&self, dir: &Path) -> std::path::PathBuf {
        dir.join(&self.source_file)
    }

    /// Compile command for a program living in `dir`
    pub fn compile_argv(&self, dir: &Path) -> Option<Vec<String>> {
        self.compile_command
            .as_ref()
            .map(|cmd| self.expand_all(cmd, dir))
    }

    /// Run command for a program living in `dir`
    pub fn run_argv(&self, dir: &Path) -> Vec<String> {
        self.expand_all(&self.run_command, dir)
    }

    pub fn allowed_files(&self, dir: &Path) -> Vec<String> {
        self.expand_all(&self.allowed_files, dir)
    }

    pub fn allowed_prefixes(&self, dir: &Path) -> Vec<String> {
        self.expand_all(&self.allowed_prefixes, dir)
    }

    fn expand_all(&self, templates: &[String], dir: &Path) -> Vec<String> {
        templates.iter().map(|t| self.expand(t, dir)).collect()
    }

    fn expand(&self, template: &str, dir: &Path) -> String {
        template
            .replace("{source}", &self.source_path(dir).to_string_lossy())
            .replace("{exe}", &dir.join(EXECUTABLE_NAME).to_string_lossy())
            .replace("{dir}", &dir.to_string_lossy())
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawLanguageConfig {
    source_file: String,
    compile_command: Option<String>,
    run_command: String,
    #[serde(default)]
    allowed_files: Vec<String>,
    #[serde(default)]
    allowed_prefixes: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Known languages keyed by identifier and alias
#[derive(Debug, Default)]
pub struct LanguageTable {
    languages: HashMap<String, Arc<LanguageConfig>>,
}

impl LanguageTable {
    /// Language table shipped with the worker
    pub fn builtin() -> anyhow::Result<Self> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content)
    }

    /// Load a language table from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid language config {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw_configs: HashMap<String, RawLanguageConfig> = toml::from_str(content)?;

        let mut languages = HashMap::new();

        for (name, raw) in raw_configs {
            let run_command = into_command(&raw.run_command);
            if run_command.is_empty() {
                anyhow::bail!("Empty run command for {}", name);
            }

            let config = Arc::new(LanguageConfig {
                name: name.clone(),
                source_file: raw.source_file,
                compile_command: raw.compile_command.map(|cmd| into_command(&cmd)),
                run_command,
                allowed_files: raw.allowed_files,
                allowed_prefixes: raw.allowed_prefixes,
            });

            languages.insert(name, config.clone());

            for alias in raw.aliases {
                languages.insert(alias, config.clone());
            }
        }

        Ok(Self { languages })
    }

    /// Resolve a wire identifier to its language, failing on unknown identifiers
    pub fn resolve(&self, language: &str) -> Result<Arc<LanguageConfig>, ApiError> {
        self.languages
            .get(language)
            .cloned()
            .ok_or_else(|| ApiError::UnknownLanguage(language.to_string()))
    }

    /// Get all supported language identifiers
    pub fn supported(&self) -> Vec<String> {
        let mut names: Vec<String> = self.languages.keys().cloned().collect();
        names.sort();
        names
    }
}

fn into_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
pub(crate) fn test_table() -> LanguageTable {
    LanguageTable::from_toml_str(
        r#"
[cxx]
source_file = "source.cpp"
compile_command = "g++ -o {exe} {source}"
run_command = "{exe}"
aliases = ["cpp"]

[python3]
source_file = "main.py"
run_command = "/usr/bin/python3 -s -S {source}"
allowed_files = ["{dir}", "{source}"]
"#,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_builtin_table_loads() {
        let table = LanguageTable::builtin().unwrap();

        for name in ["cxx", "python2", "python3", "java"] {
            assert_ok!(table.resolve(name), "missing {}", name);
        }
    }

    #[test]
    fn test_alias_resolves_to_same_language() {
        let table = test_table();

        let cpp = table.resolve("cpp").unwrap();
        assert_eq!(cpp.name, "cxx");
        assert!(Arc::ptr_eq(&cpp, &table.resolve("cxx").unwrap()));
    }

    #[test]
    fn test_unknown_language_is_typed_error() {
        let table = test_table();

        match table.resolve("brainfuck") {
            Err(ApiError::UnknownLanguage(id)) => assert_eq!(id, "brainfuck"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_placeholders_expand() {
        let table = test_table();
        let dir = Path::new("/tmp/jury-x/program");

        let cxx = table.resolve("cxx").unwrap();
        assert_eq!(
            cxx.compile_argv(dir).unwrap(),
            vec![
                "g++",
                "-o",
                "/tmp/jury-x/program/main",
                "/tmp/jury-x/program/source.cpp"
            ]
        );
        assert_eq!(cxx.run_argv(dir), vec!["/tmp/jury-x/program/main"]);

        let python = table.resolve("python3").unwrap();
        assert!(python.compile_argv(dir).is_none());
        assert_eq!(
            python.allowed_files(dir),
            vec!["/tmp/jury-x/program", "/tmp/jury-x/program/main.py"]
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[c]
source_file = "main.c"
compile_command = "gcc -o {{exe}} {{source}}"
run_command = "{{exe}}"
"#
        )
        .unwrap();

        let table = LanguageTable::from_file(file.path()).unwrap();
        assert_eq!(table.supported(), vec!["c"]);
    }

    #[test]
    fn test_empty_run_command_rejected() {
        let result = LanguageTable::from_toml_str(
            r#"
[broken]
source_file = "x"
run_command = ""
"#,
        );
        assert_err!(result);
    }
}
