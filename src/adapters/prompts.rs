//! Prompt templates keyed by platform.
//!
//! Templates are plain text files named `<platform>-prompt.txt` with
//! `{{title}}` and `{{content}}` placeholders. They are loaded once at
//! startup; a missing template is a configuration error, never a per-event
//! one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use tracing::{debug, warn};

use crate::config::ConfigError;

const SUFFIX: &str = "-prompt.txt";

/// A loaded template
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub text: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Substitute `{{title}}` and `{{content}}`
    pub fn render(&self, title: &str, content: &str) -> String {
        self.text
            .replace("{{title}}", title)
            .replace("{{content}}", content)
    }

    fn missing_placeholders(&self) -> Vec<&'static str> {
        ["{{title}}", "{{content}}"]
            .into_iter()
            .filter(|p| !self.text.contains(p))
            .collect()
    }
}

/// All templates found in the prompts directory
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    dir: PathBuf,
    templates: BTreeMap<String, PromptTemplate>,
}

impl PromptLibrary {
    /// Load every `*-prompt.txt` in `dir`
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let pattern = dir.join(format!("*{}", SUFFIX));
        let pattern = pattern.to_string_lossy();

        let mut templates = BTreeMap::new();
        for entry in glob(&pattern).with_context(|| format!("Invalid prompts path: {}", dir.display()))? {
            let path = entry.context("Failed to read prompts directory entry")?;
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(SUFFIX))
            else {
                continue;
            };

            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt template: {}", path.display()))?;
            let template = PromptTemplate::new(name, text);

            let missing = template.missing_placeholders();
            if !missing.is_empty() {
                warn!(template = name, ?missing, "Prompt template lacks placeholders");
            }

            debug!(template = name, path = %path.display(), "Loaded prompt template");
            templates.insert(name.to_string(), template);
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            templates,
        })
    }

    /// Build from in-memory templates
    pub fn from_templates(templates: impl IntoIterator<Item = PromptTemplate>) -> Self {
        Self {
            dir: PathBuf::new(),
            templates: templates
                .into_iter()
                .map(|t| (t.name.clone(), t))
                .collect(),
        }
    }

    /// Template for `platform`
    pub fn get(&self, platform: &str) -> Result<&PromptTemplate, ConfigError> {
        self.templates
            .get(platform)
            .ok_or_else(|| ConfigError::MissingTemplate {
                platform: platform.to_string(),
                path: self.dir.join(format!("{}{}", platform, SUFFIX)),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_substitutes_every_occurrence() {
        let template = PromptTemplate::new("x", "{{title}}: {{content}} ({{title}})");
        assert_eq!(template.render("T", "C"), "T: C (T)");
    }

    #[test]
    fn test_load_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("linkedin-prompt.txt"), "L {{title}} {{content}}").unwrap();
        std::fs::write(dir.path().join("twitter-prompt.txt"), "T {{title}}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let library = PromptLibrary::load_dir(dir.path()).unwrap();
        assert_eq!(library.names().collect::<Vec<_>>(), vec!["linkedin", "twitter"]);
        assert_eq!(library.get("linkedin").unwrap().render("a", "b"), "L a b");
    }

    #[test]
    fn test_missing_template_is_config_error() {
        let dir = TempDir::new().unwrap();
        let library = PromptLibrary::load_dir(dir.path()).unwrap();

        let err = library.get("twitter").unwrap_err();
        assert!(matches!(err, ConfigError::MissingTemplate { ref platform, .. } if platform == "twitter"));
    }
}
