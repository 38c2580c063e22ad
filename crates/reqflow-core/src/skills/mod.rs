//! Methodology text ("skills") injected into model calls
//!
//! Skills are opaque text blobs loaded by name. `SkillLibrary` reads
//! `<skills_dir>/<name>.md`, falls back to a built-in text, and caches each
//! name after its first load.

mod builtin;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{Error, Result};

pub const EXTRACTION: &str = "extraction";
pub const ANALYSIS: &str = "analysis";
pub const DECOMPOSITION: &str = "decomposition";
pub const VALIDATION: &str = "validation";

/// Source of methodology text
#[async_trait]
pub trait SkillProvider: Send + Sync {
    async fn load(&self, name: &str) -> Result<Arc<str>>;
}

/// Read-through cache over a skills directory and the built-in texts
#[derive(Debug, Default)]
pub struct SkillLibrary {
    dir: Option<PathBuf>,
    cache: DashMap<String, Arc<str>>,
}

impl SkillLibrary {
    /// Library backed only by the built-in texts
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Library that prefers files in `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            cache: DashMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    async fn read_override(&self, name: &str) -> Result<Option<String>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.md", name));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                debug!(skill = name, path = %path.display(), "Loaded skill override");
                Ok(Some(text))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SkillProvider for SkillLibrary {
    async fn load(&self, name: &str) -> Result<Arc<str>> {
        if let Some(text) = self.cache.get(name) {
            return Ok(text.clone());
        }

        let text: Arc<str> = match self.read_override(name).await? {
            Some(text) => text.into(),
            None => builtin::lookup(name)
                .ok_or_else(|| Error::SkillNotFound(name.to_string()))?
                .into(),
        };

        self.cache.insert(name.to_string(), text.clone());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builtin_skills_load() {
        let library = SkillLibrary::builtin();
        for name in [EXTRACTION, ANALYSIS, DECOMPOSITION, VALIDATION] {
            assert!(!library.load(name).await.unwrap().is_empty());
        }
        assert_eq!(library.cached(), 4);
    }

    #[tokio::test]
    async fn test_unknown_skill() {
        let library = SkillLibrary::builtin();
        let err = library.load("astrology").await.unwrap_err();
        assert!(matches!(err, Error::SkillNotFound(_)));
    }

    #[tokio::test]
    async fn test_override_file_wins_and_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decomposition.md");
        std::fs::write(&path, "custom method").unwrap();

        let library = SkillLibrary::with_dir(dir.path());
        assert_eq!(&*library.load(DECOMPOSITION).await.unwrap(), "custom method");

        // Later edits are not seen once cached
        std::fs::write(&path, "changed").unwrap();
        assert_eq!(&*library.load(DECOMPOSITION).await.unwrap(), "custom method");

        // Names without a file fall back to the built-in text
        assert!(library.load(EXTRACTION).await.unwrap().contains("requirements"));
    }
}
