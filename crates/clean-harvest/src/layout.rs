//! On-disk layout for staging thumbnails, cache artifacts, and curated output.
//!
//! ```text
//! <root>/tmp/<category>/<keyword>.json      cache artifact
//! <root>/tmp/<category>/<keyword>/image_N   thumbnails
//! <root>/dumps/<category>/<keyword>/image_N text-free originals
//! ```

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::types::CurateResult;

/// Replace runs of spaces with a single underscore.
pub fn slugify(label: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    let re = SPACES.get_or_init(|| Regex::new(" +").expect("static regex"));
    re.replace_all(label, "_").into_owned()
}

/// Path builder rooted at the save directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_root(&self, category: &str) -> PathBuf {
        self.root.join("tmp").join(slugify(category))
    }

    /// Cache artifact for a keyword.
    pub fn cache_path(&self, category: &str, keyword: &str) -> PathBuf {
        self.staging_root(category)
            .join(format!("{}.json", slugify(keyword)))
    }

    /// Directory holding downloaded thumbnails.
    pub fn staging_dir(&self, category: &str, keyword: &str) -> PathBuf {
        self.staging_root(category).join(slugify(keyword))
    }

    /// Directory holding curated originals.
    pub fn output_dir(&self, category: &str, keyword: &str) -> PathBuf {
        self.root
            .join("dumps")
            .join(slugify(category))
            .join(slugify(keyword))
    }

    /// Extension-less destination for the asset at `index`.
    pub fn asset_stem(dir: &Path, index: usize) -> PathBuf {
        dir.join(format!("image_{index}"))
    }

    /// Create the staging and output directories for a keyword.
    pub fn ensure_dirs(&self, category: &str, keyword: &str) -> CurateResult<()> {
        for dir in [
            self.staging_dir(category, keyword),
            self.output_dir(category, keyword),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
