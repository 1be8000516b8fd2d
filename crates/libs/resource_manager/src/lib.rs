use anyhow::{anyhow, Context, Result};
use raytracing::{BoxedSource, ShaderSource};
use std::path::{Path, PathBuf};
use std::fs;

const SPV_SEARCH_PATHS: [&str; 3] = ["", "./spv", "../../../spv"];

/// Finds a compiled shader on the search paths, first hit wins.
pub fn find_spv<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    find_in(SPV_SEARCH_PATHS.iter().map(PathBuf::from), path.as_ref())
}

pub fn load_spv<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let found = find_spv(path).ok_or_else(|| not_found(path, &default_paths()))?;
    fs::read(&found).with_context(|| format!("Failed to read spv file {}", found.display()))
}

fn find_in(dirs: impl IntoIterator<Item = PathBuf>, path: &Path) -> Option<PathBuf> {
    dirs.into_iter()
        .map(|dir| dir.join(path))
        .find(|candidate| candidate.is_file())
}

fn default_paths() -> Vec<PathBuf> {
    SPV_SEARCH_PATHS.iter().map(PathBuf::from).collect()
}

fn not_found(path: &Path, searched: &[PathBuf]) -> anyhow::Error {
    let current = Path::new(".")
        .canonicalize()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| "<unknown>".to_owned());
    anyhow!(
        "Couldn't find spv file {} in {:?}, current path: {}",
        path.display(),
        searched,
        current
    )
}

/// Shader binaries on disk. An explicit directory is searched before the default paths.
#[derive(Debug, Clone, Default)]
pub struct ShaderDirectory {
    dir: Option<PathBuf>,
}

impl ShaderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `dir` may start with `~` or reference environment variables.
    pub fn with_dir(dir: &str) -> Result<Self> {
        let expanded = shellexpand::full(dir)
            .with_context(|| format!("Failed to expand shader directory {dir}"))?;
        Ok(Self {
            dir: Some(PathBuf::from(expanded.as_ref())),
        })
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.dir.iter().cloned().chain(default_paths()).collect()
    }

    pub fn resolve(&self, file: &str) -> Result<PathBuf> {
        let searched = self.search_paths();
        find_in(searched.iter().cloned(), Path::new(file))
            .ok_or_else(|| not_found(Path::new(file), &searched))
    }

    pub fn load(&self, file: &str) -> Result<Vec<u8>> {
        let path = self.resolve(file)?;
        log::debug!("Loading shader {}", path.display());
        fs::read(&path).with_context(|| format!("Failed to read spv file {}", path.display()))
    }
}

impl ShaderSource for ShaderDirectory {
    fn read(&self, file: &str) -> std::result::Result<Vec<u8>, BoxedSource> {
        self.load(file).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_spv() {
        assert!(!load_spv("./src/lib.rs").unwrap().is_empty());
    }

    #[test]
    fn explicit_directory_is_searched_first() {
        let shaders = ShaderDirectory::with_dir("src").unwrap();
        assert_eq!(shaders.search_paths()[0], PathBuf::from("src"));
        assert_eq!(shaders.resolve("lib.rs").unwrap(), Path::new("src").join("lib.rs"));
    }

    #[test]
    fn default_paths_are_still_searched() {
        let shaders = ShaderDirectory::with_dir("does-not-exist").unwrap();
        assert!(shaders.load("Cargo.toml").is_ok());
    }

    #[test]
    fn missing_shader_names_the_file() {
        let shaders = ShaderDirectory::new();
        let error = ShaderSource::read(&shaders, "missing.rgen.spv").unwrap_err();
        assert!(error.to_string().contains("missing.rgen.spv"));
    }

    #[test]
    fn environment_variables_are_expanded() {
        let shaders = ShaderDirectory::with_dir("$CARGO_MANIFEST_DIR/src").unwrap();
        assert!(shaders.search_paths()[0].is_absolute());
        assert!(shaders.resolve("lib.rs").is_ok());
    }
}
