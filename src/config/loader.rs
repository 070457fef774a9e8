//! Build file discovery and loading for `rivet.toml`
//!
//! Provides functions to find, load and validate build files and the
//! per-user defaults file.

use super::schema::{BuildFile, ExecutionSection, ProjectSection, UserConfig};
use crate::location::Location;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name searched for when no build file is given.
pub const BUILD_FILE_NAME: &str = "rivet.toml";

/// Build file loading error
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// File I/O error
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// No build file was given and none was found
    #[error("no rivet.toml found in {} or any parent directory", .0.display())]
    NotFound(PathBuf),
    /// TOML parsing error
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// Validation error
    #[error("build file validation failed:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<String>),
    /// Malformed `-D NAME=VALUE` definition
    #[error("invalid property definition '{0}': expected NAME=VALUE")]
    InvalidDefinition(String),
}

/// A parsed build file together with the text it came from.
///
/// The text is kept so byte spans can be turned into [`Location`]s.
#[derive(Debug, Clone)]
pub struct LoadedBuildFile {
    path: PathBuf,
    source: String,
    file: BuildFile,
}

impl LoadedBuildFile {
    /// Parse and validate build file text.
    pub fn parse(path: impl Into<PathBuf>, source: String) -> Result<Self, ConfigError> {
        let path = path.into();
        let file: BuildFile =
            toml::from_str(&source).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;

        let errors = file.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors.into_iter().map(|e| e.to_string()).collect()));
        }

        Ok(Self { path, source, file })
    }

    /// An empty project named after `dir`, used when no build file exists.
    pub fn empty(dir: PathBuf) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let file = BuildFile {
            project: ProjectSection { name, default: None },
            execution: ExecutionSection::default(),
            properties: BTreeMap::new(),
            targets: BTreeMap::new(),
        };
        Self { path: dir.join(BUILD_FILE_NAME), source: String::new(), file }
    }

    /// Path of the build file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the build file.
    pub fn base_dir(&self) -> PathBuf {
        project_root(&self.path).map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
    }

    /// Parsed document.
    pub fn file(&self) -> &BuildFile {
        &self.file
    }

    /// Location of the first byte of `span`.
    pub fn location(&self, span: Range<usize>) -> Location {
        Location::from_offset(&self.path, &self.source, span.start)
    }

    /// Location of the contents of a spanned string value.
    ///
    /// Points past the opening quotes, and past the newline that TOML trims
    /// right after `"""` or `'''`, so locations reported by the expression
    /// evaluator line up with the text.
    pub fn value_location(&self, span: Range<usize>) -> Location {
        let text = self.source.get(span.clone()).unwrap_or_default();
        let mut start = span.start;

        if text.starts_with("\"\"\"") || text.starts_with("'''") {
            start += 3;
            let rest = &text[3..];
            if rest.starts_with("\r\n") {
                start += 2;
            } else if rest.starts_with('\n') {
                start += 1;
            }
        } else if text.starts_with(['"', '\'']) {
            start += 1;
        }

        Location::from_offset(&self.path, &self.source, start)
    }
}

/// Find rivet.toml by walking up from the current working directory.
///
/// Fails with [`ConfigError::NotFound`] naming the directory the search
/// started from.
pub fn find_build_file() -> Result<PathBuf, ConfigError> {
    let cwd = env::current_dir().map_err(|source| ConfigError::Io { path: PathBuf::from("."), source })?;
    find_build_file_from(cwd.clone()).ok_or(ConfigError::NotFound(cwd))
}

/// Find rivet.toml by walking up from a specific directory.
pub fn find_build_file_from(start: PathBuf) -> Option<PathBuf> {
    let mut current = start;

    loop {
        let candidate = current.join(BUILD_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Load the build file at `path`, or the discovered one when `path` is `None`.
pub fn load_build_file(path: Option<&Path>) -> Result<LoadedBuildFile, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => find_build_file()?,
    };

    debug!(path = %path.display(), "loading build file");
    let source = fs::read_to_string(&path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
    LoadedBuildFile::parse(path, source)
}

/// Path of the user defaults file.
///
/// `XDG_CONFIG_HOME/rivet/config.toml`, or `~/.config/rivet/config.toml`.
pub fn user_config_path() -> Option<PathBuf> {
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;

    Some(config_home.join("rivet").join("config.toml"))
}

/// Load user defaults. A missing file yields empty defaults.
pub fn load_user_config() -> Result<UserConfig, ConfigError> {
    match user_config_path() {
        Some(path) if path.exists() => load_user_config_file(&path),
        _ => Ok(UserConfig::default()),
    }
}

/// Load user defaults from a specific file.
pub fn load_user_config_file(path: &Path) -> Result<UserConfig, ConfigError> {
    debug!(path = %path.display(), "loading user defaults");
    let source = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    let config: UserConfig =
        toml::from_str(&source).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

    if config.execution.jobs == Some(0) {
        return Err(ConfigError::Validation(vec!["execution.jobs: must be a positive integer".to_string()]));
    }
    Ok(config)
}

/// Split a `-D NAME=VALUE` definition.
pub fn parse_definition(definition: &str) -> Result<(String, String), ConfigError> {
    match definition.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(ConfigError::InvalidDefinition(definition.to_string())),
    }
}

/// Get the project root directory from a build file path.
///
/// Returns the parent directory of the rivet.toml file.
pub fn project_root(build_file: &Path) -> Option<&Path> {
    build_file.parent().filter(|p| !p.as_os_str().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(path: &Path, content: &str) {
        File::create(path)
            .expect("should create build file")
            .write_all(content.as_bytes())
            .expect("should write build file");
    }

    #[test]
    fn test_find_build_file_in_current_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = temp.path().join(BUILD_FILE_NAME);
        write_file(&path, "[project]\nname = \"test\"");

        assert_eq!(find_build_file_from(temp.path().to_path_buf()), Some(path));
    }

    #[test]
    fn test_find_build_file_in_parent_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = temp.path().join(BUILD_FILE_NAME);
        write_file(&path, "[project]\nname = \"test\"");

        let subdir = temp.path().join("src").join("deep");
        fs::create_dir_all(&subdir).expect("should create subdirectories");

        assert_eq!(find_build_file_from(subdir), Some(path));
    }

    #[test]
    fn test_find_build_file_not_found() {
        let temp = TempDir::new().expect("should create temp dir");
        assert_eq!(find_build_file_from(temp.path().to_path_buf()), None);
    }

    #[test]
    fn test_load_build_file() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = temp.path().join(BUILD_FILE_NAME);
        write_file(
            &path,
            r#"
[project]
name = "test-project"

[properties]
out = "build"

[targets.all]
tasks = [{ echo = "hi" }]
"#,
        );

        let loaded = load_build_file(Some(&path)).expect("should load valid build file");
        assert_eq!(loaded.file().project.name, "test-project");
        assert_eq!(loaded.path(), path.as_path());
        assert_eq!(loaded.base_dir(), temp.path());

        let span = loaded.file().properties["out"].span();
        assert_eq!(loaded.location(span.clone()), Location::new(&path, 6, 7));
        assert_eq!(loaded.value_location(span), Location::new(&path, 6, 8));
    }

    #[test]
    fn test_value_location_of_multiline_strings() {
        let source = "[project]\nname = \"m\"\n[properties]\nx = \"\"\"\nfirst\n${y}\"\"\"\nz = '''lit'''\n";
        let loaded = LoadedBuildFile::parse("rivet.toml", source.to_string()).expect("should parse");

        let x = loaded.file().properties["x"].span();
        assert_eq!(loaded.value_location(x), Location::new("rivet.toml", 5, 1));
        let z = loaded.file().properties["z"].span();
        assert_eq!(loaded.value_location(z), Location::new("rivet.toml", 7, 8));
    }

    #[test]
    fn test_load_build_file_missing() {
        let temp = TempDir::new().expect("should create temp dir");
        let result = load_build_file(Some(&temp.path().join("nonexistent.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_build_file_invalid_toml() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = temp.path().join(BUILD_FILE_NAME);
        write_file(&path, "this is not valid toml {{{");

        assert!(matches!(load_build_file(Some(&path)), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_build_file_validation_error() {
        let temp = TempDir::new().expect("should create temp dir");
        let path = temp.path().join(BUILD_FILE_NAME);
        write_file(&path, "[project]\nname = \"\"\n");

        let err = load_build_file(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("project.name"));
    }

    #[test]
    #[serial]
    fn test_user_config_path_uses_xdg() {
        let temp = TempDir::new().expect("should create temp dir");
        let previous = env::var_os("XDG_CONFIG_HOME");
        env::set_var("XDG_CONFIG_HOME", temp.path());

        assert_eq!(user_config_path(), Some(temp.path().join("rivet").join("config.toml")));
        assert!(load_user_config().expect("missing file is fine").properties.is_empty());

        fs::create_dir_all(temp.path().join("rivet")).unwrap();
        write_file(&temp.path().join("rivet").join("config.toml"), "[properties]\nowner = \"me\"\n");
        let config = load_user_config().expect("should load user defaults");
        assert_eq!(config.properties["owner"].as_raw(), "me");

        match previous {
            Some(value) => env::set_var("XDG_CONFIG_HOME", value),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
    }

    #[test]
    #[serial]
    fn test_find_build_file_from_current_dir() {
        let temp = TempDir::new().expect("should create temp dir");
        let root = temp.path().canonicalize().unwrap();
        write_file(&root.join(BUILD_FILE_NAME), "[project]\nname = \"cwd\"\n");
        fs::create_dir_all(root.join("src")).unwrap();

        let previous = env::current_dir().unwrap();
        env::set_current_dir(root.join("src")).unwrap();
        let found = find_build_file();
        let loaded = load_build_file(None);
        env::set_current_dir(previous).unwrap();

        assert_eq!(found.unwrap(), root.join(BUILD_FILE_NAME));
        assert_eq!(loaded.unwrap().file().project.name, "cwd");
    }

    #[test]
    fn test_parse_definition() {
        assert_eq!(parse_definition("out=dist").unwrap(), ("out".to_string(), "dist".to_string()));
        assert_eq!(parse_definition("expr=a=b").unwrap(), ("expr".to_string(), "a=b".to_string()));
        assert_eq!(parse_definition("empty=").unwrap(), ("empty".to_string(), String::new()));
        assert!(matches!(parse_definition("novalue"), Err(ConfigError::InvalidDefinition(_))));
        assert!(matches!(parse_definition("=x"), Err(ConfigError::InvalidDefinition(_))));
    }

    #[test]
    fn test_empty_build_file() {
        let loaded = LoadedBuildFile::empty(PathBuf::from("/work/scratch"));
        assert_eq!(loaded.file().project.name, "scratch");
        assert_eq!(loaded.base_dir(), PathBuf::from("/work/scratch"));
        assert!(loaded.file().targets.is_empty());
        assert_eq!(loaded.location(0..0), Location::new("/work/scratch/rivet.toml", 1, 1));
    }

    #[test]
    fn test_project_root() {
        assert_eq!(project_root(Path::new("/project/rivet.toml")), Some(Path::new("/project")));
        assert_eq!(project_root(Path::new("rivet.toml")), None);
    }
}
