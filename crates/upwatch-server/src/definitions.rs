//! Check definition files.
//!
//! A spec path names one YAML file, a directory searched recursively for
//! `*.yaml` / `*.yml`, or a glob pattern such as `spec.d/**/*.yaml`. Every
//! file may hold several documents of the form
//!
//! ```yaml
//! version: 1
//! http:
//!   name: api
//!   url: https://example.com/health
//!   expect:
//!     code: 200
//!   cycles:
//!     failure: 3
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use upwatch::CheckDefinition;
use upwatch::types::DEFAULT_PROBE_TIMEOUT;
use walkdir::WalkDir;

/// Definition loading errors
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("spec path cannot be empty")]
    EmptyPath,

    #[error("unsupported home expansion: {0:?}")]
    UnsupportedHome(String),

    #[error("cannot resolve {0}")]
    Unresolvable(&'static str),

    #[error("stat {path:?}: {source}")]
    Missing {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("no spec files matched {0:?}")]
    NoFiles(PathBuf),

    #[error("invalid spec pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("expand spec pattern: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("read spec file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("decode spec in {path:?}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Names(common::Error),
}

/// One YAML document
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SpecDocument {
    #[allow(dead_code)]
    version: u32,
    http: HttpSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HttpSpec {
    name: String,
    disabled: bool,
    method: String,
    follow_redirects: bool,
    url: String,
    args: BTreeMap<String, String>,
    #[serde(with = "humantime_serde")]
    timeout: Duration,
    expect: ExpectSpec,
    cycles: CyclesSpec,
    on_failure: String,
    on_success: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExpectSpec {
    code: u16,
    header: BTreeMap<String, String>,
    body: ExpectBodySpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExpectBodySpec {
    exact: String,
    contains: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CyclesSpec {
    failure: i64,
    success: i64,
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

impl SpecDocument {
    fn into_definition(self, source: &Path) -> CheckDefinition {
        let http = self.http;
        CheckDefinition {
            name: http.name,
            source_path: source.to_string_lossy().into_owned(),
            disabled: http.disabled,
            method: http.method,
            url: http.url,
            extra_query_args: http.args,
            timeout: if http.timeout.is_zero() {
                DEFAULT_PROBE_TIMEOUT
            } else {
                http.timeout
            },
            follow_redirects: http.follow_redirects,
            expect_status_code: (http.expect.code > 0).then_some(http.expect.code),
            expect_headers: http.expect.header,
            expect_body_exact: non_empty(http.expect.body.exact),
            expect_body_contains: non_empty(http.expect.body.contains),
            failure_threshold: http.cycles.failure,
            success_threshold: http.cycles.success,
            on_failure_script: non_empty(http.on_failure),
            on_recovery_script: non_empty(http.on_success),
        }
    }
}

/// Expand `~` and anchor relative paths at `cwd`.
pub fn resolve_spec_path(raw: &str, home: Option<&Path>, cwd: &Path) -> Result<PathBuf, DefinitionError> {
    let expr = raw.trim();
    if expr.is_empty() {
        return Err(DefinitionError::EmptyPath);
    }

    let path = if expr == "~" || expr.starts_with("~/") {
        let home = home.ok_or(DefinitionError::Unresolvable("user home directory"))?;
        home.join(expr.trim_start_matches('~').trim_start_matches('/'))
    } else if expr.starts_with('~') {
        return Err(DefinitionError::UnsupportedHome(expr.to_string()));
    } else {
        PathBuf::from(expr)
    };

    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(cwd.join(path))
    }
}

fn is_pattern(path: &Path) -> bool {
    path.to_string_lossy().contains(['*', '?', '['])
}

/// Expand a glob pattern (`**` included) to the files it matches, sorted.
fn matched_files(path: &Path) -> Result<Vec<PathBuf>, DefinitionError> {
    let pattern = path.to_string_lossy().into_owned();
    let entries = glob::glob(&pattern).map_err(|source| DefinitionError::Pattern {
        pattern: pattern.clone(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.is_file() {
            files.push(entry);
        }
    }

    if files.is_empty() {
        return Err(DefinitionError::NoFiles(path.to_path_buf()));
    }
    files.sort();
    files.dedup();
    Ok(files)
}

/// List the files behind a resolved spec path, sorted.
fn spec_files(path: &Path) -> Result<Vec<PathBuf>, DefinitionError> {
    if is_pattern(path) {
        return matched_files(path);
    }

    let metadata = std::fs::metadata(path).map_err(|source| DefinitionError::Missing {
        path: path.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry.map_err(|source| DefinitionError::Walk {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if entry.file_type().is_file() && is_yaml {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(DefinitionError::NoFiles(path.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

/// Parse every non-empty document of one file.
pub fn parse_file(path: &Path) -> Result<Vec<CheckDefinition>, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let decode_error = |source| DefinitionError::Decode {
        path: path.to_path_buf(),
        source,
    };

    let mut definitions = Vec::new();
    for document in serde_yaml::Deserializer::from_str(&content) {
        let value = serde_yaml::Value::deserialize(document).map_err(decode_error)?;
        if value.is_null() {
            continue;
        }
        let spec: SpecDocument = serde_yaml::from_value(value).map_err(decode_error)?;
        definitions.push(spec.into_definition(path));
    }
    Ok(definitions)
}

/// Load all definitions below an already resolved path.
pub fn load_from(path: &Path) -> Result<Vec<CheckDefinition>, DefinitionError> {
    let mut definitions = Vec::new();
    for file in spec_files(path)? {
        let parsed = parse_file(&file)?;
        debug!(file = %file.display(), documents = parsed.len(), "Spec file read");
        definitions.extend(parsed);
    }

    upwatch::config::validate_definitions(&definitions).map_err(DefinitionError::Names)?;

    for definition in definitions.iter().filter(|d| d.is_active()) {
        debug!(name = %definition.name, source = %definition.source_path, "spec_parsed");
    }
    info!(
        path = %path.display(),
        total = definitions.len(),
        active = definitions.iter().filter(|d| d.is_active()).count(),
        "Check definitions loaded"
    );
    Ok(definitions)
}

/// Resolve `spec_path` against the home and working directories and load it.
pub fn load_definitions(spec_path: &str) -> Result<Vec<CheckDefinition>, DefinitionError> {
    let cwd = std::env::current_dir().map_err(|_| DefinitionError::Unresolvable("working directory"))?;
    let home = dirs::home_dir();
    let path = resolve_spec_path(spec_path, home.as_deref(), &cwd)?;
    load_from(&path)
}
