// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::Value;

use crate::error::{LoadError, Provenance, Result};
use crate::options::OptionDeclarations;

const PROJECT_CONF: &str = "project.conf";
pub const FORMAT_VERSION: u64 = 0;

#[derive(Debug, Clone)]
pub struct PluginOrigin {
    pub origin: String,
    pub sources: BTreeMap<String, u64>,
    pub elements: BTreeMap<String, u64>,
    pub path: Option<PathBuf>,
    pub package_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ArtifactRemote {
    pub url: String,
    pub push: bool,
    pub server_cert: Option<String>,
    pub client_key: Option<String>,
    pub client_cert: Option<String>,
    pub instance_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    Error,
    Warn,
    Ignore,
}

/// A loaded and validated `project.conf`.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub directory: PathBuf,
    pub element_path: PathBuf,
    pub format_version: u64,
    pub aliases: BTreeMap<String, String>,
    pub plugins: Vec<PluginOrigin>,
    pub option_declarations: OptionDeclarations,
    pub artifacts: Vec<ArtifactRemote>,
    pub fail_on_overlap: OverlapPolicy,
    pub shell_command: Vec<String>,
}

/// Walks upward from `start` looking for `project.conf`, the way a project root is located
/// before any configuration is parsed.
pub fn locate_project_root(start: &Path) -> Result<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(PROJECT_CONF).is_file() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(LoadError::MissingFile {
                provenance: Provenance::default(),
                path: PROJECT_CONF.to_string(),
            });
        }
    }
}

impl Project {
    pub fn load(directory: &Path) -> Result<Project> {
        let conf_path = directory.join(PROJECT_CONF);
        let provenance = Provenance::new(conf_path.clone());
        let value = crate::node::load_yaml_file(&conf_path)?;

        let Value::Mapping(map) = &value else {
            return Err(LoadError::InvalidData {
                provenance,
                message: "project.conf must be a mapping".to_string(),
            });
        };

        const ALLOWED: &[&str] = &[
            "name",
            "element-path",
            "format-version",
            "variables",
            "environment",
            "environment-nocache",
            "aliases",
            "plugins",
            "options",
            "artifacts",
            "fail-on-overlap",
            "shell",
        ];
        for key in map.keys() {
            if let Some(key) = key.as_str() {
                if !ALLOWED.contains(&key) {
                    return Err(LoadError::InvalidData {
                        provenance,
                        message: format!("unknown key '{key}' in project.conf"),
                    });
                }
            }
        }

        let name = get_str(map, "name").ok_or_else(|| LoadError::InvalidData {
            provenance: provenance.clone(),
            message: "project.conf is missing 'name'".to_string(),
        })?;

        let element_path = directory.join(get_str(map, "element-path").unwrap_or_else(|| ".".to_string()));
        let format_version = get_u64(map, "format-version").unwrap_or(0);
        if format_version > FORMAT_VERSION {
            return Err(LoadError::InvalidData {
                provenance: provenance.clone(),
                message: format!(
                    "project requires format-version {format_version}, this loader supports up to {FORMAT_VERSION}"
                ),
            });
        }

        let aliases = get_mapping(map, "aliases")
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_str()?.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let plugins = parse_plugins(map, &provenance)?;

        let option_declarations = match map.get(Value::String("options".to_string())) {
            Some(options_node) => OptionDeclarations::parse(options_node, &provenance)?,
            None => OptionDeclarations::default(),
        };

        let artifacts = parse_artifacts(map, &provenance)?;

        let fail_on_overlap = match get_str(map, "fail-on-overlap").as_deref() {
            None | Some("warn") => OverlapPolicy::Warn,
            Some("error") => OverlapPolicy::Error,
            Some("ignore") => OverlapPolicy::Ignore,
            Some(other) => {
                return Err(LoadError::InvalidData {
                    provenance,
                    message: format!("fail-on-overlap value '{other}' is not 'error', 'warn' or 'ignore'"),
                })
            }
        };

        let shell_command = map
            .get(Value::String("shell".to_string()))
            .and_then(|v| v.get("command"))
            .and_then(Value::as_sequence)
            .map(|seq| seq.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_else(|| vec!["sh".to_string(), "-i".to_string()]);

        Ok(Project {
            name,
            directory: directory.to_path_buf(),
            element_path,
            format_version,
            aliases,
            plugins,
            option_declarations,
            artifacts,
            fail_on_overlap,
            shell_command,
        })
    }

    /// Expands a url, substituting a declared `alias:` prefix for its expansion.
    pub fn translate_url(&self, url: &str) -> String {
        match url.split_once(':') {
            Some((alias, rest)) => match self.aliases.get(alias) {
                Some(expansion) => format!("{expansion}{rest}"),
                None => url.to_string(),
            },
            None => url.to_string(),
        }
    }
}

fn parse_plugins(map: &serde_yaml::Mapping, provenance: &Provenance) -> Result<Vec<PluginOrigin>> {
    let Some(seq) = get_sequence(map, "plugins") else {
        return Ok(Vec::new());
    };
    seq.iter()
        .map(|entry| {
            let Value::Mapping(entry_map) = entry else {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "plugin origin must be a mapping".to_string(),
                });
            };
            let origin = get_str(entry_map, "origin").ok_or_else(|| LoadError::InvalidData {
                provenance: provenance.clone(),
                message: "plugin origin is missing 'origin'".to_string(),
            })?;
            if !["core", "local", "pip"].contains(&origin.as_str()) {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: format!("plugin origin '{origin}' is not 'core', 'local' or 'pip'"),
                });
            }
            let sources = get_version_map(entry_map, "sources");
            let elements = get_version_map(entry_map, "elements");
            let path = get_str(entry_map, "path").map(PathBuf::from);
            let package_name = get_str(entry_map, "package-name");
            Ok(PluginOrigin {
                origin,
                sources,
                elements,
                path,
                package_name,
            })
        })
        .collect()
}

fn parse_artifacts(map: &serde_yaml::Mapping, provenance: &Provenance) -> Result<Vec<ArtifactRemote>> {
    let Some(seq) = get_sequence(map, "artifacts") else {
        return Ok(Vec::new());
    };
    seq.iter()
        .map(|entry| {
            let Value::Mapping(entry_map) = entry else {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "artifact remote must be a mapping".to_string(),
                });
            };
            let url = get_str(entry_map, "url").ok_or_else(|| LoadError::InvalidData {
                provenance: provenance.clone(),
                message: "artifact remote is missing 'url'".to_string(),
            })?;
            Ok(ArtifactRemote {
                url,
                push: entry_map
                    .get(Value::String("push".to_string()))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                server_cert: get_str(entry_map, "server-cert"),
                client_key: get_str(entry_map, "client-key"),
                client_cert: get_str(entry_map, "client-cert"),
                instance_name: get_str(entry_map, "instance-name"),
            })
        })
        .collect()
}

fn get_str(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(Value::String(key.to_string()))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn get_u64(map: &serde_yaml::Mapping, key: &str) -> Option<u64> {
    map.get(Value::String(key.to_string())).and_then(Value::as_u64)
}

fn get_mapping<'a>(map: &'a serde_yaml::Mapping, key: &str) -> Option<&'a serde_yaml::Mapping> {
    map.get(Value::String(key.to_string())).and_then(Value::as_mapping)
}

fn get_sequence<'a>(map: &'a serde_yaml::Mapping, key: &str) -> Option<&'a Vec<Value>> {
    map.get(Value::String(key.to_string())).and_then(Value::as_sequence)
}

fn get_version_map(map: &serde_yaml::Mapping, key: &str) -> BTreeMap<String, u64> {
    get_mapping(map, key)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| Some((k.as_str()?.to_string(), v.as_u64().unwrap_or(0))))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_project(dir: &Path, contents: &str) {
        let mut file = std::fs::File::create(dir.join(PROJECT_CONF)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_minimal_project() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path(), "name: hello\n");
        let project = Project::load(dir.path()).unwrap();
        assert_eq!(project.name, "hello");
        assert_eq!(project.element_path, dir.path().join("."));
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path(), "name: hello\nbogus: true\n");
        assert!(Project::load(dir.path()).is_err());
    }

    #[test]
    fn translate_url_expands_alias() {
        let dir = tempfile::tempdir().unwrap();
        write_project(
            dir.path(),
            "name: hello\naliases:\n  upstream: https://example.com/\n",
        );
        let project = Project::load(dir.path()).unwrap();
        assert_eq!(
            project.translate_url("upstream:repo.git"),
            "https://example.com/repo.git"
        );
    }

    #[test]
    fn locate_project_root_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path(), "name: hello\n");
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let found = locate_project_root(&nested).unwrap();
        assert_eq!(found, dir.path());
    }
}
