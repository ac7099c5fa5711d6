// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Default `Element` implementation driven by named command-list tables, grounded on
//! `buildelement.py`'s `_command_steps`/`_command_prefixes` table.
use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_yaml::Value;

use crate::element::Element;
use crate::error::{PluginError, Result};
use crate::sandbox::{RunFlags, Sandbox};

const COMMAND_STEPS: &[&str] = &[
    "bootstrap-commands",
    "configure-commands",
    "build-commands",
    "test-commands",
    "install-commands",
    "strip-commands",
];
const COMMAND_PREFIXES: &[&str] = &["pre-", "", "post-"];

pub const BUILD_ROOT: &str = "/buildstream/build";
pub const INSTALL_ROOT: &str = "/buildstream/install";

/// A default `Element` implementation: stages build commands at `/buildstream/build`, runs each
/// command group (with `pre-`/`post-` variants) in order, and exposes `/buildstream/install` as
/// the artifact root. Staging dependencies, staging sources, and running dependency integration
/// commands are the sandbox assembly pipeline's job, run around this element's calls.
pub struct BuildElement {
    commands: BTreeMap<String, Vec<String>>,
    environment: BTreeMap<String, String>,
}

impl BuildElement {
    pub fn new() -> Self {
        BuildElement {
            commands: BTreeMap::new(),
            environment: BTreeMap::new(),
        }
    }

    pub fn set_environment(&mut self, environment: BTreeMap<String, String>) {
        self.environment = environment;
    }

    fn command_name(step: &str, prefix: &str) -> String {
        format!("{prefix}{step}")
    }
}

impl Default for BuildElement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Element for BuildElement {
    fn configure(&mut self, node: &Value) -> Result<()> {
        self.commands.clear();
        for step in COMMAND_STEPS {
            for prefix in COMMAND_PREFIXES {
                let name = Self::command_name(step, prefix);
                let commands = node
                    .get(&name)
                    .and_then(Value::as_sequence)
                    .map(|seq| {
                        seq.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                self.commands.insert(name, commands);
            }
        }
        Ok(())
    }

    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    fn get_unique_key(&self) -> serde_json::Value {
        serde_json::to_value(&self.commands).unwrap_or(serde_json::Value::Null)
    }

    fn configure_sandbox(&self, sandbox: &mut dyn Sandbox) -> Result<()> {
        sandbox.mark_directory(BUILD_ROOT, Default::default())?;
        sandbox.mark_directory(INSTALL_ROOT, Default::default())?;
        Ok(())
    }

    fn stage(&self, _sandbox: &mut dyn Sandbox) -> Result<()> {
        // This element's own sources are staged by the sandbox assembly pipeline at `BUILD_ROOT`
        // before `assemble` runs; nothing element-specific remains to do here.
        Ok(())
    }

    async fn assemble(&self, sandbox: &mut dyn Sandbox) -> Result<String> {
        for step in COMMAND_STEPS {
            for prefix in COMMAND_PREFIXES {
                let name = Self::command_name(step, prefix);
                let Some(commands) = self.commands.get(&name) else {
                    continue;
                };
                for command in commands {
                    let argv = vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        "-e".to_string(),
                        format!("{command}\n"),
                    ];
                    let flags = RunFlags {
                        root_read_only: true,
                        ..Default::default()
                    };
                    let exit_code =
                        sandbox.run(&argv, flags, Some(BUILD_ROOT), &self.environment)?;
                    if exit_code != 0 {
                        return Err(PluginError::CommandFailed {
                            command: command.clone(),
                            exit_code,
                        });
                    }
                }
            }
        }
        Ok(INSTALL_ROOT.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    struct FakeSandbox {
        root: PathBuf,
        ran: Vec<String>,
    }

    impl Sandbox for FakeSandbox {
        fn mark_directory(&mut self, _path: &str, _flags: crate::sandbox::MountFlags) -> Result<()> {
            Ok(())
        }

        fn run(
            &mut self,
            argv: &[String],
            _flags: RunFlags,
            _cwd: Option<&str>,
            _env: &BTreeMap<String, String>,
        ) -> Result<i32> {
            self.ran.push(argv.join(" "));
            Ok(0)
        }

        fn host_root(&self) -> &Path {
            &self.root
        }
    }

    #[tokio::test]
    async fn runs_configured_commands_in_order() {
        let node: Value = serde_yaml::from_str(
            "configure-commands: [\"./configure\"]\nbuild-commands: [\"make\"]\ninstall-commands: [\"make install\"]\n",
        )
        .unwrap();
        let mut element = BuildElement::new();
        element.configure(&node).unwrap();

        let mut sandbox = FakeSandbox {
            root: PathBuf::from("/tmp"),
            ran: Vec::new(),
        };
        let output = element.assemble(&mut sandbox).await.unwrap();
        assert_eq!(output, INSTALL_ROOT);
        assert_eq!(sandbox.ran.len(), 3);
        assert!(sandbox.ran[0].contains("./configure"));
        assert!(sandbox.ran[2].contains("make install"));
    }

    #[tokio::test]
    async fn nonzero_exit_aborts_assembly() {
        struct FailingSandbox;
        impl Sandbox for FailingSandbox {
            fn mark_directory(&mut self, _path: &str, _flags: crate::sandbox::MountFlags) -> Result<()> {
                Ok(())
            }
            fn run(
                &mut self,
                _argv: &[String],
                _flags: RunFlags,
                _cwd: Option<&str>,
                _env: &BTreeMap<String, String>,
            ) -> Result<i32> {
                Ok(1)
            }
            fn host_root(&self) -> &Path {
                Path::new("/tmp")
            }
        }

        let node: Value = serde_yaml::from_str("build-commands: [\"make\"]\n").unwrap();
        let mut element = BuildElement::new();
        element.configure(&node).unwrap();
        let mut sandbox = FailingSandbox;
        assert!(element.assemble(&mut sandbox).await.is_err());
    }
}
