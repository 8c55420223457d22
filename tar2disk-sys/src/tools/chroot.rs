// SPDX-License-Identifier: GPL-3.0-only

//! Commands run inside the provisioned tree
//!
//! The environment is an explicit value rather than inherited from the host;
//! [`ChrootEnv::invocation`] serializes it into `env -i -C <root> K=V... chroot <root> ...`.

use std::collections::BTreeMap;
use std::path::Path;

use crate::cmd::Invocation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChrootEnv {
    vars: BTreeMap<String, String>,
}

impl Default for ChrootEnv {
    fn default() -> Self {
        let vars = [
            ("TERM", "linux"),
            ("USER", "root"),
            ("LOGNAME", "root"),
            ("SHELL", "/bin/sh"),
            ("LANG", "en_US.utf8"),
            ("LC_COLLATE", "C"),
            (
                "PATH",
                "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
            ),
            ("PWD", "/"),
            ("HOME", "/root"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
        Self { vars }
    }
}

impl ChrootEnv {
    /// Add or override one variable
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// `K=V` words, sorted by name
    pub fn assignments(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect()
    }

    /// Privileged invocation of `program` inside `root`
    pub fn invocation<I, S>(&self, root: &Path, program: &str, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.to_string_lossy();
        Invocation::admin("env")
            .args(["-i", "-C"])
            .arg(root.clone())
            .args(self.assignments())
            .arg("chroot")
            .arg(root)
            .arg(program)
            .args(args)
    }
}
