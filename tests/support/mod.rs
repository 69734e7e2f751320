#![allow(dead_code)]

use anyhow::{Context, Result, bail};
use profile_resolver::catalog::Control;
use profile_resolver::{Catalog, ProfileResolver, ResolverConfig, path_to_url};
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use url::Url;

pub const RESOURCE_UUID: &str = "8d1e3d2a-5c6b-4f1e-9a7d-2b3c4d5e6f70";

/// Scratch directory holding the documents of one test.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new().context("failed to allocate workspace")?,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `value` as JSON under `name`, creating parent directories.
    pub fn write(&self, name: &str, value: &Value) -> Result<PathBuf> {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&path, serde_json::to_vec_pretty(value)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    pub fn url(&self, name: &str) -> Result<Url> {
        path_to_url(&self.path(name))
    }
}

/// Resolve a profile on disk with the default configuration.
pub fn resolve(path: &Path) -> Result<Catalog> {
    ProfileResolver::new(ResolverConfig::default()).resolve_path(path)
}

/// group ac { ac-1 { ac-1.1 }, ac-2 }, group au { au-1 }
///
/// ac-1's statement inserts `ac-1_prm_1` and links to ac-2; `ac-1_prm_2` is
/// never referenced. ac-2's first parameter aggregates its second, and ac-2
/// cites the single back-matter resource. Role `admin` is referenced by a
/// responsible party, role `unused` by nothing.
pub fn sample_catalog() -> Value {
    json!({"catalog": {
        "uuid": "0b6b7a04-4c0a-4c1c-8f5e-3c1f1d1e2a01",
        "metadata": {
            "title": "Sample Catalog",
            "last-modified": "2024-01-01T00:00:00Z",
            "version": "1.0",
            "oscal-version": "1.1.2",
            "roles": [
                {"id": "admin", "title": "Administrator"},
                {"id": "unused", "title": "Unused"}
            ],
            "responsible-parties": [{"role-id": "admin", "party-uuids": []}]
        },
        "groups": [
            {
                "id": "ac",
                "title": "Access Control",
                "controls": [
                    {
                        "id": "ac-1",
                        "title": "Policy and Procedures",
                        "params": [
                            {"id": "ac-1_prm_1", "label": "frequency"},
                            {"id": "ac-1_prm_2", "label": "never used"}
                        ],
                        "parts": [{
                            "id": "ac-1_smt",
                            "name": "statement",
                            "prose": "Review the policy {{ insert: param, ac-1_prm_1 }}; see [AC-2](#ac-2)."
                        }],
                        "controls": [{"id": "ac-1.1", "title": "Policy Enhancement"}]
                    },
                    {
                        "id": "ac-2",
                        "title": "Account Management",
                        "params": [
                            {"id": "ac-2_prm_1", "props": [{"name": "aggregates", "value": "ac-2_prm_2"}]},
                            {"id": "ac-2_prm_2", "label": "account types"}
                        ],
                        "links": [{"href": format!("#{RESOURCE_UUID}"), "rel": "reference"}],
                        "parts": [{
                            "id": "ac-2_smt",
                            "name": "statement",
                            "prose": "Manage {{ insert: param, ac-2_prm_1 }}."
                        }]
                    }
                ]
            },
            {
                "id": "au",
                "title": "Audit and Accountability",
                "controls": [{"id": "au-1", "title": "Audit Policy"}]
            }
        ],
        "back-matter": {"resources": [
            {"uuid": RESOURCE_UUID, "title": "Account guidance"}
        ]}
    }})
}

/// A second catalog sharing role `admin` with a different title.
pub fn second_catalog() -> Value {
    json!({"catalog": {
        "uuid": "0b6b7a04-4c0a-4c1c-8f5e-3c1f1d1e2a02",
        "metadata": {
            "title": "Second Catalog",
            "oscal-version": "1.0.4",
            "roles": [{"id": "admin", "title": "Administrator (second)"}],
            "responsible-parties": [{"role-id": "admin", "party-uuids": []}]
        },
        "controls": [{"id": "sc-1", "title": "System Protection"}]
    }})
}

/// Profile document with the given imports and extra top-level members.
pub fn profile(imports: Value, extra: Value) -> Value {
    let mut body = json!({
        "uuid": "6f0c2b8e-2f0a-4b5e-9a61-1b2c3d4e5f60",
        "metadata": {"title": "Sample Baseline", "version": "2.0", "oscal-version": "1.1.2"},
        "imports": imports
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            body.insert(key.clone(), value.clone());
        }
    }
    json!({"profile": body})
}

pub fn control_ids(controls: &[Control]) -> Vec<&str> {
    controls.iter().map(|control| control.id.as_str()).collect()
}

/// Depth-first search for a control anywhere in the catalog.
pub fn find_control<'c>(catalog: &'c Catalog, id: &str) -> Option<&'c Control> {
    fn search<'c>(controls: &'c [Control], id: &str) -> Option<&'c Control> {
        controls.iter().find_map(|control| {
            if control.id == id {
                Some(control)
            } else {
                search(&control.controls, id)
            }
        })
    }

    search(&catalog.controls, id).or_else(|| {
        let mut groups: Vec<_> = catalog.groups.iter().collect();
        while let Some(group) = groups.pop() {
            if let Some(found) = search(&group.controls, id) {
                return Some(found);
            }
            groups.extend(group.groups.iter());
        }
        None
    })
}

pub fn resolver_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_resolve-profile"))
}

pub fn run_command(mut cmd: Command) -> Result<Output> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to run command: {:?}", cmd))?;
    if output.status.success() {
        Ok(output)
    } else {
        bail!(
            "command {:?} failed: status {:?}\nstdout: {}\nstderr: {}",
            cmd,
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    }
}
