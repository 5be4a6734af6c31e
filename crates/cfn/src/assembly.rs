use anyhow::{Context, Result};
use iamsynth_core::App;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::template::render_stack;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all="camelCase")]
pub struct ManifestStack {
    pub template_file: String,
    pub environment: String,
    pub description: String,
}

/// Index of a synthesized output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub stacks: BTreeMap<String, ManifestStack>,
}

impl Manifest {
    /// Location of a stack's template inside the assembly at `out`.
    pub fn template_path(&self, out: &Path, stack_id: &str) -> Result<PathBuf> {
        let entry = self.stacks.get(stack_id)
            .with_context(|| format!("stack '{stack_id}' missing from manifest"))?;
        Ok(out.join(&entry.template_file))
    }
}

pub fn template_file_name(stack_id: &str) -> String {
    format!("{stack_id}.template.json")
}

/// Renders every stack of `app` and writes templates plus manifest under `out`.
pub fn write_assembly(app: &App, out: &Path) -> Result<Manifest> {
    std::fs::create_dir_all(out).with_context(|| format!("create {}", out.display()))?;
    let mut stacks = BTreeMap::new();
    for stack in app.stacks() {
        let file = template_file_name(&stack.id);
        let body = render_stack(stack)?.to_json_string()?;
        std::fs::write(out.join(&file), body).with_context(|| format!("write {file}"))?;
        tracing::info!(stack = %stack.id, file = %file, "template written");
        stacks.insert(stack.id.clone(), ManifestStack {
            template_file: file,
            environment: stack.environment.to_uri(),
            description: stack.description.clone(),
        });
    }
    let manifest = Manifest { version: MANIFEST_VERSION.to_string(), stacks };
    let mut s = serde_json::to_string_pretty(&manifest)?;
    s.push('\n');
    std::fs::write(out.join(MANIFEST_FILE), s).context("write manifest")?;
    Ok(manifest)
}

pub fn read_manifest(out: &Path) -> Result<Manifest> {
    let p = out.join(MANIFEST_FILE);
    let bytes = std::fs::read(&p).with_context(|| format!("read {}", p.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", p.display()))
}
