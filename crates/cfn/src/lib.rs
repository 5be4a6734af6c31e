use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub mod assembly;
pub mod template;

pub use assembly::{read_manifest, template_file_name, write_assembly, Manifest, ManifestStack};
pub use template::{render_stack, CfnResource, CfnTemplate};

/// Hands templates to `aws cloudformation`; diffing, rollback and the actual
/// IAM calls happen on the CloudFormation side.
#[derive(Debug, Clone)]
pub struct AwsCli { bin: PathBuf }

impl AwsCli {
    pub fn locate() -> Result<Self> {
        let bin = which::which("aws").context("aws cli not found in PATH")?;
        Ok(Self { bin })
    }

    pub fn deploy_stack(&self, stack_name: &str, template_file: &Path, region: Option<&str>) -> Result<()> {
        tracing::info!(stack = stack_name, template = %template_file.display(), "cloudformation deploy");
        self.run(deploy_args(stack_name, template_file, region), "cloudformation deploy")
    }

    pub fn delete_stack(&self, stack_name: &str, region: Option<&str>) -> Result<()> {
        tracing::info!(stack = stack_name, "cloudformation delete-stack");
        self.run(delete_args(stack_name, region), "cloudformation delete-stack")
    }

    fn run(&self, args: Vec<OsString>, what: &str) -> Result<()> {
        let st = Command::new(&self.bin).args(args)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("spawn aws {what}"))?;
        if !st.success() { anyhow::bail!("{what} failed ({st})") }
        Ok(())
    }
}

pub fn deploy_args(stack_name: &str, template_file: &Path, region: Option<&str>) -> Vec<OsString> {
    let mut a: Vec<OsString> = ["cloudformation", "deploy", "--stack-name", stack_name, "--template-file"]
        .into_iter().map(OsString::from).collect();
    a.push(template_file.as_os_str().to_owned());
    a.extend(["--capabilities", "CAPABILITY_NAMED_IAM", "--no-fail-on-empty-changeset"].map(OsString::from));
    push_region(&mut a, region);
    a
}

pub fn delete_args(stack_name: &str, region: Option<&str>) -> Vec<OsString> {
    let mut a: Vec<OsString> = ["cloudformation", "delete-stack", "--stack-name", stack_name]
        .into_iter().map(OsString::from).collect();
    push_region(&mut a, region);
    a
}

fn push_region(a: &mut Vec<OsString>, region: Option<&str>) {
    if let Some(r) = region {
        a.push("--region".into());
        a.push(r.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_args_carry_iam_capability() {
        let a = deploy_args("S", Path::new("out/S.template.json"), Some("eu-west-1"));
        let a: Vec<_> = a.iter().map(|s| s.to_string_lossy().into_owned()).collect();
        assert_eq!(a, [
            "cloudformation", "deploy", "--stack-name", "S", "--template-file", "out/S.template.json",
            "--capabilities", "CAPABILITY_NAMED_IAM", "--no-fail-on-empty-changeset", "--region", "eu-west-1",
        ]);
    }

    #[test]
    fn delete_args_without_region() {
        let a: Vec<_> = delete_args("S", None).iter().map(|s| s.to_string_lossy().into_owned()).collect();
        assert_eq!(a, ["cloudformation", "delete-stack", "--stack-name", "S"]);
    }
}
