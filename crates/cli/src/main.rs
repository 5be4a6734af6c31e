use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::fmt::format::FmtSpan;

use iamsynth_aws::{compose, StackSelection};
use iamsynth_cfn as cfn;
use iamsynth_core::{App, Environment, StackDefinition};
use iamsynth_policy::Policy;

mod config;
use config::{FileConfig, Overrides, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about="iamsynth — IAM groups as CloudFormation")]
struct Cli {
    /// Config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory for synthesized templates
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    /// Which stacks to compose
    #[arg(long, value_enum, global = true)]
    stacks: Option<Stacks>,

    /// Prefix for stack and group names
    #[arg(long, global = true)]
    package_name: Option<String>,

    /// Target account (defaults to CDK_DEFAULT_ACCOUNT)
    #[arg(long, global = true)]
    account: Option<String>,

    /// Target region (defaults to CDK_DEFAULT_REGION, then AWS_REGION)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Debug logging
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum Stacks { All, Developers }

impl From<Stacks> for StackSelection {
    fn from(s: Stacks) -> Self {
        match s { Stacks::All => StackSelection::All, Stacks::Developers => StackSelection::Developers }
    }
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Validate and write templates plus manifest
    Synth,
    /// Print the ids of the selected stacks
    List,
    /// Print one stack's template
    Print { stack: String },
    /// Synthesize, then deploy with aws cloudformation
    Deploy { stack: Option<String> },
    /// Delete deployed stacks
    Destroy { stack: Option<String> },
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            package_name: self.package_name.clone(),
            stacks: self.stacks.map(Into::into),
            out: self.out.clone(),
            account: self.account.clone(),
            region: self.region.clone(),
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn selected<'a>(app: &'a App, id: Option<&str>) -> Result<Vec<&'a StackDefinition>> {
    match id {
        None => Ok(app.stacks().iter().collect()),
        Some(id) => {
            let s = app.stack(id).with_context(|| {
                let known: Vec<_> = app.stacks().iter().map(|s| s.id.as_str()).collect();
                format!("unknown stack '{id}' (known: {})", known.join(", "))
            })?;
            Ok(vec![s])
        }
    }
}

fn build(settings: &Settings) -> Result<App> {
    let app = compose(&settings.package_name, &settings.environment, settings.selection, &settings.descriptions)?;
    Policy::new()?.check_app(&app)?;
    Ok(app)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file = match &cli.config {
        Some(p) => FileConfig::load(p)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(file, Environment::from_env(), cli.overrides());
    let span = tracing::info_span!("iamsynth", package = %settings.package_name, env = %settings.environment.to_uri());
    let _g = span.enter();

    let app = build(&settings)?;

    match cli.cmd {
        Cmd::Synth => {
            let manifest = cfn::write_assembly(&app, &settings.out)?;
            tracing::info!(out = %settings.out.display(), stacks = manifest.stacks.len(), "synthesized");
        }
        Cmd::List => {
            for s in app.stacks() { println!("{}", s.id); }
        }
        Cmd::Print { stack } => {
            let s = selected(&app, Some(stack.as_str()))?[0];
            print!("{}", cfn::render_stack(s)?.to_json_string()?);
        }
        Cmd::Deploy { stack } => {
            let targets = selected(&app, stack.as_deref())?;
            cfn::write_assembly(&app, &settings.out)?;
            // deploy what is on disk, as listed by the assembly manifest
            let manifest = cfn::read_manifest(&settings.out)?;
            let aws = cfn::AwsCli::locate()?;
            for s in targets {
                let template = manifest.template_path(&settings.out, &s.id)?;
                aws.deploy_stack(&s.id, &template, s.environment.region.as_deref())?;
            }
        }
        Cmd::Destroy { stack } => {
            let targets = selected(&app, stack.as_deref())?;
            let aws = cfn::AwsCli::locate()?;
            for s in targets {
                aws.delete_stack(&s.id, s.environment.region.as_deref())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["iamsynth", "deploy", "--stacks", "developers", "--region", "eu-west-1"]).unwrap();
        let o = cli.overrides();
        assert_eq!(o.stacks, Some(StackSelection::Developers));
        assert_eq!(o.region.as_deref(), Some("eu-west-1"));
        assert!(matches!(cli.cmd, Cmd::Deploy { stack: None }));
    }

    #[test]
    fn unknown_stack_is_reported() {
        let s = Settings::resolve(FileConfig::default(), Environment::default(), Overrides::default());
        let app = build(&s).unwrap();
        assert_eq!(selected(&app, None).unwrap().len(), 2);
        let err = selected(&app, Some("Nope")).unwrap_err().to_string();
        assert!(err.starts_with("unknown stack 'Nope' (known: AWSMicroAccountDefaultIamSetup-DefaultDevelopersPermissionsStack"));
    }

    #[test]
    fn synth_via_settings_writes_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Overrides {
            stacks: Some(StackSelection::Developers),
            out: Some(dir.path().to_path_buf()),
            ..Overrides::default()
        };
        let s = Settings::resolve(FileConfig::default(), Environment::default(), cli);
        let manifest = cfn::write_assembly(&build(&s).unwrap(), &s.out).unwrap();
        assert_eq!(manifest.stacks.len(), 1);
        assert!(dir.path().join("manifest.json").is_file());
    }
}
