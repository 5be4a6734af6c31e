use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::BTreeSet;
use thiserror::Error;

pub const POLICY_VERSION: &str = "2012-10-17";
pub const ALL_RESOURCES: &str = "*";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("package name must not be empty")]
    EmptyPackageName,
    #[error("managed policy '{policy}' attached twice to group '{group}'")]
    DuplicateManagedPolicy { group: String, policy: String },
    #[error("stack id '{0}' declared twice")]
    DuplicateStackId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect { Allow, Deny }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    pub sid: String,
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

impl PolicyStatement {
    /// `Allow` over every resource, which is how all grants in this tool are scoped.
    pub fn allow_all(sid: &str, actions: &[&str]) -> Self {
        Self {
            sid: sid.to_string(),
            effect: Effect::Allow,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources: vec![ALL_RESOURCES.to_string()],
        }
    }

    pub fn to_json(&self) -> Json {
        json!({
            "Sid": self.sid,
            "Effect": match self.effect { Effect::Allow => "Allow", Effect::Deny => "Deny" },
            "Action": scalar_or_list(&self.actions),
            "Resource": scalar_or_list(&self.resources),
        })
    }
}

// IAM documents collapse one-element lists to a bare string.
fn scalar_or_list(items: &[String]) -> Json {
    match items {
        [one] => json!(one),
        many => json!(many),
    }
}

/// Builds an IAM policy document from statements, in order.
pub fn policy_document(statements: &[PolicyStatement]) -> Json {
    json!({
        "Version": POLICY_VERSION,
        "Statement": statements.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
    })
}

/// Reference to an AWS-managed policy by name; its content belongs to AWS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedPolicyRef(pub String);

impl ManagedPolicyRef {
    pub fn aws(name: &str) -> Self { Self(name.to_string()) }
    pub fn name(&self) -> &str { &self.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDefinition {
    name: String,
    managed_policies: Vec<ManagedPolicyRef>,
    statements: Vec<PolicyStatement>,
}

impl GroupDefinition {
    /// Managed policies keep declaration order; attaching the same one twice is an error.
    pub fn new(
        name: String,
        managed_policies: impl IntoIterator<Item = ManagedPolicyRef>,
        statements: Vec<PolicyStatement>,
    ) -> Result<Self, DefinitionError> {
        let mut seen = BTreeSet::new();
        let mut ordered = Vec::new();
        for p in managed_policies {
            if !seen.insert(p.clone()) {
                return Err(DefinitionError::DuplicateManagedPolicy { group: name, policy: p.0 });
            }
            ordered.push(p);
        }
        Ok(Self { name, managed_policies: ordered, statements })
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn managed_policies(&self) -> &[ManagedPolicyRef] { &self.managed_policies }
    pub fn statements(&self) -> &[PolicyStatement] { &self.statements }

    pub fn statement(&self, sid: &str) -> Option<&PolicyStatement> {
        self.statements.iter().find(|s| s.sid == sid)
    }

    pub fn policy_document(&self) -> Json { policy_document(&self.statements) }
}

pub fn group_name(package_name: &str, suffix: &str) -> String {
    format!("{package_name}-{suffix}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: Option<String>, region: Option<String>) -> Self { Self { account, region } }

    /// Resolves account and region from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let account = get("CDK_DEFAULT_ACCOUNT");
        let region = get("CDK_DEFAULT_REGION")
            .or_else(|| get("AWS_REGION"))
            .or_else(|| get("AWS_DEFAULT_REGION"));
        Self { account, region }
    }

    /// Fields set on `other` win.
    pub fn overlay(self, other: Environment) -> Self {
        Self {
            account: other.account.or(self.account),
            region: other.region.or(self.region),
        }
    }

    pub fn to_uri(&self) -> String {
        format!(
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region"),
        )
    }
}

#[derive(Debug, Clone)]
pub struct StackProps {
    pub package_name: String,
    pub environment: Environment,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDefinition {
    pub id: String,
    pub package_name: String,
    pub environment: Environment,
    pub description: String,
    pub groups: Vec<GroupDefinition>,
}

impl StackDefinition {
    pub fn group(&self, name: &str) -> Option<&GroupDefinition> {
        self.groups.iter().find(|g| g.name() == name)
    }
}

/// A unit of permissions that expands into one stack.
pub trait PermissionsDefinition {
    /// Short name used to address this definition from configuration.
    fn key(&self) -> &'static str;
    /// Appended to the package name to form the stack id.
    fn stack_suffix(&self) -> &'static str;
    fn default_description(&self, package_name: &str) -> String;
    fn groups(&self, package_name: &str) -> Result<Vec<GroupDefinition>, DefinitionError>;

    fn stack_id(&self, package_name: &str) -> String {
        format!("{package_name}-{}", self.stack_suffix())
    }

    fn build(&self, props: StackProps) -> Result<StackDefinition, DefinitionError> {
        if props.package_name.trim().is_empty() {
            return Err(DefinitionError::EmptyPackageName);
        }
        let groups = self.groups(&props.package_name)?;
        let description = props.description
            .unwrap_or_else(|| self.default_description(&props.package_name));
        Ok(StackDefinition {
            id: self.stack_id(&props.package_name),
            package_name: props.package_name,
            environment: props.environment,
            description,
            groups,
        })
    }
}

/// The set of stacks handed to synthesis.
#[derive(Debug, Clone, Default)]
pub struct App { stacks: Vec<StackDefinition> }

impl App {
    pub fn new() -> Self { Self::default() }

    pub fn add_stack(&mut self, stack: StackDefinition) -> Result<(), DefinitionError> {
        if self.stacks.iter().any(|s| s.id == stack.id) {
            return Err(DefinitionError::DuplicateStackId(stack.id));
        }
        tracing::debug!(stack = %stack.id, groups = stack.groups.len(), "stack added");
        self.stacks.push(stack);
        Ok(())
    }

    pub fn stacks(&self) -> &[StackDefinition] { &self.stacks }

    pub fn stack(&self, id: &str) -> Option<&StackDefinition> {
        self.stacks.iter().find(|s| s.id == id)
    }
}
