use iamsynth_core::{App, GroupDefinition, StackDefinition};
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// IAM quota on managed policies attached to one principal.
pub const MAX_MANAGED_POLICIES: usize = 10;
/// IAM quota on the inline policy size of a group, whitespace excluded.
pub const MAX_GROUP_INLINE_POLICY_CHARS: usize = 5120;
pub const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    StackId,
    GroupName,
    ManagedPolicyCount,
    Sid,
    Action,
    EmptyStatement,
    InlinePolicySize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub stack: String,
    pub group: Option<String>,
    pub rule: Rule,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(g) => write!(f, "{}/{}: {}", self.stack, g, self.message),
            None => write!(f, "{}: {}", self.stack, self.message),
        }
    }
}

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("{} policy violation(s):\n{}", .0.len(), render(.0))]
    Violations(Vec<Violation>),
}

fn render(vs: &[Violation]) -> String {
    vs.iter().map(|v| format!("  - {v}")).collect::<Vec<_>>().join("\n")
}

/// Synthesis-time checks mirroring the limits IAM and CloudFormation enforce at deploy time.
pub struct Policy {
    pub max_managed_policies: usize,
    pub max_inline_policy_chars: usize,
    sid: Regex,
    action: Regex,
    group_name: Regex,
    stack_id: Regex,
}

impl Policy {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            max_managed_policies: MAX_MANAGED_POLICIES,
            max_inline_policy_chars: MAX_GROUP_INLINE_POLICY_CHARS,
            sid: Regex::new(r"^[A-Za-z0-9]+$")?,
            action: Regex::new(r"^(\*|[a-z0-9-]+:[A-Za-z0-9*]+)$")?,
            group_name: Regex::new(r"^[\w+=,.@-]+$")?,
            stack_id: Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$")?,
        })
    }

    pub fn check_app(&self, app: &App) -> Result<(), PolicyError> {
        let mut out = Vec::new();
        for stack in app.stacks() {
            out.extend(self.check_stack(stack));
        }
        if out.is_empty() {
            tracing::debug!(stacks = app.stacks().len(), "policy checks passed");
            Ok(())
        } else {
            for v in &out { tracing::warn!(stack = %v.stack, rule = ?v.rule, "{}", v.message); }
            Err(PolicyError::Violations(out))
        }
    }

    pub fn check_stack(&self, stack: &StackDefinition) -> Vec<Violation> {
        let mut out = Vec::new();
        if stack.id.len() > MAX_NAME_LEN || !self.stack_id.is_match(&stack.id) {
            out.push(Violation {
                stack: stack.id.clone(),
                group: None,
                rule: Rule::StackId,
                message: format!("stack id '{}' must start with a letter, use [A-Za-z0-9-] and be at most {MAX_NAME_LEN} chars", stack.id),
            });
        }
        for g in &stack.groups {
            self.check_group(&stack.id, g, &mut out);
        }
        out
    }

    fn check_group(&self, stack: &str, g: &GroupDefinition, out: &mut Vec<Violation>) {
        let mut push = |rule: Rule, message: String| out.push(Violation {
            stack: stack.to_string(),
            group: Some(g.name().to_string()),
            rule,
            message,
        });

        if g.name().len() > MAX_NAME_LEN || !self.group_name.is_match(g.name()) {
            push(Rule::GroupName, format!("group name '{}' is not a valid IAM name", g.name()));
        }
        let n = g.managed_policies().len();
        if n > self.max_managed_policies {
            push(Rule::ManagedPolicyCount, format!("{n} managed policies attached, limit is {}", self.max_managed_policies));
        }

        let mut sids = BTreeSet::new();
        for s in g.statements() {
            if !self.sid.is_match(&s.sid) {
                push(Rule::Sid, format!("sid '{}' must be alphanumeric", s.sid));
            }
            if !sids.insert(s.sid.as_str()) {
                push(Rule::Sid, format!("sid '{}' used more than once", s.sid));
            }
            if s.actions.is_empty() || s.resources.is_empty() {
                push(Rule::EmptyStatement, format!("statement '{}' needs at least one action and one resource", s.sid));
            }
            for a in s.actions.iter().filter(|a| !self.action.is_match(a)) {
                push(Rule::Action, format!("statement '{}': '{a}' is not of the form service:Action", s.sid));
            }
        }

        if !g.statements().is_empty() {
            let size = serde_json::to_string(&g.policy_document())
                .map(|s| s.chars().filter(|c| !c.is_whitespace()).count())
                .unwrap_or(usize::MAX);
            if size > self.max_inline_policy_chars {
                push(Rule::InlinePolicySize, format!("inline policy is {size} chars, limit is {}", self.max_inline_policy_chars));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamsynth_aws::{compose, Descriptions, StackSelection, DEFAULT_PACKAGE_NAME};
    use iamsynth_core::{Environment, ManagedPolicyRef, PolicyStatement};

    fn stack_with(group: GroupDefinition) -> StackDefinition {
        StackDefinition {
            id: "Pkg-TestStack".into(),
            package_name: "Pkg".into(),
            environment: Environment::default(),
            description: "test".into(),
            groups: vec![group],
        }
    }

    fn rules(vs: &[Violation]) -> Vec<Rule> { vs.iter().map(|v| v.rule).collect() }

    #[test]
    fn default_app_passes() {
        let app = compose(DEFAULT_PACKAGE_NAME, &Environment::default(), StackSelection::All, &Descriptions::default()).unwrap();
        Policy::new().unwrap().check_app(&app).unwrap();
    }

    #[test]
    fn eleven_managed_policies_fail() {
        let refs = (0..11).map(|i| ManagedPolicyRef::aws(&format!("Policy{i}")));
        let g = GroupDefinition::new("Pkg-Group".into(), refs, vec![]).unwrap();
        let vs = Policy::new().unwrap().check_stack(&stack_with(g));
        assert_eq!(rules(&vs), [Rule::ManagedPolicyCount]);
        assert_eq!(vs[0].to_string(), "Pkg-TestStack/Pkg-Group: 11 managed policies attached, limit is 10");
    }

    #[test]
    fn ten_managed_policies_pass() {
        let refs = (0..10).map(|i| ManagedPolicyRef::aws(&format!("Policy{i}")));
        let g = GroupDefinition::new("Pkg-Group".into(), refs, vec![]).unwrap();
        assert!(Policy::new().unwrap().check_stack(&stack_with(g)).is_empty());
    }

    #[test]
    fn malformed_statements_are_all_reported() {
        let stmts = vec![
            PolicyStatement::allow_all("Bad-Sid", &["s3:Get*"]),
            PolicyStatement::allow_all("Dup", &["s3 Get"]),
            PolicyStatement::allow_all("Dup", &[]),
        ];
        let g = GroupDefinition::new("Pkg-Group".into(), [], stmts).unwrap();
        let vs = Policy::new().unwrap().check_stack(&stack_with(g));
        assert_eq!(rules(&vs), [Rule::Sid, Rule::Action, Rule::Sid, Rule::EmptyStatement]);
    }

    #[test]
    fn wildcard_actions_are_accepted() {
        let stmts = vec![PolicyStatement::allow_all("All", &["*", "codebuild:*", "kms:Encrypt*"])];
        let g = GroupDefinition::new("Pkg-Group".into(), [], stmts).unwrap();
        assert!(Policy::new().unwrap().check_stack(&stack_with(g)).is_empty());
    }

    #[test]
    fn oversized_inline_policy_fails() {
        let actions: Vec<String> = (0..400).map(|i| format!("ec2:DescribeThing{i}")).collect();
        let refs: Vec<&str> = actions.iter().map(String::as_str).collect();
        let g = GroupDefinition::new("Pkg-Group".into(), [], vec![PolicyStatement::allow_all("Big", &refs)]).unwrap();
        let vs = Policy::new().unwrap().check_stack(&stack_with(g));
        assert_eq!(rules(&vs), [Rule::InlinePolicySize]);
    }

    #[test]
    fn bad_names_fail() {
        let g = GroupDefinition::new("Pkg Group".into(), [], vec![]).unwrap();
        let mut stack = stack_with(g);
        stack.id = "1-stack".into();
        let err = Policy::new().unwrap().check_stack(&stack);
        assert_eq!(rules(&err), [Rule::StackId, Rule::GroupName]);
    }

    #[test]
    fn error_lists_every_violation() {
        let mut app = App::new();
        let g = GroupDefinition::new("Pkg Group".into(), [], vec![]).unwrap();
        app.add_stack(stack_with(g)).unwrap();
        let err = Policy::new().unwrap().check_app(&app).unwrap_err();
        assert!(err.to_string().starts_with("1 policy violation(s):\n  - Pkg-TestStack/Pkg Group:"));
    }
}
