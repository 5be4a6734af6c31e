use anyhow::{Context, Result};
use iamsynth_core::{GroupDefinition, ManagedPolicyRef, StackDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as Json};
use std::collections::BTreeMap;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnResource {
    #[serde(rename="Type")]
    pub type_name: String,
    #[serde(rename="Properties", default, skip_serializing_if="JsonMap::is_empty")]
    pub properties: JsonMap<String, Json>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CfnTemplate {
    #[serde(rename="AWSTemplateFormatVersion", skip_serializing_if="Option::is_none")]
    pub version: Option<String>,
    #[serde(rename="Description", skip_serializing_if="Option::is_none")]
    pub description: Option<String>,
    #[serde(rename="Resources")]
    pub resources: BTreeMap<String, CfnResource>,
}

impl CfnTemplate {
    /// Pretty JSON with a trailing newline; stable across runs.
    pub fn to_json_string(&self) -> Result<String> {
        let mut s = serde_json::to_string_pretty(self).context("serialize template")?;
        s.push('\n');
        Ok(s)
    }
}

/// CloudFormation logical ids are alphanumeric only.
pub fn logical_id(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Partition-aware ARN of an AWS-managed policy.
pub fn managed_policy_arn(p: &ManagedPolicyRef) -> Json {
    json!({
        "Fn::Join": ["", ["arn:", { "Ref": "AWS::Partition" }, format!(":iam::aws:policy/{}", p.name())]]
    })
}

fn group_resources(g: &GroupDefinition) -> Vec<(String, CfnResource)> {
    let id = logical_id(g.name());
    let mut props = JsonMap::new();
    props.insert("GroupName".into(), json!(g.name()));
    if !g.managed_policies().is_empty() {
        let arns: Vec<Json> = g.managed_policies().iter().map(managed_policy_arn).collect();
        props.insert("ManagedPolicyArns".into(), Json::Array(arns));
    }
    let mut out = vec![(id.clone(), CfnResource { type_name: "AWS::IAM::Group".into(), properties: props })];

    if !g.statements().is_empty() {
        let policy_id = format!("{id}DefaultPolicy");
        let mut props = JsonMap::new();
        props.insert("PolicyName".into(), json!(policy_id));
        props.insert("PolicyDocument".into(), g.policy_document());
        props.insert("Groups".into(), json!([{ "Ref": id }]));
        out.push((policy_id, CfnResource { type_name: "AWS::IAM::Policy".into(), properties: props }));
    }
    out
}

pub fn render_stack(stack: &StackDefinition) -> Result<CfnTemplate> {
    let mut resources = BTreeMap::new();
    for g in &stack.groups {
        for (id, res) in group_resources(g) {
            if resources.insert(id.clone(), res).is_some() {
                anyhow::bail!("stack '{}': logical id '{}' produced twice (group '{}')", stack.id, id, g.name());
            }
        }
    }
    tracing::debug!(stack = %stack.id, resources = resources.len(), "rendered template");
    Ok(CfnTemplate {
        version: Some(TEMPLATE_FORMAT_VERSION.to_string()),
        description: Some(stack.description.clone()),
        resources,
    })
}
