use iamsynth_core::{
    group_name, App, DefinitionError, Environment, GroupDefinition, ManagedPolicyRef,
    PermissionsDefinition, PolicyStatement, StackProps,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PACKAGE_NAME: &str = "AWSMicroAccountDefaultIamSetup";

pub const READ_ONLY_ACCESS: &str = "ReadOnlyAccess";
pub const VPC_FULL_ACCESS: &str = "AmazonVPCFullAccess";
pub const CLOUDFORMATION_FULL_ACCESS: &str = "AWSCloudFormationFullAccess";

/// Inline grants of the Developers group, one entry per service area.
/// Order is emission order and follows the grant order of the deployed
/// stacks, so redeploying does not reshuffle the policy document.
pub const DEVELOPER_STATEMENTS: &[(&str, &[&str])] = &[
    ("IamAccess", &["iam:ChangePassword", "iam:PassRole"]),
    ("PipelineAccess", &["codepipeline:*"]),
    ("CodeBuildAccess", &["codebuild:*"]),
    ("S3Access", &["s3:Create*", "s3:List*", "s3:SetBucketEncryption", "s3:Put*", "s3:Get*"]),
    ("CloudwatchPermissions", &[
        "logs:Get*", "logs:Describe*", "logs:Create*", "logs:Put*",
        "cloudwatch:Describe*", "cloudwatch:PutMetricAlarm",
    ]),
    ("Ec2Permissions", &["ec2:Get*", "ec2:Describe*", "ec2:Create*", "ec2:RunInstances"]),
    ("EcrAccess", &[
        "ecr:Create*", "ecr:Get*", "ecr:Put*", "ecr:Describe*",
        "ecr:InitiateLayerUpload", "ecr:UploadLayerPart", "ecr:CompleteLayerUpload",
        "ecr:BatchCheckLayerAvailability", "ecr:SetRepositoryPolicy",
    ]),
    ("SecretsManagerPermissions", &[
        "secretsmanager:Get*", "secretsmanager:List*", "secretsmanager:Describe*", "secretsmanager:Create*",
    ]),
    ("ElasticLoadBalancingPermissions", &["elasticloadbalancing:*"]),
    ("SqsPermissions", &[
        "sqs:Get*", "sqs:Change*", "sqs:List*", "sqs:AddPermission",
        "sqs:SetQueueAttributes", "sqs:CreateQueue",
    ]),
    ("RdsPermissions", &[
        "rds:Create*", "rds:Describe*", "rds:ModifyDBCluster", "rds:ModifyDBClusterParameterGroup",
        "rds:ModifyDBInstance", "rds:ModifyDBParameterGroup", "rds:ModifyEventSubscription",
    ]),
    ("KmsPermissions", &[
        "kms:Describe*", "kms:Create*", "kms:Enable*", "kms:Get*", "kms:Put*",
        "kms:Generate*", "kms:Encrypt*", "kms:Decrypt*", "kms:Update*",
    ]),
    ("AcmPermissions", &["acm:Add*", "acm:Get*", "acm:List*", "acm:Describe*", "acm:Import*"]),
    ("SystemsManagerPermissions", &["ssm:Get*", "ssm:Describe*", "ssm:Create*", "ssm:Put*"]),
];

/// Everything a developer needs to run the delivery pipeline by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeveloperPermissions;

impl DeveloperPermissions {
    pub const GROUP_SUFFIX: &'static str = "DevelopersGroup";

    pub fn managed_policies() -> Vec<ManagedPolicyRef> {
        [READ_ONLY_ACCESS, VPC_FULL_ACCESS, CLOUDFORMATION_FULL_ACCESS]
            .into_iter()
            .map(ManagedPolicyRef::aws)
            .collect()
    }

    pub fn statements() -> Vec<PolicyStatement> {
        DEVELOPER_STATEMENTS.iter()
            .map(|(sid, actions)| PolicyStatement::allow_all(sid, actions))
            .collect()
    }
}

impl PermissionsDefinition for DeveloperPermissions {
    fn key(&self) -> &'static str { "developers" }
    fn stack_suffix(&self) -> &'static str { "DefaultDevelopersPermissionsStack" }

    fn default_description(&self, package_name: &str) -> String {
        format!("The default developers IAM permissions setup by {package_name}.")
    }

    fn groups(&self, package_name: &str) -> Result<Vec<GroupDefinition>, DefinitionError> {
        let group = GroupDefinition::new(
            group_name(package_name, Self::GROUP_SUFFIX),
            Self::managed_policies(),
            Self::statements(),
        )?;
        Ok(vec![group])
    }
}

/// Read access through the AWS-managed policy only. Teams that want to hide
/// some services start here and narrow it down.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyPermissions;

impl ReadOnlyPermissions {
    pub const GROUP_SUFFIX: &'static str = "ReadOnlyGroup";
}

impl PermissionsDefinition for ReadOnlyPermissions {
    fn key(&self) -> &'static str { "readonly" }
    fn stack_suffix(&self) -> &'static str { "ReadOnlyGroupPermissionsStack" }

    fn default_description(&self, package_name: &str) -> String {
        format!("The ReadOnlyGroup IAM permissions setup by {package_name}.")
    }

    fn groups(&self, package_name: &str) -> Result<Vec<GroupDefinition>, DefinitionError> {
        let group = GroupDefinition::new(
            group_name(package_name, Self::GROUP_SUFFIX),
            [ManagedPolicyRef::aws(READ_ONLY_ACCESS)],
            Vec::new(),
        )?;
        Ok(vec![group])
    }
}

/// Which stacks an app is composed of.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackSelection {
    #[default]
    All,
    Developers,
}

impl StackSelection {
    pub fn definitions(self) -> Vec<Box<dyn PermissionsDefinition>> {
        match self {
            StackSelection::All => vec![Box::new(DeveloperPermissions), Box::new(ReadOnlyPermissions)],
            StackSelection::Developers => vec![Box::new(DeveloperPermissions)],
        }
    }
}

/// Per-stack description overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Descriptions {
    #[serde(default)]
    pub developers: Option<String>,
    #[serde(default)]
    pub readonly: Option<String>,
}

impl Descriptions {
    /// Override for the definition with the given key, if any.
    pub fn for_key(&self, key: &str) -> Option<&str> {
        match key {
            "developers" => self.developers.as_deref(),
            "readonly" => self.readonly.as_deref(),
            _ => None,
        }
    }
}

/// Builds the selected stacks under one package name and environment.
pub fn compose(
    package_name: &str,
    environment: &Environment,
    selection: StackSelection,
    descriptions: &Descriptions,
) -> Result<App, DefinitionError> {
    let mut app = App::new();
    for def in selection.definitions() {
        let stack = def.build(StackProps {
            package_name: package_name.to_string(),
            environment: environment.clone(),
            description: descriptions.for_key(def.key()).map(str::to_string),
        })?;
        app.add_stack(stack)?;
    }
    tracing::info!(package = package_name, selection = ?selection, stacks = app.stacks().len(), "composed app");
    Ok(app)
}
