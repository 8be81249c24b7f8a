//! Authorization overlay
//!
//! Every read and write is checked against the caller's own rights in the
//! cluster, not the engine's. Denials surface as `PermissionDenied`, never
//! as `NotFound`, so callers cannot discover objects they may not see.

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes as ReviewAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use kube::Client;
use kube::api::{Api, PostParams};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{KubeError, Result};
use crate::resources::{API_GROUP, PLURAL};

/// An already authenticated identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user: String,
    pub groups: Vec<String>,
}

impl Caller {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Watch,
    Create,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    HelmRepositories,
    Secrets,
}

impl Resource {
    pub fn group(&self) -> &'static str {
        match self {
            Resource::HelmRepositories => API_GROUP,
            Resource::Secrets => "",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            Resource::HelmRepositories => PLURAL,
            Resource::Secrets => "secrets",
        }
    }
}

/// What is being asked for; `namespace: None` means cluster-wide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAttributes {
    pub verb: Verb,
    pub resource: Resource,
    pub namespace: Option<String>,
}

impl ResourceAttributes {
    pub fn new(verb: Verb, resource: Resource, namespace: Option<&str>) -> Self {
        Self {
            verb,
            resource,
            namespace: namespace.map(str::to_string),
        }
    }
}

/// Answers "may this caller do that?"
#[async_trait]
pub trait AccessReviewer: Send + Sync {
    async fn allowed(&self, caller: &Caller, attributes: &ResourceAttributes) -> Result<bool>;
}

/// Reviewer backed by `SubjectAccessReview`
pub struct KubeAccessReviewer {
    client: Client,
}

impl KubeAccessReviewer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AccessReviewer for KubeAccessReviewer {
    async fn allowed(&self, caller: &Caller, attributes: &ResourceAttributes) -> Result<bool> {
        let review = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: Some(caller.user.clone()),
                groups: (!caller.groups.is_empty()).then(|| caller.groups.clone()),
                resource_attributes: Some(ReviewAttributes {
                    group: Some(attributes.resource.group().to_string()),
                    resource: Some(attributes.resource.plural().to_string()),
                    verb: Some(attributes.verb.as_str().to_string()),
                    namespace: attributes.namespace.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let result = api.create(&PostParams::default(), &review).await?;
        Ok(result.status.map(|s| s.allowed).unwrap_or(false))
    }
}

/// One grant in a `StaticAccessReviewer`
#[derive(Debug, Clone, Default)]
pub struct AccessRule {
    /// `None` matches any user
    pub user: Option<String>,
    /// Matches when the caller is in this group
    pub group: Option<String>,
    pub verbs: Vec<Verb>,
    pub resources: Vec<Resource>,
    /// `None` grants cluster-wide, which includes every namespace
    pub namespaces: Option<Vec<String>>,
}

impl AccessRule {
    pub fn for_user(user: &str) -> Self {
        Self {
            user: Some(user.to_string()),
            ..Default::default()
        }
    }

    pub fn for_group(group: &str) -> Self {
        Self {
            group: Some(group.to_string()),
            ..Default::default()
        }
    }

    pub fn verbs(mut self, verbs: &[Verb]) -> Self {
        self.verbs = verbs.to_vec();
        self
    }

    pub fn resources(mut self, resources: &[Resource]) -> Self {
        self.resources = resources.to_vec();
        self
    }

    pub fn in_namespaces(mut self, namespaces: &[&str]) -> Self {
        self.namespaces = Some(namespaces.iter().map(|n| n.to_string()).collect());
        self
    }

    fn matches(&self, caller: &Caller, attributes: &ResourceAttributes) -> bool {
        let subject = match (&self.user, &self.group) {
            (Some(user), _) if *user == caller.user => true,
            (_, Some(group)) if caller.groups.contains(group) => true,
            (None, None) => true,
            _ => false,
        };
        let scope = match (&self.namespaces, &attributes.namespace) {
            (None, _) => true,
            (Some(allowed), Some(ns)) => allowed.contains(ns),
            (Some(_), None) => false,
        };
        subject
            && scope
            && self.verbs.contains(&attributes.verb)
            && self.resources.contains(&attributes.resource)
    }
}

/// Reviewer evaluating an explicit rule list, for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct StaticAccessReviewer {
    rules: Vec<AccessRule>,
}

impl StaticAccessReviewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow everything to everyone
    pub fn permissive() -> Self {
        Self::new().allow(AccessRule {
            verbs: vec![
                Verb::Get,
                Verb::List,
                Verb::Watch,
                Verb::Create,
                Verb::Update,
                Verb::Delete,
            ],
            resources: vec![Resource::HelmRepositories, Resource::Secrets],
            ..Default::default()
        })
    }

    pub fn allow(mut self, rule: AccessRule) -> Self {
        self.rules.push(rule);
        self
    }
}

#[async_trait]
impl AccessReviewer for StaticAccessReviewer {
    async fn allowed(&self, caller: &Caller, attributes: &ResourceAttributes) -> Result<bool> {
        Ok(self.rules.iter().any(|r| r.matches(caller, attributes)))
    }
}

/// Where a caller may list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    AllNamespaces,
    Namespaces(BTreeSet<String>),
}

impl ListScope {
    pub fn includes(&self, namespace: &str) -> bool {
        match self {
            ListScope::AllNamespaces => true,
            ListScope::Namespaces(set) => set.contains(namespace),
        }
    }
}

/// Permission checks used by the service
#[derive(Clone)]
pub struct Authorizer {
    reviewer: Arc<dyn AccessReviewer>,
}

impl Authorizer {
    pub fn new(reviewer: Arc<dyn AccessReviewer>) -> Self {
        Self { reviewer }
    }

    /// `Ok(())` when allowed, `PermissionDenied` otherwise
    pub async fn check(
        &self,
        caller: &Caller,
        namespace: Option<&str>,
        resource: Resource,
        verb: Verb,
    ) -> Result<()> {
        let attributes = ResourceAttributes::new(verb, resource, namespace);
        if self.reviewer.allowed(caller, &attributes).await? {
            return Ok(());
        }
        tracing::debug!(
            user = %caller.user,
            verb = verb.as_str(),
            resource = resource.plural(),
            namespace = namespace.unwrap_or("*"),
            "access denied"
        );
        Err(KubeError::PermissionDenied {
            verb: verb.to_string(),
            resource: resource.plural().to_string(),
            scope: match namespace {
                Some(ns) => format!("namespace '{}'", ns),
                None => "all namespaces".to_string(),
            },
        })
    }

    /// Whether the caller may read secrets in `namespace`, or in every
    /// namespace when `namespace` is `None`
    ///
    /// Review failures count as "no".
    pub async fn can_read_secrets(&self, caller: &Caller, namespace: Option<&str>) -> bool {
        let attributes = ResourceAttributes::new(Verb::Get, Resource::Secrets, namespace);
        match self.reviewer.allowed(caller, &attributes).await {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(user = %caller.user, ?namespace, "secret access review failed: {}", e);
                false
            }
        }
    }

    /// Resolve where `caller` may list `resource`
    ///
    /// A namespace-scoped request without rights is `PermissionDenied`. A
    /// cluster-wide request narrows to the `candidates` the caller may list,
    /// possibly none.
    pub async fn list_scope(
        &self,
        caller: &Caller,
        namespace: Option<&str>,
        resource: Resource,
        candidates: impl IntoIterator<Item = String>,
    ) -> Result<ListScope> {
        if let Some(ns) = namespace {
            self.check(caller, Some(ns), resource, Verb::List).await?;
            return Ok(ListScope::Namespaces(BTreeSet::from([ns.to_string()])));
        }

        let cluster_wide = ResourceAttributes::new(Verb::List, resource, None);
        if self.reviewer.allowed(caller, &cluster_wide).await? {
            return Ok(ListScope::AllNamespaces);
        }

        let mut allowed = BTreeSet::new();
        for ns in candidates.into_iter().collect::<BTreeSet<_>>() {
            let attributes = ResourceAttributes::new(Verb::List, resource, Some(&ns));
            if self.reviewer.allowed(caller, &attributes).await? {
                allowed.insert(ns);
            }
        }
        Ok(ListScope::Namespaces(allowed))
    }
}
