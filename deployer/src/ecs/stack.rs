//! Declared resources, the references between them, and the pending identifiers the
//! provisioning engine fills in.

use crate::ecs::{output::Output, resources::ResourceKind, Error};
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};
use tracing::debug;

/// Attribute of a resource that is only known once the resource exists
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    Id,
    Arn,
    Name,
    DnsName,
    Address,
    RepositoryUrl,
    ImageUri,
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Attribute::Id => "id",
            Attribute::Arn => "arn",
            Attribute::Name => "name",
            Attribute::DnsName => "dns_name",
            Attribute::Address => "address",
            Attribute::RepositoryUrl => "repository_url",
            Attribute::ImageUri => "image_uri",
        };
        write!(f, "{s}")
    }
}

/// Reference to an attribute of a declared resource
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub resource: String,
    pub attribute: Attribute,
}

impl Reference {
    pub fn new(resource: impl Into<String>, attribute: Attribute) -> Self {
        Self {
            resource: resource.into(),
            attribute,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// Identifier that is either supplied up front or produced by another resource
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Known(String),
    Pending(Reference),
}

impl Identifier {
    /// Returns the reference this identifier waits on, if any.
    pub fn reference(&self) -> Option<&Reference> {
        match self {
            Identifier::Known(_) => None,
            Identifier::Pending(reference) => Some(reference),
        }
    }
}

impl From<Reference> for Identifier {
    fn from(reference: Reference) -> Self {
        Identifier::Pending(reference)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Known(value.to_string())
    }
}

/// Settings applied to every resource declared in a [Stack]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Provider {
    pub region: String,
    pub default_tags: BTreeMap<String, String>,
}

impl Provider {
    pub fn new(region: impl Into<String>, default_tags: BTreeMap<String, String>) -> Self {
        Self {
            region: region.into(),
            default_tags,
        }
    }

    /// Default tags overlaid with resource-specific ones.
    pub fn tags(&self, extra: &[(&str, &str)]) -> BTreeMap<String, String> {
        let mut tags = self.default_tags.clone();
        for (key, value) in extra {
            tags.insert(key.to_string(), value.to_string());
        }
        tags
    }
}

/// Logical name of a declared resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    name: String,
}

impl Handle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, attribute: Attribute) -> Reference {
        Reference::new(self.name.clone(), attribute)
    }

    pub fn id(&self) -> Reference {
        self.attribute(Attribute::Id)
    }

    pub fn arn(&self) -> Reference {
        self.attribute(Attribute::Arn)
    }
}

/// A single resource declaration
#[derive(Clone, Debug, Serialize)]
pub struct Resource {
    pub name: String,
    #[serde(flatten)]
    pub kind: ResourceKind,
}

struct Pending {
    sender: Option<oneshot::Sender<String>>,
    output: Output<String>,
}

/// Ordered set of resource declarations
#[derive(Serialize)]
pub struct Stack {
    provider: Provider,
    resources: Vec<Resource>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    #[serde(skip)]
    pending: BTreeMap<Reference, Pending>,
}

impl Stack {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            resources: Vec::new(),
            index: HashMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.index.get(name).map(|i| &self.resources[*i])
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Adds a resource under a unique logical name.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: impl Into<ResourceKind>,
    ) -> Result<Handle, Error> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateResource(name));
        }
        let kind = kind.into();
        debug!(name = name.as_str(), kind = kind.type_name(), "declared resource");
        self.index.insert(name.clone(), self.resources.len());
        self.resources.push(Resource {
            name: name.clone(),
            kind,
        });
        Ok(Handle { name })
    }

    /// Returns the deferred value of `reference`, shared by every caller.
    pub fn output(&mut self, reference: Reference) -> Output<String> {
        self.pending
            .entry(reference.clone())
            .or_insert_with(|| {
                let (sender, receiver) = oneshot::channel();
                Pending {
                    sender: Some(sender),
                    output: Output::pending(reference, receiver),
                }
            })
            .output
            .clone()
    }

    /// Fulfils a pending identifier (invoked by the provisioning engine).
    pub fn resolve(&mut self, reference: &Reference, value: impl Into<String>) -> Result<(), Error> {
        let pending = self
            .pending
            .get_mut(reference)
            .ok_or_else(|| Error::UnknownReference(reference.clone()))?;
        let sender = pending
            .sender
            .take()
            .ok_or_else(|| Error::AlreadyResolved(reference.clone()))?;

        // The stack holds a receiver (through the output) so this cannot fail
        let _ = sender.send(value.into());
        Ok(())
    }

    /// Fulfils every outstanding identifier with `f`.
    pub fn resolve_all(&mut self, f: impl Fn(&Reference) -> String) {
        for (reference, pending) in self.pending.iter_mut() {
            if let Some(sender) = pending.sender.take() {
                let _ = sender.send(f(reference));
            }
        }
    }

    /// Ensures every reference (declared or awaited) targets an attribute of a declared resource.
    pub fn check_references(&self) -> Result<(), Error> {
        let referenced = self
            .resources
            .iter()
            .flat_map(|resource| resource.kind.references())
            .chain(self.pending.keys());
        for reference in referenced {
            let exposed = self
                .get(&reference.resource)
                .map(|target| target.kind.attributes().contains(&reference.attribute))
                .unwrap_or(false);
            if !exposed {
                return Err(Error::DanglingReference(reference.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecs::resources::{Cluster, LogGroup};

    fn provider() -> Provider {
        Provider::new(
            "eu-west-1",
            BTreeMap::from([("team".to_string(), "platform".to_string())]),
        )
    }

    fn cluster(stack: &Stack, name: &str) -> Cluster {
        Cluster {
            cluster_name: name.to_string(),
            tags: stack.provider().tags(&[]),
        }
    }

    #[test]
    fn test_reference_display() {
        let reference = Reference::new("api-lb", Attribute::DnsName);
        assert_eq!(reference.to_string(), "${api-lb.dns_name}");
    }

    #[test]
    fn test_identifier_yaml() {
        let known: Identifier = serde_yaml::from_str("vpc-123").unwrap();
        assert_eq!(known, Identifier::Known("vpc-123".to_string()));

        let pending: Identifier =
            serde_yaml::from_str("{resource: network-vpc, attribute: id}").unwrap();
        assert_eq!(
            pending,
            Identifier::Pending(Reference::new("network-vpc", Attribute::Id))
        );
    }

    #[test]
    fn test_provider_tags() {
        let provider = provider();
        let tags = provider.tags(&[("Name", "api-sg"), ("team", "edge")]);
        assert_eq!(tags["Name"], "api-sg");
        assert_eq!(tags["team"], "edge");
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_duplicate_resource() {
        let mut stack = Stack::new(provider());
        let kind = cluster(&stack, "api");
        stack.declare("api-cluster", kind.clone()).unwrap();
        assert!(matches!(
            stack.declare("api-cluster", kind),
            Err(Error::DuplicateResource(name)) if name == "api-cluster"
        ));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_resolve() {
        let mut stack = Stack::new(provider());
        let kind = cluster(&stack, "api");
        let handle = stack.declare("api-cluster", kind).unwrap();
        let output = stack.output(handle.arn());
        assert!(output.try_get().is_none());

        stack.resolve(&handle.arn(), "arn:cluster").unwrap();
        assert_eq!(output.try_get().unwrap().unwrap(), "arn:cluster");

        // Outputs requested later share the resolved value
        assert_eq!(
            stack.output(handle.arn()).try_get().unwrap().unwrap(),
            "arn:cluster"
        );
        assert!(matches!(
            stack.resolve(&handle.arn(), "again"),
            Err(Error::AlreadyResolved(_))
        ));
        assert!(matches!(
            stack.resolve(&handle.id(), "id"),
            Err(Error::UnknownReference(_))
        ));
    }

    #[test]
    fn test_resolve_all() {
        let mut stack = Stack::new(provider());
        let kind = cluster(&stack, "api");
        let handle = stack.declare("api-cluster", kind).unwrap();
        let id = stack.output(handle.id());
        let arn = stack.output(handle.arn());
        stack.resolve(&handle.id(), "cluster-1").unwrap();
        stack.resolve_all(|reference| reference.to_string());
        assert_eq!(id.try_get().unwrap().unwrap(), "cluster-1");
        assert_eq!(arn.try_get().unwrap().unwrap(), "${api-cluster.arn}");
    }

    #[tokio::test]
    async fn test_unresolved_on_drop() {
        let mut stack = Stack::new(provider());
        let kind = cluster(&stack, "api");
        let handle = stack.declare("api-cluster", kind).unwrap();
        let output = stack.output(handle.arn());
        drop(stack);
        assert!(matches!(
            output.get().await,
            Err(Error::Unresolved(reference)) if reference == handle.arn()
        ));
    }

    #[test]
    fn test_check_references() {
        let mut stack = Stack::new(provider());
        let log_group = LogGroup {
            log_group_name: "/ecs/api".to_string(),
            retention_in_days: 30,
            tags: BTreeMap::new(),
        };
        let handle = stack.declare("api-log-group", log_group).unwrap();
        stack.output(handle.attribute(Attribute::Name));
        stack.check_references().unwrap();

        // Log groups have no DNS name
        stack.output(handle.attribute(Attribute::DnsName));
        assert!(matches!(
            stack.check_references(),
            Err(Error::DanglingReference(reference)) if reference.attribute == Attribute::DnsName
        ));
    }

    #[test]
    fn test_check_references_undeclared() {
        let mut stack = Stack::new(provider());
        stack.output(Reference::new("missing", Attribute::Id));
        assert!(matches!(
            stack.check_references(),
            Err(Error::DanglingReference(reference)) if reference.resource == "missing"
        ));
    }
}
