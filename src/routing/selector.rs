//! Handler registry and selection.
//!
//! Handlers declare the capabilities (domain tags) they own and may delegate
//! a capability to another handler. Ownership of a capability is resolved by
//! following delegation edges from every claimant to a terminal handler; the
//! registry refuses to build unless every capability resolves to exactly one
//! terminal owner.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::core::ids::{DomainTag, HandlerId};
use crate::core::request::TaskRequest;
use crate::error::{Error, Result};
use crate::mlog_debug;
use crate::routing::domain::DomainDetection;

/// External services a handler relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalService {
    ContextLookup,
    DeepReasoning,
}

/// Hand a capability over to another handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub capability: DomainTag,
    pub to: HandlerId,
}

/// A specialist handler as declared in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    pub id: HandlerId,
    #[serde(default)]
    pub capabilities: Vec<DomainTag>,
    #[serde(default)]
    pub delegates: Vec<Delegation>,
    #[serde(default)]
    pub services: Vec<ExternalService>,
    /// May aggregate the work of other handlers in hierarchical phases.
    #[serde(default)]
    pub coordinator: bool,
}

impl HandlerDescriptor {
    pub fn new(id: &str, capabilities: &[&str]) -> Self {
        Self {
            id: HandlerId::new(id),
            capabilities: capabilities.iter().map(DomainTag::new).collect(),
            delegates: Vec::new(),
            services: Vec::new(),
            coordinator: false,
        }
    }

    pub fn delegate(mut self, capability: &str, to: &str) -> Self {
        self.delegates.push(Delegation {
            capability: DomainTag::new(capability),
            to: HandlerId::new(to),
        });
        self
    }

    pub fn with_service(mut self, service: ExternalService) -> Self {
        if !self.services.contains(&service) {
            self.services.push(service);
        }
        self
    }

    pub fn as_coordinator(mut self) -> Self {
        self.coordinator = true;
        self
    }

    pub fn owns(&self, capability: &DomainTag) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn requires(&self, service: ExternalService) -> bool {
        self.services.contains(&service)
    }

    fn delegation_for(&self, capability: &DomainTag) -> Option<&HandlerId> {
        self.delegates
            .iter()
            .find(|d| &d.capability == capability)
            .map(|d| &d.to)
    }
}

/// The built-in handler roster, one per default domain.
pub fn default_handlers() -> Vec<HandlerDescriptor> {
    vec![
        HandlerDescriptor::new("frontend", &["interface-layer", "performance"])
            .delegate("performance", "performance")
            .with_service(ExternalService::ContextLookup),
        HandlerDescriptor::new("backend", &["data-layer", "security"])
            .delegate("security", "security")
            .with_service(ExternalService::ContextLookup),
        HandlerDescriptor::new("architect", &["architecture"])
            .with_service(ExternalService::DeepReasoning)
            .as_coordinator(),
        HandlerDescriptor::new("security", &["security"])
            .with_service(ExternalService::DeepReasoning),
        HandlerDescriptor::new("performance", &["performance"]),
        HandlerDescriptor::new("qa", &["quality"]),
        HandlerDescriptor::new("devops", &["infrastructure"]),
        HandlerDescriptor::new("scribe", &["documentation"])
            .with_service(ExternalService::ContextLookup),
        HandlerDescriptor::new("refactorer", &["refactoring"]),
    ]
}

/// Validated handlers with every capability resolved to its single owner.
#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    handlers: Vec<HandlerDescriptor>,
    owners: BTreeMap<DomainTag, HandlerId>,
}

impl HandlerRegistry {
    /// Validate the descriptors and resolve capability ownership.
    ///
    /// # Errors
    /// - `Error::Validation` for duplicate ids, handlers owning nothing, or
    ///   delegation to an unknown handler
    /// - `Error::DelegationCycle` if following delegations loops
    /// - `Error::AssignmentConflict` if a capability resolves to more than one owner
    pub fn new(handlers: Vec<HandlerDescriptor>) -> Result<Self> {
        let mut ids = HashSet::new();
        for handler in &handlers {
            if !ids.insert(&handler.id) {
                return Err(Error::Validation(format!(
                    "Handler '{}' is declared more than once",
                    handler.id
                )));
            }
            if handler.capabilities.is_empty() {
                return Err(Error::Validation(format!(
                    "Handler '{}' owns no capabilities",
                    handler.id
                )));
            }
        }
        for handler in &handlers {
            if let Some(d) = handler.delegates.iter().find(|d| !ids.contains(&d.to)) {
                return Err(Error::Validation(format!(
                    "Handler '{}' delegates '{}' to unknown handler '{}'",
                    handler.id, d.capability, d.to
                )));
            }
        }

        let capabilities: BTreeSet<&DomainTag> = handlers
            .iter()
            .flat_map(|h| h.capabilities.iter().chain(h.delegates.iter().map(|d| &d.capability)))
            .collect();

        let mut owners = BTreeMap::new();
        for capability in capabilities {
            let mut terminals: Vec<&HandlerId> = Vec::new();
            for claimant in handlers.iter().filter(|h| h.owns(capability)) {
                let terminal = resolve_owner(&handlers, claimant, capability)?;
                if !terminals.contains(&terminal) {
                    terminals.push(terminal);
                }
            }
            match terminals.as_slice() {
                [] => {}
                [owner] => {
                    owners.insert(capability.clone(), (*owner).clone());
                }
                many => {
                    return Err(Error::AssignmentConflict {
                        capability: capability.to_string(),
                        handlers: many.iter().map(|h| h.to_string()).collect(),
                    })
                }
            }
        }

        mlog_debug!(
            "handlers: {} registered, {} capabilities resolved",
            handlers.len(),
            owners.len()
        );

        Ok(Self { handlers, owners })
    }

    pub fn handlers(&self) -> &[HandlerDescriptor] {
        &self.handlers
    }

    pub fn get(&self, id: &HandlerId) -> Option<&HandlerDescriptor> {
        self.handlers.iter().find(|h| &h.id == id)
    }

    pub fn contains(&self, id: &HandlerId) -> bool {
        self.get(id).is_some()
    }

    /// The single handler owning a capability after delegation.
    pub fn owner(&self, capability: &DomainTag) -> Option<&HandlerId> {
        self.owners.get(capability)
    }

    pub fn is_coordinator(&self, id: &HandlerId) -> bool {
        self.get(id).is_some_and(|h| h.coordinator)
    }

    pub fn requires(&self, id: &HandlerId, service: ExternalService) -> bool {
        self.get(id).is_some_and(|h| h.requires(service))
    }
}

fn resolve_owner<'h>(
    handlers: &'h [HandlerDescriptor],
    claimant: &'h HandlerDescriptor,
    capability: &DomainTag,
) -> Result<&'h HandlerId> {
    let mut path = vec![&claimant.id];
    let mut current = claimant;
    while let Some(next) = current.delegation_for(capability) {
        if path.contains(&next) {
            path.push(next);
            return Err(Error::DelegationCycle {
                capability: capability.to_string(),
                path: path.iter().map(|h| h.to_string()).collect(),
            });
        }
        path.push(next);
        current = handlers
            .iter()
            .find(|h| &h.id == next)
            .ok_or_else(|| Error::UnknownHandler(next.to_string()))?;
    }
    Ok(&current.id)
}

/// A portion of the task tied to one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub domain: DomainTag,
    pub description: String,
}

impl Subtask {
    fn for_domain(domain: &DomainTag, text: &str) -> Self {
        Self {
            domain: domain.clone(),
            description: format!("[{}] {}", domain, text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerAssignment {
    pub handler: HandlerId,
    pub subtasks: Vec<Subtask>,
}

/// Subtasks grouped by their single primary owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    /// In the rank order of the first subtask each handler received.
    pub handlers: Vec<HandlerAssignment>,
    /// Subtasks whose domain has no owner.
    pub unassigned: Vec<Subtask>,
}

impl Assignment {
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handler_ids(&self) -> Vec<&HandlerId> {
        self.handlers.iter().map(|a| &a.handler).collect()
    }

    pub fn get(&self, handler: &HandlerId) -> Option<&HandlerAssignment> {
        self.handlers.iter().find(|a| &a.handler == handler)
    }

    pub fn subtask_count(&self) -> usize {
        self.handlers.iter().map(|a| a.subtasks.len()).sum()
    }

    fn push(&mut self, handler: &HandlerId, subtask: Subtask) {
        match self.handlers.iter_mut().find(|a| &a.handler == handler) {
            Some(existing) => existing.subtasks.push(subtask),
            None => self.handlers.push(HandlerAssignment {
                handler: handler.clone(),
                subtasks: vec![subtask],
            }),
        }
    }
}

/// Maps detected domains to handlers.
pub struct HandlerSelector<'a> {
    registry: &'a HandlerRegistry,
}

impl<'a> HandlerSelector<'a> {
    pub fn new(registry: &'a HandlerRegistry) -> Self {
        Self { registry }
    }

    /// Assign one subtask per selected domain to its owner.
    ///
    /// Selected domains are every auto-selected match, or the top suggested
    /// match when none is auto-selected.
    ///
    /// # Errors
    /// `Error::UnknownHandler` if the request forces an undeclared handler.
    pub fn select(&self, detection: &DomainDetection, request: &TaskRequest) -> Result<Assignment> {
        let mut selected: Vec<&DomainTag> = detection.auto_selected().map(|m| &m.domain).collect();
        if selected.is_empty() {
            selected.extend(detection.top().map(|m| &m.domain));
        }

        let mut assignment = Assignment::default();

        if let Some(forced) = &request.flags().handler {
            let handler = self
                .registry
                .get(forced)
                .ok_or_else(|| Error::UnknownHandler(forced.to_string()))?;
            if selected.is_empty() {
                selected.extend(handler.capabilities.first());
            }
            for domain in selected {
                assignment.push(&handler.id, Subtask::for_domain(domain, request.text()));
            }
            mlog_debug!("selector: forced handler {}", handler.id);
            return Ok(assignment);
        }

        for domain in selected {
            let subtask = Subtask::for_domain(domain, request.text());
            match self.registry.owner(domain) {
                Some(owner) => assignment.push(owner, subtask),
                None => assignment.unassigned.push(subtask),
            }
        }

        mlog_debug!(
            "selector: handlers [{}], {} unassigned",
            assignment
                .handler_ids()
                .iter()
                .map(|h| h.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            assignment.unassigned.len()
        );

        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Thresholds;
    use crate::core::request::TaskFlags;
    use crate::routing::domain::DomainDetector;
    use crate::routing::registry::PatternRegistry;

    fn detect(request: &TaskRequest) -> DomainDetection {
        let compiled = PatternRegistry::default().compile().unwrap();
        let thresholds = Thresholds::default();
        DomainDetector::new(&compiled, &thresholds)
            .detect(request)
            .unwrap()
    }

    fn default_registry() -> HandlerRegistry {
        HandlerRegistry::new(default_handlers()).unwrap()
    }

    #[test]
    fn test_default_handlers_resolve() {
        let registry = default_registry();
        assert_eq!(
            registry.owner(&DomainTag::new("performance")),
            Some(&HandlerId::new("performance"))
        );
        assert_eq!(
            registry.owner(&DomainTag::new("security")),
            Some(&HandlerId::new("security"))
        );
        assert_eq!(
            registry.owner(&DomainTag::new("interface-layer")),
            Some(&HandlerId::new("frontend"))
        );
        assert!(registry.is_coordinator(&HandlerId::new("architect")));
        assert!(registry.requires(&HandlerId::new("scribe"), ExternalService::ContextLookup));
    }

    #[test]
    fn test_conflicting_owners_rejected() {
        let handlers = vec![
            HandlerDescriptor::new("a", &["performance"]),
            HandlerDescriptor::new("b", &["performance"]),
        ];
        let err = HandlerRegistry::new(handlers).unwrap_err();
        assert!(matches!(
            err,
            Error::AssignmentConflict { ref capability, ref handlers }
                if capability == "performance" && handlers.len() == 2
        ));
    }

    #[test]
    fn test_delegation_cycle_rejected() {
        let handlers = vec![
            HandlerDescriptor::new("a", &["x"]).delegate("x", "b"),
            HandlerDescriptor::new("b", &["y"]).delegate("x", "a"),
        ];
        let err = HandlerRegistry::new(handlers).unwrap_err();
        assert!(matches!(err, Error::DelegationCycle { ref capability, .. } if capability == "x"));
    }

    #[test]
    fn test_delegation_to_unknown_rejected() {
        let handlers = vec![HandlerDescriptor::new("a", &["x"]).delegate("x", "ghost")];
        assert!(HandlerRegistry::new(handlers)
            .unwrap_err()
            .to_string()
            .contains("unknown handler"));
    }

    #[test]
    fn test_duplicate_and_empty_handlers_rejected() {
        let dup = vec![
            HandlerDescriptor::new("a", &["x"]),
            HandlerDescriptor::new("a", &["y"]),
        ];
        assert!(HandlerRegistry::new(dup).is_err());
        assert!(HandlerRegistry::new(vec![HandlerDescriptor::new("a", &[])]).is_err());
    }

    #[test]
    fn test_select_login_screen() {
        let request = TaskRequest::new("implement login screen")
            .with_scope(["Sources/UI/LoginScreen.swift", "Sources/UI/LoginView.swift"]);
        let registry = default_registry();
        let assignment = HandlerSelector::new(&registry)
            .select(&detect(&request), &request)
            .unwrap();
        assert_eq!(assignment.handler_ids(), vec![&HandlerId::new("frontend")]);
        assert_eq!(assignment.subtask_count(), 1);
        assert!(assignment.unassigned.is_empty());
    }

    #[test]
    fn test_each_subtask_has_one_owner() {
        let request = TaskRequest::new(
            "secure the api endpoint, optimize the slow database query and update the ui screen",
        )
        .with_scope(["src/api/users.rs", "web/views/Profile.tsx"]);
        let registry = default_registry();
        let detection = detect(&request);
        let assignment = HandlerSelector::new(&registry)
            .select(&detection, &request)
            .unwrap();

        let mut seen = HashSet::new();
        for handler in &assignment.handlers {
            for subtask in &handler.subtasks {
                assert!(seen.insert(subtask.domain.clone()), "{} owned twice", subtask.domain);
            }
        }
        assert_eq!(seen.len(), detection.auto_selected().count());
    }

    #[test]
    fn test_unowned_domain_goes_unassigned() {
        let registry = HandlerRegistry::new(vec![HandlerDescriptor::new("frontend", &["interface-layer"])])
            .unwrap();
        let request = TaskRequest::new("document the readme");
        let assignment = HandlerSelector::new(&registry)
            .select(&detect(&request), &request)
            .unwrap();
        assert!(assignment.is_empty());
        assert_eq!(assignment.unassigned.len(), 1);
        assert_eq!(assignment.unassigned[0].domain, DomainTag::new("documentation"));
    }

    #[test]
    fn test_forced_handler_owns_everything() {
        let request = TaskRequest::new("implement login screen")
            .with_scope(["Sources/UI/LoginScreen.swift"])
            .with_flags(TaskFlags::default().with_handler("qa"));
        let registry = default_registry();
        let assignment = HandlerSelector::new(&registry)
            .select(&detect(&request), &request)
            .unwrap();
        assert_eq!(assignment.handler_ids(), vec![&HandlerId::new("qa")]);

        let request = TaskRequest::new("hello").with_flags(TaskFlags::default().with_handler("scribe"));
        let assignment = HandlerSelector::new(&registry)
            .select(&detect(&request), &request)
            .unwrap();
        assert_eq!(
            assignment.handlers[0].subtasks[0].domain,
            DomainTag::new("documentation")
        );
    }

    #[test]
    fn test_unknown_forced_handler_errors() {
        let request = TaskRequest::new("hello").with_flags(TaskFlags::default().with_handler("nobody"));
        let registry = default_registry();
        let err = HandlerSelector::new(&registry)
            .select(&detect(&request), &request)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHandler(_)));
    }
}
