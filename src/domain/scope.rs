//! Attribute scope and name resolution contracts
//!
//! The expression/mapping evaluator is external to this core; these
//! traits are the seam it plugs into. A flow instance is itself an
//! [`AttributeScope`], and its resolver lets the evaluator locate the
//! instance's values alongside other resolvable scopes.

use crate::types::AttrValue;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Name -> value lookup with instance-local values shadowing
/// flow-definition defaults
pub trait AttributeScope {
    /// Resolve an attribute by name; `None` only if neither an
    /// instance-local value nor a definition default exists
    fn get_value(&self, name: &str) -> Option<AttrValue>;

    /// Write an attribute into the instance-local table
    fn set_value(&mut self, name: &str, value: AttrValue);

    /// Whether the name resolves at all
    fn has_value(&self, name: &str) -> bool {
        self.get_value(name).is_some()
    }
}

/// Resolves one class of names against a scope
pub trait Resolver: Send + Sync {
    /// Resolve a name within the given scope
    fn resolve(&self, scope: &dyn AttributeScope, name: &str) -> Option<AttrValue>;
}

/// Resolver that reads plain names straight from the scope
#[derive(Debug, Default)]
pub struct ScopeResolver;

impl Resolver for ScopeResolver {
    fn resolve(&self, scope: &dyn AttributeScope, name: &str) -> Option<AttrValue> {
        scope.get_value(name)
    }
}

/// Composable resolver dispatching on a `$prefix.name` convention
///
/// Expressions like `$flow.order` are routed to the resolver registered
/// under `flow`; bare names fall through to the scope itself.
pub struct CompositeResolver {
    resolvers: HashMap<String, Arc<dyn Resolver>>,
    fallback: ScopeResolver,
}

impl CompositeResolver {
    /// An empty composite: only bare-name resolution
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
            fallback: ScopeResolver,
        }
    }

    /// Register a resolver for a `$prefix` namespace
    pub fn with(mut self, prefix: &str, resolver: Arc<dyn Resolver>) -> Self {
        self.resolvers.insert(prefix.to_string(), resolver);
        self
    }

    /// Resolve a name or `$prefix.name` expression within a scope
    pub fn resolve(&self, scope: &dyn AttributeScope, expr: &str) -> Option<AttrValue> {
        if let Some(rest) = expr.strip_prefix('$') {
            let (prefix, name) = rest.split_once('.')?;
            return self.resolvers.get(prefix)?.resolve(scope, name);
        }
        self.fallback.resolve(scope, expr)
    }
}

impl Default for CompositeResolver {
    fn default() -> Self {
        Self::new().with("flow", Arc::new(ScopeResolver))
    }
}

/// The process-wide resolver handed out by flow instances
pub(crate) fn shared_resolver() -> Arc<CompositeResolver> {
    static RESOLVER: OnceLock<Arc<CompositeResolver>> = OnceLock::new();
    RESOLVER
        .get_or_init(|| Arc::new(CompositeResolver::default()))
        .clone()
}
