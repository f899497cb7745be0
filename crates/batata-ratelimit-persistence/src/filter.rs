//! Typed filter for the extended rate limit query
//!
//! Query parameters arrive as a string map; they are parsed once into
//! [`Predicate`]s, the service join is resolved into a set of service ids, and
//! the resulting [`ResolvedFilter`] is evaluated against each scanned row.

use std::collections::{HashMap, HashSet};

use batata_ratelimit_common::{
    PARAM_CLUSTER_ID, PARAM_LABELS, PARAM_NAMESPACE, PARAM_SERVICE_NAME, Result, StoreError,
    EXTENDED_QUERY_PARAMS,
};

use crate::model::RateLimit;

const OP_FILTER: &str = "get_extended";

/// Rate limit attribute a predicate tests
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    ClusterId,
    Labels,
    ServiceId,
}

impl Field {
    fn value(self, rate_limit: &RateLimit) -> &str {
        match self {
            Field::ClusterId => &rate_limit.cluster_id,
            Field::Labels => &rate_limit.labels,
            Field::ServiceId => &rate_limit.service_id,
        }
    }
}

/// One filter criterion, as supplied by the caller
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Predicate {
    /// Field equals the value
    Equals(Field, String),
    /// Field contains the value as a substring
    Contains(Field, String),
    /// Service id belongs to a service registered as `namespace`/`name`
    Service { namespace: String, name: String },
}

/// A predicate with its service join resolved
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedPredicate {
    Equals(Field, String),
    Contains(Field, String),
    ServiceIdIn(HashSet<String>),
}

impl ResolvedPredicate {
    fn matches(&self, rate_limit: &RateLimit) -> bool {
        match self {
            ResolvedPredicate::Equals(field, value) => field.value(rate_limit) == value,
            ResolvedPredicate::Contains(field, value) => {
                field.value(rate_limit).contains(value.as_str())
            }
            ResolvedPredicate::ServiceIdIn(ids) => ids.contains(&rate_limit.service_id),
        }
    }
}

/// Conjunction of predicates; an empty filter matches every row
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateLimitFilter {
    predicates: Vec<Predicate>,
}

impl RateLimitFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_id(mut self, cluster_id: impl Into<String>) -> Self {
        self.predicates
            .push(Predicate::Equals(Field::ClusterId, cluster_id.into()));
        self
    }

    pub fn labels_contain(mut self, fragment: impl Into<String>) -> Self {
        self.predicates
            .push(Predicate::Contains(Field::Labels, fragment.into()));
        self
    }

    pub fn service(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Service {
            namespace: namespace.into(),
            name: name.into(),
        });
        self
    }

    /// Parse query parameters.
    ///
    /// Recognized keys are `clusterid`, `labels`, and the `name`/`namespace`
    /// pair. Any other key, or only one half of the pair, is a `BadParam`.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let mut unknown: Vec<&str> = params
            .keys()
            .map(String::as_str)
            .filter(|key| !EXTENDED_QUERY_PARAMS.contains(key))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(StoreError::bad_param(
                OP_FILTER,
                format!("unrecognized filter key(s): {}", unknown.join(", ")),
            ));
        }

        let mut filter = Self::new();
        if let Some(cluster_id) = params.get(PARAM_CLUSTER_ID) {
            filter = filter.cluster_id(cluster_id.as_str());
        }
        if let Some(labels) = params.get(PARAM_LABELS) {
            filter = filter.labels_contain(labels.as_str());
        }

        match (params.get(PARAM_NAMESPACE), params.get(PARAM_SERVICE_NAME)) {
            (Some(namespace), Some(name)) => {
                filter = filter.service(namespace.as_str(), name.as_str());
            }
            (None, None) => {}
            _ => {
                return Err(StoreError::bad_param(
                    OP_FILTER,
                    format!(
                        "'{}' and '{}' must be supplied together",
                        PARAM_SERVICE_NAME, PARAM_NAMESPACE
                    ),
                ));
            }
        }

        Ok(filter)
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Resolve service joins with `find`, which maps a namespace and name to
    /// the matching service ids
    pub fn resolve<F>(&self, mut find: F) -> Result<ResolvedFilter>
    where
        F: FnMut(&str, &str) -> Result<HashSet<String>>,
    {
        let mut predicates = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            let resolved = match predicate {
                Predicate::Equals(field, value) => ResolvedPredicate::Equals(*field, value.clone()),
                Predicate::Contains(field, value) => {
                    ResolvedPredicate::Contains(*field, value.clone())
                }
                Predicate::Service { namespace, name } => {
                    ResolvedPredicate::ServiceIdIn(find(namespace, name)?)
                }
            };
            predicates.push(resolved);
        }
        Ok(ResolvedFilter { predicates })
    }
}

/// Filter ready for row evaluation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedFilter {
    predicates: Vec<ResolvedPredicate>,
}

impl ResolvedFilter {
    /// Whether `rate_limit` satisfies every predicate
    pub fn matches(&self, rate_limit: &RateLimit) -> bool {
        self.predicates.iter().all(|p| p.matches(rate_limit))
    }

    /// True when a join resolved to no services, so no row can match
    pub fn is_unsatisfiable(&self) -> bool {
        self.predicates
            .iter()
            .any(|p| matches!(p, ResolvedPredicate::ServiceIdIn(ids) if ids.is_empty()))
    }
}
