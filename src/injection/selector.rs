// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Label selector evaluation against workloads.

use crate::error::{InjectorError, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
enum Requirement {
    Equals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::In(key, values) => labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(key, values) => !labels.get(key).is_some_and(|v| values.contains(v)),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        }
    }
}

/// A compiled selector; every requirement must hold for a match.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMatcher {
    requirements: Vec<Requirement>,
}

impl TryFrom<&LabelSelector> for LabelMatcher {
    type Error = InjectorError;

    /// An empty selector is rejected so that it never selects every workload.
    fn try_from(selector: &LabelSelector) -> Result<Self> {
        let mut requirements = Vec::new();

        for (key, value) in selector.match_labels.iter().flatten() {
            requirements.push(Requirement::Equals(key.clone(), value.clone()));
        }

        for expr in selector.match_expressions.iter().flatten() {
            if expr.key.is_empty() {
                return Err(InjectorError::SelectorError(
                    "match expression with an empty key".to_string(),
                ));
            }
            let values: BTreeSet<String> = expr.values.iter().flatten().cloned().collect();
            let requirement = match expr.operator.as_str() {
                "In" | "NotIn" if values.is_empty() => {
                    return Err(InjectorError::SelectorError(format!(
                        "operator {} on key {} requires at least one value",
                        expr.operator, expr.key
                    )));
                }
                "Exists" | "DoesNotExist" if !values.is_empty() => {
                    return Err(InjectorError::SelectorError(format!(
                        "operator {} on key {} must not have values",
                        expr.operator, expr.key
                    )));
                }
                "In" => Requirement::In(expr.key.clone(), values),
                "NotIn" => Requirement::NotIn(expr.key.clone(), values),
                "Exists" => Requirement::Exists(expr.key.clone()),
                "DoesNotExist" => Requirement::DoesNotExist(expr.key.clone()),
                other => {
                    return Err(InjectorError::SelectorError(format!(
                        "unknown operator {} on key {}",
                        other, expr.key
                    )));
                }
            };
            requirements.push(requirement);
        }

        if requirements.is_empty() {
            return Err(InjectorError::SelectorError(
                "selector has no matchLabels or matchExpressions".to_string(),
            ));
        }

        Ok(LabelMatcher { requirements })
    }
}

impl LabelMatcher {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn matches_deployment(&self, deployment: &Deployment) -> bool {
        match deployment.metadata.labels.as_ref() {
            Some(labels) => self.matches(labels),
            None => self.matches(&BTreeMap::new()),
        }
    }
}

/// Return the deployments whose labels satisfy the selector, in input order.
pub fn select_deployments(
    selector: &LabelSelector,
    deployments: &[Deployment],
) -> Result<Vec<Deployment>> {
    let matcher = LabelMatcher::try_from(selector)?;
    Ok(deployments
        .iter()
        .filter(|d| matcher.matches_deployment(d))
        .cloned()
        .collect())
}
