use std::collections::HashMap;

use spanlens_core::time::Granularity;
use spanlens_core::{Result, SpanlensError};

use crate::defs::builtin_definitions;
use crate::definition::{MetricDefinition, MetricKind};

/// Immutable registry of metric definitions, wrapped variants already expanded.
/// Built once and shared read-only.
#[derive(Debug, Clone)]
pub struct MetricCatalog {
    metrics: Vec<MetricDefinition>,
    index: HashMap<String, usize>,
}

impl MetricCatalog {
    pub fn new(definitions: Vec<MetricDefinition>) -> Result<Self> {
        let mut metrics = Vec::new();
        let mut index = HashMap::new();
        for def in &definitions {
            if def.is_wrappable() && def.kind() == MetricKind::Composite {
                return Err(SpanlensError::Metric(format!(
                    "composite metric {} cannot be wrapped",
                    def.name()
                )));
            }
            for expanded in def.expand() {
                validate_definition(&expanded)?;
                if index.insert(expanded.name().to_string(), metrics.len()).is_some() {
                    return Err(SpanlensError::Metric(format!(
                        "duplicate metric name: {}",
                        expanded.name()
                    )));
                }
                metrics.push(expanded);
            }
        }
        tracing::debug!(
            base = definitions.len(),
            expanded = metrics.len(),
            "metric catalog built"
        );
        Ok(Self { metrics, index })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(builtin_definitions())
    }

    pub fn get(&self, name: &str) -> Option<&MetricDefinition> {
        self.index.get(name).map(|&i| &self.metrics[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.metrics.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|m| m.name())
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Definitions whose name matches a shell-style glob, in registration order.
    pub fn matching(&self, pattern: &str) -> Result<Vec<&MetricDefinition>> {
        let pattern = glob::Pattern::new(pattern).map_err(|e| {
            SpanlensError::InvalidArgument(format!("bad metric pattern {pattern}: {e}"))
        })?;
        Ok(self
            .metrics
            .iter()
            .filter(|m| pattern.matches(m.name()))
            .collect())
    }
}

fn validate_definition(def: &MetricDefinition) -> Result<()> {
    let name = def.name();
    if name.trim().is_empty() {
        return Err(SpanlensError::Metric("metric name cannot be blank".to_string()));
    }
    for dim in def.group_by() {
        if dim.alias.is_empty() {
            return Err(SpanlensError::Metric(format!(
                "metric {name} has a group-by without alias"
            )));
        }
        if dim.field.is_none() && dim.expression.is_none() {
            return Err(SpanlensError::Metric(format!(
                "metric {name} group-by {} has neither field nor expression",
                dim.alias
            )));
        }
    }
    match def.kind() {
        MetricKind::Direct => {
            if def.wrapper().is_some() && def.o_expression().is_none() {
                return Err(SpanlensError::Metric(format!(
                    "wrapped metric {name} has no offline expression"
                )));
            }
            for granularity in Granularity::ALL {
                validate_expression(def, granularity)?;
            }
        }
        MetricKind::Composite => {
            let subs = def.metrics();
            if subs.len() != 2 {
                return Err(SpanlensError::Metric(format!(
                    "composite metric {name} needs exactly two sub-metrics, got {}",
                    subs.len()
                )));
            }
            for sub in subs {
                if sub.kind() != MetricKind::Direct {
                    return Err(SpanlensError::Metric(format!(
                        "composite metric {name} nests composite {}",
                        sub.name()
                    )));
                }
                validate_definition(sub)?;
            }
        }
    }
    Ok(())
}

fn validate_expression(def: &MetricDefinition, granularity: Granularity) -> Result<()> {
    let expr = def.expression(granularity).ok_or_else(|| {
        SpanlensError::Metric(format!("metric {} has no expression", def.name()))
    })?;
    if expr.expression.is_empty() {
        return Err(SpanlensError::Metric(format!(
            "metric {} renders an empty expression at {granularity}",
            def.name()
        )));
    }
    if expr.fields.iter().any(|f| f.field_name.is_empty()) {
        return Err(SpanlensError::Metric(format!(
            "metric {} references an unnamed field",
            def.name()
        )));
    }
    let rendered = expr.render()?;
    if let Some(missing) = expr
        .fields
        .iter()
        .find(|f| !rendered.contains(f.field_name.as_str()))
    {
        return Err(SpanlensError::Metric(format!(
            "metric {} does not render field {}",
            def.name(),
            missing.field_name
        )));
    }
    Ok(())
}
