//! Reuse of precomputed derivatives
//!
//! When a complete set of earlier results is supplied, the compute-heavy
//! part of the pipeline is replaced by binding those results directly onto
//! the output interface node. The set is all-or-nothing: a partial set is an
//! error, never a partial recomputation.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{DerivativeSetError, PortDirection, Result, StructuralError};
use crate::expansion::BranchKey;
use crate::graph::WorkflowGraph;
use crate::join::JoinedCollection;

/// Field holding the template list
pub const TEMPLATE_FIELD: &str = "template";

/// Previously computed artifacts, keyed by output field
///
/// Deserializes from a flat object such as
/// `{"template": ["MouseIn"], "t2w_preproc": "...", "std_mask": ["..."]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivativeSet {
    #[serde(rename = "template", default)]
    templates: Vec<String>,
    #[serde(flatten)]
    artifacts: BTreeMap<String, serde_json::Value>,
}

impl DerivativeSet {
    pub fn new(templates: Vec<String>) -> Self {
        Self {
            templates,
            artifacts: BTreeMap::new(),
        }
    }

    pub fn with_artifact(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.artifacts.insert(field.into(), value);
        self
    }

    pub fn templates(&self) -> &[String] {
        &self.templates
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.artifacts.get(field)
    }

    /// Artifact fields present, excluding the template list
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty() && self.artifacts.is_empty()
    }
}

/// Checks a derivative set against the fields a pipeline needs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivativeCache {
    requested: Vec<String>,
    templated: BTreeSet<String>,
}

impl DerivativeCache {
    /// Require every field in `fields`
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            requested: fields.into_iter().map(Into::into).collect(),
            templated: BTreeSet::new(),
        }
    }

    /// Mark fields as holding one entry per template
    pub fn templated<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.templated.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    pub fn is_templated(&self, field: &str) -> bool {
        self.templated.contains(field)
    }

    /// Requested fields absent from `set`
    ///
    /// A set with template-keyed fields but no templates is also missing
    /// `template`.
    pub fn missing(&self, set: &DerivativeSet) -> Vec<String> {
        let mut missing: Vec<String> = self
            .requested
            .iter()
            .filter(|f| set.get(f).is_none())
            .cloned()
            .collect();
        let needs_templates = self.requested.iter().any(|f| self.templated.contains(f));
        if needs_templates && set.templates.is_empty() {
            missing.push(TEMPLATE_FIELD.to_string());
        }
        missing
    }

    /// Verify completeness and template alignment
    pub fn check(&self, set: &DerivativeSet) -> Result<()> {
        let missing = self.missing(set);
        if !missing.is_empty() {
            return Err(DerivativeSetError::IncompleteDerivativeSet { missing }.into());
        }
        for field in self.requested.iter().filter(|f| self.templated.contains(*f)) {
            let found = match set.get(field) {
                Some(serde_json::Value::Array(items)) => items.len(),
                _ => 1,
            };
            if found != set.templates.len() {
                return Err(DerivativeSetError::TemplateCountMismatch {
                    field: field.clone(),
                    expected: set.templates.len(),
                    found,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Check `set` and bind every artifact onto `output_node`
    ///
    /// The template list is bound to the node's `template` input when it has
    /// one.
    pub fn bind_outputs(
        &self,
        set: &DerivativeSet,
        graph: &mut WorkflowGraph,
        output_node: &str,
    ) -> Result<()> {
        self.check(set)?;
        let node = graph
            .find_node(output_node)
            .ok_or_else(|| StructuralError::UnknownNode {
                graph: graph.name().to_string(),
                node: output_node.to_string(),
            })?;
        for field in set.fields() {
            if node.find_input(field).is_none() {
                return Err(StructuralError::UnknownPort {
                    node: output_node.to_string(),
                    port: field.to_string(),
                    direction: PortDirection::Input,
                }
                .into());
            }
        }
        let has_template_port = node.find_input(TEMPLATE_FIELD).is_some();

        let mut values: Vec<(String, serde_json::Value)> = set
            .artifacts
            .iter()
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect();
        if has_template_port {
            values.push((
                TEMPLATE_FIELD.to_string(),
                serde_json::to_value(&set.templates)?,
            ));
        }
        graph.bind_all(output_node, values)?;
        log::info!(
            "Reusing {} precomputed derivative(s) for {} template(s)",
            set.artifacts.len(),
            set.templates.len()
        );
        Ok(())
    }

    /// A template-keyed field as a collection keyed like the `template`
    /// expansion
    pub fn joined(&self, set: &DerivativeSet, field: &str) -> Result<JoinedCollection> {
        if !self.templated.contains(field) {
            return Err(DerivativeSetError::NotTemplateKeyed(field.to_string()).into());
        }
        self.check(set)?;
        let values = match set.get(field) {
            Some(serde_json::Value::Array(items)) => items.clone(),
            Some(other) => vec![other.clone()],
            None => Vec::new(),
        };
        let keys: Vec<BranchKey> = set
            .templates
            .iter()
            .map(|t| BranchKey::single(TEMPLATE_FIELD, t.clone()))
            .collect();
        let reported = keys.iter().cloned().zip(values).collect();
        JoinedCollection::from_branches(TEMPLATE_FIELD, &keys, reported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::graph::Node;
    use crate::types::{PortDefinition, PortKind};
    use serde_json::json;

    fn cache() -> DerivativeCache {
        DerivativeCache::new(["t2w_preproc", "t2w_mask", "std_preproc", "std_mask"])
            .templated(["std_preproc", "std_mask"])
    }

    fn full_set() -> DerivativeSet {
        DerivativeSet::new(vec!["MouseIn".into(), "TMBTA".into()])
            .with_artifact("t2w_preproc", json!("/out/sub-01_desc-preproc_T2w.nii.gz"))
            .with_artifact("t2w_mask", json!("/out/sub-01_desc-brain_mask.nii.gz"))
            .with_artifact("std_preproc", json!(["/out/mousein.nii.gz", "/out/tmbta.nii.gz"]))
            .with_artifact("std_mask", json!(["/out/mousein_mask.nii.gz", "/out/tmbta_mask.nii.gz"]))
    }

    #[test]
    fn test_incomplete_set_lists_missing_fields() {
        let set = DerivativeSet::new(vec!["MouseIn".into()])
            .with_artifact("t2w_preproc", json!("/out/preproc.nii.gz"));
        let err = cache().check(&set).unwrap_err();
        match err {
            PipelineError::Derivatives(DerivativeSetError::IncompleteDerivativeSet { missing }) => {
                assert_eq!(missing, vec!["t2w_mask", "std_preproc", "std_mask"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_template_count_mismatch() {
        let set = full_set().with_artifact("std_mask", json!(["/out/only_one.nii.gz"]));
        let err = cache().check(&set).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Derivatives(DerivativeSetError::TemplateCountMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_deserialize_flat_dictionary() {
        let set: DerivativeSet = serde_json::from_value(json!({
            "template": ["MouseIn"],
            "t2w_preproc": "/out/preproc.nii.gz",
            "std_preproc": ["/out/std.nii.gz"]
        }))
        .unwrap();
        assert_eq!(set.templates(), &["MouseIn".to_string()]);
        assert_eq!(set.fields().collect::<Vec<_>>(), vec!["std_preproc", "t2w_preproc"]);
    }

    #[test]
    fn test_bind_outputs_onto_output_node() {
        let mut graph = WorkflowGraph::new("anat_preproc_wf");
        graph
            .add_node(Node::identity(
                "outputnode",
                vec![
                    PortDefinition::optional("t2w_preproc", PortKind::Image),
                    PortDefinition::optional("t2w_mask", PortKind::Mask),
                    PortDefinition::optional("std_preproc", PortKind::Image).list(),
                    PortDefinition::optional("std_mask", PortKind::Mask).list(),
                    PortDefinition::optional("template", PortKind::Template).list(),
                ],
            ))
            .unwrap();

        cache()
            .bind_outputs(&full_set(), &mut graph, "outputnode")
            .unwrap();
        let node = graph.find_node("outputnode").unwrap();
        assert_eq!(node.binding("template"), Some(&json!(["MouseIn", "TMBTA"])));
        assert_eq!(node.bindings.len(), 5);
    }

    #[test]
    fn test_bind_outputs_unknown_field() {
        let mut graph = WorkflowGraph::new("anat_preproc_wf");
        graph
            .add_node(Node::identity(
                "outputnode",
                vec![PortDefinition::optional("t2w_preproc", PortKind::Image)],
            ))
            .unwrap();
        let err = cache()
            .bind_outputs(&full_set(), &mut graph, "outputnode")
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Structural(StructuralError::UnknownPort { .. })
        ));
        assert!(graph.find_node("outputnode").unwrap().bindings.is_empty());
    }

    #[test]
    fn test_bind_outputs_is_all_or_nothing() {
        let mut graph = WorkflowGraph::new("anat_preproc_wf");
        graph
            .add_node(Node::identity(
                "inputnode",
                vec![PortDefinition::optional("t2w_mask", PortKind::Mask)],
            ))
            .unwrap();
        graph
            .add_node(Node::identity(
                "outputnode",
                vec![
                    PortDefinition::optional("t2w_preproc", PortKind::Image),
                    PortDefinition::optional("t2w_mask", PortKind::Mask),
                    PortDefinition::optional("std_preproc", PortKind::Image).list(),
                    PortDefinition::optional("std_mask", PortKind::Mask).list(),
                    PortDefinition::optional("template", PortKind::Template).list(),
                ],
            ))
            .unwrap();
        // Fields bind in name order, so std_* are bound before t2w_mask fails
        graph
            .connect("inputnode", "t2w_mask", "outputnode", "t2w_mask")
            .unwrap();

        let err = cache()
            .bind_outputs(&full_set(), &mut graph, "outputnode")
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Structural(StructuralError::PortAlreadyBound { .. })
        ));
        assert!(graph.find_node("outputnode").unwrap().bindings.is_empty());
    }

    #[test]
    fn test_joined_matches_template_keys() {
        let joined = cache().joined(&full_set(), "std_mask").unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.keys()[1], BranchKey::single("template", "TMBTA"));
        assert_eq!(joined.values()[1], json!("/out/tmbta_mask.nii.gz"));

        let err = cache().joined(&full_set(), "t2w_mask").unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Derivatives(DerivativeSetError::NotTemplateKeyed(_))
        ));
    }
}
