//! Anatomical Workflows
//!
//! The anatomical MRI preprocessing pipeline, assembled on the pipeline
//! engine. Processing Units are declared here with their port metadata and
//! collected at link time; the workflow builders wire them into graphs.
//!
//! # Stages
//!
//! - **Reference**: conform the T2w images and build a reference
//! - **Brain extraction**: bias correction and atlas-based skull stripping
//! - **Segmentation**: tissue classes and probability maps
//! - **Normalization**: registration to every requested template
//! - **Outputs**: reportlets and derivative files

pub mod config;
pub mod constants;
pub mod dry_run;
pub mod units;
pub mod util;
pub mod volume;
pub mod workflows;

pub use config::{ConfigError, PipelineConfig};
pub use dry_run::dry_run_registry;
pub use units::*;
pub use volume::JsonVolumeLoader;
pub use workflows::{anat_preproc_graph, ANAT_PREPROC_WF};

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use pipeline_engine::{
        ExecutionPlan, GraphExecutor, NodeState, Result, UnitRegistry, Volume, VolumeLoader,
    };

    use super::*;

    #[test]
    fn test_inventory_collects_all_builtins() {
        let registry = UnitRegistry::with_builtins();
        assert_eq!(registry.unit_types().len(), 20, "Expected 20 built-in units");

        // Spot-check known types
        assert!(registry.has_unit_type("conform-image"));
        assert!(registry.has_unit_type("n4-bias-correction"));
        assert!(registry.has_unit_type("fast-segmentation"));
        assert!(registry.has_unit_type("robust-normalization"));
        assert!(registry.has_unit_type("apply-transforms-list"));
        assert!(registry.has_unit_type("derivatives-sink"));
    }

    struct Unused;

    impl VolumeLoader for Unused {
        fn load(&self, path: &std::path::Path) -> Result<Volume> {
            panic!("unexpected probe of {}", path.display())
        }
    }

    #[tokio::test]
    async fn test_dry_run_joins_templates_in_order() {
        let t2w = vec![
            PathBuf::from("/bids/sub-01/anat/sub-01_run-1_T2w.nii.gz"),
            PathBuf::from("/bids/sub-01/anat/sub-01_run-2_T2w.nii.gz"),
        ];
        let mut config = PipelineConfig::new("/bids", "/out", t2w.clone());
        config.templates = vec!["MouseIn".into(), "Fischer344".into()];

        let mut graph = anat_preproc_graph(&config, &Unused).unwrap();
        graph.bind_input("t2w", serde_json::json!(t2w)).unwrap();
        let plan = ExecutionPlan::build(&graph).unwrap();

        let executor = GraphExecutor::new(Arc::new(dry_run_registry()));
        let report = executor.execute(&plan).await.unwrap();
        assert!(report.is_success(), "failed: {:?}", report.failed());

        let outputs = report.exposed_outputs(plan.graph());
        assert_eq!(
            outputs["template"],
            serde_json::json!(["MouseIn", "Fischer344"])
        );
        assert_eq!(
            outputs["std_preproc"],
            serde_json::json!([
                "anat_norm_wf.tpl_moving[template=MouseIn]/output_image",
                "anat_norm_wf.tpl_moving[template=Fischer344]/output_image",
            ])
        );
        assert_eq!(
            outputs["t2w_preproc"],
            serde_json::json!("brain_extraction_wf.n4_final/output_image")
        );
        assert!(matches!(
            report.state("anat_derivatives_wf.ds_t2w_ref_xfms"),
            Some(NodeState::Completed { .. })
        ));
    }
}
