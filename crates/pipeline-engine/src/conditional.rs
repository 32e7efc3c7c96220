//! Conditional sub-graph assembly
//!
//! The skull-stripping stage has two variants. Which one is built depends on
//! the configured mode and, in `auto` mode, on a probe of the input images
//! run at graph-build time. Variants are registered declaratively so they
//! can be listed; a variant registered as unsupported fails before its
//! builder runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};
use crate::graph::WorkflowGraph;
use crate::probe::{BorderIntensityClassifier, ProbeInputs, StrippedClassifier};

/// How skull stripping is decided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkullStripMode {
    /// Always run brain extraction
    #[default]
    Force,
    /// Inputs are declared skull-stripped
    Skip,
    /// Probe the inputs
    Auto,
}

impl std::str::FromStr for SkullStripMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "force" => Ok(Self::Force),
            "skip" => Ok(Self::Skip),
            "auto" => Ok(Self::Auto),
            other => Err(ConfigurationError::Invalid(format!(
                "unknown skull-strip mode '{}' (expected force, skip or auto)",
                other
            ))),
        }
    }
}

/// Sub-graph variants of the skull-stripping stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StripVariant {
    /// Bias correction plus atlas-based brain extraction
    BrainExtraction,
    /// Inputs already have the skull removed
    PreStripped,
}

impl std::fmt::Display for StripVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BrainExtraction => write!(f, "brain_extraction"),
            Self::PreStripped => write!(f, "pre_stripped"),
        }
    }
}

/// The resolved variant and whether the probe ran to get it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub variant: StripVariant,
    pub probed: bool,
}

type VariantBuilder<'a> = Box<dyn Fn() -> Result<WorkflowGraph> + 'a>;

enum VariantEntry<'a> {
    Supported(VariantBuilder<'a>),
    Unsupported(String),
}

/// Selects and builds one sub-graph variant
pub struct ConditionalAssembler<'a> {
    classifier: Box<dyn StrippedClassifier + 'a>,
    variants: BTreeMap<StripVariant, VariantEntry<'a>>,
}

impl Default for ConditionalAssembler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ConditionalAssembler<'a> {
    /// An assembler with the border-intensity classifier and no variants
    pub fn new() -> Self {
        Self {
            classifier: Box::new(BorderIntensityClassifier::default()),
            variants: BTreeMap::new(),
        }
    }

    /// Replace the probe classifier
    pub fn with_classifier(mut self, classifier: impl StrippedClassifier + 'a) -> Self {
        self.classifier = Box::new(classifier);
        self
    }

    /// Register a buildable variant
    pub fn variant(
        mut self,
        variant: StripVariant,
        builder: impl Fn() -> Result<WorkflowGraph> + 'a,
    ) -> Self {
        self.variants
            .insert(variant, VariantEntry::Supported(Box::new(builder)));
        self
    }

    /// Register a variant that is known but not implemented
    pub fn unsupported(mut self, variant: StripVariant, reason: impl Into<String>) -> Self {
        self.variants
            .insert(variant, VariantEntry::Unsupported(reason.into()));
        self
    }

    /// Registered variants and whether each can be built
    pub fn variants(&self) -> Vec<(StripVariant, bool)> {
        self.variants
            .iter()
            .map(|(v, entry)| (*v, matches!(entry, VariantEntry::Supported(_))))
            .collect()
    }

    /// Map the mode to a variant, probing the inputs only in `auto` mode
    pub fn resolve(&self, mode: SkullStripMode, probe: &dyn ProbeInputs) -> Result<Decision> {
        let decision = match mode {
            SkullStripMode::Force => Decision {
                variant: StripVariant::BrainExtraction,
                probed: false,
            },
            SkullStripMode::Skip => Decision {
                variant: StripVariant::PreStripped,
                probed: false,
            },
            SkullStripMode::Auto => {
                let volumes = probe.volumes()?;
                let stripped = self.classifier.classify(&volumes);
                log::info!(
                    "Probed {} image(s): {}",
                    volumes.len(),
                    if stripped {
                        "already skull-stripped"
                    } else {
                        "skull present"
                    }
                );
                Decision {
                    variant: if stripped {
                        StripVariant::PreStripped
                    } else {
                        StripVariant::BrainExtraction
                    },
                    probed: true,
                }
            }
        };
        Ok(decision)
    }

    /// Resolve the variant and build its sub-graph
    pub fn assemble(&self, mode: SkullStripMode, probe: &dyn ProbeInputs) -> Result<WorkflowGraph> {
        let decision = self.resolve(mode, probe)?;
        match self.variants.get(&decision.variant) {
            Some(VariantEntry::Supported(build)) => {
                log::info!("Skull stripping: {:?} mode selects {}", mode, decision.variant);
                build()
            }
            Some(VariantEntry::Unsupported(reason)) => Err(ConfigurationError::Unsupported {
                variant: decision.variant.to_string(),
                reason: reason.clone(),
            }
            .into()),
            None => Err(ConfigurationError::UnknownVariant(decision.variant.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::probe::Volume;
    use std::cell::Cell;

    struct Counting<'c> {
        calls: &'c Cell<usize>,
        answer: bool,
    }

    impl StrippedClassifier for Counting<'_> {
        fn is_skull_stripped(&self, _volume: &Volume) -> bool {
            self.calls.set(self.calls.get() + 1);
            self.answer
        }
    }

    struct NoImages;

    impl ProbeInputs for NoImages {
        fn volumes(&self) -> Result<Vec<Volume>> {
            panic!("probe inputs must not be loaded");
        }
    }

    fn head() -> Volume {
        Volume::from_fn([4, 4, 4], |_, _, _| 100.0).unwrap()
    }

    fn assembler<'a>(built: &'a Cell<bool>) -> ConditionalAssembler<'a> {
        ConditionalAssembler::new()
            .variant(StripVariant::BrainExtraction, move || {
                built.set(true);
                Ok(WorkflowGraph::new("brain_extraction_wf"))
            })
            .unsupported(
                StripVariant::PreStripped,
                "cannot run on already skull-stripped images",
            )
    }

    #[test]
    fn test_force_and_skip_never_probe() {
        let calls = Cell::new(0);
        let built = Cell::new(false);
        let asm = assembler(&built).with_classifier(Counting {
            calls: &calls,
            answer: true,
        });

        let graph = asm.assemble(SkullStripMode::Force, &NoImages).unwrap();
        assert_eq!(graph.name(), "brain_extraction_wf");
        let decision = asm.resolve(SkullStripMode::Skip, &NoImages).unwrap();
        assert_eq!(decision.variant, StripVariant::PreStripped);
        assert!(!decision.probed);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_unsupported_variant_fails_before_building() {
        let built = Cell::new(false);
        let asm = assembler(&built);
        let err = asm.assemble(SkullStripMode::Skip, &NoImages).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration(ConfigurationError::Unsupported { ref variant, .. })
                if variant == "pre_stripped"
        ));
        assert!(!built.get());
    }

    #[test]
    fn test_auto_uses_probe() {
        let built = Cell::new(false);
        let asm = assembler(&built);
        let decision = asm.resolve(SkullStripMode::Auto, &vec![head()]).unwrap();
        assert_eq!(decision.variant, StripVariant::BrainExtraction);
        assert!(decision.probed);

        let stripped = vec![Volume::new([3, 3, 3], vec![0.0; 27]).unwrap()];
        let err = asm.assemble(SkullStripMode::Auto, &stripped).unwrap_err();
        assert!(err.is_configuration());
        assert!(!built.get());
    }

    #[test]
    fn test_unregistered_variant() {
        let asm = ConditionalAssembler::new();
        let err = asm.assemble(SkullStripMode::Force, &NoImages).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration(ConfigurationError::UnknownVariant(_))
        ));
    }

    #[test]
    fn test_variants_are_listed() {
        let built = Cell::new(false);
        assert_eq!(
            assembler(&built).variants(),
            vec![
                (StripVariant::BrainExtraction, true),
                (StripVariant::PreStripped, false)
            ]
        );
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("auto".parse::<SkullStripMode>().unwrap(), SkullStripMode::Auto);
        assert!("maybe".parse::<SkullStripMode>().is_err());
        let mode: SkullStripMode = serde_json::from_str("\"skip\"").unwrap();
        assert_eq!(mode, SkullStripMode::Skip);
    }
}
