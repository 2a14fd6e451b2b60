//! The ordered stage plan a parse run walks through.

use crate::extractors::{ExtractionInput, ExtractorKind};

/// Which piece of raw input a stage consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInput {
    Text,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub name: &'static str,
    pub kind: ExtractorKind,
    pub requires: StageInput,
}

impl StageSpec {
    /// A stage whose required input is absent is skipped, not failed.
    pub fn is_runnable(&self, input: &ExtractionInput) -> bool {
        match self.requires {
            StageInput::Text => input.text.is_some(),
            StageInput::Image => input.image.is_some(),
        }
    }
}

/// Default plan, cheapest first. Later stages overwrite nothing; the merge
/// step unions values, so order only affects which value is seen first.
pub fn default_stages() -> Vec<StageSpec> {
    vec![
        StageSpec {
            name: "pattern_extraction",
            kind: ExtractorKind::Pattern,
            requires: StageInput::Text,
        },
        StageSpec {
            name: "entity_extraction",
            kind: ExtractorKind::Entity,
            requires: StageInput::Text,
        },
        StageSpec {
            name: "document_vision",
            kind: ExtractorKind::Vision,
            requires: StageInput::Image,
        },
        StageSpec {
            name: "summarization",
            kind: ExtractorKind::Summary,
            requires: StageInput::Text,
        },
        StageSpec {
            name: "structured_extraction",
            kind: ExtractorKind::Structured,
            requires: StageInput::Text,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_runs_pattern_first() {
        let stages = default_stages();
        assert_eq!(stages.len(), 5);
        assert_eq!(stages[0].name, "pattern_extraction");
        assert_eq!(stages[0].kind, ExtractorKind::Pattern);
    }

    #[test]
    fn runnability_follows_available_input() {
        let stages = default_stages();
        let text_only = ExtractionInput::text("hello");
        let vision = stages.iter().find(|s| s.requires == StageInput::Image).unwrap();
        assert!(!vision.is_runnable(&text_only));
        assert!(stages[0].is_runnable(&text_only));

        let image_only = ExtractionInput::image(vec![0u8; 8]);
        assert!(vision.is_runnable(&image_only));
        assert!(!stages[0].is_runnable(&image_only));
    }
}
