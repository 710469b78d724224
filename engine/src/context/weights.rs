//! Kind and moment scoring profile
//!
//! A candidate's base score comes from its kind (or the kind's category),
//! then gets a boost when its moment matches the current one and a
//! per-moment adjustment for its kind and category.

use super::ContextMoment;
use sdk::kinds::{Category, Kind};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Key into a moment's adjustment table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MomentKey {
    Kind(Kind),
    Category(Category),
}

#[derive(Debug, Clone)]
pub struct WeightProfile {
    pub type_weights: HashMap<Kind, f64>,
    pub category_weights: HashMap<Category, f64>,
    pub moment_weights: HashMap<ContextMoment, HashMap<MomentKey, f64>>,
    pub match_moment_boost: f64,
}

impl Default for WeightProfile {
    fn default() -> Self {
        use Category as C;
        use MomentKey::{Category as Cat, Kind as K};

        let category_weights: HashMap<Category, f64> = [
            (C::Primitive, 0.2),
            (C::Text, 0.8),
            (C::Code, 0.5),
            (C::Json, 0.9),
            (C::Data, 0.8),
            (C::Artifact, 1.0),
            (C::Tool, 1.8),
            (C::Capability, 0.2),
            (C::Plan, 1.1),
            (C::Diagnostic, 1.9),
            (C::Memory, 2.2),
            (C::Message, 1.1),
            (C::Summary, 2.0),
            (C::Context, 0.4),
        ]
        .into_iter()
        .collect();

        // Every kind starts at its category weight; categories without one score 0.
        let mut type_weights: HashMap<Kind, f64> = Kind::all()
            .into_iter()
            .map(|d| {
                let w = category_weights
                    .get(&d.kind.category())
                    .copied()
                    .unwrap_or(0.0);
                (d.kind, w)
            })
            .collect();
        type_weights.extend([
            (Kind::MemoryFact, 3.0),
            (Kind::MemoryQuestion, 2.8),
            (Kind::MemorySummary, 2.6),
            (Kind::SummaryCode, 2.8),
            (Kind::SummaryText, 2.4),
            (Kind::DiagnosticBuild, 3.1),
            (Kind::DiagnosticTest, 3.0),
            (Kind::DiagnosticLint, 2.7),
            (Kind::ToolError, 3.6),
            (Kind::ToolResult, 2.0),
            (Kind::ArtifactRef, 1.8),
            (Kind::ArtifactSummary, 2.2),
            (Kind::CodeGo, 0.9),
            (Kind::CodeRust, 0.9),
            (Kind::CodeTs, 0.9),
            (Kind::CodeTsx, 0.8),
            (Kind::CodeJs, 0.8),
            (Kind::CodePython, 0.9),
            (Kind::TextMarkdown, 1.1),
            (Kind::TextPrompt, 1.6),
            (Kind::MessageSystem, 2.0),
            (Kind::MessageAgent, 1.4),
            (Kind::MessageAssistant, 1.2),
            (Kind::MessageTool, 1.3),
        ]);

        let table = |entries: &[(MomentKey, f64)]| -> HashMap<MomentKey, f64> {
            entries.iter().copied().collect()
        };
        let moment_weights = HashMap::from([
            (
                ContextMoment::Plan,
                table(&[
                    (Cat(C::Plan), 1.8),
                    (Cat(C::Memory), 1.0),
                    (Cat(C::Message), 0.8),
                    (Cat(C::Tool), -0.4),
                    (Cat(C::Artifact), -0.3),
                ]),
            ),
            (
                ContextMoment::Discovery,
                table(&[
                    (Cat(C::Memory), 1.4),
                    (Cat(C::Artifact), 1.2),
                    (Cat(C::Summary), 1.3),
                    (Cat(C::Tool), 0.7),
                    (Cat(C::Code), 0.4),
                ]),
            ),
            (
                ContextMoment::ToolLoop,
                table(&[
                    (Cat(C::Tool), 2.4),
                    (K(Kind::ToolError), 1.4),
                    (Cat(C::Artifact), 1.2),
                    (K(Kind::ArtifactRef), 0.8),
                    (Cat(C::Diagnostic), 1.2),
                    (Cat(C::Summary), 0.9),
                    (Cat(C::Memory), 0.5),
                    (K(Kind::MessageAssistant), -0.4),
                ]),
            ),
            (
                ContextMoment::Synthesis,
                table(&[
                    (Cat(C::Summary), 2.0),
                    (Cat(C::Memory), 1.6),
                    (Cat(C::Artifact), 0.8),
                    (Cat(C::Diagnostic), 1.0),
                    (Cat(C::Tool), 0.4),
                    (Cat(C::Code), -0.3),
                ]),
            ),
            (
                ContextMoment::Validate,
                table(&[
                    (Cat(C::Diagnostic), 2.5),
                    (Cat(C::Tool), 1.2),
                    (Cat(C::Summary), 1.0),
                    (Cat(C::Memory), 0.6),
                ]),
            ),
        ]);

        Self {
            type_weights,
            category_weights,
            moment_weights,
            match_moment_boost: 1.0,
        }
    }
}

impl WeightProfile {
    /// Process-wide default profile
    pub fn shared() -> &'static WeightProfile {
        static DEFAULT: OnceLock<WeightProfile> = OnceLock::new();
        DEFAULT.get_or_init(WeightProfile::default)
    }

    fn moment_boost(&self, current: ContextMoment, item: ContextMoment, kind: Kind) -> f64 {
        let mut boost = 0.0;
        if item == current {
            boost += self.match_moment_boost;
        }
        if item == ContextMoment::General {
            boost += 0.3;
        }
        if let Some(weights) = self.moment_weights.get(&current) {
            boost += weights.get(&MomentKey::Kind(kind)).copied().unwrap_or(0.0);
            boost += weights
                .get(&MomentKey::Category(kind.category()))
                .copied()
                .unwrap_or(0.0);
        }
        boost
    }

    /// Score of an item of `kind` recorded at `item` moment, seen from `current`
    pub fn score(&self, kind: Kind, item: ContextMoment, current: ContextMoment) -> f64 {
        let base = self
            .type_weights
            .get(&kind)
            .or_else(|| self.category_weights.get(&kind.category()))
            .copied()
            .unwrap_or(0.0);
        base + self.moment_boost(current, item, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_type_override_beats_category() {
        let p = WeightProfile::shared();
        assert!(close(p.type_weights[&Kind::ToolError], 3.6));
        assert!(close(p.type_weights[&Kind::DiagnosticTest], 3.0));
        assert!(close(p.type_weights[&Kind::JsonArray], 0.9));
        assert!(close(p.type_weights[&Kind::DbSchema], 0.0));
    }

    #[test]
    fn test_score_with_moments() {
        let p = WeightProfile::shared();
        // tool/error at tool_loop: 3.6 + 1.0 match + 1.4 kind + 2.4 category
        let s = p.score(Kind::ToolError, ContextMoment::ToolLoop, ContextMoment::ToolLoop);
        assert!(close(s, 8.4), "{s}");
        // memory/fact recorded at general, seen from synthesis: 3.0 + 0.3 + 1.6
        let s = p.score(Kind::MemoryFact, ContextMoment::General, ContextMoment::Synthesis);
        assert!(close(s, 4.9), "{s}");
        // general item under general moment: match + general bonus
        let s = p.score(Kind::TextPlain, ContextMoment::General, ContextMoment::General);
        assert!(close(s, 0.8 + 1.3), "{s}");
    }

    #[test]
    fn test_plan_moment_penalizes_tools() {
        let p = WeightProfile::shared();
        let s = p.score(Kind::ToolResult, ContextMoment::ToolLoop, ContextMoment::Plan);
        assert!(close(s, 2.0 - 0.4), "{s}");
    }
}
