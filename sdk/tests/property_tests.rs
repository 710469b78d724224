use proptest::prelude::*;
use sdk::errors::{EngineError, RelayErrorExt};
use sdk::kinds::{kinds_compatible, Kind};

// Every error variant carries a non-empty, static hint that never echoes the
// raw name or spec it was built from.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(raw in "zq[a-z]{4,10}") {
        let errs = vec![
            EngineError::Config(raw.clone()),
            EngineError::UnknownAgent { name: raw.clone(), available: vec![] },
            EngineError::UnknownProvider { agent: raw.clone(), provider: raw.clone() },
            EngineError::UnknownSkill(raw.clone()),
            EngineError::EmptyStage { spec: raw.clone() },
            EngineError::DuplicateAgent { name: raw.clone(), spec: raw.clone() },
            EngineError::DependencyCycle { spec: raw.clone(), agents: vec![raw.clone()] },
            EngineError::DependencyDeadlock { spec: raw.clone() },
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&raw));
            prop_assert!(err.is_recoverable());
        }
    }
}

// Normalization ignores case, surrounding whitespace and the choice of
// separator between category and name.
proptest! {
    #[test]
    fn test_kind_normalization_is_separator_and_case_insensitive(
        idx in 0usize..64,
        sep in prop::sample::select(vec!["/", ".", "_"]),
        upper in any::<bool>(),
        pad in "[ ]{0,3}",
    ) {
        let all = Kind::all();
        let def = all[idx % all.len()];
        let canonical = def.kind.as_str();
        let mut raw = canonical.replacen('/', sep, 1);
        if upper {
            raw = raw.to_uppercase();
        }
        let raw = format!("{pad}{raw}{pad}");
        prop_assert_eq!(Kind::normalize(&raw), Some(def.kind));
    }

    #[test]
    fn test_compatibility_is_reflexive(idx in 0usize..64) {
        let all = Kind::all();
        let kind = all[idx % all.len()].kind;
        prop_assert!(kinds_compatible(kind, kind));
    }
}
