// Runner Registry - language tag → runner, read-only after startup
use crate::config::{EngineConfig, LanguageConfig};
use crate::error::JudgeError;
use crate::runner::{self, Runner};
use crate::sandbox::Limits;
use arbiter_common::types::LanguageTag;
use std::collections::HashMap;
use std::sync::Arc;

type RunnerFactory = fn(&LanguageConfig) -> Box<dyn Runner>;

/// Runner kinds that configuration may refer to.
const RUNNERS: &[(&str, RunnerFactory)] = &[
    ("python", runner::python::build),
    ("javascript", runner::javascript::build),
    ("java", runner::java::build),
    ("cpp", runner::cpp::build),
    ("rust", runner::rust::build),
];

pub fn is_known_runner(kind: &str) -> bool {
    RUNNERS.iter().any(|(name, _)| *name == kind)
}

pub fn known_runners() -> Vec<&'static str> {
    RUNNERS.iter().map(|(name, _)| *name).collect()
}

/// A runner together with the limits configured for its language.
#[derive(Clone)]
pub struct RegisteredRunner {
    pub runner: Arc<dyn Runner>,
    pub run_limits: Limits,
    pub build_limits: Limits,
}

#[derive(Clone, Default)]
pub struct RunnerRegistry {
    runners: HashMap<LanguageTag, RegisteredRunner>,
}

impl RunnerRegistry {
    pub fn from_config(config: &EngineConfig) -> Result<Self, JudgeError> {
        let mut registry = Self::default();
        for lang in &config.languages {
            let factory = RUNNERS
                .iter()
                .find(|(name, _)| *name == lang.runner)
                .map(|(_, factory)| *factory)
                .ok_or_else(|| JudgeError::UnsupportedLanguage(LanguageTag::new(&lang.runner)))?;
            registry.register(
                lang.tag(),
                Arc::from(factory(lang)),
                lang.run_limits(),
                lang.build_limits(),
            );
        }
        Ok(registry)
    }

    /// Adds or replaces the runner for `tag`. `unknown` is never registered.
    pub fn register(
        &mut self,
        tag: LanguageTag,
        runner: Arc<dyn Runner>,
        run_limits: Limits,
        build_limits: Limits,
    ) {
        if tag.is_unknown() {
            return;
        }
        self.runners.insert(
            tag,
            RegisteredRunner {
                runner,
                run_limits,
                build_limits,
            },
        );
    }

    pub fn lookup(&self, tag: &LanguageTag) -> Result<&RegisteredRunner, JudgeError> {
        self.runners
            .get(tag)
            .ok_or_else(|| JudgeError::UnsupportedLanguage(tag.clone()))
    }

    pub fn languages(&self) -> Vec<&LanguageTag> {
        let mut tags: Vec<_> = self.runners.keys().collect();
        tags.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_json;

    #[test]
    fn test_registry_from_config() {
        let config = EngineConfig::from_json(&sample_json()).unwrap();
        let registry = RunnerRegistry::from_config(&config).unwrap();

        let python = registry.lookup(&LanguageTag::new("python")).unwrap();
        assert_eq!(python.runner.language(), &LanguageTag::new("python"));
        assert_eq!(python.run_limits.wall_clock_ms, 5000);
        assert_eq!(python.build_limits.wall_clock_ms, 10000);

        let names: Vec<_> = registry.languages().iter().map(|t| t.as_str()).collect();
        assert_eq!(names, vec!["cpp", "python"]);
    }

    #[test]
    fn test_lookup_unsupported() {
        let config = EngineConfig::from_json(&sample_json()).unwrap();
        let registry = RunnerRegistry::from_config(&config).unwrap();

        let err = registry.lookup(&LanguageTag::new("cobol")).err().unwrap();
        assert!(matches!(err, JudgeError::UnsupportedLanguage(ref t) if t.as_str() == "cobol"));
        assert!(registry.lookup(&LanguageTag::unknown()).is_err());
    }

    #[test]
    fn test_known_runner_table() {
        for kind in ["python", "javascript", "java", "cpp", "rust"] {
            assert!(is_known_runner(kind));
        }
        assert!(!is_known_runner("unknown"));
    }
}
