use crate::types::{Category, Likelihood, SafetyAnnotation};

/// Maps a safety annotation to a pass/fail verdict. An image fails when any
/// monitored category reaches its threshold.
#[derive(Debug, Clone)]
pub struct VerdictPolicy {
    rules: Vec<(Category, Likelihood)>,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self::new(vec![
            (Category::Adult, Likelihood::Likely),
            (Category::Violence, Likelihood::Likely),
            (Category::Racy, Likelihood::Likely),
        ])
    }
}

impl VerdictPolicy {
    pub fn new(rules: Vec<(Category, Likelihood)>) -> Self {
        Self { rules }
    }

    pub fn evaluate(&self, annotation: &SafetyAnnotation) -> bool {
        self.rules
            .iter()
            .all(|&(category, threshold)| annotation.likelihood(category) < threshold)
    }
}
