use crate::error::UpgradeError;
use crate::title::TitleTemplate;
use crate::upgrade::Upgrader;
use crate::version::{PythonVersion, VersionRange};

/// One rendering of a fragment, valid from `version` on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderStep {
    pub version: PythonVersion,
    pub code: String,
    pub title: String,
}

/// The versions at which a fragment's upgraded form changes.
///
/// Steps are strictly ascending by version, the first step is always the
/// unmodified input at the range minimum, and adjacent steps never carry
/// identical code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    steps: Vec<LadderStep>,
    skipped: Vec<UpgradeError>,
}

impl Ladder {
    pub fn steps(&self) -> &[LadderStep] {
        &self.steps
    }

    /// Candidate versions the oracle failed on while others succeeded.
    pub fn skipped(&self) -> &[UpgradeError] {
        &self.skipped
    }

    pub fn is_single(&self) -> bool {
        self.steps.len() == 1
    }

    pub fn into_steps(self) -> Vec<LadderStep> {
        self.steps
    }
}

/// Builds [`Ladder`]s for fragments of the upgradable language.
pub struct LadderBuilder<'a> {
    range: VersionRange,
    title: &'a TitleTemplate,
    languages: &'a [String],
    upgrader: &'a dyn Upgrader,
}

impl<'a> LadderBuilder<'a> {
    pub fn new(
        range: VersionRange,
        title: &'a TitleTemplate,
        languages: &'a [String],
        upgrader: &'a dyn Upgrader,
    ) -> Self {
        Self {
            range,
            title,
            languages,
            upgrader,
        }
    }

    /// Exact, case-sensitive match against the configured language tags.
    pub fn accepts(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l == language)
    }

    /// Asks the oracle for every candidate above the minimum and keeps the
    /// versions whose output differs from the last retained step.
    ///
    /// Only adjacent duplicates collapse: a later step that happens to equal
    /// an earlier, non-adjacent one is kept. A candidate the oracle fails on
    /// is skipped; if every candidate fails, the first failure is returned.
    pub fn build(&self, code: &str, language: &str) -> Result<Ladder, UpgradeError> {
        let min = self.range.min();
        let mut steps = vec![LadderStep {
            version: min,
            code: code.to_string(),
            title: self.title.render(min),
        }];
        let mut skipped = Vec::new();

        if !self.accepts(language) {
            return Ok(Ladder { steps, skipped });
        }

        let mut attempted = 0;
        for version in self.range.candidates() {
            attempted += 1;
            let upgraded = match self.upgrader.upgrade(code, version) {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    log::debug!("upgrade to {} failed: {}", version, e);
                    skipped.push(e);
                    continue;
                }
            };

            let previous = &steps[steps.len() - 1].code;
            if upgraded != *previous {
                steps.push(LadderStep {
                    version,
                    code: upgraded,
                    title: self.title.render(version),
                });
            }
        }

        if attempted > 0 && skipped.len() == attempted {
            return Err(skipped.swap_remove(0));
        }

        Ok(Ladder { steps, skipped })
    }
}
