//! Software and hardware dependencies of a test, checked against the
//! device under test before any fixture is set up.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Description of the device under test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dut {
    pub model: String,
    /// Hardware features, e.g. `touchscreen`, `keyboard`, `microphone`.
    pub features: BTreeSet<String>,
    /// Software features, e.g. `chrome`, `lacros`, `google_virtual_keyboard`.
    pub software: BTreeSet<String>,
}

impl Dut {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.features.insert(feature.into());
        self
    }

    #[must_use]
    pub fn software(mut self, dep: impl Into<String>) -> Self {
        self.software.insert(dep.into());
        self
    }
}

/// Software features a test needs. A leading `!` requires absence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareDeps(pub Vec<String>);

impl SoftwareDeps {
    pub fn new<I, S>(deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(deps.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn merged(&self, extra: &Self) -> Self {
        let mut out = self.0.clone();
        for dep in &extra.0 {
            if !out.contains(dep) {
                out.push(dep.clone());
            }
        }
        Self(out)
    }

    fn unmet(&self, dut: &Dut) -> Vec<String> {
        self.0
            .iter()
            .filter_map(|dep| match dep.strip_prefix('!') {
                Some(name) if dut.software.contains(name) => {
                    Some(format!("software {name} present"))
                }
                Some(_) => None,
                None if !dut.software.contains(dep) => Some(format!("missing software {dep}")),
                None => None,
            })
            .collect()
    }
}

/// Hardware conditions: model allow and deny lists plus required features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareDeps {
    pub models: Vec<String>,
    pub skip_on_models: Vec<String>,
    pub features: Vec<String>,
}

impl HardwareDeps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run only on these models.
    #[must_use]
    pub fn model(mut self, models: &[&str]) -> Self {
        self.models.extend(models.iter().map(|m| (*m).to_string()));
        self
    }

    #[must_use]
    pub fn skip_on_model(mut self, models: &[&str]) -> Self {
        self.skip_on_models.extend(models.iter().map(|m| (*m).to_string()));
        self
    }

    #[must_use]
    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    /// Both sets of conditions at once.
    #[must_use]
    pub fn merged(&self, extra: &Self) -> Self {
        let mut out = self.clone();
        out.models.extend(extra.models.iter().cloned());
        out.skip_on_models.extend(extra.skip_on_models.iter().cloned());
        out.features.extend(extra.features.iter().cloned());
        out
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.skip_on_models.is_empty() && self.features.is_empty()
    }

    fn unmet(&self, dut: &Dut) -> Vec<String> {
        let mut reasons = Vec::new();
        if !self.models.is_empty() && !self.models.contains(&dut.model) {
            reasons.push(format!("model {} not in {:?}", dut.model, self.models));
        }
        if self.skip_on_models.contains(&dut.model) {
            reasons.push(format!("model {} is skipped", dut.model));
        }
        for feature in &self.features {
            if !dut.features.contains(feature) {
                reasons.push(format!("missing hardware feature {feature}"));
            }
        }
        reasons
    }
}

/// Reasons the variant cannot run on `dut`; empty when it can.
pub fn check(sw: &SoftwareDeps, hw: &HardwareDeps, dut: &Dut) -> Vec<String> {
    let mut reasons = sw.unmet(dut);
    reasons.extend(hw.unmet(dut));
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_presence_and_absence() {
        let dut = Dut::new("eve").software("chrome").software("lacros");
        assert!(check(&SoftwareDeps::new(["chrome"]), &HardwareDeps::new(), &dut).is_empty());
        let reasons = check(
            &SoftwareDeps::new(["chrome", "!lacros", "arc"]),
            &HardwareDeps::new(),
            &dut,
        );
        assert_eq!(reasons, vec!["software lacros present", "missing software arc"]);
    }

    #[test]
    fn model_lists_and_features() {
        let dut = Dut::new("betty").feature("keyboard");
        let hw = HardwareDeps::new().skip_on_model(&["betty"]).feature("touchscreen");
        let reasons = check(&SoftwareDeps::default(), &hw, &dut);
        assert_eq!(reasons.len(), 2);

        let only_eve = HardwareDeps::new().model(&["eve"]);
        assert_eq!(check(&SoftwareDeps::default(), &only_eve, &dut).len(), 1);
        assert!(check(&SoftwareDeps::default(), &only_eve, &Dut::new("eve")).is_empty());
    }

    #[test]
    fn merged_keeps_both_sides() {
        let a = SoftwareDeps::new(["chrome"]);
        let b = SoftwareDeps::new(["chrome", "lacros"]);
        assert_eq!(a.merged(&b).0, vec!["chrome", "lacros"]);
        let hw = HardwareDeps::new()
            .feature("keyboard")
            .merged(&HardwareDeps::new().skip_on_model(&["kevin"]));
        assert_eq!(hw.features, vec!["keyboard"]);
        assert_eq!(hw.skip_on_models, vec!["kevin"]);
    }
}
