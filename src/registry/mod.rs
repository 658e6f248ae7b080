//! Test registration and variant enumeration.
//!
//! A [`TestCase`] with N [`Param`]s enumerates to N runnable [`Variant`]s
//! named `<test>.<param>`; a test without params is one variant named after
//! the test.

pub mod deps;
pub mod select;

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use crate::core::context::Context;
use crate::core::errors::{IthError, Result};
use crate::fixture::FixtureSpec;
use crate::runner::state::State;

pub use deps::{Dut, HardwareDeps, SoftwareDeps};
pub use select::{AttrExpr, Selection};

/// Body of a test. Returning an error marks the test failed.
pub type TestFn = Arc<dyn Fn(&Context, &State) -> Result<()> + Send + Sync>;

/// Free-form value a param passes to the test body.
pub type ParamValue = Arc<dyn Any + Send + Sync>;

static TEST_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*\.[A-Z][A-Za-z0-9]*$").ok());
static PARAM_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]*$").ok());

fn registration(details: impl Into<String>) -> IthError {
    IthError::Registration {
        details: details.into(),
    }
}

fn matches(re: &LazyLock<Option<Regex>>, s: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(s))
}

/// One variant of a test case.
#[derive(Clone, Default)]
pub struct Param {
    pub name: String,
    pub extra_attrs: Vec<String>,
    pub extra_software_deps: SoftwareDeps,
    pub extra_hardware_deps: HardwareDeps,
    pub extra_data: Vec<String>,
    pub fixture: Option<String>,
    pub pre: Option<String>,
    pub timeout: Option<Duration>,
    pub val: Option<ParamValue>,
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("fixture", &self.fixture)
            .field("pre", &self.pre)
            .field("extra_attrs", &self.extra_attrs)
            .finish_non_exhaustive()
    }
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn attrs(mut self, attrs: &[&str]) -> Self {
        self.extra_attrs.extend(attrs.iter().map(|a| (*a).to_string()));
        self
    }

    #[must_use]
    pub fn software_deps(mut self, deps: &[&str]) -> Self {
        self.extra_software_deps = self.extra_software_deps.merged(&SoftwareDeps::new(deps.iter().copied()));
        self
    }

    #[must_use]
    pub fn hardware_deps(mut self, deps: HardwareDeps) -> Self {
        self.extra_hardware_deps = self.extra_hardware_deps.merged(&deps);
        self
    }

    #[must_use]
    pub fn data(mut self, files: &[&str]) -> Self {
        self.extra_data.extend(files.iter().map(|f| (*f).to_string()));
        self
    }

    #[must_use]
    pub fn fixture(mut self, fixture: impl Into<String>) -> Self {
        self.fixture = Some(fixture.into());
        self
    }

    /// Precondition name. Preconditions resolve through the fixture table.
    #[must_use]
    pub fn pre(mut self, pre: impl Into<String>) -> Self {
        self.pre = Some(pre.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn val<T: Any + Send + Sync>(mut self, val: T) -> Self {
        self.val = Some(Arc::new(val));
        self
    }
}

/// Immutable declaration of a test.
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub func: TestFn,
    pub desc: String,
    pub contacts: Vec<String>,
    pub attrs: Vec<String>,
    pub software_deps: SoftwareDeps,
    pub hardware_deps: HardwareDeps,
    pub fixture: Option<String>,
    pub pre: Option<String>,
    pub data: Vec<String>,
    pub timeout: Option<Duration>,
    pub params: Vec<Param>,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("fixture", &self.fixture)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Context, &State) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            desc: String::new(),
            contacts: Vec::new(),
            attrs: Vec::new(),
            software_deps: SoftwareDeps::default(),
            hardware_deps: HardwareDeps::default(),
            fixture: None,
            pre: None,
            data: Vec::new(),
            timeout: None,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    #[must_use]
    pub fn contacts(mut self, contacts: &[&str]) -> Self {
        self.contacts = contacts.iter().map(|c| (*c).to_string()).collect();
        self
    }

    #[must_use]
    pub fn attrs(mut self, attrs: &[&str]) -> Self {
        self.attrs.extend(attrs.iter().map(|a| (*a).to_string()));
        self
    }

    #[must_use]
    pub fn software_deps(mut self, deps: &[&str]) -> Self {
        self.software_deps = self.software_deps.merged(&SoftwareDeps::new(deps.iter().copied()));
        self
    }

    #[must_use]
    pub fn hardware_deps(mut self, deps: HardwareDeps) -> Self {
        self.hardware_deps = self.hardware_deps.merged(&deps);
        self
    }

    #[must_use]
    pub fn fixture(mut self, fixture: impl Into<String>) -> Self {
        self.fixture = Some(fixture.into());
        self
    }

    #[must_use]
    pub fn pre(mut self, pre: impl Into<String>) -> Self {
        self.pre = Some(pre.into());
        self
    }

    #[must_use]
    pub fn data(mut self, files: &[&str]) -> Self {
        self.data.extend(files.iter().map(|f| (*f).to_string()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    #[must_use]
    pub fn params(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.params.extend(params);
        self
    }

    fn validate(&self) -> Result<()> {
        if !matches(&TEST_NAME_RE, &self.name) {
            return Err(registration(format!(
                "test name {:?} must look like package.TestName",
                self.name
            )));
        }
        if self.fixture.is_some() && self.pre.is_some() {
            return Err(registration(format!(
                "{}: fixture and precondition are mutually exclusive",
                self.name
            )));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(registration(format!("{}: timeout must be positive", self.name)));
        }
        let mut seen = HashSet::new();
        for p in &self.params {
            if !matches(&PARAM_NAME_RE, &p.name) {
                return Err(registration(format!("{}: bad param name {:?}", self.name, p.name)));
            }
            if !seen.insert(p.name.as_str()) {
                return Err(registration(format!(
                    "{}: duplicate param name {:?}",
                    self.name, p.name
                )));
            }
            let has_fixture = p.fixture.is_some() || self.fixture.is_some();
            let has_pre = p.pre.is_some() || self.pre.is_some();
            if has_fixture && has_pre {
                return Err(registration(format!(
                    "{}.{}: fixture and precondition are mutually exclusive",
                    self.name, p.name
                )));
            }
            if p.timeout.is_some_and(|t| t.is_zero()) {
                return Err(registration(format!(
                    "{}.{}: timeout must be positive",
                    self.name, p.name
                )));
            }
        }
        Ok(())
    }
}

/// A runnable variant.
#[derive(Clone)]
pub struct Variant {
    pub name: String,
    pub test_name: String,
    pub param_name: Option<String>,
    pub func: TestFn,
    pub attrs: Vec<String>,
    pub contacts: Vec<String>,
    pub software_deps: SoftwareDeps,
    pub hardware_deps: HardwareDeps,
    pub data: Vec<String>,
    /// Fixture or precondition the variant runs under.
    pub fixture: Option<String>,
    pub timeout: Option<Duration>,
    pub val: Option<ParamValue>,
}

impl fmt::Debug for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variant")
            .field("name", &self.name)
            .field("fixture", &self.fixture)
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

fn merged_strings(base: &[String], extra: &[String]) -> Vec<String> {
    let mut out = base.to_vec();
    for s in extra {
        if !out.contains(s) {
            out.push(s.clone());
        }
    }
    out
}

impl Variant {
    fn plain(tc: &TestCase) -> Self {
        Self {
            name: tc.name.clone(),
            test_name: tc.name.clone(),
            param_name: None,
            func: Arc::clone(&tc.func),
            attrs: tc.attrs.clone(),
            contacts: tc.contacts.clone(),
            software_deps: tc.software_deps.clone(),
            hardware_deps: tc.hardware_deps.clone(),
            data: tc.data.clone(),
            fixture: tc.fixture.clone().or_else(|| tc.pre.clone()),
            timeout: tc.timeout,
            val: None,
        }
    }

    fn with_param(tc: &TestCase, p: &Param) -> Self {
        let mut v = Self::plain(tc);
        if !p.name.is_empty() {
            v.name = format!("{}.{}", tc.name, p.name);
        }
        v.param_name = Some(p.name.clone());
        v.attrs = merged_strings(&tc.attrs, &p.extra_attrs);
        v.software_deps = tc.software_deps.merged(&p.extra_software_deps);
        v.hardware_deps = tc.hardware_deps.merged(&p.extra_hardware_deps);
        v.data = merged_strings(&tc.data, &p.extra_data);
        if let Some(fixture) = p.fixture.clone().or_else(|| p.pre.clone()) {
            v.fixture = Some(fixture);
        }
        v.timeout = p.timeout.or(tc.timeout);
        v.val.clone_from(&p.val);
        v
    }
}

/// Every registered test and fixture of a run.
#[derive(Debug, Default)]
pub struct Registry {
    tests: Vec<TestCase>,
    fixtures: BTreeMap<String, Arc<FixtureSpec>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test. Names must be unique.
    pub fn add_test(&mut self, tc: TestCase) -> Result<()> {
        tc.validate()?;
        if self.tests.iter().any(|t| t.name == tc.name) {
            return Err(registration(format!("test {} registered twice", tc.name)));
        }
        self.tests.push(tc);
        Ok(())
    }

    pub fn add_fixture(&mut self, spec: FixtureSpec) -> Result<()> {
        if spec.name.is_empty() {
            return Err(registration("fixture name must not be empty"));
        }
        if self.fixtures.contains_key(&spec.name) {
            return Err(registration(format!("fixture {} registered twice", spec.name)));
        }
        self.fixtures.insert(spec.name.clone(), Arc::new(spec));
        Ok(())
    }

    pub fn add_fixtures(&mut self, specs: impl IntoIterator<Item = FixtureSpec>) -> Result<()> {
        specs.into_iter().try_for_each(|s| self.add_fixture(s))
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn fixture(&self, name: &str) -> Option<&Arc<FixtureSpec>> {
        self.fixtures.get(name)
    }

    /// The fixture and its ancestors, root first.
    pub fn fixture_chain(&self, name: &str) -> Result<Vec<Arc<FixtureSpec>>> {
        let mut chain = Vec::new();
        let mut next = Some(name.to_string());
        while let Some(current) = next {
            if chain.iter().any(|s: &Arc<FixtureSpec>| s.name == current) {
                return Err(registration(format!("fixture cycle through {current}")));
            }
            let spec = self
                .fixtures
                .get(&current)
                .ok_or_else(|| registration(format!("unknown fixture {current}")))?;
            next = spec.parent.clone();
            chain.push(Arc::clone(spec));
        }
        chain.reverse();
        Ok(chain)
    }

    /// All runnable variants, in registration order.
    pub fn variants(&self) -> Vec<Variant> {
        self.tests
            .iter()
            .flat_map(|tc| {
                if tc.params.is_empty() {
                    vec![Variant::plain(tc)]
                } else {
                    tc.params.iter().map(|p| Variant::with_param(tc, p)).collect()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtState, FixtValue, Fixture};

    fn body() -> impl Fn(&Context, &State) -> Result<()> + Send + Sync + 'static {
        |_, _| Ok(())
    }

    struct Nop;
    impl Fixture for Nop {
        fn set_up(&mut self, _ctx: &Context, _s: &FixtState<'_>) -> Result<FixtValue> {
            Ok(Arc::new(()))
        }
        fn tear_down(&mut self, _ctx: &Context) -> Result<()> {
            Ok(())
        }
    }

    fn nop_fixture(name: &str) -> FixtureSpec {
        FixtureSpec::new(name, || Box::new(Nop))
    }

    #[test]
    fn variants_merge_param_fields() {
        let mut reg = Registry::new();
        reg.add_test(
            TestCase::new("inputs.VirtualKeyboardTyping", body())
                .attrs(&["group:mainline"])
                .software_deps(&["chrome"])
                .fixture("tabletVK")
                .data(&["shared.wav"])
                .params([
                    Param::new("").attrs(&["informational"]),
                    Param::new("guest")
                        .fixture("tabletVKInGuest")
                        .software_deps(&["google_virtual_keyboard"])
                        .data(&["guest.wav", "shared.wav"]),
                ]),
        )
        .unwrap();
        let vs = reg.variants();
        assert_eq!(vs.len(), 2);
        assert_eq!(vs[0].name, "inputs.VirtualKeyboardTyping");
        assert_eq!(vs[0].attrs, vec!["group:mainline", "informational"]);
        assert_eq!(vs[0].fixture.as_deref(), Some("tabletVK"));
        assert_eq!(vs[1].name, "inputs.VirtualKeyboardTyping.guest");
        assert_eq!(vs[1].fixture.as_deref(), Some("tabletVKInGuest"));
        assert_eq!(vs[1].software_deps.0, vec!["chrome", "google_virtual_keyboard"]);
        assert_eq!(vs[1].data, vec!["shared.wav", "guest.wav"]);
    }

    #[test]
    fn registration_is_validated() {
        let mut reg = Registry::new();
        assert!(reg.add_test(TestCase::new("NoPackage", body())).is_err());
        assert!(reg.add_test(TestCase::new("inputs.lowercase", body())).is_err());
        assert!(
            reg.add_test(TestCase::new("inputs.Both", body()).fixture("a").pre("b"))
                .is_err()
        );
        assert!(
            reg.add_test(
                TestCase::new("inputs.Dup", body()).params([Param::new("a"), Param::new("a")])
            )
            .is_err()
        );
        assert!(
            reg.add_test(TestCase::new("inputs.Zero", body()).timeout(Duration::ZERO))
                .is_err()
        );
        reg.add_test(TestCase::new("inputs.Ok", body())).unwrap();
        let err = reg.add_test(TestCase::new("inputs.Ok", body())).unwrap_err();
        assert_eq!(err.code(), "ITH-1101");
    }

    #[test]
    fn fixture_chain_is_root_first_and_rejects_cycles() {
        let mut reg = Registry::new();
        reg.add_fixture(nop_fixture("root")).unwrap();
        reg.add_fixture(nop_fixture("child").parent("root")).unwrap();
        reg.add_fixture(nop_fixture("a").parent("b")).unwrap();
        reg.add_fixture(nop_fixture("b").parent("a")).unwrap();
        let names: Vec<String> = reg
            .fixture_chain("child")
            .unwrap()
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(names, vec!["root", "child"]);
        assert!(reg.fixture_chain("a").is_err());
        assert!(reg.fixture_chain("missing").is_err());
        assert!(reg.add_fixture(nop_fixture("root")).is_err());
    }
}
