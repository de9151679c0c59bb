//! TAP (Test Anything Protocol) harness for on-device tests.
//!
//! Unit tests cover the connection algorithm on the host with test doubles;
//! the checks that need the real radio, NVS partition or efuse run on the
//! device through this harness and report in TAP format over the serial
//! console. The harness also runs on the host, which is how it tests itself.
//!
//! Output is grouped by module so a serial log reads as radio, storage and
//! identity sections. A test that cannot run on the attached board (no
//! stored network for the radio test, say) returns [`Skip`] and is reported
//! with a TAP `SKIP` directive instead of failing.
//!
//! Set `TERELINA_TAP_FILTER` at build time to run only the tests whose
//! `module::name` contains it, e.g. `TERELINA_TAP_FILTER=storage`.
//!
//! Only compiled with the `tap-tests` feature, so no test code reaches a
//! production image.
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use crate::testing::Skip;
//!     use terelina_esp32_macros::tap_test;
//!
//!     #[tap_test]
//!     fn credentials_survive_storage() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         let mut store = NvsCredentialStore::open()?;
//!         let Some(creds) = store.load() else {
//!             return Err(Skip("nothing stored").into());
//!         };
//!         store.save(&creds)?;
//!         Ok(())
//!     }
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe, UnwindSafe};
use std::time::{Duration, Instant};

// Re-export inventory for use by the proc-macro
pub use inventory;

/// Result type for test functions.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Build-time test selection.
const FILTER: Option<&str> = option_env!("TERELINA_TAP_FILTER");

/// Tests running at least this long get their time reported.
const SLOW_TEST: Duration = Duration::from_secs(1);

/// A `#[tap_test]` registration, collected via inventory.
pub struct TapTestEntry {
    /// `module_path!()` of the test.
    pub module: &'static str,
    pub name: &'static str,
    /// Runs the test on the given runner.
    pub register: fn(&mut TestRunner),
}

impl TapTestEntry {
    pub const fn new(module: &'static str, name: &'static str, register: fn(&mut TestRunner)) -> Self {
        Self {
            module,
            name,
            register,
        }
    }

    /// Module under test, without the crate name or the `tap_tests`
    /// submodule, as printed in section headers.
    pub fn section(&self) -> &'static str {
        let module = self.module.strip_suffix("::tap_tests").unwrap_or(self.module);
        module.split_once("::").map_or(module, |(_, rest)| rest)
    }

    /// `section::name`, the string the build-time filter matches against.
    pub fn path(&self) -> String {
        format!("{}::{}", self.section(), self.name)
    }
}

inventory::collect!(TapTestEntry);

/// Returned by a test that cannot run on this board; reported as `SKIP`.
#[derive(Debug)]
pub struct Skip(pub &'static str);

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped: {}", self.0)
    }
}

impl std::error::Error for Skip {}

/// Registered tests whose path contains `filter`, ordered by module then name.
pub fn selected_tests(filter: Option<&str>) -> Vec<&'static TapTestEntry> {
    let mut tests: Vec<&'static TapTestEntry> = inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(|entry| filter.map_or(true, |f| entry.path().contains(f)))
        .collect();
    tests.sort_by_key(|entry| (entry.module, entry.name));
    tests
}

/// Run the selected tests, one section per module. Returns true if none failed.
pub fn run_all_tests() -> bool {
    let tests = selected_tests(FILTER);
    let mut runner = TestRunner::new();
    runner.plan(tests.len());
    if let Some(filter) = FILTER {
        TestRunner::comment(&format!("filter: {}", filter));
    }

    let mut section = "";
    for entry in tests {
        if entry.section() != section {
            section = entry.section();
            TestRunner::comment(&format!("== {} ==", section));
        }
        (entry.register)(&mut runner);
    }

    runner.finish()
}

enum Verdict {
    Pass,
    Skip(String),
    Fail(String),
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Numbers tests, prints TAP lines and keeps the tally.
#[derive(Default)]
pub struct TestRunner {
    tests_run: usize,
    tests_passed: usize,
    tests_skipped: usize,
    failures: Vec<String>,
}

impl TestRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a test returning [`TestResult`]. Panics count as failures and an
    /// `Err(Skip)` as a skip.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + UnwindSafe,
    {
        let started = Instant::now();
        let verdict = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Verdict::Pass,
            Ok(Err(e)) => match e.downcast_ref::<Skip>() {
                Some(skip) => Verdict::Skip(skip.0.to_string()),
                None => Verdict::Fail(format!("Error: {}", e)),
            },
            Err(payload) => Verdict::Fail(format!("Panic: {}", panic_message(&*payload))),
        };
        self.record(name, verdict, started.elapsed());
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, with a message containing `expected` if given.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + UnwindSafe,
    {
        let started = Instant::now();
        let verdict = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Verdict::Fail("Expected panic but test completed normally".to_string()),
            Err(payload) => {
                let msg = panic_message(&*payload);
                match expected {
                    Some(expected) if !msg.contains(expected) => Verdict::Fail(format!(
                        "Expected panic containing '{}', got '{}'",
                        expected, msg
                    )),
                    _ => Verdict::Pass,
                }
            }
        };
        self.record(name, verdict, started.elapsed());
    }

    fn record(&mut self, name: &str, verdict: Verdict, elapsed: Duration) {
        self.tests_run += 1;
        let number = self.tests_run;
        match verdict {
            Verdict::Pass => {
                self.tests_passed += 1;
                println!("ok {} - {}", number, name);
            }
            Verdict::Skip(reason) => {
                self.tests_skipped += 1;
                println!("ok {} - {} # SKIP {}", number, name, reason);
            }
            Verdict::Fail(detail) => {
                self.failures.push(name.to_string());
                println!("not ok {} - {}", number, name);
                println!("# {}", detail);
            }
        }
        if elapsed >= SLOW_TEST {
            println!("# {} took {} ms", name, elapsed.as_millis());
        }
    }

    /// Print the TAP version and plan line.
    pub fn plan(&self, planned_tests: usize) {
        println!("TAP version 14");
        println!("1..{}", planned_tests);
    }

    /// Print a diagnostic line.
    pub fn comment(msg: &str) {
        println!("# {}", msg);
    }

    /// Print the summary. Returns true if no test failed.
    pub fn finish(&self) -> bool {
        println!("# -----------------------");
        println!(
            "# Run: {}, passed: {}, skipped: {}, failed: {}",
            self.tests_run,
            self.tests_passed,
            self.tests_skipped,
            self.failures.len()
        );
        for name in &self.failures {
            println!("#   failed: {}", name);
        }

        if self.failures.is_empty() {
            println!("# Result: PASS");
            true
        } else {
            println!("# Result: FAIL");
            false
        }
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn tests_passed(&self) -> usize {
        self.tests_passed
    }

    pub fn tests_skipped(&self) -> usize {
        self.tests_skipped
    }

    /// Names of the failed tests, in run order.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }
}

mod tap_tests {
    use super::*;
    use terelina_esp32_macros::tap_test;

    #[tap_test]
    fn runner_counts_errors_and_panics_as_failures() {
        let mut runner = TestRunner::new();
        runner.run("stores", || Ok(()));
        runner.run("radio", || Err("no beacon".into()));
        runner.run_assert("efuse", || panic!("mac unreadable"));

        assert_eq!(runner.tests_run(), 3);
        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.failures(), ["radio".to_string(), "efuse".to_string()]);
    }

    #[tap_test]
    fn skip_is_not_a_failure() {
        let mut runner = TestRunner::new();
        runner.run("radio", || Err(Skip("no stored network").into()));

        assert_eq!(runner.tests_skipped(), 1);
        assert_eq!(runner.tests_passed(), 0);
        assert!(runner.failures().is_empty());
    }

    #[tap_test]
    fn expected_panic_must_match() {
        let mut runner = TestRunner::new();
        runner.run_should_panic("taken", || panic!("modem already taken"), Some("taken"));
        runner.run_should_panic("other", || panic!("nvs full"), Some("taken"));
        runner.run_should_panic("silent", || {}, None);

        assert_eq!(runner.tests_passed(), 1);
        assert_eq!(runner.failures(), ["other".to_string(), "silent".to_string()]);
    }

    #[tap_test]
    fn selection_filters_and_orders_by_module() {
        let all = selected_tests(None);
        assert!(all.windows(2).all(|w| (w[0].module, w[0].name) <= (w[1].module, w[1].name)));
        assert!(all.iter().any(|e| e.name == "selection_filters_and_orders_by_module"));

        let testing = selected_tests(Some("testing::"));
        assert!(!testing.is_empty());
        assert!(testing.len() < all.len());
        assert!(testing.iter().all(|e| e.section() == "testing"));
    }
}
