use std::path::Path;

use arch_lint::rules::{NoErrorSwallowing, NoSilentResultDrop};
use arch_lint::{Analyzer, Severity};

fn workspace_root() -> &'static Path {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .expect("workspace root")
}

/// No strata crate may swallow an error or drop a `Result` without an
/// `arch-lint: allow` explaining why. Test code is exempt.
#[test]
fn strata_crates_propagate_errors() {
    let analyzer = Analyzer::builder()
        .root(workspace_root())
        .exclude("**/target/**")
        .exclude("**/tests/**")
        .exclude("examples/**")
        .exclude(".strata-bundle/**")
        .rule(NoErrorSwallowing::new())
        .rule(NoSilentResultDrop::new())
        .build()
        .expect("build analyzer");

    let result = analyzer.analyze().expect("analyze");

    if result.has_violations_at(Severity::Warning) {
        panic!("{}", result.format_test_report(Severity::Warning));
    }
}
