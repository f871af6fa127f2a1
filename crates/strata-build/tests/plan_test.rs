use proptest::prelude::*;
use strata_build::error::BuildError;
use strata_build::plan::{BuildPlan, Instruction, Stage};
use strata_build::{DockerfileGenerator, SourceTree};
use strata_core::{Manifest, PackageManager, Packaging, StrataConfig};

fn source(digest: &str) -> SourceTree {
    SourceTree {
        include: None,
        digest: digest.to_owned(),
    }
}

fn plan_for(config: &StrataConfig, manifest: &str, digest: &str) -> BuildPlan {
    let manifest = Manifest::parse(manifest).unwrap();
    DockerfileGenerator::new(config, &manifest, source(digest))
        .plan()
        .unwrap()
}

fn keys(plan: &BuildPlan, stage: &str) -> Vec<String> {
    plan.layers()
        .into_iter()
        .filter(|l| l.stage == stage)
        .map(|l| l.key)
        .collect()
}

fn stage(name: &str, instructions: Vec<Instruction>) -> Stage {
    Stage {
        name: name.to_owned(),
        base: "python:3.12-slim".to_owned(),
        packages: Vec::new(),
        instructions,
        artifacts: Vec::new(),
    }
}

fn copy_from(from: &str) -> Instruction {
    Instruction::Copy {
        from: Some(from.to_owned()),
        sources: vec!["/opt/venv".to_owned()],
        dest: "/opt/venv".to_owned(),
        inputs: None,
    }
}

fn context_copy() -> Instruction {
    Instruction::Copy {
        from: None,
        sources: vec![".".to_owned()],
        dest: ".".to_owned(),
        inputs: Some("abc".to_owned()),
    }
}

fn cmd() -> Instruction {
    Instruction::Cmd(vec!["uvicorn".to_owned(), "main:app".to_owned()])
}

fn user() -> Instruction {
    Instruction::User {
        uid: 1000,
        gid: 1000,
    }
}

fn check() -> Instruction {
    Instruction::Check("touch /app/uploads/x".to_owned())
}

// ── Generated plan ──

#[test]
fn generated_plan_has_builder_then_runtime() {
    let plan = plan_for(&StrataConfig::default(), "fastapi==0.110\n", "src-1");

    let names: Vec<&str> = plan.stages().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["builder", "runtime"]);
    assert_eq!(plan.runtime_stage().unwrap().name, "runtime");
}

#[test]
fn rendered_dockerfile_orders_provisioning_before_cmd() {
    let config = StrataConfig::default();
    let manifest = Manifest::parse("fastapi==0.110\n").unwrap();
    let output = DockerfileGenerator::new(&config, &manifest, source("src-1"))
        .render()
        .unwrap();

    assert!(output.contains("FROM python:3.12-slim AS builder"));
    assert!(output.contains("FROM python:3.12-slim AS runtime"));
    assert!(output.contains("COPY --from=builder /opt/venv /opt/venv"));
    assert!(output.contains("USER 1000:1000"));
    assert!(output.contains("EXPOSE 8000"));
    assert!(output.contains("HEALTHCHECK --interval=30s --timeout=5s --start-period=30s --retries=3"));

    let import = output.find("COPY --from=builder").unwrap();
    let source_copy = output.find("COPY . .").unwrap();
    let chown = output.find("chown -R root:root /app").unwrap();
    let user = output.find("USER 1000:1000").unwrap();
    let probe = output.find("touch /app/uploads/.strata-probe").unwrap();
    let cmd = output.find("CMD [\"uvicorn\"").unwrap();
    assert!(import < source_copy);
    assert!(source_copy < chown);
    assert!(chown < user);
    assert!(user < probe);
    assert!(probe < cmd);
}

#[test]
fn runtime_stage_never_installs_toolchain() {
    let plan = plan_for(
        &StrataConfig::default(),
        "pillow>=10\npsycopg2==2.9\n",
        "src-1",
    );
    let builder = plan.stage("builder").unwrap();
    let runtime = plan.runtime_stage().unwrap();

    assert!(builder.packages.contains(&"build-essential".to_owned()));
    assert!(builder.packages.contains(&"libpq-dev".to_owned()));
    assert!(builder.packages.contains(&"libjpeg62-turbo-dev".to_owned()));
    assert!(runtime.packages.contains(&"libpq5".to_owned()));
    assert!(runtime.packages.contains(&"libjpeg62-turbo".to_owned()));
    assert!(runtime.packages.iter().all(|p| !p.ends_with("-dev")));
    assert!(!runtime.packages.contains(&"build-essential".to_owned()));
}

#[test]
fn prefix_packaging_imports_into_usr_local() {
    let mut config = StrataConfig::default();
    config.stager.packaging = Packaging::Prefix;
    let output = plan_for(&config, "fastapi\n", "src-1").render();

    assert!(output.contains("pip install --no-cache-dir --prefix=/install -r requirements.txt"));
    assert!(output.contains("COPY --from=builder /install /usr/local"));
    assert!(!output.contains("python -m venv"));
}

#[test]
fn alpine_images_use_apk() {
    let mut config = StrataConfig::default();
    config.stager.image = "python:3.12-alpine".to_owned();
    config.runtime.image = "python:3.12-alpine".to_owned();
    let plan = plan_for(&config, "psycopg2\n", "src-1");
    let output = plan.render();

    assert_eq!(config.runtime.package_manager(), PackageManager::Apk);
    assert!(output.contains("apk add --no-cache build-base postgresql-dev"));
    assert!(output.contains("apk add --no-cache libpq"));
    assert!(output.contains("addgroup -S -g 1000 app"));
}

#[test]
fn missing_runtime_library_is_rejected_without_auto_libraries() {
    let mut config = StrataConfig::default();
    config.runtime.auto_libraries = false;
    let manifest = Manifest::parse("psycopg2==2.9\n").unwrap();

    let err = DockerfileGenerator::new(&config, &manifest, source("src-1"))
        .plan()
        .unwrap_err();
    match err {
        BuildError::MissingRuntimeLibrary { library, package } => {
            assert_eq!(library, "libpq");
            assert_eq!(package, "libpq5");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn explicit_runtime_package_satisfies_library() {
    let mut config = StrataConfig::default();
    config.runtime.auto_libraries = false;
    config.runtime.packages = vec!["libpq5".to_owned()];
    let plan = plan_for(&config, "psycopg2==2.9\n", "src-1");

    assert_eq!(plan.runtime_stage().unwrap().packages, ["libpq5"]);
}

#[test]
fn toolchain_in_runtime_packages_is_rejected() {
    let mut config = StrataConfig::default();
    config.runtime.packages = vec!["gcc".to_owned()];
    let manifest = Manifest::parse("fastapi\n").unwrap();

    let err = DockerfileGenerator::new(&config, &manifest, source("src-1"))
        .plan()
        .unwrap_err();
    assert!(matches!(err, BuildError::ToolchainInRuntime { package } if package == "gcc"));
}

#[test]
fn invalid_config_stops_planning() {
    let mut config = StrataConfig::default();
    config.identity.uid = 0;
    let manifest = Manifest::parse("fastapi\n").unwrap();

    let err = DockerfileGenerator::new(&config, &manifest, source("src-1"))
        .plan()
        .unwrap_err();
    assert!(matches!(err, BuildError::Config(_)));
}

#[test]
fn include_paths_copy_individually() {
    let mut config = StrataConfig::default();
    config.build.include = Some(vec!["app".to_owned(), "main.py".to_owned()]);
    let manifest = Manifest::parse("fastapi\n").unwrap();
    let tree = SourceTree {
        include: config.build.include.clone(),
        digest: "src-1".to_owned(),
    };
    let output = DockerfileGenerator::new(&config, &manifest, tree)
        .render()
        .unwrap();

    assert!(output.contains("COPY app ./app"));
    assert!(output.contains("COPY main.py ./main.py"));
    assert!(!output.contains("COPY . ."));
}

#[test]
fn build_env_is_rendered_in_key_order() {
    let mut config = StrataConfig::default();
    config.build.env.insert("ZETA".to_owned(), "last".to_owned());
    config.build.env.insert("ALPHA".to_owned(), "two words".to_owned());
    let output = plan_for(&config, "fastapi\n", "src-1").render();

    let alpha = output.find("ENV ALPHA=\"two words\"").unwrap();
    let zeta = output.find("ENV ZETA=last").unwrap();
    assert!(alpha < zeta);
    assert!(output.contains("ENV UPLOADS=/app/uploads"));
}

// ── Layer keys ──

#[test]
fn source_change_keeps_dependency_layers() {
    let config = StrataConfig::default();
    let before = plan_for(&config, "fastapi==0.110\n", "src-1");
    let after = plan_for(&config, "fastapi==0.110\n", "src-2");

    assert_eq!(keys(&before, "builder"), keys(&after, "builder"));

    let runtime_before = before.layers();
    let runtime_after = after.layers();
    let source_index = before
        .runtime_stage()
        .unwrap()
        .instructions
        .iter()
        .position(|i| matches!(i, Instruction::Copy { from: None, .. }))
        .unwrap();
    let split = |layers: &[strata_build::Layer]| {
        layers
            .iter()
            .filter(|l| l.stage == "runtime" && l.index < source_index)
            .map(|l| l.key.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(split(&runtime_before), split(&runtime_after));
    assert_ne!(keys(&before, "runtime"), keys(&after, "runtime"));
}

#[test]
fn manifest_change_invalidates_builder_install() {
    let config = StrataConfig::default();
    let before = plan_for(&config, "fastapi==0.110\n", "src-1");
    let after = plan_for(&config, "fastapi==0.111\n", "src-1");

    let b = keys(&before, "builder");
    let a = keys(&after, "builder");
    assert_eq!(b.len(), a.len());
    // Layers before the manifest copy are shared.
    assert_eq!(b[0], a[0]);
    assert_ne!(b.last(), a.last());
    // The runtime import folds in the builder's final key.
    assert_ne!(keys(&before, "runtime"), keys(&after, "runtime"));
}

proptest! {
    #[test]
    fn plan_is_deterministic(
        names in proptest::collection::btree_set("[a-z][a-z0-9]{0,8}", 1..6),
        digest in "[0-9a-f]{8}",
    ) {
        let manifest: String = names.iter().map(|n| format!("{n}\n")).collect();
        let config = StrataConfig::default();
        let first = plan_for(&config, &manifest, &digest);
        let second = plan_for(&config, &manifest, &digest);

        prop_assert_eq!(first.render(), second.render());
        prop_assert_eq!(first.layers(), second.layers());
    }
}

// ── Plan validation ──

#[test]
fn empty_plan_is_rejected() {
    let err = BuildPlan::new(Vec::new()).validate().unwrap_err();
    assert!(matches!(err, BuildError::EmptyPlan));
}

#[test]
fn copy_from_later_stage_is_a_back_reference() {
    let plan = BuildPlan::new(vec![
        stage("runtime", vec![copy_from("builder"), user(), check(), cmd()]),
        stage("builder", vec![Instruction::Run("pip install".to_owned())]),
    ]);
    let err = plan.validate().unwrap_err();
    assert!(
        matches!(err, BuildError::BackReference { stage, from } if stage == "runtime" && from == "builder")
    );
}

#[test]
fn duplicate_stage_names_are_rejected() {
    let plan = BuildPlan::new(vec![stage("builder", vec![]), stage("builder", vec![])]);
    assert!(matches!(
        plan.validate().unwrap_err(),
        BuildError::DuplicateStage(name) if name == "builder"
    ));
}

#[test]
fn import_after_source_copy_breaks_layer_order() {
    let plan = BuildPlan::new(vec![
        stage("builder", vec![]),
        stage(
            "runtime",
            vec![context_copy(), copy_from("builder"), user(), check(), cmd()],
        ),
    ]);
    assert!(matches!(
        plan.validate().unwrap_err(),
        BuildError::LayerOrder { .. }
    ));
}

#[test]
fn cmd_without_user_starts_as_root() {
    let plan = BuildPlan::new(vec![stage("runtime", vec![check(), cmd()])]);
    assert!(matches!(
        plan.validate().unwrap_err(),
        BuildError::RootAtStart { .. }
    ));

    let plan = BuildPlan::new(vec![stage(
        "runtime",
        vec![Instruction::User { uid: 0, gid: 0 }, check(), cmd()],
    )]);
    assert!(matches!(
        plan.validate().unwrap_err(),
        BuildError::RootAtStart { .. }
    ));
}

#[test]
fn probe_must_run_after_user_switch() {
    let plan = BuildPlan::new(vec![stage("runtime", vec![check(), user(), cmd()])]);
    assert!(matches!(
        plan.validate().unwrap_err(),
        BuildError::MissingWriteProbe { .. }
    ));
}

#[test]
fn runtime_without_cmd_is_rejected() {
    let plan = BuildPlan::new(vec![stage("runtime", vec![user(), check()])]);
    assert!(matches!(
        plan.validate().unwrap_err(),
        BuildError::MissingCmd { .. }
    ));
}

#[test]
fn well_formed_plan_validates() {
    let plan = BuildPlan::new(vec![
        stage("builder", vec![Instruction::Run("pip install".to_owned())]),
        stage(
            "runtime",
            vec![copy_from("builder"), context_copy(), user(), check(), cmd()],
        ),
    ]);
    plan.validate().unwrap();
}

#[test]
fn instructions_render_as_dockerfile_lines() {
    assert_eq!(user().to_string(), "USER 1000:1000");
    assert_eq!(
        cmd().to_string(),
        "CMD [\"uvicorn\", \"main:app\"]"
    );
    assert_eq!(copy_from("builder").to_string(), "COPY --from=builder /opt/venv /opt/venv");
    assert_eq!(
        Instruction::Env {
            key: "EMPTY".to_owned(),
            value: String::new()
        }
        .to_string(),
        "ENV EMPTY=\"\""
    );
}

// ── Escaping ──

#[test]
fn multiline_env_value_never_reaches_the_dockerfile() {
    let mut config = StrataConfig::default();
    config
        .build
        .env
        .insert("GREETING".to_owned(), "hi\nRUN touch /pwned".to_owned());
    let manifest = Manifest::parse("fastapi\n").unwrap();

    let err = DockerfileGenerator::new(&config, &manifest, source("src-1"))
        .plan()
        .unwrap_err();
    assert!(matches!(err, BuildError::Config(_)));
}

#[test]
fn instruction_spanning_lines_fails_validation() {
    let plan = BuildPlan::new(vec![
        stage(
            "builder",
            vec![Instruction::Run("pip install .\nUSER root".to_owned())],
        ),
        stage("runtime", vec![copy_from("builder"), user(), check(), cmd()]),
    ]);
    assert!(matches!(
        plan.validate().unwrap_err(),
        BuildError::ControlCharacter { stage, .. } if stage == "builder"
    ));
}

#[test]
fn exec_form_arguments_are_json_escaped() {
    let cmd = Instruction::Cmd(vec!["echo".to_owned(), "say \"hi\"\\\nbye".to_owned()]);
    assert_eq!(cmd.to_string(), r#"CMD ["echo", "say \"hi\"\\\nbye"]"#);

    let plan = BuildPlan::new(vec![stage("runtime", vec![user(), check(), cmd])]);
    plan.validate().unwrap();
    assert_eq!(plan.render().lines().count(), 5);
}

#[test]
fn env_values_with_quotes_are_quoted() {
    let env = Instruction::Env {
        key: "GREETING".to_owned(),
        value: "it's \"fine\"".to_owned(),
    };
    assert_eq!(env.to_string(), r#"ENV GREETING="it's \"fine\"""#);
}

#[test]
fn health_url_is_passed_to_the_probe_as_an_argument() {
    let mut config = StrataConfig::default();
    config.health.path = "/health?x='1'".to_owned();
    let output = plan_for(&config, "fastapi\n", "src-1").render();

    let healthcheck = output
        .lines()
        .find(|l| l.starts_with("HEALTHCHECK"))
        .unwrap();
    assert!(healthcheck.contains("urlopen(sys.argv[1], timeout=5)"));
    assert!(healthcheck.ends_with(r#""http://127.0.0.1:8000/health?x='1'"]"#));
}

#[test]
fn app_root_lock_keeps_execute_bits() {
    let output = plan_for(&StrataConfig::default(), "fastapi\n", "src-1").render();
    assert!(output.contains("chmod -R u+rwX,go+rX,go-w /app"));
    assert!(!output.contains("-type f"));
}
