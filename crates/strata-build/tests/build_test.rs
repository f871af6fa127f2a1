use std::path::{Path, PathBuf};
use std::process::Command;

use strata_build::bundle::{
    BUNDLE_DIR, create_bundle, is_dirty, is_git_work_tree, list_source_files, source_digest,
};
use strata_build::cache::{LayerCache, LayerStatus};
use strata_build::eject::{eject, ejected_path, is_ejected, load_ejected_dockerfile};
use strata_build::provision::PermissionProvisioner;
use strata_build::{DockerfileGenerator, SourceTree};
use strata_core::{
    Manifest, PackageManager, RuntimeIdentity, StrataConfig, UploadPolicy, UploadsConfig,
};
use tempfile::TempDir;

/// Writes a minimal FastAPI project.
fn init_project(dir: &Path) {
    std::fs::create_dir_all(dir.join("app")).unwrap();
    std::fs::write(dir.join("requirements.txt"), "fastapi==0.110\n").unwrap();
    std::fs::write(dir.join("main.py"), "from app import api as app\n").unwrap();
    std::fs::write(dir.join("app/__init__.py"), "api = None\n").unwrap();
}

fn git(dir: &Path, args: &[&str]) {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
}

/// Initialize a git repo with the minimal project and an initial commit.
fn init_git_project(dir: &Path) {
    init_project(dir);
    git(dir, &["init"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "init"]);
}

fn paths(items: &[&str]) -> Vec<PathBuf> {
    items.iter().map(PathBuf::from).collect()
}

// ── Source listing ──

#[test]
fn walk_lists_sources_without_caches() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join("app/__pycache__")).unwrap();
    std::fs::write(tmp.path().join("app/__pycache__/x.cpython-312.pyc"), "").unwrap();
    std::fs::create_dir_all(tmp.path().join(".venv/bin")).unwrap();
    std::fs::write(tmp.path().join(".venv/bin/python"), "").unwrap();
    std::fs::write(tmp.path().join("stray.pyc"), "").unwrap();

    let files = list_source_files(tmp.path(), None).unwrap();

    assert_eq!(
        files,
        paths(&["app/__init__.py", "main.py", "requirements.txt"])
    );
}

#[test]
fn local_upload_directory_is_excluded() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    std::fs::create_dir_all(tmp.path().join("uploads")).unwrap();
    std::fs::write(tmp.path().join("uploads/avatar.png"), "png").unwrap();

    let files = list_source_files(tmp.path(), Some(Path::new("uploads"))).unwrap();

    assert!(!files.contains(&PathBuf::from("uploads/avatar.png")));
    assert!(files.contains(&PathBuf::from("main.py")));
}

#[test]
fn git_listing_respects_gitignore() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    std::fs::write(tmp.path().join(".gitignore"), "secrets.env\n").unwrap();
    std::fs::write(tmp.path().join("secrets.env"), "TOKEN=x").unwrap();
    std::fs::write(tmp.path().join("new.py"), "").unwrap();

    let files = list_source_files(tmp.path(), None).unwrap();

    assert!(files.contains(&PathBuf::from("new.py")));
    assert!(files.contains(&PathBuf::from(".gitignore")));
    assert!(!files.contains(&PathBuf::from("secrets.env")));
}

#[test]
fn source_digest_tracks_content_and_include() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    let files = list_source_files(tmp.path(), None).unwrap();
    let include = vec!["app".to_owned()];

    let full = source_digest(tmp.path(), &files, None).unwrap();
    let scoped = source_digest(tmp.path(), &files, Some(&include)).unwrap();
    assert_eq!(full, source_digest(tmp.path(), &files, None).unwrap());

    std::fs::write(tmp.path().join("main.py"), "app = None\n").unwrap();
    assert_ne!(full, source_digest(tmp.path(), &files, None).unwrap());
    // main.py is outside the included paths.
    assert_eq!(
        scoped,
        source_digest(tmp.path(), &files, Some(&include)).unwrap()
    );
}

// ── Bundle ──

#[test]
fn bundle_contains_sources_and_dockerfile() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    let files = list_source_files(tmp.path(), None).unwrap();

    let bundle = create_bundle(tmp.path(), &files, "FROM python:3.12-slim").unwrap();

    assert_eq!(bundle, tmp.path().join(BUNDLE_DIR));
    assert!(bundle.join("main.py").exists());
    assert!(bundle.join("app/__init__.py").exists());
    assert!(!bundle.join(".git").exists());
    assert_eq!(
        std::fs::read_to_string(bundle.join("Dockerfile")).unwrap(),
        "FROM python:3.12-slim"
    );
    let ignore = std::fs::read_to_string(bundle.join(".dockerignore")).unwrap();
    assert!(ignore.contains("**/__pycache__"));
}

#[test]
fn bundle_replaces_previous_bundle() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    let stale = tmp.path().join(BUNDLE_DIR).join("stale.py");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, "").unwrap();

    let files = list_source_files(tmp.path(), None).unwrap();
    create_bundle(tmp.path(), &files, "FROM x").unwrap();

    assert!(!stale.exists());
}

#[test]
fn dirty_check_sees_uncommitted_changes() {
    let tmp = TempDir::new().unwrap();
    init_git_project(tmp.path());
    assert!(!is_dirty(tmp.path()).unwrap());

    std::fs::write(tmp.path().join("main.py"), "changed\n").unwrap();
    assert!(is_dirty(tmp.path()).unwrap());
}

#[test]
fn plain_directory_is_not_a_work_tree() {
    let tmp = TempDir::new().unwrap();
    init_project(tmp.path());
    assert!(!is_git_work_tree(tmp.path()));

    init_git_project(tmp.path());
    assert!(is_git_work_tree(tmp.path()));
}

// ── Eject ──

fn default_plan(digest: &str) -> strata_build::BuildPlan {
    let manifest = Manifest::parse("fastapi\n").unwrap();
    DockerfileGenerator::new(
        &StrataConfig::default(),
        &manifest,
        SourceTree {
            include: None,
            digest: digest.to_owned(),
        },
    )
    .plan()
    .unwrap()
}

#[test]
fn eject_writes_dockerfile_once() {
    let tmp = TempDir::new().unwrap();
    let plan = default_plan("src-1");
    assert!(!is_ejected(tmp.path()));

    let path = eject(tmp.path(), &plan).unwrap();
    assert_eq!(path, ejected_path(tmp.path()));
    assert_eq!(path, tmp.path().join(".strata/Dockerfile"));
    assert!(is_ejected(tmp.path()));

    let ejected = load_ejected_dockerfile(tmp.path()).unwrap();
    assert!(ejected.content.starts_with("# strata-plan: "));
    assert!(ejected.content.ends_with(&plan.render()));
    assert!(!ejected.is_stale(&plan));

    let err = eject(tmp.path(), &plan).unwrap_err();
    assert!(err.to_string().contains("already ejected"));
}

#[test]
fn ejected_dockerfile_notices_plan_changes() {
    let tmp = TempDir::new().unwrap();
    eject(tmp.path(), &default_plan("src-1")).unwrap();

    let ejected = load_ejected_dockerfile(tmp.path()).unwrap();
    assert!(ejected.is_stale(&default_plan("src-2")));

    // Without the stamp line nothing can be compared.
    std::fs::write(ejected_path(tmp.path()), "FROM python:3.12-slim\n").unwrap();
    let edited = load_ejected_dockerfile(tmp.path()).unwrap();
    assert_eq!(edited.plan_key, None);
    assert!(!edited.is_stale(&default_plan("src-2")));
}

#[test]
fn load_ejected_without_eject_fails() {
    let tmp = TempDir::new().unwrap();
    assert!(load_ejected_dockerfile(tmp.path()).is_err());
}

// ── Layer cache ──

#[test]
fn cache_reports_reused_layers_after_source_change() {
    let tmp = TempDir::new().unwrap();
    let config = strata_core::StrataConfig::default();
    let manifest = Manifest::parse("fastapi==0.110\n").unwrap();
    let plan_with = |digest: &str| {
        DockerfileGenerator::new(
            &config,
            &manifest,
            SourceTree {
                include: None,
                digest: digest.to_owned(),
            },
        )
        .plan()
        .unwrap()
    };

    let first = plan_with("src-1").layers();
    let mut cache = LayerCache::load(tmp.path()).unwrap();
    assert!(
        cache
            .diff(&first)
            .iter()
            .all(|r| r.status == LayerStatus::Rebuilt)
    );
    cache.record(&first);
    cache.save(tmp.path()).unwrap();

    let cache = LayerCache::load(tmp.path()).unwrap();
    let report = cache.diff(&plan_with("src-2").layers());
    assert!(
        report
            .iter()
            .filter(|r| r.layer.stage == "builder")
            .all(|r| r.status == LayerStatus::Reused)
    );
    let rebuilt: Vec<_> = report
        .iter()
        .filter(|r| r.status == LayerStatus::Rebuilt)
        .collect();
    assert!(!rebuilt.is_empty());
    assert!(rebuilt.iter().all(|r| r.layer.stage == "runtime"));
    assert!(rebuilt[0].layer.instruction.starts_with("COPY . ."));
}

#[test]
fn corrupt_cache_index_is_an_error() {
    let tmp = TempDir::new().unwrap();
    std::fs::create_dir_all(tmp.path().join(".strata")).unwrap();
    std::fs::write(tmp.path().join(".strata/layers.json"), "not json").unwrap();

    assert!(LayerCache::load(tmp.path()).is_err());
}

// ── Provisioning ──

fn uploads(policy: UploadPolicy) -> UploadsConfig {
    UploadsConfig {
        policy,
        ..Default::default()
    }
}

#[test]
fn identity_writes_uploads_but_not_app_root() {
    let identity = RuntimeIdentity::default();
    let uploads = uploads(UploadPolicy::Owner);
    let plan = PermissionProvisioner::new(&identity, &uploads, "/app", PackageManager::Apt).plan();

    assert!(plan.identity_can_write("/app/uploads"));
    assert!(plan.identity_can_write("/app/uploads/avatars"));
    assert!(!plan.identity_can_write("/app"));
    assert!(!plan.identity_can_write("/app/static"));
    assert!(!plan.identity_can_write("/etc"));
}

#[test]
fn upload_policy_controls_other_identities() {
    let identity = RuntimeIdentity::default();

    let owner = uploads(UploadPolicy::Owner);
    let plan = PermissionProvisioner::new(&identity, &owner, "/app", PackageManager::Apt).plan();
    assert!(!plan.can_write(2000, 1000, "/app/uploads"));
    assert!(!plan.can_write(2000, 2000, "/app/uploads"));

    let group = uploads(UploadPolicy::Group);
    let plan = PermissionProvisioner::new(&identity, &group, "/app", PackageManager::Apt).plan();
    assert!(plan.can_write(2000, 1000, "/app/uploads"));
    assert!(!plan.can_write(2000, 2000, "/app/uploads"));

    let world = uploads(UploadPolicy::World);
    let plan = PermissionProvisioner::new(&identity, &world, "/app", PackageManager::Apt).plan();
    assert!(plan.can_write(2000, 2000, "/app/uploads"));
}

#[test]
fn provisioning_instructions_follow_protocol_order() {
    let identity = RuntimeIdentity::default();
    let uploads = uploads(UploadPolicy::Owner);
    let provisioner = PermissionProvisioner::new(&identity, &uploads, "/app", PackageManager::Apt);
    let rendered: Vec<String> = provisioner
        .instructions()
        .iter()
        .map(ToString::to_string)
        .collect();

    assert_eq!(rendered.len(), 4);
    assert!(rendered[0].contains("useradd --system --uid 1000"));
    assert!(rendered[1].contains("chown -R root:root /app"));
    assert!(rendered[1].contains("chown -R app:app /app/uploads"));
    assert!(rendered[1].contains("chmod 0750 /app/uploads"));
    assert_eq!(rendered[2], "USER 1000:1000");
    assert!(rendered[3].contains("touch /app/uploads/.strata-probe"));
    assert!(rendered[3].contains("touch /app/.strata-probe"));
}
