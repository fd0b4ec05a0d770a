// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{catalog, EnvFixture, FakePackage, FakeRemote, FakeSolver};

use anyhow::Result;
use indoc::indoc;
use pinlock::pin::{remote::RemoteError, PinError, PinPolicy, PinState, Pinner};
use pretty_assertions::assert_eq;
use serde_json::json;

const MANIFEST: &str = indoc! {r#"
    spack:
      specs:
      - pkgA@main   # tracks upstream
      view: false
"#};

fn remote() -> FakeRemote {
    FakeRemote::new()
        .with_ref("https://example.com/pkgA.git", "refs/heads/main", "abc123")
        .with_ref("https://example.com/pkgB.git", "refs/heads/develop", "bbb222")
        .with_ref("https://example.com/pkgC.git", "refs/heads/develop", "ccc333")
}

#[test]
fn pin_root_tracking_branch() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![
        FakePackage::new("pkgA", "main")
            .depends_on(&["pkgB"])
            .with_parameters(json!({ "shared": true })),
        FakePackage::new("pkgB", "1.0"),
    ]);
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let pinned = pinner.pin_manifest(&env.drafter(), &[], false, false)?;
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0].pinned, "pkgA@git.abc123=main%gcc@12.1.0 +shared");
    assert_eq!(pinned[0].state, PinState::Persisted);

    let expect = indoc! {r#"
        spack:
          specs:
          - pkgA@git.abc123=main%gcc@12.1.0 +shared   # tracks upstream
          view: false
    "#};
    assert_eq!(env.manifest()?, expect);

    // Tag versions are never queried.
    assert_eq!(remote.queries.get(), 1);

    let calls = solver.calls.borrow();
    assert_eq!(calls[0], ("pkgA@main".to_string(), false));
    assert_eq!(
        calls[1],
        ("pkgA@git.abc123=main%gcc@12.1.0 +shared".to_string(), true)
    );

    Ok(())
}

#[test]
fn pinning_twice_is_idempotent() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![
        FakePackage::new("pkgA", "main").depends_on(&["pkgC"]),
        FakePackage::new("pkgC", "develop"),
    ]);
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    pinner.pin_manifest(&env.drafter(), &[], false, false)?;
    let once = env.manifest()?;

    let pinned = pinner.pin_manifest(&env.drafter(), &[], false, false)?;
    let twice = env.manifest()?;

    assert_eq!(once, twice);
    assert_eq!(pinned[0].original, pinned[0].pinned);
    let expect = "pkgA@git.abc123=main%gcc@12.1.0 ^pkgC@git.ccc333=develop%gcc@12.1.0";
    assert!(twice.contains(expect));

    Ok(())
}

#[test]
fn dependency_order_is_deterministic() -> Result<()> {
    let assemble = |dependencies: &[&str]| -> Result<String> {
        let env = EnvFixture::new(MANIFEST)?;
        let solver = FakeSolver::new(vec![
            FakePackage::new("pkgA", "main").depends_on(dependencies),
            FakePackage::new("pkgB", "develop"),
            FakePackage::new("pkgC", "develop").depends_on(&["pkgB"]),
        ]);
        let remote = remote();
        let catalog = catalog();
        let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

        let pinned = pinner.pin_manifest(&env.drafter(), &[], false, true)?;
        Ok(pinned[0].pinned.clone())
    };

    let forward = assemble(&["pkgB", "pkgC"])?;
    let backward = assemble(&["pkgC", "pkgB"])?;
    assert_eq!(forward, backward);
    assert_eq!(
        forward,
        concat!(
            "pkgA@git.abc123=main%gcc@12.1.0",
            " ^pkgB@git.bbb222=develop%gcc@12.1.0",
            " ^pkgC@git.ccc333=develop%gcc@12.1.0",
        )
    );

    Ok(())
}

#[test]
fn pin_policies_select_nodes() -> Result<()> {
    let pin_with = |policy: PinPolicy| -> Result<String> {
        let env = EnvFixture::new(MANIFEST)?;
        let solver = FakeSolver::new(vec![
            FakePackage::new("pkgA", "main").depends_on(&["pkgB"]),
            FakePackage::new("pkgB", "develop"),
        ]);
        let remote = remote();
        let catalog = catalog();
        let pinner = Pinner::new(&solver, &remote, &catalog, policy);

        let pinned = pinner.pin_manifest(&env.drafter(), &[], false, true)?;
        Ok(pinned[0].pinned.clone())
    };

    let roots = pin_with(PinPolicy {
        roots: true,
        dependencies: false,
    })?;
    assert_eq!(roots, "pkgA@git.abc123=main%gcc@12.1.0");

    let dependencies = pin_with(PinPolicy {
        roots: false,
        dependencies: true,
    })?;
    assert_eq!(dependencies, "pkgA@main ^pkgB@git.bbb222=develop%gcc@12.1.0");

    Ok(())
}

#[test]
fn pinning_preserves_other_attributes() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![FakePackage::new("pkgA", "main").with_parameters(json!({
        "cuda": true,
        "rocm": false,
        "build_type": "Release",
        "cxxflags": ["-O2", "-g"],
        "dev_path": "/home/dev/pkgA",
        "patches": ["0a1b2c3"],
        "build_system": "cmake",
    }))]);
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let pinned = pinner.pin_manifest(&env.drafter(), &[], false, true)?;
    assert_eq!(
        pinned[0].pinned,
        "pkgA@git.abc123=main%gcc@12.1.0 cxxflags=\"-O2 -g\" +cuda~rocm build_type=Release"
    );

    Ok(())
}

#[test]
fn dry_run_leaves_manifest_alone() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![FakePackage::new("pkgA", "main")]);
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let pinned = pinner.pin_manifest(&env.drafter(), &[], false, true)?;
    assert_eq!(pinned[0].state, PinState::Reconciled);
    assert_eq!(env.manifest()?, MANIFEST);

    Ok(())
}

#[test]
fn only_selected_roots_are_pinned() -> Result<()> {
    let env = EnvFixture::new(indoc! {r#"
        spack:
          specs:
          - pkgA@main
          - pkgC@develop
    "#})?;
    let solver = FakeSolver::new(vec![
        FakePackage::new("pkgA", "main"),
        FakePackage::new("pkgC", "develop"),
    ]);
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let pinned = pinner.pin_manifest(&env.drafter(), &["pkgC".into()], false, false)?;
    assert_eq!(pinned.len(), 1);

    let expect = indoc! {r#"
        spack:
          specs:
          - pkgA@main
          - pkgC@git.ccc333=develop%gcc@12.1.0
    "#};
    assert_eq!(env.manifest()?, expect);

    Ok(())
}

#[test]
fn stale_version_is_skipped() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![
        FakePackage::new("pkgA", "main").depends_on(&["pkgB"]),
        FakePackage::new("pkgB", "git.0ld0ld=feature"),
    ]);
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let pinned = pinner.pin_manifest(&env.drafter(), &[], false, true)?;
    assert_eq!(pinned[0].pinned, "pkgA@git.abc123=main%gcc@12.1.0");

    Ok(())
}

#[test]
fn unreachable_remote_aborts_without_writing() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![FakePackage::new("pkgA", "main")]);
    let remote = FakeRemote::new().unreachable();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let result = pinner.pin_manifest(&env.drafter(), &[], false, false);
    assert!(matches!(result, Err(PinError::Remote(RemoteError::Git2(_)))));
    assert_eq!(env.manifest()?, MANIFEST);

    Ok(())
}

#[test]
fn ambiguous_branch_aborts() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![FakePackage::new("pkgA", "main")]);
    let remote = remote().with_ref("https://example.com/pkgA.git", "refs/tags/main", "fff000");
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let result = pinner.pin_manifest(&env.drafter(), &[], false, false);
    assert!(matches!(
        result,
        Err(PinError::Remote(RemoteError::Ambiguous { .. }))
    ));
    assert_eq!(env.manifest()?, MANIFEST);

    Ok(())
}

#[test]
fn unsatisfiable_pin_aborts_without_writing() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![FakePackage::new("pkgA", "main")]).rejecting("git.abc123");
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    let result = pinner.pin_manifest(&env.drafter(), &[], false, false);
    assert!(matches!(
        result,
        Err(PinError::Reconcile { ref spec, .. }) if spec.contains("git.abc123")
    ));
    assert_eq!(env.manifest()?, MANIFEST);

    Ok(())
}

#[test]
fn repinning_dependencies_only_is_idempotent() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![
        FakePackage::new("pkgA", "main").depends_on(&["pkgB"]),
        FakePackage::new("pkgB", "develop"),
    ]);
    let remote = remote();
    let catalog = catalog();
    let policy = PinPolicy {
        roots: false,
        dependencies: true,
    };
    let pinner = Pinner::new(&solver, &remote, &catalog, policy);

    pinner.pin_manifest(&env.drafter(), &[], false, false)?;
    let once = env.manifest()?;
    pinner.pin_manifest(&env.drafter(), &[], false, false)?;
    let twice = env.manifest()?;

    assert_eq!(once, twice);

    let expect = "- pkgA@main ^pkgB@git.bbb222=develop%gcc@12.1.0   # tracks upstream";
    assert!(twice.contains(expect));

    Ok(())
}

#[test]
fn repinning_fixed_root_is_idempotent() -> Result<()> {
    let env = EnvFixture::new(indoc! {r#"
        spack:
          specs:
          - pkgB@1.0
    "#})?;
    let solver = FakeSolver::new(vec![
        FakePackage::new("pkgB", "1.0").depends_on(&["pkgC"]),
        FakePackage::new("pkgC", "develop"),
    ]);
    let remote = remote();
    let catalog = catalog();
    let pinner = Pinner::new(&solver, &remote, &catalog, PinPolicy::all());

    pinner.pin_manifest(&env.drafter(), &[], false, false)?;
    let once = env.manifest()?;
    let pinned = pinner.pin_manifest(&env.drafter(), &[], false, false)?;

    assert_eq!(env.manifest()?, once);
    assert_eq!(pinned[0].original, pinned[0].pinned);
    assert_eq!(pinned[0].pinned, "pkgB@1.0 ^pkgC@git.ccc333=develop%gcc@12.1.0");

    Ok(())
}

#[test]
fn repinning_after_branch_moves_replaces_commit() -> Result<()> {
    let env = EnvFixture::new(MANIFEST)?;
    let solver = FakeSolver::new(vec![
        FakePackage::new("pkgA", "main").depends_on(&["pkgB"]),
        FakePackage::new("pkgB", "develop"),
    ]);
    let catalog = catalog();
    let policy = PinPolicy {
        roots: false,
        dependencies: true,
    };

    let before = remote();
    let pinner = Pinner::new(&solver, &before, &catalog, policy);
    pinner.pin_manifest(&env.drafter(), &[], false, false)?;

    let after = FakeRemote::new().with_ref(
        "https://example.com/pkgB.git",
        "refs/heads/develop",
        "bbb999",
    );
    let pinner = Pinner::new(&solver, &after, &catalog, policy);
    let pinned = pinner.pin_manifest(&env.drafter(), &[], false, false)?;

    let expect = "pkgA@main ^pkgB@git.bbb999=develop%gcc@12.1.0";
    assert_eq!(pinned[0].pinned, expect);

    let manifest = env.manifest()?;
    assert!(manifest.contains(&format!("- {expect}   # tracks upstream")));
    assert!(!manifest.contains("bbb222"));

    Ok(())
}
