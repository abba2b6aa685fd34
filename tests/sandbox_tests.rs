//! Build user lifecycle: teardown removes exactly what `open` created.

mod helpers;

use helpers::{Reply, ScriptedRunner, TestEnv};
use archoffline::sandbox::SandboxUserManager;
use std::fs;

const USER: &str = "builder";

#[test]
fn test_owned_account_and_grant_are_removed() {
    let env = TestEnv::new();
    let runner = ScriptedRunner::new().without_user(USER);
    let manager = SandboxUserManager::new(&runner, &env.host);
    let sudoers_before = fs::read_to_string(&env.host.sudoers).unwrap();

    let user = manager.open(USER).unwrap();
    assert!(user.owned_account);
    assert!(user.owned_grant);
    assert!(runner.ran("useradd"));
    let grant = manager.grant_path(USER);
    assert_eq!(
        fs::read_to_string(&grant).unwrap().lines().last(),
        Some("builder ALL=(ALL) NOPASSWD: ALL")
    );

    fs::create_dir_all(user.home.join(".gnupg")).unwrap();
    manager.close(&user).unwrap();

    assert!(runner.ran("userdel"));
    assert!(!grant.exists());
    assert!(!user.home.exists());
    assert_eq!(fs::read_to_string(&env.host.sudoers).unwrap(), sudoers_before);
}

#[test]
fn test_preexisting_account_and_grant_are_kept() {
    let env = TestEnv::new();
    let existing = env.host.sudoers_d.join("10-builder");
    fs::write(&existing, "builder ALL=(ALL) NOPASSWD: ALL\n").unwrap();
    let home = env.host.home_of(USER);
    fs::create_dir_all(&home).unwrap();

    let runner = ScriptedRunner::new();
    let manager = SandboxUserManager::new(&runner, &env.host);

    let user = manager.open(USER).unwrap();
    assert!(!user.owned_account);
    assert!(!user.owned_grant);
    assert!(!runner.ran("useradd"));
    assert!(!manager.grant_path(USER).exists());

    manager.close(&user).unwrap();
    assert!(!runner.ran("userdel"));
    assert!(!runner.ran("pkill"));
    assert!(home.exists());
    assert_eq!(
        fs::read_to_string(&existing).unwrap(),
        "builder ALL=(ALL) NOPASSWD: ALL\n"
    );
}

#[test]
fn test_preexisting_account_with_owned_grant() {
    let env = TestEnv::new();
    let runner = ScriptedRunner::new();
    let manager = SandboxUserManager::new(&runner, &env.host);

    let user = manager.open(USER).unwrap();
    assert!(!user.owned_account);
    assert!(user.owned_grant);

    manager.close(&user).unwrap();
    assert!(!runner.ran("userdel"));
    assert!(!manager.grant_path(USER).exists());
}

#[test]
fn test_owned_account_with_preexisting_grant() {
    let env = TestEnv::new();
    let existing = env.host.sudoers_d.join("builder");
    fs::write(&existing, "builder ALL=(ALL:ALL) NOPASSWD:ALL\n").unwrap();
    let runner = ScriptedRunner::new().without_user(USER);
    let manager = SandboxUserManager::new(&runner, &env.host);

    let user = manager.open(USER).unwrap();
    assert!(user.owned_account);
    assert!(!user.owned_grant);

    manager.close(&user).unwrap();
    assert!(runner.ran("userdel"));
    assert!(existing.exists());
}

#[test]
fn test_grant_in_monolithic_sudoers_counts_as_preexisting() {
    let env = TestEnv::new();
    let content = "root ALL=(ALL:ALL) ALL\nbuilder ALL=(ALL) NOPASSWD: ALL\n";
    fs::write(&env.host.sudoers, content).unwrap();
    let runner = ScriptedRunner::new();
    let manager = SandboxUserManager::new(&runner, &env.host);

    let user = manager.open(USER).unwrap();
    assert!(!user.owned_grant);
    manager.close(&user).unwrap();
    assert_eq!(fs::read_to_string(&env.host.sudoers).unwrap(), content);
}

#[test]
fn test_commented_or_ignored_grants_do_not_count() {
    let env = TestEnv::new();
    fs::write(
        &env.host.sudoers,
        "root ALL=(ALL:ALL) ALL\n# builder ALL=(ALL) NOPASSWD: ALL\n",
    )
    .unwrap();
    // sudo ignores drop-ins with a dot in the name
    fs::write(
        env.host.sudoers_d.join("builder.disabled"),
        "builder ALL=(ALL) NOPASSWD: ALL\n",
    )
    .unwrap();
    let runner = ScriptedRunner::new();
    let manager = SandboxUserManager::new(&runner, &env.host);

    let user = manager.open(USER).unwrap();
    assert!(user.owned_grant);
    manager.close(&user).unwrap();
}

#[test]
fn test_teardown_reports_failure_but_still_removes_grant() {
    let env = TestEnv::new();
    let runner = ScriptedRunner::new()
        .without_user(USER)
        .on(|inv| (inv.program == "userdel").then(|| Reply::fail(8, "userdel: user builder is currently used by process 42")));
    let manager = SandboxUserManager::new(&runner, &env.host);

    let user = manager.open(USER).unwrap();
    let err = manager.close(&user).unwrap_err();
    assert!(format!("{:#}", err).contains("userdel"));
    assert!(!manager.grant_path(USER).exists());
}

#[test]
fn test_teardown_continues_when_cleanup_tools_cannot_start() {
    let env = TestEnv::new();
    let runner = ScriptedRunner::new()
        .without_user(USER)
        .unstartable("gpgconf")
        .unstartable("pkill");
    let manager = SandboxUserManager::new(&runner, &env.host);

    let user = manager.open(USER).unwrap();
    let err = manager.close(&user).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("gpgconf"));
    assert!(message.contains("pkill"));

    assert!(runner.ran("userdel"));
    assert!(!manager.grant_path(USER).exists());
    assert!(!user.home.exists());
}

#[test]
fn test_invalid_username_is_rejected_before_any_change() {
    let env = TestEnv::new();
    let runner = ScriptedRunner::new().without_user("bad user");
    let manager = SandboxUserManager::new(&runner, &env.host);

    assert!(manager.open("bad user").is_err());
    assert!(runner.calls().is_empty());
    assert!(fs::read_dir(&env.host.sudoers_d).unwrap().next().is_none());
}
