// tests/build_flow.rs

// End-to-end runs of project files against a throwaway base directory.

#![cfg(unix)]

use fassembler::cli::args::PositionalArgs;
use fassembler::cli::handlers::commons::load_config;
use fassembler::core::compiler::parse_project;
use fassembler::core::config_store::{ConfigStore, Source};
use fassembler::core::conflict::AutoPolicy;
use fassembler::core::environment::Environment;
use fassembler::core::log_context::LogContext;
use fassembler::core::maker::{Maker, MakerOptions};
use fassembler::core::project::Project;
use fassembler::core::registry::ProjectRegistry;
use fassembler::core::runtime::VenvBuilder;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const GREETING: &str = r#"
name = "greeting"
title = "Greeting"

[[settings]]
name = "x"
default = "1"

[[settings]]
name = "who"
default = "world"

[[tasks]]
kind = "ensure_dir"
dest = "share"

[[tasks]]
kind = "ensure_file"
name = "Write the greeting"
dest = "share/greeting.txt"
content = "hello {{config.who}} x={{config.x}}"
"#;

const BROKEN: &str = r#"
name = "broken"
title = "Broken"

[[tasks]]
kind = "script"
name = "Fail loudly"
command = "false"

[[tasks]]
kind = "ensure_file"
name = "Never reached"
dest = "marker"
content = "ran"
"#;

const PORTS: &str = r#"
name = "ports"
title = "Ports"

[[tasks]]
kind = "save_setting"
name = "Record the port"
values = { port = "8080" }

[[tasks]]
kind = "ensure_file"
name = "Use port"
dest = "port.txt"
content = "listen {{general.port}}"
"#;

fn unattended(base: &Path, simulate: bool) -> Maker {
    let options = MakerOptions {
        simulate,
        quick: false,
    };
    Maker::new(base, options, Box::new(AutoPolicy), LogContext::new())
}

fn run(project: &Project, base: &Path, store: &mut ConfigStore) -> anyhow::Result<()> {
    let env = Environment::new(base);
    let mut maker = unattended(base, false);
    let report = project.run(&mut maker, store, &env, &VenvBuilder::default())?;
    assert!(report.fully_successful());
    Ok(())
}

fn cmdline(args: &[&str]) -> PositionalArgs {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    PositionalArgs::parse(&args).unwrap()
}

#[test]
fn command_line_value_beats_default_and_is_persisted() {
    let dir = tempdir().unwrap();
    let project = parse_project(GREETING, "greeting.toml").unwrap();
    let mut store = ConfigStore::new();
    cmdline(&["greeting", "x=2"]).apply(&mut store);

    run(&project, dir.path(), &mut store).unwrap();

    assert_eq!(store.get("greeting", "x"), Some("2"));
    assert_eq!(store.source("greeting", "x"), Some(&Source::CommandLine));
    assert_eq!(
        fs::read_to_string(dir.path().join("share/greeting.txt")).unwrap(),
        "hello world x=2"
    );
    let saved = fs::read_to_string(Environment::new(dir.path()).build_ini()).unwrap();
    assert!(saved.contains("[DEFAULT]\nx = 2"));
    assert!(saved.contains("who = world"));
}

#[test]
fn failing_task_is_fatal_when_unattended() {
    let dir = tempdir().unwrap();
    let project = parse_project(BROKEN, "broken.toml").unwrap();
    let env = Environment::new(dir.path());
    let mut store = ConfigStore::new();
    let mut maker = unattended(dir.path(), false);

    let err = project
        .run(&mut maker, &mut store, &env, &VenvBuilder::default())
        .unwrap_err();

    assert!(format!("{err:#}").contains("Fail loudly"));
    assert!(!dir.path().join("marker").exists());
    assert!(!env.build_ini().exists());
}

#[test]
fn values_from_a_defaults_file_are_not_copied_into_build_ini() {
    let dir = tempdir().unwrap();
    let defaults = dir.path().join("defaults.ini");
    fs::write(&defaults, "[greeting]\nwho = admin\n").unwrap();
    let project = parse_project(GREETING, "greeting.toml").unwrap();
    let mut store = ConfigStore::new();
    store.read_file(&defaults).unwrap();

    run(&project, dir.path(), &mut store).unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join("share/greeting.txt")).unwrap(),
        "hello admin x=1"
    );
    let saved = fs::read_to_string(Environment::new(dir.path()).build_ini()).unwrap();
    assert!(saved.contains("x = 1"));
    assert!(!saved.contains("admin"));
}

#[test]
fn second_run_changes_nothing() {
    let dir = tempdir().unwrap();
    let project = parse_project(GREETING, "greeting.toml").unwrap();
    let greeting = dir.path().join("share/greeting.txt");

    let mut store = ConfigStore::new();
    run(&project, dir.path(), &mut store).unwrap();
    let first = fs::metadata(&greeting).unwrap().modified().unwrap();
    let build_ini = fs::read_to_string(Environment::new(dir.path()).build_ini()).unwrap();

    // A fresh invocation reads back what the first one saved.
    let mut store = ConfigStore::new();
    store
        .load(&[Environment::new(dir.path()).build_ini()])
        .unwrap();
    run(&project, dir.path(), &mut store).unwrap();

    assert_eq!(fs::metadata(&greeting).unwrap().modified().unwrap(), first);
    assert_eq!(
        fs::read_to_string(Environment::new(dir.path()).build_ini()).unwrap(),
        build_ini
    );
}

#[test]
fn simulation_leaves_the_base_untouched() {
    let dir = tempdir().unwrap();
    let project = parse_project(GREETING, "greeting.toml").unwrap();
    let env = Environment::new(dir.path());
    let mut store = ConfigStore::new();
    let mut maker = unattended(dir.path(), true);

    let report = project
        .run(&mut maker, &mut store, &env, &VenvBuilder::default())
        .unwrap();

    assert_eq!(report.tasks_run, 2);
    assert!(!dir.path().join("share").exists());
    assert!(!env.build_ini().exists());
}

#[test]
fn plan_pulls_in_unbuilt_dependencies() {
    let dir = tempdir().unwrap();
    let env = Environment::new(dir.path());
    let registry = ProjectRegistry::with_builtins().unwrap();

    let plan = registry.plan(&["supervisor".to_string()], &env).unwrap();
    let names: Vec<&str> = plan.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["base", "runtime", "supervisor"]);

    env.record_completed("base").unwrap();
    env.record_completed("runtime").unwrap();
    let plan = registry.plan(&["supervisor".to_string()], &env).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].name, "supervisor");
}

#[test]
fn later_task_sees_a_setting_saved_earlier_in_the_run() {
    let dir = tempdir().unwrap();
    let project = parse_project(PORTS, "ports.toml").unwrap();
    let mut store = ConfigStore::new();

    run(&project, dir.path(), &mut store).unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join("port.txt")).unwrap(),
        "listen 8080"
    );
    let saved = fs::read_to_string(Environment::new(dir.path()).build_ini()).unwrap();
    assert!(saved.contains("[general]\nport = 8080"));
}

#[test]
fn command_line_value_beats_a_value_saved_by_an_earlier_run() {
    let dir = tempdir().unwrap();
    let env = Environment::new(dir.path());
    let project = parse_project(GREETING, "greeting.toml").unwrap();

    let mut store = ConfigStore::new();
    run(&project, dir.path(), &mut store).unwrap();
    assert!(fs::read_to_string(env.build_ini()).unwrap().contains("[greeting]"));

    let mut store = load_config(&env, &[], &cmdline(&["greeting", "x=2"])).unwrap();
    run(&project, dir.path(), &mut store).unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join("share/greeting.txt")).unwrap(),
        "hello world x=2"
    );
    let saved = fs::read_to_string(env.build_ini()).unwrap();
    assert!(saved.contains("[DEFAULT]\nx = 2"));
    assert!(!saved.contains("x = 1"));
}
