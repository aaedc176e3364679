use super::*;
use crate::testing::{build_error, task_failure, EngineRig, ScriptedPrompt};

const FOO: &str = "SRC_URI = \"http://example.com/foo-${PV}.tar.gz\"\n\
                   SRC_URI[md5sum] = \"0000\"\n\
                   SRC_URI[sha256sum] = \"1111\"\n";

/// The original fetch passes, the first fetch of 1.2 reports new checksums.
fn queue_foo_fetches(rig: &EngineRig) {
    rig.build.queue_fetch(Ok(()));
    rig.build.queue_fetch(Err(build_error(task_failure(
        rig.root(),
        "foo",
        "1.2",
        "do_fetch",
        "ERROR: Fetcher failure for URL: 'http://example.com/foo-1.2.tar.gz'. Checksum mismatch!\n\
         SRC_URI[md5sum] = \"4a8a08f09d37b737\"\n\
         SRC_URI[sha256sum] = \"9f86d081884c7d65\"\n",
    ))));
}

fn checkpkg_row(pn: &str, current: &str, next: &str, maintainer: &str) -> String {
    format!(
        "{pn}\t{current}\t{next}\tMIT\tbase\thttp://example.com\t\t\t\t0\t{pn}\tUPDATE\tY\t\
         http://example.com/{pn}-{current}.tar.gz\tSomeone <{maintainer}>\t\n"
    )
}

fn checkpkg(rows: &[(&str, &str, &str, &str)]) -> String {
    let mut text = String::from("PackageName\tVersion\tUpVersion\tLicense\n");
    for (pn, current, next, maintainer) in rows {
        text.push_str(&checkpkg_row(pn, current, next, maintainer));
    }
    text
}

fn day(n: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, n).expect("valid date")
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

fn pns(requests: &[PackageRequest]) -> Vec<&str> {
    requests.iter().map(|request| request.pn.as_str()).collect()
}

#[test]
fn selection_rules() {
    assert_eq!(
        Selection::from_args(&names(&["all"]), None).expect("all"),
        Selection::All
    );
    assert_eq!(
        Selection::from_args(&names(&["foo"]), Some("1.2")).expect("single"),
        Selection::Named {
            packages: names(&["foo"]),
            target: Some("1.2".to_string()),
        }
    );
    let err = Selection::from_args(&names(&["foo", "bar"]), Some("1.2")).expect_err("two");
    assert!(err.to_string().contains("exactly one package"));
    assert!(Selection::from_args(&names(&["all"]), Some("1.2")).is_err());
    assert!(Selection::from_args(&names(&["all", "foo"]), None).is_err());
    assert!(Selection::from_args(&[], None).is_err());
}

#[test]
fn all_mode_keeps_only_eligible_candidates() {
    let mut rig = EngineRig::new();
    rig.config.blacklist = names(&["bar"]);
    rig.config.maintainers_whitelist = names(&["jane@example.com"]);
    rig.config.clean_tmp = true;
    let stale = rig.paths.tmp_dir().join("work/stale");
    fs::create_dir_all(&stale).expect("mkdir stale");
    rig.build.set_checkpkg(
        rig.paths.checkpkg_csv(),
        &checkpkg(&[
            ("foo", "1.0", "1.2", "jane@example.com"),
            ("bar", "1.0", "2.0", "jane@example.com"),
            ("quux", "1.0", "2.0", "john@example.com"),
            ("gcc-cross-x86_64", "13.1", "13.2", "jane@example.com"),
            ("zlib", "1.3", "1.3", "jane@example.com"),
            ("baz", "2.0", "2.1", "jane@example.com"),
            ("qux", "0.9", "N/A", "jane@example.com"),
        ]),
    );
    let mut latest = BTreeMap::new();
    latest.insert(
        "baz".to_string(),
        HistoryEntry::new("baz", "2.1", None, "Failed(do_compile)", false, day(1)),
    );

    let engine = rig.engine(RunOptions::default());
    let requests = select(&engine, &Selection::All, &latest, day(10)).expect("select");

    assert_eq!(
        requests,
        vec![PackageRequest {
            pn: "foo".to_string(),
            target: Some("1.2".to_string()),
            maintainer: Some("jane@example.com".to_string()),
        }]
    );
    assert_eq!(rig.build.calls(), vec!["checkpkg universe"]);
    assert!(!stale.exists());
}

#[test]
fn named_packages_take_targets_from_upstream() {
    let rig = EngineRig::new();
    rig.build.set_checkpkg(
        rig.paths.checkpkg_csv(),
        &checkpkg(&[
            ("foo", "1.0", "1.2", "jane@example.com"),
            ("bar", "3.1", "3.1", "john@example.com"),
        ]),
    );
    let selection = Selection::Named {
        packages: names(&["foo", "bar"]),
        target: None,
    };

    let engine = rig.engine(RunOptions::default());
    let requests = select(&engine, &selection, &BTreeMap::new(), day(10)).expect("select");

    assert_eq!(pns(&requests), vec!["foo", "bar"]);
    assert_eq!(requests[0].target.as_deref(), Some("1.2"));
    assert_eq!(requests[0].maintainer.as_deref(), Some("jane@example.com"));
    assert_eq!(requests[1].target, None);
    assert_eq!(rig.build.calls(), vec!["checkpkg foo bar"]);
}

#[test]
fn explicit_target_skips_the_upstream_check() {
    let rig = EngineRig::new();
    let selection = Selection::Named {
        packages: names(&["foo"]),
        target: Some("2.0".to_string()),
    };

    let engine = rig.engine(RunOptions::default());
    let requests = select(&engine, &selection, &BTreeMap::new(), day(10)).expect("select");

    assert_eq!(requests, vec![PackageRequest::new("foo", Some("2.0".to_string()))]);
    assert!(rig.build.calls().is_empty());
}

#[test]
fn dependencies_are_upgraded_first() {
    let mut rig = EngineRig::new();
    rig.config.order_by_dependencies = true;
    rig.build.set_buildlist(&["zlib", "bar", "foo"]);
    let requests = vec![
        PackageRequest::new("foo", None),
        PackageRequest::new("mystery", None),
        PackageRequest::new("bar", None),
    ];

    let ordered = order(&rig.engine(RunOptions::default()), requests).expect("order");

    assert_eq!(pns(&ordered), vec!["bar", "foo", "mystery"]);
    assert_eq!(rig.build.calls(), vec!["graph foo mystery bar"]);
}

#[test]
fn order_is_kept_without_dependency_ordering() {
    let rig = EngineRig::new();
    let requests = vec![
        PackageRequest::new("foo", None),
        PackageRequest::new("bar", None),
    ];

    let ordered = order(&rig.engine(RunOptions::default()), requests).expect("order");

    assert_eq!(pns(&ordered), vec!["foo", "bar"]);
    assert!(rig.build.calls().is_empty());
}

#[test]
fn batch_records_every_outcome() {
    let rig = EngineRig::new();
    rig.add_recipe("foo", "1.0", FOO);
    rig.add_recipe("bar", "3.1", "SRC_URI = \"http://example.com/bar-${PV}.tar.gz\"\n");
    let mut foo = PackageRequest::new("foo", Some("1.2".to_string()));
    foo.maintainer = Some("jane@example.com".to_string());
    let requests = vec![foo, PackageRequest::new("bar", Some("3.1".to_string()))];
    queue_foo_fetches(&rig);

    let engine = rig.engine(RunOptions::default());
    let report = run_batch(&engine, &requests, day(20)).expect("batch");

    let statuses: Vec<&str> = report
        .packages
        .iter()
        .map(|package| package.status.as_str())
        .collect();
    assert_eq!(statuses, vec!["Succeeded", "UpgradeNotNeeded"]);
    assert_eq!(report.packages[0].from_version.as_deref(), Some("1.0"));
    assert!(report.packages[0].patch.is_some());
    assert!(report.packages[1].patch.is_none());
    assert_eq!(report.statistics.attempted, 1);
    assert_eq!(report.statistics.succeeded, 1);

    let commits = rig.vcs().commits();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].starts_with("foo: upgrade to 1.2\n"));

    let latest = history::load_latest(&rig.paths.history_path()).expect("history");
    assert_eq!(latest["foo"].status, "Succeeded");
    assert_eq!(latest["foo"].maintainer.as_deref(), Some("jane@example.com"));
    assert!(!latest["foo"].retryable);
    assert_eq!(latest["bar"].status, "UpgradeNotNeeded");
}

#[test]
fn compile_failures_are_not_retried_later() {
    let rig = EngineRig::new();
    rig.add_recipe("foo", "1.0", FOO);
    queue_foo_fetches(&rig);
    rig.build.queue_build(Err(build_error(task_failure(
        rig.root(),
        "foo",
        "1.2",
        "do_compile",
        "foo.c:12: error: implicit declaration of function 'strlcpy'\n",
    ))));
    let requests = vec![PackageRequest::new("foo", Some("1.2".to_string()))];

    let engine = rig.engine(RunOptions::default());
    let report = run_batch(&engine, &requests, day(20)).expect("batch");

    let package = &report.packages[0];
    assert_eq!(package.status, "Failed(do_compile)");
    assert!(package.error.is_some());
    assert_eq!(package.command, None);
    let calls = rig.vcs().calls();
    assert_eq!(calls[calls.len() - 2..], ["reset --hard HEAD~1", "clean -fd"]);
    let latest = history::load_latest(&rig.paths.history_path()).expect("history");
    assert!(!latest["foo"].retryable);
    assert!(!history::should_attempt(&latest, "foo", "1.2", day(30), 7));
}

#[test]
fn declining_to_continue_stops_the_batch() {
    let mut rig = EngineRig::new();
    rig.add_recipe("bar", "3.1", "SRC_URI = \"http://example.com/bar-${PV}.tar.gz\"\n");
    rig.add_recipe("foo", "1.0", FOO);
    rig.prompt = ScriptedPrompt::answering(&[false]);
    let requests = vec![
        PackageRequest::new("bar", Some("3.1".to_string())),
        PackageRequest::new("foo", Some("1.2".to_string())),
    ];
    let options = RunOptions {
        interactive: true,
        skip_compilation: false,
    };

    let report = run_batch(&rig.engine(options), &requests, day(20)).expect("batch");

    assert_eq!(rig.prompt.asked(), vec!["Proceed to next package?"]);
    assert_eq!(report.packages.len(), 1);
    assert!(rig.build.calls_matching("fetch").is_empty());
}

#[test]
fn report_is_written_to_the_helper_dir() {
    let rig = EngineRig::new();
    let mut report = RunReport::default();
    report.statistics.record("foo", "1.2", "jane@example.com", "Succeeded");
    report.packages.push(PackageReport {
        pn: "foo".to_string(),
        from_version: Some("1.0".to_string()),
        to_version: Some("1.2".to_string()),
        maintainer: None,
        status: "Succeeded".to_string(),
        error: None,
        command: None,
        patch: None,
        workdir: rig.paths.package_workdir("foo"),
    });

    publish(&rig.paths, &report, false).expect("publish");

    let text = fs::read_to_string(rig.paths.report_path()).expect("read report");
    let value: serde_json::Value = serde_json::from_str(&text).expect("parse report");
    assert_eq!(value["packages"][0]["status"], "Succeeded");
    assert!(value["packages"][0].get("error").is_none());
    assert_eq!(value["statistics"]["attempted"], 1);
}
