
use fixtures::*;

use diagpack::{ExternalCommand, Outcome, Pipeline, PipelineSettings, RetryPolicy, Stage};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn settings(work_base: &Path) -> PipelineSettings {
    let missing = || ExternalCommand::parse(MISSING_DECODER).unwrap();

    PipelineSettings::new()
        .work_dir_base(work_base)
        .num_threads(2)
        .retry(RetryPolicy::new(2, Duration::from_millis(10)))
        .event_decoder(missing())
        .trace_decoder(missing())
        .cab_expander(missing())
}

#[test]
fn test_it_builds_the_final_archive() {
    ensure_env_logger_initialized();
    let d = tempdir().unwrap();
    let input = sample_bundle(d.path());
    let output = d.path().join("PC-01-processed.zip");
    let work_base = d.path().join("work");

    let mut stages = vec![];
    let report = Pipeline::new(settings(&work_base))
        .run(&input, &output, |s| stages.push(s))
        .unwrap();

    assert_eq!(
        zip_names(&output),
        vec![
            "Logs/setupact.log",
            "README (original).TXT",
            "README.TXT",
            "SetupDiagResults.csv",
            "policy.reg.csv",
            "unknown.dat",
        ]
    );
    assert_eq!(report.archive, output);
    assert!(report.archive_size > 0);
    assert_eq!(report.count_outcome(Outcome::Converted), 2);
    assert_eq!(report.count_outcome(Outcome::Empty), 1);
    assert!(report.cleanup_warning.is_none());
    assert!(!work_base.join("diagpack-PC-01").exists());
    assert_eq!(stages.first(), Some(&Stage::Preparing));
    assert_eq!(stages.last(), Some(&Stage::CleaningUp));
}

#[test]
fn test_converted_files_replace_their_originals() {
    let d = tempdir().unwrap();
    let input = sample_bundle(d.path());
    let output = d.path().join("out.zip");

    Pipeline::new(settings(&d.path().join("work")))
        .run(&input, &output, |_| {})
        .unwrap();

    let reg = String::from_utf8(zip_entry(&output, "policy.reg.csv")).unwrap();
    assert_eq!(reg, REGISTRY_EXPORT.replace('\n', "\r\n"));

    let setup_diag = zip_entry(&output, "SetupDiagResults.csv");
    let mut reader = csv::Reader::from_reader(&setup_diag[..]);
    assert_eq!(
        reader.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["Timestamp", "Code", "Phase", "Operation", "Message"]
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[2][4], "Rollback, \"migration\" failed");

    let names = zip_names(&output);
    assert!(!names.iter().any(|n| n.ends_with(".reg")));
    assert!(!names.iter().any(|n| n.ends_with("SetupDiagResults.xml")));
}

#[test]
fn test_manifest_describes_the_archive() {
    let d = tempdir().unwrap();
    let input = sample_bundle(d.path());
    let output = d.path().join("out.zip");

    Pipeline::new(settings(&d.path().join("work")))
        .run(&input, &output, |_| {})
        .unwrap();

    let manifest = String::from_utf8(zip_entry(&output, "README.TXT")).unwrap();
    assert!(manifest.contains("Logs/setupact.log\r\n"));
    assert!(manifest.contains("README (original).TXT\r\n"));
    assert!(!manifest.contains("notes.txt"));
    assert!(!manifest.contains("empty.evtx"));

    let original = zip_entry(&output, "README (original).TXT");
    assert_eq!(original, b"collected by the diagnostic tool");
}

#[test]
fn test_undecodable_event_logs_pass_through() {
    let d = tempdir().unwrap();
    let input = d.path().join("bundle.zip");
    write_zip(
        &input,
        &[
            ("Logs/System.evtx", b"ElfFile\0 not really"),
            ("Logs/trace.etl", b"binary trace"),
        ],
    );
    let output = d.path().join("out.zip");

    let report = Pipeline::new(settings(&d.path().join("work")))
        .run(&input, &output, |_| {})
        .unwrap();

    assert_eq!(report.count_outcome(Outcome::Failed), 2);
    assert_eq!(
        zip_names(&output),
        vec!["Logs/System.evtx", "Logs/trace.etl", "README.TXT"]
    );
}

#[test]
#[cfg(not(target_os = "windows"))]
fn test_colliding_event_logs_get_numbered_names() {
    let d = tempdir().unwrap();
    let input = d.path().join("bundle.zip");
    let rows = b"TimeCreated,Id,ProviderName,Level,Message\n2024-01-02,41,Kernel-Power,Critical,Rebooted\n";
    write_zip(
        &input,
        &[("A/System.evtx", rows), ("B/System.evtx", rows)],
    );
    let output = d.path().join("out.zip");

    // `cat` prints the fixture back, which is already in the CSV shape a decoder emits.
    let settings = settings(&d.path().join("work"))
        .event_decoder(ExternalCommand::parse("cat {input}").unwrap());
    Pipeline::new(settings)
        .run(&input, &output, |_| {})
        .unwrap();

    assert_eq!(
        zip_names(&output),
        vec!["README.TXT", "System (2).evtx.csv", "System.evtx.csv"]
    );
    assert_eq!(
        String::from_utf8(zip_entry(&output, "System.evtx.csv")).unwrap(),
        "TimeCreated,Id,ProviderName,Level,Message\n2024-01-02,41,Kernel-Power,Critical,Rebooted\n"
    );
}

#[test]
fn test_keep_work_dir_leaves_intermediate_trees() {
    let d = tempdir().unwrap();
    let input = sample_bundle(d.path());
    let output = d.path().join("out.zip");
    let work_base = d.path().join("work");

    let report = Pipeline::new(settings(&work_base).keep_work_dir(true))
        .run(&input, &output, |_| {})
        .unwrap();

    assert_eq!(report.work_dir, work_base.join("diagpack-PC-01"));
    assert!(report.work_dir.join("extracted/Policies/policy.reg").exists());
    assert!(report.work_dir.join("converted/policy.reg.csv").exists());
    assert!(report.work_dir.join("final/README.TXT").exists());
}
