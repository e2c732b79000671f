//! Machine controller sessions against the simulated controller

mod common;

use carvera_core::{
    AbortReason, ChecksumStatus, Connection, Error, LinkConfig, Machine, TransferConfig,
    TransferError,
};
use chrono::NaiveDate;
use common::{sample_content, shared_machine, simulated_transport, SharedMachine};
use std::path::Path;

fn open_machine(shared: &SharedMachine, config: &LinkConfig) -> Machine {
    let mut connection = Connection::new(
        Box::new(simulated_transport(shared)),
        config.transfer.clone(),
    );
    connection.open().unwrap();
    Machine::new(connection, config)
}

fn write_local(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn lists_gcode_directory() {
    let shared = shared_machine();
    shared
        .lock()
        .unwrap()
        .files
        .insert("/sd/gcodes/part.nc".to_string(), vec![0; 204_800]);

    let mut machine = open_machine(&shared, &LinkConfig::default());
    let files = machine.list_gcode_files().unwrap();

    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "part.nc");
    assert_eq!(files[0].size_bytes, 204_800);
    assert_eq!(
        files[0].modified_at,
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    );
    assert_eq!(machine.connection().address(), "192.168.1.50:2222");
}

#[test]
fn upload_then_list_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let local = write_local(dir.path(), "my part.nc", &sample_content(20_000));

    let shared = shared_machine();
    let mut machine = open_machine(&shared, &LinkConfig::default());

    let result = machine.upload_file(&local).unwrap();
    assert_eq!(result.bytes, 20_000);
    // 32 digest bytes + 20000 content bytes in 8 KiB blocks
    assert_eq!(result.blocks, 3);
    assert_eq!(result.retries, 0);
    assert!(matches!(result.checksum, ChecksumStatus::Sent(ref digest) if digest.len() == 32));

    {
        let state = shared.lock().unwrap();
        assert_eq!(state.files["/sd/gcodes/my part.nc"], sample_content(20_000));
        assert_eq!(state.commands[0], "upload /sd/gcodes/my\x01part.nc");
    }

    let names: Vec<String> = machine
        .list_gcode_files()
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(names, vec!["my part.nc"]);

    machine.remove_file("/sd/gcodes/my part.nc").unwrap();
    assert!(machine.list_gcode_files().unwrap().is_empty());
}

#[test]
fn upload_download_round_trip_with_verification() {
    let dir = tempfile::tempdir().unwrap();
    let content = sample_content(9_000);
    let local = write_local(dir.path(), "job.nc", &content);

    let shared = shared_machine();
    shared.lock().unwrap().md5_on_download = true;

    let mut config = LinkConfig::default();
    config.transfer = TransferConfig {
        verify_downloads: true,
        ..TransferConfig::default()
    };
    let mut machine = open_machine(&shared, &config);

    machine.upload_file(&local).unwrap();

    let copy = dir.path().join("copy.nc");
    let result = machine.download_file("/sd/gcodes/job.nc", &copy).unwrap();

    assert_eq!(std::fs::read(&copy).unwrap(), content);
    assert_eq!(result.bytes, content.len() as u64);
    assert!(matches!(result.checksum, ChecksumStatus::Verified(_)));
}

#[test]
fn download_without_verification_keeps_raw_payload() {
    let dir = tempfile::tempdir().unwrap();
    let content = sample_content(300);

    let shared = shared_machine();
    shared
        .lock()
        .unwrap()
        .files
        .insert("/sd/gcodes/raw.nc".to_string(), content.clone());

    let mut machine = open_machine(&shared, &LinkConfig::default());
    let local = dir.path().join("raw.nc");
    let result = machine.download_file("/sd/gcodes/raw.nc", &local).unwrap();

    assert_eq!(result.checksum, ChecksumStatus::Unverified);
    assert_eq!(result.blocks, 1);
    assert_eq!(std::fs::read(&local).unwrap(), content);
}

#[test]
fn rejected_upload_is_checksum_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let local = write_local(dir.path(), "bad.nc", b"G0 X0\n");

    let shared = shared_machine();
    shared.lock().unwrap().reject_uploads = true;

    let mut machine = open_machine(&shared, &LinkConfig::default());
    let err = machine.upload_file(&local).unwrap_err();

    assert!(matches!(
        err,
        Error::Transfer(TransferError::ChecksumMismatch { .. })
    ));
    assert!(shared.lock().unwrap().files.is_empty());
}

#[test]
fn missing_remote_file_aborts_download() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("nothing.nc");

    let shared = shared_machine();
    let mut machine = open_machine(&shared, &LinkConfig::default());
    let err = machine
        .download_file("/sd/gcodes/nothing.nc", &local)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transfer(TransferError::Aborted(AbortReason::RemoteCancel))
    ));
    assert!(!local.exists());
}

#[test]
fn missing_local_file_fails_before_any_command() {
    let shared = shared_machine();
    let mut machine = open_machine(&shared, &LinkConfig::default());

    let err = machine
        .upload_file(Path::new("/definitely/missing/part.nc"))
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transfer(TransferError::LocalFileNotFound(_))
    ));
    assert!(shared.lock().unwrap().commands.is_empty());
}

#[test]
fn unwritable_download_path_leaves_machine_usable() {
    let dir = tempfile::tempdir().unwrap();
    let shared = shared_machine();
    shared
        .lock()
        .unwrap()
        .files
        .insert("/sd/gcodes/a.nc".to_string(), sample_content(3_000));
    let mut machine = open_machine(&shared, &LinkConfig::default());

    let err = machine
        .download_file("/sd/gcodes/a.nc", &dir.path().join("missing-dir").join("a.nc"))
        .unwrap_err();

    assert!(matches!(err, Error::Transfer(TransferError::File(_))));
    assert!(shared.lock().unwrap().commands.is_empty());

    let files = machine.list_gcode_files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "a.nc");
}

#[test]
fn raw_commands_get_a_reply() {
    let shared = shared_machine();
    let mut machine = open_machine(&shared, &LinkConfig::default());

    assert_eq!(machine.query("version").unwrap(), vec!["ok"]);
    machine.run("time").unwrap();
    assert_eq!(shared.lock().unwrap().commands, vec!["version", "time"]);
}
