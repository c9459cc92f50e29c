//! M64 recordings on disk, and their round trip through a session.

mod common;

use common::*;
use tasfw_engine::prelude::*;
use tasfw_engine::recording::HEADER_LEN;
use tasfw_resource::prelude::*;

#[test]
fn missing_file_loads_as_empty_recording() {
    let dir = tempfile::tempdir().unwrap();
    let recording = Recording::load(&dir.path().join("absent.m64")).unwrap();
    assert!(recording.is_empty());
    assert_eq!(recording.header().len(), HEADER_LEN);
    assert_eq!(&recording.header()[..4], b"M64\x1A");
}

#[test]
fn save_then_load_keeps_header_and_samples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.m64");

    let mut recording: Recording = [
        Inputs::new(buttons::A, 10, -10),
        Inputs::stick(0, 127),
        Inputs::new(buttons::START | buttons::Z, -128, 0),
    ]
    .into_iter()
    .collect();
    recording.save(&path).unwrap();

    let loaded = Recording::load(&path).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.to_diff(), recording.to_diff());
    assert_eq!(loaded.to_bytes().unwrap(), recording.to_bytes().unwrap());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), (HEADER_LEN + 12) as u64);

    let extra: Diff = [(5, Inputs::stick(1, 1))].into_iter().collect();
    recording.apply_diff(&extra);
    recording.save(&path).unwrap();
    assert_eq!(Recording::load(&path).unwrap().len(), 6);
}

#[test]
fn corrupt_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.m64");
    std::fs::write(&path, vec![0xAA; HEADER_LEN + 8]).unwrap();

    let err = Recording::load(&path).unwrap_err();
    assert!(matches!(err, RecordingError::BadSignature { .. }));
    assert!(err.to_string().contains("corrupt.m64"));
}

#[test]
fn session_result_persists_into_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.m64");
    let original: Recording = sticks(&[1, 1, 1, 1]).into_iter().collect();
    original.save(&path).unwrap();

    let mut recording = Recording::load(&path).unwrap();
    let mut session = session_with_base(recording.to_diff(), SnapshotMode::PageDiff);
    session.load(2).unwrap();
    let status = session.run(HoldInputs::sequence(sticks(&[1, 9, 9]))).unwrap();
    assert_eq!(status.diff().len(), 2, "the unchanged frame is not stored");

    recording.apply_diff(status.diff());
    recording.save(&path).unwrap();

    let replayed = Recording::load(&path).unwrap();
    assert_eq!(replayed.len(), 5);
    let mut check = session_with_base(replayed.to_diff(), SnapshotMode::FullBuffer);
    check.load(5).unwrap();
    assert_eq!(pos_x(&check), 1 + 1 + 1 + 9 + 9);
    assert_eq!(check.game().state_hash(), session.game().state_hash());
}
