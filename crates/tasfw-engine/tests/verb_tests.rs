//! Integration tests for the session verbs.

mod common;

use common::*;
use tasfw_engine::prelude::*;
use tasfw_resource::prelude::*;

fn modes() -> [SnapshotMode; 2] {
    [SnapshotMode::PageDiff, SnapshotMode::FullBuffer]
}

// ---------------------------------------------------------------------------
// 1. End-to-end: three-frame Modify, then Test
// ---------------------------------------------------------------------------

/// Parent that runs the same three-frame child through Modify and Test and
/// records what it observed in between.
struct ModifyThenTest;

#[derive(Debug, Default)]
struct ModifyThenTestStatus {
    after_modify: (usize, u32),
    after_test: (usize, u32),
    test_status_diff_empty: bool,
}

impl Script<MemoryResource> for ModifyThenTest {
    type Status = ModifyThenTestStatus;

    fn execution(
        &mut self,
        session: &mut Session<MemoryResource>,
        status: &mut ModifyThenTestStatus,
    ) -> Result<bool, EngineError> {
        let three = sticks(&[10, 20, 30]);
        let modified = session.modify(Scripted::new(three.clone()))?;
        status.after_modify = (session.diff().len(), session.current_frame());

        let tested = session.test(Scripted::new(three))?;
        status.after_test = (session.diff().len(), session.current_frame());
        status.test_status_diff_empty = tested.diff().is_empty();
        Ok(modified.asserted() && tested.asserted())
    }
}

#[test]
fn three_step_modify_then_test() {
    for mode in modes() {
        let mut session = session_with_base(Diff::new(), mode);
        let status = session.run(ModifyThenTest).unwrap();

        assert!(status.asserted(), "{mode:?}");
        assert_eq!(status.custom.after_modify, (3, 3));
        assert_eq!(status.custom.after_test, (3, 3));
        assert!(status.custom.test_status_diff_empty);

        let frames: Vec<u32> = status.diff().iter().map(|(f, _)| f).collect();
        assert_eq!(frames, vec![0, 1, 2]);
        assert_eq!(session.current_frame(), 3);
        assert_eq!(pos_x(&session), 60);
    }
}

// ---------------------------------------------------------------------------
// 2. Test isolation
// ---------------------------------------------------------------------------

#[test]
fn test_leaves_state_bit_identical() {
    for mode in modes() {
        let mut session = session_with_base(Diff::new(), mode);
        session.modify(Scripted::new(sticks(&[5, 5]))).unwrap();
        let hash = session.game().state_hash();
        let frame = session.current_frame();

        let asserted = session.test(Scripted::new(sticks(&[1, 2, 3, 4]))).unwrap();
        assert!(asserted.asserted());
        let unasserted = session
            .test(Scripted::failing_assertion(sticks(&[9; 6])))
            .unwrap();
        assert!(!unasserted.asserted());

        assert_eq!(session.game().state_hash(), hash, "{mode:?}");
        assert_eq!(session.current_frame(), frame);
        assert_eq!(session.diff().len(), 2);
    }
}

// ---------------------------------------------------------------------------
// 3. Modify commit / rollback
// ---------------------------------------------------------------------------

#[test]
fn unasserted_modify_changes_nothing() {
    let mut session = session();
    session.modify(Scripted::new(sticks(&[1, 2]))).unwrap();
    let diff_before = session.diff().clone();
    let hash = session.game().state_hash();

    let status = session
        .modify(Scripted::failing_assertion(sticks(&[7, 7, 7])))
        .unwrap();

    assert!(!status.asserted());
    assert_eq!(status.base.failure, Some(FailureKind::Postcondition));
    assert_eq!(status.diff().len(), 3, "status still reports what the child wrote");
    assert_eq!(session.diff(), &diff_before);
    assert_eq!(session.game().state_hash(), hash);
}

#[test]
fn asserted_modify_overlays_child_diff() {
    let mut session = session();
    session.modify(Scripted::new(sticks(&[1, 2, 3, 4]))).unwrap();
    let before = session.diff().clone();

    session.load(2).unwrap();
    let child = session.modify(Scripted::new(sticks(&[9, 9, 9, 9]))).unwrap();

    assert_eq!(session.diff(), &before.overlaid(child.diff()));
    assert_eq!(session.current_frame(), 6);
    assert_eq!(pos_x(&session), 1 + 2 + 9 * 4);
}

#[test]
fn failure_kinds_are_reported() {
    let mut session = session();

    let mut invalid = Scripted::new(sticks(&[3]));
    invalid.valid = false;
    let status = session.modify(invalid).unwrap();
    assert_eq!(status.base.failure, Some(FailureKind::Precondition));
    assert!(status.diff().is_empty());
    assert_eq!(status.base.counters.advances, 0);

    let mut gives_up = Scripted::new(sticks(&[3, 3]));
    gives_up.executes = false;
    let status = session.modify(gives_up).unwrap();
    assert_eq!(status.base.failure, Some(FailureKind::Execution));
    assert_eq!(session.current_frame(), 0);
    assert!(session.diff().is_empty());
}

// ---------------------------------------------------------------------------
// 4. Execute / Apply
// ---------------------------------------------------------------------------

#[test]
fn apply_adopts_the_live_branch() {
    for mode in modes() {
        let mut session = session_with_base(Diff::new(), mode);
        session.advance_frames_read(2).unwrap();

        let branch = session.execute(Scripted::new(sticks(&[4, 4, 4]))).unwrap();
        let live_hash = session.game().state_hash();
        assert_eq!(session.current_frame(), 5);
        assert!(session.diff().is_empty(), "execute does not merge");

        let loads_before = session.game().stats().restores;
        session.apply(branch.diff()).unwrap();

        assert_eq!(session.game().stats().restores, loads_before, "{mode:?}");
        assert_eq!(session.game().state_hash(), live_hash);
        assert_eq!(session.diff(), branch.diff());
    }
}

#[test]
fn next_state_change_discards_the_live_branch() {
    let mut session = session();
    session.execute(Scripted::new(sticks(&[50, 50]))).unwrap();
    assert_eq!(pos_x(&session), 100);

    session.advance_frame_read().unwrap();
    assert_eq!(session.current_frame(), 1);
    assert_eq!(pos_x(&session), 0);
    assert!(session.diff().is_empty());
}

#[test]
fn applying_an_older_branch_replays_it() {
    for mode in modes() {
        let mut session = session_with_base(Diff::new(), mode);
        let first = session.execute(Scripted::new(sticks(&[8, 8, 8]))).unwrap();
        let second = session.execute(Scripted::new(sticks(&[-3, -3, -3]))).unwrap();
        assert!(second.asserted());

        session.apply(first.diff()).unwrap();

        let mut reference = session_with_base(Diff::new(), mode);
        reference.modify(Scripted::new(sticks(&[8, 8, 8]))).unwrap();

        assert_eq!(session.current_frame(), 3);
        assert_eq!(session.game().state_hash(), reference.game().state_hash(), "{mode:?}");
        assert_eq!(session.diff(), reference.diff());
    }
}

#[test]
fn test_runs_on_the_live_branch_and_keeps_it() {
    for mode in modes() {
        let mut session = session_with_base(Diff::new(), mode);
        let branch = session.execute(Scripted::new(sticks(&[4, 4, 4]))).unwrap();
        let live_hash = session.game().state_hash();

        let tested = session.test(Scripted::new(sticks(&[1]))).unwrap();
        assert_eq!(tested.custom.x_after, 13, "child starts from the branch end");
        assert_eq!(session.current_frame(), 3, "{mode:?}");
        assert_eq!(session.game().state_hash(), live_hash, "{mode:?}");

        let restores = session.game().stats().restores;
        session.apply(branch.diff()).unwrap();
        assert_eq!(session.game().stats().restores, restores, "branch still adoptable");
        assert_eq!(session.game().state_hash(), live_hash);
    }
}

#[test]
fn saves_discard_the_live_branch() {
    let mut session = session().with_save_policy(SavePolicy::Always);
    session.advance_frames_read(2).unwrap();

    session.execute(Scripted::new(sticks(&[5, 5]))).unwrap();
    assert_eq!(session.current_frame(), 4);
    session.save().unwrap();
    assert_eq!(session.current_frame(), 2);
    assert_eq!(pos_x(&session), 0);
    assert!(session.saves().get(2).is_some());
    assert!(session.saves().get(4).is_none());

    session.advance_frame_read().unwrap();
    session.execute(Scripted::new(sticks(&[5, 5]))).unwrap();
    assert!(session.optional_save().unwrap());
    assert_eq!(session.current_frame(), 3);
    assert!(session.saves().get(3).is_some());
    assert!(session.saves().get(5).is_none());
}

#[test]
fn apply_lands_after_the_last_entry_on_either_path() {
    let reader = || WriteThenRead {
        inputs: sticks(&[7]),
        reads: 4,
    };
    for mode in modes() {
        let mut adopted = session_with_base(Diff::new(), mode);
        let branch = adopted.execute(reader()).unwrap();
        assert_eq!(adopted.current_frame(), 5);
        adopted.apply(branch.diff()).unwrap();

        let mut replayed = session_with_base(Diff::new(), mode);
        let branch = replayed.execute(reader()).unwrap();
        replayed.execute(Scripted::new(sticks(&[-2]))).unwrap();
        replayed.apply(branch.diff()).unwrap();

        assert_eq!(adopted.current_frame(), 1, "{mode:?}");
        assert_eq!(replayed.current_frame(), 1, "{mode:?}");
        assert_eq!(pos_x(&adopted), 7);
        assert_eq!(adopted.game().state_hash(), replayed.game().state_hash());
        assert_eq!(adopted.diff(), replayed.diff());
    }
}

#[test]
fn apply_in_the_past_resimulates() {
    let mut session = session();
    session.modify(Scripted::new(sticks(&[1; 10]))).unwrap();
    assert_eq!(pos_x(&session), 10);

    let patch: Diff = [(2, Inputs::stick(20, 0))].into_iter().collect();
    session.apply(&patch).unwrap();

    assert_eq!(session.current_frame(), 3);
    assert_eq!(pos_x(&session), 1 + 1 + 20);

    session.load(10).unwrap();
    assert_eq!(pos_x(&session), 9 + 20);
}

#[test]
fn apply_before_base_is_rejected() {
    let mut base = session();
    base.advance_frames_read(5).unwrap();
    let mut session = Session::new(base.into_game(), Diff::new());

    let patch: Diff = [(1, Inputs::stick(1, 0))].into_iter().collect();
    let err = session.apply(&patch).unwrap_err();
    assert!(matches!(err, EngineError::BeforeBase { frame: 1, base: 5 }));
}

// ---------------------------------------------------------------------------
// 5. Frame writes
// ---------------------------------------------------------------------------

#[test]
fn writes_equal_to_inherited_inputs_are_not_stored() {
    let base: Diff = (0..5).map(|f| (f, Inputs::stick(2, 0))).collect();
    let mut session = session_with_base(base, SnapshotMode::PageDiff);

    struct Rewrite;
    impl Script<MemoryResource> for Rewrite {
        type Status = usize;
        fn execution(
            &mut self,
            session: &mut Session<MemoryResource>,
            stored: &mut usize,
        ) -> Result<bool, EngineError> {
            session.advance_frame_write(Inputs::stick(2, 0))?;
            session.advance_frame_write(Inputs::stick(3, 0))?;
            session.advance_frame_write(Inputs::stick(2, 0))?;
            *stored = session.diff().len();
            Ok(true)
        }
    }

    let status = session.modify(Rewrite).unwrap();
    assert_eq!(status.custom, 1);
    assert_eq!(status.diff().get(1), Some(Inputs::stick(3, 0)));
    assert_eq!(pos_x(&session), 7);
}

#[test]
fn controller_bytes_reach_memory() {
    let mut session = session();
    session
        .advance_frame_write(Inputs::new(buttons::A, -5, 6))
        .unwrap();
    let pad = session.game().read_bytes(PAD, Inputs::PAD_LEN).unwrap();
    assert_eq!(pad, &[0x00, 0x80, 0xFB, 0x06, 0x00]);
    assert_eq!(session.game().read_value::<i32>(JUMPS).unwrap(), 1);
}

// ---------------------------------------------------------------------------
// 6. Saves and loads
// ---------------------------------------------------------------------------

#[test]
fn load_backwards_restores_latest_save() {
    let mut session = session();
    session.modify(Scripted::new(sticks(&[1; 20]))).unwrap();
    session.save_at(12).unwrap();
    session.load(20).unwrap();

    let restores = session.game().stats().restores;
    let advances = session.game().stats().advances;
    session.load(15).unwrap();

    assert_eq!(session.game().stats().restores, restores + 1);
    assert_eq!(session.game().stats().advances, advances + 3);
    assert_eq!(pos_x(&session), 15);
}

#[test]
fn load_before_base_fails() {
    let mut base = session();
    base.advance_frames_read(4).unwrap();
    let mut session = Session::new(base.into_game(), Diff::new());
    assert!(matches!(
        session.load(2),
        Err(EngineError::BeforeBase { frame: 2, base: 4 })
    ));
    session.load(6).unwrap();
    assert_eq!(session.current_frame(), 6);
}

#[test]
fn writing_before_a_save_invalidates_it() {
    let mut session = session();
    session.advance_frames_read(6).unwrap();
    session.save().unwrap();
    assert_eq!(session.saves().frames().collect::<Vec<_>>(), vec![0, 6]);

    session.load(3).unwrap();
    session.advance_frame_write(Inputs::stick(4, 0)).unwrap();
    assert_eq!(session.saves().frames().collect::<Vec<_>>(), vec![0]);

    session.load(6).unwrap();
    assert_eq!(pos_x(&session), 4);
}

#[test]
fn committed_child_saves_are_promoted() {
    struct SaveMidway;
    impl Script<MemoryResource> for SaveMidway {
        type Status = ();
        fn execution(
            &mut self,
            session: &mut Session<MemoryResource>,
            _: &mut (),
        ) -> Result<bool, EngineError> {
            session.advance_frame_write(Inputs::stick(3, 0))?;
            session.advance_frame_write(Inputs::stick(3, 0))?;
            session.save()?;
            session.advance_frame_write(Inputs::stick(3, 0))?;
            Ok(true)
        }
    }

    let mut session = session();
    session.modify(SaveMidway).unwrap();
    assert!(session.saves().get(2).is_some());

    session.test(SaveMidway).unwrap();
    assert_eq!(session.saves().len(), 2, "tested saves are discarded");
}

#[test]
fn optional_save_follows_policy() {
    let mut never = session().with_save_policy(SavePolicy::Never);
    never.advance_frames_read(3).unwrap();
    assert!(!never.optional_save().unwrap());

    let mut always = session().with_save_policy(SavePolicy::Always);
    always.advance_frames_read(3).unwrap();
    assert!(always.optional_save().unwrap());
    assert!(always.saves().get(3).is_some());

    let mut every = session().with_save_policy(SavePolicy::Every(5));
    every.advance_frames_read(4).unwrap();
    assert!(!every.optional_save().unwrap());
    every.advance_frame_read().unwrap();
    assert!(every.optional_save().unwrap());

    let mut adaptive = session();
    assert_eq!(adaptive.save_policy(), SavePolicy::Adaptive);
    assert!(!adaptive.optional_save().unwrap(), "base save already covers frame 0");
}

#[test]
fn long_load_saves_at_target() {
    let base: Diff = (0..40).map(|f| (f, Inputs::stick(1, -1))).collect();
    let mut session = session_with_base(base, SnapshotMode::FullBuffer);
    session.long_load(30).unwrap();

    assert_eq!(session.current_frame(), 30);
    assert_eq!(pos_x(&session), 30);
    assert_eq!(pos_z(&session), -30);
    assert!(session.saves().get(30).is_some());
}

// ---------------------------------------------------------------------------
// 7. Replay verification
// ---------------------------------------------------------------------------

#[test]
fn replay_of_committed_view_is_deterministic() {
    for mode in modes() {
        let mut session = session_with_base(Diff::new(), mode);
        session.modify(Scripted::new(sticks(&[3, -1, 4, 1, -5, 9]))).unwrap();
        let hash = session.game().state_hash();

        let report = session.verify_replay(6, 2).unwrap();
        assert!(report.deterministic(), "{mode:?}");
        assert_eq!(report.frames_replayed, 6);
        let frames: Vec<u32> = report.checkpoints.iter().map(|(f, _)| *f).collect();
        assert_eq!(frames, vec![0, 2, 4, 6]);
        assert_eq!(report.checkpoints.last().map(|(_, h)| h.as_str()), Some(hash.as_str()));

        assert_eq!(session.current_frame(), 6);
        assert_eq!(session.game().state_hash(), hash);
    }
}

// ---------------------------------------------------------------------------
// 8. Nesting
// ---------------------------------------------------------------------------

#[test]
fn grandchild_branch_does_not_leak_out_of_child() {
    struct Explore;
    impl Script<MemoryResource> for Explore {
        type Status = ();
        fn execution(
            &mut self,
            session: &mut Session<MemoryResource>,
            _: &mut (),
        ) -> Result<bool, EngineError> {
            session.advance_frame_write(Inputs::stick(1, 0))?;
            session.execute(Scripted::new(sticks(&[40, 40])))?;
            Ok(true)
        }
    }

    let mut session = session();
    let status = session.modify(Explore).unwrap();

    assert!(status.asserted());
    assert_eq!(status.diff().len(), 1);
    assert_eq!(session.current_frame(), 1);
    assert_eq!(pos_x(&session), 1);
    assert_eq!(session.depth(), 0);
}

// ---------------------------------------------------------------------------
// 9. Fatal errors
// ---------------------------------------------------------------------------

#[test]
fn script_fault_unwinds_the_stack() {
    struct Broken;
    impl Script<MemoryResource> for Broken {
        type Status = ();
        fn execution(
            &mut self,
            session: &mut Session<MemoryResource>,
            _: &mut (),
        ) -> Result<bool, EngineError> {
            session.advance_frame_write(Inputs::stick(1, 0))?;
            Err(EngineError::Script {
                script: "Broken",
                message: "lost track of the platform".to_owned(),
            })
        }
    }

    let mut session = session();
    let err = session.modify(Broken).unwrap_err();
    assert!(matches!(err, EngineError::Script { script: "Broken", .. }));
    assert_eq!(err.to_string(), "script 'Broken' failed: lost track of the platform");
    assert_eq!(session.depth(), 0);
    assert!(session.diff().is_empty());
}

#[test]
fn fatal_error_keeps_what_the_top_level_recorded() {
    struct CommitsThenFails;
    impl Script<MemoryResource> for CommitsThenFails {
        type Status = ();
        fn execution(
            &mut self,
            session: &mut Session<MemoryResource>,
            _: &mut (),
        ) -> Result<bool, EngineError> {
            session.modify(Scripted::new(sticks(&[3, 3, 3])))?;
            session.advance_frame_write(Inputs::stick(9, 0))?;
            session.execute(Scripted::new(sticks(&[1, 1])))?;
            Err(EngineError::Script {
                script: "CommitsThenFails",
                message: "gave up".to_owned(),
            })
        }
    }

    let mut session = session();
    assert!(session.interrupted_diff().is_empty());
    assert!(session.run(CommitsThenFails).is_err());

    assert!(session.base_diff().is_empty());
    let expected: Diff = (0..3)
        .map(|f| (f, Inputs::stick(3, 0)))
        .chain([(3, Inputs::stick(9, 0))])
        .collect();
    assert_eq!(session.base_diff().overlaid(session.interrupted_diff()), expected);

    session.run(Scripted::new(sticks(&[2]))).unwrap();
    assert!(session.interrupted_diff().is_empty(), "each run starts clean");
}
