use super::*;

fn hash_of(cols: u16, rows: u16, steps: &[Step]) -> String {
    let mut screen = Screen::new(cols, rows);
    for step in steps {
        match step {
            Step::Output(bytes) => screen.feed(bytes),
            Step::Resize { cols, rows } => screen.resize(*cols, *rows),
        }
    }
    screen.snapshot().frame_hash
}

#[test]
fn single_checkpoint_matching_hash_passes() {
    let steps = vec![Step::Output(b"hello".to_vec())];
    let expected = hash_of(80, 24, &steps);

    let scenario = Scenario {
        cols: 80,
        rows: 24,
        steps,
        checkpoints: vec![Checkpoint {
            after_step: 0,
            direct_frame_hash: expected,
            direct_frame: None,
        }],
    };

    let result = run_scenario(&scenario);
    assert!(result.pass);
    assert_eq!(result.checkpoints.len(), 1);
    assert!(result.checkpoints[0].pass);
    assert!(result.checkpoints[0].diff.is_none());
}

#[test]
fn mismatched_hash_fails_and_reports_no_diff_without_expected_frame() {
    let scenario = Scenario {
        cols: 80,
        rows: 24,
        steps: vec![Step::Output(b"hello".to_vec())],
        checkpoints: vec![Checkpoint {
            after_step: 0,
            direct_frame_hash: "not-a-real-hash".to_string(),
            direct_frame: None,
        }],
    };

    let result = run_scenario(&scenario);
    assert!(!result.pass);
    assert!(!result.checkpoints[0].pass);
    assert!(result.checkpoints[0].diff.is_none());
}

#[test]
fn mismatched_hash_with_expected_frame_produces_field_diff() {
    let mut expected_screen = Screen::new(80, 24);
    expected_screen.feed(b"goodbye");
    let expected_frame = expected_screen.snapshot();

    let scenario = Scenario {
        cols: 80,
        rows: 24,
        steps: vec![Step::Output(b"hello".to_vec())],
        checkpoints: vec![Checkpoint {
            after_step: 0,
            direct_frame_hash: expected_frame.frame_hash.clone(),
            direct_frame: Some(expected_frame),
        }],
    };

    let result = run_scenario(&scenario);
    assert!(!result.pass);
    let diff = result.checkpoints[0].diff.as_ref().expect("diff expected");
    assert!(diff.iter().any(|d| d.field == "lines"));
}

#[test]
fn resize_step_is_reflected_at_checkpoint() {
    let steps = vec![
        Step::Output(b"hello".to_vec()),
        Step::Resize { cols: 40, rows: 10 },
        Step::Output(b" world".to_vec()),
    ];
    let expected = hash_of(80, 24, &steps);

    let scenario = Scenario {
        cols: 80,
        rows: 24,
        steps,
        checkpoints: vec![Checkpoint {
            after_step: 2,
            direct_frame_hash: expected,
            direct_frame: None,
        }],
    };

    let result = run_scenario(&scenario);
    assert!(result.pass);
}

#[test]
fn multiple_checkpoints_at_different_steps_all_verified() {
    let step0 = Step::Output(b"a".to_vec());
    let step1 = Step::Output(b"b".to_vec());

    let hash_after_0 = hash_of(80, 24, std::slice::from_ref(&step0));
    let hash_after_1 = hash_of(80, 24, &[step0.clone(), step1.clone()]);

    let scenario = Scenario {
        cols: 80,
        rows: 24,
        steps: vec![step0, step1],
        checkpoints: vec![
            Checkpoint { after_step: 0, direct_frame_hash: hash_after_0, direct_frame: None },
            Checkpoint { after_step: 1, direct_frame_hash: hash_after_1, direct_frame: None },
        ],
    };

    let result = run_scenario(&scenario);
    assert!(result.pass);
    assert_eq!(result.checkpoints.len(), 2);
}

#[test]
fn no_checkpoints_means_trivially_passing() {
    let scenario = Scenario {
        cols: 80,
        rows: 24,
        steps: vec![Step::Output(b"hello".to_vec())],
        checkpoints: vec![],
    };

    let result = run_scenario(&scenario);
    assert!(result.pass);
    assert!(result.checkpoints.is_empty());
}
