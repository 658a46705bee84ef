use magnet_core::config::{RuntimeConfig, default_magnet_table, read_magnet_table, write_magnet_table};
use magnet_core::state::{
    ConfigError, ControlCommand, ControlCoordinator, CoreError, CurrentSample, MagnetId,
    OrientationSample, Orientation, Saturation, StepOutcome,
};

fn coordinator() -> ControlCoordinator {
    ControlCoordinator::with_defaults().unwrap()
}

#[test]
fn non_positive_window_is_empty() {
    let c = coordinator();
    for v in [0.1, 0.2, 0.3] {
        c.record_current_sample(CurrentSample::new(MagnetId(1), v)).unwrap();
    }
    c.set_orientation(OrientationSample::new(Orientation::IDENTITY));

    assert!(c.current_values(MagnetId(1), Some(0)).unwrap().is_empty());
    assert!(c.orientation_history(Some(0)).is_empty());
    assert!(c.angular_velocity_history(Some(0)).is_empty());
    assert!(c.all_current_values(Some(0)).iter().all(|(_, v)| v.is_empty()));

    let tail = c.current_values(MagnetId(1), Some(2)).unwrap();
    assert_eq!(tail.iter().map(|s| s.current).collect::<Vec<_>>(), vec![0.2, 0.3]);
    assert_eq!(c.current_values(MagnetId(1), Some(99)).unwrap().len(), 3);
}

#[test]
fn command_flushes_exactly_the_pending_samples() {
    let c = coordinator();
    let id = MagnetId(9);
    c.record_current_sample(CurrentSample::new(id, 0.5)).unwrap();
    c.record_current_sample(CurrentSample::new(id, 0.7)).unwrap();
    c.set_control(ControlCommand::new(id, 1.0)).unwrap();

    let archived = c.flushed_current_values(id, None).unwrap();
    assert_eq!(archived.iter().map(|s| s.current).collect::<Vec<_>>(), vec![0.5, 0.7]);
    assert!(c.current_values(id, None).unwrap().is_empty());

    let snap = c.snapshot(id).unwrap();
    assert_eq!(snap.integral, 0.0);
    assert_eq!(snap.active_samples, 0);
    assert_eq!(snap.archived_total, 2);
}

#[test]
fn reference_pi_step_saturates_high() {
    let c = coordinator();
    let id = MagnetId(1);
    c.set_control(ControlCommand::new(id, 255.0)).unwrap();
    let StepOutcome::Drive(up) = c.record_and_update(CurrentSample::new(id, 0.0)).unwrap() else {
        panic!("magnet should be active");
    };
    assert!((up.integral - 1147.5).abs() < 1e-2, "integral {}", up.integral);
    assert!((up.raw_drive - 13_897.5).abs() < 1e-1, "raw {}", up.raw_drive);
    assert_eq!(up.duty, 255);
    assert_eq!(up.saturation, Saturation::High);

    // Sustained saturation holds the integral.
    let StepOutcome::Drive(next) = c.record_and_update(CurrentSample::new(id, 0.0)).unwrap() else {
        panic!("magnet should be active");
    };
    assert_eq!(next.integral, up.integral);
    assert_eq!(next.duty, 255);
}

#[test]
fn zero_control_clears_latest_controls() {
    let c = coordinator();
    c.set_controls(&[
        ControlCommand::new(MagnetId(2), 1.0),
        ControlCommand::new(MagnetId(11), 2.0),
    ])
    .unwrap();
    let latest: Vec<MagnetId> = c.latest_controls().iter().map(|cmd| cmd.magnet).collect();
    assert_eq!(latest, vec![MagnetId(2), MagnetId(11)]);

    c.zero_control();
    assert!(c.latest_controls().is_empty());
    for id in c.magnet_ids() {
        assert!(c.latest_control(id).unwrap().is_zero());
    }
}

#[test]
fn queries_before_data_are_empty_history() {
    let c = coordinator();
    assert!(matches!(c.latest_control(MagnetId(5)), Err(CoreError::EmptyHistory(_))));
    assert!(matches!(c.latest_current_value(MagnetId(5)), Err(CoreError::EmptyHistory(_))));
    assert!(matches!(c.orientation(), Err(CoreError::EmptyHistory(_))));
    assert!(matches!(c.angular_velocity(), Err(CoreError::EmptyHistory(_))));
}

#[test]
fn bad_tables_build_nothing() {
    let cfg = RuntimeConfig::default();

    let mut dup = default_magnet_table();
    dup[4].id = 3;
    assert!(matches!(
        ControlCoordinator::from_config(&dup, &cfg),
        Err(CoreError::Configuration(ConfigError::DuplicateId(3)))
    ));

    for bad in [0, 21, -1] {
        let mut rows = default_magnet_table();
        rows[0].id = bad;
        assert!(matches!(
            ControlCoordinator::from_config(&rows, &cfg),
            Err(CoreError::Configuration(ConfigError::IdOutOfRange(_)))
        ));
    }

    let short = &default_magnet_table()[..19];
    assert!(matches!(
        ControlCoordinator::from_config(short, &cfg),
        Err(CoreError::Configuration(ConfigError::WrongCount { expected: 20, found: 19 }))
    ));
}

#[test]
fn inverted_duty_range_builds_nothing() {
    let cfg = RuntimeConfig { duty_min: 200, duty_max: 100, ..RuntimeConfig::default() };
    assert!(matches!(
        ControlCoordinator::from_config(&default_magnet_table(), &cfg),
        Err(CoreError::Configuration(ConfigError::InvalidDutyRange { min: 200, max: 100 }))
    ));
}

#[test]
fn slow_period_must_be_a_multiple_of_the_fast_one() {
    let cfg = RuntimeConfig::default();
    let mut rows = default_magnet_table();
    rows[1].dt_us = 450;
    assert!(matches!(
        ControlCoordinator::from_config(&rows, &cfg),
        Err(CoreError::Configuration(ConfigError::UnalignedPeriod { id: 2, .. }))
    ));

    rows[1].dt_us = 900;
    let c = ControlCoordinator::from_config(&rows, &cfg).unwrap();
    assert_eq!(c.registry().stride(c.entry(MagnetId(2)).unwrap()), 3);
}

#[test]
fn csv_table_builds_a_coordinator() {
    let mut rows = default_magnet_table();
    rows[7].kp = 80.0;
    let mut buf = Vec::new();
    write_magnet_table(&mut buf, &rows).unwrap();

    let parsed = read_magnet_table(buf.as_slice()).unwrap();
    let c = ControlCoordinator::from_config(&parsed, &RuntimeConfig::default()).unwrap();
    assert_eq!(c.entry(MagnetId(8)).unwrap().gains.kp, 80.0);
    assert_eq!(c.registry().len(), 20);
}

#[test]
fn killed_coordinator_only_accepts_zero() {
    let c = coordinator();
    c.set_control(ControlCommand::new(MagnetId(6), 3.0)).unwrap();
    c.kill();
    c.kill();
    assert!(c.is_killed());

    c.set_control(ControlCommand::new(MagnetId(6), 4.0)).unwrap();
    assert!(c.latest_controls().is_empty());
    assert_eq!(
        c.record_and_update(CurrentSample::new(MagnetId(6), 0.0)).unwrap(),
        StepOutcome::Idle
    );
}
