use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slideshow_server::{ControlAction, DisplayController, DisplayStatus, Error};

const INTERVAL: Duration = Duration::from_secs(10);

fn paused_controller(total: usize) -> (DisplayController, Instant) {
    let start = Instant::now();
    let controller = DisplayController::starting_at(start);
    controller.control_at(ControlAction::Pause, total, INTERVAL, start);
    (controller, start)
}

#[test]
fn next_then_prev_returns_to_the_same_slide() {
    let (controller, start) = paused_controller(4);
    for _ in 0..3 {
        controller.control_at(ControlAction::Next, 4, INTERVAL, start);
    }
    assert_eq!(controller.poll_at(4, INTERVAL, start).index, 3);
    assert_eq!(
        controller.control_at(ControlAction::Next, 4, INTERVAL, start).index,
        0
    );
    assert_eq!(
        controller.control_at(ControlAction::Prev, 4, INTERVAL, start).index,
        3
    );
}

#[test]
fn prev_from_first_slide_wraps_to_last() {
    let (controller, start) = paused_controller(5);
    let status = controller.control_at(ControlAction::Prev, 5, INTERVAL, start);
    assert_eq!(
        status,
        DisplayStatus {
            index: 4,
            paused: true,
            total: 5
        }
    );
}

#[test]
fn paused_show_does_not_advance() {
    let (controller, start) = paused_controller(3);
    let later = start + Duration::from_secs(3600);
    let status = controller.poll_at(3, INTERVAL, later);
    assert_eq!(status.index, 0);
    assert!(status.paused);
}

#[test]
fn auto_advance_counts_whole_intervals() {
    let start = Instant::now();
    let controller = DisplayController::starting_at(start);
    let status = controller.poll_at(3, INTERVAL, start + Duration::from_secs(25));
    assert_eq!(
        status,
        DisplayStatus {
            index: 2,
            paused: false,
            total: 3
        }
    );
    // Two more intervals wrap around the three-slide show.
    assert_eq!(
        controller
            .poll_at(3, INTERVAL, start + Duration::from_secs(45))
            .index,
        1
    );
}

#[test]
fn manual_next_restarts_the_interval() {
    let start = Instant::now();
    let controller = DisplayController::starting_at(start);
    let at = start + Duration::from_secs(8);
    assert_eq!(controller.control_at(ControlAction::Next, 5, INTERVAL, at).index, 1);
    assert_eq!(
        controller
            .poll_at(5, INTERVAL, at + Duration::from_secs(9))
            .index,
        1
    );
    assert_eq!(
        controller
            .poll_at(5, INTERVAL, at + Duration::from_secs(10))
            .index,
        2
    );
}

#[test]
fn concurrent_nexts_are_never_lost() {
    const TOTAL: usize = 7;
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let (controller, start) = paused_controller(TOTAL);
    let controller = Arc::new(controller);
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    controller.control_at(ControlAction::Next, TOTAL, INTERVAL, start);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let status = controller.poll_at(TOTAL, INTERVAL, start);
    assert_eq!(status.index, (THREADS * PER_THREAD) % TOTAL);
}

#[test]
fn unknown_action_leaves_state_untouched() {
    let (controller, start) = paused_controller(3);
    controller.control_at(ControlAction::Next, 3, INTERVAL, start);
    let before = controller.poll_at(3, INTERVAL, start);

    let err = "reboot".parse::<ControlAction>().unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(controller.poll_at(3, INTERVAL, start), before);
}
