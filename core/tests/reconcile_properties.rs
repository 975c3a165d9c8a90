//! Property tests for the reconciler.
//!
//! Every property runs on a fault-free configuration so the only input is
//! the job mix and the elapsed time.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap

use chrono::Duration;
use printsim_core::config::SimulationConfig;
use printsim_core::job::{JobRequest, JobStatus};
use printsim_core::printer::{PrinterInstance, PrinterStatus};
use printsim_core::reconciler::reconcile;
use printsim_testing::properties::{elapsed_seconds, job_request};
use printsim_testing::{NeverRandom, fixtures, test_time};
use proptest::prelude::*;

fn loaded_printer(requests: &[JobRequest]) -> PrinterInstance {
    let mut printer = fixtures::printer("laser-color");
    for request in requests {
        fixtures::enqueue(&mut printer, request, test_time());
    }
    printer
}

fn config() -> SimulationConfig {
    SimulationConfig::without_faults()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn reconciling_twice_at_the_same_instant_is_a_no_op(
        requests in prop::collection::vec(job_request(20), 0..5),
        elapsed in elapsed_seconds(),
    ) {
        let printer = loaded_printer(&requests);
        let now = test_time() + Duration::seconds(elapsed);

        let once = reconcile(&printer, now, &NeverRandom, &config()).unwrap();
        let twice = reconcile(&once.snapshot, now, &NeverRandom, &config()).unwrap();

        prop_assert_eq!(&twice.snapshot, &once.snapshot);
        prop_assert!(twice.events.is_empty());
    }

    #[test]
    fn split_reconciliation_matches_a_single_pass(
        requests in prop::collection::vec(job_request(20), 1..5),
        first in elapsed_seconds(),
        second in elapsed_seconds(),
    ) {
        let printer = loaded_printer(&requests);
        let midpoint = test_time() + Duration::seconds(first);
        let end = midpoint + Duration::seconds(second);

        let direct = reconcile(&printer, end, &NeverRandom, &config()).unwrap();
        let halfway = reconcile(&printer, midpoint, &NeverRandom, &config()).unwrap();
        let stepped = reconcile(&halfway.snapshot, end, &NeverRandom, &config()).unwrap();

        prop_assert_eq!(&stepped.snapshot, &direct.snapshot);
    }

    #[test]
    fn progress_and_consumption_only_move_forward(
        requests in prop::collection::vec(job_request(20), 1..5),
        steps in prop::collection::vec(0i64..30, 1..10),
    ) {
        let mut printer = loaded_printer(&requests);
        let mut now = test_time();

        for step in steps {
            now += Duration::seconds(step);
            let next = reconcile(&printer, now, &NeverRandom, &config()).unwrap().snapshot;

            prop_assert!(next.stats.pages_printed >= printer.stats.pages_printed);
            prop_assert!(next.paper.count <= printer.paper.count);
            prop_assert!(next.completed_jobs.len() >= printer.completed_jobs.len());
            for (color, level) in next.ink.iter() {
                prop_assert!(level <= printer.ink.level(color).unwrap_or(100.0));
            }
            if let (Some(before), Some(after)) = (&printer.current_job, &next.current_job) {
                if before.id == after.id {
                    prop_assert!(after.progress >= before.progress);
                }
            }
            printer = next;
        }
    }

    #[test]
    fn resources_stay_within_bounds(
        requests in prop::collection::vec(job_request(60), 1..5),
        elapsed in elapsed_seconds(),
        paper in 0u32..40,
        ink in 0.0f64..10.0,
    ) {
        let mut printer = loaded_printer(&requests);
        printer.paper.count = paper;
        let colors: Vec<_> = printer.ink.colors().collect();
        for color in colors {
            printer.ink.set(color, ink);
        }

        let result = reconcile(&printer, test_time() + Duration::seconds(elapsed), &NeverRandom, &config()).unwrap();
        let snapshot = result.snapshot;

        prop_assert!(snapshot.paper.count <= snapshot.paper.capacity);
        prop_assert!(snapshot.paper.count <= paper);
        for (_, level) in snapshot.ink.iter() {
            prop_assert!((0.0..=100.0).contains(&level));
        }
        for job in snapshot.current_job.iter().chain(snapshot.completed_jobs.iter()) {
            prop_assert!((0.0..=100.0).contains(&job.progress));
            prop_assert!(job.pages_printed <= job.pages);
        }
        prop_assert!(snapshot.pending_jobs() + snapshot.completed_jobs.len() == requests.len());
    }

    #[test]
    fn a_job_completes_exactly_at_its_estimate(request in job_request(40)) {
        let mut printer = fixtures::printer("laser-color");
        let job_id = fixtures::enqueue(&mut printer, &request, test_time());
        let estimate = Duration::seconds(i64::from(printer.queue[0].estimated_seconds));

        let before = reconcile(
            &printer,
            test_time() + estimate - Duration::milliseconds(1),
            &NeverRandom,
            &config(),
        ).unwrap();
        prop_assert_eq!(before.snapshot.status, PrinterStatus::Printing);
        prop_assert!(before.snapshot.current_job.as_ref().is_some_and(|job| job.id == job_id));

        let at = reconcile(&printer, test_time() + estimate, &NeverRandom, &config()).unwrap();
        let job = at.snapshot.find_job(&job_id).unwrap();
        prop_assert_eq!(job.status, JobStatus::Completed);
        prop_assert_eq!(job.completed_at, Some(test_time() + estimate));
        prop_assert_eq!(job.pages_printed, request.pages);
        prop_assert_eq!(at.snapshot.status, PrinterStatus::Ready);
    }
}
