//! End-to-end job lifecycle through the manager, with fake portal and storage.

mod common;

use std::sync::Arc;
use std::time::Duration;

use portal_scraper::category::{Category, Record};
use portal_scraper::job::{JobStatus, UploadState};
use portal_scraper::portal::PortalError;
use portal_scraper::ErrorKind;

use common::{
    collect_events, job_params, valid_params, Behavior, FailingBackend, FakeExtractor,
    HarnessBuilder, MemoryBackend, TestHarness,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_all_categories_complete_and_upload() {
    let backend = Arc::new(MemoryBackend::default());
    let harness = HarnessBuilder::new().backend(backend.clone()).build();

    let job_id = harness.manager.submit(valid_params("u1")).unwrap();
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 1.0);
    assert_eq!(job.message, "All scraping tasks completed successfully");
    assert!(job.error.is_none());
    assert_eq!(job.category_results.len(), 3);
    for category in Category::ALL {
        let result = &job.category_results[&category];
        assert!(result.success, "{} should succeed", category);
        assert_eq!(result.record_count, 3);
        assert_eq!(result.upload, UploadState::Uploaded { attempts: 1 });
    }

    assert_eq!(
        backend.keys(),
        vec![
            "u1/2022-23/attendance.json",
            "u1/2022-23/mid_marks.json",
            "u1/2022-23/personal_details.json",
        ]
    );
    let stored: Vec<Record> =
        serde_json::from_slice(&backend.object("u1/2022-23/attendance.json").unwrap()).unwrap();
    assert_eq!(stored.len(), 3);

    // Uploaded artifacts are not retained by default.
    assert!(!harness.artifact_dir.join(&job_id).exists());
}

#[tokio::test]
async fn test_wrong_password_fails_without_categories() {
    let harness = TestHarness::new();

    let job_id = harness
        .manager
        .submit(job_params("u1", "wrong"))
        .unwrap();
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.category_results.is_empty());
    let error = job.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Authentication);
    assert!(job.progress < 1.0);
    assert_eq!(harness.portal.logins(), vec!["u1"]);
}

#[tokio::test]
async fn test_single_category_progress_steps() {
    let harness = TestHarness::new();
    let mut events = harness.manager.subscribe();

    let mut params = valid_params("u1");
    params.scrape_mid_marks = false;
    params.scrape_personal_details = false;
    params.upload_to_supabase = false;
    let job_id = harness.manager.submit(params).unwrap();

    let events = collect_events(&mut events, &job_id).await;
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.category_results.len(), 1);
    assert!(job.category_results.contains_key(&Category::Attendance));

    let progress: Vec<f64> = events.iter().map(|e| e.progress).collect();
    assert!(progress.contains(&0.5), "progress never reported login: {:?}", progress);
    assert_eq!(progress.last(), Some(&1.0));
    assert!(
        events
            .iter()
            .filter(|e| e.status == JobStatus::Running)
            .all(|e| e.progress < 1.0),
        "progress reached 1.0 before the job finished"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_username_runs_serially() {
    let extractors = vec![FakeExtractor::new(
        Category::Attendance,
        Behavior::Slow(Duration::from_millis(150), 1),
    )];
    let harness = HarnessBuilder::new()
        .workers(4)
        .extractors(extractors)
        .build();

    let mut params = valid_params("u1");
    params.scrape_mid_marks = false;
    params.scrape_personal_details = false;
    let first = harness.manager.submit(params).unwrap();

    let mut params = valid_params(" U1 ");
    params.scrape_mid_marks = false;
    params.scrape_personal_details = false;
    let second = harness.manager.submit(params).unwrap();

    let first = harness.wait_for_terminal(&first).await;
    let second = harness.wait_for_terminal(&second).await;

    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(second.status, JobStatus::Completed);
    assert!(
        second.started_at.unwrap() >= first.finished_at.unwrap(),
        "second job started at {:?} before the first finished at {:?}",
        second.started_at,
        first.finished_at
    );

    let sessions = harness.portal.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(!sessions[0].overlaps(&sessions[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_usernames_run_concurrently() {
    let extractors = vec![FakeExtractor::new(
        Category::Attendance,
        Behavior::Slow(Duration::from_millis(200), 1),
    )];
    let harness = HarnessBuilder::new()
        .workers(2)
        .extractors(extractors)
        .build();

    let ids: Vec<String> = ["u1", "u2"]
        .into_iter()
        .map(|user| {
            let mut params = valid_params(user);
            params.scrape_mid_marks = false;
            params.scrape_personal_details = false;
            harness.manager.submit(params).unwrap()
        })
        .collect();
    for id in &ids {
        harness.wait_for_terminal(id).await;
    }

    let sessions = harness.portal.sessions();
    assert_eq!(sessions.len(), 2);
    assert!(sessions[0].overlaps(&sessions[1]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_count_caps_open_sessions() {
    let extractors = vec![FakeExtractor::new(
        Category::Attendance,
        Behavior::Slow(Duration::from_millis(100), 1),
    )];
    let harness = HarnessBuilder::new()
        .workers(2)
        .extractors(extractors)
        .build();

    let ids: Vec<String> = ["u1", "u2", "u3", "u4", "u5"]
        .into_iter()
        .map(|user| {
            let mut params = valid_params(user);
            params.scrape_mid_marks = false;
            params.scrape_personal_details = false;
            params.upload_to_supabase = false;
            harness.manager.submit(params).unwrap()
        })
        .collect();
    for id in &ids {
        let job = harness.wait_for_terminal(id).await;
        assert_eq!(job.status, JobStatus::Completed);
    }

    let sessions = harness.portal.sessions();
    assert_eq!(sessions.len(), 5);
    let peak = sessions
        .iter()
        .map(|s| {
            sessions
                .iter()
                .filter(|other| other.opened <= s.opened && s.opened < other.closed)
                .count()
        })
        .max()
        .unwrap();
    assert!(peak <= 2, "{} sessions were open at once", peak);
    assert_eq!(peak, 2);
}

#[tokio::test]
async fn test_upload_failure_still_completes() {
    let backend = Arc::new(FailingBackend::default());
    let harness = HarnessBuilder::new()
        .backend(backend.clone())
        .upload_attempts(3)
        .build();

    let job_id = harness.manager.submit(valid_params("u1")).unwrap();
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 1.0);
    for category in Category::ALL {
        let result = &job.category_results[&category];
        assert!(result.success);
        match &result.upload {
            UploadState::Failed { attempts, error } => {
                assert_eq!(*attempts, 3);
                assert_eq!(error.kind, ErrorKind::Upload);
            }
            other => panic!("expected upload failure for {}, got {:?}", category, other),
        }
        // The local copy survives a failed upload.
        let artifact = result.artifact_path.as_ref().unwrap();
        assert!(std::path::Path::new(artifact).exists());
    }
    assert_eq!(backend.calls_for("u1/2022-23/attendance.json"), 3);
}

#[tokio::test]
async fn test_partial_failure_completes() {
    let extractors = vec![
        FakeExtractor::new(Category::Attendance, Behavior::Records(2)),
        FakeExtractor::new(
            Category::MidMarks,
            Behavior::Fail(PortalError::Parse("mid marks table not found".into())),
        ),
        FakeExtractor::new(Category::PersonalDetails, Behavior::Records(1)),
    ];
    let harness = HarnessBuilder::new().extractors(extractors).build();

    let mut params = valid_params("u1");
    params.upload_to_supabase = false;
    let job_id = harness.manager.submit(params).unwrap();
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.message, "2 of 3 scraping tasks completed successfully");

    let failed = &job.category_results[&Category::MidMarks];
    assert!(!failed.success);
    assert_eq!(failed.error.as_ref().unwrap().kind, ErrorKind::Parse);
    assert_eq!(failed.upload, UploadState::Skipped);

    let ok = &job.category_results[&Category::Attendance];
    assert!(ok.success);
    assert_eq!(ok.upload, UploadState::NotRequested);
    assert!(harness
        .artifact_dir
        .join(&job_id)
        .join("attendance.json")
        .exists());
}

#[tokio::test]
async fn test_all_categories_failing_fails_job() {
    let extractors = Category::ALL
        .into_iter()
        .map(|category| {
            FakeExtractor::new(
                category,
                Behavior::Fail(PortalError::Navigation("HTTP 500".into())),
            )
        })
        .collect();
    let harness = HarnessBuilder::new().extractors(extractors).build();

    let job_id = harness.manager.submit(valid_params("u1")).unwrap();
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 1.0);
    let error = job.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::ExtractionFailed);
    assert!(error.message.contains("attendance"));
    assert!(error.message.contains("personal_details"));
    assert_eq!(job.category_results.len(), 3);
}

#[tokio::test]
async fn test_category_timeout_is_recorded() {
    let extractors = vec![
        FakeExtractor::new(
            Category::Attendance,
            Behavior::Slow(Duration::from_secs(5), 1),
        ),
        FakeExtractor::new(Category::MidMarks, Behavior::Records(1)),
    ];
    let harness = HarnessBuilder::new()
        .extractors(extractors)
        .category_timeout(Duration::from_millis(50))
        .build();

    let mut params = valid_params("u1");
    params.scrape_personal_details = false;
    params.upload_to_supabase = false;
    let job_id = harness.manager.submit(params).unwrap();
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    let timed_out = &job.category_results[&Category::Attendance];
    assert_eq!(timed_out.error.as_ref().unwrap().kind, ErrorKind::Timeout);
    assert!(job.category_results[&Category::MidMarks].success);
}

#[tokio::test]
async fn test_upload_without_backend_reports_failure() {
    let harness = TestHarness::new();

    let job_id = harness.manager.submit(valid_params("u1")).unwrap();
    let job = harness.wait_for_terminal(&job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(matches!(
        job.category_results[&Category::Attendance].upload,
        UploadState::Failed { attempts: 0, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_status_and_progress_are_monotonic() {
    let extractors = Category::ALL
        .into_iter()
        .map(|category| FakeExtractor::new(category, Behavior::Slow(Duration::from_millis(20), 1)))
        .collect();
    let harness = HarnessBuilder::new().extractors(extractors).build();

    let job_id = harness.manager.submit(valid_params("u1")).unwrap();

    let first = harness.manager.status(&job_id).unwrap();
    assert!(matches!(first.status, JobStatus::Queued | JobStatus::Running));

    let mut observed = Vec::new();
    loop {
        let job = harness.manager.status(&job_id).unwrap();
        observed.push((job.status, job.progress));
        if job.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let rank = |status: JobStatus| match status {
        JobStatus::Queued => 0,
        JobStatus::Running => 1,
        JobStatus::Completed | JobStatus::Failed => 2,
    };
    for pair in observed.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        assert!(rank(next.0) >= rank(prev.0), "status went back: {:?}", observed);
        assert!(next.1 >= prev.1, "progress went back: {:?}", observed);
        assert!((0.0..=1.0).contains(&next.1));
    }
}

#[tokio::test]
async fn test_job_ids_are_unique() {
    let harness = TestHarness::new();

    let mut ids = std::collections::HashSet::new();
    for i in 0..20 {
        let mut params = job_params(&format!("user{}", i), "wrong");
        params.upload_to_supabase = false;
        let id = harness.manager.submit(params).unwrap();
        assert!(portal_scraper::job::is_valid_job_id(&id), "{}", id);
        assert!(ids.insert(id));
    }
    assert_eq!(harness.manager.list().len(), 20);
}
