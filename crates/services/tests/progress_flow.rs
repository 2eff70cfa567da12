use std::sync::Arc;

use chrono::Duration;
use progress_core::keys;
use progress_core::model::{
    AwardDraft, CourseId, LessonId, LessonProgressPatch, Percent, ProfileId,
};
use progress_core::time::fixed_now;
use services::{Clock, ProgressError, ProgressService};
use storage::repository::{InMemoryStore, KeyValueStore, Storage, StorageError};

fn profile(id: &str) -> ProfileId {
    ProfileId::new(id).unwrap()
}

fn lesson(id: &str) -> LessonId {
    LessonId::new(id).unwrap()
}

fn course(id: &str) -> CourseId {
    CourseId::new(id).unwrap()
}

#[tokio::test]
async fn lesson_progress_is_isolated_per_profile() {
    let store = InMemoryStore::new();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));

    let written = svc
        .set_lesson_progress(
            &profile("kid_42"),
            &lesson("lesson_7"),
            LessonProgressPatch::new()
                .video_completed(true)
                .interactive_completed(false)
                .lesson_completed(false)
                .current_progress(Percent::new(40).unwrap())
                .completed_tests(Vec::<String>::new()),
        )
        .await
        .expect("write lesson");

    let read = svc
        .get_lesson_progress(&profile("kid_42"), &lesson("lesson_7"))
        .await
        .unwrap()
        .expect("record present");
    assert_eq!(read, written);
    assert!(read.video_completed);
    assert!(!read.interactive_completed);
    assert!(!read.lesson_completed);
    assert_eq!(read.current_progress.value(), 40);
    assert!(read.completed_tests.is_empty());
    assert_eq!(read.owner_profile_id, profile("kid_42"));
    assert_eq!(read.last_updated, fixed_now());

    let raw = store
        .get("kid_kid_42_lesson_progress_lesson_7")
        .await
        .unwrap()
        .expect("stored under namespaced key");
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["lastUpdated"], "2023-11-14T22:13:20Z");

    assert_eq!(
        svc.get_lesson_progress(&profile("kid_99"), &lesson("lesson_7"))
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn later_writes_merge_and_restamp() {
    let storage = Storage::in_memory();
    let mut clock = Clock::fixed(fixed_now());
    let kid = profile("kid_1");
    let l1 = lesson("l1");

    ProgressService::new(clock, Arc::clone(&storage.kv))
        .set_lesson_progress(&kid, &l1, LessonProgressPatch::new().video_completed(true))
        .await
        .unwrap();

    clock.advance(Duration::minutes(3));
    let svc = ProgressService::new(clock, Arc::clone(&storage.kv));
    svc.complete_test(&kid, &l1, "quiz-a").await.unwrap();
    svc.complete_test(&kid, &l1, "quiz-a").await.unwrap();
    let record = svc
        .set_lesson_progress(
            &kid,
            &l1,
            LessonProgressPatch::new()
                .lesson_completed(true)
                .current_progress(Percent::FULL),
        )
        .await
        .unwrap();

    assert!(record.video_completed);
    assert!(record.lesson_completed);
    assert_eq!(record.completed_tests.len(), 1);
    assert!(record.has_completed_test("quiz-a"));
    assert_eq!(record.last_updated, fixed_now() + Duration::minutes(3));
}

#[tokio::test]
async fn unparsable_lesson_reads_as_absent() {
    let store = InMemoryStore::new();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));
    let kid = profile("kid_42");
    let l7 = lesson("lesson_7");

    store
        .set(&keys::lesson_progress_key(&kid, &l7), "{not valid json")
        .await
        .unwrap();

    assert_eq!(svc.get_lesson_progress(&kid, &l7).await.unwrap(), None);
}

#[tokio::test]
async fn quota_exceeded_write_is_reported() {
    let store = InMemoryStore::with_quota(64);
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));

    let err = svc
        .set_lesson_progress(
            &profile("kid_1"),
            &lesson("l1"),
            LessonProgressPatch::new().video_completed(true),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProgressError::Storage(StorageError::QuotaExceeded { limit: 64 })
    ));
    assert!(store.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn course_overall_progress_defaults_to_zero() {
    let store = InMemoryStore::new();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));
    let kid = profile("kid_1");
    let math = course("math");

    assert_eq!(
        svc.get_course_overall_progress(&kid, &math).await.unwrap(),
        Percent::ZERO
    );

    svc.set_course_overall_progress(&kid, &math, Percent::new(60).unwrap())
        .await
        .unwrap();
    assert_eq!(
        store
            .get("kid_kid_1_course_overall_progress_math")
            .await
            .unwrap()
            .as_deref(),
        Some("60")
    );
    assert_eq!(
        svc.get_course_overall_progress(&kid, &math)
            .await
            .unwrap()
            .value(),
        60
    );

    store
        .set("kid_kid_1_course_overall_progress_math", "sixty")
        .await
        .unwrap();
    assert_eq!(
        svc.get_course_overall_progress(&kid, &math).await.unwrap(),
        Percent::ZERO
    );
}

#[tokio::test]
async fn recompute_course_progress_counts_completed_lessons() {
    let storage = Storage::in_memory();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::clone(&storage.kv));
    let kid = profile("kid_1");
    let lessons = [lesson("l1"), lesson("l2"), lesson("l3"), lesson("l4")];

    for done in &lessons[..3] {
        svc.set_lesson_progress(&kid, done, LessonProgressPatch::new().lesson_completed(true))
            .await
            .unwrap();
    }
    // completed under another profile; must not count
    svc.set_lesson_progress(
        &profile("kid_2"),
        &lessons[3],
        LessonProgressPatch::new().lesson_completed(true),
    )
    .await
    .unwrap();

    let value = svc
        .recompute_course_progress(&kid, &course("math"), &lessons)
        .await
        .unwrap();
    assert_eq!(value.value(), 75);
    assert_eq!(
        svc.get_course_overall_progress(&kid, &course("math"))
            .await
            .unwrap(),
        value
    );

    let listed = svc.list_lesson_progress(&kid).await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["l1", "l2", "l3"]);
}

#[tokio::test]
async fn award_flag_flips_after_marking() {
    let storage = Storage::in_memory();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::clone(&storage.kv));
    let kid = profile("kid_1");
    let math = course("math");

    assert!(!svc.has_points_been_awarded(&kid, &math).await.unwrap());
    assert_eq!(svc.get_points_award_data(&kid, &math).await.unwrap(), None);

    let award = svc
        .mark_points_awarded(&kid, &math, AwardDraft::new(50, "Math Basics"))
        .await
        .unwrap();

    assert!(svc.has_points_been_awarded(&kid, &math).await.unwrap());
    assert!(!svc
        .has_points_been_awarded(&profile("kid_2"), &math)
        .await
        .unwrap());
    assert_eq!(
        svc.get_points_award_data(&kid, &math).await.unwrap(),
        Some(award)
    );
}

#[tokio::test]
async fn has_points_been_awarded_ignores_content() {
    let store = InMemoryStore::new();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));
    let kid = profile("kid_1");
    let math = course("math");

    store
        .set(&keys::course_points_awarded_key(&kid, &math), "garbage")
        .await
        .unwrap();

    assert!(svc.has_points_been_awarded(&kid, &math).await.unwrap());
    assert_eq!(svc.get_points_award_data(&kid, &math).await.unwrap(), None);
}

/// Two tabs both observe "not awarded" before either writes. The unconditional
/// write lets the second tab overwrite the first award.
#[tokio::test]
async fn check_then_mark_race_overwrites_first_award() {
    let store = InMemoryStore::new();
    let kid = profile("kid_1");
    let math = course("math");

    let tab_a = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));
    let tab_b = ProgressService::new(
        Clock::fixed(fixed_now() + Duration::seconds(1)),
        Arc::new(store.clone()),
    );

    assert!(!tab_a.has_points_been_awarded(&kid, &math).await.unwrap());
    assert!(!tab_b.has_points_been_awarded(&kid, &math).await.unwrap());

    tab_a
        .mark_points_awarded(&kid, &math, AwardDraft::new(50, "Math"))
        .await
        .unwrap();
    tab_b
        .mark_points_awarded(&kid, &math, AwardDraft::new(80, "Math"))
        .await
        .unwrap();

    let stored = tab_a
        .get_points_award_data(&kid, &math)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.points_awarded, 80);
    assert_eq!(stored.timestamp, fixed_now() + Duration::seconds(1));
}

#[tokio::test]
async fn guarded_caller_keeps_first_award() {
    let storage = Storage::in_memory();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::clone(&storage.kv));
    let kid = profile("kid_1");
    let math = course("math");

    for points in [50, 80] {
        if !svc.has_points_been_awarded(&kid, &math).await.unwrap() {
            svc.mark_points_awarded(&kid, &math, AwardDraft::new(points, "Math"))
                .await
                .unwrap();
        }
    }

    let stored = svc.get_points_award_data(&kid, &math).await.unwrap().unwrap();
    assert_eq!(stored.points_awarded, 50);
    assert_eq!(stored.timestamp, fixed_now());
}

#[tokio::test]
async fn award_points_once_closes_the_race() {
    let store = InMemoryStore::new();
    let kid = profile("kid_1");
    let math = course("math");
    let tab_a = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));
    let tab_b = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));

    let first = tab_a
        .award_points_once(&kid, &math, AwardDraft::new(50, "Math"))
        .await
        .unwrap();
    let second = tab_b
        .award_points_once(&kid, &math, AwardDraft::new(80, "Math"))
        .await
        .unwrap();

    assert_eq!(first.map(|a| a.points_awarded), Some(50));
    assert_eq!(second, None);
    assert_eq!(
        tab_b
            .get_points_award_data(&kid, &math)
            .await
            .unwrap()
            .map(|a| a.points_awarded),
        Some(50)
    );
}

#[tokio::test]
async fn clear_profile_data_leaves_other_profiles() {
    let store = InMemoryStore::new();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));
    let a = profile("a");
    let a_b = profile("a_b");

    for kid in [&a, &a_b] {
        svc.set_lesson_progress(kid, &lesson("l1"), LessonProgressPatch::new())
            .await
            .unwrap();
        svc.set_course_overall_progress(kid, &course("c1"), Percent::new(10).unwrap())
            .await
            .unwrap();
        svc.mark_points_awarded(kid, &course("c1"), AwardDraft::new(5, "C1"))
            .await
            .unwrap();
        svc.set_profile_data(kid, &serde_json::json!({ "name": kid.as_str() }))
            .await
            .unwrap();
    }
    store.set("unrelated_setting", "1").await.unwrap();

    let removed = svc.clear_profile_data(&a).await.unwrap();
    assert_eq!(removed, 4);

    let prefix = keys::namespace_prefix(&a);
    let remaining = store.keys().await.unwrap();
    assert!(remaining
        .iter()
        .filter(|key| key.starts_with(&prefix))
        .all(|key| key.starts_with(&keys::namespace_prefix(&a_b))));
    assert_eq!(remaining.len(), 5);
    assert!(svc
        .get_lesson_progress(&a_b, &lesson("l1"))
        .await
        .unwrap()
        .is_some());
    assert_eq!(
        svc.get_profile_data(&a_b).await.unwrap(),
        Some(serde_json::json!({ "name": "a_b" }))
    );
    assert_eq!(svc.get_profile_data(&a).await.unwrap(), None);
}

#[tokio::test]
async fn clearing_a_profile_spares_one_named_after_its_data_key() {
    let store = InMemoryStore::new();
    let svc = ProgressService::new(Clock::fixed(fixed_now()), Arc::new(store.clone()));
    let a = profile("a");
    let a_data = profile("a_data");

    svc.set_course_overall_progress(&a_data, &course("c1"), Percent::new(80).unwrap())
        .await
        .unwrap();
    svc.set_lesson_progress(&a_data, &lesson("l1"), LessonProgressPatch::new())
        .await
        .unwrap();
    svc.set_profile_data(&a, &serde_json::json!({ "name": "a" }))
        .await
        .unwrap();
    store.set("kid_a_streak_w1", "3").await.unwrap();

    assert_eq!(svc.clear_profile_data(&a).await.unwrap(), 2);

    assert_eq!(
        svc.get_course_overall_progress(&a_data, &course("c1"))
            .await
            .unwrap()
            .value(),
        80
    );
    assert!(svc
        .get_lesson_progress(&a_data, &lesson("l1"))
        .await
        .unwrap()
        .is_some());
    assert_eq!(store.keys().await.unwrap().len(), 2);
}
