//! Post-commit side effects: notifications and background jobs.

use std::sync::Arc;

use onestop_core::{
    ApplyConfig, CONFLATE_STOPS_JOB, ChangeOp, ChangesetEvent, ChangesetUser, EntityKind,
    FETCH_FEEDS_JOB, NewChangeset,
    test_support::{
        RecordingJobQueue, RecordingNotifier, Unavailable, destroy_stop, feed, operator, stop,
    },
};
use onestop_store::{ChangesetApplyEngine, Registry, RegistryStore};
use rstest::rstest;

struct Harness {
    registry: Registry,
    notifier: Arc<RecordingNotifier>,
    jobs: Arc<RecordingJobQueue>,
}

fn harness(config: ApplyConfig) -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let jobs = Arc::new(RecordingJobQueue::default());
    let engine = ChangesetApplyEngine::new(config)
        .with_notifier(notifier.clone())
        .with_job_queue(jobs.clone());
    let store = RegistryStore::open_in_memory().expect("open registry");
    Harness {
        registry: Registry::with_engine(store, engine),
        notifier,
        jobs,
    }
}

fn all_side_effects() -> ApplyConfig {
    ApplyConfig {
        send_user_emails: true,
        auto_conflate_with_external_map: true,
        auto_fetch_related_feeds: true,
        ..ApplyConfig::default()
    }
}

fn apply(registry: &mut Registry, user: Option<ChangesetUser>, changes: Vec<ChangeOp>) -> i64 {
    let new = user.map_or_else(NewChangeset::default, |user| {
        NewChangeset::default().with_user(user)
    });
    let changeset = registry.create_changeset(&new).expect("create changeset");
    registry
        .add_changes(changeset.id, changes)
        .expect("attach changes");
    registry.apply(changeset.id).expect("apply changeset");
    changeset.id
}

#[rstest]
fn eligible_author_hears_about_creation_and_apply() {
    let mut h = harness(all_side_effects());
    let id = apply(
        &mut h.registry,
        Some(ChangesetUser::new("editor@example.com")),
        vec![operator("o-1")],
    );
    let events: Vec<_> = h
        .notifier
        .sent()
        .into_iter()
        .map(|sent| (sent.event, sent.changeset_id, sent.email))
        .collect();
    let email = Some("editor@example.com".to_owned());
    assert_eq!(
        events,
        vec![
            (ChangesetEvent::Created, id, email.clone()),
            (ChangesetEvent::Applied, id, email),
        ]
    );
}

#[rstest]
#[case::admin(Some(ChangesetUser::admin("admin@example.com")), true)]
#[case::no_email(Some(ChangesetUser { email: None, admin: false }), true)]
#[case::anonymous(None, true)]
#[case::emails_disabled(Some(ChangesetUser::new("editor@example.com")), false)]
fn ineligible_changesets_are_not_notified(
    #[case] user: Option<ChangesetUser>,
    #[case] send_user_emails: bool,
) {
    let mut h = harness(ApplyConfig {
        send_user_emails,
        ..ApplyConfig::default()
    });
    apply(&mut h.registry, user, vec![operator("o-1")]);
    assert!(h.notifier.sent().is_empty());
}

#[rstest]
fn jobs_receive_live_touched_ids() {
    let mut h = harness(all_side_effects());
    apply(
        &mut h.registry,
        None,
        vec![stop("s-1", 0.0, 0.0), stop("s-2", 1.0, 1.0)],
    );
    apply(
        &mut h.registry,
        None,
        vec![stop("s-3", 2.0, 2.0), destroy_stop("s-1"), feed("f-1")],
    );

    let entities = h.registry.store().entities();
    let id_of = |kind, key| {
        entities
            .find_current(kind, key)
            .expect("query entity")
            .expect("entity exists")
            .id
    };
    let s2 = id_of(EntityKind::Stop, "s-2");
    let s3 = id_of(EntityKind::Stop, "s-3");
    let f1 = id_of(EntityKind::Feed, "f-1");
    let jobs = h.jobs.jobs();
    let conflations: Vec<_> = jobs
        .iter()
        .filter(|(job, _)| job == CONFLATE_STOPS_JOB)
        .collect();
    assert_eq!(conflations.len(), 2);
    assert_eq!(conflations[1].1, vec![s3]);
    assert!(conflations[0].1.contains(&s2));

    let fetches: Vec<_> = jobs
        .iter()
        .filter(|(job, _)| job == FETCH_FEEDS_JOB)
        .collect();
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].1, vec![f1]);
}

#[rstest]
fn jobs_stay_off_by_default() {
    let mut h = harness(ApplyConfig::default());
    apply(&mut h.registry, None, vec![stop("s-1", 0.0, 0.0), feed("f-1")]);
    assert!(h.jobs.jobs().is_empty());
}

#[rstest]
fn empty_id_lists_submit_nothing() {
    let mut h = harness(all_side_effects());
    apply(&mut h.registry, None, vec![operator("o-1")]);
    assert!(h.jobs.jobs().is_empty());
}

#[rstest]
fn collaborator_failures_do_not_undo_the_apply() {
    let engine = ChangesetApplyEngine::new(all_side_effects())
        .with_notifier(Arc::new(Unavailable))
        .with_job_queue(Arc::new(Unavailable));
    let mut registry =
        Registry::with_engine(RegistryStore::open_in_memory().expect("open registry"), engine);
    let id = apply(
        &mut registry,
        Some(ChangesetUser::new("editor@example.com")),
        vec![stop("s-1", 0.0, 0.0)],
    );
    let changeset = registry
        .changeset(id)
        .expect("load changeset")
        .expect("changeset exists");
    assert!(changeset.applied);
    assert!(
        registry
            .store()
            .entities()
            .exists(EntityKind::Stop, "s-1")
            .expect("query stop")
    );
}

#[rstest]
fn trial_apply_dispatches_nothing() {
    let mut h = harness(all_side_effects());
    let changeset = h
        .registry
        .create_changeset(&NewChangeset::default())
        .expect("create changeset");
    h.registry
        .add_changes(changeset.id, vec![stop("s-1", 0.0, 0.0)])
        .expect("attach changes");
    let trial = h.registry.trial_apply(changeset.id);
    assert!(trial.would_succeed);
    assert!(h.jobs.jobs().is_empty());
    assert!(h.notifier.sent().is_empty());
}
