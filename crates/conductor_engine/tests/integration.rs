//! End-to-end tests for sweeps, continuations, recovery and propagation.

use conductor_core::{BackendError, EntityKind, StateStore, SyncEntity, SyncState, Transition};
use conductor_engine::{
    sync_job, EngineConfig, Job, LocalQueue, Orchestrator, ReadyRetryConfig, Task, TaskOutcome,
    Executor, ThrottleConfig,
};
use conductor_testkit::prelude::*;
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn sweep_settings(h: &Harness) {
    h.orchestrator
        .sync_all(EntityKind::ServiceSettings, &[], &h.queue)
        .unwrap();
}

fn recover_settings(h: &Harness) {
    h.orchestrator
        .recover_erred(EntityKind::ServiceSettings, &[], &h.queue)
        .unwrap();
}

#[test]
fn timeout_then_recovery() {
    let h = Harness::new();
    let e1 = h.settings("E1", SyncState::InSync);
    h.backend.push(Operation::Sync, Err(BackendError::Timeout));

    sweep_settings(&h);
    assert_eq!(h.state(&e1), SyncState::SyncingScheduled);
    let stats = h.run();
    assert_eq!(stats.failed, 1);

    let stored = h.stored(&e1);
    assert_eq!(stored.state, SyncState::Erred);
    assert_eq!(stored.error_message, "timeout");

    // No automatic retry until the next recovery sweep.
    assert!(h.queue.is_idle());
    h.run_for(Duration::from_secs(24 * 3600));
    assert_eq!(h.backend.count(Operation::Sync), 1);

    recover_settings(&h);
    assert_eq!(h.state(&e1), SyncState::SyncingScheduled);
    h.run();

    let stored = h.stored(&e1);
    assert_eq!(stored.state, SyncState::InSync);
    assert_eq!(stored.error_message, "");
    assert_eq!(h.backend.count(Operation::Ping), 1);
    assert_eq!(h.backend.count(Operation::Sync), 2);
}

#[test]
fn recovery_with_dead_backend_stays_erred() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::Erred);
    h.backend.set_alive(false);

    recover_settings(&h);
    h.run();

    let stored = h.stored(&settings);
    assert_eq!(stored.state, SyncState::Erred);
    assert_eq!(stored.error_message, "Failed to ping service settings cloud");
    assert_eq!(h.backend.count(Operation::Sync), 0);
}

#[test]
fn link_recovery_with_dead_backend_names_the_link() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::Erred);
    h.backend.set_alive(false);

    h.orchestrator
        .recover_erred(EntityKind::ServiceProjectLink, &[], &h.queue)
        .unwrap();
    h.run();

    let stored = h.stored(&link);
    assert_eq!(stored.state, SyncState::Erred);
    assert_eq!(stored.error_message, "Failed to ping service project link alpha");
    assert_eq!(h.state(&settings), SyncState::InSync);
}

#[test]
fn recovery_with_unimplemented_ping_stays_erred() {
    let h = Harness::with_backend(EngineConfig::default(), ScriptedBackend::not_implemented());
    let settings = h.settings("monitoring", SyncState::Erred);

    recover_settings(&h);
    h.run();

    assert_eq!(h.state(&settings), SyncState::Erred);
    assert_eq!(
        h.stored(&settings).error_message,
        "Failed to ping service settings monitoring"
    );
}

#[test]
fn recovery_sync_failure_records_new_error() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::Erred);
    h.store
        .set_error_message(&settings.reference(), "timeout")
        .unwrap();
    h.backend
        .push(Operation::Sync, Err(BackendError::request("invalid credentials")));

    recover_settings(&h);
    h.run();

    let stored = h.stored(&settings);
    assert_eq!(stored.state, SyncState::Erred);
    assert_eq!(stored.error_message, "invalid credentials");
}

#[test]
fn recovery_sweep_ignores_healthy_entities() {
    let h = Harness::new();
    let healthy = h.settings("healthy", SyncState::InSync);
    let report = h
        .orchestrator
        .recover_erred(EntityKind::ServiceSettings, &[healthy.token()], &h.queue)
        .unwrap();
    assert_eq!(report.scheduled, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.state(&healthy), SyncState::InSync);
}

#[test]
fn deferred_push_is_delivered_once_in_sync() {
    let config =
        EngineConfig::new().with_ready_retry(ReadyRetryConfig::new(120, Duration::from_secs(30)));
    let h = Harness::with_config(config);
    let settings = h.settings("cloud", SyncState::InSync);
    let l1 = h.link("L1", &settings, SyncState::SyncingScheduled);
    let k1 = h.member_key(&l1, "K1");

    h.submit(h.orchestrator.push_ssh_key_job(k1.id, l1.token()));
    let stats = h.run();
    assert_eq!(stats.retried, 1);
    assert_eq!(h.queue.delayed(), 1);
    assert_eq!(h.backend.count(Operation::AddSshKey), 0);

    let guard = h.orchestrator.guard();
    guard.apply(&l1.reference(), Transition::BeginSyncing).unwrap();
    guard.apply(&l1.reference(), Transition::SetInSync).unwrap();

    h.run_for(Duration::from_secs(30));
    let calls = h.backend.calls_of(Operation::AddSshKey);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].subject.as_deref(), Some("K1"));
    assert_eq!(calls[0].link.as_deref(), Some(l1.token().as_str()));
    assert!(h.queue.is_idle());
}

#[test]
fn push_never_acts_on_erred_link() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::Syncing);
    let key = h.member_key(&link, "laptop");

    h.submit(h.orchestrator.push_ssh_key_job(key.id, link.token()));
    h.run();
    h.orchestrator
        .guard()
        .apply(&link.reference(), Transition::SetErred)
        .unwrap();

    let stats = h.run_for(Duration::from_secs(3600));
    assert_eq!(stats.retried, 0);
    assert_eq!(stats.completed, 1);
    assert_eq!(h.backend.count(Operation::AddSshKey), 0);
    assert!(h.queue.is_idle());
}

#[test]
fn vanished_entity_or_payload_completes_without_retry() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::Syncing);
    let key = h.member_key(&link, "laptop");
    let ghost_link = SyncEntity::link("ghost", &settings, link.project.unwrap());

    h.submit(h.orchestrator.push_ssh_key_job(key.id, ghost_link.token()));
    h.submit(h.orchestrator.push_ssh_key_job(key.id, "service_project_link:not-a-uuid"));
    h.credentials.remove_ssh_key(&key.id);
    h.submit(h.orchestrator.push_ssh_key_job(key.id, link.token()));
    let user = h.user("bob");
    h.credentials.remove_user(&user.id);
    h.submit(h.orchestrator.add_user_job(user.id, link.token()));

    let stats = h.run();
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.retried, 0);
    assert!(h.queue.is_idle());
    assert!(h.backend.calls().is_empty());
}

#[test]
fn add_user_retries_until_ready() {
    let config =
        EngineConfig::new().with_ready_retry(ReadyRetryConfig::new(2, Duration::from_secs(5)));
    let h = Harness::with_config(config);
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::Creating);
    let user = h.user("alice");

    h.submit(h.orchestrator.add_user_job(user.id, link.token()));
    let stats = h.run_for(Duration::from_secs(60));
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.gave_up, 1);
    assert_eq!(h.backend.count(Operation::AddUser), 0);
}

#[test]
fn removals_are_not_gated_on_link_state() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::Erred);
    let key = h.member_key(&link, "laptop");
    let user = h.user("alice");
    h.credentials.remove_ssh_key(&key.id);
    h.credentials.remove_user(&user.id);
    h.backend.push(
        Operation::RemoveUser,
        Err(BackendError::request("user does not exist")),
    );

    h.submit(h.orchestrator.remove_ssh_key_job(key, link.token()));
    h.submit(h.orchestrator.remove_user_job(user, link.token()));
    let stats = h.run();

    assert_eq!(stats.completed, 2);
    assert_eq!(h.backend.count(Operation::RemoveSshKey), 1);
    assert_eq!(h.backend.count(Operation::RemoveUser), 1);
    assert_eq!(h.state(&link), SyncState::Erred);
}

#[test]
fn not_implemented_propagation_is_silent() {
    let h = Harness::with_backend(EngineConfig::default(), ScriptedBackend::not_implemented());
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::InSync);
    let key = h.member_key(&link, "laptop");

    h.submit(h.orchestrator.push_ssh_key_job(key.id, link.token()));
    let stats = h.run();
    assert_eq!(stats.completed, 1);
    assert_eq!(h.backend.count(Operation::AddSshKey), 1);
    assert_eq!(h.state(&link), SyncState::InSync);
    assert!(!h.stored(&link).has_error());
}

#[test]
fn fan_out_pushes_every_member_key() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::InSync);
    let alpha = h.link("alpha", &settings, SyncState::InSync);
    let beta = h.link("beta", &settings, SyncState::InSync);
    h.member_key(&alpha, "a1");
    h.member_key(&alpha, "a2");
    h.member_key(&beta, "b1");

    h.submit(Job::new(Task::PushSshKeys {
        links: vec![alpha.token(), beta.token()],
    }));
    let stats = h.run();
    assert_eq!(stats.executed, 4);

    let mut pushed: Vec<_> = h
        .backend
        .calls_of(Operation::AddSshKey)
        .into_iter()
        .filter_map(|call| call.subject)
        .collect();
    pushed.sort();
    assert_eq!(pushed, ["a1", "a2", "b1"]);
}

#[test]
fn creation_pipeline() {
    let h = Harness::new();
    let entity = h
        .orchestrator
        .register(SyncEntity::settings("fresh", SERVICE_TYPE), true)
        .unwrap();
    assert_eq!(entity.state, SyncState::CreationScheduled);

    sweep_settings(&h);
    assert_eq!(h.state(&entity), SyncState::Creating);
    h.run();
    assert_eq!(h.state(&entity), SyncState::InSync);
    assert_eq!(h.backend.count(Operation::Sync), 1);
}

#[test]
fn creation_failure_marks_erred() {
    let h = Harness::new();
    let entity = h.settings("fresh", SyncState::CreationScheduled);
    h.backend
        .push(Operation::Sync, Err(BackendError::request("quota exceeded")));

    sweep_settings(&h);
    h.run();

    let stored = h.stored(&entity);
    assert_eq!(stored.state, SyncState::Erred);
    assert_eq!(stored.error_message, "quota exceeded");
}

#[test]
fn guard_rejection_runs_no_continuation() {
    let h = Harness::new();
    let entity = h.settings("cloud", SyncState::Erred);
    h.store
        .set_error_message(&entity.reference(), "previous failure")
        .unwrap();

    h.submit(sync_job(&entity.token(), false));
    let stats = h.run();
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.aborted, 1);

    let stored = h.stored(&entity);
    assert_eq!(stored.state, SyncState::Erred);
    assert_eq!(stored.error_message, "previous failure");
    assert_eq!(h.backend.count(Operation::Sync), 0);
}

#[test]
fn link_sweep_syncs_links() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::InSync);
    let pending = h.link("beta", &settings, SyncState::CreationScheduled);

    let report = h
        .orchestrator
        .sync_all(EntityKind::ServiceProjectLink, &[], &h.queue)
        .unwrap();
    assert_eq!(report.scheduled, 1);
    assert_eq!(report.skipped, 1);
    h.run();
    assert_eq!(h.state(&link), SyncState::InSync);
    assert_eq!(h.state(&pending), SyncState::CreationScheduled);
    assert_eq!(h.state(&settings), SyncState::InSync);
}

#[test]
fn explicit_sweep_task() {
    let h = Harness::new();
    let chosen = h.settings("chosen", SyncState::InSync);
    let other = h.settings("other", SyncState::InSync);

    h.submit(Job::new(Task::SyncAll {
        kind: EntityKind::ServiceSettings,
        only: vec![chosen.token()],
    }));
    h.run();
    assert_eq!(h.backend.count(Operation::Sync), 1);
    assert_eq!(h.state(&chosen), SyncState::InSync);
    assert_eq!(h.state(&other), SyncState::InSync);
}

#[test]
fn throttled_sweep_is_requeued() {
    let config = EngineConfig::new().with_sync_throttle(
        ThrottleConfig::new("service_settings_sync", 2).with_retry_delay(Duration::from_secs(10)),
    );
    let h = Harness::with_config(config);
    let settings = h.settings("cloud", SyncState::InSync);

    let first = h.orchestrator.throttle().acquire("service_settings_sync", 2).unwrap();
    let second = h.orchestrator.throttle().acquire("service_settings_sync", 2).unwrap();
    h.submit(Job::new(Task::SyncAll {
        kind: EntityKind::ServiceSettings,
        only: Vec::new(),
    }));
    let stats = h.run();
    assert_eq!(stats.requeued, 1);
    assert_eq!(h.queue.delayed_jobs()[0].0, Duration::from_secs(10));
    assert_eq!(h.state(&settings), SyncState::InSync);
    assert_eq!(h.backend.count(Operation::Sync), 0);

    drop(first);
    drop(second);
    h.run_for(Duration::from_secs(10));
    assert_eq!(h.backend.count(Operation::Sync), 1);
    assert_eq!(h.orchestrator.throttle().in_use("service_settings_sync"), 0);
}

#[test]
fn link_recovery_heals_link_and_settings() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::Erred);
    let link = h.link("alpha", &settings, SyncState::Erred);
    for entity in [&settings, &link] {
        h.store
            .set_error_message(&entity.reference(), "timeout")
            .unwrap();
    }
    h.backend
        .set_default(Operation::CreateSession, Err(BackendError::NotImplemented));

    h.submit(Job::new(Task::RecoverErredLink { link: link.token() }));
    h.run();

    for entity in [&settings, &link] {
        let stored = h.stored(entity);
        assert_eq!(stored.state, SyncState::InSync);
        assert!(stored.error_message.is_empty());
    }
    assert_eq!(h.backend.count(Operation::CreateSession), 1);
    assert_eq!(h.backend.count(Operation::Ping), 1);
}

#[test]
fn link_recovery_keeps_state_when_session_fails() {
    let h = Harness::new();
    let settings = h.settings("cloud", SyncState::InSync);
    let link = h.link("alpha", &settings, SyncState::Erred);
    h.backend
        .push(Operation::CreateSession, Err(BackendError::request("unauthorized")));

    assert!(!h.orchestrator.recover_erred_link(&link.token()).unwrap());
    assert_eq!(h.state(&link), SyncState::Erred);
    assert_eq!(h.state(&settings), SyncState::InSync);
    assert!(!h.orchestrator.recover_erred_link("garbage").unwrap());
}

#[test]
fn concurrent_schedulers_have_one_winner() {
    let h = Arc::new(Harness::new());
    let entity = h.settings("contended", SyncState::InSync);
    let barrier = Arc::new(Barrier::new(2));

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let h = Arc::clone(&h);
                let barrier = Arc::clone(&barrier);
                let entity = entity.clone();
                scope.spawn(move || {
                    barrier.wait();
                    h.orchestrator.schedule_entity(&entity, &h.queue)
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| matches!(r, Ok(true))).count();
    let losers = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_illegal_transition()))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(losers, 1);
    assert_eq!(h.state(&entity), SyncState::SyncingScheduled);
    assert_eq!(h.queue.pending(), 1);
}

#[test]
fn concurrent_sweeps_schedule_each_entity_once() {
    let h = Harness::new();
    let entities: Vec<_> = (0..40)
        .map(|i| h.settings(&format!("s{i}"), SyncState::InSync))
        .collect();

    let reports: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                scope.spawn(|| {
                    h.orchestrator
                        .sync_all(EntityKind::ServiceSettings, &[], &h.queue)
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let scheduled: usize = reports.iter().map(|r| r.scheduled).sum();
    assert_eq!(scheduled, entities.len());
    assert_eq!(h.queue.pending(), entities.len());

    let mut tokens: Vec<_> = h
        .queue
        .ready_jobs()
        .into_iter()
        .map(|job| job.task.to_string())
        .collect();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), entities.len());

    h.run();
    for entity in &entities {
        assert_eq!(h.state(entity), SyncState::InSync);
    }
}

#[test]
fn executor_dispatch_on_file_store() {
    let files = TempFileStore::new();
    let settings = SyncEntity::settings("persisted", SERVICE_TYPE).with_state(SyncState::InSync);
    files.store.insert(settings.clone()).unwrap();

    let backend = Arc::new(ScriptedBackend::new());
    backend.push(Operation::Sync, Err(BackendError::Timeout));
    let registry = conductor_core::BackendRegistry::builder()
        .register_shared(SERVICE_TYPE, backend.clone())
        .build();
    let orchestrator = Orchestrator::new(
        files.store.clone(),
        registry,
        Arc::new(conductor_core::MemoryCredentialStore::new()),
    );
    let queue = LocalQueue::new();

    let outcome = orchestrator.execute(
        &Task::SyncAll {
            kind: EntityKind::ServiceSettings,
            only: Vec::new(),
        },
        &queue,
    );
    assert_eq!(outcome, TaskOutcome::Done);
    queue.run_until_idle(&orchestrator);

    let stored = files
        .store
        .find_by_id(&settings.reference())
        .unwrap()
        .unwrap();
    assert_eq!(stored.state, SyncState::Erred);
    assert_eq!(stored.error_message, "timeout");
    assert!(files.path().join("STATE").exists());
}
