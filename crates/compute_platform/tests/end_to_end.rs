//! Wires every component together the way `compute_platform::serve` does,
//! and drives the literal end-to-end scenarios used to validate the system
//! as a whole: a job's full happy-path lifecycle, a matching negotiation
//! with a confirmation race, and a match that times out unconfirmed.
//!
//! Uses a `ManualClock` throughout so liveness windows and confirm windows
//! advance deterministically instead of sleeping real wall-clock seconds.

use std::sync::Arc;
use std::time::Duration;

use compute_bus::InProcessBus;
use compute_protocol::{
    AgentState, Availability, BidSubmission, ConsumerId, JobKind, JobState, JobSubmission,
    MatchParty, MatchState, OfferSubmission, ProviderId, Requirements, ResourceVector,
};
use compute_test_utils::ManualClock;
use tokio_util::sync::CancellationToken;

struct Harness {
    ledger: Arc<resource_ledger::ResourceLedger>,
    registry: Arc<agent_registry::AgentRegistry>,
    scheduler: Arc<scheduler::Scheduler>,
    matcher: Arc<marketplace::MarketplaceMatcher>,
    clock: Arc<ManualClock>,
    bus: Arc<InProcessBus>,
}

fn build_harness(match_confirm_window_secs: u64) -> Harness {
    let bus = InProcessBus::new();
    let clock = Arc::new(ManualClock::starting_now());
    let ledger = resource_ledger::ResourceLedger::new();
    let registry = agent_registry::AgentRegistry::new(bus.clone(), ledger.clone(), clock.clone());
    let journal = job_journal::JobJournal::new(bus.clone());
    let scheduler = scheduler::Scheduler::new(
        journal,
        registry.clone(),
        ledger.clone(),
        bus.clone(),
        clock.clone(),
        Arc::new(scheduler::LinearCostEstimator::default()),
        3600,
        3,
        Duration::from_secs(5),
    );
    let matcher = marketplace::MarketplaceMatcher::new(bus.clone(), clock.clone(), match_confirm_window_secs);
    Harness {
        ledger,
        registry,
        scheduler,
        matcher,
        clock,
        bus,
    }
}

/// Scenario 1: register an agent with `{cpu:8, memory_mb:32768}`, submit a
/// job requiring `{cpu:4, memory_mb:16384}`; the job should be scheduled
/// onto that agent and, once `job.result{succeeded}` arrives, transition to
/// `succeeded` with its allocation fully released.
#[tokio::test]
async fn happy_path_job_lifecycle() {
    let h = build_harness(300);

    let agent_id = compute_protocol::AgentId::new();
    let capacity = ResourceVector::single("cpu", 8.0).add(&ResourceVector::single("memory_mb", 32768.0));
    h.registry.register(compute_protocol::Agent {
        id: agent_id,
        state: AgentState::Active,
        last_seen: h.clock.now(),
        capacity: capacity.clone(),
        allocated: ResourceVector::new(),
        capabilities: Default::default(),
        region: "us-west-1".to_string(),
        price_per_hour: Default::default(),
        reputation: 0.9,
        active_jobs: Default::default(),
    });
    h.ledger.register_resource(agent_id, capacity, serde_json::Value::Null);

    let mut replier = h.bus.register_replier(&compute_protocol::subjects::agent_assign_subject(&agent_id));
    tokio::spawn(async move {
        while let Some(pending) = replier.recv().await {
            pending.respond(serde_json::json!({"accepted": true}));
        }
    });

    let job = h
        .scheduler
        .submit(JobSubmission {
            submitter: ConsumerId::new(),
            kind: JobKind::Container,
            payload: serde_json::json!({}),
            requirements: Requirements {
                cpu_cores: 4.0,
                memory_mb: 16384.0,
                ..Default::default()
            },
            priority: 5,
            timeout_secs: None,
            max_retries: None,
        })
        .await
        .unwrap();
    h.scheduler.sweep().await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if h.scheduler.get(job.id).unwrap().state == JobState::Scheduled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should have scheduled onto the only eligible agent");

    let scheduled = h.scheduler.get(job.id).unwrap();
    assert_eq!(scheduled.assigned_agent, Some(agent_id));

    let result = h.ledger.query(&resource_ledger::QueryFilter {
        agent_id: Some(agent_id),
        ..Default::default()
    });
    assert_eq!(result.resources[0].allocated.get("cpu"), 4.0);
    assert_eq!(result.resources[0].allocated.get("memory_mb"), 16384.0);

    let cancel = CancellationToken::new();
    let listener = tokio::spawn(h.scheduler.clone().run_terminal_listener(cancel.clone()));
    let releaser = resource_ledger::TerminalAllocationReleaser::new(h.ledger.clone(), h.bus.clone());
    let releaser_handle = tokio::spawn(releaser.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.bus
        .publish(
            compute_protocol::subjects::JOB_RESULT,
            serde_json::json!({
                "job_id": job.id,
                "status": "succeeded",
                "exit_code": 0,
                "error": null,
                "metrics": {},
            }),
        )
        .await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if h.scheduler.get(job.id).unwrap().state == JobState::Succeeded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should have transitioned to succeeded");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let result = h.ledger.query(&resource_ledger::QueryFilter {
        agent_id: Some(agent_id),
        ..Default::default()
    });
    assert_eq!(result.resources[0].allocated.get("cpu"), 0.0);
    assert_eq!(result.resources[0].allocated.get("memory_mb"), 0.0);

    cancel.cancel();
    let _ = listener.await;
    let _ = releaser_handle.await;
}

/// Scenario 4 + 5: an offer and a bid that overlap in price/time/region
/// produce a proposed match at the midpoint price; both parties confirming
/// (in either order, including a duplicate) activates it exactly once.
#[tokio::test]
async fn matching_then_confirmation_race() {
    let h = build_harness(300);
    let now = h.clock.now();

    let offer = h
        .matcher
        .create_offer(OfferSubmission {
            provider_id: ProviderId::new(),
            agent_id: compute_protocol::AgentId::new(),
            resources: ResourceVector::single("cpu", 8.0),
            price_per_hour: 0.05,
            availability: Availability {
                start: now,
                end: now + chrono::Duration::hours(8),
                rrule: None,
            },
            min_duration_secs: 3600,
            max_duration_secs: 8 * 3600,
            features: ["us-west-1".to_string()].into_iter().collect(),
            sla_uptime: 0.999,
            ttl_secs: None,
        })
        .await;

    let mut match_created = h.bus.subscribe(compute_protocol::subjects::MATCH_CREATED);

    let bid = h
        .matcher
        .create_bid(BidSubmission {
            consumer_id: ConsumerId::new(),
            requirements: Requirements {
                cpu_cores: 4.0,
                memory_mb: 0.0,
                ..Default::default()
            },
            max_price_per_hour: 0.25,
            start_time: now + chrono::Duration::hours(1),
            duration_secs: 4 * 3600,
            flex_window_secs: 0,
            preferred_regions: vec!["us-west-1".to_string()],
            ttl_secs: None,
        })
        .await;
    h.matcher.sweep().await;

    let envelope = tokio::time::timeout(Duration::from_secs(1), match_created.recv())
        .await
        .expect("offer and bid should have matched")
        .unwrap();
    let created: compute_protocol::Match = serde_json::from_value(envelope.payload).unwrap();
    let match_id = created.id;
    assert_eq!(created.bid_id, bid.id);

    let offer_after = h.matcher.get_offer(offer.id).unwrap();
    assert_eq!(offer_after.state, compute_protocol::OfferState::Reserved);

    // ask 0.05 plus 3/4 of the headroom up to the bid's max 0.25 is 0.20.
    let proposed = h.matcher.get_match(match_id).unwrap();
    assert_eq!(proposed.state, MatchState::Proposed);
    assert!((proposed.agreed_price - 0.20).abs() < 1e-9);

    let confirmed_by_consumer = h.matcher.confirm_match(match_id, MatchParty::Consumer).await.unwrap();
    assert_eq!(confirmed_by_consumer.state, MatchState::ConfirmedByConsumer);

    // Duplicate confirm by the same party is a no-op, not an error.
    let duplicate = h.matcher.confirm_match(match_id, MatchParty::Consumer).await.unwrap();
    assert_eq!(duplicate.state, MatchState::ConfirmedByConsumer);

    let active = h.matcher.confirm_match(match_id, MatchParty::Provider).await.unwrap();
    assert_eq!(active.state, MatchState::Active);
}

/// Scenario 6: a match nobody confirms within the confirm window expires,
/// returning its bid and offer to `open`.
#[tokio::test]
async fn unconfirmed_match_times_out() {
    let h = build_harness(300);
    let now = h.clock.now();

    let offer = h
        .matcher
        .create_offer(OfferSubmission {
            provider_id: ProviderId::new(),
            agent_id: compute_protocol::AgentId::new(),
            resources: ResourceVector::single("cpu", 8.0),
            price_per_hour: 0.05,
            availability: Availability {
                start: now,
                end: now + chrono::Duration::hours(8),
                rrule: None,
            },
            min_duration_secs: 3600,
            max_duration_secs: 8 * 3600,
            features: Default::default(),
            sla_uptime: 0.999,
            ttl_secs: None,
        })
        .await;

    let mut match_created = h.bus.subscribe(compute_protocol::subjects::MATCH_CREATED);

    let bid = h
        .matcher
        .create_bid(BidSubmission {
            consumer_id: ConsumerId::new(),
            requirements: Requirements {
                cpu_cores: 4.0,
                memory_mb: 0.0,
                ..Default::default()
            },
            max_price_per_hour: 0.25,
            start_time: now + chrono::Duration::hours(1),
            duration_secs: 4 * 3600,
            flex_window_secs: 0,
            preferred_regions: Vec::new(),
            ttl_secs: None,
        })
        .await;
    h.matcher.sweep().await;

    let envelope = tokio::time::timeout(Duration::from_secs(1), match_created.recv())
        .await
        .expect("offer and bid should have matched")
        .unwrap();
    let created: compute_protocol::Match = serde_json::from_value(envelope.payload).unwrap();
    let match_id = created.id;

    h.clock.advance(chrono::Duration::seconds(301));
    h.matcher.sweep().await;

    let expired = h.matcher.get_match(match_id).unwrap();
    assert_eq!(expired.state, MatchState::Expired);
    assert_eq!(h.matcher.get_bid(bid.id).unwrap().state, compute_protocol::BidState::Open);
    assert_eq!(h.matcher.get_offer(offer.id).unwrap().state, compute_protocol::OfferState::Open);
}

/// Scenario 2: a second, smaller job can't schedule while the first job
/// holds all of the only agent's capacity; it stays `queued` with
/// `retry_count` climbing across sweeps, then schedules once the first job
/// finishes and its allocation is released.
#[tokio::test]
async fn over_commit_refusal_then_schedules_once_capacity_frees() {
    let h = build_harness(300);

    let agent_id = compute_protocol::AgentId::new();
    let capacity = ResourceVector::single("cpu", 8.0);
    h.registry.register(compute_protocol::Agent {
        id: agent_id,
        state: AgentState::Active,
        last_seen: h.clock.now(),
        capacity: capacity.clone(),
        allocated: ResourceVector::new(),
        capabilities: Default::default(),
        region: "us-west-1".to_string(),
        price_per_hour: Default::default(),
        reputation: 0.9,
        active_jobs: Default::default(),
    });
    h.ledger.register_resource(agent_id, capacity, serde_json::Value::Null);

    let mut replier = h.bus.register_replier(&compute_protocol::subjects::agent_assign_subject(&agent_id));
    tokio::spawn(async move {
        while let Some(pending) = replier.recv().await {
            pending.respond(serde_json::json!({"accepted": true}));
        }
    });

    let submission = |cpu: f64| JobSubmission {
        submitter: ConsumerId::new(),
        kind: JobKind::Container,
        payload: serde_json::json!({}),
        requirements: Requirements {
            cpu_cores: cpu,
            ..Default::default()
        },
        priority: 5,
        timeout_secs: None,
        max_retries: None,
    };

    let job_big = h.scheduler.submit(submission(8.0)).await.unwrap();
    h.scheduler.sweep().await;
    assert_eq!(h.scheduler.get(job_big.id).unwrap().state, JobState::Scheduled);

    let job_small = h.scheduler.submit(submission(1.0)).await.unwrap();
    h.scheduler.sweep().await;
    let after_first_sweep = h.scheduler.get(job_small.id).unwrap();
    assert_eq!(after_first_sweep.state, JobState::Queued);
    assert_eq!(after_first_sweep.retry_count, 1);

    h.clock.advance(chrono::Duration::seconds(3));
    h.scheduler.sweep().await;
    let after_second_sweep = h.scheduler.get(job_small.id).unwrap();
    assert_eq!(after_second_sweep.state, JobState::Queued);
    assert_eq!(after_second_sweep.retry_count, 2);

    let cancel = CancellationToken::new();
    let listener = tokio::spawn(h.scheduler.clone().run_terminal_listener(cancel.clone()));
    let releaser = resource_ledger::TerminalAllocationReleaser::new(h.ledger.clone(), h.bus.clone());
    let releaser_handle = tokio::spawn(releaser.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await;

    h.bus
        .publish(
            compute_protocol::subjects::JOB_RESULT,
            serde_json::json!({
                "job_id": job_big.id,
                "status": "succeeded",
                "exit_code": 0,
                "error": null,
                "metrics": {},
            }),
        )
        .await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if h.scheduler.get(job_big.id).unwrap().state == JobState::Succeeded {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first job should have completed and released its allocation");

    h.clock.advance(chrono::Duration::seconds(5));
    h.scheduler.sweep().await;
    let scheduled_small = h.scheduler.get(job_small.id).unwrap();
    assert_eq!(scheduled_small.state, JobState::Scheduled);
    assert_eq!(scheduled_small.assigned_agent, Some(agent_id));

    cancel.cancel();
    let _ = listener.await;
    let _ = releaser_handle.await;
}

/// Scenario 3: an agent that stops heartbeating is reaped by the liveness
/// sweeper once `2*heartbeat_interval + offline_grace` has elapsed; the job
/// it was holding has its allocation released and is re-queued with
/// `retry_count` bumped.
#[tokio::test]
async fn dead_agent_releases_allocation_and_requeues_job() {
    let h = build_harness(300);

    let agent_id = compute_protocol::AgentId::new();
    let capacity = ResourceVector::single("cpu", 8.0);
    h.registry.register(compute_protocol::Agent {
        id: agent_id,
        state: AgentState::Active,
        last_seen: h.clock.now(),
        capacity: capacity.clone(),
        allocated: ResourceVector::new(),
        capabilities: Default::default(),
        region: "us-west-1".to_string(),
        price_per_hour: Default::default(),
        reputation: 0.9,
        active_jobs: Default::default(),
    });
    h.ledger.register_resource(agent_id, capacity, serde_json::Value::Null);

    let mut replier = h.bus.register_replier(&compute_protocol::subjects::agent_assign_subject(&agent_id));
    tokio::spawn(async move {
        while let Some(pending) = replier.recv().await {
            pending.respond(serde_json::json!({"accepted": true}));
        }
    });

    let job = h
        .scheduler
        .submit(JobSubmission {
            submitter: ConsumerId::new(),
            kind: JobKind::Container,
            payload: serde_json::json!({}),
            requirements: Requirements {
                cpu_cores: 4.0,
                ..Default::default()
            },
            priority: 5,
            timeout_secs: None,
            max_retries: None,
        })
        .await
        .unwrap();
    h.scheduler.sweep().await;
    assert_eq!(h.scheduler.get(job.id).unwrap().state, JobState::Scheduled);

    let cancel = CancellationToken::new();
    let terminal_listener = tokio::spawn(h.scheduler.clone().run_terminal_listener(cancel.clone()));
    let liveness_sweeper = agent_registry::LivenessSweeper::new(
        h.registry.clone(),
        Duration::from_millis(5),
        Duration::from_secs(60),
        Duration::from_secs(120),
    );
    let liveness_handle = tokio::spawn(liveness_sweeper.run(cancel.clone()));

    h.clock.advance(chrono::Duration::seconds(61));
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if h.registry.get(agent_id).unwrap().state == AgentState::Offline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("agent should have gone offline after the liveness window elapsed");

    h.clock.advance(chrono::Duration::seconds(121));
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let j = h.scheduler.get(job.id).unwrap();
            if j.state == JobState::Queued && j.retry_count == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job should have been released and re-queued after the offline grace period");

    let result = h.ledger.query(&resource_ledger::QueryFilter {
        agent_id: Some(agent_id),
        ..Default::default()
    });
    assert_eq!(result.resources[0].allocated.get("cpu"), 0.0);

    cancel.cancel();
    let _ = terminal_listener.await;
    let _ = liveness_handle.await;
}
