//! End-to-end negotiation tests: session lifecycle, automatic resolution
//! strategies, idempotent message handling, and escalation overrides.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use specarb::envelope::AcceptPayload;
use specarb::negotiation::ResolutionKind;
use specarb::{
    ArbError, ArbiterConfig, ArbiterEngine, Envelope, EnvelopeAck, EnvelopeKind, ExecutionError,
    Grant, GrantId, InMemoryAllocationStore, InMemoryAuditStore, Location, Participant, Priority,
    Resolution, Scope, SessionId, SessionState, SubmitAck, SubmitOutcome, TimeWindow,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine() -> ArbiterEngine {
    engine_with(ArbiterConfig::default())
}

fn engine_with(config: ArbiterConfig) -> ArbiterEngine {
    ArbiterEngine::new(
        config,
        Arc::new(InMemoryAllocationStore::new()),
        Arc::new(InMemoryAuditStore::new()),
    )
}

fn window(start: DateTime<Utc>, minutes: i64) -> TimeWindow {
    TimeWindow::new(start, start + Duration::minutes(minutes)).unwrap()
}

/// A proposal at `lat` degrees latitude; ~0.36 degrees is ~40 km, which
/// with a 3 MHz offset lands in the negotiable severity range.
fn proposal(owner: &str, freq_mhz: f64, lat: f64, priority: Priority, w: TimeWindow) -> Grant {
    Grant::builder()
        .owner(owner)
        .frequency_mhz(freq_mhz)
        .bandwidth_khz(25.0)
        .power_dbm(40.0)
        .location(Location::new(lat, 45.0).unwrap())
        .window(w)
        .priority(priority)
        .build()
        .unwrap()
}

fn approve(e: &ArbiterEngine, grant: Grant) -> GrantId {
    match e.submit_proposal(grant).unwrap() {
        SubmitOutcome::Approved { grant_id } => grant_id,
        other => panic!("expected approval, got {other:?}"),
    }
}

fn negotiate(e: &ArbiterEngine, grant: Grant) -> (GrantId, SessionId) {
    match e.submit_proposal(grant).unwrap() {
        SubmitOutcome::Negotiating {
            grant_id,
            session_id,
        } => (grant_id, session_id),
        other => panic!("expected negotiation, got {other:?}"),
    }
}

/// Drives every round of a session to its deadline through maintenance.
fn exhaust_rounds(e: &ArbiterEngine, start: DateTime<Utc>) {
    let cfg = ArbiterConfig::default().negotiation;
    let mut t = start;
    for _ in 0..cfg.max_rounds {
        t += Duration::seconds(cfg.round_timeout_secs + 1);
        e.run_maintenance(t).unwrap();
    }
}

#[derive(Default)]
struct Recorder {
    opened: Mutex<Vec<(SessionId, Vec<Grant>)>>,
    resolutions: Mutex<Vec<Resolution>>,
}

impl Participant for Recorder {
    fn on_negotiation_opened(&self, session: SessionId, proposals: &[Grant]) {
        self.opened
            .lock()
            .unwrap()
            .push((session, proposals.to_vec()));
    }

    fn on_resolved(&self, _session: SessionId, resolution: &Resolution) {
        self.resolutions.lock().unwrap().push(resolution.clone());
    }
}

#[test]
fn contested_submission_opens_a_session_with_the_holder() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    let recorder = Arc::new(Recorder::default());
    e.register_participant("bravo".into(), recorder.clone())
        .unwrap();

    approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    let (_, session) = negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Routine, w));

    assert_eq!(
        e.coordinator().session_state(session).unwrap(),
        SessionState::Active
    );

    // The opening notification carries both live proposals.
    let opened = recorder.opened.lock().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, session);
    let owners: Vec<&str> = opened[0].1.iter().map(|g| g.owner.as_str()).collect();
    assert!(owners.contains(&"alpha") && owners.contains(&"bravo"));
}

#[test]
fn higher_priority_preempts_the_holder_at_the_round_limit() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    let holder = approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    let (contender, _) = negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Immediate, w));

    exhaust_rounds(&e, now);

    // The IMMEDIATE request holds the channel; the ROUTINE holder is out.
    let active = e.active_grants(now + Duration::minutes(30)).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, contender);

    let denials = e.denials().unwrap();
    assert!(denials.iter().any(|d| d.grant_id == holder));
    // The preempted side is offered alternatives.
    assert!(denials
        .iter()
        .any(|d| d.reasons.iter().any(|r| r.contains("alternatives"))));

    let outcomes = e.negotiation_outcomes().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state, SessionState::Resolved);
}

#[test]
fn equal_priority_contenders_time_share_the_window() {
    init_tracing();
    let e = engine();
    let now = Utc::now();

    approve(
        &e,
        proposal("alpha", 300.0, 35.0, Priority::Priority, window(now, 60)),
    );
    negotiate(
        &e,
        proposal(
            "bravo",
            303.0,
            35.36,
            Priority::Priority,
            window(now + Duration::minutes(30), 60),
        ),
    );

    exhaust_rounds(&e, now);

    let outcomes = e.negotiation_outcomes().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state, SessionState::Resolved);

    // Early slice belongs to the earlier-starting request, late slice to
    // the other; in between the windows never overlap.
    let early = e.active_grants(now + Duration::minutes(10)).unwrap();
    assert_eq!(early.len(), 1);
    assert_eq!(early[0].owner.as_str(), "alpha");

    let late = e.active_grants(now + Duration::minutes(80)).unwrap();
    assert_eq!(late.len(), 1);
    assert_eq!(late[0].owner.as_str(), "bravo");

    let all: Vec<Grant> = e.active_grants(now + Duration::minutes(10)).unwrap();
    let alpha_window = all[0].window;
    let bravo_window = late[0].window;
    assert!(!alpha_window.overlaps(&bravo_window));
}

#[test]
fn infeasible_split_escalates_and_resolves_by_override() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    // Both demand the full hour, same priority: no automatic strategy fits.
    let mut holder_grant = proposal("alpha", 300.0, 35.0, Priority::Priority, w);
    holder_grant.min_duration_secs = Some(3600);
    let holder = approve(&e, holder_grant);

    let mut contender_grant = proposal("bravo", 303.0, 35.36, Priority::Priority, w);
    contender_grant.min_duration_secs = Some(3600);
    let contender_copy = contender_grant.clone();
    let (contender, session) = negotiate(&e, contender_grant);

    exhaust_rounds(&e, now);
    assert_eq!(
        e.coordinator().session_state(session).unwrap(),
        SessionState::Escalated
    );

    let pending = e.pending_escalations().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].session_id, session);

    // Round traffic is refused while escalated.
    let err = e
        .coordinator()
        .accept(
            session,
            &"bravo".into(),
            specarb::MessageId::new(),
            holder,
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ArbError::Execution(ExecutionError::SessionNotActive { .. })
    ));

    // A human override awards the channel to the contender.
    e.submit_override(
        session,
        Resolution {
            kind: ResolutionKind::ManualOverride,
            approved: vec![contender_copy],
            denied: vec![holder],
            alternatives_mhz: Vec::new(),
            note: "operator decision: bravo has mission precedence".to_string(),
        },
    )
    .unwrap();

    let active = e.active_grants(now + Duration::minutes(30)).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, contender);
    assert!(e.pending_escalations().unwrap().is_empty());

    let outcomes = e.negotiation_outcomes().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state, SessionState::Resolved);
}

#[test]
fn acceptance_envelopes_converge_and_are_idempotent() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    let holder = approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    let (contender, session) = negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Routine, w));

    // The contender concedes and accepts the holder's allocation.
    let accept = Envelope::new(
        Scope::Session(session),
        "bravo".into(),
        EnvelopeKind::Accept,
        &AcceptPayload { proposal: holder },
    )
    .unwrap();

    assert_eq!(
        e.apply_envelope(&accept).unwrap(),
        EnvelopeAck::Round(SubmitAck::Recorded)
    );
    // Redelivery of the same message is acknowledged, not reapplied.
    assert_eq!(
        e.apply_envelope(&accept).unwrap(),
        EnvelopeAck::Round(SubmitAck::Duplicate)
    );

    // The holder confirms its own proposal, closing the round converged.
    let confirm = Envelope::new(
        Scope::Session(session),
        "alpha".into(),
        EnvelopeKind::Accept,
        &AcceptPayload { proposal: holder },
    )
    .unwrap();
    e.apply_envelope(&confirm).unwrap();

    let active = e.active_grants(now + Duration::minutes(30)).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, holder);

    let denials = e.denials().unwrap();
    assert!(denials.iter().any(|d| d.grant_id == contender));

    let outcomes = e.negotiation_outcomes().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].session_id, session);
}

#[test]
fn withdrawal_resolves_in_favor_of_the_holder() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    let holder = approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    let (contender, _) = negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Routine, w));

    e.cancel_proposal(contender, &"bravo".into()).unwrap();

    let active = e.active_grants(now + Duration::minutes(30)).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, holder);

    let outcomes = e.negotiation_outcomes().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].state, SessionState::Resolved);
}

#[test]
fn transitive_contention_joins_the_existing_session() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    let (_, first_session) = negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Routine, w));

    // A third party contesting the same holder joins the same session.
    let (_, second_session) =
        negotiate(&e, proposal("charlie", 297.0, 34.64, Priority::Routine, w));
    assert_eq!(first_session, second_session);
    assert_eq!(e.coordinator().len().unwrap(), 1);
}

#[test]
fn envelope_withdrawal_releases_the_pending_proposal() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    let (contender, session) = negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Routine, w));
    let (_, joined) = negotiate(&e, proposal("charlie", 297.0, 34.64, Priority::Routine, w));
    assert_eq!(session, joined);

    // Bravo withdraws over the wire; alpha and charlie keep negotiating.
    let withdraw = Envelope::new(
        Scope::Session(session),
        "bravo".into(),
        EnvelopeKind::Withdraw,
        &serde_json::json!({}),
    )
    .unwrap();
    assert_eq!(e.apply_envelope(&withdraw).unwrap(), EnvelopeAck::Withdrawn);
    assert_eq!(
        e.coordinator().session_state(session).unwrap(),
        SessionState::Active
    );

    // The withdrawn proposal no longer routes to the session.
    let err = e.cancel_proposal(contender, &"bravo".into()).unwrap_err();
    assert!(matches!(
        err,
        ArbError::Execution(ExecutionError::GrantNotFound { .. })
    ));
}

#[test]
fn session_registry_capacity_bounds_open_negotiations() {
    init_tracing();
    let mut config = ArbiterConfig::default();
    config.negotiation.registry_capacity = 1;
    let e = engine_with(config);
    let now = Utc::now();
    let w = window(now, 60);

    approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Routine, w));

    // A second, unrelated contention cannot open a session.
    approve(&e, proposal("xray", 800.0, 35.0, Priority::Routine, w));
    let err = e
        .submit_proposal(proposal("yankee", 803.0, 35.36, Priority::Routine, w))
        .unwrap_err();
    assert!(matches!(
        err,
        ArbError::Execution(ExecutionError::RegistryFull { capacity: 1 })
    ));
}

#[test]
fn session_deadline_escalates_without_replies() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 240);

    approve(&e, proposal("alpha", 300.0, 35.0, Priority::Routine, w));
    let (_, session) = negotiate(&e, proposal("bravo", 303.0, 35.36, Priority::Routine, w));

    let timeout = ArbiterConfig::default().negotiation.session_timeout_secs;
    e.run_maintenance(now + Duration::seconds(timeout + 1)).unwrap();

    assert_eq!(
        e.coordinator().session_state(session).unwrap(),
        SessionState::Escalated
    );
}
