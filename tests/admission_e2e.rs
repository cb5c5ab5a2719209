//! End-to-end admission pipeline tests: policy gate, deconfliction,
//! commit visibility, and expiry.

use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, Utc};
use specarb::{
    ActionKind, ArbiterConfig, ArbiterEngine, Grant, InMemoryAllocationStore, InMemoryAuditStore,
    Location, Priority, SubmitOutcome, TimeWindow,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine() -> ArbiterEngine {
    ArbiterEngine::new(
        ArbiterConfig::default(),
        Arc::new(InMemoryAllocationStore::new()),
        Arc::new(InMemoryAuditStore::new()),
    )
}

fn window(start: DateTime<Utc>, minutes: i64) -> TimeWindow {
    TimeWindow::new(start, start + Duration::minutes(minutes)).unwrap()
}

fn proposal(owner: &str, freq_mhz: f64, lat: f64, w: TimeWindow) -> Grant {
    Grant::builder()
        .owner(owner)
        .frequency_mhz(freq_mhz)
        .bandwidth_khz(25.0)
        .power_dbm(40.0)
        .location(Location::new(lat, 45.0).unwrap())
        .window(w)
        .priority(Priority::Routine)
        .build()
        .unwrap()
}

#[test]
fn clean_request_is_approved_and_visible() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let grant = proposal("recon-7", 312.5, 35.0, window(now, 60));
    let id = grant.id;

    let outcome = e.submit_proposal(grant).unwrap();
    assert!(matches!(outcome, SubmitOutcome::Approved { grant_id } if grant_id == id));

    let active = e.active_grants(now + Duration::minutes(1)).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].owner.as_str(), "recon-7");
    assert!(e.conflict_history().unwrap().is_empty());
    assert!(e.denials().unwrap().is_empty());
}

#[test]
fn severe_cochannel_conflict_is_denied_with_alternatives() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    e.submit_proposal(proposal("alpha", 300.0, 35.0, w)).unwrap();

    // Same frequency, overlapping window, roughly 5 km away.
    let contender = proposal("bravo", 300.0, 35.045, w);
    let contender_id = contender.id;
    let outcome = e.submit_proposal(contender).unwrap();

    let SubmitOutcome::Denied {
        grant_id,
        reasons,
        alternatives_mhz,
    } = outcome
    else {
        panic!("expected denial, got {outcome:?}");
    };
    assert_eq!(grant_id, contender_id);
    assert!(!reasons.is_empty());
    assert!(!alternatives_mhz.is_empty());
    for alt in &alternatives_mhz {
        assert!(
            (alt - 300.0).abs() > 5.0,
            "alternative {alt} too close to the occupied channel"
        );
    }

    // The denial and its conflicts are on the audit record.
    assert!(!e.conflict_history().unwrap().is_empty());
    let denials = e.denials().unwrap();
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].grant_id, contender_id);

    // The original holder keeps its allocation.
    let active = e.active_grants(now + Duration::minutes(1)).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].owner.as_str(), "alpha");
}

#[test]
fn jamming_in_protected_band_is_denied_by_policy() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let mut grant = proposal("ew-3", 95.0, 35.0, window(now, 60));
    grant.action = ActionKind::Jamming;
    let id = grant.id;

    let outcome = e.submit_proposal(grant).unwrap();
    let SubmitOutcome::Denied {
        reasons,
        alternatives_mhz,
        ..
    } = outcome
    else {
        panic!("expected denial, got {outcome:?}");
    };
    assert!(reasons.iter().any(|r| r.contains("protected band")));
    // Policy denials offer no frequency alternatives.
    assert!(alternatives_mhz.is_empty());

    assert!(e.active_grants(now).unwrap().is_empty());
    assert_eq!(e.denials().unwrap()[0].grant_id, id);
    // No negotiation session was opened for a non-negotiable violation.
    assert!(e.pending_escalations().unwrap().is_empty());
}

#[test]
fn passive_collection_in_protected_band_is_admitted() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let mut grant = proposal("sigint-1", 95.0, 35.0, window(now, 60));
    grant.action = ActionKind::Isr;

    let outcome = e.submit_proposal(grant).unwrap();
    assert!(matches!(outcome, SubmitOutcome::Approved { .. }));
}

#[test]
fn committed_grant_is_immediately_visible_to_the_next_check() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let w = window(now, 60);

    let first = e
        .submit_proposal(proposal("alpha", 300.0, 35.0, w))
        .unwrap();
    assert!(matches!(first, SubmitOutcome::Approved { .. }));

    // An identical co-located request must see the commit, not race past it.
    let second = e
        .submit_proposal(proposal("bravo", 300.0, 35.0, w))
        .unwrap();
    assert!(matches!(second, SubmitOutcome::Denied { .. }));
}

#[test]
fn racing_cochannel_commits_admit_at_most_one() {
    init_tracing();
    let e = Arc::new(engine());
    let now = Utc::now();
    let w = window(now, 60);

    let mut handles = Vec::new();
    for owner in ["alpha", "bravo", "charlie", "delta"] {
        let e = Arc::clone(&e);
        let grant = proposal(owner, 300.0, 35.0, w);
        handles.push(thread::spawn(move || e.submit_proposal(grant).unwrap()));
    }

    let mut approved = 0;
    for handle in handles {
        if let SubmitOutcome::Approved { .. } = handle.join().unwrap() {
            approved += 1;
        }
    }
    assert_eq!(approved, 1, "mutually conflicting proposals both committed");
    assert_eq!(e.active_grants(now + Duration::minutes(1)).unwrap().len(), 1);
}

#[test]
fn disjoint_windows_share_a_frequency() {
    init_tracing();
    let e = engine();
    let now = Utc::now();

    let early = proposal("alpha", 300.0, 35.0, window(now, 60));
    let late = proposal("bravo", 300.0, 35.0, window(now + Duration::minutes(60), 60));

    assert!(matches!(
        e.submit_proposal(early).unwrap(),
        SubmitOutcome::Approved { .. }
    ));
    assert!(matches!(
        e.submit_proposal(late).unwrap(),
        SubmitOutcome::Approved { .. }
    ));
}

#[test]
fn expiry_frees_the_channel() {
    init_tracing();
    let e = engine();
    let now = Utc::now();

    e.submit_proposal(proposal("alpha", 300.0, 35.0, window(now, 60)))
        .unwrap();

    let later = now + Duration::minutes(90);
    let report = e.run_maintenance(later).unwrap();
    assert_eq!(report.expired, 1);
    assert!(e.active_grants(later).unwrap().is_empty());

    // The channel is reusable once the holder expired.
    let replacement = proposal("bravo", 300.0, 35.0, window(later, 60));
    assert!(matches!(
        e.submit_proposal(replacement).unwrap(),
        SubmitOutcome::Approved { .. }
    ));
}

#[test]
fn owner_can_cancel_a_committed_grant() {
    init_tracing();
    let e = engine();
    let now = Utc::now();
    let grant = proposal("alpha", 300.0, 35.0, window(now, 60));
    let id = grant.id;
    e.submit_proposal(grant).unwrap();

    // A stranger cannot cancel it.
    let err = e.cancel_proposal(id, &"bravo".into()).unwrap_err();
    assert!(err.to_string().contains("owner"));

    e.cancel_proposal(id, &"alpha".into()).unwrap();
    assert!(e.active_grants(now + Duration::minutes(1)).unwrap().is_empty());
}
