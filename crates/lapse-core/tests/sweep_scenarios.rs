//! End-to-end sweeps through the public API with in-memory ports.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use lapse_core::app::{SweepConfig, Sweeper};
use lapse_core::domain::{
    Lead, LeadId, LeadStatus, Notification, NotificationCategory, NotificationId,
    NotificationPriority, Recipient, RunOutcome, UserId,
};
use lapse_core::impls::{ConnectionRegistry, InMemoryLeadStore, InMemoryNotificationStore};
use lapse_core::ports::{Clock, FixedClock};
use serde_json::json;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 14, 14, 0, 0).unwrap()
}

struct Harness {
    leads: Arc<InMemoryLeadStore>,
    notifications: Arc<InMemoryNotificationStore>,
    registry: Arc<ConnectionRegistry>,
    clock: Arc<FixedClock>,
    sweeper: Sweeper,
}

fn harness_with(config: SweepConfig, leads: InMemoryLeadStore) -> Harness {
    let leads = Arc::new(leads);
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let registry = Arc::new(ConnectionRegistry::new(16));
    let clock = Arc::new(FixedClock::new(t0()));
    let sweeper = Sweeper::builder(config)
        .lead_store(leads.clone())
        .notification_store(notifications.clone())
        .delivery(registry.clone())
        .clock(clock.clone())
        .build()
        .unwrap();
    Harness {
        leads,
        notifications,
        registry,
        clock,
        sweeper,
    }
}

fn harness() -> Harness {
    let config = SweepConfig {
        batch_pause_ms: 0,
        ..SweepConfig::default()
    };
    harness_with(config, InMemoryLeadStore::new())
}

/// `count` overdue leads for `owner`; the last one has the oldest deadline.
async fn seed_overdue(h: &Harness, owner: UserId, count: usize) -> Vec<Lead> {
    let leads: Vec<Lead> = (0..count)
        .map(|i| {
            Lead::new(
                LeadId::generate(),
                Some(owner),
                t0() - chrono::Duration::minutes(i as i64 + 1),
                t0() - chrono::Duration::days(7),
            )
        })
        .collect();
    h.leads.extend(leads.clone()).await;
    leads
}

async fn owner_notifications(h: &Harness, owner: UserId) -> Vec<Notification> {
    h.notifications
        .all()
        .await
        .into_iter()
        .filter(|n| n.recipient == Recipient::User(owner))
        .collect()
}

async fn system_notifications(h: &Harness) -> Vec<Notification> {
    h.notifications
        .all()
        .await
        .into_iter()
        .filter(|n| n.recipient == Recipient::System)
        .collect()
}

#[tokio::test]
async fn one_owner_three_leads_get_one_grouped_notification() {
    let h = harness();
    let owner = UserId::generate();
    let leads = seed_overdue(&h, owner, 3).await;
    let mut client = h.registry.connect(Recipient::User(owner));

    let outcome = h.sweeper.run_once().await;

    let report = outcome.report().unwrap();
    assert_eq!(report.expired, 3);
    assert_eq!(report.dispatch.processed.len(), 3);
    assert!(report.dispatch.deferred.is_empty());

    let sent = owner_notifications(&h, owner).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].category, NotificationCategory::LeadsExpired);
    assert_eq!(sent[0].priority, NotificationPriority::High);
    let mut referenced = sent[0].lead_ids();
    referenced.sort();
    let mut expected: Vec<LeadId> = leads.iter().map(|lead| lead.id).collect();
    expected.sort();
    assert_eq!(referenced, expected);

    for lead in &leads {
        let stored = h.leads.get(lead.id).await.unwrap();
        assert_eq!(stored.status, LeadStatus::Expired);
        assert!(!stored.notice_pending);
    }
    assert!(system_notifications(&h).await.is_empty());

    let pushed = client.try_recv().unwrap();
    assert_eq!(pushed.id, sent[0].id);
}

#[tokio::test]
async fn fifteen_leads_over_cap_defer_five_with_system_notice() {
    let h = harness();
    let owner = UserId::generate();
    let leads = seed_overdue(&h, owner, 15).await;

    let outcome = h.sweeper.run_once().await;

    let report = outcome.report().unwrap();
    assert_eq!(report.expired, 15);
    assert_eq!(report.dispatch.processed.len(), 10);
    assert_eq!(report.dispatch.deferred.len(), 5);

    // Seeded newest-first, so the 10 oldest deadlines are the last 10.
    let oldest: Vec<LeadId> = leads[5..].iter().rev().map(|lead| lead.id).collect();
    let newest: Vec<LeadId> = leads[..5].iter().rev().map(|lead| lead.id).collect();

    let sent = owner_notifications(&h, owner).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].lead_ids(), oldest);
    assert_eq!(sent[0].payload["withheld"], 5);

    let system = system_notifications(&h).await;
    assert_eq!(system.len(), 1);
    assert_eq!(system[0].category, NotificationCategory::DeferredWork);
    assert_eq!(system[0].lead_ids(), newest);
    assert_eq!(system[0].payload["reasons"]["over_cap"], 5);

    for id in &newest {
        let stored = h.leads.get(*id).await.unwrap();
        assert_eq!(stored.status, LeadStatus::Expired);
        assert!(stored.notice_pending);
    }
}

#[tokio::test]
async fn owner_in_cooldown_is_not_notified_but_leads_still_expire() {
    let h = harness();
    let owner = UserId::generate();
    h.notifications
        .seed(Notification {
            id: NotificationId::generate(),
            recipient: Recipient::User(owner),
            category: NotificationCategory::LeadsExpired,
            priority: NotificationPriority::High,
            title: "2 leads expired".into(),
            message: "earlier notice".into(),
            payload: json!({ "lead_ids": [] }),
            read: false,
            created_at: t0() - chrono::Duration::minutes(10),
            sent_at: Some(t0() - chrono::Duration::minutes(10)),
            expires_at: None,
        })
        .await;
    let leads = seed_overdue(&h, owner, 2).await;

    let outcome = h.sweeper.run_once().await;

    let report = outcome.report().unwrap();
    assert_eq!(report.expired, 2);
    assert!(report.dispatch.processed.is_empty());
    assert_eq!(report.dispatch.deferred.len(), 2);
    assert_eq!(owner_notifications(&h, owner).await.len(), 1);
    for lead in &leads {
        assert_eq!(h.leads.get(lead.id).await.unwrap().status, LeadStatus::Expired);
    }
    let system = system_notifications(&h).await;
    assert_eq!(system[0].payload["reasons"]["cooldown"], 2);
}

#[tokio::test]
async fn repeated_sweep_changes_nothing() {
    let h = harness();
    let owner = UserId::generate();
    seed_overdue(&h, owner, 4).await;

    h.sweeper.run_once().await;
    let after_first = h.notifications.all().await.len();
    let second = h.sweeper.run_once().await;

    let report = second.report().unwrap();
    assert_eq!(report.candidates, 0);
    assert_eq!(report.expired, 0);
    assert_eq!(report.carried_over, 0);
    assert_eq!(h.notifications.all().await.len(), after_first);
}

#[tokio::test]
async fn deferred_notices_are_delivered_once_cooldown_passes() {
    let h = harness();
    let owner = UserId::generate();
    let leads = seed_overdue(&h, owner, 15).await;

    h.sweeper.run_once().await;
    assert_eq!(owner_notifications(&h, owner).await.len(), 1);

    // Still inside the cooldown: carried over, deferred again.
    h.clock.advance(chrono::Duration::minutes(10));
    let outcome = h.sweeper.run_once().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.carried_over, 5);
    assert_eq!(report.dispatch.deferred.len(), 5);
    assert_eq!(owner_notifications(&h, owner).await.len(), 1);

    // Cooldown over: the remaining five go out in one notification.
    h.clock.advance(chrono::Duration::minutes(51));
    let outcome = h.sweeper.run_once().await;
    let report = outcome.report().unwrap();
    assert_eq!(report.carried_over, 5);
    assert_eq!(report.dispatch.processed.len(), 5);
    assert!(report.dispatch.deferred.is_empty());

    let sent = owner_notifications(&h, owner).await;
    assert_eq!(sent.len(), 2);
    let mut referenced: Vec<LeadId> = sent.iter().flat_map(|n| n.lead_ids()).collect();
    referenced.sort();
    let mut expected: Vec<LeadId> = leads.iter().map(|lead| lead.id).collect();
    expected.sort();
    assert_eq!(referenced, expected);

    // Nothing left to carry.
    let outcome = h.sweeper.run_once().await;
    assert_eq!(outcome.report().unwrap().carried_over, 0);
}

#[tokio::test]
async fn owners_never_get_two_notices_inside_the_cooldown() {
    let h = harness();
    let owner = UserId::generate();

    // A fresh batch every 5 minutes for 100 minutes.
    for _ in 0..20 {
        seed_overdue(&h, owner, 3).await;
        h.sweeper.run_once().await;
        h.clock.advance(chrono::Duration::minutes(5));
    }

    let mut sent: Vec<DateTime<Utc>> = owner_notifications(&h, owner)
        .await
        .iter()
        .map(|n| n.created_at)
        .collect();
    sent.sort();
    assert_eq!(sent, vec![t0(), t0() + chrono::Duration::minutes(65)]);
    for pair in sent.windows(2) {
        assert!(pair[1] - pair[0] >= chrono::Duration::minutes(60));
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_do_not_overlap() {
    let config = SweepConfig {
        batch_pause_ms: 0,
        lock_timeout_secs: 1,
        ..SweepConfig::default()
    };
    let h = harness_with(
        config,
        InMemoryLeadStore::new().with_latency(Duration::from_secs(2)),
    );
    let owner = UserId::generate();
    seed_overdue(&h, owner, 3).await;

    let (a, b) = tokio::join!(h.sweeper.run_once(), h.sweeper.run_once());

    let skipped = [&a, &b]
        .iter()
        .filter(|outcome| matches!(outcome, RunOutcome::Skipped))
        .count();
    assert_eq!(skipped, 1);
    let completed = if a.succeeded() { &a } else { &b };
    assert_eq!(completed.report().unwrap().expired, 3);
    assert_eq!(owner_notifications(&h, owner).await.len(), 1);
}

#[tokio::test]
async fn handle_run_now_uses_the_same_pipeline() {
    let h = harness();
    let owner = UserId::generate();
    seed_overdue(&h, owner, 2).await;
    let clock = h.clock.clone();

    let handle = h.sweeper.start();
    let outcome = handle.run_now().await;

    assert_eq!(outcome.report().unwrap().expired, 2);
    let status = handle.health().snapshot();
    let last = status.last_run.unwrap();
    assert_eq!(last.started_at, clock.now());
    handle.shutdown_and_join().await.unwrap();
}
