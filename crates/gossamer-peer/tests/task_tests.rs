use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde_json::json;
use tokio::sync::mpsc;

use gossamer_network::{BusAdapter, MemoryTransport, Transport};
use gossamer_peer::*;
use gossamer_protocol::{decode_frame, Address, Envelope, Task, TaskMessage, TaskStatus, WireFormat};

/// (task key, executor, priority owner) for every execution.
type Ledger = Arc<Mutex<Vec<(DateTime<Utc>, Address, Option<Address>)>>>;

fn recording_abilities(ledger: &Ledger) -> AbilityRegistry {
    let ledger = ledger.clone();
    let mut abilities = AbilityRegistry::new();
    abilities.register_fn(
        "record",
        move |executor: &Address, task: &Task| {
            ledger.lock().unwrap().push((
                task.key(),
                executor.clone(),
                task.priority_owner.clone(),
            ));
            Ok(Some(executor.to_string()))
        },
        false,
    );
    abilities
}

fn task_config(staleness_secs: f64) -> PeerConfig {
    PeerConfig {
        broadcast_delay_secs: 0.02,
        workload_jitter_min_secs: 0.0,
        workload_jitter_max_secs: 0.02,
        staleness_threshold_secs: staleness_secs,
        ..Default::default()
    }
}

/// Originates a single task and then goes quiet.
#[derive(Default)]
struct SingleTask {
    sent: bool,
}

impl Workload for SingleTask {
    fn next_task(&mut self, _rng: &mut dyn RngCore) -> Option<TaskDraft> {
        if std::mem::replace(&mut self.sent, true) {
            return None;
        }
        Some(TaskDraft {
            abilities: vec!["record".into()],
            payload: json!({ "random": 1 }),
        })
    }
}

/// First task frame from each of `senders` with the given status. Frames
/// from anyone else are skipped.
async fn next_tasks_from(
    inbound: &mut mpsc::Receiver<String>,
    senders: &[&Address],
    status: TaskStatus,
) -> HashMap<Address, Task> {
    let mut found = HashMap::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while found.len() < senders.len() {
        let Ok(Some(frame)) = tokio::time::timeout_at(deadline, inbound.recv()).await else {
            break;
        };
        let Ok(envelope) = decode_frame(&frame) else {
            continue;
        };
        let Some(sender) = envelope.sender.clone() else {
            continue;
        };
        if envelope.tag != "JSON" || !senders.contains(&&sender) || found.contains_key(&sender) {
            continue;
        }
        if let Ok(message) = envelope.decode_payload::<TaskMessage>() {
            if message.task.status == status {
                found.insert(sender, message.task);
            }
        }
    }
    found
}

async fn wait_until<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_fresh_tasks_run_once_on_their_owner() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let ledger: Ledger = Arc::default();
    let mut peers: Vec<Peer> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            Peer::builder(Address::new(format!("mem://{name}")), hub.clone())
                .config(task_config(30.0))
                .with_tasks(recording_abilities(&ledger), RandomWorkload::new(["record"]))
                .build()
                .unwrap()
        })
        .collect();
    connect_all(&peers).await.unwrap();
    for peer in peers.iter_mut() {
        peer.setup().await.unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || ledger.lock().unwrap().len() >= 5).await,
        "no tasks were executed"
    );
    for peer in peers.iter_mut() {
        peer.teardown().await.unwrap();
    }

    let ledger = ledger.lock().unwrap();
    let mut runs: HashMap<DateTime<Utc>, usize> = HashMap::new();
    for (key, executor, owner) in ledger.iter() {
        *runs.entry(*key).or_default() += 1;
        assert_eq!(Some(executor), owner.as_ref(), "non-owner ran a fresh task");
    }
    assert!(runs.values().all(|&count| count == 1), "task ran twice: {runs:?}");
}

#[tokio::test]
async fn test_silent_owner_is_taken_over() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let ledger: Ledger = Arc::default();
    let ghost = Address::new("mem://ghost");

    // a only ever hands work to a peer that never runs.
    let mut a = Peer::builder(Address::new("mem://a"), hub.clone())
        .config(task_config(0.2))
        .with_tasks(AbilityRegistry::new(), RandomWorkload::new(["record"]))
        .build()
        .unwrap();
    let mut b = Peer::builder(Address::new("mem://b"), hub)
        .config(task_config(0.2))
        .with_tasks(recording_abilities(&ledger), IdleWorkload)
        .build()
        .unwrap();
    a.join(&ghost).await.unwrap();
    b.join(a.address()).await.unwrap();
    a.setup().await.unwrap();
    b.setup().await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || !ledger.lock().unwrap().is_empty()).await,
        "stale task never taken over"
    );
    a.teardown().await.unwrap();
    b.teardown().await.unwrap();

    let ledger = ledger.lock().unwrap();
    let (_, executor, owner) = &ledger[0];
    assert_eq!(executor, &Address::new("mem://b"));
    assert_eq!(owner.as_ref(), Some(&ghost));
}

#[tokio::test]
async fn test_report_tracks_completed_tasks() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let ledger: Ledger = Arc::default();
    let mut a = Peer::builder(Address::new("mem://a"), hub.clone())
        .config(task_config(30.0))
        .with_tasks(AbilityRegistry::new(), RandomWorkload::new(["record"]))
        .build()
        .unwrap();
    let mut b = Peer::builder(Address::new("mem://b"), hub)
        .config(task_config(30.0))
        .with_tasks(recording_abilities(&ledger), IdleWorkload)
        .build()
        .unwrap();
    a.join(b.address()).await.unwrap();
    b.join(a.address()).await.unwrap();
    a.setup().await.unwrap();
    b.setup().await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || ledger.lock().unwrap().len() >= 2).await);
    let report = b.report().await;
    assert!(report.tasks_completed.unwrap_or_default() >= 2);
    assert_eq!(report.dead_letters, Some(0));

    a.teardown().await.unwrap();
    b.teardown().await.unwrap();
}

#[tokio::test]
async fn test_two_observers_of_a_stale_task_agree() {
    let hub: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
    let ledger: Ledger = Arc::default();
    let ghost = Address::new("mem://ghost");

    // a hands its only task to a peer that never runs, and waits far
    // longer than b and c before giving up on it.
    let mut a = Peer::builder(Address::new("mem://a"), hub.clone())
        .config(task_config(30.0))
        .with_tasks(AbilityRegistry::new(), SingleTask::default())
        .build()
        .unwrap();
    let mut observers: Vec<Peer> = ["b", "c"]
        .iter()
        .map(|name| {
            Peer::builder(Address::new(format!("mem://{name}")), hub.clone())
                .config(task_config(0.2))
                .with_tasks(recording_abilities(&ledger), IdleWorkload)
                .build()
                .unwrap()
        })
        .collect();
    let (b_addr, c_addr) = (observers[0].address().clone(), observers[1].address().clone());

    let listener = BusAdapter::new(Address::new("mem://listener"), hub.clone(), WireFormat::Envelope, 4096);
    for address in [a.address(), &b_addr, &c_addr] {
        listener.connect(address).await.unwrap();
    }
    let mut inbound = listener.take_inbound().await.unwrap();

    a.join(&ghost).await.unwrap();
    for observer in &observers {
        observer.join(a.address()).await.unwrap();
    }
    observers[0].join(&c_addr).await.unwrap();
    observers[1].join(&b_addr).await.unwrap();
    a.setup().await.unwrap();
    for observer in observers.iter_mut() {
        observer.setup().await.unwrap();
    }

    let original = next_tasks_from(&mut inbound, &[a.address()], TaskStatus::Pending)
        .await
        .remove(a.address())
        .expect("a never published its task");
    assert_eq!(original.priority_owner.as_ref(), Some(&ghost));
    // Only now does a listen to b and c, so the task stays aimed at the ghost.
    a.join(&b_addr).await.unwrap();
    a.join(&c_addr).await.unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || !ledger.lock().unwrap().is_empty()).await,
        "stale task never taken over"
    );
    let mut drained = false;
    for _ in 0..100 {
        if a.report().await.queue_len == Some(0) {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(drained, "originator kept the task queued");

    // Let completions cross, then ask both observers about the task again.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while inbound.try_recv().is_ok() {}
    let asker = BusAdapter::new(Address::new("mem://asker"), hub, WireFormat::Envelope, 16);
    asker.bind().await.unwrap();
    for observer in &observers {
        observer.join(asker.address()).await.unwrap();
    }
    let late_copy = Envelope::with_payload(asker.address(), "JSON", &TaskMessage { task: original.clone() }).unwrap();
    asker.broadcast(&late_copy).await.unwrap();

    let mut answers = next_tasks_from(&mut inbound, &[&b_addr, &c_addr], TaskStatus::Complete).await;
    let from_b = answers.remove(&b_addr).expect("b did not answer");
    let from_c = answers.remove(&c_addr).expect("c did not answer");
    assert_eq!(from_b.key(), original.key());
    assert_eq!(from_b, from_c, "observers kept different completions");

    a.teardown().await.unwrap();
    for observer in observers.iter_mut() {
        observer.teardown().await.unwrap();
    }

    let ledger = ledger.lock().unwrap();
    for executor in [&b_addr, &c_addr] {
        let runs = ledger
            .iter()
            .filter(|(key, who, _)| *key == original.key() && who == executor)
            .count();
        assert!(runs <= 1, "{executor} ran the task {runs} times");
    }
}
