// Probe Orchestrator: bounded concurrent inspection of a batch of addresses.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::Category;
use crate::config::ProbeConfig;
use crate::inspector::Inspector;
use crate::record::{AddressEntry, ClassificationRecord};

pub const TIMEOUT_REASON: &str = "time budget exceeded";
pub const CANCELLED_REASON: &str = "probe cancelled";

/// Lifecycle of a single address within a batch.
#[derive(Debug, Clone)]
pub enum ProbeEvent {
    /// A worker slot was acquired and probing began.
    Started { index: usize, name: String },
    /// The address has its record.
    Finished {
        index: usize,
        name: String,
        category: Category,
    },
}

/// A callback function for progress updates.
pub type OnProgress = Arc<dyn Fn(ProbeEvent) + Send + Sync>;

/// Signatures already claimed, mapped to the index of the claimant.
type Claims = Arc<Mutex<HashMap<String, usize>>>;

pub struct Orchestrator {
    config: Arc<ProbeConfig>,
    cancel: CancellationToken,
    on_progress: Option<OnProgress>,
}

impl Orchestrator {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
            on_progress: None,
        }
    }

    /// Stop the batch when `token` is cancelled. Unfinished addresses are
    /// still reported.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProbeEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe every entry and return exactly one record per entry, in input order.
    pub async fn run(&self, entries: Vec<AddressEntry>) -> Vec<ClassificationRecord> {
        let total = entries.len();
        let started = Instant::now();
        info!(
            addresses = total,
            concurrency = self.config.concurrency,
            item_timeout = ?self.config.item_timeout,
            "Starting probe batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let claims: Claims = Arc::new(Mutex::new(HashMap::new()));
        let inspector = Inspector::new(self.config.clone());

        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::with_capacity(total);

        for (position, entry) in entries.into_iter().enumerate() {
            let index = position + 1;
            let unit = Unit {
                index,
                entry: entry.clone(),
                inspector: inspector.clone(),
                semaphore: semaphore.clone(),
                cancel: self.cancel.clone(),
                claims: self.config.dedupe.then(|| claims.clone()),
                on_progress: self.on_progress.clone(),
                config: self.config.clone(),
            };
            let handle = tasks.spawn(unit.run());
            in_flight.insert(handle.id(), (index, entry));
        }

        let mut records = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, record)) => {
                    in_flight.remove(&id);
                    records.push(record);
                }
                Err(e) => {
                    // A panicking unit still owes its address a record.
                    if let Some((index, entry)) = in_flight.remove(&e.id()) {
                        warn!(index, url = %entry.url, error = %e, "Probe task failed");
                        let record =
                            ClassificationRecord::failed(index, &entry, format!("probe task failed: {e}"));
                        self.emit(ProbeEvent::Finished {
                            index,
                            name: entry.name.clone(),
                            category: record.category,
                        });
                        records.push(record);
                    }
                }
            }
        }

        records.sort_by_key(|record| record.index);
        if self.config.dedupe {
            settle_duplicates(&claims.lock(), &mut records);
        }
        info!(
            addresses = records.len(),
            elapsed = ?started.elapsed(),
            "Probe batch finished"
        );
        records
    }

    fn emit(&self, event: ProbeEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }
}

/// One address scheduled on the pool.
struct Unit {
    index: usize,
    entry: AddressEntry,
    inspector: Inspector,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    claims: Option<Claims>,
    on_progress: Option<OnProgress>,
    config: Arc<ProbeConfig>,
}

impl Unit {
    async fn run(self) -> ClassificationRecord {
        let mut record = self.probe().await;

        if let Some(claims) = &self.claims {
            claim_signature(claims, &mut record);
        }

        self.emit(ProbeEvent::Finished {
            index: self.index,
            name: self.entry.name.clone(),
            category: record.category,
        });
        record
    }

    async fn probe(&self) -> ClassificationRecord {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return ClassificationRecord::failed(self.index, &self.entry, CANCELLED_REASON);
        };

        self.emit(ProbeEvent::Started {
            index: self.index,
            name: self.entry.name.clone(),
        });

        // The budget starts once a worker slot is held.
        let budget = self.config.item_timeout;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(index = self.index, "Probe cancelled");
                ClassificationRecord::failed(self.index, &self.entry, CANCELLED_REASON)
            }
            outcome = tokio::time::timeout(budget, self.inspector.inspect(self.index, &self.entry)) => {
                match outcome {
                    Ok(record) => record,
                    Err(_) => {
                        warn!(index = self.index, url = %self.entry.url, ?budget, "Probe exceeded its time budget");
                        ClassificationRecord::failed(self.index, &self.entry, TIMEOUT_REASON)
                    }
                }
            }
        }
    }

    fn emit(&self, event: ProbeEvent) {
        if let Some(callback) = &self.on_progress {
            callback(event);
        }
    }
}

/// The lowest index to claim a playlist signature owns it; higher ones become duplicates.
///
/// Records that failed never claim, so a dead mirror cannot hide a live one.
/// A record that displaces a later owner leaves that owner to
/// [`settle_duplicates`], since it may already have been reported.
fn claim_signature(claims: &Mutex<HashMap<String, usize>>, record: &mut ClassificationRecord) {
    if record.category == Category::NotValid {
        return;
    }
    let Some(signature) = record.signature.clone() else {
        return;
    };

    let mut claims = claims.lock();
    match claims.entry(signature) {
        Entry::Occupied(mut owner) => {
            let current = *owner.get();
            if current < record.index {
                debug!(index = record.index, duplicate_of = current, "Duplicate playlist");
                record.mark_duplicate(current);
            } else if current > record.index {
                debug!(index = record.index, displaced = current, "Earlier entry takes over playlist signature");
                owner.insert(record.index);
            }
        }
        Entry::Vacant(slot) => {
            slot.insert(record.index);
        }
    }
}

/// Mark every record whose signature is owned by an earlier index.
fn settle_duplicates(claims: &HashMap<String, usize>, records: &mut [ClassificationRecord]) {
    for record in records {
        if matches!(record.category, Category::NotValid | Category::Duplicate) {
            continue;
        }
        let owner = record
            .signature
            .as_ref()
            .and_then(|signature| claims.get(signature))
            .copied()
            .filter(|owner| *owner < record.index);
        if let Some(owner) = owner {
            debug!(index = record.index, duplicate_of = owner, "Duplicate playlist");
            record.mark_duplicate(owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::validator::{TS_PACKET_SIZE, TS_SYNC_BYTE};

    fn ts_body() -> Vec<u8> {
        let mut data = vec![0u8; TS_PACKET_SIZE * 1000];
        for packet in data.chunks_mut(TS_PACKET_SIZE) {
            packet[0] = TS_SYNC_BYTE;
        }
        data
    }

    fn config() -> crate::ProbeConfigBuilder {
        ProbeConfig::builder()
            .with_retry_delay(Duration::from_millis(10))
            .with_system_proxy(false)
    }

    async fn mount(server: &MockServer, at: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn classifies_a_mixed_batch_in_input_order() {
        let server = MockServer::start().await;
        mount(&server, "/direct.ts", ResponseTemplate::new(200).set_body_bytes(ts_body())).await;
        mount(
            &server,
            "/loop.m3u8",
            ResponseTemplate::new(200)
                .set_body_string("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000\nloop.m3u8\n"),
        )
        .await;
        mount(
            &server,
            "/locked.m3u8",
            ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n#EXTINF:4.0,\nlocked0.ts\n",
            ),
        )
        .await;
        mount(
            &server,
            "/locked0.ts",
            ResponseTemplate::new(200).set_body_bytes(vec![0x5Au8; 4096]),
        )
        .await;

        let base = server.uri();
        let entries = vec![
            AddressEntry::new("Direct", format!("{base}/direct.ts")),
            AddressEntry::new("Loop", format!("{base}/loop.m3u8")),
            AddressEntry::new("Locked", format!("{base}/locked.m3u8")),
            AddressEntry::new("Gone", format!("{base}/gone.ts")),
        ];

        let records = Orchestrator::new(config().with_concurrency(2).build())
            .run(entries)
            .await;

        let summary: Vec<(usize, Category)> = records.iter().map(|r| (r.index, r.category)).collect();
        assert_eq!(
            summary,
            [
                (1, Category::Playable),
                (2, Category::NotValid),
                (3, Category::Encrypted),
                (4, Category::NotValid),
            ]
        );
        assert!(records[1].reason.contains("cycle"), "{}", records[1].reason);
        assert!(records[3].reason.contains("404"), "{}", records[3].reason);
    }

    #[tokio::test]
    async fn slow_address_times_out_without_delaying_siblings() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/slow.ts",
            ResponseTemplate::new(200)
                .set_body_bytes(ts_body())
                .set_delay(Duration::from_secs(10)),
        )
        .await;
        mount(&server, "/fast.ts", ResponseTemplate::new(200).set_body_bytes(ts_body())).await;

        let entries = vec![
            AddressEntry::new("Slow", format!("{}/slow.ts", server.uri())),
            AddressEntry::new("Fast", format!("{}/fast.ts", server.uri())),
        ];
        let config = config()
            .with_concurrency(2)
            .with_item_timeout(Duration::from_millis(500))
            .build();

        let started = Instant::now();
        let records = Orchestrator::new(config).run(entries).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(records[0].category, Category::NotValid);
        assert_eq!(records[0].reason, TIMEOUT_REASON);
        assert_eq!(records[1].category, Category::Playable);
    }

    #[tokio::test]
    async fn cancelled_batch_still_reports_every_address() {
        let token = CancellationToken::new();
        token.cancel();

        let entries = (1..=3)
            .map(|i| AddressEntry::new(format!("Channel {i}"), format!("http://127.0.0.1:9/{i}.ts")))
            .collect();
        let records = Orchestrator::new(config().build())
            .with_cancellation(token)
            .run(entries)
            .await;

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.reason == CANCELLED_REASON));
        assert_eq!(
            records.iter().map(|r| r.index).collect::<Vec<_>>(),
            [1, 2, 3]
        );
    }

    #[tokio::test]
    async fn identical_playlists_are_flagged_as_duplicates() {
        let server = MockServer::start().await;
        let local = format!("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\n{}/seg.ts\n", server.uri());
        mount(&server, "/a.m3u8", ResponseTemplate::new(200).set_body_string(local.clone())).await;
        mount(&server, "/b.m3u8", ResponseTemplate::new(200).set_body_string(local)).await;
        mount(&server, "/seg.ts", ResponseTemplate::new(200).set_body_bytes(ts_body())).await;

        let entries = vec![
            AddressEntry::new("A", format!("{}/a.m3u8", server.uri())),
            AddressEntry::new("B", format!("{}/b.m3u8", server.uri())),
        ];
        let config = config().with_concurrency(1).with_dedupe(true, 8).build();
        let records = Orchestrator::new(config).run(entries).await;

        assert_eq!(records[0].category, Category::Playable, "{}", records[0].reason);
        assert_eq!(records[1].category, Category::Duplicate);
        assert_eq!(records[1].reason, "duplicate of #1");
        assert_eq!(records[1].duplicate_of, Some(1));
    }

    #[tokio::test]
    async fn earliest_entry_owns_a_signature_even_when_it_finishes_last() {
        let server = MockServer::start().await;
        let local = format!("#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\n{}/seg.ts\n", server.uri());
        mount(
            &server,
            "/a.m3u8",
            ResponseTemplate::new(200)
                .set_body_string(local.clone())
                .set_delay(Duration::from_millis(800)),
        )
        .await;
        mount(&server, "/b.m3u8", ResponseTemplate::new(200).set_body_string(local)).await;
        mount(&server, "/seg.ts", ResponseTemplate::new(200).set_body_bytes(ts_body())).await;

        let entries = vec![
            AddressEntry::new("A", format!("{}/a.m3u8", server.uri())),
            AddressEntry::new("B", format!("{}/b.m3u8", server.uri())),
        ];
        let config = config().with_concurrency(2).with_dedupe(true, 8).build();
        let records = Orchestrator::new(config).run(entries).await;

        assert_eq!(records[0].category, Category::Playable, "{}", records[0].reason);
        assert_eq!(records[0].duplicate_of, None);
        assert_eq!(records[1].category, Category::Duplicate);
        assert_eq!(records[1].reason, "duplicate of #1");
        assert_eq!(records[1].duplicate_of, Some(1));
    }

    #[test]
    fn out_of_order_claims_settle_on_the_lowest_index() {
        let claims = Mutex::new(HashMap::new());
        let entry = AddressEntry::new("Mirror", "http://x.test/a.m3u8");
        let live = |index: usize| {
            let mut record = ClassificationRecord::failed(index, &entry, "");
            record.category = Category::Playable;
            record.signature = Some("abc".to_string());
            record
        };

        let mut third = live(3);
        let mut first = live(1);
        let mut second = live(2);
        claim_signature(&claims, &mut third);
        claim_signature(&claims, &mut first);
        claim_signature(&claims, &mut second);
        assert_eq!(claims.lock().get("abc"), Some(&1));
        assert_eq!(second.duplicate_of, Some(1));
        assert_eq!(third.category, Category::Playable);

        let mut records = vec![first, second, third];
        settle_duplicates(&claims.lock(), &mut records);
        assert_eq!(records[0].category, Category::Playable);
        assert_eq!(records[1].duplicate_of, Some(1));
        assert_eq!(records[2].category, Category::Duplicate);
        assert_eq!(records[2].reason, "duplicate of #1");
    }

    #[tokio::test]
    async fn progress_events_cover_every_address() {
        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        let token = CancellationToken::new();
        token.cancel();

        let entries = vec![
            AddressEntry::new("One", "http://127.0.0.1:9/1.ts"),
            AddressEntry::new("Two", "not a url"),
        ];
        let records = Orchestrator::new(config().build())
            .with_cancellation(token)
            .with_progress(move |event| {
                if let ProbeEvent::Finished { .. } = event {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .run(entries)
            .await;

        assert_eq!(records.len(), 2);
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_records_never_claim_signatures() {
        let claims = Mutex::new(HashMap::new());
        let entry = AddressEntry::new("Dead", "http://x.test/a.m3u8");

        let mut dead = ClassificationRecord::failed(1, &entry, "no valid segments (0/1 attempted)");
        dead.signature = Some("abc".to_string());
        claim_signature(&claims, &mut dead);
        assert!(claims.lock().is_empty());

        let mut live = ClassificationRecord::failed(2, &entry, "");
        live.category = Category::Playable;
        live.signature = Some("abc".to_string());
        claim_signature(&claims, &mut live);
        assert_eq!(claims.lock().get("abc"), Some(&2));
    }
}
