use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

/// Where committed bookings live. All mutation goes through the booking guard,
/// which serializes calls per `(staff, date)`.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings for the staff member on that date whose status occupies time.
    async fn list_occupying(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<ExistingBooking>, EngineError>;

    async fn insert(&self, booking: NewBooking) -> Result<Ulid, EngineError>;

    async fn get(&self, id: Ulid) -> Result<Option<ExistingBooking>, EngineError>;

    async fn set_status(&self, id: Ulid, status: BookingStatus) -> Result<(), EngineError>;
}

// ── Ledger writer task ───────────────────────────────────

/// Most records committed by a single fsync.
const MAX_BATCH: usize = 512;

type Reply<T> = oneshot::Sender<T>;

enum Job {
    Record(Event, Reply<io::Result<()>>),
    Rewrite(Vec<Event>, Reply<io::Result<()>>),
    AppendCount(Reply<u64>),
}

/// Sole owner of the ledger file. Records that queue up while one fsync is
/// running are committed together by the next.
struct LedgerWriter {
    wal: Wal,
    jobs: mpsc::Receiver<Job>,
}

impl LedgerWriter {
    async fn run(mut self) {
        let mut held = None;
        loop {
            let job = match held.take() {
                Some(job) => job,
                None => match self.jobs.recv().await {
                    Some(job) => job,
                    None => break,
                },
            };
            match job {
                Job::Record(event, reply) => {
                    let mut batch = vec![(event, reply)];
                    while batch.len() < MAX_BATCH {
                        match self.jobs.try_recv() {
                            Ok(Job::Record(event, reply)) => batch.push((event, reply)),
                            Ok(other) => {
                                held = Some(other);
                                break;
                            }
                            Err(_) => break,
                        }
                    }
                    self.commit(batch);
                }
                Job::Rewrite(events, reply) => {
                    let result = Wal::write_snapshot(self.wal.path(), &events)
                        .and_then(|()| self.wal.install_snapshot());
                    let _ = reply.send(result);
                }
                Job::AppendCount(reply) => {
                    let _ = reply.send(self.wal.appends_since_compact());
                }
            }
        }
        tracing::debug!("ledger writer stopped");
    }

    fn commit(&mut self, batch: Vec<(Event, Reply<io::Result<()>>)>) {
        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();

        let outcome = self.wal.commit(batch.iter().map(|(event, _)| event));

        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if let Err(e) = &outcome {
            tracing::error!("ledger commit of {} records failed: {e}", batch.len());
        }
        for (_, reply) in batch {
            let _ = reply.send(match &outcome {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }
    }
}

fn writer_gone() -> EngineError {
    EngineError::Persistence("ledger writer is not running".into())
}

// ── Ledger store ─────────────────────────────────────────

/// In-memory day ledgers made durable by a WAL. Every mutation is appended and
/// fsynced before it becomes visible, so a failed write leaves no trace.
pub struct LedgerStore {
    /// Every booking of one staff member on one date, sorted by start.
    days: DashMap<DayKey, Vec<ExistingBooking>>,
    /// Reverse lookup: booking id → day ledger.
    index: DashMap<Ulid, DayKey>,
    writer: mpsc::Sender<Job>,
    /// Held shared from a record's fsync until it is applied in memory, and
    /// exclusively while compaction snapshots memory.
    commit_gate: RwLock<()>,
}

impl LedgerStore {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::open(wal_path)?;
        let (writer, jobs) = mpsc::channel(4096);
        tokio::spawn(LedgerWriter { wal, jobs }.run());

        let store = Self {
            days: DashMap::new(),
            index: DashMap::new(),
            writer,
            commit_gate: RwLock::new(()),
        };
        for event in &events {
            store.apply(event);
        }
        tracing::info!(
            "ledger replayed {} events, {} bookings",
            events.len(),
            store.index.len()
        );
        Ok(store)
    }

    pub fn wal_path_in(data_dir: &Path) -> PathBuf {
        data_dir.join("bookings.wal")
    }

    fn apply(&self, event: &Event) {
        match event {
            Event::BookingCreated { booking } => {
                let key = booking.day_key();
                let mut day = self.days.entry(key).or_default();
                let pos = day.partition_point(|b| b.start <= booking.start);
                day.insert(pos, booking.clone());
                self.index.insert(booking.id, key);
            }
            Event::StatusChanged { id, status } => {
                let Some(key) = self.index.get(id).map(|e| *e.value()) else {
                    return;
                };
                if let Some(mut day) = self.days.get_mut(&key)
                    && let Some(b) = day.iter_mut().find(|b| b.id == *id)
                {
                    b.status = *status;
                }
            }
        }
    }

    /// Hand a job to the writer task and wait for its answer.
    async fn submit<T>(&self, job: impl FnOnce(Reply<T>) -> Job) -> Result<T, EngineError> {
        let (reply, answer) = oneshot::channel();
        self.writer.send(job(reply)).await.map_err(|_| writer_gone())?;
        answer.await.map_err(|_| writer_gone())
    }

    /// Durably append `event`. Returns once it is fsynced.
    async fn record(&self, event: Event) -> Result<(), EngineError> {
        self.submit(|reply| Job::Record(event, reply))
            .await?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    /// Make `event` durable, then visible. Compaction cannot snapshot memory
    /// between the two steps.
    async fn commit(&self, event: Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.record(event.clone()).await?;
        self.apply(&event);
        Ok(())
    }

    pub fn booking_count(&self) -> usize {
        self.index.len()
    }

    /// Every booking for the day regardless of status, sorted by start.
    pub fn day_bookings(&self, staff_id: Ulid, date: NaiveDate) -> Vec<ExistingBooking> {
        self.days
            .get(&(staff_id, date))
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    /// Rewrite the WAL as one `BookingCreated` per booking with its current status.
    pub async fn compact(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events: Vec<Event> = self
            .days
            .iter()
            .flat_map(|day| {
                day.value()
                    .iter()
                    .map(|b| Event::BookingCreated { booking: b.clone() })
                    .collect::<Vec<_>>()
            })
            .collect();
        // Deterministic file contents across runs.
        events.sort_by_key(|e| match e {
            Event::BookingCreated { booking } => booking.id,
            Event::StatusChanged { id, .. } => *id,
        });

        self.submit(|reply| Job::Rewrite(events, reply))
            .await?
            .map_err(|e| EngineError::Persistence(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.submit(Job::AppendCount).await.unwrap_or(0)
    }
}

#[async_trait]
impl BookingStore for LedgerStore {
    async fn list_occupying(
        &self,
        staff_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<ExistingBooking>, EngineError> {
        Ok(self
            .days
            .get(&(staff_id, date))
            .map(|day| {
                day.value()
                    .iter()
                    .filter(|b| b.status.occupies())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, booking: NewBooking) -> Result<Ulid, EngineError> {
        let record = ExistingBooking {
            id: Ulid::new(),
            staff_id: booking.staff_id,
            date: booking.date,
            start: booking.start,
            duration_minutes: Some(booking.duration_minutes),
            status: booking.status,
            service_id: booking.service_id,
            label: booking.label,
        };
        let id = record.id;
        let event = Event::BookingCreated { booking: record };
        self.commit(event).await?;
        Ok(id)
    }

    async fn get(&self, id: Ulid) -> Result<Option<ExistingBooking>, EngineError> {
        let Some(key) = self.index.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        Ok(self
            .days
            .get(&key)
            .and_then(|day| day.value().iter().find(|b| b.id == id).cloned()))
    }

    async fn set_status(&self, id: Ulid, status: BookingStatus) -> Result<(), EngineError> {
        if !self.index.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::StatusChanged { id, status };
        self.commit(event).await?;
        Ok(())
    }
}
