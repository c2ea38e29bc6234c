//! In-memory collaborators for driving intake, worker and status query
//! without Postgres, Redis, S3 or a detection service.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use label_detect_jobs::db::{ensure_transition, JobStatusStore, StoreError};
use label_detect_jobs::models::job::{DetectionJob, JobStatus, JobTransition};
use label_detect_jobs::models::label::{BoundingBox, DetectorInstance, DetectorLabel};
use label_detect_jobs::services::detector::{DetectorError, ImageSource, LabelDetector};
use label_detect_jobs::services::intake::Intake;
use label_detect_jobs::services::queue::{Delivery, JobMessage, JobQueue, QueueError};
use label_detect_jobs::services::status::StatusQuery;
use label_detect_jobs::services::storage::{ArtifactStore, StorageError};
use label_detect_jobs::services::worker::{WorkOutcome, Worker};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const BUCKET: &str = "test-bucket";

// ── Artifact store ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryArtifactStore {
    objects: Mutex<HashMap<String, (Vec<u8>, String)>>,
    signed: AtomicUsize,
    pub fail_puts: AtomicBool,
    /// Hold back the first `processed/` write by this long.
    first_derived_put_delay: Mutex<Option<Duration>>,
}

impl MemoryArtifactStore {
    pub fn object(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data, "application/octet-stream".to_string()));
    }

    pub fn delay_first_derived_put(&self, delay: Duration) {
        *self.first_derived_put_delay.lock().unwrap() = Some(delay);
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn signed_count(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn store_ref(&self) -> &str {
        BUCKET
    }

    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                code: 503,
                key: key.to_string(),
            });
        }
        if key.starts_with("processed/") {
            let delay = self.first_derived_put_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.object(key)
            .map(|(data, _)| data)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn sign_read_url(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let n = self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(format!(
            "https://storage.test/{BUCKET}/{key}?expires={}&sig={n}",
            ttl.as_secs()
        ))
    }
}

// ── Job status store ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, DetectionJob>>,
    history: Mutex<Vec<(Uuid, JobStatus)>>,
    pub fail_creates: AtomicBool,
    pub fail_terminal_writes: AtomicBool,
}

impl MemoryJobStore {
    pub fn job(&self, job_id: Uuid) -> Option<DetectionJob> {
        self.jobs.lock().unwrap().get(&job_id).cloned()
    }

    /// Every status a job has held, in order.
    pub fn history(&self, job_id: Uuid) -> Vec<JobStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == job_id)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl JobStatusStore for MemoryJobStore {
    async fn create(&self, job: &DetectionJob) -> Result<(), StoreError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("status store offline".to_string()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.job_id) {
            return Err(StoreError::Duplicate(job.job_id));
        }
        jobs.insert(job.job_id, job.clone());
        self.history.lock().unwrap().push((job.job_id, job.status));
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<DetectionJob>, StoreError> {
        Ok(self.job(job_id))
    }

    async fn conditional_update(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        transition: &JobTransition,
    ) -> Result<bool, StoreError> {
        ensure_transition(expected, transition)?;
        if transition.target().is_terminal() && self.fail_terminal_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("status store offline".to_string()));
        }
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&job_id) {
            Some(job) if job.status == expected => {
                job.apply(transition);
                self.history.lock().unwrap().push((job_id, job.status));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// ── Queue ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<String>>,
    in_flight: Mutex<Vec<String>>,
    dead: Mutex<Vec<String>>,
    acked: AtomicUsize,
}

impl MemoryQueue {
    pub fn push_raw(&self, body: &str) {
        self.pending.lock().unwrap().push_back(body.to_string());
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().unwrap().iter().cloned().collect()
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.in_flight.lock().unwrap().clone()
    }

    pub fn dead(&self) -> Vec<String> {
        self.dead.lock().unwrap().clone()
    }

    /// Take everything still waiting, as if some other consumer had it.
    pub fn drain_pending(&self) -> Vec<String> {
        self.pending.lock().unwrap().drain(..).collect()
    }

    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    /// Simulate lease expiry: everything unacknowledged becomes visible again.
    pub fn expire_leases(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut pending = self.pending.lock().unwrap();
        for body in in_flight.drain(..) {
            pending.push_front(body);
        }
    }

    fn remove_in_flight(&self, body: &str) -> bool {
        let mut in_flight = self.in_flight.lock().unwrap();
        match in_flight.iter().position(|b| b == body) {
            Some(i) => {
                in_flight.remove(i);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, message: &JobMessage) -> Result<(), QueueError> {
        self.push_raw(&message.to_body()?);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let body = self.pending.lock().unwrap().pop_front();
        Ok(body.map(|body| {
            self.in_flight.lock().unwrap().push(body.clone());
            Delivery { body }
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if self.remove_in_flight(&delivery.body) {
            self.acked.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.remove_in_flight(&delivery.body);
        self.dead.lock().unwrap().push(delivery.body.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

// ── Detector ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum Behavior {
    Respond(Vec<DetectorLabel>),
    /// One answer per call, in order; the last one repeats.
    Sequence(Vec<Vec<DetectorLabel>>),
    Unavailable,
    Hang,
}

pub struct FakeDetector {
    behavior: Mutex<Behavior>,
    calls: Mutex<Vec<(String, String, i32, f64)>>,
}

impl FakeDetector {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// (store_ref, key, max_labels, min_confidence) per call.
    pub fn calls(&self) -> Vec<(String, String, i32, f64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LabelDetector for FakeDetector {
    async fn detect(
        &self,
        image: ImageSource<'_>,
        max_labels: i32,
        min_confidence: f64,
    ) -> Result<Vec<DetectorLabel>, DetectorError> {
        let (store_ref, key) = match image {
            ImageSource::Stored { store_ref, key } => (store_ref.to_string(), key.to_string()),
            ImageSource::Bytes(_) => (String::new(), String::new()),
        };
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((store_ref, key, max_labels, min_confidence));
            calls.len() - 1
        };

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Respond(labels) => Ok(labels),
            Behavior::Sequence(answers) => Ok(answers
                .get(call)
                .or(answers.last())
                .cloned()
                .unwrap_or_default()),
            Behavior::Unavailable => Err(DetectorError::Status(503)),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            }
        }
    }
}

// ── Wiring ───────────────────────────────────────────────────────────

pub struct Harness {
    pub store: Arc<MemoryArtifactStore>,
    pub jobs: Arc<MemoryJobStore>,
    pub queue: Arc<MemoryQueue>,
    pub detector: Arc<FakeDetector>,
    pub intake: Intake,
    pub worker: Worker,
    pub status: StatusQuery,
}

impl Harness {
    pub fn new(behavior: Behavior) -> Self {
        Self::with_timeout(behavior, Duration::from_secs(5))
    }

    pub fn with_timeout(behavior: Behavior, call_timeout: Duration) -> Self {
        let store = Arc::new(MemoryArtifactStore::default());
        let jobs = Arc::new(MemoryJobStore::default());
        let queue = Arc::new(MemoryQueue::default());
        let detector = Arc::new(FakeDetector::new(behavior));

        let intake = Intake::new(store.clone(), jobs.clone(), queue.clone());
        let worker = Worker::new(
            store.clone(),
            jobs.clone(),
            queue.clone(),
            detector.clone(),
            call_timeout,
        );
        let status = StatusQuery::new(store.clone(), jobs.clone(), Duration::from_secs(3600));

        Self {
            store,
            jobs,
            queue,
            detector,
            intake,
            worker,
            status,
        }
    }
}

impl Harness {
    /// Receive one message and hand it to the worker.
    pub async fn handle_next(&self) -> WorkOutcome {
        let delivery = self
            .queue
            .receive()
            .await
            .unwrap()
            .expect("queue is empty");
        self.worker.handle_delivery(&delivery).await.unwrap()
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

pub fn detection(name: &str, confidence: f64, boxes: &[(f64, f64, f64, f64)]) -> DetectorLabel {
    DetectorLabel {
        name: name.to_string(),
        confidence,
        instances: boxes
            .iter()
            .map(|&(l, t, w, h)| DetectorInstance {
                bounding_box: Some(BoundingBox::new(l, t, w, h)),
            })
            .collect(),
    }
}
