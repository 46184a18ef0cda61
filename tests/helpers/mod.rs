//! Test doubles for the transport and collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use restyle_orchestrator::models::job::{Job, StyleId};
use restyle_orchestrator::models::remote::{
    ImagePayload, RemoteStatus, StageParams, StatusReport, UploadResponse,
};
use restyle_orchestrator::services::collaborators::{
    Notifier, RestyleRecord, ResultStore, StoreError,
};
use restyle_orchestrator::services::orchestrator::{JobOrchestrator, OrchestratorSettings};
use restyle_orchestrator::services::transport::{Transport, TransportError};

/// Transport that replays scripted responses and counts every call.
///
/// When a script runs out, uploads succeed with a fresh job id, status checks
/// report `processing` and triggers succeed.
#[derive(Default)]
pub struct ScriptedTransport {
    uploads: Mutex<VecDeque<Result<UploadResponse, TransportError>>>,
    statuses: Mutex<VecDeque<Result<StatusReport, TransportError>>>,
    triggers: Mutex<VecDeque<Result<(), TransportError>>>,
    triggered: Mutex<Vec<(String, String)>>,
    upload_calls: AtomicUsize,
    status_calls: AtomicUsize,
    trigger_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_upload(&self, result: Result<UploadResponse, TransportError>) {
        self.uploads.lock().unwrap().push_back(result);
    }

    pub fn push_job(&self, job_id: &str) {
        self.push_upload(Ok(UploadResponse {
            job_id: job_id.to_string(),
            status: RemoteStatus::Processing,
        }));
    }

    pub fn push_status(&self, report: StatusReport) {
        self.statuses.lock().unwrap().push_back(Ok(report));
    }

    pub fn push_statuses<I: IntoIterator<Item = StatusReport>>(&self, reports: I) {
        let mut statuses = self.statuses.lock().unwrap();
        statuses.extend(reports.into_iter().map(Ok));
    }

    pub fn push_status_error(&self, error: TransportError) {
        self.statuses.lock().unwrap().push_back(Err(error));
    }

    pub fn push_trigger(&self, result: Result<(), TransportError>) {
        self.triggers.lock().unwrap().push_back(result);
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn trigger_calls(&self) -> usize {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    /// `(job_id, style_id)` of every trigger request.
    pub fn triggered(&self) -> Vec<(String, String)> {
        self.triggered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn upload(
        &self,
        _image: &ImagePayload,
        _params: &StageParams,
    ) -> Result<UploadResponse, TransportError> {
        let call = self.upload_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.uploads.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(UploadResponse {
                job_id: format!("J{}", call),
                status: RemoteStatus::Processing,
            })
        })
    }

    async fn check_status(&self, _job_id: &str) -> Result<StatusReport, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusReport::new(RemoteStatus::Processing)))
    }

    async fn trigger_second_stage(
        &self,
        job_id: &str,
        style: &StyleId,
    ) -> Result<(), TransportError> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        self.triggered
            .lock()
            .unwrap()
            .push((job_id.to_string(), style.to_string()));
        self.triggers.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Notifier that records every completed job.
#[derive(Default)]
pub struct RecordingNotifier {
    completed: Mutex<Vec<Job>>,
}

impl RecordingNotifier {
    pub fn completed(&self) -> Vec<Job> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn job_completed(&self, job: &Job) {
        self.completed.lock().unwrap().push(job.clone());
    }
}

/// Store whose writes always fail.
#[derive(Default)]
pub struct FailingStore {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl ResultStore for FailingStore {
    async fn save(&self, record: &RestyleRecord) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Invalid(format!("disk full while saving {}", record.job_id)))
    }

    async fn load(&self, _job_id: &str) -> Result<Option<RestyleRecord>, StoreError> {
        Ok(None)
    }

    async fn update(&self, record: &RestyleRecord) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Invalid(format!("disk full while updating {}", record.job_id)))
    }

    async fn delete(&self, _job_id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

pub fn orchestrator(
    transport: &Arc<ScriptedTransport>,
    settings: OrchestratorSettings,
) -> JobOrchestrator {
    JobOrchestrator::new(transport.clone(), settings)
}

pub fn style(id: &str) -> StyleId {
    StyleId::parse(id).expect("valid style id")
}
