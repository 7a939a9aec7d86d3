//! In-memory [`JobClient`] for unit tests.

use crate::client::{ClientError, JobClient};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec, JobStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Create,
    List,
    Get,
    PatchMetadata,
    PatchStatus,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Calls {
    pub creates: usize,
    pub lists: usize,
    pub gets: usize,
    pub metadata_patches: usize,
    pub status_patches: usize,
}

type Jobs = BTreeMap<String, Job>;
type Hook = Box<dyn FnOnce(&mut Jobs) + Send>;

struct Injection {
    call: Call,
    remaining: usize,
    make: fn(&str) -> ClientError,
}

#[derive(Default)]
struct State {
    jobs: Jobs,
    log: Vec<Call>,
    injections: Vec<Injection>,
    hooks: Vec<(Call, Hook)>,
    next_version: u64,
}

impl State {
    fn record(&mut self, call: Call, name: &str) -> Result<(), ClientError> {
        self.log.push(call);
        let injected = self
            .injections
            .iter_mut()
            .find(|i| i.call == call && i.remaining > 0)
            .map(|i| {
                i.remaining -= 1;
                (i.make)(name)
            });
        match injected {
            Some(err) => {
                self.run_hooks(call);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn run_hooks(&mut self, call: Call) {
        let (ready, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.hooks).into_iter().partition(|(c, _)| *c == call);
        self.hooks = pending;
        for (_, hook) in ready {
            hook(&mut self.jobs);
        }
    }

    fn bump(&mut self, job: &mut Job) {
        self.next_version += 1;
        job.metadata.resource_version = Some(self.next_version.to_string());
    }

    /// Mirrors the API server's optimistic concurrency check.
    fn stored_for_patch(&mut self, name: &str, patch: &Job) -> Result<Job, ClientError> {
        let stored = self
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                job: name.to_string(),
            })?;
        if let Some(expected) = &patch.metadata.resource_version {
            if stored.metadata.resource_version.as_ref() != Some(expected) {
                return Err(conflict(name));
            }
        }
        Ok(stored)
    }
}

pub(crate) fn conflict(name: &str) -> ClientError {
    ClientError::Conflict {
        job: name.to_string(),
        message: "the object has been modified; please apply your changes to the latest version"
            .to_string(),
    }
}

pub(crate) fn not_found(name: &str) -> ClientError {
    ClientError::NotFound {
        job: name.to_string(),
    }
}

/// Stores jobs in a map and applies merge patches field by field.
///
/// Errors can be injected per call kind, and one-shot hooks simulate other
/// actors touching the store right after a given call.
pub(crate) struct FakeJobClient {
    state: Mutex<State>,
}

impl FakeJobClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn job(name: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn job_with_annotations(name: &str, annotations: &[(&str, &str)]) -> Job {
        let mut job = Self::job(name);
        job.metadata.annotations = Some(
            annotations
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        );
        job
    }

    pub fn labeled_job(name: &str, labels: &BTreeMap<String, String>) -> Job {
        let mut job = Self::job(name);
        job.metadata.labels = Some(labels.clone());
        job
    }

    pub fn insert(&self, mut job: Job) {
        let mut state = self.state.lock().unwrap();
        state.bump(&mut job);
        let name = job.metadata.name.clone().unwrap_or_default();
        state.jobs.insert(name, job);
    }

    pub fn stored(&self, name: &str) -> Job {
        self.state.lock().unwrap().jobs[name].clone()
    }

    pub fn annotations(&self, name: &str) -> BTreeMap<String, String> {
        self.stored(name).metadata.annotations.unwrap_or_default()
    }

    pub fn log(&self) -> Vec<Call> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn calls(&self) -> Calls {
        let mut calls = Calls::default();
        for call in self.log() {
            match call {
                Call::Create => calls.creates += 1,
                Call::List => calls.lists += 1,
                Call::Get => calls.gets += 1,
                Call::PatchMetadata => calls.metadata_patches += 1,
                Call::PatchStatus => calls.status_patches += 1,
            }
        }
        calls
    }

    pub fn inject(&self, call: Call, times: usize, make: fn(&str) -> ClientError) {
        self.state.lock().unwrap().injections.push(Injection {
            call,
            remaining: times,
            make,
        });
    }

    pub fn fail_metadata_patches_with_conflict(&self, times: usize) {
        self.inject(Call::PatchMetadata, times, conflict);
    }

    pub fn fail_status_patches_with_conflict(&self, times: usize) {
        self.inject(Call::PatchStatus, times, conflict);
    }

    /// Run `hook` against the store once, right after the next `call`.
    pub fn after(&self, call: Call, hook: impl FnOnce(&mut Jobs) + Send + 'static) {
        self.state.lock().unwrap().hooks.push((call, Box::new(hook)));
    }

    /// Hook body: job `name` finished on its own.
    pub fn finish(name: &str) -> impl FnOnce(&mut Jobs) + Send + 'static {
        let name = name.to_string();
        move |jobs: &mut Jobs| {
            if let Some(job) = jobs.get_mut(&name) {
                job.status.get_or_insert_with(JobStatus::default).succeeded = Some(1);
                let version = job
                    .metadata
                    .resource_version
                    .as_deref()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(0);
                job.metadata.resource_version = Some(format!("{}", version + 1000));
            }
        }
    }
}

#[async_trait]
impl JobClient for FakeJobClient {
    async fn create_job(&self, job: &Job) -> Result<Job, ClientError> {
        let mut state = self.state.lock().unwrap();
        let name = job.metadata.name.clone().unwrap_or_default();
        state.record(Call::Create, &name)?;
        let mut created = job.clone();
        state.bump(&mut created);
        state.jobs.insert(name, created.clone());
        state.run_hooks(Call::Create);
        Ok(created)
    }

    async fn list_jobs(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Job>, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::List, "")?;
        let matched = state
            .jobs
            .values()
            .filter(|job| {
                let labels = job.metadata.labels.clone().unwrap_or_default();
                selector.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .cloned()
            .collect();
        state.run_hooks(Call::List);
        Ok(matched)
    }

    async fn get_job(&self, name: &str) -> Result<Job, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::Get, name)?;
        let job = state.jobs.get(name).cloned().ok_or_else(|| not_found(name))?;
        state.run_hooks(Call::Get);
        Ok(job)
    }

    async fn patch_job_metadata(&self, name: &str, patch: &Job) -> Result<Job, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::PatchMetadata, name)?;
        let result = state.stored_for_patch(name, patch).map(|mut job| {
            if let Some(annotations) = &patch.metadata.annotations {
                job.metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .extend(annotations.clone());
            }
            if let Some(parallelism) = patch.spec.as_ref().and_then(|s| s.parallelism) {
                job.spec.get_or_insert_with(JobSpec::default).parallelism = Some(parallelism);
            }
            state.bump(&mut job);
            state.jobs.insert(name.to_string(), job.clone());
            job
        });
        state.run_hooks(Call::PatchMetadata);
        result
    }

    async fn patch_job_status(&self, name: &str, patch: &Job) -> Result<Job, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.record(Call::PatchStatus, name)?;
        let result = state.stored_for_patch(name, patch).map(|mut job| {
            if let Some(completion) = patch.status.as_ref().and_then(|s| s.completion_time.clone())
            {
                job.status.get_or_insert_with(JobStatus::default).completion_time =
                    Some(completion);
            }
            state.bump(&mut job);
            state.jobs.insert(name.to_string(), job.clone());
            job
        });
        state.run_hooks(Call::PatchStatus);
        result
    }
}
