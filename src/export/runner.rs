//! Background genotype matrix export.
//!
//! A job is registered as running before anything is read, then handed to a
//! detached task. Admission is bounded: at most `max_pending` jobs may be
//! queued or running, and at most `max_running` of them hold a worker slot.
//! Within a job, markers are pulled in chunks sized by [`ChunkSizer`] and rows
//! are written in marker order.

use super::{
    ChunkSizer, ExportJob, ExportJobRegistry, ExportRequest, GenotypeDecoder, PhaseState,
};
use crate::auth::{Credential, JobIdIssuer};
use crate::storage::{GenotypeStore, SampleId, VariantGenotypes, VariantRun};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;

/// First header cell of an exported matrix; sample ids follow.
pub const MATRIX_HEADER: &str = "markerprofileDbIds";

#[derive(Debug, Clone, Copy)]
pub struct RunnerLimits {
    pub max_running: usize,
    pub max_pending: usize,
}

impl Default for RunnerLimits {
    fn default() -> Self {
        Self {
            max_running: 4,
            max_pending: 16,
        }
    }
}

#[derive(Clone)]
pub struct ExportJobRunner {
    store: Arc<dyn GenotypeStore>,
    registry: Arc<ExportJobRegistry>,
    issuer: Arc<JobIdIssuer>,
    sizer: ChunkSizer,
    export_dir: PathBuf,
    pending: Arc<Semaphore>,
    running: Arc<Semaphore>,
    limits: RunnerLimits,
}

impl ExportJobRunner {
    pub fn new(
        store: Arc<dyn GenotypeStore>,
        registry: Arc<ExportJobRegistry>,
        issuer: Arc<JobIdIssuer>,
        sizer: ChunkSizer,
        export_dir: PathBuf,
        limits: RunnerLimits,
    ) -> Self {
        let max_running = limits.max_running.max(1);
        let max_pending = limits.max_pending.max(max_running);
        Self {
            store,
            registry,
            issuer,
            sizer,
            export_dir,
            pending: Arc::new(Semaphore::new(max_pending)),
            running: Arc::new(Semaphore::new(max_running)),
            limits: RunnerLimits {
                max_running,
                max_pending,
            },
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn registry(&self) -> &Arc<ExportJobRegistry> {
        &self.registry
    }

    pub fn artifact_file_name(job_id: &str) -> String {
        format!("{}.tsv", job_id)
    }

    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        self.export_dir.join(Self::artifact_file_name(job_id))
    }

    /// Registers a new job and returns its id without waiting for any data.
    pub async fn start(&self, credential: &Credential, request: ExportRequest) -> Result<String> {
        if request.sample_ids.is_empty() {
            return Err(Error::BadRequest("no samples requested".to_string()));
        }
        if !self.store.dataset_exists(&request.dataset).await? {
            return Err(Error::NotFound(format!("dataset {}", request.dataset)));
        }

        let permit = self
            .pending
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::ExportCapacity(self.limits.max_pending))?;

        let job_id = self.issuer.issue(&request.dataset, credential.as_str());
        self.registry
            .register(ExportJob::new(&job_id, &request.dataset))
            .await?;

        tracing::info!(
            "export {} accepted: {} samples of {}",
            job_id,
            request.sample_ids.len(),
            request.dataset
        );

        let runner = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            let _permit = permit;
            runner.supervise(id, request).await;
        });

        Ok(job_id)
    }

    /// Looks up a job on behalf of the caller that started it.
    pub async fn poll(
        &self,
        credential: &Credential,
        dataset: &str,
        job_id: &str,
    ) -> Result<ExportJob> {
        if !self.issuer.owns(job_id, dataset, credential.as_str()) {
            return Err(Error::Unauthorized(format!(
                "job {} belongs to another caller",
                job_id
            )));
        }
        self.registry
            .get(job_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("export job {}", job_id)))
    }

    async fn supervise(self, job_id: String, request: ExportRequest) {
        let started = Instant::now();
        let worker = self.clone();
        let id = job_id.clone();
        let outcome = tokio::spawn(async move { worker.run(&id, &request).await }).await;

        match outcome {
            Ok(Ok(artifact)) => {
                tracing::info!(
                    "export {} complete in {:.3}s",
                    job_id,
                    started.elapsed().as_secs_f64()
                );
                self.registry.mark_complete(&job_id, artifact).await;
            }
            Ok(Err(e)) => {
                tracing::error!("export {} failed: {}", job_id, e);
                self.registry
                    .mark_failed(&job_id, format!("error writing allele matrix: {}", e))
                    .await;
            }
            Err(e) => {
                tracing::error!("export {} worker aborted: {}", job_id, e);
                self.registry
                    .mark_failed(&job_id, "export worker aborted unexpectedly")
                    .await;
            }
        }
    }

    async fn run(&self, job_id: &str, request: &ExportRequest) -> Result<PathBuf> {
        let _slot = self
            .running
            .acquire()
            .await
            .map_err(|_| Error::Internal("export workers shut down".to_string()))?;

        let mut sample_ids = request.sample_ids.clone();
        sample_ids.sort_unstable();
        sample_ids.dedup();
        self.store.samples(&request.dataset, &sample_ids).await?;

        let markers = match &request.marker_ids {
            Some(ids) => ids.clone(),
            None => self.store.variant_keys(&request.dataset).await?,
        };

        fs::create_dir_all(&self.export_dir).await?;
        let artifact = self.artifact_path(job_id);
        let partial = artifact.with_extension("tsv.part");

        let written = self
            .write_matrix(job_id, request, &sample_ids, &markers, &partial)
            .await;
        if let Err(e) = written {
            if let Err(rm) = fs::remove_file(&partial).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("unable to delete {}: {}", partial.display(), rm);
                }
            }
            return Err(e);
        }

        fs::rename(&partial, &artifact).await?;
        Ok(artifact)
    }

    async fn write_matrix(
        &self,
        job_id: &str,
        request: &ExportRequest,
        sample_ids: &[SampleId],
        markers: &[String],
        path: &Path,
    ) -> Result<()> {
        let total = markers.len() as u64;
        let avg_bytes = self.store.avg_record_bytes(&request.dataset).await?;
        let chunk_size =
            usize::try_from(self.sizer.chunk_size(avg_bytes, total)).unwrap_or(usize::MAX);
        tracing::debug!(
            "export {}: {} markers in chunks of {}",
            job_id,
            total,
            chunk_size
        );

        let mut out = BufWriter::new(fs::File::create(path).await?);
        out.write_all(header_line(sample_ids).as_bytes()).await?;

        let decoder = GenotypeDecoder::new(request.options.clone());
        let mut phase = PhaseState::new();
        let mut processed = 0u64;

        for batch in markers.chunks(chunk_size) {
            let genotypes = self
                .store
                .genotypes(&request.dataset, batch, sample_ids)
                .await?;
            for variant in &genotypes {
                for run in &variant.runs {
                    let line = matrix_row(&decoder, &mut phase, variant, run, sample_ids)?;
                    out.write_all(line.as_bytes()).await?;
                }
            }

            processed += batch.len() as u64;
            let percent = (processed * 100 / total) as u8;
            self.registry.update_progress(job_id, percent).await;
        }

        out.flush().await?;
        out.into_inner().sync_all().await?;
        Ok(())
    }
}

fn header_line(sample_ids: &[SampleId]) -> String {
    let mut line = String::from(MATRIX_HEADER);
    for id in sample_ids {
        line.push('\t');
        line.push_str(&id.to_string());
    }
    line.push('\n');
    line
}

/// One tab-separated line: the marker id then one genotype per sample.
/// A sample without a call in this run gets an empty field.
fn matrix_row(
    decoder: &GenotypeDecoder,
    phase: &mut PhaseState,
    variant: &VariantGenotypes,
    run: &VariantRun,
    sample_ids: &[SampleId],
) -> Result<String> {
    let mut line = variant.variant.id.clone();
    for sample in sample_ids {
        line.push('\t');
        if let Some(call) = run.calls.get(sample) {
            let field = decoder.decode_call(phase, *sample, call, &variant.variant.alleles)?;
            line.push_str(&field);
        }
    }
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{DecodeOptions, JobState};
    use crate::storage::{
        DatasetDocument, LocalStore, Sample, SampleGenotype, Variant, VariantFilter,
        VariantQuery,
    };
    use async_trait::async_trait;
    use std::time::Duration;

    fn call(code: &str, tag: Option<&str>) -> SampleGenotype {
        SampleGenotype {
            code: code.to_string(),
            phase_group: tag.map(str::to_string),
        }
    }

    fn dataset(markers: usize, samples: &[SampleId]) -> DatasetDocument {
        let variants: Vec<Variant> = (0..markers)
            .map(|i| Variant {
                id: format!("m{}", i),
                position: None,
                alleles: vec!["A".to_string(), "T".to_string()],
            })
            .collect();
        let runs = variants
            .iter()
            .map(|v| VariantRun {
                variant_id: v.id.clone(),
                project_id: 1,
                run: "run1".to_string(),
                calls: samples.iter().map(|s| (*s, call("0/1", None))).collect(),
            })
            .collect();
        DatasetDocument {
            variants,
            samples: samples
                .iter()
                .map(|id| Sample {
                    id: *id,
                    project_id: 1,
                    individual: format!("ind{}", id),
                })
                .collect(),
            runs,
        }
    }

    fn runner_for(
        store: Arc<dyn GenotypeStore>,
        dir: &Path,
        limits: RunnerLimits,
    ) -> ExportJobRunner {
        ExportJobRunner::new(
            store,
            Arc::new(ExportJobRegistry::new()),
            Arc::new(JobIdIssuer::new(b"secret".to_vec())),
            ChunkSizer::new(1),
            dir.to_path_buf(),
            limits,
        )
    }

    fn request(samples: Vec<SampleId>, markers: Option<Vec<&str>>) -> ExportRequest {
        ExportRequest {
            dataset: "db".to_string(),
            sample_ids: samples,
            marker_ids: markers.map(|m| m.into_iter().map(str::to_string).collect()),
            options: DecodeOptions::default(),
        }
    }

    async fn wait_finished(runner: &ExportJobRunner, id: &str) -> ExportJob {
        for _ in 0..500 {
            let job = runner.registry().get(id).await.unwrap();
            if job.state != JobState::Running {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("export {} did not finish", id);
    }

    #[tokio::test]
    async fn test_export_writes_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new().with_dataset("db", dataset(5, &[3, 1, 2])));
        let runner = runner_for(store, dir.path(), RunnerLimits::default());

        let id = runner
            .start(&Credential::anonymous(), request(vec![3, 1, 2], None))
            .await
            .unwrap();
        let job = wait_finished(&runner, &id).await;

        assert_eq!(job.state, JobState::Complete);
        assert_eq!(job.percent_complete, 100);
        let content = std::fs::read_to_string(job.artifact.unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], "markerprofileDbIds\t1\t2\t3");
        assert_eq!(lines[1], "m0\tA/T\tA/T\tA/T");
        assert!(!dir.path().join(format!("{}.tsv.part", id)).exists());
    }

    #[tokio::test]
    async fn test_rows_follow_requested_marker_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new().with_dataset("db", dataset(4, &[1])));
        let runner = runner_for(store, dir.path(), RunnerLimits::default());

        let id = runner
            .start(
                &Credential::anonymous(),
                request(vec![1], Some(vec!["m3", "m0", "m2"])),
            )
            .await
            .unwrap();
        let job = wait_finished(&runner, &id).await;

        let content = std::fs::read_to_string(job.artifact.unwrap()).unwrap();
        let markers: Vec<&str> = content
            .lines()
            .skip(1)
            .map(|l| l.split('\t').next().unwrap())
            .collect();
        assert_eq!(markers, vec!["m3", "m0", "m2"]);
    }

    #[tokio::test]
    async fn test_phase_carried_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = dataset(3, &[1, 2]);
        let tags = [Some("a"), Some("a"), Some("b")];
        for (run, tag) in doc.runs.iter_mut().zip(tags) {
            run.calls.insert(1, call("0/1", tag));
        }
        doc.runs[2].calls.remove(&2);
        let store = Arc::new(LocalStore::new().with_dataset("db", doc));
        let runner = runner_for(store, dir.path(), RunnerLimits::default());

        let id = runner
            .start(&Credential::anonymous(), request(vec![1, 2], None))
            .await
            .unwrap();
        let job = wait_finished(&runner, &id).await;

        let content = std::fs::read_to_string(job.artifact.unwrap()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1], "m0\tA/T\tA/T");
        assert_eq!(lines[2], "m1\tA|T\tA/T");
        assert_eq!(lines[3], "m2\tA/T\t");
    }

    #[tokio::test]
    async fn test_unknown_marker_fails_without_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new().with_dataset("db", dataset(2, &[1])));
        let runner = runner_for(store, dir.path(), RunnerLimits::default());

        let id = runner
            .start(&Credential::anonymous(), request(vec![1], Some(vec!["m0", "nope"])))
            .await
            .unwrap();
        let job = wait_finished(&runner, &id).await;

        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().contains("nope"));
        assert!(job.artifact.is_none());
        assert!(!runner.artifact_path(&id).exists());
        assert!(!dir.path().join(format!("{}.tsv.part", id)).exists());
    }

    #[tokio::test]
    async fn test_start_validates_request() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new().with_dataset("db", dataset(1, &[1])));
        let runner = runner_for(store, dir.path(), RunnerLimits::default());

        assert!(matches!(
            runner.start(&Credential::anonymous(), request(vec![], None)).await,
            Err(Error::BadRequest(_))
        ));
        let mut missing = request(vec![1], None);
        missing.dataset = "other".to_string();
        assert!(matches!(
            runner.start(&Credential::anonymous(), missing).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(runner.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_poll_requires_same_credential() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::new().with_dataset("db", dataset(1, &[1])));
        let runner = runner_for(store, dir.path(), RunnerLimits::default());
        let owner = Credential::bearer("alice");

        let id = runner.start(&owner, request(vec![1], None)).await.unwrap();

        assert!(runner.poll(&owner, "db", &id).await.is_ok());
        assert!(matches!(
            runner.poll(&Credential::bearer("bob"), "db", &id).await,
            Err(Error::Unauthorized(_))
        ));
    }

    /// Store whose genotype retrievals each wait for one released permit.
    struct GatedStore {
        inner: LocalStore,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl GenotypeStore for GatedStore {
        async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
            self.inner.dataset_exists(dataset).await
        }

        async fn find_variants(&self, dataset: &str, query: &VariantQuery) -> Result<Vec<Variant>> {
            self.inner.find_variants(dataset, query).await
        }

        async fn count_variants(&self, dataset: &str, filter: &VariantFilter) -> Result<u64> {
            self.inner.count_variants(dataset, filter).await
        }

        async fn variant_keys(&self, dataset: &str) -> Result<Vec<String>> {
            self.inner.variant_keys(dataset).await
        }

        async fn samples(&self, dataset: &str, ids: &[SampleId]) -> Result<Vec<Sample>> {
            self.inner.samples(dataset, ids).await
        }

        async fn genotypes(
            &self,
            dataset: &str,
            variant_ids: &[String],
            samples: &[SampleId],
        ) -> Result<Vec<VariantGenotypes>> {
            self.gate
                .acquire()
                .await
                .map_err(|_| Error::TransientStorage("gate closed".to_string()))?
                .forget();
            self.inner.genotypes(dataset, variant_ids, samples).await
        }

        async fn avg_record_bytes(&self, dataset: &str) -> Result<u64> {
            self.inner.avg_record_bytes(dataset).await
        }
    }

    #[tokio::test]
    async fn test_admission_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(GatedStore {
            inner: LocalStore::new().with_dataset("db", dataset(1, &[1])),
            gate: gate.clone(),
        });
        let limits = RunnerLimits {
            max_running: 1,
            max_pending: 2,
        };
        let runner = runner_for(store, dir.path(), limits);
        let caller = Credential::anonymous();

        let first = runner.start(&caller, request(vec![1], None)).await.unwrap();
        let second = runner.start(&caller, request(vec![1], None)).await.unwrap();
        assert!(matches!(
            runner.start(&caller, request(vec![1], None)).await,
            Err(Error::ExportCapacity(2))
        ));
        assert_eq!(runner.registry().len().await, 2);

        gate.add_permits(10);
        assert_eq!(wait_finished(&runner, &first).await.state, JobState::Complete);
        assert_eq!(wait_finished(&runner, &second).await.state, JobState::Complete);

        // Permits are released once jobs finish.
        for _ in 0..100 {
            if runner.pending.available_permits() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let third = runner.start(&caller, request(vec![1], None)).await.unwrap();
        assert_eq!(wait_finished(&runner, &third).await.state, JobState::Complete);
    }

    #[tokio::test]
    async fn test_progress_reported_per_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let store = Arc::new(GatedStore {
            inner: LocalStore::new().with_dataset("db", dataset(4, &[1])),
            gate: gate.clone(),
        });
        let runner = runner_for(store, dir.path(), RunnerLimits::default());

        let id = runner
            .start(&Credential::anonymous(), request(vec![1], None))
            .await
            .unwrap();
        assert_eq!(runner.registry().get(&id).await.unwrap().percent_complete, 0);

        for expected in [25, 50, 75] {
            gate.add_permits(1);
            let mut job = runner.registry().get(&id).await.unwrap();
            for _ in 0..500 {
                if job.percent_complete >= expected {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
                job = runner.registry().get(&id).await.unwrap();
            }
            assert_eq!(job.percent_complete, expected);
            assert_eq!(job.state, JobState::Running);
        }

        gate.add_permits(1);
        let job = wait_finished(&runner, &id).await;
        assert_eq!(job.state, JobState::Complete);
        assert_eq!(job.percent_complete, 100);
    }

    /// Store that fails every genotype retrieval.
    struct BrokenStore(LocalStore);

    #[async_trait]
    impl GenotypeStore for BrokenStore {
        async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
            self.0.dataset_exists(dataset).await
        }

        async fn find_variants(&self, dataset: &str, query: &VariantQuery) -> Result<Vec<Variant>> {
            self.0.find_variants(dataset, query).await
        }

        async fn count_variants(&self, dataset: &str, filter: &VariantFilter) -> Result<u64> {
            self.0.count_variants(dataset, filter).await
        }

        async fn variant_keys(&self, dataset: &str) -> Result<Vec<String>> {
            self.0.variant_keys(dataset).await
        }

        async fn samples(&self, dataset: &str, ids: &[SampleId]) -> Result<Vec<Sample>> {
            self.0.samples(dataset, ids).await
        }

        async fn genotypes(
            &self,
            _dataset: &str,
            _variant_ids: &[String],
            _samples: &[SampleId],
        ) -> Result<Vec<VariantGenotypes>> {
            Err(Error::TransientStorage("connection reset".to_string()))
        }

        async fn avg_record_bytes(&self, dataset: &str) -> Result<u64> {
            self.0.avg_record_bytes(dataset).await
        }
    }

    #[tokio::test]
    async fn test_storage_error_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(BrokenStore(
            LocalStore::new().with_dataset("db", dataset(3, &[1])),
        ));
        let runner = runner_for(store, dir.path(), RunnerLimits::default());

        let id = runner
            .start(&Credential::anonymous(), request(vec![1], None))
            .await
            .unwrap();
        let job = wait_finished(&runner, &id).await;

        assert_eq!(job.state, JobState::Failed);
        assert!(job.error.unwrap().contains("connection reset"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_header_line() {
        assert_eq!(header_line(&[1, 20]), "markerprofileDbIds\t1\t20\n");
    }
}
