//! Periodic roster reload, published to every camera loop over a watch channel.

use crate::backend::{BackendClient, BackendError};
use crate::shutdown::Shutdown;
use attend_core::{EmbeddingModel, EmployeeRef, PhotoSource, Roster, RosterLoader};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub type RosterReceiver = watch::Receiver<Arc<Roster>>;

/// Source of the upstream employee list.
pub trait EmployeeDirectory {
    fn fetch_employees(
        &self,
    ) -> impl Future<Output = Result<Vec<EmployeeRef>, BackendError>> + Send;
}

impl EmployeeDirectory for BackendClient {
    async fn fetch_employees(&self) -> Result<Vec<EmployeeRef>, BackendError> {
        self.fetch_roster().await
    }
}

pub struct RosterService<D, P, M> {
    directory: D,
    loader: RosterLoader<P, M>,
    reload_every: Duration,
    retry_after: Duration,
}

impl<D, P, M> RosterService<D, P, M>
where
    D: EmployeeDirectory + Send + Sync,
    P: PhotoSource + Send + Sync,
    M: EmbeddingModel + Send + Sync,
{
    pub fn new(
        directory: D,
        loader: RosterLoader<P, M>,
        reload_every: Duration,
        retry_after: Duration,
    ) -> Self {
        Self {
            directory,
            loader,
            reload_every,
            retry_after,
        }
    }

    /// Fetch and embed the current roster.
    ///
    /// `Ok(None)` means keep `current`: the new roster is empty or identical.
    pub async fn refresh(&self, current: &Roster) -> Result<Option<Roster>, BackendError> {
        let employees = self.directory.fetch_employees().await?;
        if employees.is_empty() {
            tracing::warn!("backend returned no employees, keeping current roster");
            return Ok(None);
        }

        let roster = self.loader.load(&employees).await;
        if roster.is_empty() {
            tracing::warn!(
                employees = employees.len(),
                "no employee could be enrolled, keeping current roster"
            );
            return Ok(None);
        }
        if roster == *current {
            tracing::debug!("roster unchanged");
            return Ok(None);
        }
        Ok(Some(roster))
    }

    /// Reload until shutdown. The first load happens immediately.
    pub async fn run(self, tx: watch::Sender<Arc<Roster>>, mut shutdown: Shutdown) {
        loop {
            let current = tx.borrow().clone();
            let delay = match self.refresh(&current).await {
                Ok(Some(roster)) => {
                    tracing::info!(
                        entries = roster.len(),
                        fingerprint = roster.fingerprint().unwrap_or("-"),
                        "roster updated"
                    );
                    tx.send_replace(Arc::new(roster));
                    self.reload_every
                }
                // Nothing usable yet: try again sooner.
                Ok(None) if current.is_empty() => self.retry_after,
                Ok(None) => self.reload_every,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_secs = self.retry_after.as_secs(),
                        "roster reload failed"
                    );
                    self.retry_after
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => break,
            }
        }
        tracing::debug!("roster service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown;
    use attend_core::{
        BoundingBox, Detection, Embedding, EmployeeId, EnhanceConfig, ModelError, PhotoError,
        QualityGate,
    };
    use image::{ImageFormat, Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::Mutex;

    struct ScriptedDirectory {
        responses: Mutex<VecDeque<Result<Vec<EmployeeRef>, BackendError>>>,
    }

    impl ScriptedDirectory {
        fn new(responses: Vec<Result<Vec<EmployeeRef>, BackendError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    impl EmployeeDirectory for ScriptedDirectory {
        async fn fetch_employees(&self) -> Result<Vec<EmployeeRef>, BackendError> {
            let next = self.responses.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    struct TexturedPhotos;

    impl PhotoSource for TexturedPhotos {
        async fn fetch_photo(&self, _reference: &str) -> Result<Vec<u8>, PhotoError> {
            let img = RgbImage::from_fn(48, 48, |x, y| {
                if (x + y) % 2 == 0 {
                    Rgb([255, 255, 255])
                } else {
                    Rgb([0, 0, 0])
                }
            });
            let mut out = Cursor::new(Vec::new());
            img.write_to(&mut out, ImageFormat::Png)
                .map_err(|e| PhotoError::Fetch(e.to_string()))?;
            Ok(out.into_inner())
        }
    }

    struct WholeImageFace;

    impl EmbeddingModel for WholeImageFace {
        async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelError> {
            Ok(vec![Detection {
                bbox: BoundingBox::new(0.0, 0.0, image.width() as f32, image.height() as f32),
                embedding: Embedding::new(vec![1.0, 0.0]),
                score: 1.0,
            }])
        }
    }

    fn employees(ids: &[i64]) -> Vec<EmployeeRef> {
        ids.iter()
            .map(|&id| EmployeeRef {
                id: EmployeeId(id),
                name: format!("emp{id}"),
                photo: Some(format!("/photos/{id}.png")),
            })
            .collect()
    }

    fn service(
        responses: Vec<Result<Vec<EmployeeRef>, BackendError>>,
    ) -> RosterService<ScriptedDirectory, TexturedPhotos, WholeImageFace> {
        let loader = RosterLoader::new(
            TexturedPhotos,
            WholeImageFace,
            QualityGate::new(20.0, 50.0),
            EnhanceConfig {
                enabled: false,
                ..EnhanceConfig::default()
            },
        );
        RosterService::new(
            ScriptedDirectory::new(responses),
            loader,
            Duration::from_millis(5),
            Duration::from_millis(5),
        )
    }

    fn backend_down() -> BackendError {
        BackendError::Status {
            url: "http://backend/api/employees".into(),
            status: 503,
        }
    }

    #[tokio::test]
    async fn test_refresh_builds_roster() {
        let svc = service(vec![Ok(employees(&[1, 2]))]);
        let roster = svc.refresh(&Roster::empty()).await.unwrap().unwrap();
        assert_eq!(
            roster.employee_ids().collect::<Vec<_>>(),
            vec![EmployeeId(1), EmployeeId(2)]
        );
    }

    #[tokio::test]
    async fn test_refresh_unchanged_keeps_current() {
        let svc = service(vec![Ok(employees(&[1])), Ok(employees(&[1]))]);
        let first = svc.refresh(&Roster::empty()).await.unwrap().unwrap();
        assert!(svc.refresh(&first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_empty_backend_keeps_current() {
        let svc = service(vec![Ok(Vec::new())]);
        assert!(svc.refresh(&Roster::empty()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_propagates_backend_error() {
        let svc = service(vec![Err(backend_down())]);
        assert!(svc.refresh(&Roster::empty()).await.is_err());
    }

    #[tokio::test]
    async fn test_run_publishes_after_failed_start() {
        let svc = service(vec![Err(backend_down()), Ok(employees(&[4]))]);
        let (tx, mut rx) = watch::channel(Arc::new(Roster::empty()));
        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(svc.run(tx, shutdown));

        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().employee_ids().collect::<Vec<_>>(),
            vec![EmployeeId(4)]
        );

        trigger.trigger();
        task.await.unwrap();
    }
}
