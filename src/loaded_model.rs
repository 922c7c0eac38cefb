use std::future::Future;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::classifier::Classifier;
use crate::errors::ServerError;
use crate::model_source::ModelSource;
use crate::LoadedModelDep;

/// Process-wide holder for the classifier. Starts empty and is filled at most
/// once; after that the handle is only ever borrowed for inference.
pub struct LoadedModel<C = Classifier> {
    model: Option<C>,
}

impl<C> LoadedModel<C> {
    pub fn new() -> Self {
        Self { model: None }
    }

    pub fn get(&self) -> Option<&C> {
        self.model.as_ref()
    }
}

impl<C> Default for LoadedModel<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `init` and stores its result unless a model is already loaded.
///
/// Concurrent first calls race to the write lock; whichever wins performs the
/// load, the rest re-check under the lock and find the model present. `init`
/// therefore runs at most once per process, no matter how many requests arrive
/// before the first load completes.
pub async fn assert_loaded_with<C, F, Fut>(
    dep: &Arc<RwLock<LoadedModel<C>>>,
    init: F,
) -> Result<(), ServerError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<C, ServerError>>,
{
    if dep.read().await.model.is_some() {
        return Ok(());
    }

    let mut guard = dep.write().await;
    if guard.model.is_none() {
        guard.model = Some(init().await?);
    }
    Ok(())
}

/// Provisions the artifact and deserializes the classifier on first use.
pub async fn assert_model_loaded(
    dep: &LoadedModelDep,
    source: &ModelSource,
) -> Result<(), ServerError> {
    assert_loaded_with(dep, || async {
        source.ensure_artifact_present().await?;
        let classifier = Classifier::load(source.local_path())?;
        info!(path = %source.local_path().display(), "classifier loaded");
        Ok(classifier)
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use super::{assert_loaded_with, LoadedModel};
    use crate::errors::ServerError;

    #[tokio::test]
    async fn concurrent_first_calls_load_exactly_once() {
        let dep = Arc::new(RwLock::new(LoadedModel::<u32>::new()));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let dep = dep.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                assert_loaded_with(&dep, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok(7u32)
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(dep.read().await.get(), Some(&7));
    }

    #[tokio::test]
    async fn failed_load_leaves_the_host_empty_for_a_retry() {
        let dep = Arc::new(RwLock::new(LoadedModel::<u32>::new()));

        let err = assert_loaded_with(&dep, || async {
            Err::<u32, _>(ServerError::ModelLoad("corrupt artifact".to_owned()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServerError::ModelLoad(_)));
        assert!(dep.read().await.get().is_none());

        assert_loaded_with(&dep, || async { Ok(3u32) }).await.unwrap();
        assert_eq!(dep.read().await.get(), Some(&3));
    }
}
