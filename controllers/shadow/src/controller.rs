//! Main controller implementation.
//!
//! Wires the pieces together and owns their lifetimes:
//! - two watch tasks (Shadow, Pod) feeding reflector caches and the
//!   notification channel
//! - one dispatcher task turning notifications into work keys
//! - `workers` reconcile tasks draining the work queue

use crate::config::Config;
use crate::dispatcher::{Dispatcher, Notification};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::queue::WorkQueue;
use crate::reconciler::{CONTROLLER_AGENT_NAME, Reconciler};
use crate::watcher;
use crate::worker::Worker;
use crds::Shadow;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::Pod;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Resource};
use kube_runtime::reflector;
use kube_runtime::reflector::Store;
use shadow_client::{KubeEventRecorder, KubeStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Capacity of the watch-to-dispatcher channel
const NOTIFICATION_BUFFER: usize = 1024;

/// Main controller for Shadow resources.
pub struct Controller {
    config: Config,
    client: Client,
    metrics: Arc<Metrics>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config, metrics: Arc<Metrics>) -> Result<Self, ControllerError> {
        info!("Initializing Shadow Controller");
        let client = kube_client(&config).await?;
        Ok(Self {
            config,
            client,
            metrics,
        })
    }

    /// Runs until `shutdown` flips to `true` or a watch fails.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let (shadow_reader, shadow_writer) = reflector::store::<Shadow>();
        let (pod_reader, pod_writer) = reflector::store::<Pod>();

        let shadows = Arc::new(KubeStore::new(self.client.clone(), shadow_reader.clone()));
        let pods = Arc::new(KubeStore::new(self.client.clone(), pod_reader.clone()));
        let recorder = Arc::new(KubeEventRecorder::new(self.client.clone(), CONTROLLER_AGENT_NAME));
        let reconciler = Arc::new(Reconciler::new(shadows.clone(), pods, recorder));
        let queue = WorkQueue::<String>::new(self.config.backoff());

        // Watchers and dispatcher
        let (sender, receiver) = mpsc::channel(NOTIFICATION_BUFFER);
        let mut watchers = JoinSet::new();
        watchers.spawn(watcher::watch(
            self.api::<Shadow>(),
            shadow_writer,
            sender.clone(),
            Notification::Shadow,
        ));
        watchers.spawn(watcher::watch(self.api::<Pod>(), pod_writer, sender, Notification::Pod));
        let dispatcher = tokio::spawn(Dispatcher::new(queue.clone(), shadows).run(receiver));

        let synced = wait_for_caches(
            &shadow_reader,
            &pod_reader,
            self.config.cache_sync_timeout(),
            &mut shutdown,
        )
        .await;
        match synced {
            Ok(true) => {}
            Ok(false) => {
                info!("Shutdown requested before caches synced");
                watchers.abort_all();
                dispatcher.abort();
                return Ok(());
            }
            Err(e) => {
                error!("Failed to sync caches: {}", e);
                watchers.abort_all();
                dispatcher.abort();
                return Err(e);
            }
        }
        self.metrics.set_ready();
        info!("Caches synced");

        info!(workers = self.config.workers, "Starting workers");
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers {
            let worker = Worker::new(
                queue.clone(),
                reconciler.clone(),
                self.metrics.clone(),
                self.config.max_retries,
            );
            workers.spawn(worker.run(id));
        }

        let outcome = tokio::select! {
            () = wait_for_shutdown(&mut shutdown) => {
                info!("Shutting down workers");
                Ok(())
            }
            Some(joined) = watchers.join_next() => {
                let e = match joined {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) => ControllerError::Watch("watcher exited".to_string()),
                    Err(e) => ControllerError::Watch(e.to_string()),
                };
                error!("Watcher failed: {}", e);
                Err(e)
            }
        };

        queue.shut_down();
        if !queue.is_empty() {
            info!("Discarding {} queued keys", queue.len());
        }
        watchers.abort_all();
        dispatcher.abort();

        let grace = self.config.shutdown_grace();
        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    warn!("Worker task failed: {}", e);
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Workers did not finish within {:?}, aborting", grace);
            workers.abort_all();
        }

        info!("Shadow Controller stopped");
        outcome
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        match self.config.namespace.as_deref() {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Wait for both caches to finish their initial list.
///
/// `Ok(false)` means shutdown was requested first. Not syncing within
/// `timeout` is fatal.
pub async fn wait_for_caches(
    shadows: &Store<Shadow>,
    pods: &Store<Pod>,
    timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<bool, ControllerError> {
    info!("Waiting for caches to sync");
    let synced = async {
        shadows.wait_until_ready().await?;
        pods.wait_until_ready().await
    };
    tokio::select! {
        result = tokio::time::timeout(timeout, synced) => match result {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(ControllerError::CacheSync(e.to_string())),
            Err(_) => Err(ControllerError::CacheSync(format!("timed out after {timeout:?}"))),
        },
        () = wait_for_shutdown(shutdown) => Ok(false),
    }
}

/// Client from the configured kubeconfig, or the inferred (in-cluster)
/// configuration when there is none
async fn kube_client(config: &Config) -> Result<Client, ControllerError> {
    let kube_config = match config.kubeconfig_path()? {
        Some(path) => {
            info!("Using kubeconfig {}", path.display());
            let kubeconfig = Kubeconfig::read_from(&path)
                .map_err(|e| ControllerError::InvalidConfig(format!("{}: {e}", path.display())))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?
        }
        None => {
            info!("No kubeconfig found, inferring cluster configuration");
            kube::Config::infer()
                .await
                .map_err(|e| ControllerError::InvalidConfig(e.to_string()))?
        }
    };
    Ok(Client::try_from(kube_config)?)
}

/// Resolves once the shutdown flag is set or its sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
