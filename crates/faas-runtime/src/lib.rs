//! Abstraction over an external container engine ("Runtime Adapter").
//!
//! The Coordinator only ever talks to the [`RuntimeAdapter`] trait; the
//! only concrete implementation shipped here is [`DockerRuntimeAdapter`],
//! backed by `bollard`. Alternative backends (processes, microVMs) would
//! implement the same trait.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::Docker;
use faas_common::{ContainerDescriptor, FaasError, Result, CONTAINER_PORT};
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

/// A started container's reachable address and opaque id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedContainer {
    pub address: String,
    pub container_id: String,
}

/// Capability consumed by the Coordinator: start/stop/list ephemeral
/// execution sandboxes. Implementations must not leave a partial
/// container registered with the caller on failure: on error, any
/// container this call itself created has already been cleaned up.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn start(&self, image: &str, name_hint: &str) -> Result<StartedContainer>;
    async fn stop(&self, container_id: &str) -> Result<()>;
    async fn list_managed(&self) -> Result<Vec<ContainerDescriptor>>;
}

/// `RuntimeAdapter` backed by the Docker Engine API via `bollard`.
pub struct DockerRuntimeAdapter {
    docker: Docker,
}

impl DockerRuntimeAdapter {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connects to the local Docker daemon using the environment's
    /// standard `DOCKER_HOST`/TLS configuration.
    pub fn connect_local() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| FaasError::StartFailure(format!("failed to connect to docker: {e}")))?;
        Ok(Self::new(docker))
    }

    async fn ensure_image_present(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        debug!(image, "image not present locally, attempting pull");
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = pull.next().await {
            progress.map_err(|e| {
                FaasError::StartFailure(format!("failed to pull image {image}: {e}"))
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeAdapter for DockerRuntimeAdapter {
    #[instrument(skip(self), fields(image, name_hint))]
    async fn start(&self, image: &str, name_hint: &str) -> Result<StartedContainer> {
        self.ensure_image_present(image).await?;

        let container_name = format!("nanolambda-{}-{}", name_hint, nanos());
        let port_key = format!("{CONTAINER_PORT}/tcp");

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some("0".to_string()),
            }]),
        );

        let config = Config {
            image: Some(image.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| FaasError::StartFailure(format!("container creation failed: {e}")))?;

        if let Err(e) = self
            .docker
            .start_container::<String>(&created.id, None)
            .await
        {
            // Start failed: the container was created but never ran. Best
            // effort cleanup so we don't leave a stopped husk behind; a
            // failure here doesn't change the error we return to the caller.
            let _ = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(FaasError::StartFailure(format!(
                "container start failed: {e}"
            )));
        }

        let inspected = self
            .docker
            .inspect_container(&created.id, None)
            .await
            .map_err(|e| FaasError::StartFailure(format!("container inspect failed: {e}")))?;

        let host_port = inspected
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| ports.get(&port_key))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|binding| binding.host_port.clone())
            .ok_or_else(|| FaasError::StartFailure("no ports bound".to_string()))?;

        info!(container_id = %created.id, host_port, "container started");
        Ok(StartedContainer {
            address: format!("127.0.0.1:{host_port}"),
            container_id: created.id,
        })
    }

    #[instrument(skip(self))]
    async fn stop(&self, container_id: &str) -> Result<()> {
        match self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 10 }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                // Containers are auto-remove; a stop racing the daemon's own
                // cleanup (or a caller that already stopped it) showing up
                // as "not found" is not a failure from the caller's view.
                if e.to_string().contains("404") {
                    warn!(container_id, "container already gone on stop");
                    Ok(())
                } else {
                    Err(FaasError::Internal(format!("stop failed: {e}")))
                }
            }
        }
    }

    async fn list_managed(&self) -> Result<Vec<ContainerDescriptor>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec!["nanolambda-".to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| FaasError::Internal(format!("list containers failed: {e}")))?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerDescriptor {
                container_id: c.id.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
            })
            .collect())
    }
}

fn nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_nanos()
}

/// A fake [`RuntimeAdapter`] for tests that can't depend on a live Docker
/// daemon. Used both here and by `faas-coordinator`'s test suite.
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct FakeRuntimeAdapter {
        pub start_calls: AtomicUsize,
        pub stop_calls: Mutex<Vec<String>>,
        pub fail_start: bool,
    }

    impl FakeRuntimeAdapter {
        pub fn new() -> Self {
            Self {
                start_calls: AtomicUsize::new(0),
                stop_calls: Mutex::new(Vec::new()),
                fail_start: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                fail_start: true,
                ..Self::new()
            }
        }

        pub fn stop_count(&self) -> usize {
            self.stop_calls.lock().unwrap().len()
        }
    }

    impl Default for FakeRuntimeAdapter {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RuntimeAdapter for FakeRuntimeAdapter {
        async fn start(&self, _image: &str, name_hint: &str) -> Result<StartedContainer> {
            let n = self.start_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                return Err(FaasError::StartFailure("synthetic failure".to_string()));
            }
            Ok(StartedContainer {
                address: format!("127.0.0.1:{}", 20000 + n),
                container_id: format!("fake-{name_hint}-{n}"),
            })
        }

        async fn stop(&self, container_id: &str) -> Result<()> {
            self.stop_calls
                .lock()
                .unwrap()
                .push(container_id.to_string());
            Ok(())
        }

        async fn list_managed(&self) -> Result<Vec<ContainerDescriptor>> {
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeRuntimeAdapter;
    use super::*;

    #[tokio::test]
    async fn fake_adapter_start_is_unique_per_call() {
        let adapter = FakeRuntimeAdapter::new();
        let a = adapter.start("img", "fn").await.unwrap();
        let b = adapter.start("img", "fn").await.unwrap();
        assert_ne!(a.container_id, b.container_id);
        assert_ne!(a.address, b.address);
    }

    #[tokio::test]
    async fn fake_adapter_records_stop_calls() {
        let adapter = FakeRuntimeAdapter::new();
        let started = adapter.start("img", "fn").await.unwrap();
        adapter.stop(&started.container_id).await.unwrap();
        assert_eq!(adapter.stop_count(), 1);
    }

    #[tokio::test]
    async fn failing_adapter_never_returns_a_started_container() {
        let adapter = FakeRuntimeAdapter::failing();
        assert!(adapter.start("img", "fn").await.is_err());
    }
}
