//! Container runtime abstraction.
//!
//! The manager never talks to Docker directly outside this module.
//! `ContainerRuntime` is the seam between "start/stop a sandbox" and "how":
//! promoting it to a trait means the registry, reaper, and orphan-recovery
//! logic can be unit tested against a `FakeRuntime` instead of a live
//! Docker daemon.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;

use sandbox_core::config::AGENT_PORT;

/// Label applied to every sandbox container this manager starts, so a
/// restarted manager can find its own orphans.
pub const MANAGED_BY_LABEL: &str = "sandbox-exec.managed-by";
pub const MANAGED_BY_VALUE: &str = "sandboxd";

/// Everything needed to start one sandbox.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub runtime: String,
    pub memory_bytes: i64,
    /// CPU cap expressed in nano-CPUs (1 core == 1_000_000_000), the
    /// Linux cgroup-quota field Docker's `--cpus` flag maps to.
    pub nano_cpus: i64,
    pub workspace_host_path: PathBuf,
    pub outputs_host_path: PathBuf,
    pub env: HashMap<String, String>,
}

/// A running sandbox's handle: its container id and the network address of
/// its in-sandbox agent.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub container_id: String,
    pub agent_addr: SocketAddr,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("docker not available: {0}")]
    NotAvailable(String),

    #[error("container creation failed: {0}")]
    CreationFailed(String),

    #[error("container start failed: {0}")]
    StartFailed(String),

    #[error("container has no reachable network address")]
    NoAddress,

    #[error("docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Starts, stops, and enumerates sandboxes. Implementations must not block
/// the caller's registry mutex — callers are expected to call
/// these methods outside any lock they hold.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, spec: ContainerSpec) -> RuntimeResult<ContainerHandle>;
    async fn stop(&self, container_id: &str) -> RuntimeResult<()>;
    async fn list_labeled(&self) -> RuntimeResult<Vec<ContainerHandle>>;
}

/// Production `ContainerRuntime` backed by a userspace-kernel runtime via
/// the Docker API (`bollard`).
pub struct BollardRuntime {
    docker: Docker,
    auto_pull: bool,
}

impl BollardRuntime {
    pub fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::NotAvailable(e.to_string()))?;
        Ok(Self {
            docker,
            auto_pull: true,
        })
    }

    pub async fn ping(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        if !self.auto_pull {
            return Err(RuntimeError::CreationFailed(format!(
                "image {image} not found and auto-pull is disabled"
            )));
        }

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress.map_err(RuntimeError::Docker)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn start(&self, spec: ContainerSpec) -> RuntimeResult<ContainerHandle> {
        self.ensure_image(&spec.image).await?;

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let binds = vec![
            format!("{}:/workspace:rw", spec.workspace_host_path.display()),
            format!(
                "{}:/mnt/user-data/outputs:rw",
                spec.outputs_host_path.display()
            ),
        ];

        let mut labels = HashMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

        let host_config = HostConfig {
            runtime: Some(spec.runtime.clone()),
            memory: Some(spec.memory_bytes),
            nano_cpus: Some(spec.nano_cpus),
            binds: Some(binds),
            port_bindings: Some(HashMap::from([(
                format!("{AGENT_PORT}/tcp"),
                Some(vec![PortBinding {
                    host_ip: Some("127.0.0.1".to_string()),
                    host_port: Some("0".to_string()),
                }]),
            )])),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(host_config),
            exposed_ports: Some(HashMap::from([(
                format!("{AGENT_PORT}/tcp"),
                HashMap::new(),
            )])),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RuntimeError::CreationFailed(e.to_string()))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))?;

        let agent_addr = self.agent_address(&created.id).await?;

        Ok(ContainerHandle {
            container_id: created.id,
            agent_addr,
        })
    }

    async fn stop(&self, container_id: &str) -> RuntimeResult<()> {
        let _ = self
            .docker
            .stop_container(container_id, Some(StopContainerOptions { t: 5 }))
            .await;
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn list_labeled(&self) -> RuntimeResult<Vec<ContainerHandle>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE}")],
        );

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let mut handles = Vec::new();
        for c in containers {
            let Some(id) = c.id else { continue };
            if let Ok(addr) = self.agent_address(&id).await {
                handles.push(ContainerHandle {
                    container_id: id,
                    agent_addr: addr,
                });
            }
        }
        Ok(handles)
    }
}

impl BollardRuntime {
    async fn agent_address(&self, container_id: &str) -> RuntimeResult<SocketAddr> {
        let inspect = self.docker.inspect_container(container_id, None).await?;

        let port_str = format!("{AGENT_PORT}/tcp");
        let host_port = inspect
            .network_settings
            .as_ref()
            .and_then(|ns| ns.ports.as_ref())
            .and_then(|ports| ports.get(&port_str))
            .and_then(|bindings| bindings.as_ref())
            .and_then(|bindings| bindings.first())
            .and_then(|binding| binding.host_port.clone())
            .ok_or(RuntimeError::NoAddress)?;

        format!("127.0.0.1:{host_port}")
            .parse()
            .map_err(|_| RuntimeError::NoAddress)
    }
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    /// In-memory `ContainerRuntime` used by registry/reaper/orphan-recovery
    /// unit tests so they don't require a live Docker daemon.
    #[derive(Default)]
    pub struct FakeRuntime {
        next_id: Mutex<u64>,
        running: Mutex<Vec<ContainerHandle>>,
    }

    impl FakeRuntime {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn start(&self, _spec: ContainerSpec) -> RuntimeResult<ContainerHandle> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let handle = ContainerHandle {
                container_id: format!("fake-{}", *next_id),
                agent_addr: "127.0.0.1:2024".parse().unwrap(),
            };
            self.running.lock().unwrap().push(handle.clone());
            Ok(handle)
        }

        async fn stop(&self, container_id: &str) -> RuntimeResult<()> {
            self.running
                .lock()
                .unwrap()
                .retain(|h| h.container_id != container_id);
            Ok(())
        }

        async fn list_labeled(&self) -> RuntimeResult<Vec<ContainerHandle>> {
            Ok(self.running.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn fake_runtime_tracks_running_containers() {
        let runtime = FakeRuntime::new();
        let handle = runtime
            .start(ContainerSpec {
                name: "test".to_string(),
                image: "image".to_string(),
                runtime: "runsc".to_string(),
                memory_bytes: 1,
                nano_cpus: 1_000_000_000,
                workspace_host_path: "/tmp/ws".into(),
                outputs_host_path: "/tmp/out".into(),
                env: HashMap::new(),
            })
            .await
            .unwrap();

        assert_eq!(runtime.list_labeled().await.unwrap().len(), 1);
        runtime.stop(&handle.container_id).await.unwrap();
        assert_eq!(runtime.list_labeled().await.unwrap().len(), 0);
    }
}
