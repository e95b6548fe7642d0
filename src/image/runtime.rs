//! The container runtime boundary.
//!
//! The registry consumes exactly two read-only operations from the runtime:
//! does an image exist, and what content digest does a reference currently
//! point at. [`ContainerRuntime`] keeps that boundary a trait so tests stub
//! it and so a non-Docker runtime can be wired in; [`DockerRuntime`] is the
//! production implementation against the Docker daemon.

use async_trait::async_trait;
use bollard::Docker;

use crate::error::{RegistryError, Result};
use crate::image::reference::ImageRef;

/// Read-only existence and digest queries against a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the referenced image exists and is retrievable.
    async fn image_exists(&self, image: &ImageRef) -> Result<bool>;

    /// The content digest the runtime currently reports for the reference,
    /// or `None` when the image does not exist.
    async fn resolve_digest(&self, image: &ImageRef) -> Result<Option<String>>;
}

/// Docker daemon implementation of the runtime boundary.
///
/// Checks the local image store first, then the daemon's view of the remote
/// registry. Never pulls.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Digest recorded locally for the image, if the daemon has it and the
    /// repository matches.
    async fn local_digest(&self, image: &ImageRef) -> Option<String> {
        let inspect = self.docker.inspect_image(&image.to_string()).await.ok()?;
        let prefix = format!("{}@", image.repository);
        inspect
            .repo_digests?
            .iter()
            .find_map(|entry| entry.strip_prefix(&prefix))
            .map(|digest| digest.to_string())
    }

    /// Digest the remote registry reports for the reference.
    async fn registry_digest(&self, image: &ImageRef) -> Result<Option<String>> {
        match self
            .docker
            .inspect_registry_image(&image.to_string(), None)
            .await
        {
            Ok(inspect) => Ok(inspect.descriptor.digest),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(RegistryError::RegistryUnreachable {
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        if self.docker.inspect_image(&image.to_string()).await.is_ok() {
            return Ok(true);
        }
        Ok(self.registry_digest(image).await?.is_some())
    }

    async fn resolve_digest(&self, image: &ImageRef) -> Result<Option<String>> {
        if let Some(digest) = self.local_digest(image).await {
            return Ok(Some(digest));
        }
        self.registry_digest(image).await
    }
}

fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Connect to the Docker daemon.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (bollard default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    if let Some(home) = std::env::var_os("HOME") {
        let desktop_sock = std::path::Path::new(&home).join(".docker/run/docker.sock");
        if desktop_sock.exists() {
            let sock_str = desktop_sock.to_string_lossy();
            if let Ok(docker) =
                Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
                && docker.ping().await.is_ok()
            {
                return Ok(docker);
            }
        }
    }

    Err(RegistryError::RegistryUnreachable {
        reason: "Docker daemon socket not found".to_string(),
    })
}
