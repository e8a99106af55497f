// ABOUTME: Unprivileged runner: turns start/stop requests into runtime driver calls.
// ABOUTME: The trait is the seam the container service depends on.

mod driver;
mod output;
mod spec;

pub use driver::DriverRunner;
pub use output::{RunOutput, classify};
pub use spec::{HOST_GATEWAY, build_spec};

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Container, ContainerStatus, ContainerUpdate, Resources};
use crate::template::Template;
use crate::types::ContainerId;

/// Called by the runner each time the container moves to a new status.
pub type StatusSetter = Arc<dyn Fn(ContainerStatus) + Send + Sync>;

/// Where the image for a start comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Pull `image[:tag]` from a registry.
    Pull(String),
    /// Build from the container's cloned source.
    Build { dockerfile: Option<String> },
}

impl ImageSource {
    pub fn resolve(container: &Container, template: Option<&Template>) -> Self {
        match template.and_then(Template::docker) {
            Some(method) if method.requires_build() => ImageSource::Build {
                dockerfile: method.dockerfile.clone(),
            },
            _ => ImageSource::Pull(container.image_reference()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub container: Container,
    pub resources: Resources,
    pub image: ImageSource,
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Begin bringing the container up and return its output streams.
    ///
    /// Returns as soon as the work is scheduled. Progress is reported
    /// through `set_status`: building, starting, running, and error if
    /// anything fails or the container later exits on its own.
    async fn start(&self, request: StartRequest, set_status: StatusSetter) -> Result<RunOutput>;

    async fn stop(&self, id: &ContainerId) -> Result<()>;

    /// Remove the runtime container. Succeeds if it is already gone.
    async fn delete_container(&self, id: &ContainerId) -> Result<()>;

    /// Remove bind directories and named volumes. Succeeds if already gone.
    async fn delete_mounts(&self, id: &ContainerId) -> Result<()>;

    /// Fetch the source a build needs before the first start.
    async fn prepare_source(&self, id: &ContainerId, repository: &str) -> Result<()>;

    /// Compare the running image with the newest one for its tag.
    ///
    /// `None` when the container is up to date or has no runtime object.
    async fn check_for_updates(
        &self,
        id: &ContainerId,
        image: &ImageSource,
    ) -> Result<Option<ContainerUpdate>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parse_template;

    #[test]
    fn cloned_templates_build() {
        let template = parse_template(
            "app",
            concat!(
                "version: 3\nname: App\nmethods:\n  docker:\n",
                "    clone:\n      repository: https://example.com/app.git\n",
                "    dockerfile: docker/Dockerfile\n",
            ),
        )
        .unwrap();
        let container = Container::new(ContainerId::new("c1"), "App", "");
        assert_eq!(
            ImageSource::resolve(&container, Some(&template)),
            ImageSource::Build {
                dockerfile: Some("docker/Dockerfile".into())
            }
        );
    }

    #[test]
    fn raw_images_pull() {
        let mut container = Container::new(ContainerId::new("c1"), "web", "nginx");
        container.image_tag = Some("1.27".into());
        assert_eq!(
            ImageSource::resolve(&container, None),
            ImageSource::Pull("nginx:1.27".into())
        );
    }
}
