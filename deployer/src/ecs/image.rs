//! Container registry and the service image pushed to it.

use crate::ecs::{
    output::Output,
    resources::{Image, Repository},
    stack::{Attribute, Handle, Stack},
    Config, Error,
};
use tracing::info;

/// Platform Fargate tasks run on
pub const PLATFORM: &str = "linux/amd64";

/// Publishes the service image and reports where it can be pulled from
pub trait ImagePublisher {
    /// Declares the image at `version_tag`, returning its (pending) pullable reference.
    fn push(&self, stack: &mut Stack, version_tag: &str) -> Result<Output<String>, Error>;
}

/// Builds the project directory and pushes it to a dedicated ECR repository
#[derive(Clone, Debug)]
pub struct Registry {
    service_name: String,
    project: String,
}

impl Registry {
    pub fn new(config: &Config) -> Self {
        Self {
            service_name: config.service_name.clone(),
            project: config.project.clone(),
        }
    }

    fn repository(&self, stack: &mut Stack) -> Result<Handle, Error> {
        let repository = Repository {
            repository_name: self.service_name.to_lowercase(),
            image_tag_mutability: "MUTABLE".to_string(),
            force_delete: true,
            tags: stack.provider().tags(&[]),
        };
        stack.declare(format!("{}-repository", self.service_name), repository)
    }
}

impl ImagePublisher for Registry {
    fn push(&self, stack: &mut Stack, version_tag: &str) -> Result<Output<String>, Error> {
        let repository = self.repository(stack)?;
        let image = Image {
            image_name: self.service_name.to_lowercase(),
            context: self.project.clone(),
            platform: PLATFORM.to_string(),
            repository_url: repository.attribute(Attribute::RepositoryUrl).into(),
            tag: version_tag.to_string(),
        };
        let image = stack.declare(format!("{}-image", self.service_name), image)?;
        info!(
            image = image.name(),
            tag = version_tag,
            context = self.project.as_str(),
            "declared image"
        );
        Ok(stack.output(image.attribute(Attribute::ImageUri)))
    }
}
