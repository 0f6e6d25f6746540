//! Docker script construction
//!
//! Every value interpolated into a script goes through [`shell_quote`].

use std::path::Path;

use crate::deploy::process::shell_quote;

/// Inputs of the image build script
#[derive(Debug, Clone)]
pub struct BuildScript<'a> {
    pub checkout: &'a Path,
    pub image_id: &'a str,
    pub registry: &'a str,

    /// Remove the checkout once the image is pushed
    pub remove_checkout: bool,

    /// Image ids no longer retained for rollback
    pub stale_image_ids: &'a [String],
}

impl BuildScript<'_> {
    pub fn render(&self) -> String {
        let checkout = shell_quote(&self.checkout.to_string_lossy());
        let tag = shell_quote(self.image_id);
        let remote = shell_quote(&format!("{}/{}", self.registry, self.image_id));

        let mut script = vec![
            "set -e".to_string(),
            format!("docker build {} -t {}", checkout, tag),
            format!("docker image tag {} {}", tag, remote),
            format!("docker image push {}", remote),
        ];
        if self.remove_checkout {
            script.push(format!("rm -rf {}", checkout));
        }
        for stale in self.stale_image_ids {
            script.extend(remove_image_lines(stale, self.registry));
        }
        script.join("\n")
    }
}

/// Inputs of the container start script
#[derive(Debug, Clone)]
pub struct RunScript<'a> {
    /// `<registry>/<id>` or a public image name
    pub image_ref: &'a str,

    /// Pull from the registry first; public images are pulled by `docker run`
    pub pull: bool,
    pub bind_ip: &'a str,
    pub host_port: u16,
    pub container_port: &'a str,
    pub container_name: &'a str,
}

impl RunScript<'_> {
    pub fn render(&self) -> String {
        let image = shell_quote(self.image_ref);
        let publish = shell_quote(&format!(
            "{}:{}:{}",
            self.bind_ip, self.host_port, self.container_port
        ));

        let mut script = vec!["set -e".to_string()];
        if self.pull {
            script.push(format!("docker image pull {}", image));
        }
        script.push(format!(
            "docker container run -p {} -d --restart unless-stopped --name {} {}",
            publish,
            shell_quote(self.container_name),
            image
        ));
        script.join("\n")
    }
}

/// Stop and remove a container; missing containers are not an error
pub fn remove_container_script(container_name: &str) -> String {
    let name = shell_quote(container_name);
    format!(
        "docker container stop {name} || true\ndocker container rm -f {name} || true"
    )
}

/// Remove an image locally and its registry-tagged copy
pub fn remove_images_script(image_ids: &[String], registry: &str) -> String {
    image_ids
        .iter()
        .flat_map(|id| remove_image_lines(id, registry))
        .collect::<Vec<_>>()
        .join("\n")
}

fn remove_image_lines(image_id: &str, registry: &str) -> [String; 2] {
    [
        format!("docker image rm -f {} || true", shell_quote(image_id)),
        format!(
            "docker image rm -f {} || true",
            shell_quote(&format!("{}/{}", registry, image_id))
        ),
    ]
}
