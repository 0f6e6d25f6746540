//! Image models

use serde::{Deserialize, Serialize};

use crate::models::ID_LEN;
use crate::utils::{generate_id, now_micros};

/// Number of most recent ready images kept per environment for rollback
pub const RETAINED_IMAGES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    ToBuild,
    Building,
    Ready,
    Error,
}

impl ImageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageStatus::ToBuild => "to_build",
            ImageStatus::Building => "building",
            ImageStatus::Ready => "ready",
            ImageStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A built or externally supplied container image.
///
/// The id doubles as the image tag, so it is always lower case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Image {
    pub id: String,
    pub status: ImageStatus,
    pub deployment_id: String,
    pub environment_id: String,

    #[serde(default)]
    pub error_msg: String,

    #[serde(default)]
    pub created_at: i64,
}

impl Image {
    pub fn new(deployment_id: &str, environment_id: &str, status: ImageStatus) -> Self {
        Self {
            id: generate_id(ID_LEN).to_lowercase(),
            status,
            deployment_id: deployment_id.to_string(),
            environment_id: environment_id.to_string(),
            error_msg: String::new(),
            created_at: now_micros(),
        }
    }

    /// Reference of this image inside the registry
    pub fn registry_ref(&self, registry: &str) -> String {
        format!("{}/{}", registry, self.id)
    }
}

/// Split the ready images (newest first) into the ones kept for rollback and
/// the stale rest. Images that never became ready take no retention slot,
/// except `building`, the image currently being built.
pub fn partition_retained<'a>(
    images_newest_first: &'a [Image],
    building: Option<&str>,
) -> (Vec<&'a Image>, Vec<&'a Image>) {
    let mut ready: Vec<&Image> = images_newest_first
        .iter()
        .filter(|i| i.status == ImageStatus::Ready || Some(i.id.as_str()) == building)
        .collect();
    let stale = ready.split_off(ready.len().min(RETAINED_IMAGES));
    (ready, stale)
}
