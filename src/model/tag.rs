// ABOUTME: Tags used to group containers and their membership rows.
// ABOUTME: Filtering containers by tag joins against the membership relation.

use serde::{Deserialize, Serialize};

use crate::types::{ContainerId, TagId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    #[serde(default)]
    pub user_id: Option<String>,
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TagId::generate(),
            user_id: None,
            name: name.into(),
        }
    }
}

/// One row of the container <-> tag relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerTag {
    pub container_id: ContainerId,
    pub tag_id: TagId,
}
