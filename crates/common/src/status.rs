//! Image processing status state machine

use serde::{Deserialize, Serialize};

/// Processing status of an uploaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    /// Accepted but not yet picked up by a worker
    Pending,
    /// A worker is running the image through the metric processor
    Processing,
    /// Processed successfully and attached to a shelf
    Uploaded,
    /// Processing or storage failed; re-submission is the only recovery
    Failed,
}

impl ImageStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageStatus::Uploaded | ImageStatus::Failed)
    }

    /// Whether a transition to `next` is allowed.
    ///
    /// Transitions only run forward: Pending/Processing may complete or
    /// fail; Uploaded and Failed are final.
    pub fn can_transition_to(&self, next: ImageStatus) -> bool {
        match (self, next) {
            (ImageStatus::Pending, ImageStatus::Processing) => true,
            (ImageStatus::Pending, ImageStatus::Uploaded) => true,
            (ImageStatus::Pending, ImageStatus::Failed) => true,
            (ImageStatus::Processing, ImageStatus::Uploaded) => true,
            (ImageStatus::Processing, ImageStatus::Failed) => true,
            _ => false,
        }
    }
}
