use std::collections::VecDeque;

use super::message::ImageHandle;

/// Generated and edited images, newest first.
///
/// Index 0 is the current concept for every consumer (editor, export, gallery
/// badge). Anything further back is archived. There is no removal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetStore {
    images: VecDeque<ImageHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Latest,
    Archived,
}

impl AssetStatus {
    pub fn for_index(index: usize) -> Self {
        if index == 0 {
            AssetStatus::Latest
        } else {
            AssetStatus::Archived
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AssetStatus::Latest => "Latest Concept",
            AssetStatus::Archived => "Archived",
        }
    }
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn prepend(mut self, image: ImageHandle) -> Self {
        self.images.push_front(image);
        self
    }

    pub fn latest(&self) -> Option<&ImageHandle> {
        self.images.front()
    }

    pub fn get(&self, index: usize) -> Option<&ImageHandle> {
        self.images.get(index)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, AssetStatus, &ImageHandle)> {
        self.images
            .iter()
            .enumerate()
            .map(|(index, image)| (index, AssetStatus::for_index(index), image))
    }
}

/// File name offered when exporting the asset at `index` (0-based).
pub fn download_file_name(index: usize) -> String {
    format!("ethereal-wedding-concept-{}.png", index + 1)
}
