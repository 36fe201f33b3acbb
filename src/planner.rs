use std::collections::{HashSet, VecDeque};

use url::Url;

use crate::hls::PlaylistSnapshot;

/// A segment that has been assigned its place in the output.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDescriptor {
    /// Segment path as listed in the playlist
    pub path: String,
    pub base_url: Url,
    pub index: u64,
}

impl SegmentDescriptor {
    pub fn url(&self) -> Result<Url, url::ParseError> {
        self.base_url.join(&self.path)
    }
}

/// Identity of a segment for deduplication: the file name of its URI, without
/// query string or fragment.
pub fn segment_key(uri: &str) -> &str {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => uri,
    }
}

/// Set of recently seen segment keys. Holds at most `capacity` keys and
/// forgets the oldest first.
#[derive(Debug)]
pub struct DedupWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns true if `key` was not in the window yet.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.to_string());
        self.order.push_back(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Turns playlist snapshots into indexed descriptors, each distinct segment
/// exactly once. Owned by the poller loop of a single session.
#[derive(Debug)]
pub struct SegmentPlanner {
    next_index: u64,
    window: DedupWindow,
}

impl SegmentPlanner {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            next_index: 1,
            window: DedupWindow::new(dedup_capacity),
        }
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn window(&self) -> &DedupWindow {
        &self.window
    }

    pub fn plan(&mut self, snapshot: &PlaylistSnapshot, base_url: &Url) -> Vec<SegmentDescriptor> {
        let mut planned = Vec::new();

        for path in &snapshot.segments {
            if !self.window.insert(segment_key(path)) {
                continue;
            }

            planned.push(SegmentDescriptor {
                path: path.clone(),
                base_url: base_url.clone(),
                index: self.next_index,
            });
            self.next_index += 1;
        }

        planned
    }
}
