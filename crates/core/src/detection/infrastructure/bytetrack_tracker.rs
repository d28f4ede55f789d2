/// Simplified ByteTrack association for the continuous face tracker.
///
/// High-confidence detections are matched first and may open new tracks;
/// low-confidence detections only extend tracks that already exist. Tracks
/// that go unmatched are kept for `max_lost` updates so a face survives a
/// momentary miss, and `last_tracks` serves the boxes of the most recent
/// update between detection passes.
use std::collections::HashSet;

use super::math::{bbox_iou, ScoredBox};

#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: u32,
    pub bbox: [f64; 4],
    pub score: f64,
}

const HIGH_THRESH: f64 = 0.5;
const MATCH_THRESH: f64 = 0.3;

#[derive(Clone, Debug)]
struct TrackState {
    id: u32,
    bbox: [f64; 4],
    score: f64,
    polls_lost: usize,
    matched: bool,
}

pub struct ByteTracker {
    tracks: Vec<TrackState>,
    next_id: u32,
    max_lost: usize,
}

impl ByteTracker {
    pub fn new(max_lost: usize) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            max_lost,
        }
    }

    /// Associates a fresh detection pass with the existing tracks and
    /// returns the tracks matched in this pass.
    pub fn update(&mut self, detections: &[ScoredBox]) -> Vec<Track> {
        let (high, low): (Vec<usize>, Vec<usize>) =
            (0..detections.len()).partition(|&i| detections[i].score >= HIGH_THRESH);

        for track in &mut self.tracks {
            track.matched = false;
        }
        let num_existing = self.tracks.len();

        let candidates: Vec<usize> = (0..num_existing).collect();
        let matched_high = self.associate(&candidates, &high, detections);

        let unmatched: Vec<usize> = (0..num_existing)
            .filter(|&i| !self.tracks[i].matched)
            .collect();
        self.associate(&unmatched, &low, detections);

        for &di in high.iter().filter(|di| !matched_high.contains(di)) {
            self.tracks.push(TrackState {
                id: self.next_id,
                bbox: detections[di].corners,
                score: detections[di].score,
                polls_lost: 0,
                matched: true,
            });
            self.next_id += 1;
        }

        for track in self.tracks.iter_mut().take(num_existing) {
            if !track.matched {
                track.polls_lost += 1;
            }
        }
        let max_lost = self.max_lost;
        self.tracks.retain(|t| t.polls_lost <= max_lost);

        self.last_tracks()
    }

    /// Tracks matched by the most recent update.
    pub fn last_tracks(&self) -> Vec<Track> {
        self.tracks
            .iter()
            .filter(|t| t.matched)
            .map(|t| Track {
                id: t.id,
                bbox: t.bbox,
                score: t.score,
            })
            .collect()
    }

    /// Drops all tracking state. Track ids restart from 1.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn associate(
        &mut self,
        track_indices: &[usize],
        det_indices: &[usize],
        detections: &[ScoredBox],
    ) -> HashSet<usize> {
        let mut matched = HashSet::new();
        for (ti, di) in greedy_match(&self.tracks, track_indices, det_indices, detections) {
            let track = &mut self.tracks[ti];
            track.bbox = detections[di].corners;
            track.score = detections[di].score;
            track.polls_lost = 0;
            track.matched = true;
            matched.insert(di);
        }
        matched
    }
}

/// Greedy IoU matching: pairs sorted by descending IoU, each track and
/// detection used at most once.
fn greedy_match(
    tracks: &[TrackState],
    track_indices: &[usize],
    det_indices: &[usize],
    detections: &[ScoredBox],
) -> Vec<(usize, usize)> {
    let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
    for &ti in track_indices {
        for &di in det_indices {
            let iou = bbox_iou(&tracks[ti].bbox, &detections[di].corners);
            if iou >= MATCH_THRESH {
                pairs.push((ti, di, iou));
            }
        }
    }
    pairs.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let mut used_tracks = HashSet::new();
    let mut used_dets = HashSet::new();
    let mut matches = Vec::new();
    for (ti, di, _) in pairs {
        if !used_tracks.contains(&ti) && !used_dets.contains(&di) {
            used_tracks.insert(ti);
            used_dets.insert(di);
            matches.push((ti, di));
        }
    }
    matches
}
