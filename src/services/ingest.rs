use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::services::analyzer::AnalysisResult;

/// One batch item that survived analysis, ready for the observation fold
#[derive(Debug, Clone)]
pub struct AnalyzedFrame {
    pub room_id: String,
    pub timestamp: DateTime<Utc>,
    pub camera_id: Option<String>,
    pub video_id: Option<String>,
    pub mime_type: String,
    pub image: Vec<u8>,
    pub analysis: AnalysisResult,
}

/// Observation row produced by the fold, pending insert
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationDraft {
    pub room_id: String,
    pub timestamp: DateTime<Utc>,
    pub person_count: i32,
    pub entry_count: i32,
}

/// Result of folding one batch into per-room observation rows
#[derive(Debug, Default)]
pub struct FoldOutcome {
    pub rows: Vec<ObservationDraft>,
    /// (room, timestamp) keys skipped as idempotent replays
    pub skipped: Vec<(String, DateTime<Utc>)>,
}

/// Fold analyzed frames into observation rows with a monotonic per-room
/// entry counter.
///
/// `baselines` carries the highest entry counter already stored for each
/// room inside the active window, so the counter continues from the last
/// known value instead of resetting to zero. Frames are folded sorted by
/// (room, timestamp); out-of-order arrival within one batch cannot
/// corrupt counter ordering. A frame whose (room, timestamp) key already
/// exists, in the store or earlier in the same batch, is skipped.
pub fn fold_observations(
    frames: &[AnalyzedFrame],
    baselines: &HashMap<String, i32>,
    existing: &HashSet<(String, DateTime<Utc>)>,
) -> FoldOutcome {
    let mut ordered: Vec<&AnalyzedFrame> = frames.iter().collect();
    ordered.sort_by(|a, b| {
        a.room_id
            .cmp(&b.room_id)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    let mut counters: HashMap<&str, i32> = HashMap::new();
    let mut seen_in_batch: HashSet<(String, DateTime<Utc>)> = HashSet::new();
    let mut outcome = FoldOutcome::default();

    for frame in ordered {
        let key = (frame.room_id.clone(), frame.timestamp);
        if existing.contains(&key) || !seen_in_batch.insert(key.clone()) {
            outcome.skipped.push(key);
            continue;
        }

        let counter = counters
            .entry(frame.room_id.as_str())
            .or_insert_with(|| baselines.get(&frame.room_id).copied().unwrap_or(0));
        if frame.analysis.entry {
            *counter += 1;
        }

        outcome.rows.push(ObservationDraft {
            room_id: frame.room_id.clone(),
            timestamp: frame.timestamp,
            person_count: frame.analysis.person_count as i32,
            entry_count: *counter,
        });
    }

    outcome
}

/// Select the frames worth keeping for human review: at or above the
/// suspicion threshold, carrying a video id, ranked descending by
/// suspicion with ties broken by earliest timestamp, capped at `cap`.
pub fn select_evidence<'a>(
    frames: &'a [AnalyzedFrame],
    threshold: f64,
    cap: usize,
) -> Vec<&'a AnalyzedFrame> {
    let mut candidates: Vec<&AnalyzedFrame> = frames
        .iter()
        .filter(|f| f.video_id.is_some() && f.analysis.suspicion >= threshold)
        .collect();

    candidates.sort_by(|a, b| {
        b.analysis
            .suspicion
            .partial_cmp(&a.analysis.suspicion)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.timestamp.cmp(&b.timestamp))
    });

    candidates.truncate(cap);
    candidates
}

/// Aggregate judgment for one tracked video, recomputed locally from the
/// batch's frames. The score is the worst frame, not the mean: one
/// high-suspicion frame warrants review regardless of how quiet the rest
/// of the batch was.
pub fn summarize_video(frames: &[&AnalyzedFrame]) -> (String, f64, String) {
    let score = frames
        .iter()
        .map(|f| f.analysis.suspicion)
        .fold(0.0f64, f64::max);

    let (level, recommendation) = if score >= 0.6 {
        ("high", "Dispatch staff to the room and review the stored evidence frames.")
    } else if score >= 0.3 {
        ("elevated", "Review the flagged frames for this video.")
    } else {
        ("low", "No action needed.")
    };

    (level.to_string(), score, recommendation.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(room: &str, ts_min: i64, entry: bool, suspicion: f64) -> AnalyzedFrame {
        AnalyzedFrame {
            room_id: room.to_string(),
            timestamp: Utc
                .timestamp_millis_opt(1_700_000_000_000 + ts_min * 60_000)
                .single()
                .unwrap(),
            camera_id: None,
            video_id: Some("vid_1".to_string()),
            mime_type: "image/jpeg".to_string(),
            image: vec![0xFF, 0xD8],
            analysis: AnalysisResult {
                person_count: 1,
                entry,
                confidence: 0.9,
                suspicion,
                anomalies: vec![],
                summary: None,
            },
        }
    }

    #[test]
    fn counters_are_monotonic_within_a_batch() {
        let frames = vec![
            frame("101", 0, true, 0.1),
            frame("101", 5, true, 0.1),
            frame("101", 10, false, 0.1),
        ];
        let outcome = fold_observations(&frames, &HashMap::new(), &HashSet::new());
        let counters: Vec<i32> = outcome.rows.iter().map(|r| r.entry_count).collect();
        assert_eq!(counters, vec![1, 2, 2]);
    }

    #[test]
    fn baseline_seeds_the_counter_across_batches() {
        // First batch: two entries at 10:00 and 10:05 produce counters 1, 2.
        let first = vec![frame("101", 0, true, 0.1), frame("101", 5, true, 0.1)];
        let outcome = fold_observations(&first, &HashMap::new(), &HashSet::new());
        assert_eq!(
            outcome.rows.iter().map(|r| r.entry_count).collect::<Vec<_>>(),
            vec![1, 2]
        );

        // Second call for the same room sees a baseline of 2; its single
        // entry at 10:10 lands on 3.
        let mut baselines = HashMap::new();
        baselines.insert("101".to_string(), 2);
        let second = vec![frame("101", 10, true, 0.1)];
        let outcome = fold_observations(&second, &baselines, &HashSet::new());
        assert_eq!(outcome.rows[0].entry_count, 3);
    }

    #[test]
    fn out_of_order_frames_are_folded_in_timestamp_order() {
        let frames = vec![
            frame("101", 10, true, 0.1),
            frame("101", 0, true, 0.1),
            frame("101", 5, false, 0.1),
        ];
        let outcome = fold_observations(&frames, &HashMap::new(), &HashSet::new());
        let timestamps: Vec<_> = outcome.rows.iter().map(|r| r.timestamp).collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            outcome.rows.iter().map(|r| r.entry_count).collect::<Vec<_>>(),
            vec![1, 1, 2]
        );
    }

    #[test]
    fn existing_keys_are_skipped_not_recounted() {
        let frames = vec![frame("101", 0, true, 0.1), frame("101", 5, true, 0.1)];
        let mut existing = HashSet::new();
        existing.insert(("101".to_string(), frames[0].timestamp));

        let mut baselines = HashMap::new();
        baselines.insert("101".to_string(), 1);

        let outcome = fold_observations(&frames, &baselines, &existing);
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.rows[0].entry_count, 2);
    }

    #[test]
    fn duplicate_keys_within_one_batch_are_skipped() {
        let frames = vec![frame("101", 0, true, 0.1), frame("101", 0, true, 0.1)];
        let outcome = fold_observations(&frames, &HashMap::new(), &HashSet::new());
        assert_eq!(outcome.rows.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.rows[0].entry_count, 1);
    }

    #[test]
    fn rooms_count_independently() {
        let frames = vec![
            frame("101", 0, true, 0.1),
            frame("202", 0, true, 0.1),
            frame("101", 5, true, 0.1),
        ];
        let outcome = fold_observations(&frames, &HashMap::new(), &HashSet::new());
        let for_room = |room: &str| -> Vec<i32> {
            outcome
                .rows
                .iter()
                .filter(|r| r.room_id == room)
                .map(|r| r.entry_count)
                .collect()
        };
        assert_eq!(for_room("101"), vec![1, 2]);
        assert_eq!(for_room("202"), vec![1]);
    }

    #[test]
    fn evidence_is_capped_and_ranked() {
        let frames = vec![
            frame("101", 0, false, 0.9),
            frame("101", 1, false, 0.5),
            frame("101", 2, false, 0.7),
            frame("101", 3, false, 0.3),
            frame("101", 4, false, 0.1), // below threshold
        ];
        let selected = select_evidence(&frames, 0.15, 3);
        let scores: Vec<f64> = selected.iter().map(|f| f.analysis.suspicion).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.5]);
    }

    #[test]
    fn evidence_ties_break_by_earliest_timestamp() {
        let frames = vec![
            frame("101", 5, false, 0.8),
            frame("101", 1, false, 0.8),
            frame("101", 3, false, 0.8),
        ];
        let selected = select_evidence(&frames, 0.15, 2);
        assert_eq!(selected[0].timestamp, frames[1].timestamp);
        assert_eq!(selected[1].timestamp, frames[2].timestamp);
    }

    #[test]
    fn evidence_requires_a_video_id() {
        let mut untracked = frame("101", 0, false, 0.9);
        untracked.video_id = None;
        let frames = vec![untracked, frame("101", 1, false, 0.4)];
        let selected = select_evidence(&frames, 0.15, 5);
        assert_eq!(selected.len(), 1);
        assert!((selected[0].analysis.suspicion - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn video_summary_uses_worst_frame() {
        let frames = vec![frame("101", 0, false, 0.2), frame("101", 1, false, 0.7)];
        let refs: Vec<&AnalyzedFrame> = frames.iter().collect();
        let (level, score, _) = summarize_video(&refs);
        assert_eq!(level, "high");
        assert!((score - 0.7).abs() < f64::EPSILON);

        let frames = vec![frame("101", 0, false, 0.05)];
        let refs: Vec<&AnalyzedFrame> = frames.iter().collect();
        let (level, _, _) = summarize_video(&refs);
        assert_eq!(level, "low");
    }
}
