// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Buffered subtitle event records for the BDN XML output path.
//!
//! The XML document needs whole-stream attributes (first in-time, last
//! out-time, event count) before the first `<Event>` is written, so events
//! are collected here during segmentation and emitted at the end. Long
//! events are chopped into fixed-length spans on insertion, giving players
//! periodic seek points; all spans of one source event share the same
//! graphics, so they reference the same PNG assets.

use crate::Rect;

/// One subtitle event: a frame span plus its graphic placement.
///
/// `end_frame` is exclusive; the event is visible from `start_frame` until
/// just before `end_frame`. `image_number` names the PNG asset set and
/// stays that of the original event across span splits.
#[derive(Debug, Clone)]
pub struct Event {
    pub image_number: u64,
    pub start_frame: u64,
    pub end_frame: u64,
    pub graphics: usize,
    pub forced: bool,
    pub crops: [Rect; 2],
}

/// Cuts `start..end` into spans of `split_at` frames.
///
/// A tail shorter than `min_split` is absorbed into its predecessor rather
/// than forming a stub span, so segments are peeled off only while at least
/// `split_at + min_split` frames remain. `split_at == 0` disables
/// splitting.
pub fn split_spans(start: u64, end: u64, split_at: u64, min_split: u64) -> Vec<(u64, u64)> {
    debug_assert!(start <= end);
    let mut spans = Vec::new();
    if split_at == 0 {
        spans.push((start, end));
        return spans;
    }
    let mut start = start;
    let mut d = end - start;
    while d >= split_at + min_split {
        d -= split_at;
        spans.push((start, start + split_at));
        start += split_at;
    }
    if d > 0 {
        spans.push((start, start + d));
    }
    spans
}

/// Ordered list of events, front-to-back.
#[derive(Debug, Default)]
pub struct EventList {
    events: Vec<Event>,
}

impl EventList {
    #[must_use]
    pub fn new() -> Self {
        EventList::default()
    }

    /// Records one detected event, splitting it per `split_at`/`min_split`.
    #[allow(clippy::too_many_arguments)] // one field per event attribute
    pub fn push_split(
        &mut self,
        start: u64,
        end: u64,
        split_at: u64,
        min_split: u64,
        graphics: usize,
        crops: [Rect; 2],
        forced: bool,
    ) {
        for (s, e) in split_spans(start, end, split_at, min_split) {
            self.events.push(Event {
                image_number: start,
                start_frame: s,
                end_frame: e,
                graphics,
                forced,
                crops,
            });
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Event> {
        self.events.first()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }
}

impl<'a> IntoIterator for &'a EventList {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_split_keeps_span_whole() {
        assert_eq!(split_spans(5, 105, 0, 3), vec![(5, 105)]);
    }

    #[test]
    fn hundred_frames_split_at_thirty() {
        // 30 + 30 + 30 + 10: the 10-frame tail clears min_split and stands.
        assert_eq!(
            split_spans(0, 100, 30, 3),
            vec![(0, 30), (30, 60), (60, 90), (90, 100)]
        );
    }

    #[test]
    fn short_tail_absorbed_into_predecessor() {
        // 62 frames at split 30 / min 3: a 2-frame tail would be a stub, so
        // the last segment keeps it.
        assert_eq!(split_spans(0, 62, 30, 3), vec![(0, 30), (30, 62)]);
    }

    #[test]
    fn span_shorter_than_split_is_untouched() {
        assert_eq!(split_spans(10, 25, 30, 3), vec![(10, 25)]);
    }

    #[test]
    fn split_events_share_the_image_number() {
        let mut list = EventList::new();
        list.push_split(40, 140, 30, 3, 1, [Rect::default(); 2], false);
        assert_eq!(list.len(), 4);
        assert!(list.iter().all(|e| e.image_number == 40));
        assert_eq!(list.first().unwrap().start_frame, 40);
        assert_eq!(list.last().unwrap().end_frame, 140);
    }
}
