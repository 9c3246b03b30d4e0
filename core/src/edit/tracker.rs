use crate::edit::esf::{
    EditAction, EditFile, EsfMode, RawEdit, MAX_TIME_DIFF, MULTIPLICITY_FACTOR,
};
use crate::ping::{BeamFlag, Ping};
use crate::prelude::StageResult;
use log::{debug, warn};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseState {
    Unused,
    Used,
    /// Matched a (time, beam) another edit had already consumed.
    Duplicate,
    /// Target beam was null when the edit came due.
    TiedToNull,
}

#[derive(Debug, Clone)]
struct TrackedEdit {
    time: f64,
    beam: i32,
    action: Option<EditAction>,
    state: UseState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditSummary {
    pub used: usize,
    pub unused: usize,
    pub duplicate: usize,
    pub tied_to_null: usize,
}

/// Replays a loaded edit list against pings in file order.
pub struct EditTracker {
    edits: Vec<TrackedEdit>,
    mode: EsfMode,
    max_time_diff: f64,
}

impl EditTracker {
    pub fn load<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        Ok(Self::new(EditFile::load(path)?))
    }

    pub fn new(file: EditFile) -> Self {
        let max_time_diff = file.max_time_diff();
        let mut records = file.records;
        records.sort_by(|a, b| a.time.total_cmp(&b.time));
        let edits = records
            .iter()
            .map(|record| {
                let action = EditAction::from_code(record.action);
                if action.is_none() {
                    warn!(
                        "edit at {:.6} beam {} has unknown action {}",
                        record.time, record.beam, record.action
                    );
                }
                TrackedEdit {
                    time: record.time,
                    beam: record.beam,
                    action,
                    state: UseState::Unused,
                }
            })
            .collect();
        Self {
            edits,
            mode: file.mode,
            max_time_diff,
        }
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    pub fn state(&self, index: usize) -> Option<UseState> {
        self.edits.get(index).map(|edit| edit.state)
    }

    /// Applies every edit due for `ping`; returns the number of beams whose flag changed.
    pub fn apply(&mut self, ping: &mut Ping) -> usize {
        let offset = MULTIPLICITY_FACTOR as i64 * ping.multiplicity as i64;
        let limit = offset + MULTIPLICITY_FACTOR as i64;
        let window = self.max_time_diff;
        let first = self
            .edits
            .partition_point(|edit| edit.time < ping.time - window);
        let nbeams = ping.beams.len();
        let before: Vec<BeamFlag> = ping.beams.iter().map(|beam| beam.flag).collect();
        let mut touched = vec![false; nbeams];
        let mut matched = false;

        for edit in self.edits[first..]
            .iter_mut()
            .take_while(|edit| edit.time <= ping.time + window)
        {
            let beam = edit.beam as i64;
            if (edit.time - ping.time).abs() >= window || beam < offset || beam >= limit {
                continue;
            }
            matched = true;
            let index = (beam - offset) as usize;
            let Some(action) = edit.action else {
                continue;
            };
            if index >= nbeams {
                debug!(
                    "edit at {:.6} targets beam {} of a {}-beam ping",
                    edit.time, index, nbeams
                );
                continue;
            }
            match edit.state {
                UseState::Unused => {}
                UseState::Used => {
                    edit.state = UseState::Duplicate;
                    continue;
                }
                UseState::Duplicate | UseState::TiedToNull => continue,
            }
            let flag = &mut ping.beams[index].flag;
            if flag.is_null() {
                edit.state = UseState::TiedToNull;
                continue;
            }
            edit.state = if touched[index] {
                UseState::Duplicate
            } else {
                UseState::Used
            };
            *flag = action.resulting_flag();
            touched[index] = true;
        }

        // implicit defaults only reach pings some edit falls on
        let implicit = match self.mode {
            _ if !matched => None,
            EsfMode::Explicit => None,
            EsfMode::ImplicitNull => Some(BeamFlag::Null),
            EsfMode::ImplicitGood => Some(BeamFlag::Ok),
        };
        if let Some(default_flag) = implicit {
            for (beam, _) in ping
                .beams
                .iter_mut()
                .zip(touched.iter())
                .filter(|(_, touched)| !**touched)
            {
                beam.flag = default_flag;
            }
        }

        ping.beams
            .iter()
            .zip(before.iter())
            .filter(|(beam, flag)| beam.flag != **flag)
            .count()
    }

    pub fn summary(&self) -> EditSummary {
        let mut summary = EditSummary::default();
        for edit in &self.edits {
            match edit.state {
                UseState::Unused => summary.unused += 1,
                UseState::Used => summary.used += 1,
                UseState::Duplicate => summary.duplicate += 1,
                UseState::TiedToNull => summary.tied_to_null += 1,
            }
        }
        summary
    }
}

/// Undo records for every beam whose flag differs from its pre-pipeline value.
pub fn reverse_edits(ping: &Ping) -> Vec<RawEdit> {
    ping.beams
        .iter()
        .zip(ping.original_flags.iter())
        .enumerate()
        .filter(|(_, (beam, original))| beam.flag != **original)
        .map(|(index, (_, original))| {
            RawEdit::new(
                ping.time,
                index,
                ping.multiplicity,
                EditAction::restoring(*original),
            )
        })
        .collect()
}

/// Numbers pings that share a timestamp so their edits stay distinct.
#[derive(Debug, Default)]
pub struct MultiplicityCounter {
    last_time: Option<f64>,
    multiplicity: u32,
}

impl MultiplicityCounter {
    pub fn next(&mut self, time: f64) -> u32 {
        self.multiplicity = match self.last_time {
            Some(last) if (time - last).abs() < MAX_TIME_DIFF => self.multiplicity + 1,
            _ => 0,
        };
        self.last_time = Some(time);
        self.multiplicity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::Beam;

    fn ping(time: f64, flags: &[BeamFlag]) -> Ping {
        let mut ping = Ping {
            time,
            beams: flags
                .iter()
                .map(|&flag| Beam {
                    flag,
                    ..Beam::sounding(100.0, 0.0, 0.0)
                })
                .collect(),
            ..Default::default()
        };
        ping.begin_processing(0);
        ping
    }

    fn tracker(records: Vec<RawEdit>, mode: EsfMode) -> EditTracker {
        EditTracker::new(EditFile {
            version: 3,
            mode,
            header: None,
            records,
        })
    }

    #[test]
    fn unflag_restores_beam_and_emits_flag_reverse() {
        let mut tracker = tracker(
            vec![RawEdit::new(100.0, 5, 0, EditAction::Unflag)],
            EsfMode::Explicit,
        );
        let mut flags = vec![BeamFlag::Ok; 8];
        flags[5] = BeamFlag::Manual;
        let mut ping = ping(100.0, &flags);

        assert_eq!(tracker.apply(&mut ping), 1);
        assert_eq!(ping.beams[5].flag, BeamFlag::Ok);

        let reverse = reverse_edits(&ping);
        assert_eq!(reverse.len(), 1);
        assert_eq!(reverse[0].beam, 5);
        assert_eq!(reverse[0].time, 100.0);
        assert_eq!(EditAction::from_code(reverse[0].action), Some(EditAction::Flag));
        assert_eq!(tracker.summary().used, 1);
    }

    #[test]
    fn null_target_is_tied_to_null() {
        let mut tracker = tracker(
            vec![RawEdit::new(50.0, 1, 0, EditAction::Flag)],
            EsfMode::Explicit,
        );
        let mut ping = ping(50.00005, &[BeamFlag::Ok, BeamFlag::Null]);
        assert_eq!(tracker.apply(&mut ping), 0);
        assert_eq!(tracker.state(0), Some(UseState::TiedToNull));
        assert!(reverse_edits(&ping).is_empty());
    }

    #[test]
    fn second_edit_on_same_beam_is_duplicate_and_wins() {
        let mut tracker = tracker(
            vec![
                RawEdit::new(10.0, 0, 0, EditAction::Flag),
                RawEdit::new(10.0, 0, 0, EditAction::Filter),
            ],
            EsfMode::Explicit,
        );
        let mut ping = ping(10.0, &[BeamFlag::Ok, BeamFlag::Ok]);
        tracker.apply(&mut ping);
        assert_eq!(ping.beams[0].flag, BeamFlag::Filter);
        let summary = tracker.summary();
        assert_eq!(summary.used, 1);
        assert_eq!(summary.duplicate, 1);
    }

    #[test]
    fn edits_outside_window_or_multiplicity_are_unused() {
        let mut tracker = tracker(
            vec![
                RawEdit::new(10.001, 0, 0, EditAction::Flag),
                RawEdit::new(10.0, 0, 1, EditAction::Flag),
                RawEdit::new(10.0, 40, 0, EditAction::Flag),
            ],
            EsfMode::Explicit,
        );
        let mut ping = ping(10.0, &[BeamFlag::Ok; 4]);
        assert_eq!(tracker.apply(&mut ping), 0);
        assert_eq!(tracker.summary().unused, 3);
    }

    #[test]
    fn repeated_ping_sees_multiplicity_edits() {
        let mut tracker = tracker(
            vec![RawEdit::new(10.0, 2, 1, EditAction::Flag)],
            EsfMode::Explicit,
        );
        let mut counter = MultiplicityCounter::default();
        let mut first = ping(10.0, &[BeamFlag::Ok; 4]);
        first.begin_processing(counter.next(10.0));
        let mut second = ping(10.0, &[BeamFlag::Ok; 4]);
        second.begin_processing(counter.next(10.0));

        assert_eq!(tracker.apply(&mut first), 0);
        assert_eq!(tracker.apply(&mut second), 1);
        assert_eq!(second.beams[2].flag, BeamFlag::Manual);
        assert_eq!(reverse_edits(&second)[0].beam, 1_000_002);
    }

    #[test]
    fn implicit_good_resets_untouched_beams() {
        let mut tracker = tracker(
            vec![RawEdit::new(1.0, 0, 0, EditAction::Flag)],
            EsfMode::ImplicitGood,
        );
        let mut ping = ping(1.0, &[BeamFlag::Ok, BeamFlag::Filter, BeamFlag::Sonar]);
        assert_eq!(tracker.apply(&mut ping), 3);
        assert_eq!(ping.beams[0].flag, BeamFlag::Manual);
        assert_eq!(ping.beams[1].flag, BeamFlag::Ok);
        assert_eq!(ping.beams[2].flag, BeamFlag::Ok);
    }

    #[test]
    fn implicit_null_leaves_pings_without_edits_alone() {
        let mut tracker = tracker(
            vec![RawEdit::new(10.0, 1, 0, EditAction::Flag)],
            EsfMode::ImplicitNull,
        );
        let mut quiet = ping(50.0, &[BeamFlag::Ok; 3]);
        assert_eq!(tracker.apply(&mut quiet), 0);
        assert!(quiet.beams.iter().all(|beam| beam.flag == BeamFlag::Ok));

        let mut edited = ping(10.0, &[BeamFlag::Ok; 3]);
        assert_eq!(tracker.apply(&mut edited), 3);
        assert_eq!(edited.beams[0].flag, BeamFlag::Null);
        assert_eq!(edited.beams[1].flag, BeamFlag::Manual);
        assert_eq!(edited.beams[2].flag, BeamFlag::Null);
    }

    #[test]
    fn multiplicity_resets_on_new_time() {
        let mut counter = MultiplicityCounter::default();
        assert_eq!(counter.next(1.0), 0);
        assert_eq!(counter.next(1.00001), 1);
        assert_eq!(counter.next(2.0), 0);
    }
}
