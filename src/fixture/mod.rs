//! Scheduled and ad-hoc matches, their scores, and the merge with pre-workflow results.

use crate::prelude::*;

pub(crate) mod workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[sqlx(type_name = "fixture_side")]
pub(crate) enum Side {
    A,
    B,
}

impl Side {
    pub(crate) fn opponent(&self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

serde_plain::derive_display_from_serialize!(Side);
serde_plain::derive_fromstr_from_deserialize!(Side);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Sequence)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "fixture_status", rename_all = "snake_case")]
pub(crate) enum FixtureStatus {
    Scheduled,
    AwaitingConfirmation,
    Disputed,
    Completed,
    Cancelled,
}

serde_plain::derive_display_from_serialize!(FixtureStatus);

/// Where a fixture record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Source {
    Workflow,
    /// Results recorded before the submission workflow existed. Read-only.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Participant {
    pub(crate) user: Id<Users>,
    pub(crate) side: Option<Side>,
}

/// Games won by each side in one set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SetScore {
    pub(crate) a: u8,
    pub(crate) b: u8,
}

impl SetScore {
    fn winner(&self) -> Option<Side> {
        match self.a.cmp(&self.b) {
            Greater => Some(Side::A),
            Less => Some(Side::B),
            Equal => None,
        }
    }
}

impl FromStr for SetScore {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (a, b) = s.split_once('-').ok_or_else(|| Error::Validation(Cow::Owned(format!("set score {s:?} is not of the form 6-4"))))?;
        let parse = |games: &str| games.trim().parse().map_err(|_| Error::Validation(Cow::Owned(format!("set score {s:?} is not of the form 6-4"))));
        Ok(Self { a: parse(a)?, b: parse(b)? })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScoreEntry {
    pub(crate) user: Id<Users>,
    pub(crate) points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Score {
    /// Tennis and pickleball.
    Sets(Vec<SetScore>),
    Goals {
        a: u32,
        b: u32,
    },
    Entries(Vec<ScoreEntry>),
}

impl Score {
    /// Total points scored by sides A and B, where the score has sides.
    pub(crate) fn side_totals(&self) -> Option<(u32, u32)> {
        match self {
            Self::Sets(sets) => Some(sets.iter().fold((0, 0), |(a, b), set| (a + u32::from(set.a), b + u32::from(set.b)))),
            Self::Goals { a, b } => Some((*a, *b)),
            Self::Entries(_) => None,
        }
    }

    /// The side this score says won: `Some(None)` for a draw, `None` if the score has no sides.
    pub(crate) fn implied_winner(&self) -> Option<Option<Side>> {
        match self {
            Self::Sets(sets) => {
                let won_by_a = sets.iter().filter(|set| set.winner() == Some(Side::A)).count();
                let won_by_b = sets.iter().filter(|set| set.winner() == Some(Side::B)).count();
                Some(match won_by_a.cmp(&won_by_b) {
                    Greater => Some(Side::A),
                    Less => Some(Side::B),
                    Equal => None,
                })
            }
            Self::Goals { a, b } => Some(match a.cmp(b) {
                Greater => Some(Side::A),
                Less => Some(Side::B),
                Equal => None,
            }),
            Self::Entries(_) => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn points_of(&self, user: Id<Users>) -> Option<i32> {
        let Self::Entries(entries) = self else { return None };
        entries.iter().find(|entry| entry.user == user).map(|entry| entry.points)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Fixture {
    pub(crate) id: Id<Fixtures>,
    pub(crate) league: Id<Leagues>,
    /// `None` for ad-hoc fixtures.
    pub(crate) week: Option<u8>,
    pub(crate) scheduled_date: Option<NaiveDate>,
    pub(crate) status: FixtureStatus,
    pub(crate) winner: Option<Side>,
    pub(crate) participants: Vec<Participant>,
    pub(crate) score: Option<Score>,
    pub(crate) source: Source,
    pub(crate) latest_submission: Option<Id<Submissions>>,
    pub(crate) notes: Option<String>,
    pub(crate) version: u32,
}

impl Fixture {
    pub(crate) fn new(league: Id<Leagues>, week: Option<u8>, scheduled_date: Option<NaiveDate>, participants: Vec<Participant>) -> Self {
        Self {
            id: Id::new(),
            status: FixtureStatus::Scheduled,
            winner: None,
            score: None,
            source: Source::Workflow,
            latest_submission: None,
            notes: None,
            version: 0,
            league, week, scheduled_date, participants,
        }
    }

    pub(crate) fn is_participant(&self, user: Id<Users>) -> bool {
        self.participants.iter().any(|participant| participant.user == user)
    }

    pub(crate) fn side_of(&self, user: Id<Users>) -> Option<Side> {
        self.participants.iter().find(|participant| participant.user == user)?.side
    }

    pub(crate) fn side(&self, side: Side) -> impl Iterator<Item = Id<Users>> + '_ {
        self.participants.iter().filter(move |participant| participant.side == Some(side)).map(|participant| participant.user)
    }

    /// Whether both sides have at least one participant.
    pub(crate) fn has_two_sides(&self) -> bool {
        self.side(Side::A).next().is_some() && self.side(Side::B).next().is_some()
    }

    pub(crate) fn append_note(&mut self, note: &str) {
        match &mut self.notes {
            Some(notes) => {
                notes.push('\n');
                notes.push_str(note);
            }
            None => self.notes = Some(note.to_owned()),
        }
    }
}

/// Combines pre-workflow results with workflow fixtures.
///
/// A workflow record replaces a legacy record with the same ID. The result is ordered by week with ad-hoc fixtures last, then by date, then by ID.
pub(crate) fn merge(legacy: Vec<Fixture>, workflow: Vec<Fixture>) -> Vec<Fixture> {
    let workflow_ids = workflow.iter().map(|fixture| fixture.id).collect::<HashSet<_>>();
    legacy.into_iter()
        .filter(|fixture| !workflow_ids.contains(&fixture.id))
        .chain(workflow)
        .sorted_by(|fixture1, fixture2|
            fixture1.week.is_none().cmp(&fixture2.week.is_none())
                .then_with(|| fixture1.week.cmp(&fixture2.week))
                .then_with(|| fixture1.scheduled_date.is_none().cmp(&fixture2.scheduled_date.is_none()))
                .then_with(|| fixture1.scheduled_date.cmp(&fixture2.scheduled_date))
                .then_with(|| fixture1.id.cmp(&fixture2.id))
        )
        .collect()
}
