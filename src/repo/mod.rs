//! The transactional record store behind the engine.

use {
    async_trait::async_trait,
    crate::{
        fixture::{
            Fixture,
            workflow::FixtureRecord,
        },
        league::{
            League,
            Member,
            rules,
            teams::TeamPair,
        },
        prelude::*,
        running::RunningSession,
    },
};

#[cfg(test)] pub(crate) mod memory;
pub(crate) mod pg;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)] Json(#[from] serde_json::Error),
    #[error(transparent)] Rules(#[from] rules::Error),
    #[error(transparent)] Sql(#[from] sqlx::Error),
    #[error("{kind} {id} was modified concurrently")]
    VersionConflict {
        kind: &'static str,
        id: u64,
    },
    #[error("league {0} already has a schedule")]
    ScheduleConflict(Id<Leagues>),
    #[error("stored {kind} {id} is invalid: {reason}")]
    Corrupt {
        kind: &'static str,
        id: u64,
        reason: Cow<'static, str>,
    },
}

impl Error {
    /// Whether repeating the operation on freshly loaded state may succeed.
    pub(crate) fn is_version_conflict(&self) -> bool {
        match self {
            Self::VersionConflict { .. } => true,
            | Self::Json(_)
            | Self::Rules(_)
            | Self::Sql(_)
            | Self::ScheduleConflict(_)
            | Self::Corrupt { .. }
                => false,
        }
    }
}

#[async_trait]
pub(crate) trait LeagueRepository: Send + Sync {
    /// Stores a new league together with its owner.
    async fn insert_league(&self, league: &League, owner: &Member) -> Result<(), Error>;
    async fn league(&self, id: Id<Leagues>) -> Result<Option<League>, Error>;
    async fn update_league(&self, league: &League) -> Result<(), Error>;
    /// Removes a league and everything that belongs to it.
    async fn delete_league(&self, id: Id<Leagues>) -> Result<(), Error>;

    /// Members in join order.
    async fn members(&self, league: Id<Leagues>) -> Result<Vec<Member>, Error>;
    /// Returns `false` if the user already is a member.
    async fn add_member(&self, league: Id<Leagues>, member: &Member) -> Result<bool, Error>;
    /// Returns `false` if the user is not a member. Owners are never removed.
    async fn remove_member(&self, league: Id<Leagues>, user: Id<Users>) -> Result<bool, Error>;

    async fn assigned_teams(&self, league: Id<Leagues>) -> Result<Vec<TeamPair>, Error>;
    async fn replace_assigned_teams(&self, league: Id<Leagues>, pairs: &[TeamPair]) -> Result<(), Error>;

    /// Whether any week-numbered fixture or any running session exists for the league.
    async fn has_schedule(&self, league: Id<Leagues>) -> Result<bool, Error>;
    /// Atomically stores a generated schedule, failing with [`Error::ScheduleConflict`] if one already exists.
    async fn insert_schedule(&self, league: Id<Leagues>, fixtures: &[Fixture], sessions: &[RunningSession]) -> Result<(), Error>;

    async fn insert_fixture(&self, fixture: &Fixture) -> Result<(), Error>;
    async fn fixture(&self, id: Id<Fixtures>) -> Result<Option<FixtureRecord>, Error>;
    /// Workflow and legacy fixtures of a league, merged.
    async fn fixtures(&self, league: Id<Leagues>) -> Result<Vec<Fixture>, Error>;
    /// Stores a fixture and its submissions if the stored version still equals `expected_version`.
    async fn save_fixture(&self, record: &FixtureRecord, expected_version: u32) -> Result<(), Error>;

    async fn insert_session(&self, session: &RunningSession) -> Result<(), Error>;
    async fn session(&self, id: Id<RunningSessions>) -> Result<Option<RunningSession>, Error>;
    async fn sessions(&self, league: Id<Leagues>) -> Result<Vec<RunningSession>, Error>;
    /// Stores a session and its runs if the stored version still equals `expected_version`.
    async fn save_session(&self, session: &RunningSession, expected_version: u32) -> Result<(), Error>;
}
