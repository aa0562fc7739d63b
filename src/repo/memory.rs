//! In-process [`LeagueRepository`] for tests.

use {
    std::mem,
    async_trait::async_trait,
    tokio::sync::Mutex,
    crate::{
        fixture::{
            self,
            Fixture,
            workflow::FixtureRecord,
        },
        id::Table,
        league::{
            League,
            Member,
            MemberRole,
            teams::TeamPair,
        },
        prelude::*,
        repo::{
            Error,
            LeagueRepository,
        },
        running::RunningSession,
    },
};

type FixtureHook = Box<dyn FnOnce(&mut FixtureRecord) + Send>;

#[derive(Default)]
struct State {
    leagues: HashMap<Id<Leagues>, League>,
    members: HashMap<Id<Leagues>, Vec<Member>>,
    teams: HashMap<Id<Leagues>, Vec<TeamPair>>,
    fixtures: HashMap<Id<Fixtures>, FixtureRecord>,
    legacy: Vec<Fixture>,
    sessions: HashMap<Id<RunningSessions>, RunningSession>,
    /// Runs as a competing writer right before the next fixture save.
    fixture_hook: Option<FixtureHook>,
    fail_next_schedule: bool,
}

impl State {
    fn has_schedule(&self, league: Id<Leagues>) -> bool {
        self.fixtures.values().any(|record| record.fixture.league == league)
            || self.sessions.values().any(|session| session.league == league)
    }
}

#[derive(Default)]
pub(crate) struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub(crate) async fn insert_legacy(&self, fixture: Fixture) {
        self.state.lock().await.legacy.push(fixture);
    }

    /// Simulates another caller saving the fixture first.
    pub(crate) async fn interleave_fixture_save(&self, hook: impl FnOnce(&mut FixtureRecord) + Send + 'static) {
        self.state.lock().await.fixture_hook = Some(Box::new(hook));
    }

    pub(crate) async fn fail_next_schedule(&self) {
        self.state.lock().await.fail_next_schedule = true;
    }
}

#[async_trait]
impl LeagueRepository for MemoryRepository {
    async fn insert_league(&self, league: &League, owner: &Member) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.leagues.insert(league.id, league.clone());
        state.members.insert(league.id, vec![owner.clone()]);
        Ok(())
    }

    async fn league(&self, id: Id<Leagues>) -> Result<Option<League>, Error> {
        Ok(self.state.lock().await.leagues.get(&id).cloned())
    }

    async fn update_league(&self, league: &League) -> Result<(), Error> {
        self.state.lock().await.leagues.insert(league.id, league.clone());
        Ok(())
    }

    async fn delete_league(&self, id: Id<Leagues>) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.leagues.remove(&id);
        state.members.remove(&id);
        state.teams.remove(&id);
        state.fixtures.retain(|_, record| record.fixture.league != id);
        state.legacy.retain(|fixture| fixture.league != id);
        state.sessions.retain(|_, session| session.league != id);
        Ok(())
    }

    async fn members(&self, league: Id<Leagues>) -> Result<Vec<Member>, Error> {
        Ok(self.state.lock().await.members.get(&league).cloned().unwrap_or_default())
    }

    async fn add_member(&self, league: Id<Leagues>, member: &Member) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        let members = state.members.entry(league).or_default();
        if members.iter().any(|existing| existing.user == member.user) {
            return Ok(false)
        }
        members.push(member.clone());
        Ok(true)
    }

    async fn remove_member(&self, league: Id<Leagues>, user: Id<Users>) -> Result<bool, Error> {
        let mut state = self.state.lock().await;
        let Some(members) = state.members.get_mut(&league) else { return Ok(false) };
        let before = members.len();
        members.retain(|member| member.user != user || member.role == MemberRole::Owner);
        Ok(members.len() < before)
    }

    async fn assigned_teams(&self, league: Id<Leagues>) -> Result<Vec<TeamPair>, Error> {
        Ok(self.state.lock().await.teams.get(&league).cloned().unwrap_or_default())
    }

    async fn replace_assigned_teams(&self, league: Id<Leagues>, pairs: &[TeamPair]) -> Result<(), Error> {
        self.state.lock().await.teams.insert(league, pairs.to_vec());
        Ok(())
    }

    async fn has_schedule(&self, league: Id<Leagues>) -> Result<bool, Error> {
        Ok(self.state.lock().await.has_schedule(league))
    }

    async fn insert_schedule(&self, league: Id<Leagues>, fixtures: &[Fixture], sessions: &[RunningSession]) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if state.has_schedule(league) {
            return Err(Error::ScheduleConflict(league))
        }
        if mem::take(&mut state.fail_next_schedule) {
            return Err(Error::Sql(sqlx::Error::PoolTimedOut))
        }
        state.fixtures.extend(fixtures.iter().map(|fixture| (fixture.id, FixtureRecord { fixture: fixture.clone(), submissions: Vec::default() })));
        state.sessions.extend(sessions.iter().map(|session| (session.id, session.clone())));
        Ok(())
    }

    async fn insert_fixture(&self, fixture: &Fixture) -> Result<(), Error> {
        self.state.lock().await.fixtures.insert(fixture.id, FixtureRecord { fixture: fixture.clone(), submissions: Vec::default() });
        Ok(())
    }

    async fn fixture(&self, id: Id<Fixtures>) -> Result<Option<FixtureRecord>, Error> {
        Ok(self.state.lock().await.fixtures.get(&id).cloned())
    }

    async fn fixtures(&self, league: Id<Leagues>) -> Result<Vec<Fixture>, Error> {
        let state = self.state.lock().await;
        let workflow = state.fixtures.values().filter(|record| record.fixture.league == league).map(|record| record.fixture.clone()).collect();
        let legacy = state.legacy.iter().filter(|fixture| fixture.league == league).cloned().collect();
        Ok(fixture::merge(legacy, workflow))
    }

    async fn save_fixture(&self, record: &FixtureRecord, expected_version: u32) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let hook = state.fixture_hook.take();
        let stored = state.fixtures.get_mut(&record.fixture.id).ok_or(Error::VersionConflict { kind: Fixtures::KIND, id: record.fixture.id.get() })?;
        if let Some(hook) = hook {
            hook(stored);
            stored.fixture.version += 1;
        }
        if stored.fixture.version != expected_version {
            return Err(Error::VersionConflict { kind: Fixtures::KIND, id: record.fixture.id.get() })
        }
        *stored = record.clone();
        Ok(())
    }

    async fn insert_session(&self, session: &RunningSession) -> Result<(), Error> {
        self.state.lock().await.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn session(&self, id: Id<RunningSessions>) -> Result<Option<RunningSession>, Error> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn sessions(&self, league: Id<Leagues>) -> Result<Vec<RunningSession>, Error> {
        Ok(self.state.lock().await.sessions.values()
            .filter(|session| session.league == league)
            .cloned()
            .sorted_by_key(|session| (session.week, session.starts_at, session.id))
            .collect())
    }

    async fn save_session(&self, session: &RunningSession, expected_version: u32) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let stored = state.sessions.get_mut(&session.id).ok_or(Error::VersionConflict { kind: RunningSessions::KIND, id: session.id.get() })?;
        if stored.version != expected_version {
            return Err(Error::VersionConflict { kind: RunningSessions::KIND, id: session.id.get() })
        }
        *stored = session.clone();
        Ok(())
    }
}
