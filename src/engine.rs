//! The operation boundary: resolves the caller, runs the pure components and persists their results.

use {
    chrono::Days,
    rand::{
        SeedableRng as _,
        rngs::StdRng,
    },
    tokio::sync::RwLock,
    crate::{
        fixture::{
            Fixture,
            Participant,
            Side,
            workflow::{
                Applied,
                Decision,
                FixtureRecord,
                ResultPayload,
            },
        },
        league::{
            Actor,
            ActorContext,
            League,
            LeagueUpdate,
            Member,
            MemberRole,
            NewLeague,
            ScoringFormat,
            teams::{
                self,
                AssignedTeams,
            },
        },
        prelude::*,
        repo::{
            self,
            LeagueRepository,
        },
        running::{
            Finalized,
            Run,
            RunDecision,
            RunningSession,
        },
        schedule,
        standings::{
            self,
            Standings,
        },
    },
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeneratedSchedule {
    pub(crate) fixtures: Vec<Fixture>,
    pub(crate) sessions: Vec<RunningSession>,
    /// Members sitting out, by week.
    pub(crate) byes: BTreeMap<u8, Vec<Id<Users>>>,
}

/// Cached standings, tagged with the write generation of their league.
#[derive(Default)]
struct StandingsCache {
    generations: HashMap<Id<Leagues>, u64>,
    entries: HashMap<Id<Leagues>, (u64, Standings)>,
}

pub(crate) struct Engine<R: LeagueRepository> {
    repo: R,
    schedule_seed: Option<u64>,
    max_retries: u32,
    standings: RwLock<StandingsCache>,
}

impl<R: LeagueRepository> Engine<R> {
    pub(crate) fn new(repo: R, schedule_seed: Option<u64>, max_retries: u32) -> Self {
        Self {
            standings: RwLock::default(),
            repo, schedule_seed, max_retries,
        }
    }

    async fn league_context(&self, league_id: Id<Leagues>) -> Result<(League, Vec<Member>), Error> {
        let league = self.repo.league(league_id).await?.ok_or_else(|| Error::not_found(league_id))?;
        let members = self.repo.members(league_id).await?;
        Ok((league, members))
    }

    async fn invalidate(&self, league: Id<Leagues>) {
        let mut cache = self.standings.write().await;
        *cache.generations.entry(league).or_default() += 1;
        cache.entries.remove(&league);
    }

    fn schedule_rng(&self, league: Id<Leagues>) -> StdRng {
        match self.schedule_seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ league.get()),
            None => StdRng::from_os_rng(),
        }
    }

    /// Loads a fixture, applies a transition and saves it, retrying on concurrent modification.
    async fn update_fixture(&self, ctx: &ActorContext, fixture_id: Id<Fixtures>, mut apply: impl FnMut(&mut FixtureRecord, &League, &Actor, DateTime<Utc>) -> Result<Applied, Error>) -> Result<FixtureRecord, Error> {
        let mut attempt = 0;
        loop {
            let mut record = self.repo.fixture(fixture_id).await?.ok_or_else(|| Error::not_found(fixture_id))?;
            let (league, members) = self.league_context(record.fixture.league).await?;
            let actor = Actor::resolve(ctx, &members);
            let expected_version = record.fixture.version;
            match apply(&mut record, &league, &actor, Utc::now()) {
                Ok(Applied::Changed) => {}
                Ok(Applied::Replayed) => return Ok(record),
                Err(e) => {
                    log::warn!("refused change to fixture {fixture_id} by user {}: {e}", ctx.user);
                    return Err(e)
                }
            }
            record.fixture.version += 1;
            match self.repo.save_fixture(&record, expected_version).await {
                Ok(()) => {
                    self.invalidate(league.id).await;
                    return Ok(record)
                }
                Err(e) if e.is_version_conflict() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!("fixture {fixture_id} was modified concurrently, retrying ({attempt}/{})", self.max_retries);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Session counterpart of [`Self::update_fixture`].
    async fn update_session<T>(&self, ctx: &ActorContext, session_id: Id<RunningSessions>, mut apply: impl FnMut(&mut RunningSession, &Actor, DateTime<Utc>) -> Result<(Applied, T), Error>) -> Result<(RunningSession, T), Error> {
        let mut attempt = 0;
        loop {
            let mut session = self.repo.session(session_id).await?.ok_or_else(|| Error::not_found(session_id))?;
            let members = self.repo.members(session.league).await?;
            let actor = Actor::resolve(ctx, &members);
            let expected_version = session.version;
            let value = match apply(&mut session, &actor, Utc::now()) {
                Ok((Applied::Changed, value)) => value,
                Ok((Applied::Replayed, value)) => return Ok((session, value)),
                Err(e) => {
                    log::warn!("refused change to running session {session_id} by user {}: {e}", ctx.user);
                    return Err(e)
                }
            };
            session.version += 1;
            match self.repo.save_session(&session, expected_version).await {
                Ok(()) => {
                    self.invalidate(session.league).await;
                    return Ok((session, value))
                }
                Err(e) if e.is_version_conflict() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!("running session {session_id} was modified concurrently, retrying ({attempt}/{})", self.max_retries);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) async fn create_league(&self, ctx: &ActorContext, new: NewLeague) -> Result<League, Error> {
        if !ctx.premium {
            return Err(Error::Unauthorized(Cow::Borrowed("creating a league requires a premium account")))
        }
        new.validate()?;
        let now = Utc::now();
        let league = League {
            id: Id::new(),
            name: new.name,
            sport: new.sport,
            format: new.format,
            rotation: new.rotation,
            season_weeks: new.season_weeks,
            start_date: new.start_date,
            rules: new.rules,
            created_at: now,
        };
        let owner = Member {
            user: ctx.user,
            display_name: new.owner_name,
            role: MemberRole::Owner,
            joined_at: now,
        };
        self.repo.insert_league(&league, &owner).await?;
        log::info!("user {} created {} league {} ({})", ctx.user, league.format, league.id, league.name);
        Ok(league)
    }

    /// Adds the caller to a league. Joining twice returns the existing membership.
    pub(crate) async fn join_league(&self, ctx: &ActorContext, league_id: Id<Leagues>, display_name: String) -> Result<Member, Error> {
        let (_, members) = self.league_context(league_id).await?;
        if let Some(member) = members.into_iter().find(|member| member.user == ctx.user) {
            return Ok(member)
        }
        if display_name.trim().is_empty() {
            return Err(Error::Validation(Cow::Borrowed("display name must not be empty")))
        }
        let member = Member {
            user: ctx.user,
            role: MemberRole::Member,
            joined_at: Utc::now(),
            display_name,
        };
        if self.repo.add_member(league_id, &member).await? {
            log::info!("user {} joined league {league_id}", ctx.user);
            self.invalidate(league_id).await;
        }
        Ok(member)
    }

    pub(crate) async fn leave_league(&self, ctx: &ActorContext, league_id: Id<Leagues>) -> Result<(), Error> {
        let (_, members) = self.league_context(league_id).await?;
        match Actor::resolve(ctx, &members).role {
            None => Err(Error::Validation(Cow::Borrowed("you are not a member of this league"))),
            Some(MemberRole::Owner) => Err(Error::Validation(Cow::Borrowed("the owner cannot leave their own league"))),
            Some(MemberRole::Admin | MemberRole::Member) => {
                self.repo.remove_member(league_id, ctx.user).await?;
                self.invalidate(league_id).await;
                log::info!("user {} left league {league_id}", ctx.user);
                Ok(())
            }
        }
    }

    pub(crate) async fn update_league(&self, ctx: &ActorContext, league_id: Id<Leagues>, update: LeagueUpdate) -> Result<League, Error> {
        let (league, members) = self.league_context(league_id).await?;
        Actor::resolve(ctx, &members).require_manager("change league settings")?;
        if update.is_structural(&league) && self.repo.has_schedule(league_id).await? {
            return Err(Error::InvalidTransition(Cow::Borrowed("sport, format, rotation, season length and scoring cannot change once a schedule exists")))
        }
        let league = update.apply(&league)?;
        self.repo.update_league(&league).await?;
        self.invalidate(league_id).await;
        log::info!("user {} updated league {league_id}", ctx.user);
        Ok(league)
    }

    pub(crate) async fn delete_league(&self, ctx: &ActorContext, league_id: Id<Leagues>) -> Result<(), Error> {
        let (_, members) = self.league_context(league_id).await?;
        if Actor::resolve(ctx, &members).role != Some(MemberRole::Owner) {
            return Err(Error::Unauthorized(Cow::Borrowed("only the owner can delete a league")))
        }
        self.repo.delete_league(league_id).await?;
        self.invalidate(league_id).await;
        log::info!("user {} deleted league {league_id}", ctx.user);
        Ok(())
    }

    pub(crate) async fn save_assigned_teams(&self, ctx: &ActorContext, league_id: Id<Leagues>, pairs: &[[Id<Users>; 2]]) -> Result<AssignedTeams, Error> {
        let (league, members) = self.league_context(league_id).await?;
        Actor::resolve(ctx, &members).require_manager("assign doubles teams")?;
        if league.format != ScoringFormat::Doubles {
            return Err(Error::Validation(Cow::Owned(format!("teams can only be assigned in doubles leagues, this one is {}", league.format))))
        }
        let pairs = teams::validate_pairs(pairs, &members)?;
        if self.repo.has_schedule(league_id).await? {
            return Err(Error::ScheduleAlreadyExists)
        }
        self.repo.replace_assigned_teams(league_id, &pairs).await?;
        self.invalidate(league_id).await;
        log::info!("user {} assigned {} teams in league {league_id}", ctx.user, pairs.len());
        Ok(AssignedTeams::new(pairs, &members))
    }

    pub(crate) async fn generate_schedule(&self, ctx: &ActorContext, league_id: Id<Leagues>) -> Result<GeneratedSchedule, Error> {
        let (league, members) = self.league_context(league_id).await?;
        Actor::resolve(ctx, &members).require_manager("generate the schedule")?;
        if self.repo.has_schedule(league_id).await? {
            return Err(Error::ScheduleAlreadyExists)
        }
        let member_ids = members.iter().map(|member| member.user).collect_vec();
        let assigned = self.repo.assigned_teams(league_id).await?;
        let weeks = schedule::generate(&member_ids, league.season_weeks, league.format, league.rotation(), &assigned, &mut self.schedule_rng(league_id))?;
        let now = Utc::now();
        let mut generated = GeneratedSchedule { fixtures: Vec::default(), sessions: Vec::default(), byes: BTreeMap::default() };
        for week in weeks {
            let date = league.week_date(week.week);
            if !week.byes.is_empty() {
                generated.byes.insert(week.week, week.byes);
            }
            if league.format == ScoringFormat::IndividualTime {
                let starts_at = date.and_then(|date| date.and_hms_opt(0, 0, 0)).map(|start| start.and_utc());
                let deadline = starts_at.and_then(|start| start.checked_add_days(Days::new(7)));
                generated.sessions.push(RunningSession::new(league_id, week.week, league.rules.default_distance_meters, starts_at, deadline, league.rules.running_mode, now));
            } else {
                generated.fixtures.extend(week.pairings.iter().map(|pairing| Fixture::new(
                    league_id,
                    Some(week.week),
                    date,
                    pairing.participants().map(|(user, side)| Participant { user, side }).collect(),
                )));
            }
        }
        self.repo.insert_schedule(league_id, &generated.fixtures, &generated.sessions).await.map_err(|e| match e {
            repo::Error::ScheduleConflict(_) => Error::ScheduleAlreadyExists,
            e => Error::from(e),
        })?;
        self.invalidate(league_id).await;
        log::info!("generated {} fixtures and {} running sessions over {} weeks for league {league_id}", generated.fixtures.len(), generated.sessions.len(), league.season_weeks);
        Ok(generated)
    }

    /// Schedules a one-off fixture outside the season rotation.
    pub(crate) async fn create_fixture(&self, ctx: &ActorContext, league_id: Id<Leagues>, participants: Vec<Participant>, scheduled_date: Option<NaiveDate>) -> Result<Fixture, Error> {
        let (league, members) = self.league_context(league_id).await?;
        Actor::resolve(ctx, &members).require_manager("schedule fixtures")?;
        let mut seen = HashSet::new();
        for participant in &participants {
            if !members.iter().any(|member| member.user == participant.user) {
                return Err(Error::Validation(Cow::Owned(format!("user {} is not a member of this league", participant.user))))
            }
            if !seen.insert(participant.user) {
                return Err(Error::Validation(Cow::Owned(format!("user {} is listed twice", participant.user))))
            }
            if participant.side.is_some() != league.format.is_two_sided() {
                return Err(Error::Validation(Cow::Owned(format!("participants of {} fixtures {} sides", league.format, if league.format.is_two_sided() { "need" } else { "have no" }))))
            }
        }
        let side_size = |side| participants.iter().filter(|participant| participant.side == Some(side)).count();
        match league.format {
            ScoringFormat::Singles | ScoringFormat::Doubles => {
                let required = league.format.min_players() / 2;
                if side_size(Side::A) != required || side_size(Side::B) != required {
                    return Err(Error::Validation(Cow::Owned(format!("{} fixtures need {required} players per side", league.format))))
                }
            }
            ScoringFormat::TeamVsTeam => if side_size(Side::A) == 0 || side_size(Side::B) == 0 {
                return Err(Error::Validation(Cow::Borrowed("both sides need at least one player")))
            },
            ScoringFormat::IndividualPoints => if participants.len() < 2 {
                return Err(Error::Validation(Cow::Borrowed("at least two entrants are required")))
            },
            ScoringFormat::IndividualTime => return Err(Error::Validation(Cow::Borrowed("time trial leagues use running sessions instead of fixtures"))),
        }
        let fixture = Fixture::new(league_id, None, scheduled_date, participants);
        self.repo.insert_fixture(&fixture).await?;
        self.invalidate(league_id).await;
        log::info!("user {} created ad-hoc fixture {} in league {league_id}", ctx.user, fixture.id);
        Ok(fixture)
    }

    pub(crate) async fn fixture(&self, fixture_id: Id<Fixtures>) -> Result<FixtureRecord, Error> {
        self.repo.fixture(fixture_id).await?.ok_or_else(|| Error::not_found(fixture_id))
    }

    pub(crate) async fn list_fixtures(&self, league_id: Id<Leagues>) -> Result<Vec<Fixture>, Error> {
        let (league, _) = self.league_context(league_id).await?;
        Ok(self.repo.fixtures(league.id).await?)
    }

    pub(crate) async fn submit_result(&self, ctx: &ActorContext, fixture_id: Id<Fixtures>, mut payload: ResultPayload) -> Result<FixtureRecord, Error> {
        // fixed before the first attempt so a retry after a lost race is recognized as the same claim
        payload.submission_id.get_or_insert_with(Id::new);
        let record = self.update_fixture(ctx, fixture_id, |record, league, actor, now| record.submit(league.format, actor, payload.clone(), now)).await?;
        log::info!("user {} submitted a result for fixture {fixture_id}, now {}", ctx.user, record.fixture.status);
        Ok(record)
    }

    pub(crate) async fn confirm_result(&self, ctx: &ActorContext, fixture_id: Id<Fixtures>, submission_id: Id<Submissions>, decision: Decision, reason: Option<String>) -> Result<FixtureRecord, Error> {
        let record = self.update_fixture(ctx, fixture_id, |record, league, actor, now| record.confirm(league.format, &league.rules, actor, submission_id, decision, reason.clone(), now)).await?;
        log::info!("user {} reviewed submission {submission_id} of fixture {fixture_id}, now {}", ctx.user, record.fixture.status);
        Ok(record)
    }

    pub(crate) async fn resolve_dispute(&self, ctx: &ActorContext, fixture_id: Id<Fixtures>, winner: Option<Side>, reason: Option<String>) -> Result<FixtureRecord, Error> {
        self.update_fixture(ctx, fixture_id, |record, league, actor, now| record.resolve(league.format, actor, winner, reason.clone(), now)).await
    }

    pub(crate) async fn cancel_fixture(&self, ctx: &ActorContext, fixture_id: Id<Fixtures>, reason: Option<String>) -> Result<FixtureRecord, Error> {
        let record = self.update_fixture(ctx, fixture_id, |record, _, actor, now| record.cancel(actor, reason.clone(), now)).await?;
        log::info!("user {} cancelled fixture {fixture_id}", ctx.user);
        Ok(record)
    }

    pub(crate) async fn get_standings(&self, league_id: Id<Leagues>) -> Result<Standings, Error> {
        let generation = {
            let cache = self.standings.read().await;
            if let Some((_, standings)) = cache.entries.get(&league_id) {
                return Ok(standings.clone())
            }
            cache.generations.get(&league_id).copied().unwrap_or_default()
        };
        let (league, members) = self.league_context(league_id).await?;
        let fixtures = self.repo.fixtures(league_id).await?;
        let assigned = if league.format == ScoringFormat::Doubles { self.repo.assigned_teams(league_id).await? } else { Vec::default() };
        let sessions = if league.format == ScoringFormat::IndividualTime { self.repo.sessions(league_id).await? } else { Vec::default() };
        let standings = standings::compute(&league, &members, &fixtures, &assigned, &sessions);
        let mut cache = self.standings.write().await;
        // a write since we started reading would make this result stale
        if cache.generations.get(&league_id).copied().unwrap_or_default() == generation {
            cache.entries.insert(league_id, (generation, standings.clone()));
        }
        Ok(standings)
    }

    pub(crate) async fn create_running_session(&self, ctx: &ActorContext, league_id: Id<Leagues>, week: u8, distance_meters: u32, starts_at: Option<DateTime<Utc>>, deadline: Option<DateTime<Utc>>) -> Result<RunningSession, Error> {
        let (league, members) = self.league_context(league_id).await?;
        let actor = Actor::resolve(ctx, &members);
        let session = RunningSession::create(&league, &actor, members.len(), week, distance_meters, starts_at, deadline, Utc::now())?;
        self.repo.insert_session(&session).await?;
        self.invalidate(league_id).await;
        log::info!("user {} scheduled running session {} for week {week} of league {league_id}", ctx.user, session.id);
        Ok(session)
    }

    pub(crate) async fn open_session(&self, ctx: &ActorContext, session_id: Id<RunningSessions>) -> Result<RunningSession, Error> {
        let (session, ()) = self.update_session(ctx, session_id, |session, actor, now| Ok((session.open(actor, now)?, ()))).await?;
        log::info!("running session {session_id} opened by user {}", ctx.user);
        Ok(session)
    }

    pub(crate) async fn submit_run(&self, ctx: &ActorContext, session_id: Id<RunningSessions>, elapsed_seconds: u32, distance_meters: u32) -> Result<Run, Error> {
        let (session, run_id) = self.update_session(ctx, session_id, |session, actor, now| Ok((Applied::Changed, session.submit_run(actor, elapsed_seconds, distance_meters, now)?))).await?;
        log::info!("user {} submitted run {run_id} to running session {session_id}", ctx.user);
        session.run(run_id).cloned().ok_or_else(|| Error::not_found(run_id))
    }

    pub(crate) async fn review_run(&self, ctx: &ActorContext, session_id: Id<RunningSessions>, run_id: Id<Runs>, decision: RunDecision, note: Option<String>) -> Result<Run, Error> {
        let (session, ()) = self.update_session(ctx, session_id, |session, actor, now| Ok((session.review_run(actor, run_id, decision, note.clone(), now)?, ()))).await?;
        log::info!("user {} reviewed run {run_id} of running session {session_id}", ctx.user);
        session.run(run_id).cloned().ok_or_else(|| Error::not_found(run_id))
    }

    pub(crate) async fn finalize_session(&self, ctx: &ActorContext, session_id: Id<RunningSessions>) -> Result<Finalized, Error> {
        let (session, warning) = self.update_session(ctx, session_id, |session, actor, now| session.finalize(actor, now)).await?;
        if let Some(warning) = &warning {
            log::warn!("{warning}");
        }
        log::info!("running session {session_id} finalized by user {}", ctx.user);
        Ok(Finalized { session, warning })
    }
}
