use {
    async_trait::async_trait,
    serde_json::Value,
    sqlx::types::Json,
    crate::{
        fixture::{
            self,
            Fixture,
            FixtureStatus,
            Participant,
            Score,
            Side,
            Source,
            workflow::{
                FixtureRecord,
                Outcome,
                Submission,
                SubmissionStatus,
            },
        },
        id::Table,
        league::{
            League,
            Member,
            MemberRole,
            RotationType,
            ScoringFormat,
            Sport,
            rules::{
                self,
                ComparisonMode,
                Rules,
            },
            teams::TeamPair,
        },
        prelude::*,
        repo::{
            Error,
            LeagueRepository,
        },
        running::{
            Run,
            RunStatus,
            RunningSession,
            SessionStatus,
        },
    },
};

/// Converts a stored integer into its in-memory type, treating out-of-range values as corruption.
fn narrow<T: Table, N: TryFrom<i64>>(id: Id<T>, column: &'static str, value: impl Into<i64>) -> Result<N, Error> {
    let value = value.into();
    N::try_from(value).map_err(|_| Error::Corrupt { kind: T::KIND, id: id.get(), reason: Cow::Owned(format!("{column} out of range: {value}")) })
}

#[derive(sqlx::FromRow)]
struct LeagueRow {
    id: Id<Leagues>,
    name: String,
    sport: Sport,
    format: ScoringFormat,
    rotation: Option<RotationType>,
    season_weeks: i16,
    start_date: Option<NaiveDate>,
    rules_version: i32,
    rules: Option<Value>,
    created_at: DateTime<Utc>,
}

impl LeagueRow {
    fn into_league(self) -> Result<League, Error> {
        Ok(League {
            season_weeks: narrow(self.id, "season_weeks", self.season_weeks)?,
            rules: Rules::migrate(self.rules_version, self.rules.unwrap_or(Value::Null))?,
            id: self.id,
            name: self.name,
            sport: self.sport,
            format: self.format,
            rotation: self.rotation,
            start_date: self.start_date,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    user_id: Id<Users>,
    display_name: String,
    role: MemberRole,
    joined_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct FixtureRow {
    id: Id<Fixtures>,
    league: Id<Leagues>,
    week: Option<i16>,
    scheduled_date: Option<NaiveDate>,
    status: FixtureStatus,
    winner: Option<Side>,
    score: Option<Json<Score>>,
    latest_submission: Option<Id<Submissions>>,
    notes: Option<String>,
    version: i64,
}

impl FixtureRow {
    fn into_fixture(self, participants: Vec<ParticipantRow>) -> Result<Fixture, Error> {
        Ok(Fixture {
            week: self.week.map(|week| narrow(self.id, "week", week)).transpose()?,
            version: narrow(self.id, "version", self.version)?,
            id: self.id,
            league: self.league,
            scheduled_date: self.scheduled_date,
            status: self.status,
            winner: self.winner,
            participants: participants.into_iter().map(ParticipantRow::into_participant).collect(),
            score: self.score.map(|Json(score)| score),
            source: Source::Workflow,
            latest_submission: self.latest_submission,
            notes: self.notes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LegacyMatchRow {
    id: Id<Fixtures>,
    league: Id<Leagues>,
    week: Option<i16>,
    played_on: Option<NaiveDate>,
    winner: Option<Side>,
    score: Option<Json<Score>>,
    notes: Option<String>,
}

impl LegacyMatchRow {
    fn into_fixture(self, participants: Vec<ParticipantRow>) -> Result<Fixture, Error> {
        Ok(Fixture {
            week: self.week.map(|week| narrow(self.id, "week", week)).transpose()?,
            id: self.id,
            league: self.league,
            scheduled_date: self.played_on,
            status: FixtureStatus::Completed,
            winner: self.winner,
            participants: participants.into_iter().map(ParticipantRow::into_participant).collect(),
            score: self.score.map(|Json(score)| score),
            source: Source::Legacy,
            latest_submission: None,
            notes: self.notes,
            version: 0,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    fixture: Id<Fixtures>,
    user_id: Id<Users>,
    side: Option<Side>,
}

impl ParticipantRow {
    fn into_participant(self) -> Participant {
        Participant { user: self.user_id, side: self.side }
    }
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: Id<Submissions>,
    fixture: Id<Fixtures>,
    submitted_by: Id<Users>,
    outcome: Outcome,
    winner: Option<Side>,
    score: Option<Json<Score>>,
    forfeit_reason: Option<String>,
    notes: Option<String>,
    status: SubmissionStatus,
    review_reason: Option<String>,
    reviewed_by: Option<Id<Users>>,
    submitted_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl From<SubmissionRow> for Submission {
    fn from(row: SubmissionRow) -> Self {
        Self {
            id: row.id,
            fixture: row.fixture,
            submitted_by: row.submitted_by,
            outcome: row.outcome,
            winner: row.winner,
            score: row.score.map(|Json(score)| score),
            forfeit_reason: row.forfeit_reason,
            notes: row.notes,
            status: row.status,
            review_reason: row.review_reason,
            reviewed_by: row.reviewed_by,
            submitted_at: row.submitted_at,
            reviewed_at: row.reviewed_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Id<RunningSessions>,
    league: Id<Leagues>,
    week: i16,
    distance_meters: i64,
    starts_at: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    mode: ComparisonMode,
    status: SessionStatus,
    finalized_at: Option<DateTime<Utc>>,
    version: i64,
}

impl SessionRow {
    fn into_session(self, runs: Vec<RunRow>) -> Result<RunningSession, Error> {
        Ok(RunningSession {
            week: narrow(self.id, "week", self.week)?,
            distance_meters: narrow(self.id, "distance_meters", self.distance_meters)?,
            version: narrow(self.id, "version", self.version)?,
            runs: runs.into_iter().map(RunRow::into_run).collect::<Result<_, _>>()?,
            id: self.id,
            league: self.league,
            starts_at: self.starts_at,
            deadline: self.deadline,
            mode: self.mode,
            status: self.status,
            finalized_at: self.finalized_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Id<Runs>,
    session: Id<RunningSessions>,
    runner: Id<Users>,
    elapsed_seconds: i64,
    distance_meters: i64,
    status: RunStatus,
    reviewer_note: Option<String>,
    submitted_at: DateTime<Utc>,
    reviewed_by: Option<Id<Users>>,
    reviewed_at: Option<DateTime<Utc>>,
}

impl RunRow {
    fn into_run(self) -> Result<Run, Error> {
        Ok(Run {
            elapsed_seconds: narrow(self.id, "elapsed_seconds", self.elapsed_seconds)?,
            distance_meters: narrow(self.id, "distance_meters", self.distance_meters)?,
            id: self.id,
            user: self.runner,
            status: self.status,
            reviewer_note: self.reviewer_note,
            submitted_at: self.submitted_at,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at,
        })
    }
}

const FIXTURE_COLUMNS: &str = "id, league, week, scheduled_date, status, winner, score, latest_submission, notes, version";
const SESSION_COLUMNS: &str = "id, league, week, distance_meters, starts_at, deadline, mode, status, finalized_at, version";
const RUN_COLUMNS: &str = "id, session, runner, elapsed_seconds, distance_meters, status, reviewer_note, submitted_at, reviewed_by, reviewed_at";

async fn insert_fixture(transaction: &mut Transaction<'_, Postgres>, fixture: &Fixture) -> Result<(), Error> {
    sqlx::query("INSERT INTO fixtures (id, league, week, scheduled_date, status, winner, score, latest_submission, notes, version) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
        .bind(fixture.id)
        .bind(fixture.league)
        .bind(fixture.week.map(i16::from))
        .bind(fixture.scheduled_date)
        .bind(fixture.status)
        .bind(fixture.winner)
        .bind(fixture.score.as_ref().map(Json))
        .bind(fixture.latest_submission)
        .bind(fixture.notes.as_deref())
        .bind(i64::from(fixture.version))
        .execute(&mut **transaction).await?;
    for (position, participant) in fixture.participants.iter().enumerate() {
        sqlx::query("INSERT INTO fixture_participants (fixture, user_id, side, position) VALUES ($1, $2, $3, $4)")
            .bind(fixture.id)
            .bind(participant.user)
            .bind(participant.side)
            .bind(position as i32)
            .execute(&mut **transaction).await?;
    }
    Ok(())
}

async fn upsert_submission(transaction: &mut Transaction<'_, Postgres>, submission: &Submission) -> Result<(), Error> {
    sqlx::query("
        INSERT INTO result_submissions (id, fixture, submitted_by, outcome, winner, score, forfeit_reason, notes, status, review_reason, reviewed_by, submitted_at, reviewed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, review_reason = EXCLUDED.review_reason, reviewed_by = EXCLUDED.reviewed_by, reviewed_at = EXCLUDED.reviewed_at
    ")
        .bind(submission.id)
        .bind(submission.fixture)
        .bind(submission.submitted_by)
        .bind(submission.outcome)
        .bind(submission.winner)
        .bind(submission.score.as_ref().map(Json))
        .bind(submission.forfeit_reason.as_deref())
        .bind(submission.notes.as_deref())
        .bind(submission.status)
        .bind(submission.review_reason.as_deref())
        .bind(submission.reviewed_by)
        .bind(submission.submitted_at)
        .bind(submission.reviewed_at)
        .execute(&mut **transaction).await?;
    Ok(())
}

async fn insert_session(transaction: &mut Transaction<'_, Postgres>, session: &RunningSession) -> Result<(), Error> {
    sqlx::query("INSERT INTO running_sessions (id, league, week, distance_meters, starts_at, deadline, mode, status, finalized_at, version) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
        .bind(session.id)
        .bind(session.league)
        .bind(i16::from(session.week))
        .bind(i64::from(session.distance_meters))
        .bind(session.starts_at)
        .bind(session.deadline)
        .bind(session.mode)
        .bind(session.status)
        .bind(session.finalized_at)
        .bind(i64::from(session.version))
        .execute(&mut **transaction).await?;
    for run in &session.runs {
        upsert_run(transaction, session.id, run).await?;
    }
    Ok(())
}

async fn upsert_run(transaction: &mut Transaction<'_, Postgres>, session: Id<RunningSessions>, run: &Run) -> Result<(), Error> {
    sqlx::query("
        INSERT INTO runs (id, session, runner, elapsed_seconds, distance_meters, status, reviewer_note, submitted_at, reviewed_by, reviewed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE SET
            elapsed_seconds = EXCLUDED.elapsed_seconds,
            distance_meters = EXCLUDED.distance_meters,
            status = EXCLUDED.status,
            reviewer_note = EXCLUDED.reviewer_note,
            submitted_at = EXCLUDED.submitted_at,
            reviewed_by = EXCLUDED.reviewed_by,
            reviewed_at = EXCLUDED.reviewed_at
    ")
        .bind(run.id)
        .bind(session)
        .bind(run.user)
        .bind(i64::from(run.elapsed_seconds))
        .bind(i64::from(run.distance_meters))
        .bind(run.status)
        .bind(run.reviewer_note.as_deref())
        .bind(run.submitted_at)
        .bind(run.reviewed_by)
        .bind(run.reviewed_at)
        .execute(&mut **transaction).await?;
    Ok(())
}

/// [`LeagueRepository`] backed by PostgreSQL. The schema lives in `migrations/`.
pub(crate) struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn runs(&self, sessions: &[Id<RunningSessions>]) -> Result<HashMap<Id<RunningSessions>, Vec<RunRow>>, Error> {
        let runs = sqlx::query_as::<_, RunRow>(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE session = ANY($1) ORDER BY submitted_at, id"))
            .bind(sessions)
            .fetch_all(&self.pool).await?;
        Ok(runs.into_iter().into_group_map_by(|run| run.session))
    }
}

#[async_trait]
impl LeagueRepository for PgRepository {
    async fn insert_league(&self, league: &League, owner: &Member) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query("INSERT INTO leagues (id, name, sport, format, rotation, season_weeks, start_date, rules_version, rules, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)")
            .bind(league.id)
            .bind(&league.name)
            .bind(league.sport)
            .bind(league.format)
            .bind(league.rotation)
            .bind(i16::from(league.season_weeks))
            .bind(league.start_date)
            .bind(rules::CURRENT_VERSION)
            .bind(league.rules.to_payload()?)
            .bind(league.created_at)
            .execute(&mut *transaction).await?;
        sqlx::query("INSERT INTO league_members (league, user_id, display_name, role, joined_at) VALUES ($1, $2, $3, $4, $5)")
            .bind(league.id)
            .bind(owner.user)
            .bind(&owner.display_name)
            .bind(owner.role)
            .bind(owner.joined_at)
            .execute(&mut *transaction).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn league(&self, id: Id<Leagues>) -> Result<Option<League>, Error> {
        sqlx::query_as::<_, LeagueRow>("SELECT id, name, sport, format, rotation, season_weeks, start_date, rules_version, rules, created_at FROM leagues WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool).await?
            .map(LeagueRow::into_league)
            .transpose()
    }

    async fn update_league(&self, league: &League) -> Result<(), Error> {
        sqlx::query("UPDATE leagues SET name = $1, sport = $2, format = $3, rotation = $4, season_weeks = $5, start_date = $6, rules_version = $7, rules = $8 WHERE id = $9")
            .bind(&league.name)
            .bind(league.sport)
            .bind(league.format)
            .bind(league.rotation)
            .bind(i16::from(league.season_weeks))
            .bind(league.start_date)
            .bind(rules::CURRENT_VERSION)
            .bind(league.rules.to_payload()?)
            .bind(league.id)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_league(&self, id: Id<Leagues>) -> Result<(), Error> {
        sqlx::query("DELETE FROM leagues WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }

    async fn members(&self, league: Id<Leagues>) -> Result<Vec<Member>, Error> {
        Ok(sqlx::query_as::<_, MemberRow>("SELECT user_id, display_name, role, joined_at FROM league_members WHERE league = $1 ORDER BY joined_at, user_id")
            .bind(league)
            .fetch_all(&self.pool).await?
            .into_iter()
            .map(|row| Member { user: row.user_id, display_name: row.display_name, role: row.role, joined_at: row.joined_at })
            .collect())
    }

    async fn add_member(&self, league: Id<Leagues>, member: &Member) -> Result<bool, Error> {
        Ok(sqlx::query("INSERT INTO league_members (league, user_id, display_name, role, joined_at) VALUES ($1, $2, $3, $4, $5) ON CONFLICT DO NOTHING")
            .bind(league)
            .bind(member.user)
            .bind(&member.display_name)
            .bind(member.role)
            .bind(member.joined_at)
            .execute(&self.pool).await?
            .rows_affected() > 0)
    }

    async fn remove_member(&self, league: Id<Leagues>, user: Id<Users>) -> Result<bool, Error> {
        Ok(sqlx::query("DELETE FROM league_members WHERE league = $1 AND user_id = $2 AND role <> 'owner'")
            .bind(league)
            .bind(user)
            .execute(&self.pool).await?
            .rows_affected() > 0)
    }

    async fn assigned_teams(&self, league: Id<Leagues>) -> Result<Vec<TeamPair>, Error> {
        Ok(sqlx::query_as::<_, (Id<Users>, Id<Users>)>("SELECT player1, player2 FROM assigned_teams WHERE league = $1 ORDER BY player1, player2")
            .bind(league)
            .fetch_all(&self.pool).await?
            .into_iter()
            .map(|(player1, player2)| TeamPair::new(player1, player2))
            .collect())
    }

    async fn replace_assigned_teams(&self, league: Id<Leagues>, pairs: &[TeamPair]) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query("DELETE FROM assigned_teams WHERE league = $1").bind(league).execute(&mut *transaction).await?;
        for pair in pairs {
            let [player1, player2] = pair.players();
            sqlx::query("INSERT INTO assigned_teams (league, player1, player2) VALUES ($1, $2, $3)")
                .bind(league)
                .bind(player1)
                .bind(player2)
                .execute(&mut *transaction).await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn has_schedule(&self, league: Id<Leagues>) -> Result<bool, Error> {
        Ok(sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM fixtures WHERE league = $1) OR EXISTS (SELECT 1 FROM running_sessions WHERE league = $1)")
            .bind(league)
            .fetch_one(&self.pool).await?)
    }

    async fn insert_schedule(&self, league: Id<Leagues>, fixtures: &[Fixture], sessions: &[RunningSession]) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;
        // serializes concurrent generation attempts for the same league
        sqlx::query("SELECT id FROM leagues WHERE id = $1 FOR UPDATE").bind(league).fetch_one(&mut *transaction).await?;
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM fixtures WHERE league = $1) OR EXISTS (SELECT 1 FROM running_sessions WHERE league = $1)")
            .bind(league)
            .fetch_one(&mut *transaction).await?;
        if exists {
            return Err(Error::ScheduleConflict(league))
        }
        for fixture in fixtures {
            insert_fixture(&mut transaction, fixture).await?;
        }
        for session in sessions {
            insert_session(&mut transaction, session).await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn insert_fixture(&self, fixture: &Fixture) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;
        insert_fixture(&mut transaction, fixture).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn fixture(&self, id: Id<Fixtures>) -> Result<Option<FixtureRecord>, Error> {
        let Some(row) = sqlx::query_as::<_, FixtureRow>(&format!("SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool).await?
        else { return Ok(None) };
        let participants = sqlx::query_as::<_, ParticipantRow>("SELECT fixture, user_id, side FROM fixture_participants WHERE fixture = $1 ORDER BY position")
            .bind(id)
            .fetch_all(&self.pool).await?;
        let submissions = sqlx::query_as::<_, SubmissionRow>("
            SELECT id, fixture, submitted_by, outcome, winner, score, forfeit_reason, notes, status, review_reason, reviewed_by, submitted_at, reviewed_at
            FROM result_submissions WHERE fixture = $1 ORDER BY seq
        ")
            .bind(id)
            .fetch_all(&self.pool).await?;
        Ok(Some(FixtureRecord {
            fixture: row.into_fixture(participants)?,
            submissions: submissions.into_iter().map(Submission::from).collect(),
        }))
    }

    async fn fixtures(&self, league: Id<Leagues>) -> Result<Vec<Fixture>, Error> {
        let rows = sqlx::query_as::<_, FixtureRow>(&format!("SELECT {FIXTURE_COLUMNS} FROM fixtures WHERE league = $1"))
            .bind(league)
            .fetch_all(&self.pool).await?;
        let mut participants = sqlx::query_as::<_, ParticipantRow>("SELECT p.fixture, p.user_id, p.side FROM fixture_participants p JOIN fixtures f ON f.id = p.fixture WHERE f.league = $1 ORDER BY p.fixture, p.position")
            .bind(league)
            .fetch_all(&self.pool).await?
            .into_iter()
            .into_group_map_by(|participant| participant.fixture);
        let workflow = rows.into_iter()
            .map(|row| {
                let participants = participants.remove(&row.id).unwrap_or_default();
                row.into_fixture(participants)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let legacy_rows = sqlx::query_as::<_, LegacyMatchRow>("SELECT id, league, week, played_on, winner, score, notes FROM legacy_matches WHERE league = $1")
            .bind(league)
            .fetch_all(&self.pool).await?;
        let mut legacy_players = sqlx::query_as::<_, ParticipantRow>("SELECT p.match_id AS fixture, p.user_id, p.side FROM legacy_match_players p JOIN legacy_matches m ON m.id = p.match_id WHERE m.league = $1 ORDER BY p.match_id, p.user_id")
            .bind(league)
            .fetch_all(&self.pool).await?
            .into_iter()
            .into_group_map_by(|participant| participant.fixture);
        let legacy = legacy_rows.into_iter()
            .map(|row| {
                let participants = legacy_players.remove(&row.id).unwrap_or_default();
                row.into_fixture(participants)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fixture::merge(legacy, workflow))
    }

    async fn save_fixture(&self, record: &FixtureRecord, expected_version: u32) -> Result<(), Error> {
        let fixture = &record.fixture;
        let mut transaction = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE fixtures SET status = $1, winner = $2, score = $3, latest_submission = $4, notes = $5, version = $6 WHERE id = $7 AND version = $8")
            .bind(fixture.status)
            .bind(fixture.winner)
            .bind(fixture.score.as_ref().map(Json))
            .bind(fixture.latest_submission)
            .bind(fixture.notes.as_deref())
            .bind(i64::from(fixture.version))
            .bind(fixture.id)
            .bind(i64::from(expected_version))
            .execute(&mut *transaction).await?
            .rows_affected();
        if updated == 0 {
            return Err(Error::VersionConflict { kind: Fixtures::KIND, id: fixture.id.get() })
        }
        for submission in &record.submissions {
            upsert_submission(&mut transaction, submission).await?;
        }
        transaction.commit().await?;
        Ok(())
    }

    async fn insert_session(&self, session: &RunningSession) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;
        insert_session(&mut transaction, session).await?;
        transaction.commit().await?;
        Ok(())
    }

    async fn session(&self, id: Id<RunningSessions>) -> Result<Option<RunningSession>, Error> {
        let Some(row) = sqlx::query_as::<_, SessionRow>(&format!("SELECT {SESSION_COLUMNS} FROM running_sessions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool).await?
        else { return Ok(None) };
        let mut runs = self.runs(&[id]).await?;
        Ok(Some(row.into_session(runs.remove(&id).unwrap_or_default())?))
    }

    async fn sessions(&self, league: Id<Leagues>) -> Result<Vec<RunningSession>, Error> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!("SELECT {SESSION_COLUMNS} FROM running_sessions WHERE league = $1 ORDER BY week, starts_at, id"))
            .bind(league)
            .fetch_all(&self.pool).await?;
        let mut runs = self.runs(&rows.iter().map(|row| row.id).collect_vec()).await?;
        rows.into_iter()
            .map(|row| {
                let runs = runs.remove(&row.id).unwrap_or_default();
                row.into_session(runs)
            })
            .collect()
    }

    async fn save_session(&self, session: &RunningSession, expected_version: u32) -> Result<(), Error> {
        let mut transaction = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE running_sessions SET status = $1, finalized_at = $2, version = $3 WHERE id = $4 AND version = $5")
            .bind(session.status)
            .bind(session.finalized_at)
            .bind(i64::from(session.version))
            .bind(session.id)
            .bind(i64::from(expected_version))
            .execute(&mut *transaction).await?
            .rows_affected();
        if updated == 0 {
            return Err(Error::VersionConflict { kind: RunningSessions::KIND, id: session.id.get() })
        }
        for run in &session.runs {
            upsert_run(&mut transaction, session.id, run).await?;
        }
        transaction.commit().await?;
        Ok(())
    }
}
